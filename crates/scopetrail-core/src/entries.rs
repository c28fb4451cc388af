use std::borrow::Borrow;
use std::fmt::{Display, Formatter};

use indexmap::IndexMap;
use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TrailError;

/// Separator used when a key is shown as a single string.
///
/// Computed call labels look like `identity.operation`, so `.` is never used here.
pub const KEY_SEPARATOR: &str = "|";

/// Composite key of a recorded value: scope labels (outermost first) followed
/// by exactly one field label.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct EntryKey(Vec<String>);

impl EntryKey {
    /// Builds a key from its segments.
    ///
    /// # Errors
    /// Returns [`TrailError::EmptyKey`] when `segments` is empty.
    pub fn new<I, S>(segments: I) -> Result<Self, TrailError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(TrailError::EmptyKey);
        }
        Ok(Self(segments))
    }

    /// Key for a value recorded directly in the active scope.
    #[must_use]
    pub fn field(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Returns `(label,) + self`.
    #[must_use]
    pub fn prefixed(&self, label: &str) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.push(label.to_string());
        segments.extend(self.0.iter().cloned());
        Self(segments)
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The final segment: the name under which the value was recorded.
    #[must_use]
    pub fn field_label(&self) -> &str {
        // Non-empty by construction.
        self.0.last().map_or("", String::as_str)
    }

    /// Every segment except the field label, outermost first.
    #[must_use]
    pub fn scope_labels(&self) -> &[String] {
        &self.0[..self.0.len() - 1]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn starts_with<S: AsRef<str>>(&self, prefix: &[S]) -> bool {
        prefix.len() <= self.0.len()
            && prefix
                .iter()
                .zip(&self.0)
                .all(|(lhs, rhs)| lhs.as_ref() == rhs)
    }
}

impl Display for EntryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join(KEY_SEPARATOR))
    }
}

impl Borrow<[String]> for EntryKey {
    fn borrow(&self) -> &[String] {
        &self.0
    }
}

impl TryFrom<Vec<String>> for EntryKey {
    type Error = TrailError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntryKey> for Vec<String> {
    fn from(value: EntryKey) -> Self {
        value.0
    }
}

/// Insertion-ordered mapping from [`EntryKey`] to recorded value.
///
/// Re-inserting an existing key replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entries {
    map: IndexMap<EntryKey, Value>,
}

impl Entries {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: EntryKey, value: Value) -> Option<Value> {
        self.map.insert(key, value)
    }

    /// Looks a value up by its key segments.
    #[must_use]
    pub fn get<S: AsRef<str>>(&self, segments: &[S]) -> Option<&Value> {
        let owned: Vec<String> = segments.iter().map(|s| s.as_ref().to_string()).collect();
        self.map.get(owned.as_slice())
    }

    #[must_use]
    pub fn contains<S: AsRef<str>>(&self, segments: &[S]) -> bool {
        self.get(segments).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, EntryKey, Value> {
        self.map.iter()
    }

    pub fn keys(&self) -> indexmap::map::Keys<'_, EntryKey, Value> {
        self.map.keys()
    }

    /// Moves every entry of `child` into `self` under `(label,) + key`.
    pub fn merge_prefixed(&mut self, label: &str, child: Entries) {
        for (key, value) in child.map {
            self.map.insert(key.prefixed(label), value);
        }
    }

    /// Entries whose key starts with `prefix`, with the prefix stripped.
    ///
    /// A key equal to the prefix has nothing left once stripped and is skipped.
    #[must_use]
    pub fn subtree<S: AsRef<str>>(&self, prefix: &[S]) -> Entries {
        self.map
            .iter()
            .filter(|(key, _)| key.len() > prefix.len() && key.starts_with(prefix))
            .map(|(key, value)| {
                (
                    EntryKey(key.segments()[prefix.len()..].to_vec()),
                    value.clone(),
                )
            })
            .collect()
    }
}

impl FromIterator<(EntryKey, Value)> for Entries {
    fn from_iter<T: IntoIterator<Item = (EntryKey, Value)>>(iter: T) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

impl Extend<(EntryKey, Value)> for Entries {
    fn extend<T: IntoIterator<Item = (EntryKey, Value)>>(&mut self, iter: T) {
        self.map.extend(iter);
    }
}

impl IntoIterator for Entries {
    type Item = (EntryKey, Value);
    type IntoIter = indexmap::map::IntoIter<EntryKey, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_iter()
    }
}

impl<'a> IntoIterator for &'a Entries {
    type Item = (&'a EntryKey, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, EntryKey, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}

#[derive(Serialize)]
struct EntryRef<'a> {
    key: &'a EntryKey,
    value: &'a Value,
}

#[derive(Deserialize)]
struct EntryRecord {
    key: EntryKey,
    value: Value,
}

// Composite keys cannot be JSON object keys, so entries travel as a list of
// `{"key": [..], "value": ..}` records.
impl Serialize for Entries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.map.len()))?;
        for (key, value) in &self.map {
            seq.serialize_element(&EntryRef { key, value })?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Entries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let records = Vec::<EntryRecord>::deserialize(deserializer)?;
        Ok(records
            .into_iter()
            .map(|record| (record.key, record.value))
            .collect())
    }
}
