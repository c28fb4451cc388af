use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::{Entries, EntryKey, TrailError};

/// One level of the reconstructed call nesting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreeNode {
    fields: IndexMap<String, Value>,
    children: IndexMap<String, TreeNode>,
}

impl TreeNode {
    /// Values recorded directly at this level, by field label.
    #[must_use]
    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    /// Nested scopes, in the order they were first seen.
    #[must_use]
    pub fn children(&self) -> &IndexMap<String, TreeNode> {
        &self.children
    }

    #[must_use]
    pub fn child(&self, label: &str) -> Option<&TreeNode> {
        self.children.get(label)
    }

    /// Walks `path` down from this node.
    #[must_use]
    pub fn subtree<S: AsRef<str>>(&self, path: &[S]) -> Option<&TreeNode> {
        path.iter()
            .try_fold(self, |node, label| node.child(label.as_ref()))
    }

    #[must_use]
    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.children.is_empty()
    }

    /// Number of values stored in this node and below.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.fields.len() + self.children.values().map(TreeNode::value_count).sum::<usize>()
    }

    /// Rebuilds the flat mapping this tree was built from.
    #[must_use]
    pub fn entries(&self) -> Entries {
        let mut out = Entries::new();
        self.collect_entries(&mut Vec::new(), &mut out);
        out
    }

    fn collect_entries(&self, path: &mut Vec<String>, out: &mut Entries) {
        for (field, value) in &self.fields {
            let mut segments = path.clone();
            segments.push(field.clone());
            if let Ok(key) = EntryKey::new(segments) {
                out.insert(key, value.clone());
            }
        }
        for (label, child) in &self.children {
            path.push(label.clone());
            child.collect_entries(path, out);
            path.pop();
        }
    }
}

/// Rebuilds the nested tree described by the keys of `entries`.
///
/// A conflict is a clash between a field and a scope under the same node:
/// `("X","f")` with `("X","f","h")` conflicts, while `("X","f")` with
/// `("X","g","h")` places a field and a scope side by side in `X`.
///
/// # Errors
/// Returns [`TrailError::TreeStructureConflict`] when a label is used both as
/// a field and as a nested scope under the same parent, and
/// [`TrailError::EmptyScopeLabel`] for a scope labelled `""`, which would
/// collide with the self row of its parent's table.
pub fn build_tree(entries: &Entries) -> Result<TreeNode, TrailError> {
    let mut root = TreeNode::default();

    for (key, value) in entries {
        let mut node = &mut root;
        let mut path = Vec::with_capacity(key.len());

        for label in key.scope_labels() {
            path.push(label.clone());
            if label.is_empty() {
                return Err(TrailError::EmptyScopeLabel { path });
            }
            if node.fields.contains_key(label) {
                return Err(TrailError::TreeStructureConflict { path });
            }
            node = node.children.entry(label.clone()).or_default();
        }

        let field = key.field_label();
        if node.children.contains_key(field) {
            path.push(field.to_string());
            return Err(TrailError::TreeStructureConflict { path });
        }
        node.fields.insert(field.to_string(), value.clone());
    }

    Ok(root)
}
