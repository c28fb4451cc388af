use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Table, TrailError, TreeNode, SELF_ROW};

/// Controls which rows and tables [`build_tables_with`] emits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PivotConfig {
    /// Repeat a non-root node's own fields as a self row in its own table.
    /// They always appear as that node's row in the parent table.
    pub nested_self_rows: bool,
    /// Emit tables for nodes without children.
    pub leaf_tables: bool,
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self {
            nested_self_rows: true,
            leaf_tables: true,
        }
    }
}

impl PivotConfig {
    /// Each value appears in exactly one table.
    #[must_use]
    pub fn compact() -> Self {
        Self {
            nested_self_rows: false,
            leaf_tables: false,
        }
    }

    /// Decodes a config from JSON; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`TrailError::Configuration`] when the payload does not decode.
    pub fn from_json(value: &Value) -> Result<Self, TrailError> {
        serde_json::from_value(value.clone()).map_err(|err| {
            TrailError::Configuration(format!("invalid pivot config JSON payload: {err}"))
        })
    }
}

/// [`build_tables_with`] using [`PivotConfig::default`].
#[must_use]
pub fn build_tables(tree: &TreeNode) -> Vec<Table> {
    build_tables_with(tree, &PivotConfig::default())
}

/// Pivots `tree` into one table per node, parent before children.
///
/// A node's table has a self row for its own fields (always at the root,
/// elsewhere when `nested_self_rows` is set) followed by one row per direct
/// child that holds fields. Columns are the union of those fields in
/// first-seen order. Tables without rows are skipped.
#[must_use]
pub fn build_tables_with(tree: &TreeNode, config: &PivotConfig) -> Vec<Table> {
    let mut out = Vec::new();
    collect_tables(tree, &mut Vec::new(), config, &mut out);
    out
}

fn collect_tables(
    node: &TreeNode,
    path: &mut Vec<String>,
    config: &PivotConfig,
    out: &mut Vec<Table>,
) {
    let is_root = path.is_empty();

    if is_root || config.leaf_tables || !node.is_leaf() {
        let mut table = Table::new(path.clone());
        if node.has_fields() && (is_root || config.nested_self_rows) {
            table.append_row(SELF_ROW, node.fields());
        }
        for (label, child) in node.children() {
            if child.has_fields() {
                table.append_row(label, child.fields());
            }
        }

        if table.is_empty() {
            debug!("skip empty table `{}`", table.name());
        } else {
            debug!(
                "table `{}`: {} rows x {} columns",
                table.name(),
                table.rows_count(),
                table.cols_count()
            );
            out.push(table);
        }
    }

    for (label, child) in node.children() {
        path.push(label.clone());
        collect_tables(child, path, config, out);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_tree, Entries, EntryKey, Recorder};
    use serde_json::json;

    fn must<T>(result: Result<T, TrailError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn foo_entries() -> Entries {
        let mut recorder = Recorder::new();
        recorder.activate();
        must(recorder.scoped("Foo.do_something", |rec| {
            rec.record([("again_a_key", "baz"), ("so_creative", "barz")]);
        }));
        must(recorder.scoped("Foo.bar", |rec| {
            rec.record([("a_key", "that's"), ("another_key", "great")]);
            must(rec.scoped("Foo.do_something", |rec| {
                rec.record([("again_a_key", "baz"), ("so_creative", "barz")]);
            }));
        }));
        match recorder.deactivate() {
            Some(entries) => entries,
            None => panic!("session did not end"),
        }
    }

    fn names(tables: &[Table]) -> Vec<String> {
        tables.iter().map(Table::name).collect()
    }

    #[test]
    fn default_config_emits_a_table_per_node() {
        let tables = build_tables(&must(build_tree(&foo_entries())));
        assert_eq!(
            names(&tables),
            ["", "Foo.do_something", "Foo.bar", "Foo.bar|Foo.do_something"]
        );

        let root = &tables[0];
        assert_eq!(root.rows(), ["Foo.do_something", "Foo.bar"]);
        assert_eq!(
            root.columns(),
            ["again_a_key", "so_creative", "a_key", "another_key"]
        );
        assert_eq!(
            root.get("Foo.bar", "a_key").value(),
            Some(&json!("that's"))
        );
        assert!(root.get("Foo.bar", "again_a_key").is_no_value());
        assert!(root.get("Foo.do_something", "another_key").is_no_value());

        let bar = &tables[2];
        assert_eq!(bar.rows(), [SELF_ROW, "Foo.do_something"]);
        assert_eq!(bar.get(SELF_ROW, "another_key").value(), Some(&json!("great")));
        assert_eq!(
            bar.get("Foo.do_something", "so_creative").value(),
            Some(&json!("barz"))
        );
        assert!(bar.get(SELF_ROW, "so_creative").is_no_value());

        let nested = &tables[3];
        assert_eq!(nested.path(), ["Foo.bar", "Foo.do_something"]);
        assert_eq!(nested.rows(), [SELF_ROW]);
    }

    #[test]
    fn compact_config_places_each_value_once() {
        let tables = build_tables_with(&must(build_tree(&foo_entries())), &PivotConfig::compact());
        assert_eq!(names(&tables), ["", "Foo.bar"]);
        assert_eq!(tables[1].rows(), ["Foo.do_something"]);
        assert_eq!(tables[1].columns(), ["again_a_key", "so_creative"]);

        let cells: usize = tables
            .iter()
            .map(|table| {
                table
                    .rows()
                    .iter()
                    .flat_map(|row| table.row(row))
                    .filter(|cell| !cell.is_no_value())
                    .count()
            })
            .sum();
        assert_eq!(cells, 6);
    }

    #[test]
    fn root_fields_form_a_self_row_even_when_compact() {
        let entries: Entries = [
            (EntryKey::field("version"), json!(3)),
            (must(EntryKey::new(["A", "x"])), json!(1)),
        ]
        .into_iter()
        .collect();
        let tables = build_tables_with(&must(build_tree(&entries)), &PivotConfig::compact());
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows(), [SELF_ROW, "A"]);
        assert_eq!(tables[0].get(SELF_ROW, "version").value(), Some(&json!(3)));
        assert!(tables[0].get("A", "version").is_no_value());
    }

    #[test]
    fn scopes_without_own_fields_get_no_row() {
        let entries: Entries = [(must(EntryKey::new(["A", "B", "x"])), json!(1))]
            .into_iter()
            .collect();
        let tables = build_tables(&must(build_tree(&entries)));
        assert_eq!(names(&tables), ["A", "A|B"]);
        assert_eq!(tables[0].rows(), ["B"]);
    }

    #[test]
    fn empty_tree_has_no_tables() {
        assert!(build_tables(&TreeNode::default()).is_empty());
    }

    #[test]
    fn config_decodes_with_defaults() {
        let config = must(PivotConfig::from_json(&json!({"leaf_tables": false})));
        assert_eq!(
            config,
            PivotConfig {
                nested_self_rows: true,
                leaf_tables: false
            }
        );
        assert!(matches!(
            PivotConfig::from_json(&json!({"bogus": 1})),
            Err(TrailError::Configuration(_))
        ));
    }
}
