//! Scope-stacked value recording and tree/table reconstruction.
//!
//! Values recorded through a [`Recorder`] are keyed by the labels of every
//! scope that was open when they were recorded. The flat [`Entries`] mapping
//! that comes out of a session is rebuilt into a [`TreeNode`] with
//! [`build_tree`] and pivoted into per-caller [`Table`]s with [`build_tables`].
//!
//! ```
//! use scopetrail_core::{build_tables, build_tree, Recorder};
//! use serde_json::json;
//!
//! let mut recorder = Recorder::new();
//! recorder.activate();
//! let _ = recorder.push_scope("Foo.bar");
//! recorder.record([("a_key", json!("that's"))]);
//! recorder.pop_scope().unwrap();
//! let entries = recorder.deactivate().unwrap();
//!
//! let tables = build_tables(&build_tree(&entries).unwrap());
//! assert_eq!(tables[0].rows(), ["Foo.bar"]);
//! ```

mod entries;
pub mod local;
mod pivot;
mod recorder;
mod table;
mod tree;

pub use entries::{Entries, EntryKey, KEY_SEPARATOR};
pub use pivot::{build_tables, build_tables_with, PivotConfig};
pub use recorder::{scope_label, Instrumented, Pushed, Recorder, ScopeGuard, Session};
pub use table::{Cell, Table, SELF_ROW};
pub use tree::{build_tree, TreeNode};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TrailError {
    #[error("scope underflow: no scope left to pop above the root (path: [{}])", .path.join(", "))]
    ScopeUnderflow { path: Vec<String> },
    #[error("tree structure conflict: `{}` is used both as a field and as a scope", .path.join(KEY_SEPARATOR))]
    TreeStructureConflict { path: Vec<String> },
    #[error("scope label MUST NOT be empty (path: [{}])", .path.join(", "))]
    EmptyScopeLabel { path: Vec<String> },
    #[error("entry key MUST contain at least one segment")]
    EmptyKey,
    #[error("configuration error: {0}")]
    Configuration(String),
}
