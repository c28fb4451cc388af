use std::fmt::{Display, Formatter};

use indexmap::IndexMap;
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use serde_json::Value;

use crate::KEY_SEPARATOR;

/// Row label used for a node's own fields.
pub const SELF_ROW: &str = "";

/// Content of one table cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Value(&'a Value),
    /// Nothing was recorded for this (row, column) pair.
    NoValue,
}

impl<'a> Cell<'a> {
    #[must_use]
    pub fn value(self) -> Option<&'a Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::NoValue => None,
        }
    }

    #[must_use]
    pub fn is_no_value(self) -> bool {
        matches!(self, Self::NoValue)
    }
}

/// Strings render without quotes, other values in their JSON form and
/// `NoValue` as nothing.
impl Display for Cell<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(Value::String(text)) => f.write_str(text),
            Self::Value(value) => write!(f, "{value}"),
            Self::NoValue => Ok(()),
        }
    }
}

/// A 2-D pivot of recorded values: rows are scope labels (or [`SELF_ROW`]),
/// columns are field labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    path: Vec<String>,
    rows: Vec<String>,
    columns: Vec<String>,
    cells: IndexMap<String, IndexMap<String, Value>>,
}

impl Table {
    /// Empty table for the tree node at `path` (empty for the root).
    #[must_use]
    pub fn new(path: Vec<String>) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    /// The node path joined with [`KEY_SEPARATOR`]; empty for the root.
    #[must_use]
    pub fn name(&self) -> String {
        self.path.join(KEY_SEPARATOR)
    }

    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.path
    }

    #[must_use]
    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn cols_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    /// Sets one cell, adding its row and column on first use.
    pub fn append(&mut self, row: &str, column: &str, value: Value) {
        if !self.cells.contains_key(row) {
            self.rows.push(row.to_string());
        }
        if !self.columns.iter().any(|existing| existing == column) {
            self.columns.push(column.to_string());
        }
        self.cells
            .entry(row.to_string())
            .or_default()
            .insert(column.to_string(), value);
    }

    pub fn append_row<'v>(
        &mut self,
        row: &str,
        fields: impl IntoIterator<Item = (&'v String, &'v Value)>,
    ) {
        for (column, value) in fields {
            self.append(row, column, value.clone());
        }
    }

    #[must_use]
    pub fn get(&self, row: &str, column: &str) -> Cell<'_> {
        self.cells
            .get(row)
            .and_then(|cells| cells.get(column))
            .map_or(Cell::NoValue, Cell::Value)
    }

    /// Cells of `row`, one per column.
    #[must_use]
    pub fn row(&self, row: &str) -> Vec<Cell<'_>> {
        self.columns.iter().map(|column| self.get(row, column)).collect()
    }

    /// Cells of `column`, one per row.
    #[must_use]
    pub fn column(&self, column: &str) -> Vec<Cell<'_>> {
        self.rows.iter().map(|row| self.get(row, column)).collect()
    }

    /// Rows become columns and columns become rows.
    #[must_use]
    pub fn transpose(&self) -> Self {
        let mut out = Self::new(self.path.clone());
        for column in &self.columns {
            for row in &self.rows {
                if let Cell::Value(value) = self.get(row, column) {
                    out.append(column, row, value.clone());
                }
            }
        }
        out.rows.clone_from(&self.columns);
        out.columns.clone_from(&self.rows);
        out
    }

    /// Copy with rows and columns in lexical order.
    #[must_use]
    pub fn sorted(&self) -> Self {
        let mut out = self.clone();
        out.rows.sort();
        out.columns.sort();
        out
    }

    /// Header row (corner cell, then column labels) followed by one line per
    /// row (row label, then cells).
    #[must_use]
    pub fn to_nested_rows(&self) -> Vec<Vec<String>> {
        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push(String::new());
        header.extend(self.columns.iter().cloned());

        let mut out = vec![header];
        for row in &self.rows {
            let mut line = Vec::with_capacity(self.columns.len() + 1);
            line.push(row.clone());
            line.extend(self.row(row).into_iter().map(|cell| cell.to_string()));
            out.push(line);
        }
        out
    }
}

#[derive(Serialize)]
struct RowView<'a> {
    label: &'a str,
    cells: Vec<Option<&'a Value>>,
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<RowView<'_>> = self
            .rows
            .iter()
            .map(|row| RowView {
                label: row,
                cells: self.row(row).into_iter().map(Cell::value).collect(),
            })
            .collect();

        let mut state = serializer.serialize_struct("Table", 4)?;
        state.serialize_field("name", &self.name())?;
        state.serialize_field("path", &self.path)?;
        state.serialize_field("columns", &self.columns)?;
        state.serialize_field("rows", &rows)?;
        state.end()
    }
}
