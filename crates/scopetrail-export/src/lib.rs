//! Renders pivoted [`Table`]s and [`TreeNode`]s for people to read.
//!
//! - [`write_csv_files`] writes one delimited file per table into a directory.
//! - [`write_html`] writes one document embedding every table in tree order.
//! - [`render_table`] and [`render_tree`] produce plain text for terminals.
//!
//! Cells without a recorded value are written as empty cells (`-` in plain
//! text), never left out.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use scopetrail_core::{Cell, Table, TreeNode};
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Display name of the root table.
pub const TOP_TABLE_NAME: &str = "TOP";

/// Joins path segments in file names.
pub const FILE_PATH_SEPARATOR: &str = "---";

/// Plain-text marker for a cell with no recorded value.
pub const NO_VALUE_TEXT: &str = "-";

const MAX_FILE_STEM_CHARS: usize = 200;
const FILE_STEM_KEEP_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Prefix file names with the current UTC date (`YYYYMMDD_`).
    pub date_prefix: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b';',
            date_prefix: true,
        }
    }
}

impl CsvOptions {
    /// # Errors
    /// Returns an error when the delimiter is not a printable ASCII character
    /// or is the quote character.
    pub fn validate(&self) -> Result<()> {
        let delimiter = self.delimiter;
        if !(delimiter.is_ascii_graphic() || delimiter == b'\t' || delimiter == b' ') {
            return Err(anyhow!(
                "csv delimiter MUST be a printable ASCII character, got byte {delimiter}"
            ));
        }
        if delimiter == b'"' {
            return Err(anyhow!("csv delimiter MUST NOT be the quote character"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlOptions {
    pub title: String,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        Self {
            title: "scopetrail".to_string(),
        }
    }
}

/// Table name for display, [`TOP_TABLE_NAME`] for the root.
#[must_use]
pub fn display_name(table: &Table) -> String {
    if table.path().is_empty() {
        TOP_TABLE_NAME.to_string()
    } else {
        table.name()
    }
}

/// Serializes one table: a header row (empty corner, column labels) and one
/// line per row (row label, cells).
///
/// # Errors
/// Returns an error when the options are invalid or the CSV writer fails.
pub fn table_to_csv(table: &Table, options: &CsvOptions) -> Result<String> {
    options.validate()?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(options.delimiter)
        .flexible(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for line in table.to_nested_rows() {
        writer
            .write_record(&line)
            .with_context(|| format!("failed writing csv row for table {}", display_name(table)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow!("failed flushing csv buffer: {err}"))?;
    String::from_utf8(bytes).context("csv output is not valid UTF-8")
}

/// File name of `table` in a CSV export, optionally prefixed with `date`.
#[must_use]
pub fn csv_file_name(table: &Table, date: Option<Date>) -> String {
    let raw = if table.path().is_empty() {
        TOP_TABLE_NAME.to_string()
    } else {
        table.path().join(FILE_PATH_SEPARATOR)
    };
    let stem = shorten(&sanitize_file_stem(&raw));

    match date {
        Some(date) => {
            let stamp = date
                .format(format_description!("[year][month][day]"))
                .unwrap_or_else(|_| {
                    format!("{:04}{:02}{:02}", date.year(), u8::from(date.month()), date.day())
                });
            format!("{stamp}_{stem}.csv")
        }
        None => format!("{stem}.csv"),
    }
}

fn sanitize_file_stem(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn shorten(stem: &str) -> String {
    let chars: Vec<char> = stem.chars().collect();
    if chars.len() <= MAX_FILE_STEM_CHARS {
        return stem.to_string();
    }
    let head: String = chars[..FILE_STEM_KEEP_CHARS].iter().collect();
    let tail: String = chars[chars.len() - FILE_STEM_KEEP_CHARS..].iter().collect();
    format!("{head}___{tail}")
}

/// Writes one CSV file per table into `dir`, creating it when missing.
///
/// Returns the written paths in table order.
///
/// # Errors
/// Returns an error when the directory cannot be created or a file cannot be
/// written.
pub fn write_csv_files(tables: &[Table], dir: &Path, options: &CsvOptions) -> Result<Vec<PathBuf>> {
    options.validate()?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed creating export directory {}", dir.display()))?;

    let date = options
        .date_prefix
        .then(|| OffsetDateTime::now_utc().date());
    let mut used = BTreeSet::new();
    let mut written = Vec::with_capacity(tables.len());

    for table in tables {
        let mut file_name = csv_file_name(table, date);
        // Sanitizing can map distinct paths to the same name.
        let mut suffix = 1;
        while !used.insert(file_name.clone()) {
            suffix += 1;
            let base = csv_file_name(table, date);
            let stem = base.trim_end_matches(".csv");
            file_name = format!("{stem}_{suffix}.csv");
        }

        let path = dir.join(&file_name);
        let body = table_to_csv(table, options)?;
        std::fs::write(&path, body)
            .with_context(|| format!("failed writing csv table to {}", path.display()))?;
        debug!("wrote table {} to {}", display_name(table), path.display());
        written.push(path);
    }

    info!("exported {} table(s) to {}", written.len(), dir.display());
    Ok(written)
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\"', "&quot;")
        .replace('\'', "&#39;")
}

/// HTML fragment for one table: caption row, header row, body rows.
#[must_use]
pub fn table_to_html(table: &Table) -> String {
    let mut out = String::new();
    let span = table.cols_count() + 1;
    let _ = writeln!(out, "<table class='scopetrail'>");
    let _ = writeln!(
        out,
        "<tr class='headrow'><th colspan='{span}'>{}</th></tr>",
        escape_text(&display_name(table))
    );

    out.push_str("<tr class='bodyrow'><th></th>");
    for column in table.columns() {
        let _ = write!(out, "<th>{}</th>", escape_text(column));
    }
    out.push_str("</tr>\n");

    for row in table.rows() {
        let _ = write!(out, "<tr class='bodyrow'><th>{}</th>", escape_text(row));
        for cell in table.row(row) {
            let _ = write!(out, "<td>{}</td>", escape_text(&cell.to_string()));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>\n");
    out
}

/// Complete HTML document with every table in the given order.
#[must_use]
pub fn tables_to_html(tables: &[Table], options: &HtmlOptions) -> String {
    let mut out = String::new();
    let title = escape_text(&options.title);
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset='utf-8'>\n");
    let _ = writeln!(out, "<title>{title}</title>");
    out.push_str(
        "<style>\ntable.scopetrail { border-collapse: collapse; margin-bottom: 1em; }\n\
         table.scopetrail th, table.scopetrail td { border: 1px solid #999; padding: 2px 6px; }\n\
         tr.headrow th { text-align: left; background: #eee; }\n</style>\n",
    );
    out.push_str("</head>\n<body>\n");
    let _ = writeln!(out, "<h1>{title}</h1>");
    for table in tables {
        out.push_str(&table_to_html(table));
    }
    out.push_str("</body>\n</html>\n");
    out
}

/// Writes [`tables_to_html`] to `path`, creating parent directories.
///
/// # Errors
/// Returns an error when the parent directory or the file cannot be written.
pub fn write_html(tables: &[Table], path: &Path, options: &HtmlOptions) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed creating directory {}", parent.display()))?;
    }
    std::fs::write(path, tables_to_html(tables, options))
        .with_context(|| format!("failed writing html report to {}", path.display()))?;
    info!("exported {} table(s) to {}", tables.len(), path.display());
    Ok(())
}

fn text_cell(cell: Cell<'_>) -> String {
    match cell {
        Cell::NoValue => NO_VALUE_TEXT.to_string(),
        cell => cell.to_string(),
    }
}

/// Plain-text rendering: name line, then right-aligned columns separated by
/// ` | `.
#[must_use]
pub fn render_table(table: &Table) -> String {
    let mut lines = vec![display_name(table)];
    if table.is_empty() {
        lines.push("Empty Table".to_string());
        return lines.join("\n");
    }

    let row_width = table
        .rows()
        .iter()
        .map(|row| row.chars().count())
        .max()
        .unwrap_or(0);
    let widths: Vec<usize> = table
        .columns()
        .iter()
        .map(|column| {
            table
                .column(column)
                .into_iter()
                .map(|cell| text_cell(cell).chars().count())
                .chain([column.chars().count()])
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut header = format!("{:>row_width$}", "");
    for (column, width) in table.columns().iter().zip(widths.iter().copied()) {
        let _ = write!(header, " | {column:>width$}");
    }
    lines.push(header);

    for row in table.rows() {
        let mut line = format!("{row:>row_width$}");
        for (cell, width) in table.row(row).into_iter().zip(widths.iter().copied()) {
            let _ = write!(line, " | {:>width$}", text_cell(cell));
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// Directory-like rendering of a tree; each level is indented by `| `.
#[must_use]
pub fn render_tree(tree: &TreeNode) -> String {
    let mut lines = Vec::new();
    render_node(tree, 0, &mut lines);
    lines.join("\n")
}

fn render_node(node: &TreeNode, depth: usize, lines: &mut Vec<String>) {
    let indent = "| ".repeat(depth);
    for (field, value) in node.fields() {
        lines.push(format!("{indent}{field}: {}", Cell::Value(value)));
    }
    for (label, child) in node.children() {
        lines.push(format!("{indent}{label}"));
        render_node(child, depth + 1, lines);
    }
}
