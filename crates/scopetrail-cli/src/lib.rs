//! Command surface of the `scopetrail` binary.
//!
//! Every command reads an entries file (the JSON form of
//! [`scopetrail_core::Entries`], `-` for stdin), rebuilds the tree and either
//! prints it or pivots it into tables.

use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::debug;
use scopetrail_core::{build_tables_with, build_tree, Entries, PivotConfig, Table, TreeNode};
use scopetrail_export::{
    render_table, render_tree, write_csv_files, write_html, CsvOptions, HtmlOptions,
};

#[derive(Debug, Parser)]
#[command(name = "scopetrail")]
#[command(about = "Inspect recorded scope entries as trees and tables")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the entries as an indented tree.
    Tree(InputArgs),
    /// Print one table per tree node.
    Tables(TablesArgs),
    /// Write one CSV file per table.
    Csv(CsvArgs),
    /// Write all tables into one HTML document.
    Html(HtmlArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    #[arg(long)]
    input: PathBuf,
}

#[derive(Debug, Args)]
pub struct PivotArgs {
    /// Place each value in exactly one table.
    #[arg(long, conflicts_with = "pivot_config")]
    compact: bool,
    /// JSON file with pivot settings.
    #[arg(long)]
    pivot_config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct TablesArgs {
    #[command(flatten)]
    input: InputArgs,
    #[command(flatten)]
    pivot: PivotArgs,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct CsvArgs {
    #[command(flatten)]
    input: InputArgs,
    #[command(flatten)]
    pivot: PivotArgs,
    #[arg(long)]
    out_dir: PathBuf,
    #[arg(long, default_value_t = ';')]
    delimiter: char,
    /// Do not prefix file names with today's date.
    #[arg(long)]
    no_date: bool,
}

#[derive(Debug, Args)]
pub struct HtmlArgs {
    #[command(flatten)]
    input: InputArgs,
    #[command(flatten)]
    pivot: PivotArgs,
    #[arg(long)]
    output: PathBuf,
    #[arg(long, default_value = "scopetrail")]
    title: String,
}

/// Executes the parsed command.
///
/// # Errors
/// Returns an error when the input cannot be read or decoded, the entries
/// do not form a tree, or an export fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Tree(args) => {
            let tree = load_tree(&args)?;
            println!("{}", render_tree(&tree));
            Ok(())
        }
        Command::Tables(args) => {
            let tables = load_tables(&args.input, &args.pivot)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                print_tables(&tables);
            }
            Ok(())
        }
        Command::Csv(args) => {
            let tables = load_tables(&args.input, &args.pivot)?;
            let options = CsvOptions {
                delimiter: parse_delimiter(args.delimiter)?,
                date_prefix: !args.no_date,
            };
            for path in write_csv_files(&tables, &args.out_dir, &options)? {
                println!("{}", path.display());
            }
            Ok(())
        }
        Command::Html(args) => {
            let tables = load_tables(&args.input, &args.pivot)?;
            write_html(&tables, &args.output, &HtmlOptions { title: args.title })?;
            println!("{}", args.output.display());
            Ok(())
        }
    }
}

/// Reads entries from `path`, or from stdin when `path` is `-`.
///
/// # Errors
/// Returns an error when the file cannot be read or is not an entries list.
pub fn load_entries(path: &Path) -> Result<Entries> {
    let raw = if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed reading entries from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed reading entries from {}", path.display()))?
    };
    let entries: Entries = serde_json::from_str(&raw)
        .with_context(|| format!("invalid entries JSON in {}", path.display()))?;
    debug!("loaded {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

fn load_tree(args: &InputArgs) -> Result<TreeNode> {
    let entries = load_entries(&args.input)?;
    build_tree(&entries).with_context(|| format!("cannot build tree from {}", args.input.display()))
}

fn load_tables(input: &InputArgs, pivot: &PivotArgs) -> Result<Vec<Table>> {
    let config = pivot_config(pivot)?;
    let tree = load_tree(input)?;
    Ok(build_tables_with(&tree, &config))
}

fn pivot_config(args: &PivotArgs) -> Result<PivotConfig> {
    if args.compact {
        return Ok(PivotConfig::compact());
    }
    let Some(path) = args.pivot_config.as_deref() else {
        return Ok(PivotConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading pivot config from {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("pivot config must be valid JSON: {}", path.display()))?;
    PivotConfig::from_json(&value).map_err(|err| anyhow!("{}: {err}", path.display()))
}

fn parse_delimiter(value: char) -> Result<u8> {
    u8::try_from(value)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| anyhow!("--delimiter must be a single ASCII character, got {value:?}"))
}

fn print_tables(tables: &[Table]) {
    let rendered: Vec<String> = tables.iter().map(render_table).collect();
    println!("{}", rendered.join("\n\n"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn execute_cli(args: &[&str]) -> Result<()> {
        let cli = Cli::try_parse_from(args)?;
        run_cli(cli)
    }

    const FIXTURE: &str = r#"[
        {"key": ["Foo.do_something", "again_a_key"], "value": "baz"},
        {"key": ["Foo.bar", "a_key"], "value": "that's"},
        {"key": ["Foo.bar", "Foo.do_something", "so_creative"], "value": "barz"}
    ]"#;

    fn fixture_file(dir: &Path) -> PathBuf {
        let path = dir.join("entries.json");
        if let Err(err) = fs::write(&path, FIXTURE) {
            panic!("failed writing fixture: {err}");
        }
        path
    }

    fn tempdir() -> tempfile::TempDir {
        match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("tempdir failed: {err}"),
        }
    }

    #[test]
    fn load_entries_decodes_fixture() {
        let dir = tempdir();
        let entries = must(load_entries(&fixture_file(dir.path())));
        assert_eq!(entries.len(), 3);
        assert!(entries.contains(&["Foo.bar", "Foo.do_something", "so_creative"]));
    }

    #[test]
    fn load_entries_reports_the_file() {
        let dir = tempdir();
        let path = dir.path().join("broken.json");
        if let Err(err) = fs::write(&path, "{") {
            panic!("failed writing fixture: {err}");
        }
        let err = match load_entries(&path) {
            Ok(_) => panic!("expected a decode error"),
            Err(err) => err,
        };
        assert!(format!("{err:#}").contains("broken.json"));
    }

    #[test]
    fn conflicting_entries_fail_tree_building() {
        let dir = tempdir();
        let path = dir.path().join("conflict.json");
        let body = r#"[
            {"key": ["X", "f"], "value": 1},
            {"key": ["X", "f", "h"], "value": 2}
        ]"#;
        if let Err(err) = fs::write(&path, body) {
            panic!("failed writing fixture: {err}");
        }
        let result = load_tree(&InputArgs { input: path });
        let err = match result {
            Ok(_) => panic!("expected a structure conflict"),
            Err(err) => err,
        };
        assert!(format!("{err:#}").contains("tree structure conflict"));
    }

    #[test]
    fn pivot_config_file_is_honoured() {
        let dir = tempdir();
        let config_path = dir.path().join("pivot.json");
        if let Err(err) = fs::write(&config_path, r#"{"leaf_tables": false}"#) {
            panic!("failed writing config: {err}");
        }
        let input = InputArgs {
            input: fixture_file(dir.path()),
        };
        let pivot = PivotArgs {
            compact: false,
            pivot_config: Some(config_path),
        };
        let tables = must(load_tables(&input, &pivot));
        let names: Vec<String> = tables.iter().map(Table::name).collect();
        assert_eq!(names, ["", "Foo.bar"]);
    }

    #[test]
    fn csv_command_writes_files() {
        let dir = tempdir();
        let input = fixture_file(dir.path());
        let out_dir = dir.path().join("csv");
        must(execute_cli(&[
            "scopetrail",
            "csv",
            "--input",
            &input.to_string_lossy(),
            "--out-dir",
            &out_dir.to_string_lossy(),
            "--no-date",
            "--compact",
        ]));
        assert!(out_dir.join("TOP.csv").is_file());
        assert!(out_dir.join("Foo.bar.csv").is_file());
        assert!(!out_dir.join("Foo.do_something.csv").exists());
    }

    #[test]
    fn html_command_writes_document() {
        let dir = tempdir();
        let input = fixture_file(dir.path());
        let output = dir.path().join("report.html");
        must(execute_cli(&[
            "scopetrail",
            "html",
            "--input",
            &input.to_string_lossy(),
            "--output",
            &output.to_string_lossy(),
            "--title",
            "run",
        ]));
        let html = match fs::read_to_string(&output) {
            Ok(html) => html,
            Err(err) => panic!("missing report: {err}"),
        };
        assert!(html.contains("<title>run</title>"));
    }

    #[test]
    fn compact_and_pivot_config_are_exclusive() {
        let parsed = Cli::try_parse_from([
            "scopetrail",
            "tables",
            "--input",
            "entries.json",
            "--compact",
            "--pivot-config",
            "pivot.json",
        ]);
        let err = match parsed {
            Ok(cli) => panic!("expected a usage error, parsed {cli:?}"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn non_ascii_delimiter_is_rejected() {
        assert!(parse_delimiter('§').is_err());
        assert_eq!(must(parse_delimiter(',')), b',');
    }
}
