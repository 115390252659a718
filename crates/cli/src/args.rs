//! Command-line argument parsing.

use anyhow::{anyhow, bail, Context, Result};
use gentable_core::gen_table::TableType;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddRow {
        table_type: TableType,
        table_id: String,
        rows: Vec<serde_json::Map<String, serde_json::Value>>,
    },
    RegenRow {
        table_type: TableType,
        table_id: String,
        row_ids: Vec<String>,
    },
    Import {
        table_type: TableType,
        table_id: String,
        file: PathBuf,
        delimiter: char,
    },
    Version,
    Help,
}

pub const USAGE: &str = "\
usage: gentable <command> [args]

commands:
  add-row   <table_type> <table_id> <json-object-or-array>
  regen-row <table_type> <table_id> <row_id>...
  import    <table_type> <table_id> <file> [--delimiter <c>]

options:
  -V, --version   print version
  -h, --help      print this help

table_type is one of: action, knowledge, chat";

/// Parses `args`, skipping the program name.
pub fn parse_args<I>(args: I) -> Result<Command>
where
    I: Iterator<Item = String>,
{
    let args: Vec<String> = args.skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        return Ok(Command::Version);
    }
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        return Ok(Command::Help);
    }

    let sub = args[0].as_str();
    let rest = &args[1..];
    match sub {
        "add-row" => {
            let (table_type, table_id, tail) = target(rest)?;
            let raw = tail.first().ok_or_else(|| anyhow!("missing row data"))?;
            Ok(Command::AddRow {
                table_type,
                table_id,
                rows: parse_rows(raw)?,
            })
        }
        "regen-row" => {
            let (table_type, table_id, tail) = target(rest)?;
            if tail.is_empty() {
                bail!("missing row ids");
            }
            Ok(Command::RegenRow {
                table_type,
                table_id,
                row_ids: tail.to_vec(),
            })
        }
        "import" => {
            let (table_type, table_id, tail) = target(rest)?;
            let file = tail.first().ok_or_else(|| anyhow!("missing file"))?;
            let mut delimiter = ',';
            let mut opts = tail[1..].iter();
            while let Some(opt) = opts.next() {
                match opt.as_str() {
                    "--delimiter" | "-d" => {
                        let v = opts.next().ok_or_else(|| anyhow!("--delimiter needs a value"))?;
                        delimiter = parse_delimiter(v)?;
                    }
                    other => bail!("unknown option {}", other),
                }
            }
            Ok(Command::Import {
                table_type,
                table_id,
                file: PathBuf::from(file),
                delimiter,
            })
        }
        other => bail!("unknown command {}", other),
    }
}

/// Leading `<table_type> <table_id>` shared by every command.
fn target(rest: &[String]) -> Result<(TableType, String, &[String])> {
    let table_type = rest
        .first()
        .ok_or_else(|| anyhow!("missing table type"))?
        .parse::<TableType>()?;
    let table_id = rest
        .get(1)
        .cloned()
        .ok_or_else(|| anyhow!("missing table id"))?;
    Ok((table_type, table_id, &rest[2..]))
}

fn parse_rows(raw: &str) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
    let v: serde_json::Value = serde_json::from_str(raw).context("row data is not valid JSON")?;
    match v {
        serde_json::Value::Object(m) => Ok(vec![m]),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|it| match it {
                serde_json::Value::Object(m) => Ok(m),
                _ => Err(anyhow!("each row must be a JSON object")),
            })
            .collect(),
        _ => bail!("row data must be a JSON object or array of objects"),
    }
}

fn parse_delimiter(v: &str) -> Result<char> {
    match v {
        "\\t" | "tab" => Ok('\t'),
        _ => {
            let mut chars = v.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => bail!("delimiter must be a single character"),
            }
        }
    }
}
