//! Record writers
//!
//! JSON, JSON Lines and CSV renderings of decoded records and timelines.
//! Writers stream item by item and never own the destination. SQLite output
//! owns its database file and goes through [`write_sqlite`].

use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::analyzer::TimelineEntry;
use crate::error::{NtfsTraceError, Result};
use crate::ntfs::logfile::LogFileRecord;
use crate::ntfs::mft::MftEntry;
use crate::ntfs::structs::NtfsTimestamps;
use crate::ntfs::usn::UsnRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One JSON array
    #[default]
    Json,
    /// One JSON object per line
    Jsonl,
    Csv,
    /// One table in a SQLite database file
    Sqlite,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Jsonl => "jsonl",
            OutputFormat::Csv => "csv",
            OutputFormat::Sqlite => "db",
        }
    }
}

/// Flat row form of a record, shared by CSV and SQLite output
pub trait CsvRow {
    /// SQLite table the rows go into
    fn table() -> &'static str;
    fn header() -> &'static [&'static str];
    fn row(&self) -> Vec<String>;
}

/// Write every item in `format`; returns how many were written
pub fn write_records<T, I, W>(writer: &mut W, format: OutputFormat, items: I) -> Result<usize>
where
    T: Serialize + CsvRow,
    I: IntoIterator<Item = T>,
    W: Write + ?Sized,
{
    let mut count = 0;
    match format {
        OutputFormat::Json => {
            writer.write_all(b"[")?;
            for item in items {
                writer.write_all(if count == 0 { b"\n  " as &[u8] } else { b",\n  " })?;
                serde_json::to_writer(&mut *writer, &item)?;
                count += 1;
            }
            writer.write_all(if count == 0 { b"]\n" as &[u8] } else { b"\n]\n" })?;
        }
        OutputFormat::Jsonl => {
            for item in items {
                serde_json::to_writer(&mut *writer, &item)?;
                writer.write_all(b"\n")?;
                count += 1;
            }
        }
        OutputFormat::Csv => {
            write_csv_line(writer, T::header().iter().copied())?;
            for item in items {
                let row = item.row();
                write_csv_line(writer, row.iter().map(String::as_str))?;
                count += 1;
            }
        }
        OutputFormat::Sqlite => {
            return Err(NtfsTraceError::format("SQLite output needs a database path"));
        }
    }
    writer.flush()?;
    Ok(count)
}

/// Write every item as a row of `T::table()` in a fresh database at `path`;
/// empty fields are stored as NULL
pub fn write_sqlite<T, I>(path: &Path, items: I) -> Result<usize>
where
    T: CsvRow,
    I: IntoIterator<Item = T>,
{
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let mut conn = Connection::open(path)?;
    let columns = T::header();
    let create = format!(
        "CREATE TABLE {} ({})",
        T::table(),
        columns.iter().map(|c| format!("\"{}\" TEXT", c)).collect::<Vec<_>>().join(", ")
    );
    conn.execute(&create, [])?;

    let insert = format!(
        "INSERT INTO {} VALUES ({})",
        T::table(),
        vec!["?"; columns.len()].join(", ")
    );
    let tx = conn.transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(&insert)?;
        for item in items {
            let row = item.row();
            stmt.execute(params_from_iter(row.iter().map(|v| (!v.is_empty()).then_some(v.as_str()))))?;
            count += 1;
        }
    }
    tx.commit()?;
    debug!("Wrote {} rows to {} in {}", count, T::table(), path.display());
    Ok(count)
}

/// Pretty-printed JSON document
pub fn write_document<T: Serialize + ?Sized, W: Write + ?Sized>(writer: &mut W, document: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, document)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn write_csv_line<'s, W: Write + ?Sized>(writer: &mut W, fields: impl Iterator<Item = &'s str>) -> Result<()> {
    let line = fields.map(csv_field).collect::<Vec<_>>().join(",");
    writeln!(writer, "{}", line)?;
    Ok(())
}

/// Quote a field when it holds a separator, quote or line break
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn ts(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_default()
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn stamps(t: Option<&NtfsTimestamps>) -> [String; 4] {
    match t {
        Some(t) => [ts(t.created), ts(t.modified), ts(t.mft_modified), ts(t.accessed)],
        None => Default::default(),
    }
}

impl CsvRow for MftEntry {
    fn table() -> &'static str {
        "mft_entries"
    }

    fn header() -> &'static [&'static str] {
        &[
            "entry",
            "sequence",
            "status",
            "in_use",
            "is_directory",
            "name",
            "path",
            "size",
            "si_created",
            "si_modified",
            "si_record_changed",
            "si_accessed",
            "fn_created",
            "fn_modified",
            "fn_record_changed",
            "fn_accessed",
            "path_error",
        ]
    }

    fn row(&self) -> Vec<String> {
        let r = &self.record;
        let name = r.canonical_name();
        let mut row = vec![
            r.entry.to_string(),
            r.sequence.to_string(),
            format!("{:?}", r.status),
            r.in_use.to_string(),
            r.is_directory.to_string(),
            opt(name.map(|n| n.name.as_str())),
            opt(self.path.as_deref()),
            r.file_size().to_string(),
        ];
        row.extend(stamps(r.standard_information.as_ref().map(|s| &s.timestamps)));
        row.extend(stamps(name.map(|n| &n.timestamps)));
        row.push(opt(self.path_error.as_ref()));
        row
    }
}

impl CsvRow for UsnRecord {
    fn table() -> &'static str {
        "usn_records"
    }

    fn header() -> &'static [&'static str] {
        &[
            "offset",
            "usn",
            "timestamp",
            "file_reference",
            "parent_reference",
            "file_name",
            "path",
            "reasons",
            "source_info",
            "file_attributes",
            "version",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.offset.to_string(),
            self.usn.to_string(),
            ts(self.timestamp),
            self.file_reference.to_string(),
            self.parent_reference.to_string(),
            self.file_name.clone(),
            opt(self.path.as_deref()),
            self.reason_string(),
            format!("{:#x}", self.source_info_flags),
            format!("{:#x}", self.file_attributes),
            format!("{}.{}", self.major_version, self.minor_version),
        ]
    }
}

impl CsvRow for LogFileRecord {
    fn table() -> &'static str {
        "logfile_records"
    }

    fn header() -> &'static [&'static str] {
        &[
            "lsn",
            "previous_lsn",
            "transaction_id",
            "redo",
            "undo",
            "target_entry",
            "target_vcn",
            "cluster_block_offset",
            "file_name",
            "timestamp",
            "status",
            "page_offset",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.lsn.to_string(),
            self.previous_lsn.to_string(),
            self.transaction_id.to_string(),
            self.redo_operation.to_string(),
            self.undo_operation.to_string(),
            opt(self.target_entry),
            self.target_vcn.to_string(),
            self.cluster_block_offset.to_string(),
            opt(self.file_name()),
            ts(self.latest_timestamp()),
            format!("{:?}", self.status),
            self.page_offset.to_string(),
        ]
    }
}

impl CsvRow for TimelineEntry {
    fn table() -> &'static str {
        "timeline"
    }

    fn header() -> &'static [&'static str] {
        &["timestamp", "source", "reference", "entry", "path", "event", "sequence"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            ts(self.timestamp),
            self.source.label().to_string(),
            opt(self.reference),
            opt(self.entry),
            opt(self.path.as_deref()),
            self.event.clone(),
            self.sequence.to_string(),
        ]
    }
}

impl<T: CsvRow> CsvRow for &T {
    fn table() -> &'static str {
        T::table()
    }

    fn header() -> &'static [&'static str] {
        T::header()
    }

    fn row(&self) -> Vec<String> {
        T::row(*self)
    }
}
