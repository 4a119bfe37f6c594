//! Archive export parsing.
//!
//! The export is a JSON document whose `"Saved Media"` array lists every
//! item with its capture date, a signed download link, and an optional
//! free-text location. Parsing is all-or-nothing: a malformed entry aborts
//! the whole load before any network activity.

mod record;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

pub use record::Record;

/// Date layout used by the export, e.g. `2021-07-04 18:05:09 UTC`.
const EXPORT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to read archive {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed archive JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive has no \"Saved Media\" list")]
    MissingMedia,

    #[error("Entry {index} has an unparseable date {value:?}")]
    BadDate { index: usize, value: String },
}

#[derive(Debug, Deserialize)]
struct Export {
    #[serde(rename = "Saved Media")]
    saved_media: Option<Vec<ExportEntry>>,
}

#[derive(Debug, Deserialize)]
struct ExportEntry {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Download Link")]
    download_link: String,
    #[serde(rename = "Location", default)]
    location: String,
}

/// Read and parse an archive export from disk.
pub fn load(path: &Path) -> Result<Vec<Record>, ArchiveError> {
    let bytes = std::fs::read(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&bytes)
}

/// Parse an archive export payload into records, preserving input order.
pub fn parse(bytes: &[u8]) -> Result<Vec<Record>, ArchiveError> {
    let export: Export = serde_json::from_slice(bytes)?;
    let entries = export.saved_media.ok_or(ArchiveError::MissingMedia)?;

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| -> Result<Record, ArchiveError> {
            let timestamp = parse_export_date(&entry.date).ok_or_else(|| ArchiveError::BadDate {
                index,
                value: entry.date.clone(),
            })?;
            Ok(Record::new(timestamp, entry.download_link, entry.location))
        })
        .collect()
}

fn parse_export_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), EXPORT_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Distinct capture years present in the archive, ascending.
pub fn years(records: &[Record]) -> BTreeSet<i32> {
    records.iter().map(Record::year).collect()
}
