//! Persistence and display of run summaries.
//!
//! Supports JSON logging and CSV append.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::summary::RunSummary;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Logs any serializable value as pretty-printed JSON.
pub fn log_json<T: Serialize>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends a [`RunSummary`] as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_summary(path: &str, summary: &RunSummary) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending run summary");

    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // header only on the first row
        .from_writer(file);

    writer.serialize(summary)?;
    writer.flush()?;

    Ok(())
}
