//! CSV record source and quarantine sink.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

use crate::models::{QuarantineRecord, RawRecord};

pub const KEY_COLUMN: &str = "Loc_key";
pub const LATITUDE_COLUMN: &str = "Latitude";
pub const LONGITUDE_COLUMN: &str = "Longitude";

/// Load all rows from a CSV file (optionally `.gz`).
pub fn read_records(path: &Path) -> Result<Vec<RawRecord>> {
    info!("Loading records from {}", path.display());

    let file = File::open(path)
        .with_context(|| format!("Failed to open record file: {}", path.display()))?;
    let reader: Box<dyn Read> = if path.extension().map_or(false, |e| e == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    read_records_from(reader)
}

/// Rows are matched to fields by header name. Short rows are kept with
/// empty fields so they reach the validator and get quarantined.
pub fn read_records_from<R: Read>(reader: R) -> Result<Vec<RawRecord>> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(b',')
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .with_context(|| format!("Column '{}' not found", name))
    };
    let key_idx = column(KEY_COLUMN)?;
    let lat_idx = column(LATITUDE_COLUMN)?;
    let lon_idx = column(LONGITUDE_COLUMN)?;

    let mut records = Vec::new();
    for result in csv_reader.records() {
        let record = result.context("Failed to read record")?;
        let field = |idx: usize| record.get(idx).unwrap_or("").to_string();
        records.push(RawRecord {
            key: field(key_idx),
            latitude: field(lat_idx),
            longitude: field(lon_idx),
        });
    }

    info!("Loaded {} records", records.len());
    Ok(records)
}

/// Write rejected rows verbatim, with the input header.
pub fn write_quarantine(path: &Path, records: &[QuarantineRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create quarantine file: {}", path.display()))?;
    write_quarantine_to(file, records)?;

    info!(
        "Wrote {} quarantined rows to {}",
        records.len(),
        path.display()
    );
    Ok(())
}

pub fn write_quarantine_to<W: Write>(writer: W, records: &[QuarantineRecord]) -> Result<()> {
    let mut csv_writer = WriterBuilder::new().has_headers(false).from_writer(writer);

    csv_writer.write_record([KEY_COLUMN, LATITUDE_COLUMN, LONGITUDE_COLUMN])?;
    for record in records {
        csv_writer.write_record([
            record.key.as_str(),
            record.latitude_raw.as_str(),
            record.longitude_raw.as_str(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}
