//! Validation, deduplication and partitioning of raw input rows.

mod dedup;
mod pipeline;
mod records;
mod validator;

pub use dedup::Deduplicator;
pub use pipeline::{IngestionPipeline, IngestionReport};
pub use records::{read_records, read_records_from, write_quarantine, write_quarantine_to};
pub use validator::{RecordValidator, RegionBounds};
