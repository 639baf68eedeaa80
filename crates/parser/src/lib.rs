//! Streaming parser for character-separated feed files. Detects the
//! delimiter and encoding, maps source columns onto canonical Part fields,
//! and emits validated records in batches.

mod detect;
mod input;
mod json;
mod mapping;
mod parse;

pub use detect::{detect_delimiter, Delimiter};
pub use input::{detect_encoding, LossyTranscoder};
pub use json::map_json_record;
pub use mapping::{CanonicalField, ColumnMapping};
pub use parse::{parse_file, ParseOutcome, RecordContext, RowError, MAX_ROW_ERRORS};

/// Default number of records handed to `on_batch` at a time.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read feed file")]
    Io(#[from] std::io::Error),

    #[error("failed to parse character-separated content: {0}")]
    Csv(#[from] csv::Error),

    #[error("file has no header row")]
    MissingHeader,

    #[error("no `partNumber` column could be mapped from headers {headers:?}")]
    NoPartNumberColumn { headers: Vec<String> },

    #[error("batch consumer failed: {0}")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),
}
