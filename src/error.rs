use thiserror::Error;

use crate::detector::UnsupportedFormat;
use crate::models::BatchStatus;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    UnsupportedFormat(UnsupportedFormat),

    #[error("Batch {batch} is {status}; cannot {operation}")]
    StateConflict {
        batch: String,
        status: BatchStatus,
        operation: &'static str,
    },

    #[error("Row {row_id} cannot be selected: {reason}")]
    InvalidSelection { row_id: i64, reason: String },

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Unknown batch: {0}")]
    UnknownBatch(String),

    #[error("Persistence failure during {phase}: {message}")]
    Persistence { phase: &'static str, message: String },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ImportError>;
