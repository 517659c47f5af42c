// ⚠️ Pipeline Errors - fatal failures of an aggregation run
// Row-level problems are not errors: see extractor::RejectReason

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input file not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("Schema mismatch at line {line}: expected {expected} columns, found {found}")]
    SchemaMismatch {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Price sum overflow in group {group}")]
    NumericOverflow { group: String },

    #[error("Failed to write artifact for {year} to {}: {source}", path.display())]
    WriteFailure {
        year: i32,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Illegal run transition from {from} to {to}")]
    InvalidState {
        from: &'static str,
        to: &'static str,
    },

    #[error("Extraction worker panicked")]
    WorkerPanicked,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
