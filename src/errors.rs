use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Table operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),
    #[error("Required column '{column}' missing from {table} table")]
    MissingColumn { column: String, table: String },
    #[error("Unparseable date '{value}' at row {row}")]
    DateParse { row: usize, value: String },
    #[error("Invalid value in column '{column}' at row {row}: {message}")]
    InvalidValue {
        row: usize,
        column: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to parse JSON configuration in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Anomaly model cannot be fitted on an empty training table")]
    EmptyTrainingTable,
    #[error("Anomaly model was fitted on {expected} features but received {found}")]
    FeatureMismatch { expected: usize, found: usize },
    #[error("Table has {rows} rows but {labels} anomaly labels were supplied")]
    LabelMismatch { rows: usize, labels: usize },
    #[error("Unsupported table format for file {path} (expected .csv or .parquet)")]
    UnsupportedFormat { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
