use thiserror::Error;

use crate::pipeline::processing::quality_gate::ValidationFailure;
use crate::pipeline::storage::WarehouseError;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Cast failed in column '{column}' at row {row} for value '{value}': {reason}")]
    Cast {
        column: String,
        row: usize,
        value: String,
        reason: String,
    },

    #[error("Validation failed: {0}")]
    Validation(ValidationFailure),

    #[error("Load into table '{table}' failed: {source}")]
    Load {
        table: String,
        #[source]
        source: WarehouseError,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EtlError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::Schema(_) => "schema",
            EtlError::Cast { .. } => "cast",
            EtlError::Validation(_) => "validation",
            EtlError::Load { .. } => "load",
            EtlError::Http(_) => "http",
            EtlError::Csv(_) => "csv",
            EtlError::Parquet(_) => "parquet",
            EtlError::Toml(_) => "toml",
            EtlError::Io(_) => "io",
            EtlError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
