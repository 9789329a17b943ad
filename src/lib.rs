pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod types;

pub use config::{Config, PipelinePlan, SourceConfig, WarehouseConfig};
pub use error::{EtlError, Result};
pub use pipeline::{Pipeline, PipelineResult};
pub use types::{CanonicalType, Column, ColumnSpec, KeySpec, RecordBatch, Schema, Value};
