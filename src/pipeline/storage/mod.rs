// Warehouse storage: type mapping, DDL generation and the full-refresh loader

pub mod dtype;
pub mod in_memory;
pub mod sqlite;

use std::time::Instant;

use thiserror::Error;
use tracing::{error, info, instrument};

use crate::config::WarehouseConfig;
use crate::constants::TIMESTAMP_TEXT_FORMAT;
use crate::error::{EtlError, Result};
use crate::metrics::LoadMetrics;
use crate::types::{KeySpec, RecordBatch, Schema, Value};

pub use dtype::{warehouse_type, WarehouseType};
pub use in_memory::InMemoryWarehouse;
pub use sqlite::SqliteWarehouse;

/// Failure reported by a warehouse backend.
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("table '{0}' does not exist")]
    MissingTable(String),

    #[error("rejected by warehouse: {0}")]
    Rejected(String),
}

/// A cell in the storage layer's representation.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    BigInt(i64),
    Double(f64),
    Boolean(bool),
    Text(String),
}

impl From<&Value> for SqlValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Integer(v) => SqlValue::BigInt(*v),
            Value::Float(v) => SqlValue::Double(*v),
            Value::Text(v) | Value::Category(v) => SqlValue::Text(v.clone()),
            Value::Boolean(v) => SqlValue::Boolean(*v),
            Value::Timestamp(v) => SqlValue::Text(v.format(TIMESTAMP_TEXT_FORMAT).to_string()),
        }
    }
}

/// The storage collaborator: accepts a table definition plus a row batch.
pub trait Warehouse {
    /// Drop `table` if present, create it fresh and insert every row.
    ///
    /// Implementations must apply this as one unit of work: on error the
    /// previous table (or its absence) is left untouched.
    fn replace_table(
        &mut self,
        table: &TableDefinition,
        rows: &[Vec<SqlValue>],
    ) -> std::result::Result<u64, WarehouseError>;

    fn row_count(&self, table_name: &str) -> std::result::Result<u64, WarehouseError>;

    /// All rows of `table` in insertion order, columns in definition order.
    fn fetch_rows(
        &self,
        table: &TableDefinition,
    ) -> std::result::Result<Vec<Vec<SqlValue>>, WarehouseError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: WarehouseType,
    pub nullable: bool,
}

/// Target table layout derived from the canonical schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
}

impl TableDefinition {
    pub fn from_schema(name: &str, schema: &Schema, key_spec: &KeySpec) -> Self {
        let columns = schema
            .columns()
            .iter()
            .map(|spec| ColumnDefinition {
                name: spec.name.clone(),
                data_type: warehouse_type(spec.canonical_type),
                nullable: spec.nullable,
            })
            .collect();
        Self {
            name: name.to_string(),
            columns,
            primary_key: key_spec.columns().to_vec(),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(&self.name))
    }

    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let not_null = if c.nullable { "" } else { " NOT NULL" };
                format!("{} {}{}", quote_ident(&c.name), c.data_type, not_null)
            })
            .collect();
        if !self.primary_key.is_empty() {
            let keys: Vec<String> = self.primary_key.iter().map(|k| quote_ident(k)).collect();
            parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }
        format!("CREATE TABLE {} ({})", quote_ident(&self.name), parts.join(", "))
    }

    pub fn quoted_column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Quote an identifier for SQL, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Convert a batch into storage rows, preserving row order.
pub fn to_sql_rows(batch: &RecordBatch) -> Vec<Vec<SqlValue>> {
    (0..batch.num_rows())
        .map(|row| {
            batch
                .columns()
                .iter()
                .map(|c| SqlValue::from(&c.values[row]))
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LoadSummary {
    pub table: String,
    pub rows_loaded: u64,
    pub ddl: String,
    pub duration_ms: u128,
}

/// Full-refresh loader. Holds its configuration explicitly; never reads process state.
pub struct WarehouseLoader {
    config: WarehouseConfig,
}

impl WarehouseLoader {
    pub fn new(config: WarehouseConfig) -> Self {
        Self { config }
    }

    /// Open the configured warehouse, load, and release the connection on every path.
    pub fn load_into_configured(
        &self,
        batch: &RecordBatch,
        schema: &Schema,
        key_spec: &KeySpec,
    ) -> Result<LoadSummary> {
        let mut warehouse = SqliteWarehouse::open(&self.config.path).map_err(|source| {
            EtlError::Load {
                table: self.config.table_name.clone(),
                source,
            }
        })?;
        self.load(&mut warehouse, batch, schema, key_spec)
    }

    /// Replace the target table with the contents of `batch`.
    #[instrument(skip_all, fields(table = %self.config.table_name, rows = batch.num_rows()))]
    pub fn load(
        &self,
        warehouse: &mut dyn Warehouse,
        batch: &RecordBatch,
        schema: &Schema,
        key_spec: &KeySpec,
    ) -> Result<LoadSummary> {
        let started = Instant::now();
        let table = TableDefinition::from_schema(&self.config.table_name, schema, key_spec);
        let ddl = table.create_sql();
        info!(ddl = %ddl, "Replacing warehouse table");

        let rows = to_sql_rows(batch);
        let rows_loaded = match warehouse.replace_table(&table, &rows) {
            Ok(n) => n,
            Err(source) => {
                error!("Load failed, previous table left in place: {}", source);
                LoadMetrics::record_failure();
                return Err(EtlError::Load {
                    table: table.name.clone(),
                    source,
                });
            }
        };

        let elapsed = started.elapsed();
        LoadMetrics::record_success(rows.len(), elapsed.as_secs_f64());
        info!(rows_loaded, "Rows inserted into '{}'", table.name);

        Ok(LoadSummary {
            table: table.name,
            rows_loaded,
            ddl,
            duration_ms: elapsed.as_millis(),
        })
    }
}
