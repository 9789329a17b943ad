use std::path::Path;

use rusqlite::types::Value as SqliteValue;
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use super::{quote_ident, SqlValue, TableDefinition, Warehouse, WarehouseError, WarehouseType};

/// Conservative bound on bound parameters per statement (older SQLite builds cap at 999).
const MAX_PARAMS_PER_STATEMENT: usize = 999;

/// SQLite-backed warehouse. The connection lives as long as this value.
pub struct SqliteWarehouse {
    conn: Connection,
}

impl SqliteWarehouse {
    /// Open (or create) the database at `path`. `:memory:` gives a private in-memory database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WarehouseError> {
        let path = path.as_ref();
        let conn = if path == Path::new(":memory:") {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| WarehouseError::Rejected(format!("cannot create {:?}: {}", parent, e)))?;
            }
            Connection::open(path)?
        };
        debug!("Opened SQLite warehouse at {:?}", path);
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    fn insert_sql(table: &TableDefinition, rows: usize) -> String {
        let row_placeholder = format!("({})", vec!["?"; table.columns.len()].join(", "));
        let values = vec![row_placeholder; rows].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(&table.name),
            table.quoted_column_list(),
            values
        )
    }
}

fn to_sqlite(value: &SqlValue) -> SqliteValue {
    match value {
        SqlValue::Null => SqliteValue::Null,
        SqlValue::BigInt(v) => SqliteValue::Integer(*v),
        SqlValue::Double(v) => SqliteValue::Real(*v),
        SqlValue::Boolean(v) => SqliteValue::Integer(i64::from(*v)),
        SqlValue::Text(v) => SqliteValue::Text(v.clone()),
    }
}

fn from_sqlite(value: SqliteValue, declared: WarehouseType) -> Result<SqlValue, WarehouseError> {
    Ok(match (value, declared) {
        (SqliteValue::Null, _) => SqlValue::Null,
        (SqliteValue::Integer(v), WarehouseType::Boolean) => SqlValue::Boolean(v != 0),
        (SqliteValue::Integer(v), WarehouseType::DoublePrecision) => SqlValue::Double(v as f64),
        (SqliteValue::Integer(v), WarehouseType::Text) => SqlValue::Text(v.to_string()),
        (SqliteValue::Integer(v), WarehouseType::BigInt) => SqlValue::BigInt(v),
        (SqliteValue::Real(v), _) => SqlValue::Double(v),
        (SqliteValue::Text(v), _) => SqlValue::Text(v),
        (SqliteValue::Blob(_), _) => {
            return Err(WarehouseError::Rejected(
                "unexpected BLOB value in warehouse table".to_string(),
            ))
        }
    })
}

impl Warehouse for SqliteWarehouse {
    fn replace_table(
        &mut self,
        table: &TableDefinition,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, WarehouseError> {
        let width = table.columns.len().max(1);
        let rows_per_statement = (MAX_PARAMS_PER_STATEMENT / width).max(1);

        // Dropped on early return, which rolls everything back
        let tx = self.conn.transaction()?;
        tx.execute_batch(&table.drop_sql())?;
        tx.execute_batch(&table.create_sql())?;

        let mut inserted = 0u64;
        for chunk in rows.chunks(rows_per_statement) {
            let sql = Self::insert_sql(table, chunk.len());
            let params: Vec<SqliteValue> = chunk.iter().flatten().map(to_sqlite).collect();
            inserted += tx.execute(&sql, params_from_iter(params.iter()))? as u64;
        }

        tx.commit()?;
        debug!("Committed {} rows into {}", inserted, table.name);
        Ok(inserted)
    }

    fn row_count(&self, table_name: &str) -> Result<u64, WarehouseError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table_name));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn fetch_rows(&self, table: &TableDefinition) -> Result<Vec<Vec<SqlValue>>, WarehouseError> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            table.quoted_column_list(),
            quote_ident(&table.name)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raw_rows = stmt.query_map([], |row| {
            (0..table.columns.len())
                .map(|i| row.get::<_, SqliteValue>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let mut rows = Vec::new();
        for raw in raw_rows {
            let converted = raw?
                .into_iter()
                .zip(&table.columns)
                .map(|(v, c)| from_sqlite(v, c.data_type))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(converted);
        }
        Ok(rows)
    }
}
