use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{SqlValue, TableDefinition, Warehouse, WarehouseError};

#[derive(Debug, Clone)]
struct StoredTable {
    definition: TableDefinition,
    rows: Vec<Vec<SqlValue>>,
}

/// In-memory warehouse for development/testing.
///
/// Builds the replacement table off to the side and swaps it in only when
/// every row is accepted, matching the transactional SQLite backend.
#[derive(Debug, Default)]
pub struct InMemoryWarehouse {
    tables: HashMap<String, StoredTable>,
    statements: Vec<String>,
    fail_next_insert: Option<String>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `replace_table` call fail during insertion.
    pub fn fail_next_insert(&mut self, reason: &str) {
        self.fail_next_insert = Some(reason.to_string());
    }

    /// DDL statements issued so far, in order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    fn check_row(
        table: &TableDefinition,
        row: &[SqlValue],
        keys: &mut HashSet<Vec<String>>,
        pk_idx: &[usize],
    ) -> Result<(), WarehouseError> {
        if row.len() != table.columns.len() {
            return Err(WarehouseError::Rejected(format!(
                "row has {} values for {} columns",
                row.len(),
                table.columns.len()
            )));
        }
        for (column, value) in table.columns.iter().zip(row) {
            if !column.nullable && *value == SqlValue::Null {
                return Err(WarehouseError::ConstraintViolation(format!(
                    "NOT NULL constraint failed: {}.{}",
                    table.name, column.name
                )));
            }
        }
        if !pk_idx.is_empty() {
            let key: Vec<String> = pk_idx.iter().map(|&i| format!("{:?}", row[i])).collect();
            if !keys.insert(key) {
                return Err(WarehouseError::ConstraintViolation(format!(
                    "UNIQUE constraint failed: {}.({})",
                    table.name,
                    table.primary_key.join(", ")
                )));
            }
        }
        Ok(())
    }
}

impl Warehouse for InMemoryWarehouse {
    fn replace_table(
        &mut self,
        table: &TableDefinition,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, WarehouseError> {
        if let Some(reason) = self.fail_next_insert.take() {
            return Err(WarehouseError::Rejected(reason));
        }

        let pk_idx: Vec<usize> = table
            .primary_key
            .iter()
            .map(|k| {
                table
                    .columns
                    .iter()
                    .position(|c| &c.name == k)
                    .ok_or_else(|| {
                        WarehouseError::Rejected(format!("primary key column '{}' is not defined", k))
                    })
            })
            .collect::<Result<_, _>>()?;

        let mut keys = HashSet::with_capacity(rows.len());
        for row in rows {
            Self::check_row(table, row, &mut keys, &pk_idx)?;
        }

        self.statements.push(table.drop_sql());
        self.statements.push(table.create_sql());
        self.tables.insert(
            table.name.clone(),
            StoredTable {
                definition: table.clone(),
                rows: rows.to_vec(),
            },
        );
        debug!("Replaced in-memory table {} with {} rows", table.name, rows.len());
        Ok(rows.len() as u64)
    }

    fn row_count(&self, table_name: &str) -> Result<u64, WarehouseError> {
        self.tables
            .get(table_name)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| WarehouseError::MissingTable(table_name.to_string()))
    }

    fn fetch_rows(&self, table: &TableDefinition) -> Result<Vec<Vec<SqlValue>>, WarehouseError> {
        let stored = self
            .tables
            .get(&table.name)
            .ok_or_else(|| WarehouseError::MissingTable(table.name.clone()))?;
        if stored.definition.columns != table.columns {
            return Err(WarehouseError::Rejected(format!(
                "table '{}' was created with columns ({}), not ({})",
                table.name,
                stored.definition.column_names().join(", "),
                table.column_names().join(", ")
            )));
        }
        Ok(stored.rows.clone())
    }
}
