use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::constants::TIMESTAMP_TEXT_FORMAT;
use crate::error::{EtlError, Result};

/// The closed set of column types a batch can carry after casting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalType {
    #[serde(alias = "Int64", alias = "int64", alias = "int")]
    Integer,
    #[serde(alias = "float64", alias = "Float64", alias = "double")]
    Float,
    #[serde(alias = "string", alias = "str")]
    Text,
    #[serde(alias = "categorical")]
    Category,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "datetime")]
    Timestamp,
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CanonicalType::Integer => "integer",
            CanonicalType::Float => "float",
            CanonicalType::Text => "text",
            CanonicalType::Category => "category",
            CanonicalType::Boolean => "boolean",
            CanonicalType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// Declared shape of a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub canonical_type: CanonicalType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, canonical_type: CanonicalType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            canonical_type,
            nullable,
        }
    }
}

/// Ordered list of column specs; the source of truth for casting and DDL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    columns: Vec<ColumnSpec>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Columns whose combined values must be unique across a batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeySpec {
    columns: Vec<String>,
}

impl KeySpec {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A single cell.
///
/// Floats compare and hash by bit pattern so that key tuples can live in a `HashMap`.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Category(String),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Runtime type of a non-null value.
    pub fn runtime_type(&self) -> Option<CanonicalType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(CanonicalType::Integer),
            Value::Float(_) => Some(CanonicalType::Float),
            Value::Text(_) => Some(CanonicalType::Text),
            Value::Category(_) => Some(CanonicalType::Category),
            Value::Boolean(_) => Some(CanonicalType::Boolean),
            Value::Timestamp(_) => Some(CanonicalType::Timestamp),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Category(a), Value::Category(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Integer(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Text(v) | Value::Category(v) => v.hash(state),
            Value::Boolean(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) | Value::Category(v) => f.write_str(v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "{}", v.format(TIMESTAMP_TEXT_FORMAT)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }
}

/// Ordered, named columns of equal length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordBatch {
    columns: Vec<Column>,
}

impl RecordBatch {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let expected = first.values.len();
            if let Some(bad) = columns.iter().find(|c| c.values.len() != expected) {
                return Err(EtlError::Schema(format!(
                    "column '{}' has {} rows, expected {}",
                    bad.name,
                    bad.values.len(),
                    expected
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Build a batch from row-major data, as CSV readers produce it.
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut columns: Vec<Column> = names
            .into_iter()
            .map(|name| Column::new(name, Vec::with_capacity(rows.len())))
            .collect();
        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(EtlError::Schema(format!(
                    "row {} has {} cells, expected {}",
                    idx,
                    row.len(),
                    columns.len()
                )));
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column.values.push(value);
            }
        }
        Ok(Self { columns })
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Cells of row `idx` in column order.
    pub fn row(&self, idx: usize) -> Option<Vec<&Value>> {
        if idx >= self.num_rows() {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[idx]).collect())
    }

    /// Keep at most `limit` leading rows.
    pub fn truncate(&mut self, limit: usize) {
        for column in &mut self.columns {
            column.values.truncate(limit);
        }
    }

    pub fn rename_columns(&mut self, names: Vec<String>) -> Result<()> {
        if names.len() != self.columns.len() {
            return Err(EtlError::Schema(format!(
                "got {} names for {} columns",
                names.len(),
                self.columns.len()
            )));
        }
        for (column, name) in self.columns.iter_mut().zip(names) {
            column.name = name;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn from_rows_transposes_into_columns() {
        let batch = RecordBatch::from_rows(
            vec!["a".to_string(), "b".to_string()],
            vec![
                vec![Value::text("1"), Value::text("x")],
                vec![Value::text("2"), Value::Null],
            ],
        )
        .unwrap();

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.column("b").unwrap().values, vec![Value::text("x"), Value::Null]);
        assert_eq!(batch.row(1).unwrap(), vec![&Value::text("2"), &Value::Null]);
        assert!(batch.row(2).is_none());
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let result = RecordBatch::new(vec![
            Column::new("a", vec![Value::Integer(1)]),
            Column::new("b", vec![]),
        ]);
        assert!(matches!(result, Err(EtlError::Schema(_))));
    }

    #[test]
    fn float_values_hash_by_bits() {
        let mut seen = HashSet::new();
        assert!(seen.insert(vec![Value::Float(3.5), Value::text("a")]));
        assert!(!seen.insert(vec![Value::Float(3.5), Value::text("a")]));
        assert_ne!(Value::Text("a".into()), Value::Category("a".into()));
    }

    #[test]
    fn canonical_type_accepts_pandas_aliases() {
        let spec: ColumnSpec =
            toml::from_str("name = \"COSMIC_ID\"\ntype = \"Int64\"\nnullable = false").unwrap();
        assert_eq!(spec.canonical_type, CanonicalType::Integer);
        assert!(!spec.nullable);

        let spec: ColumnSpec = toml::from_str("name = \"x\"\ntype = \"category\"").unwrap();
        assert_eq!(spec.canonical_type, CanonicalType::Category);
        assert!(spec.nullable);
    }
}
