use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::constants::{DEFAULT_TIMESTAMP_FORMAT, FALSE_TOKENS, NULL_SENTINELS, TRUE_TOKENS};
use crate::error::{EtlError, Result};
use crate::metrics::CastMetrics;
use crate::types::{CanonicalType, Column, ColumnSpec, RecordBatch, Schema, Value};

/// How the caster treats booleans and timestamps it cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastMode {
    /// Unparseable booleans/timestamps become null.
    #[default]
    Permissive,
    /// Unparseable booleans/timestamps fail the cast.
    Strict,
}

/// Coerces raw text cells into the declared canonical schema.
#[derive(Debug, Clone)]
pub struct TypeCaster {
    mode: CastMode,
    timestamp_format: String,
}

impl Default for TypeCaster {
    fn default() -> Self {
        Self::new(CastMode::default(), DEFAULT_TIMESTAMP_FORMAT)
    }
}

/// Why a single cell could not be cast.
struct CellError(String);

impl TypeCaster {
    pub fn new(mode: CastMode, timestamp_format: impl Into<String>) -> Self {
        Self {
            mode,
            timestamp_format: timestamp_format.into(),
        }
    }

    /// Produce a batch holding exactly the schema's columns, in schema order.
    #[instrument(skip_all, fields(rows = batch.num_rows(), mode = ?self.mode))]
    pub fn cast(&self, batch: &RecordBatch, schema: &Schema) -> Result<RecordBatch> {
        for column in batch.columns() {
            if schema.get(&column.name).is_none() {
                warn!(column = %column.name, "Dropping column not declared in schema");
            }
        }

        let mut columns = Vec::with_capacity(schema.len());
        for spec in schema.columns() {
            let raw = batch.column(&spec.name).ok_or_else(|| {
                EtlError::Schema(format!(
                    "declared column '{}' is missing from the batch",
                    spec.name
                ))
            })?;
            columns.push(self.cast_column(raw, spec)?);
        }

        RecordBatch::new(columns)
    }

    fn cast_column(&self, raw: &Column, spec: &ColumnSpec) -> Result<Column> {
        let mut values = Vec::with_capacity(raw.values.len());
        let mut coerced_nulls = 0usize;

        for (row, cell) in raw.values.iter().enumerate() {
            let value = match self.cast_cell(cell, spec.canonical_type, &mut coerced_nulls) {
                Ok(v) => v,
                Err(CellError(reason)) => {
                    CastMetrics::record_failure(spec.canonical_type);
                    return Err(EtlError::Cast {
                        column: spec.name.clone(),
                        row,
                        value: cell.to_string(),
                        reason,
                    });
                }
            };
            values.push(value);
        }

        if coerced_nulls > 0 {
            debug!(
                column = %spec.name,
                coerced_nulls,
                "Unparseable values coerced to null"
            );
            CastMetrics::record_coerced_nulls(coerced_nulls);
        }

        Ok(Column::new(spec.name.clone(), values))
    }

    fn cast_cell(
        &self,
        cell: &Value,
        target: CanonicalType,
        coerced_nulls: &mut usize,
    ) -> std::result::Result<Value, CellError> {
        if cell.is_null() {
            return Ok(Value::Null);
        }
        // Already typed (e.g. read back from a stage file)
        if !matches!(cell, Value::Text(_)) && cell.runtime_type() == Some(target) {
            return Ok(cell.clone());
        }
        let rendered = cell.to_string();
        let text = rendered.trim();
        if NULL_SENTINELS.contains(&text) {
            return Ok(Value::Null);
        }

        match target {
            CanonicalType::Text => Ok(Value::Text(text.to_string())),
            CanonicalType::Category => Ok(Value::Category(text.to_string())),
            CanonicalType::Integer => parse_integer(text),
            CanonicalType::Float => parse_float(text),
            CanonicalType::Boolean => match parse_boolean(text) {
                Some(b) => Ok(Value::Boolean(b)),
                None => self.lenient(coerced_nulls, || {
                    format!("'{}' is not one of Y/N/True/False", text)
                }),
            },
            CanonicalType::Timestamp => match parse_timestamp(text, &self.timestamp_format) {
                Some(ts) => Ok(Value::Timestamp(ts)),
                None => self.lenient(coerced_nulls, || {
                    format!("does not match timestamp format '{}'", self.timestamp_format)
                }),
            },
        }
    }

    fn lenient(
        &self,
        coerced_nulls: &mut usize,
        reason: impl FnOnce() -> String,
    ) -> std::result::Result<Value, CellError> {
        match self.mode {
            CastMode::Permissive => {
                *coerced_nulls += 1;
                Ok(Value::Null)
            }
            CastMode::Strict => Err(CellError(reason())),
        }
    }
}

fn parse_boolean(text: &str) -> Option<bool> {
    if TRUE_TOKENS.contains(&text) {
        Some(true)
    } else if FALSE_TOKENS.contains(&text) {
        Some(false)
    } else {
        None
    }
}

fn parse_integer(text: &str) -> std::result::Result<Value, CellError> {
    if let Ok(v) = text.parse::<i64>() {
        return Ok(Value::Integer(v));
    }
    // Spreadsheet exports often render whole numbers as "7.0"
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Ok(Value::Integer(f as i64))
        }
        Ok(f) if f.is_nan() => Ok(Value::Null),
        _ => Err(CellError("not a valid integer".to_string())),
    }
}

fn parse_float(text: &str) -> std::result::Result<Value, CellError> {
    match text.parse::<f64>() {
        Ok(f) if f.is_nan() => Ok(Value::Null),
        Ok(f) => Ok(Value::Float(f)),
        Err(_) => Err(CellError("not a valid number".to_string())),
    }
}

fn parse_timestamp(text: &str, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(name: &str, cells: &[&str]) -> Column {
        Column::new(name, cells.iter().map(|c| Value::text(*c)).collect())
    }

    fn single(spec: ColumnSpec, cells: &[&str]) -> Result<Vec<Value>> {
        let batch = RecordBatch::new(vec![raw(&spec.name, cells)]).unwrap();
        let schema = Schema::new(vec![spec]);
        let cast = TypeCaster::default().cast(&batch, &schema)?;
        Ok(cast.into_columns().remove(0).values)
    }

    #[test]
    fn test_scenario_row_casts_to_declared_types() {
        let batch = RecordBatch::new(vec![
            raw("id", &["7"]),
            raw("active", &["Y"]),
            raw("score", &["3.5"]),
        ])
        .unwrap();
        let schema = Schema::new(vec![
            ColumnSpec::new("id", CanonicalType::Text, false),
            ColumnSpec::new("active", CanonicalType::Boolean, true),
            ColumnSpec::new("score", CanonicalType::Float, true),
        ]);

        let cast = TypeCaster::default().cast(&batch, &schema).unwrap();
        assert_eq!(
            cast.row(0).unwrap(),
            vec![&Value::text("7"), &Value::Boolean(true), &Value::Float(3.5)]
        );
    }

    #[test]
    fn test_sentinels_become_null_for_every_type() {
        for ty in [
            CanonicalType::Integer,
            CanonicalType::Float,
            CanonicalType::Text,
            CanonicalType::Category,
            CanonicalType::Boolean,
            CanonicalType::Timestamp,
        ] {
            let values = single(ColumnSpec::new("c", ty, true), &["", "NA", " NaN ", "None"]).unwrap();
            assert!(values.iter().all(Value::is_null), "sentinel survived for {ty}");
        }
    }

    #[test]
    fn test_boolean_tokens_are_case_sensitive() {
        let values = single(
            ColumnSpec::new("flag", CanonicalType::Boolean, true),
            &["Y", "N", "True", "False", "y", "true", "maybe"],
        )
        .unwrap();
        assert_eq!(
            values,
            vec![
                Value::Boolean(true),
                Value::Boolean(false),
                Value::Boolean(true),
                Value::Boolean(false),
                Value::Null,
                Value::Null,
                Value::Null,
            ]
        );
    }

    #[test]
    fn test_strict_mode_rejects_unknown_boolean() {
        let batch = RecordBatch::new(vec![raw("flag", &["Y", "yes"])]).unwrap();
        let schema = Schema::new(vec![ColumnSpec::new("flag", CanonicalType::Boolean, true)]);
        let caster = TypeCaster::new(CastMode::Strict, DEFAULT_TIMESTAMP_FORMAT);

        match caster.cast(&batch, &schema).unwrap_err() {
            EtlError::Cast { column, row, value, .. } => {
                assert_eq!(column, "flag");
                assert_eq!(row, 1);
                assert_eq!(value, "yes");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_timestamps_parse_or_become_null() {
        let values = single(
            ColumnSpec::new("seen_at", CanonicalType::Timestamp, true),
            &["2024-03-01 12:30:00", "yesterday"],
        )
        .unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(values, vec![Value::Timestamp(expected), Value::Null]);
    }

    #[test]
    fn test_strict_mode_rejects_unparseable_timestamp() {
        let batch =
            RecordBatch::new(vec![raw("seen_at", &["2024-03-01 12:30:00", "yesterday"])]).unwrap();
        let schema = Schema::new(vec![ColumnSpec::new("seen_at", CanonicalType::Timestamp, true)]);
        let caster = TypeCaster::new(CastMode::Strict, DEFAULT_TIMESTAMP_FORMAT);

        match caster.cast(&batch, &schema).unwrap_err() {
            EtlError::Cast { column, row, value, reason } => {
                assert_eq!(column, "seen_at");
                assert_eq!(row, 1);
                assert_eq!(value, "yesterday");
                assert!(reason.contains(DEFAULT_TIMESTAMP_FORMAT));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_date_only_format_yields_midnight() {
        let batch = RecordBatch::new(vec![raw("effective_time", &["20230115"])]).unwrap();
        let schema = Schema::new(vec![ColumnSpec::new(
            "effective_time",
            CanonicalType::Timestamp,
            true,
        )]);
        let caster = TypeCaster::new(CastMode::Strict, "%Y%m%d");
        let cast = caster.cast(&batch, &schema).unwrap();
        let expected = NaiveDate::from_ymd_opt(2023, 1, 15).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(cast.columns()[0].values, vec![Value::Timestamp(expected)]);
    }

    #[test]
    fn test_invalid_numeric_is_a_hard_failure() {
        let err = single(ColumnSpec::new("score", CanonicalType::Float, true), &["1.5", "abc"])
            .unwrap_err();
        assert!(matches!(err, EtlError::Cast { row: 1, .. }));

        let err = single(ColumnSpec::new("n", CanonicalType::Integer, true), &["7.25"]).unwrap_err();
        assert!(matches!(err, EtlError::Cast { .. }));
    }

    #[test]
    fn test_integer_accepts_whole_float_literals() {
        let values = single(
            ColumnSpec::new("drug_id", CanonicalType::Integer, true),
            &["1003", " 42 ", "7.0", "-3"],
        )
        .unwrap();
        assert_eq!(
            values,
            vec![
                Value::Integer(1003),
                Value::Integer(42),
                Value::Integer(7),
                Value::Integer(-3)
            ]
        );
    }

    #[test]
    fn test_text_and_category_are_trimmed() {
        let values = single(ColumnSpec::new("tissue", CanonicalType::Category, true), &["  lung "]).unwrap();
        assert_eq!(values, vec![Value::Category("lung".into())]);
    }

    #[test]
    fn test_output_follows_schema_order_and_drops_extras() {
        let batch = RecordBatch::new(vec![
            raw("extra", &["x"]),
            raw("b", &["2"]),
            raw("a", &["1"]),
        ])
        .unwrap();
        let schema = Schema::new(vec![
            ColumnSpec::new("a", CanonicalType::Integer, true),
            ColumnSpec::new("b", CanonicalType::Integer, true),
        ]);
        let cast = TypeCaster::default().cast(&batch, &schema).unwrap();
        assert_eq!(cast.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_missing_declared_column_is_schema_error() {
        let batch = RecordBatch::new(vec![raw("a", &["1"])]).unwrap();
        let schema = Schema::new(vec![ColumnSpec::new("b", CanonicalType::Integer, true)]);
        assert!(matches!(
            TypeCaster::default().cast(&batch, &schema),
            Err(EtlError::Schema(_))
        ));
    }

    #[test]
    fn test_every_cell_matches_declared_type_after_cast() {
        let batch = RecordBatch::new(vec![
            raw("i", &["1", "NA", "3"]),
            raw("f", &["0.5", "", "2"]),
            raw("b", &["Y", "?", "N"]),
            raw("t", &["a", "None", "c"]),
        ])
        .unwrap();
        let schema = Schema::new(vec![
            ColumnSpec::new("i", CanonicalType::Integer, true),
            ColumnSpec::new("f", CanonicalType::Float, true),
            ColumnSpec::new("b", CanonicalType::Boolean, true),
            ColumnSpec::new("t", CanonicalType::Text, true),
        ]);
        let cast = TypeCaster::default().cast(&batch, &schema).unwrap();
        for (column, spec) in cast.columns().iter().zip(schema.columns()) {
            for value in &column.values {
                assert!(value.runtime_type().map_or(true, |t| t == spec.canonical_type));
            }
        }
    }
}
