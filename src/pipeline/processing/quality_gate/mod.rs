use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{EtlError, Result};
use crate::metrics::ValidationMetrics;
use crate::types::{CanonicalType, KeySpec, RecordBatch, Schema, Value};

/// The four gate checks, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValidationCheck {
    /// Two rows share the same key tuple
    DuplicateKey,
    /// A Boolean column holds something other than true/false
    BooleanDomain,
    /// A cell's runtime type differs from its declared type
    TypeMismatch,
    /// A critical column contains nulls
    MissingValues,
}

impl ValidationCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCheck::DuplicateKey => "duplicate_key",
            ValidationCheck::BooleanDomain => "boolean_domain",
            ValidationCheck::TypeMismatch => "type_mismatch",
            ValidationCheck::MissingValues => "missing_values",
        }
    }
}

impl fmt::Display for ValidationCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of the first failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub check: ValidationCheck,
    pub reason: String,
    pub offending_columns: Vec<String>,
    /// Row indices that triggered the failure, when a check can name them
    pub offending_rows: Vec<usize>,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.check, self.reason)
    }
}

/// Outcome of the gate. A batch is either entirely valid or rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationReport {
    Pass,
    Fail(ValidationFailure),
}

impl ValidationReport {
    pub fn is_pass(&self) -> bool {
        matches!(self, ValidationReport::Pass)
    }

    pub fn failure(&self) -> Option<&ValidationFailure> {
        match self {
            ValidationReport::Pass => None,
            ValidationReport::Fail(failure) => Some(failure),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            ValidationReport::Pass => Ok(()),
            ValidationReport::Fail(failure) => Err(EtlError::Validation(failure)),
        }
    }
}

/// Read-only gate between casting and loading.
#[derive(Debug, Default, Clone, Copy)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Run every check in fixed order, stopping at the first failure.
    #[instrument(skip_all, fields(rows = batch.num_rows()))]
    pub fn validate(
        &self,
        batch: &RecordBatch,
        schema: &Schema,
        key_spec: &KeySpec,
        critical_columns: &[String],
    ) -> ValidationReport {
        let outcome = check_key_uniqueness(batch, key_spec)
            .and_then(|_| check_boolean_domain(batch, schema))
            .and_then(|_| check_types(batch, schema))
            .and_then(|_| check_completeness(batch, schema, critical_columns));

        match outcome {
            Ok(()) => {
                info!("All validations passed");
                ValidationMetrics::record_pass();
                ValidationReport::Pass
            }
            Err(failure) => {
                warn!(
                    check = %failure.check,
                    columns = ?failure.offending_columns,
                    "Validation failed: {}",
                    failure.reason
                );
                ValidationMetrics::record_failure(failure.check);
                ValidationReport::Fail(failure)
            }
        }
    }
}

type CheckResult = std::result::Result<(), ValidationFailure>;

fn check_key_uniqueness(batch: &RecordBatch, key_spec: &KeySpec) -> CheckResult {
    if key_spec.is_empty() {
        return Ok(());
    }

    let mut key_columns = Vec::with_capacity(key_spec.columns().len());
    for name in key_spec.columns() {
        match batch.column(name) {
            Some(column) => key_columns.push(column),
            // An absent column is a conformance failure, not a duplicate
            None => {
                return Err(ValidationFailure {
                    check: ValidationCheck::TypeMismatch,
                    reason: format!("key column '{}' is missing from the batch", name),
                    offending_columns: vec![name.clone()],
                    offending_rows: Vec::new(),
                })
            }
        }
    }

    let mut first_seen: HashMap<Vec<&Value>, usize> = HashMap::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let key: Vec<&Value> = key_columns.iter().map(|c| &c.values[row]).collect();
        if let Some(&earlier) = first_seen.get(&key) {
            let rendered: Vec<String> = key.iter().map(|v| v.to_string()).collect();
            return Err(ValidationFailure {
                check: ValidationCheck::DuplicateKey,
                reason: format!(
                    "rows {} and {} share key ({}) = ({})",
                    earlier,
                    row,
                    key_spec.columns().join(", "),
                    rendered.join(", ")
                ),
                offending_columns: key_spec.columns().to_vec(),
                offending_rows: vec![earlier, row],
            });
        }
        first_seen.insert(key, row);
    }

    Ok(())
}

fn check_boolean_domain(batch: &RecordBatch, schema: &Schema) -> CheckResult {
    let boolean_columns = schema
        .columns()
        .iter()
        .filter(|spec| spec.canonical_type == CanonicalType::Boolean);

    for spec in boolean_columns {
        let Some(column) = batch.column(&spec.name) else {
            continue;
        };
        let bad_rows: Vec<usize> = column
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| !matches!(v, Value::Null | Value::Boolean(_)))
            .map(|(row, _)| row)
            .collect();
        if !bad_rows.is_empty() {
            return Err(ValidationFailure {
                check: ValidationCheck::BooleanDomain,
                reason: format!(
                    "column '{}' has {} non-boolean values",
                    spec.name,
                    bad_rows.len()
                ),
                offending_columns: vec![spec.name.clone()],
                offending_rows: bad_rows,
            });
        }
    }

    Ok(())
}

fn check_types(batch: &RecordBatch, schema: &Schema) -> CheckResult {
    for spec in schema.columns() {
        let Some(column) = batch.column(&spec.name) else {
            return Err(ValidationFailure {
                check: ValidationCheck::TypeMismatch,
                reason: format!("declared column '{}' is missing from the batch", spec.name),
                offending_columns: vec![spec.name.clone()],
                offending_rows: Vec::new(),
            });
        };

        let mismatch = column.values.iter().enumerate().find_map(|(row, v)| {
            v.runtime_type()
                .filter(|actual| *actual != spec.canonical_type)
                .map(|actual| (row, actual))
        });
        if let Some((row, actual)) = mismatch {
            return Err(ValidationFailure {
                check: ValidationCheck::TypeMismatch,
                reason: format!(
                    "column '{}' has a {} value at row {}, expected {}",
                    spec.name, actual, row, spec.canonical_type
                ),
                offending_columns: vec![spec.name.clone()],
                offending_rows: vec![row],
            });
        }
    }

    Ok(())
}

/// Offending columns are reported in schema order.
fn check_completeness(batch: &RecordBatch, schema: &Schema, critical_columns: &[String]) -> CheckResult {
    let critical: HashSet<&str> = critical_columns.iter().map(String::as_str).collect();
    let ordered = schema
        .names()
        .filter(|name| critical.contains(name))
        .chain(
            critical_columns
                .iter()
                .map(String::as_str)
                .filter(|name| schema.get(name).is_none()),
        );

    let mut offending = Vec::new();
    for name in ordered {
        let has_nulls = batch
            .column(name)
            .map(|c| c.null_count() > 0)
            .unwrap_or(true);
        if has_nulls {
            offending.push(name.to_string());
        }
    }

    if offending.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure {
            check: ValidationCheck::MissingValues,
            reason: format!(
                "missing values found in critical columns: {}",
                offending.join(", ")
            ),
            offending_columns: offending,
            offending_rows: Vec::new(),
        })
    }
}
