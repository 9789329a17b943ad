use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use chrono::DateTime;
use parquet::basic::{Compression, ConvertedType, LogicalType, Repetition, Type as PhysicalType};
use parquet::data_type::{BoolType, ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::Field;
use parquet::schema::types::{Type, TypePtr};
use tracing::info;

use crate::error::{EtlError, Result};
use crate::types::{CanonicalType, Column, RecordBatch, Schema, Value};

// Every column is OPTIONAL so nulls survive the round trip
fn build_schema(schema: &Schema) -> Result<TypePtr> {
    let mut fields = Vec::with_capacity(schema.len());
    for spec in schema.columns() {
        let builder = match spec.canonical_type {
            CanonicalType::Integer => Type::primitive_type_builder(&spec.name, PhysicalType::INT64),
            CanonicalType::Float => Type::primitive_type_builder(&spec.name, PhysicalType::DOUBLE),
            CanonicalType::Boolean => {
                Type::primitive_type_builder(&spec.name, PhysicalType::BOOLEAN)
            }
            CanonicalType::Text | CanonicalType::Category => {
                Type::primitive_type_builder(&spec.name, PhysicalType::BYTE_ARRAY)
                    .with_logical_type(Some(LogicalType::String))
            }
            CanonicalType::Timestamp => {
                Type::primitive_type_builder(&spec.name, PhysicalType::INT64)
                    .with_converted_type(ConvertedType::TIMESTAMP_MICROS)
            }
        };
        fields.push(Arc::new(builder.with_repetition(Repetition::OPTIONAL).build()?));
    }
    Ok(Arc::new(
        Type::group_type_builder("schema").with_fields(fields).build()?,
    ))
}

/// Definition levels plus the non-null values of one column.
///
/// A non-null cell of the wrong type is an error rather than a silent null.
fn split_nulls<T>(
    column: &Column,
    target: CanonicalType,
    mut extract: impl FnMut(&Value) -> Option<T>,
) -> Result<(Vec<T>, Vec<i16>)> {
    let mut present = Vec::with_capacity(column.values.len());
    let mut def_levels = Vec::with_capacity(column.values.len());
    for (row, value) in column.values.iter().enumerate() {
        if value.is_null() {
            def_levels.push(0);
            continue;
        }
        let v = extract(value).ok_or_else(|| {
            EtlError::Schema(format!(
                "column '{}' holds {:?} at row {}, expected {}",
                column.name, value, row, target
            ))
        })?;
        present.push(v);
        def_levels.push(1);
    }
    Ok((present, def_levels))
}

/// Write a cast batch as a single-row-group parquet file.
pub fn write_batch_parquet(batch: &RecordBatch, schema: &Schema, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let parquet_schema = build_schema(schema)?;
    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build(),
    );
    let file = File::create(path)?;
    let mut writer = SerializedFileWriter::new(file, parquet_schema, props)?;

    let mut row_group = writer.next_row_group()?;
    let mut specs = schema.columns().iter();
    while let Some(mut col_writer) = row_group.next_column()? {
        let spec = specs
            .next()
            .ok_or_else(|| EtlError::Schema("parquet schema has extra columns".to_string()))?;
        let column = batch.column(&spec.name).ok_or_else(|| {
            EtlError::Schema(format!("column '{}' is missing from the batch", spec.name))
        })?;

        match spec.canonical_type {
            CanonicalType::Integer => {
                let (vals, defs) = split_nulls(column, spec.canonical_type, |v| match v {
                    Value::Integer(i) => Some(*i),
                    _ => None,
                })?;
                col_writer.typed::<Int64Type>().write_batch(&vals, Some(&defs[..]), None)?;
            }
            CanonicalType::Timestamp => {
                let (vals, defs) = split_nulls(column, spec.canonical_type, |v| match v {
                    Value::Timestamp(ts) => Some(ts.and_utc().timestamp_micros()),
                    _ => None,
                })?;
                col_writer.typed::<Int64Type>().write_batch(&vals, Some(&defs[..]), None)?;
            }
            CanonicalType::Float => {
                let (vals, defs) = split_nulls(column, spec.canonical_type, |v| match v {
                    Value::Float(f) => Some(*f),
                    _ => None,
                })?;
                col_writer.typed::<DoubleType>().write_batch(&vals, Some(&defs[..]), None)?;
            }
            CanonicalType::Boolean => {
                let (vals, defs) = split_nulls(column, spec.canonical_type, |v| match v {
                    Value::Boolean(b) => Some(*b),
                    _ => None,
                })?;
                col_writer.typed::<BoolType>().write_batch(&vals, Some(&defs[..]), None)?;
            }
            CanonicalType::Text | CanonicalType::Category => {
                let (vals, defs) = split_nulls(column, spec.canonical_type, |v| match v {
                    Value::Text(s) | Value::Category(s) => Some(ByteArray::from(s.as_str())),
                    _ => None,
                })?;
                col_writer.typed::<ByteArrayType>().write_batch(&vals, Some(&defs[..]), None)?;
            }
        }
        col_writer.close()?;
    }
    row_group.close()?;
    writer.close()?;

    info!("Processed dataset saved to: {}", path.display());
    Ok(())
}

fn field_to_value(field: &Field, target: CanonicalType, column: &str) -> Result<Value> {
    let value = match (field, target) {
        (Field::Null, _) => Value::Null,
        (Field::Long(v), CanonicalType::Integer) => Value::Integer(*v),
        (Field::Double(v), CanonicalType::Float) => Value::Float(*v),
        (Field::Bool(v), CanonicalType::Boolean) => Value::Boolean(*v),
        (Field::Str(s), CanonicalType::Text) => Value::Text(s.clone()),
        (Field::Str(s), CanonicalType::Category) => Value::Category(s.clone()),
        (Field::TimestampMicros(us), CanonicalType::Timestamp)
        | (Field::Long(us), CanonicalType::Timestamp) => {
            let ts = DateTime::from_timestamp_micros(*us).ok_or_else(|| {
                EtlError::Schema(format!("timestamp {} out of range in '{}'", us, column))
            })?;
            Value::Timestamp(ts.naive_utc())
        }
        (other, _) => {
            return Err(EtlError::Schema(format!(
                "column '{}' holds {:?}, expected {}",
                column, other, target
            )))
        }
    };
    Ok(value)
}

/// Read a stage file back into a typed batch laid out per `schema`.
pub fn read_batch_parquet(path: &Path, schema: &Schema) -> Result<RecordBatch> {
    let reader = SerializedFileReader::new(File::open(path)?)?;

    let file_columns: Vec<String> = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let expected: Vec<&str> = schema.names().collect();
    if file_columns != expected {
        return Err(EtlError::Schema(format!(
            "stage file columns {:?} do not match schema {:?}",
            file_columns, expected
        )));
    }

    let mut columns: Vec<Column> = schema
        .columns()
        .iter()
        .map(|spec| Column::new(spec.name.clone(), Vec::new()))
        .collect();

    for row in reader.get_row_iter(None)? {
        let row = row?;
        for ((_, field), (column, spec)) in row
            .get_column_iter()
            .zip(columns.iter_mut().zip(schema.columns()))
        {
            column
                .values
                .push(field_to_value(field, spec.canonical_type, &spec.name)?);
        }
    }

    let batch = RecordBatch::new(columns)?;
    info!(
        "Loaded stage file {}: {} rows, {} columns",
        path.display(),
        batch.num_rows(),
        batch.num_columns()
    );
    Ok(batch)
}
