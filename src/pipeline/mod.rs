// Data processing pipeline: ingestion, processing, stage files and storage

pub mod ingestion;
pub mod parquet_out;
pub mod processing;
pub mod storage;

use std::time::Instant;

use serde::Serialize;
use tracing::{info, info_span, instrument, warn};
use uuid::Uuid;

use crate::config::PipelinePlan;
use crate::error::Result;
use crate::metrics::CastMetrics;
use crate::types::RecordBatch;
use processing::{normalize_column_names, TypeCaster, ValidationReport, Validator};
use storage::{LoadSummary, Warehouse, WarehouseLoader};

/// Result of a complete pipeline run
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub table: String,
    pub rows_extracted: usize,
    pub rows_transformed: usize,
    pub rows_loaded: u64,
    pub ddl: String,
    pub duration_ms: u128,
}

/// Transform → validate → load over one in-memory batch.
pub struct Pipeline {
    plan: PipelinePlan,
}

impl Pipeline {
    pub fn new(plan: PipelinePlan) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    pub fn loader(&self) -> WarehouseLoader {
        WarehouseLoader::new(self.plan.warehouse.clone())
    }

    /// Truncate to the row limit, canonicalize headers and cast to the schema.
    ///
    /// Header collisions are detected here, before any cell is cast.
    #[instrument(skip_all, fields(rows = raw.num_rows()))]
    pub fn transform(&self, mut raw: RecordBatch) -> Result<RecordBatch> {
        let started = Instant::now();

        if let Some(limit) = self.plan.row_limit {
            if raw.num_rows() > limit {
                info!("Keeping the first {} of {} rows", limit, raw.num_rows());
                raw.truncate(limit);
            }
        }

        let names = normalize_column_names(&raw.column_names())?;
        raw.rename_columns(names)?;

        let caster = TypeCaster::new(self.plan.cast_mode, self.plan.timestamp_format.clone());
        let batch = caster.cast(&raw, &self.plan.schema)?;

        CastMetrics::record_batch(batch.num_rows(), started.elapsed().as_secs_f64());
        info!(
            "Transformed {} rows into {} typed columns",
            batch.num_rows(),
            batch.num_columns()
        );
        Ok(batch)
    }

    pub fn validate(&self, batch: &RecordBatch) -> ValidationReport {
        Validator::new().validate(
            batch,
            &self.plan.schema,
            &self.plan.key_spec,
            &self.plan.critical_columns,
        )
    }

    /// Gate the batch, then replace the warehouse table with it.
    pub fn load(&self, warehouse: &mut dyn Warehouse, batch: &RecordBatch) -> Result<LoadSummary> {
        self.validate(batch).into_result()?;
        self.loader()
            .load(warehouse, batch, &self.plan.schema, &self.plan.key_spec)
    }

    /// Same as [`Pipeline::load`], against the warehouse named in the plan.
    pub fn load_into_configured(&self, batch: &RecordBatch) -> Result<LoadSummary> {
        self.validate(batch).into_result()?;
        self.loader()
            .load_into_configured(batch, &self.plan.schema, &self.plan.key_spec)
    }

    /// Run every stage over `raw`. The first failure stops the run.
    pub fn run(&self, raw: RecordBatch, warehouse: &mut dyn Warehouse) -> Result<PipelineResult> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline_run", run_id = %run_id, table = %self.plan.warehouse.table_name);
        let _enter = span.enter();

        let started = Instant::now();
        let rows_extracted = raw.num_rows();
        info!("Starting pipeline with {} raw rows", rows_extracted);

        let batch = self.transform(raw)?;
        let summary = match self.load(warehouse, &batch) {
            Ok(summary) => summary,
            Err(e) => {
                warn!(kind = e.kind(), "Pipeline halted: {}", e);
                return Err(e);
            }
        };

        let result = PipelineResult {
            run_id,
            table: summary.table,
            rows_extracted,
            rows_transformed: batch.num_rows(),
            rows_loaded: summary.rows_loaded,
            ddl: summary.ddl,
            duration_ms: started.elapsed().as_millis(),
        };
        info!(rows_loaded = result.rows_loaded, "Pipeline finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::EtlError;
    use crate::pipeline::processing::ValidationCheck;
    use crate::pipeline::storage::{InMemoryWarehouse, WarehouseError};
    use crate::types::Value;

    const CONFIG: &str = r#"
        [pipeline]
        table_name = "scores"
        key_columns = ["id"]
        critical_columns = ["id"]

        [[pipeline.schema]]
        name = "id"
        type = "text"
        nullable = false

        [[pipeline.schema]]
        name = "active"
        type = "boolean"

        [[pipeline.schema]]
        name = "score"
        type = "float"
    "#;

    fn pipeline() -> Pipeline {
        let config = Config::from_toml(CONFIG).unwrap();
        Pipeline::new(PipelinePlan::from_config(&config).unwrap())
    }

    fn raw(rows: &[[&str; 3]]) -> RecordBatch {
        RecordBatch::from_rows(
            vec!["ID".to_string(), "Active".to_string(), " Score ".to_string()],
            rows.iter()
                .map(|r| r.iter().map(|c| Value::text(*c)).collect())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_single_row_flows_into_warehouse() {
        let mut warehouse = InMemoryWarehouse::new();
        let result = pipeline()
            .run(raw(&[["7", "Y", "3.5"]]), &mut warehouse)
            .unwrap();

        assert_eq!(result.rows_extracted, 1);
        assert_eq!(result.rows_loaded, 1);
        assert_eq!(
            result.ddl,
            "CREATE TABLE \"scores\" (\"id\" TEXT NOT NULL, \"active\" BOOLEAN, \
             \"score\" DOUBLE PRECISION, PRIMARY KEY (\"id\"))"
        );
        assert!(Uuid::parse_str(&result.run_id).is_ok());
        assert_eq!(warehouse.row_count("scores").unwrap(), 1);
    }

    #[test]
    fn test_transform_casts_and_normalizes() {
        let batch = pipeline().transform(raw(&[["7", "Y", "3.5"]])).unwrap();
        assert_eq!(batch.column_names(), vec!["id", "active", "score"]);
        assert_eq!(
            batch.row(0).unwrap(),
            vec![&Value::text("7"), &Value::Boolean(true), &Value::Float(3.5)]
        );
    }

    #[test]
    fn test_duplicate_key_never_reaches_warehouse() {
        let mut warehouse = InMemoryWarehouse::new();
        let err = pipeline()
            .run(raw(&[["7", "Y", "1.0"], ["7", "N", "2.0"]]), &mut warehouse)
            .unwrap_err();

        match err {
            EtlError::Validation(failure) => assert_eq!(failure.check, ValidationCheck::DuplicateKey),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(warehouse.statements().is_empty());
        assert!(matches!(warehouse.row_count("scores"), Err(WarehouseError::MissingTable(_))));
    }

    #[test]
    fn test_bad_numeric_halts_before_validation() {
        let mut warehouse = InMemoryWarehouse::new();
        let err = pipeline()
            .run(raw(&[["7", "Y", "abc"]]), &mut warehouse)
            .unwrap_err();

        assert!(matches!(err, EtlError::Cast { ref column, .. } if column == "score"));
        assert!(warehouse.statements().is_empty());
    }

    #[test]
    fn test_row_limit_applies_before_casting() {
        let config = Config::from_toml(&CONFIG.replace(
            "table_name = \"scores\"",
            "table_name = \"scores\"\nrow_limit = 1",
        ))
        .unwrap();
        let pipeline = Pipeline::new(PipelinePlan::from_config(&config).unwrap());

        // The second row would fail casting if it were kept
        let batch = pipeline
            .transform(raw(&[["1", "Y", "1.0"], ["2", "N", "abc"]]))
            .unwrap();
        assert_eq!(batch.num_rows(), 1);
    }

    #[test]
    fn test_unnamed_export_columns_are_dropped() {
        let raw = ingestion::read_csv("id,active,score,,\n7,Y,3.5,,x\n".as_bytes()).unwrap();
        let batch = pipeline().transform(raw).unwrap();

        assert_eq!(batch.column_names(), vec!["id", "active", "score"]);
        assert_eq!(batch.num_rows(), 1);
    }

    #[test]
    fn test_header_collision_is_schema_error() {
        let batch = RecordBatch::from_rows(
            vec!["id".to_string(), "ID ".to_string()],
            vec![vec![Value::text("1"), Value::text("2")]],
        )
        .unwrap();
        assert!(matches!(pipeline().transform(batch), Err(EtlError::Schema(_))));
    }
}
