use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::constants::{
    DEFAULT_PROCESSED_PATH, DEFAULT_RAW_PATH, DEFAULT_TABLE_NAME, DEFAULT_TIMESTAMP_FORMAT,
    DEFAULT_WAREHOUSE_PATH,
};
use crate::error::{EtlError, Result};
use crate::pipeline::processing::cast::CastMode;
use crate::pipeline::processing::normalize::{normalize_column_name, normalize_column_names};
use crate::types::{ColumnSpec, KeySpec, Schema};

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub warehouse: WarehouseSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Google Sheets document exported as CSV
    SheetExport { file_id: String },
    /// Local CSV file
    CsvFile { path: PathBuf },
    /// No extraction step configured; the raw path must already exist
    #[default]
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_raw_path")]
    pub raw: PathBuf,
    #[serde(default = "default_processed_path")]
    pub processed: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw: default_raw_path(),
            processed: default_processed_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default)]
    pub row_limit: Option<usize>,
    #[serde(default)]
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub critical_columns: Vec<String>,
    #[serde(default)]
    pub cast_mode: CastMode,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    pub schema: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseSection {
    #[serde(default = "default_warehouse_path")]
    pub path: PathBuf,
}

impl Default for WarehouseSection {
    fn default() -> Self {
        Self {
            path: default_warehouse_path(),
        }
    }
}

/// Everything the loader needs, constructed once and passed by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseConfig {
    pub path: PathBuf,
    pub table_name: String,
}

fn default_raw_path() -> PathBuf {
    PathBuf::from(DEFAULT_RAW_PATH)
}

fn default_processed_path() -> PathBuf {
    PathBuf::from(DEFAULT_PROCESSED_PATH)
}

fn default_warehouse_path() -> PathBuf {
    PathBuf::from(DEFAULT_WAREHOUSE_PATH)
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_timestamp_format() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply the overrides a deployment may set in its environment.
    ///
    /// Only the binary calls this, once, at startup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(file_id) = lookup("GDSC_FILE_ID") {
            self.source = SourceConfig::SheetExport { file_id };
        }
        if let Some(raw) = lookup("RAW_DATA_PATH") {
            self.paths.raw = PathBuf::from(raw);
        }
        if let Some(processed) = lookup("PROCESSED_DATA_PATH") {
            self.paths.processed = PathBuf::from(processed);
        }
        if let Some(table) = lookup("PG_TABLE_NAME") {
            self.pipeline.table_name = table;
        }
        if let Some(n) = lookup("N_ROWS") {
            let limit = n
                .trim()
                .parse::<usize>()
                .map_err(|e| EtlError::Config(format!("N_ROWS '{}' is not a count: {}", n, e)))?;
            self.pipeline.row_limit = Some(limit);
        }
        if let Some(keys) = lookup("KEY_COLS") {
            self.pipeline.key_columns = keys
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(path) = lookup("WAREHOUSE_PATH") {
            self.warehouse.path = PathBuf::from(path);
        }
        Ok(())
    }
}

/// Configuration resolved into canonical names, with the schema invariants checked.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub schema: Schema,
    pub key_spec: KeySpec,
    pub critical_columns: Vec<String>,
    pub row_limit: Option<usize>,
    pub cast_mode: CastMode,
    pub timestamp_format: String,
    pub warehouse: WarehouseConfig,
    pub paths: PathsConfig,
}

impl PipelinePlan {
    pub fn from_config(config: &Config) -> Result<Self> {
        let pipeline = &config.pipeline;
        if pipeline.schema.is_empty() {
            return Err(EtlError::Schema("schema declares no columns".to_string()));
        }
        if pipeline.table_name.trim().is_empty() {
            return Err(EtlError::Config("table_name must not be empty".to_string()));
        }

        let raw_names: Vec<&str> = pipeline.schema.iter().map(|c| c.name.as_str()).collect();
        let names = normalize_column_names(&raw_names)?;
        if let Some(pos) = names.iter().position(|n| n.is_empty()) {
            return Err(EtlError::Schema(format!(
                "schema column {} has a name that is empty after normalization",
                pos + 1
            )));
        }
        let schema = Schema::new(
            pipeline
                .schema
                .iter()
                .zip(names)
                .map(|(spec, name)| ColumnSpec::new(name, spec.canonical_type, spec.nullable))
                .collect(),
        );

        let key_columns = resolve_names(&schema, &pipeline.key_columns, "key")?;
        for key in &key_columns {
            if schema.get(key).map(|c| c.nullable).unwrap_or(true) {
                return Err(EtlError::Schema(format!(
                    "key column '{}' must be declared non-nullable",
                    key
                )));
            }
        }
        let critical_columns = resolve_names(&schema, &pipeline.critical_columns, "critical")?;

        Ok(Self {
            schema,
            key_spec: KeySpec::new(key_columns),
            critical_columns,
            row_limit: pipeline.row_limit,
            cast_mode: pipeline.cast_mode,
            timestamp_format: pipeline.timestamp_format.clone(),
            warehouse: WarehouseConfig {
                path: config.warehouse.path.clone(),
                table_name: pipeline.table_name.clone(),
            },
            paths: config.paths.clone(),
        })
    }
}

/// Normalize configured column references and check they exist in the schema.
fn resolve_names(schema: &Schema, names: &[String], role: &str) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(names.len());
    for raw in names {
        let name = normalize_column_name(raw);
        if schema.get(&name).is_none() {
            return Err(EtlError::Schema(format!(
                "{} column '{}' is not declared in the schema",
                role, raw
            )));
        }
        if seen.insert(name.clone()) {
            resolved.push(name);
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CanonicalType;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
        [source]
        kind = "csv_file"
        path = "input.csv"

        [pipeline]
        table_name = "razzouk"
        row_limit = 100
        key_columns = ["COSMIC_ID", "DRUG_ID"]
        critical_columns = ["COSMIC_ID", "DRUG_ID", "LN_IC50"]
        cast_mode = "strict"

        [[pipeline.schema]]
        name = "COSMIC_ID"
        type = "integer"
        nullable = false

        [[pipeline.schema]]
        name = "DRUG_ID"
        type = "Int64"
        nullable = false

        [[pipeline.schema]]
        name = "LN_IC50"
        type = "float64"

        [[pipeline.schema]]
        name = "Cancer Type (matching TCGA label)"
        type = "category"
    "#;

    #[test]
    fn test_plan_normalizes_every_reference() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let plan = PipelinePlan::from_config(&config).unwrap();

        assert_eq!(
            plan.schema.names().collect::<Vec<_>>(),
            vec!["cosmic_id", "drug_id", "ln_ic50", "cancer_type__matching_tcga_label_"]
        );
        assert_eq!(plan.key_spec.columns(), &["cosmic_id", "drug_id"]);
        assert_eq!(plan.critical_columns, vec!["cosmic_id", "drug_id", "ln_ic50"]);
        assert_eq!(plan.cast_mode, CastMode::Strict);
        assert_eq!(plan.row_limit, Some(100));
        assert_eq!(plan.warehouse.table_name, "razzouk");
        assert_eq!(plan.warehouse.path, PathBuf::from(DEFAULT_WAREHOUSE_PATH));
        assert_eq!(plan.schema.get("drug_id").unwrap().canonical_type, CanonicalType::Integer);
        assert!(matches!(config.source, SourceConfig::CsvFile { .. }));
    }

    #[test]
    fn test_nullable_key_is_rejected() {
        let config = Config::from_toml(&SAMPLE.replace(
            "key_columns = [\"COSMIC_ID\", \"DRUG_ID\"]",
            "key_columns = [\"LN_IC50\"]",
        ))
        .unwrap();
        assert!(matches!(PipelinePlan::from_config(&config), Err(EtlError::Schema(_))));
    }

    #[test]
    fn test_unknown_critical_column_is_rejected() {
        let config = Config::from_toml(&SAMPLE.replace("\"LN_IC50\"]", "\"AUC\"]")).unwrap();
        assert!(matches!(PipelinePlan::from_config(&config), Err(EtlError::Schema(_))));
    }

    #[test]
    fn test_colliding_schema_names_are_rejected() {
        let toml = r#"
            [pipeline]
            [[pipeline.schema]]
            name = "Drug Name"
            type = "text"
            [[pipeline.schema]]
            name = "drug_name"
            type = "text"
        "#;
        let config = Config::from_toml(toml).unwrap();
        assert!(matches!(PipelinePlan::from_config(&config), Err(EtlError::Schema(_))));
    }

    #[test]
    fn test_blank_schema_name_is_rejected() {
        let toml = r#"
            [pipeline]
            [[pipeline.schema]]
            name = "id"
            type = "text"
            [[pipeline.schema]]
            name = "  "
            type = "text"
        "#;
        let config = Config::from_toml(toml).unwrap();
        assert!(matches!(PipelinePlan::from_config(&config), Err(EtlError::Schema(_))));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("GDSC_FILE_ID", "abc123"),
            ("N_ROWS", "5"),
            ("KEY_COLS", "cosmic_id, drug_id"),
            ("PG_TABLE_NAME", "other"),
        ]);
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert!(matches!(config.source, SourceConfig::SheetExport { ref file_id } if file_id == "abc123"));
        assert_eq!(config.pipeline.row_limit, Some(5));
        assert_eq!(config.pipeline.key_columns, vec!["cosmic_id", "drug_id"]);
        assert_eq!(config.pipeline.table_name, "other");
    }

    #[test]
    fn test_bad_row_limit_override_is_config_error() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        let err = config
            .apply_overrides(|k| (k == "N_ROWS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }
}
