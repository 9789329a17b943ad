/// Literal cell values that mean "no data", whatever the declared column type.
pub const NULL_SENTINELS: [&str; 4] = ["", "NA", "NaN", "None"];

/// Boolean tokens accepted by the caster. Matching is case-sensitive.
pub const TRUE_TOKENS: [&str; 2] = ["Y", "True"];
pub const FALSE_TOKENS: [&str; 2] = ["N", "False"];

/// Default format for parsing timestamp cells.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format used when a timestamp is rendered as text (warehouse TEXT columns, logs).
pub const TIMESTAMP_TEXT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

// Default locations used when the config file does not say otherwise
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_RAW_PATH: &str = "data/raw/gdsc_raw.csv";
pub const DEFAULT_PROCESSED_PATH: &str = "data/processed/gdsc_clean.parquet";
pub const DEFAULT_WAREHOUSE_PATH: &str = "data/warehouse.db";
pub const DEFAULT_TABLE_NAME: &str = "gdsc";

/// Export URL for a Google Sheets document rendered as CSV.
pub fn sheet_export_url(file_id: &str) -> String {
    format!(
        "https://docs.google.com/spreadsheets/d/{}/export?format=csv",
        file_id
    )
}
