// Pipeline ingestion: turning an external source into a raw record batch

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::constants::sheet_export_url;
use crate::error::Result;
use crate::metrics::ExtractMetrics;
use crate::types::{RecordBatch, Value};

/// Anything that can produce an untyped batch of text cells.
pub trait RecordSource {
    fn fetch(&self) -> Result<RecordBatch>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// A Google Sheets document downloaded through its CSV export endpoint.
pub struct SheetExportSource {
    file_id: String,
    client: reqwest::blocking::Client,
}

impl SheetExportSource {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            client: reqwest::blocking::Client::new(),
        }
    }

    pub fn url(&self) -> String {
        sheet_export_url(&self.file_id)
    }
}

impl RecordSource for SheetExportSource {
    #[instrument(skip(self), fields(file_id = %self.file_id))]
    fn fetch(&self) -> Result<RecordBatch> {
        let body = self.client.get(self.url()).send()?.error_for_status()?.bytes()?;
        info!("Downloaded {} bytes from sheet export", body.len());
        read_csv(body.as_ref())
    }

    fn describe(&self) -> String {
        format!("sheet export {}", self.file_id)
    }
}

/// A CSV file on local disk.
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordSource for CsvFileSource {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn fetch(&self) -> Result<RecordBatch> {
        read_csv(File::open(&self.path)?)
    }

    fn describe(&self) -> String {
        format!("csv file {}", self.path.display())
    }
}

/// Parse CSV with a header row into a batch of `Text` cells.
///
/// Empty fields stay as empty text; the caster decides they are null.
pub fn read_csv<R: Read>(reader: R) -> Result<RecordBatch> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(reader);

    let names: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        rows.push(record.iter().map(Value::text).collect());
    }

    let batch = RecordBatch::from_rows(names, rows)?;
    info!(
        "Dataset loaded: {} rows, {} columns",
        batch.num_rows(),
        batch.num_columns()
    );
    ExtractMetrics::record_rows(batch.num_rows());
    Ok(batch)
}

/// Persist a raw batch as CSV, creating parent directories.
pub fn write_raw_csv(batch: &RecordBatch, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(batch.column_names())?;
    for row in 0..batch.num_rows() {
        let cells = batch.columns().iter().map(|c| match &c.values[row] {
            Value::Null => String::new(),
            other => other.to_string(),
        });
        writer.write_record(cells)?;
    }
    writer.flush()?;
    info!("Raw data saved to: {}", path.display());
    Ok(())
}
