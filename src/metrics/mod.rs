//! Stage metrics for the ETL pipeline.
//!
//! Each stage owns a small struct of recording helpers. Names follow
//! `etl_{stage}_{metric}` so dashboards can group by stage.

use std::sync::Once;

use tracing::{info, warn};

use crate::pipeline::processing::quality_gate::ValidationCheck;
use crate::types::CanonicalType;

static INIT: Once = Once::new();

/// Install a Prometheus recorder if `ETL_METRICS_ADDR` is set. Idempotent.
///
/// Without a recorder the `metrics` macros are no-ops, which is what tests want.
pub fn init_metrics() {
    INIT.call_once(|| {
        let Ok(addr_str) = std::env::var("ETL_METRICS_ADDR") else {
            return;
        };
        let addr = match addr_str.parse::<std::net::SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Invalid ETL_METRICS_ADDR '{}': {}", addr_str, e);
                return;
            }
        };
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
            Err(e) => warn!("Failed to install Prometheus exporter: {}", e),
        }
    });
}

/// Build a metric name with the stage prefix.
macro_rules! stage_metric {
    (counter, $stage:literal, $name:literal) => {
        concat!("etl_", $stage, "_", $name, "_total")
    };
    (histogram, $stage:literal, $name:literal) => {
        concat!("etl_", $stage, "_", $name)
    };
}

pub struct ExtractMetrics;

impl ExtractMetrics {
    pub fn record_rows(rows: usize) {
        ::metrics::counter!(stage_metric!(counter, "extract", "rows")).increment(rows as u64);
    }
}

pub struct CastMetrics;

impl CastMetrics {
    pub fn record_batch(rows: usize, duration_secs: f64) {
        ::metrics::counter!(stage_metric!(counter, "cast", "rows")).increment(rows as u64);
        ::metrics::histogram!(stage_metric!(histogram, "cast", "duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_coerced_nulls(count: usize) {
        ::metrics::counter!(stage_metric!(counter, "cast", "coerced_nulls"))
            .increment(count as u64);
    }

    pub fn record_failure(target: CanonicalType) {
        ::metrics::counter!(
            stage_metric!(counter, "cast", "failures"),
            "type" => target.to_string()
        )
        .increment(1);
    }
}

pub struct ValidationMetrics;

impl ValidationMetrics {
    pub fn record_pass() {
        ::metrics::counter!(stage_metric!(counter, "validate", "passed")).increment(1);
    }

    pub fn record_failure(check: ValidationCheck) {
        ::metrics::counter!(
            stage_metric!(counter, "validate", "failed"),
            "check" => check.as_str()
        )
        .increment(1);
    }
}

pub struct LoadMetrics;

impl LoadMetrics {
    pub fn record_success(rows: usize, duration_secs: f64) {
        ::metrics::counter!(stage_metric!(counter, "load", "runs")).increment(1);
        ::metrics::counter!(stage_metric!(counter, "load", "rows")).increment(rows as u64);
        ::metrics::histogram!(stage_metric!(histogram, "load", "duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_failure() {
        ::metrics::counter!(stage_metric!(counter, "load", "failures")).increment(1);
    }
}
