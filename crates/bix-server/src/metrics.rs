//! Prometheus metrics exposition
//!
//! Installs the global `metrics` recorder and hands back the render handle
//! served at `/metrics`. Pipeline counters are registered up front so they
//! show up with zero values before the first job runs.

use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        "bix_import_records_processed_total",
        Unit::Count,
        "Records decoded across all import jobs"
    );
    describe_counter!(
        "bix_import_records_valid_total",
        Unit::Count,
        "Records validated and persisted across all import jobs"
    );
    describe_counter!(
        "bix_export_rows_total",
        Unit::Count,
        "Rows written by asynchronous export jobs"
    );

    // Touch the counters so the exposition is never empty.
    metrics::counter!("bix_import_records_processed_total").absolute(0);
    metrics::counter!("bix_import_records_valid_total").absolute(0);
    metrics::counter!("bix_export_rows_total").absolute(0);

    Ok(handle)
}
