//! Prometheus exporter installation.
//!
//! The recorder is process-wide, so installation happens at most once;
//! later calls are ignored.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics_exporter_prometheus::PrometheusBuilder;
use snafu::ResultExt;
use tracing::{debug, info};

use crate::error::{AddressParseSnafu, MetricsError, PrometheusInitSnafu};

/// Histogram buckets for duration metrics (in seconds).
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Start a Prometheus HTTP listener on `address`.
///
/// Must be called from within a tokio runtime.
pub fn init(address: &str) -> Result<(), MetricsError> {
    let addr: SocketAddr = address.parse().context(AddressParseSnafu)?;

    if let Some(existing) = INSTALLED.get() {
        debug!(%existing, "Metrics exporter already installed");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?
        .install()
        .context(PrometheusInitSnafu)?;

    let _ = INSTALLED.set(addr);
    info!(%addr, "Metrics exporter started");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_address() {
        let err = init("not an address").unwrap_err();
        assert!(matches!(err, MetricsError::AddressParse { .. }));
    }
}
