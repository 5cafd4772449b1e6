//! Prometheus metrics for quota enforcement.
//!
//! Recording functions are always callable; without the `prometheus` feature
//! they compile to nothing.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for rendering.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// With `listen_addr` set the exporter also serves `/metrics` on that address,
/// which requires a running tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let mut builder = PrometheusBuilder::new();
    if let Some(addr) = &config.listen_addr {
        let addr: std::net::SocketAddr = addr
            .parse()
            .map_err(|e| MetricsError::Setup(format!("invalid listen_addr '{}': {}", addr, e)))?;
        builder = builder.with_http_listener(addr);
        builder.install()?;
        tracing::info!(%addr, "Prometheus exporter listening");
        return Ok(());
    }

    let handle = builder.install_recorder()?;
    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Install the Prometheus recorder (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Render the current metrics in Prometheus text format, if a local recorder
/// was installed (metrics enabled without `listen_addr`). Hosts embedding the
/// crate serve this from their own `/metrics` route; the CLI prints it with
/// `--print-metrics`.
pub fn render_metrics() -> Option<String> {
    #[cfg(feature = "prometheus")]
    {
        PROMETHEUS_HANDLE.get().map(|handle| handle.render())
    }
    #[cfg(not(feature = "prometheus"))]
    {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a quota decision by outcome
/// (`allowed`, `denied`, `unknown_action`, `degraded`).
pub fn record_quota_decision(outcome: &str, action: &str, tier: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "tiergate_decisions_total",
            "outcome" => outcome.to_string(),
            "action" => action.to_string(),
            "tier" => tier.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, action, tier);
    }
}

/// Record a counter store failure.
pub fn record_store_failure(backend: &str, operation: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "tiergate_store_failures_total",
            "backend" => backend.to_string(),
            "operation" => operation.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (backend, operation);
    }
}

/// Record a window that was found with more than one physical record.
pub fn record_counter_duplicates(backend: &str, period_kind: &str, records: usize) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "tiergate_counter_duplicates_total",
            "backend" => backend.to_string(),
            "period" => period_kind.to_string()
        )
        .increment(records.saturating_sub(1) as u64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (backend, period_kind, records);
    }
}

/// Record a usage warning when an action crosses the warning threshold.
pub fn record_usage_warning(action: &str, tier: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "tiergate_usage_warnings_total",
            "action" => action.to_string(),
            "tier" => tier.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (action, tier);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
