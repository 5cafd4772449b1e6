//! Structured logging and quota metrics.
//!
//! - `init_tracing` sets up the `tracing` subscriber (binary only)
//! - `metrics` holds the Prometheus recorder and the quota recording functions

pub mod metrics;
#[cfg(feature = "cli")]
mod tracing_init;

pub use metrics::{init_metrics, render_metrics};
#[cfg(feature = "cli")]
pub use tracing_init::*;

#[cfg(test)]
mod tests {
    use crate::config::MetricsConfig;

    #[test]
    fn test_metrics_entry_points_are_reexported() {
        super::init_metrics(&MetricsConfig::default()).unwrap();
        let render: fn() -> Option<String> = super::render_metrics;
        let _ = render;
    }
}
