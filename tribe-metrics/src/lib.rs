//! OpenTelemetry metrics for the Tribe mail service
//!
//! Metrics are pushed over OTLP/HTTP to an OpenTelemetry Collector.
//!
//! ```text
//! tribe → OTLP/HTTP → OpenTelemetry Collector → Prometheus (scrape) → Grafana
//! ```
//!
//! Recording sites call [`metrics()`] and skip recording when it returns
//! `None`, so a disabled configuration costs a single atomic load.
//!
//! ```rust,no_run
//! use tribe_metrics::{MetricsConfig, init_metrics};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! init_metrics(&MetricsConfig::default())?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod exporter;
mod queue;

pub use config::MetricsConfig;
pub use error::MetricsError;
use once_cell::sync::OnceCell;
pub use queue::{CircuitGauge, QueueMetrics};

static METRICS_INSTANCE: OnceCell<Metrics> = OnceCell::new();

/// Root metrics container
#[derive(Debug)]
pub struct Metrics {
    pub queue: QueueMetrics,
}

/// Initialize the metrics system
///
/// A no-op when metrics are disabled in the config.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or if called twice.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        tracing::info!("Metrics collection is disabled");
        return Ok(());
    }

    tracing::info!(
        endpoint = %config.endpoint,
        "Initializing OpenTelemetry metrics with OTLP exporter"
    );

    let provider = exporter::init_otlp_exporter(&config.endpoint)?;
    opentelemetry::global::set_meter_provider(provider);

    let metrics = Metrics {
        queue: QueueMetrics::new(),
    };

    METRICS_INSTANCE
        .set(metrics)
        .map_err(|_| MetricsError::AlreadyInitialized)?;

    tracing::info!("Metrics collection initialized successfully");

    Ok(())
}

/// The global metrics instance, if [`init_metrics`] enabled one
#[must_use]
pub fn metrics() -> Option<&'static Metrics> {
    METRICS_INSTANCE.get()
}

/// Check if metrics are enabled
#[must_use]
pub fn is_enabled() -> bool {
    METRICS_INSTANCE.get().is_some()
}
