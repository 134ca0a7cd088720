// packages/engine/src/observability/mod.rs
//! Tracing and metrics setup
//!
//! The engine only emits through the `tracing` and `metrics` facades. Hosts
//! that already install a subscriber or recorder can skip these helpers.
//!
//! Metrics published by the runtime:
//!
//! - `agent_engine_executions_total{outcome}` (counter)
//! - `agent_engine_execution_duration_ms` (histogram)
//! - `agent_engine_queue_wait_ms` (histogram)
//! - `agent_engine_active_engines` (gauge)

use crate::utils::config::ObservabilityConfig;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| EngineError::Observability(format!("invalid log filter: {}", e)))?;

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .try_init()
    };

    installed.map_err(|e| EngineError::Observability(format!("tracing already initialized: {}", e)))
}

/// Install the Prometheus recorder once and return its render handle.
/// Later calls return the same handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PROMETHEUS
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| EngineError::Observability(format!("failed to install metrics recorder: {}", e)))
        })
        .cloned()
}
