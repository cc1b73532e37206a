// src/observability/mod.rs
//! Logging and metrics setup
//!
//! Tracing goes through `tracing-subscriber` with an `EnvFilter` (`RUST_LOG`
//! wins over the configured level). Metrics are exported in Prometheus
//! format when enabled; without an installed recorder the `metrics` macros
//! are no-ops, which is what library users and tests get.

use crate::utils::config::{LoggingConfig, MetricsConfig};
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Metric names used across the engine
pub mod metric_names {
    pub const REQUESTS_OBSERVED: &str = "netpanel_requests_observed_total";
    pub const HELD_DECISIONS: &str = "netpanel_held_decisions_total";
    pub const HELD_ACTIVE: &str = "netpanel_held_active";
    pub const REQUESTS_FINISHED: &str = "netpanel_requests_finished_total";
    pub const IN_FLIGHT: &str = "netpanel_in_flight";
    pub const REQUEST_DURATION_MS: &str = "netpanel_request_duration_ms";
    pub const REPLAYS: &str = "netpanel_replays_total";
    pub const STORE_RECORDS: &str = "netpanel_store_records";
    pub const STORE_EVICTIONS: &str = "netpanel_store_evictions_total";
    pub const BUS_EVENTS_MISSED: &str = "netpanel_bus_events_missed_total";
    pub const ARCHIVED_RECORDS: &str = "netpanel_archived_records_total";
}

/// Install the global tracing subscriber
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| {
            EngineError::ConfigError(format!("invalid log level {:?}: {}", config.level, e))
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| EngineError::ConfigError(format!("initialize tracing: {}", e)))
}

/// Install the Prometheus exporter when metrics are enabled
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config.listen.parse().map_err(|e| {
        EngineError::ConfigError(format!("invalid metrics address {:?}: {}", config.listen, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::ConfigError(format!("install metrics exporter: {}", e)))?;

    info!("Prometheus metrics listening on {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_is_noop() {
        assert!(init_metrics(&MetricsConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_metrics_address() {
        let config = MetricsConfig {
            enabled: true,
            listen: "not-an-address".to_string(),
        };
        assert!(init_metrics(&config).is_err());
    }
}
