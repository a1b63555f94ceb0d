//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the service gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Run mode. `debug` raises log verbosity.
    pub mode: RunMode,

    /// Listener configuration (bind address, connection limits, peeking).
    pub listener: ListenerConfig,

    /// In-process gateway forwarding.
    pub gateway: GatewayRouteConfig,

    /// Readiness endpoint.
    pub health: HealthConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Remote log shipping.
    pub log_shipping: LogShippingConfig,
}

/// Process run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Debug,
    #[default]
    Release,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Debug => "debug",
            RunMode::Release => "release",
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// How long a new connection may take to send enough bytes to be classified.
    pub peek_timeout_ms: u64,

    /// Upper bound on bytes buffered while classifying a connection.
    pub peek_buffer_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            peek_timeout_ms: 3_000,
            peek_buffer_bytes: 1_024,
        }
    }
}

impl ListenerConfig {
    pub fn peek_timeout(&self) -> Duration {
        Duration::from_millis(self.peek_timeout_ms)
    }
}

/// In-process forwarding of prefixed requests to the gateway router.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayRouteConfig {
    /// Reserved path prefix, stripped before dispatch.
    pub prefix: String,
}

impl Default for GatewayRouteConfig {
    fn default() -> Self {
        Self {
            prefix: "/grpc".to_string(),
        }
    }
}

impl GatewayRouteConfig {
    /// Prefix without a trailing slash ("/grpc/" and "/grpc" are equivalent).
    pub fn normalized_prefix(&self) -> &str {
        let trimmed = self.prefix.trim_end_matches('/');
        if trimmed.is_empty() {
            "/"
        } else {
            trimmed
        }
    }
}

/// Readiness endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Route serving the readiness flag.
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: "/healthz".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Budget for draining the HTTP server on shutdown, in milliseconds.
    pub shutdown_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_millis(self.shutdown_ms)
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Remote log shipping configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogShippingConfig {
    /// Enable shipping of JSON log lines.
    pub enabled: bool,

    /// Collector URL receiving NDJSON batches.
    pub endpoint: String,

    /// Lines per request.
    pub batch_size: usize,

    /// Maximum time a line waits before being sent.
    pub flush_interval_ms: u64,

    /// Lines buffered in memory before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for LogShippingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            batch_size: 100,
            flush_interval_ms: 1_000,
            queue_capacity: 4_096,
        }
    }
}

impl GatewayConfig {
    /// Effective log filter directive: debug mode wins over the configured level.
    pub fn log_directive(&self) -> &str {
        match self.mode {
            RunMode::Debug => "debug",
            RunMode::Release => &self.observability.log_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.mode, RunMode::Release);
        assert_eq!(config.gateway.prefix, "/grpc");
        assert_eq!(config.timeouts.shutdown(), Duration::from_secs(5));
        assert!(!config.log_shipping.enabled);
    }

    #[test]
    fn debug_mode_overrides_log_level() {
        let config: GatewayConfig = toml::from_str(
            r#"
            mode = "debug"
            [observability]
            log_level = "warn"
            "#,
        )
        .unwrap();
        assert_eq!(config.log_directive(), "debug");
    }

    #[test]
    fn prefix_is_normalized() {
        let gateway = GatewayRouteConfig {
            prefix: "/grpc/".into(),
        };
        assert_eq!(gateway.normalized_prefix(), "/grpc");
    }
}
