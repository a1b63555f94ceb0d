//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check the reserved gateway prefix cannot shadow the whole route table
//! - Check the health route collides with neither built-in routes nor the prefix
//! - Check the log level parses as a filter directive
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::GatewayConfig;
use crate::modules::system::INFO_PATH;
use crate::observability::logging::directive;

/// A single semantic problem in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }
    if config.listener.peek_timeout_ms == 0 {
        errors.push(ValidationError::new("listener.peek_timeout_ms", "must be > 0"));
    }
    if config.listener.peek_buffer_bytes < 24 {
        // The HTTP/2 connection preface is 24 bytes.
        errors.push(ValidationError::new("listener.peek_buffer_bytes", "must be >= 24"));
    }

    let prefix = &config.gateway.prefix;
    if !prefix.starts_with('/') {
        errors.push(ValidationError::new("gateway.prefix", "must start with '/'"));
    } else if config.gateway.normalized_prefix() == "/" {
        errors.push(ValidationError::new("gateway.prefix", "must not be the root path"));
    }

    let health = config.health.path.trim_end_matches('/');
    if !config.health.path.starts_with('/') {
        errors.push(ValidationError::new("health.path", "must start with '/'"));
    } else if health == INFO_PATH {
        errors.push(ValidationError::new(
            "health.path",
            format!("'{INFO_PATH}' is already served by the system module"),
        ));
    } else if prefix.starts_with('/') && under_prefix(health, config.gateway.normalized_prefix()) {
        errors.push(ValidationError::new(
            "health.path",
            format!("must not be under gateway prefix '{}'", config.gateway.normalized_prefix()),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.timeouts.shutdown_ms == 0 {
        errors.push(ValidationError::new("timeouts.shutdown_ms", "must be > 0"));
    }

    if let Err(e) = EnvFilter::try_new(directive(&config.observability.log_level)) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("'{}' is not a log level: {e}", config.observability.log_level),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    let shipping = &config.log_shipping;
    if shipping.enabled {
        match url::Url::parse(&shipping.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError::new(
                "log_shipping.endpoint",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new("log_shipping.endpoint", e.to_string())),
        }
        if shipping.batch_size == 0 {
            errors.push(ValidationError::new("log_shipping.batch_size", "must be > 0"));
        }
        if shipping.queue_capacity == 0 {
            errors.push(ValidationError::new("log_shipping.queue_capacity", "must be > 0"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Whether `path` is forwarded by the gateway for `prefix`.
fn under_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
