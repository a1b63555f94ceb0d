//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global subscriber: human output on stdout, optional
//!   JSON output to the log shipper
//! - Re-apply the log level when the configuration changes
//! - Flush and stop logging outputs during shutdown
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configuration file and disables reloading
//! - Debug mode forces `debug` regardless of the configured level

use std::io::Write;

use thiserror::Error;
use tracing_subscriber::{
    filter::{filter_fn, ParseError},
    fmt,
    layer::SubscriberExt,
    reload,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer, Registry,
};

use crate::config::GatewayConfig;
use crate::kernel::{HookError, LogSink};
use crate::observability::shipping::{ShippingWriter, SHIPPING_TARGET};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("failed to install subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Filter directive for a level, applied to this crate and the HTTP middleware.
pub fn directive(level: &str) -> String {
    format!("service_gateway={level},tower_http={level}")
}

/// Controls the installed subscriber after initialization.
#[derive(Clone)]
pub struct LoggingHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    env_override: bool,
    shipping: Option<ShippingWriter>,
}

/// Install the global subscriber.
pub fn init(
    config: &GatewayConfig,
    shipping: Option<ShippingWriter>,
) -> Result<LoggingHandle, LoggingError> {
    let (env_filter, env_override) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::try_new(directive(config.log_directive()))?, false),
    };
    let (filter, handle) = reload::Layer::new(env_filter);

    let shipping_layer = shipping.clone().map(|writer| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .with_filter(filter_fn(|meta| !meta.target().starts_with(SHIPPING_TARGET)))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(shipping_layer)
        .try_init()?;

    Ok(LoggingHandle {
        filter: handle,
        env_override,
        shipping,
    })
}

impl LoggingHandle {
    /// Re-apply the level from a new configuration.
    pub fn apply(&self, config: &GatewayConfig) {
        if self.env_override {
            tracing::debug!("RUST_LOG set, ignoring configured log level");
            return;
        }

        let level = config.log_directive();
        let filter = match EnvFilter::try_new(directive(level)) {
            Ok(filter) => filter,
            Err(e) => {
                tracing::warn!(level, error = %e, "Invalid log level, keeping current filter");
                return;
            }
        };

        match self.filter.reload(filter) {
            Ok(()) => tracing::info!(level, "Log level updated"),
            Err(e) => tracing::warn!(error = %e, "Failed to update log level"),
        }
    }
}

impl LogSink for LoggingHandle {
    fn name(&self) -> &str {
        "subscriber"
    }

    /// Stop shipping lines and flush stdout. Stdout logging keeps working.
    fn stop(&self) -> Result<(), HookError> {
        if let Some(shipping) = &self.shipping {
            shipping.close();
        }
        std::io::stdout().flush()?;
        Ok(())
    }
}
