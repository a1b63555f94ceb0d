//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated)
//!     → ArcSwap<GatewayConfig> held by the kernel context
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap + registered config listeners notified
//! ```
//!
//! # Design Decisions
//! - The socket, gateway prefix and matcher set are fixed at startup;
//!   reloads only reach config listeners (e.g. log level)
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    GatewayConfig, GatewayRouteConfig, HealthConfig, LimitsConfig, ListenerConfig,
    LogShippingConfig, ObservabilityConfig, RunMode, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::{ConfigUpdates, ConfigWatcher};
