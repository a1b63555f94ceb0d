//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured events: stdout + optional JSON shipping)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout
//!     → shipping.rs (NDJSON batches to a collector)
//!     → Prometheus scrape endpoint (telemetry agent)
//! ```
//!
//! # Design Decisions
//! - Request ID and matched route are recorded on every request span
//! - Metrics are cheap (atomic increments); no recorder means no cost
//! - Every output here is stoppable by the shutdown coordinator

pub mod logging;
pub mod metrics;
pub mod shipping;

pub use logging::{LoggingError, LoggingHandle};
pub use self::metrics::{MetricsAgent, TelemetryError};
pub use shipping::{LogShipper, ShippingError, ShippingWriter};
