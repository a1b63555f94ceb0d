//! Health subsystem.
//!
//! # Data Flow
//! ```text
//! startup.rs (after serve loops launch)  → readiness.set(true)
//! shutdown.rs (first teardown step)      → readiness.set(false)
//! GET /healthz (modules::health)         → readiness.is_ready()
//! ```
//!
//! # Design Decisions
//! - Single atomic, no locks on the request path
//! - Draining is terminal: a process never becomes ready twice

pub mod readiness;

pub use readiness::{Readiness, ReadinessState};
