//! Kernel subsystem: the context object and the module contract.
//!
//! # Data Flow
//! ```text
//! main
//!     → KernelContext::new(config)
//!     → register FeatureModules (order = lifecycle order)
//!     → lifecycle::startup::bootstrap (phase-major over all modules)
//!         modules deposit routes, config listeners, tasks, collaborators
//!     → lifecycle::startup::launch takes routes → serving
//!     → lifecycle::shutdown drains teardown hooks
//! ```
//!
//! # Design Decisions
//! - One explicit context, passed by `&mut` to every phase; no globals
//! - Module identity is its registration index
//! - Teardown collaborators are trait objects (hooks.rs)

pub mod context;
pub mod hooks;
pub mod module;

pub use context::{ConfigListeners, KernelContext, SharedConfig};
pub use hooks::{AuxiliaryClient, HookError, LogSink, TelemetryAgent};
pub use module::{FeatureModule, ModuleError, Phase};
