//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     bootstrap modules (phase-major) → bind listener → register matchers
//!     → start HTTP servers + demultiplexer → config watcher → readiness true
//!
//! Shutdown (shutdown.rs):
//!     readiness false → telemetry → auxiliary clients → log sinks
//!     → stop accepting, drain under deadline → cancel root scope
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: modules first, listeners last (traffic only when ready)
//! - Ordered shutdown on a single task; step failures never stop teardown
//! - Only the HTTP drain has a deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{deadline_scope, ShutdownReport, ShutdownState, StepFailure};
pub use signals::{Termination, TerminationSignal};
pub use startup::{bootstrap, launch, BootstrapError, RunningKernel, StartupError};
