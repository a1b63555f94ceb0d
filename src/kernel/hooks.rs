//! Teardown seams for process-wide collaborators.
//!
//! Implementations are deposited into the kernel context during bootstrap
//! (or by `main` before it) and driven by the shutdown coordinator, in this
//! order: telemetry agent, auxiliary clients, log sinks.

use async_trait::async_trait;

/// Boxed error returned by teardown hooks. Always logged, never fatal.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Telemetry/tracing exporter running for the whole process.
#[async_trait]
pub trait TelemetryAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn stop(&self) -> Result<(), HookError>;
}

/// A network client that must be closed before exit (e.g. log shipping).
#[async_trait]
pub trait AuxiliaryClient: Send + Sync {
    fn name(&self) -> &str;

    async fn close(&self) -> Result<(), HookError>;
}

/// A logging output that must be flushed and stopped before exit.
pub trait LogSink: Send + Sync {
    fn name(&self) -> &str;

    fn stop(&self) -> Result<(), HookError>;
}
