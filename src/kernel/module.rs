//! Feature module lifecycle contract.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::kernel::context::KernelContext;

/// Lifecycle phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    PreInit,
    Init,
    PostInit,
    Load,
    Start,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::PreInit,
        Phase::Init,
        Phase::PostInit,
        Phase::Load,
        Phase::Start,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreInit => "pre-init",
            Phase::Init => "init",
            Phase::PostInit => "post-init",
            Phase::Load => "load",
            Phase::Start => "start",
        }
    }

    /// Invoke this phase's operation on `module`.
    pub async fn run(
        self,
        module: &mut dyn FeatureModule,
        ctx: &mut KernelContext,
    ) -> Result<(), ModuleError> {
        match self {
            Phase::PreInit => module.pre_init(ctx).await,
            Phase::Init => module.init(ctx).await,
            Phase::PostInit => module.post_init(ctx).await,
            Phase::Load => module.load(ctx).await,
            Phase::Start => module.start(ctx).await,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors a feature module may return from a lifecycle operation.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{context}: {source}")]
    Failed {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("route registration rejected: {0}")]
    Routes(String),

    #[error("{0}")]
    Message(String),
}

impl ModuleError {
    pub fn failed(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        ModuleError::Failed {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        ModuleError::Message(message.into())
    }
}

/// A pluggable unit of functionality driven through five ordered phases.
///
/// Every phase defaults to a no-op so modules only implement what they need.
/// Phases run phase-major across all registered modules: a module's `load`
/// can rely on every module having finished `post_init`.
#[async_trait]
pub trait FeatureModule: Send + Sync {
    /// Name used in logs. Ordering is by registration, never by name.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    async fn pre_init(&mut self, _ctx: &mut KernelContext) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn init(&mut self, _ctx: &mut KernelContext) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn post_init(&mut self, _ctx: &mut KernelContext) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn load(&mut self, _ctx: &mut KernelContext) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn start(&mut self, _ctx: &mut KernelContext) -> Result<(), ModuleError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered() {
        let mut sorted = Phase::ALL;
        sorted.sort();
        assert_eq!(sorted, Phase::ALL);
        assert_eq!(Phase::ALL[0], Phase::PreInit);
        assert_eq!(Phase::ALL[4], Phase::Start);
    }

    #[test]
    fn failed_error_keeps_context() {
        let err = ModuleError::failed(
            "connect database",
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(err.to_string(), "connect database: refused");
    }
}
