//! The kernel context shared by every lifecycle phase.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::GatewayConfig;
use crate::health::Readiness;
use crate::kernel::hooks::{AuxiliaryClient, LogSink, TelemetryAgent};
use crate::kernel::module::{FeatureModule, ModuleError};

/// Current configuration, swapped atomically on reload.
pub type SharedConfig = Arc<ArcSwap<GatewayConfig>>;

type ConfigListener = Arc<dyn Fn(&GatewayConfig) + Send + Sync>;

/// Subscribers notified with every accepted configuration change.
#[derive(Clone, Default)]
pub struct ConfigListeners(Vec<ConfigListener>);

impl ConfigListeners {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Swap `config` into `shared` and notify every listener in registration order.
    pub fn apply(&self, shared: &SharedConfig, config: GatewayConfig) {
        shared.store(Arc::new(config));
        let current = shared.load_full();
        for listener in &self.0 {
            listener(&current);
        }
        tracing::info!(listeners = self.0.len(), "Configuration change delivered");
    }
}

/// Collaborators the shutdown coordinator tears down, in teardown order.
pub(crate) struct Teardown {
    pub telemetry: Option<Box<dyn TelemetryAgent>>,
    pub auxiliary_clients: Vec<Box<dyn AuxiliaryClient>>,
    pub log_sinks: Vec<Box<dyn LogSink>>,
}

/// Process-wide state handed to every lifecycle phase.
///
/// Modules deposit routes, listeners, tasks and collaborators here during
/// bootstrap. Once serving starts the route tables and listener registry
/// have been taken; only the readiness flag and teardown handles remain live.
pub struct KernelContext {
    root: CancellationToken,
    config: SharedConfig,
    config_path: Option<PathBuf>,
    modules: Vec<Box<dyn FeatureModule>>,
    config_listeners: ConfigListeners,
    http_routes: Router,
    gateway_routes: Router,
    readiness: Readiness,
    tasks: TaskTracker,
    telemetry: Option<Box<dyn TelemetryAgent>>,
    auxiliary_clients: Vec<Box<dyn AuxiliaryClient>>,
    log_sinks: Vec<Box<dyn LogSink>>,
}

impl KernelContext {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            root: CancellationToken::new(),
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: None,
            modules: Vec::new(),
            config_listeners: ConfigListeners::default(),
            http_routes: Router::new(),
            gateway_routes: Router::new(),
            readiness: Readiness::new(),
            tasks: TaskTracker::new(),
            telemetry: None,
            auxiliary_clients: Vec::new(),
            log_sinks: Vec::new(),
        }
    }

    /// Watch `path` for configuration changes once serving starts.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Append a module. Registration order is the lifecycle order.
    pub fn register(&mut self, module: impl FeatureModule + 'static) {
        self.modules.push(Box::new(module));
    }

    pub fn register_boxed(&mut self, module: Box<dyn FeatureModule>) {
        self.modules.push(module);
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Root execution scope. Cancelled as the last shutdown step.
    pub fn root(&self) -> &CancellationToken {
        &self.root
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    pub fn shared_config(&self) -> SharedConfig {
        Arc::clone(&self.config)
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    /// Subscribe to configuration changes picked up by the file watcher.
    pub fn on_config_change(&mut self, listener: impl Fn(&GatewayConfig) + Send + Sync + 'static) {
        self.config_listeners.0.push(Arc::new(listener));
    }

    /// Merge routes into the primary HTTP router.
    ///
    /// Fails if a route overlaps one already registered; the table is left
    /// unchanged.
    pub fn route_http(&mut self, routes: Router) -> Result<(), ModuleError> {
        self.http_routes = merge_routes(&self.http_routes, routes)?;
        Ok(())
    }

    /// Merge routes into the gateway router (reached through the reserved prefix).
    pub fn route_gateway(&mut self, routes: Router) -> Result<(), ModuleError> {
        self.gateway_routes = merge_routes(&self.gateway_routes, routes)?;
        Ok(())
    }

    /// Spawn a long-lived task observing a child of the root scope.
    pub fn spawn<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fut = task(self.root.child_token());
        self.tasks.spawn(async move {
            fut.await;
            tracing::debug!(task = name, "Background task finished");
        });
        tracing::debug!(task = name, "Background task spawned");
    }

    pub fn background_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn set_telemetry_agent(&mut self, agent: impl TelemetryAgent + 'static) {
        if let Some(previous) = self.telemetry.replace(Box::new(agent)) {
            tracing::warn!(agent = previous.name(), "Replacing telemetry agent");
        }
    }

    pub fn add_auxiliary_client(&mut self, client: impl AuxiliaryClient + 'static) {
        self.auxiliary_clients.push(Box::new(client));
    }

    pub fn add_log_sink(&mut self, sink: impl LogSink + 'static) {
        self.log_sinks.push(Box::new(sink));
    }

    pub(crate) fn take_modules(&mut self) -> Vec<Box<dyn FeatureModule>> {
        std::mem::take(&mut self.modules)
    }

    /// Put modules back after bootstrap. Modules registered while the
    /// originals were taken are kept after them but never bootstrapped.
    pub(crate) fn restore_modules(&mut self, mut modules: Vec<Box<dyn FeatureModule>>) {
        if !self.modules.is_empty() {
            tracing::warn!(
                count = self.modules.len(),
                "Modules registered during bootstrap are not run"
            );
        }
        modules.append(&mut self.modules);
        self.modules = modules;
    }

    /// Take the primary and gateway route tables for serving.
    pub(crate) fn take_routes(&mut self) -> (Router, Router) {
        (
            std::mem::take(&mut self.http_routes),
            std::mem::take(&mut self.gateway_routes),
        )
    }

    pub(crate) fn take_config_listeners(&mut self) -> ConfigListeners {
        std::mem::take(&mut self.config_listeners)
    }

    pub(crate) fn take_teardown(&mut self) -> Teardown {
        Teardown {
            telemetry: self.telemetry.take(),
            auxiliary_clients: std::mem::take(&mut self.auxiliary_clients),
            log_sinks: std::mem::take(&mut self.log_sinks),
        }
    }

    /// Tracker of background tasks spawned through `spawn`.
    pub(crate) fn tasks(&self) -> TaskTracker {
        self.tasks.clone()
    }
}

/// `Router::merge` panics on overlapping routes or a second fallback.
fn merge_routes(current: &Router, routes: Router) -> Result<Router, ModuleError> {
    let current = current.clone();
    panic::catch_unwind(AssertUnwindSafe(move || current.merge(routes)))
        .map_err(|payload| ModuleError::Routes(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "conflicting routes".to_string()
    }
}
