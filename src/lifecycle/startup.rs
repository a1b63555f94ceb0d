//! Startup orchestration.
//!
//! # Responsibilities
//! - Run the five lifecycle phases over every registered module, phase-major
//! - Bind the listener and register protocol handlers
//! - Start the HTTP servers, the demultiplexer and the config watcher
//! - Flip readiness once traffic can be served
//!
//! # Design Decisions
//! - Fail fast: the first failing phase aborts bootstrap, nothing is rolled back
//! - Listener bind failure is fatal
//! - Readiness is set last

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigWatcher;
use crate::health::Readiness;
use crate::http::{
    build_gateway_router, build_primary_router, GatewayRouter, HttpServer, HttpServerHandle, Protocol,
};
use crate::kernel::{FeatureModule, KernelContext, ModuleError, Phase};
use crate::lifecycle::shutdown::{ShutdownCoordinator, ShutdownReport, ShutdownState};
use crate::lifecycle::signals::TerminationSignal;
use crate::net::{Demultiplexer, Http1Matcher, Http2PrefaceMatcher, Listener, ListenerError};

/// A lifecycle phase failed.
#[derive(Debug, Error)]
#[error("{phase} failed in module #{index} ({module}): {source}")]
pub struct BootstrapError {
    pub phase: Phase,
    /// Registration index of the failing module.
    pub index: usize,
    pub module: &'static str,
    #[source]
    pub source: ModuleError,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Listen(#[from] ListenerError),
}

/// Run every phase over every module: phase `n` finishes for all modules
/// before phase `n + 1` starts for any.
pub async fn bootstrap(ctx: &mut KernelContext) -> Result<(), BootstrapError> {
    let mut modules = ctx.take_modules();
    let result = run_phases(&mut modules, ctx).await;
    ctx.restore_modules(modules);
    result
}

async fn run_phases(
    modules: &mut [Box<dyn FeatureModule>],
    ctx: &mut KernelContext,
) -> Result<(), BootstrapError> {
    for phase in Phase::ALL {
        let started = Instant::now();
        for (index, module) in modules.iter_mut().enumerate() {
            if let Err(source) = phase.run(module.as_mut(), ctx).await {
                tracing::error!(
                    phase = %phase,
                    index,
                    module = module.name(),
                    error = %source,
                    "Lifecycle phase failed"
                );
                return Err(BootstrapError {
                    phase,
                    index,
                    module: module.name(),
                    source,
                });
            }
        }
        tracing::debug!(phase = %phase, modules = modules.len(), elapsed = ?started.elapsed(), "Phase complete");
    }
    Ok(())
}

/// Bootstrap the modules and start serving.
pub async fn launch(mut ctx: KernelContext) -> Result<RunningKernel, StartupError> {
    bootstrap(&mut ctx).await?;

    let config = ctx.config();
    let listener = Listener::bind(&config.listener).await?;
    let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
        address: config.listener.bind_address.clone(),
        source,
    })?;
    let max_connections = listener.max_connections();

    let mut demux = Demultiplexer::new(listener, &config.listener);
    let http1 = demux.register(Http1Matcher);
    let http2 = demux.register(Http2PrefaceMatcher);

    let (http_routes, gateway_routes) = ctx.take_routes();
    let secondary = build_gateway_router(gateway_routes, &config);
    let gateway = GatewayRouter::new(config.gateway.normalized_prefix(), secondary.clone());
    let primary = build_primary_router(http_routes, &gateway, &config);

    let servers = vec![
        HttpServer::new(primary, Protocol::Http1).spawn(http1),
        HttpServer::new(secondary, Protocol::Http2).spawn(http2),
    ];

    let accept = ctx.root().child_token();
    let demux = tokio::spawn(demux.serve(accept.clone()));

    watch_config(&mut ctx);

    tracing::info!(
        address = %local_addr,
        mode = config.mode.as_str(),
        gateway_prefix = gateway.prefix(),
        max_connections,
        modules = ctx.module_count(),
        "Service gateway listening"
    );

    let readiness = ctx.readiness();
    readiness.set(true);

    Ok(RunningKernel {
        ctx,
        local_addr,
        accept,
        servers,
        demux,
        shutdown_timeout: config.timeouts.shutdown(),
    })
}

/// Deliver config file changes to the registered listeners until shutdown.
fn watch_config(ctx: &mut KernelContext) {
    let listeners = ctx.take_config_listeners();
    let Some(path) = ctx.config_path().map(Path::to_path_buf) else {
        return;
    };
    let shared = ctx.shared_config();

    ctx.spawn("config-watcher", move |stop| async move {
        let mut updates = match ConfigWatcher::new(&path).watch() {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Config hot reload disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                update = updates.next() => match update {
                    Some(config) => listeners.apply(&shared, config),
                    None => break,
                },
            }
        }
    });
}

/// The serving process: owns the context and everything started by `launch`.
pub struct RunningKernel {
    ctx: KernelContext,
    local_addr: SocketAddr,
    accept: CancellationToken,
    servers: Vec<HttpServerHandle>,
    demux: JoinHandle<Result<(), ListenerError>>,
    /// Drain budget fixed at launch; reloads do not change it.
    shutdown_timeout: Duration,
}

impl RunningKernel {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn readiness(&self) -> Readiness {
        self.ctx.readiness()
    }

    pub fn context(&self) -> &KernelContext {
        &self.ctx
    }

    /// Run the shutdown sequence now.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let coordinator = ShutdownCoordinator {
            state: ShutdownState::Serving,
            readiness: self.ctx.readiness(),
            root: self.ctx.root().clone(),
            accept: self.accept,
            tasks: self.ctx.tasks(),
            teardown: self.ctx.take_teardown(),
            servers: self.servers,
            demux: Some(self.demux),
            timeout: self.shutdown_timeout,
        };
        coordinator.run().await
    }

    /// Serve until `signal` resolves, then shut down.
    ///
    /// `signal` is usually `Termination::recv`, installed before `launch`.
    pub async fn run_until<F>(self, signal: F) -> ShutdownReport
    where
        F: Future<Output = io::Result<TerminationSignal>>,
    {
        match signal.await {
            Ok(signal) => tracing::info!(signal = %signal, "Termination signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for signals, shutting down"),
        }
        self.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::config::GatewayConfig;

    type Log = Arc<Mutex<Vec<(Phase, usize)>>>;

    struct Recorder {
        index: usize,
        log: Log,
        fail_at: Option<Phase>,
    }

    impl Recorder {
        async fn hit(&self, phase: Phase) -> Result<(), ModuleError> {
            self.log.lock().unwrap().push((phase, self.index));
            if self.fail_at == Some(phase) {
                return Err(ModuleError::msg("boom"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl FeatureModule for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn pre_init(&mut self, _ctx: &mut KernelContext) -> Result<(), ModuleError> {
            self.hit(Phase::PreInit).await
        }

        async fn init(&mut self, _ctx: &mut KernelContext) -> Result<(), ModuleError> {
            self.hit(Phase::Init).await
        }

        async fn post_init(&mut self, _ctx: &mut KernelContext) -> Result<(), ModuleError> {
            self.hit(Phase::PostInit).await
        }

        async fn load(&mut self, _ctx: &mut KernelContext) -> Result<(), ModuleError> {
            self.hit(Phase::Load).await
        }

        async fn start(&mut self, _ctx: &mut KernelContext) -> Result<(), ModuleError> {
            self.hit(Phase::Start).await
        }
    }

    fn context(modules: usize, fail: Option<(usize, Phase)>) -> (KernelContext, Log) {
        let log = Log::default();
        let mut ctx = KernelContext::new(GatewayConfig::default());
        for index in 0..modules {
            ctx.register(Recorder {
                index,
                log: Arc::clone(&log),
                fail_at: fail.filter(|(i, _)| *i == index).map(|(_, p)| p),
            });
        }
        (ctx, log)
    }

    #[tokio::test]
    async fn phases_run_phase_major() {
        let (mut ctx, log) = context(3, None);
        bootstrap(&mut ctx).await.unwrap();

        let expected: Vec<_> = Phase::ALL
            .iter()
            .flat_map(|phase| (0..3).map(move |i| (*phase, i)))
            .collect();
        assert_eq!(*log.lock().unwrap(), expected);
        assert_eq!(ctx.module_count(), 3);
    }

    #[tokio::test]
    async fn failure_stops_remaining_modules_and_phases() {
        let (mut ctx, log) = context(3, Some((1, Phase::PostInit)));
        let err = bootstrap(&mut ctx).await.unwrap_err();

        assert_eq!(err.phase, Phase::PostInit);
        assert_eq!(err.index, 1);
        assert_eq!(
            err.to_string(),
            "post-init failed in module #1 (recorder): boom"
        );

        let log = log.lock().unwrap();
        assert_eq!(log.last(), Some(&(Phase::PostInit, 1)));
        assert!(!log.contains(&(Phase::PostInit, 2)));
        assert!(log.iter().all(|(phase, _)| *phase <= Phase::PostInit));
    }

    #[tokio::test]
    async fn conflicting_routes_fail_load_instead_of_panicking() {
        let mut config = GatewayConfig::default();
        config.health.path = crate::modules::system::INFO_PATH.into();
        let mut ctx = KernelContext::new(config);
        for module in crate::modules::registered() {
            ctx.register_boxed(module);
        }

        let err = bootstrap(&mut ctx).await.unwrap_err();
        assert_eq!(err.phase, Phase::Load);
        assert_eq!(err.index, 2);
        assert_eq!(err.module, "system");
        assert!(matches!(err.source, ModuleError::Routes(_)));
    }

    #[tokio::test]
    async fn bind_failure_is_fatal_and_readiness_stays_false() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = GatewayConfig::default();
        config.listener.bind_address = occupied.local_addr().unwrap().to_string();

        let ctx = KernelContext::new(config);
        let readiness = ctx.readiness();
        let err = launch(ctx).await.err().unwrap();

        assert!(matches!(err, StartupError::Listen(ListenerError::Bind { .. })));
        assert!(!readiness.is_ready());
    }
}
