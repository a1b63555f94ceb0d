//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

use service_gateway::config::GatewayConfig;
use service_gateway::health::Readiness;
use service_gateway::kernel::{
    AuxiliaryClient, FeatureModule, HookError, KernelContext, LogSink, ModuleError, TelemetryAgent,
};

/// Loopback config with short timeouts.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.listener.peek_timeout_ms = 500;
    config.timeouts.shutdown_ms = 500;
    config
}

/// Ordered record of what the fakes observed.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakeTelemetry {
    pub events: Events,
    pub readiness: Readiness,
}

#[async_trait]
impl TelemetryAgent for FakeTelemetry {
    fn name(&self) -> &str {
        "fake-telemetry"
    }

    async fn stop(&self) -> Result<(), HookError> {
        self.events
            .push(format!("telemetry ready={}", self.readiness.is_ready()));
        Ok(())
    }
}

pub struct FakeClient {
    pub name: &'static str,
    pub events: Events,
    pub fail: bool,
}

#[async_trait]
impl AuxiliaryClient for FakeClient {
    fn name(&self) -> &str {
        self.name
    }

    async fn close(&self) -> Result<(), HookError> {
        self.events.push(format!("client {}", self.name));
        if self.fail {
            return Err("collector unreachable".into());
        }
        Ok(())
    }
}

pub struct FakeSink {
    pub events: Events,
}

impl LogSink for FakeSink {
    fn name(&self) -> &str {
        "fake-sink"
    }

    fn stop(&self) -> Result<(), HookError> {
        self.events.push("sink");
        Ok(())
    }
}

/// Registers an echo handler as the whole gateway router, a plain handler
/// under `/api/`, and a slow handler at `/slow`. Clones share counters.
#[derive(Clone)]
pub struct EchoModule {
    pub secondary_hits: Arc<AtomicUsize>,
    pub slow_entered: Arc<Notify>,
}

impl EchoModule {
    pub fn new() -> Self {
        Self {
            secondary_hits: Arc::new(AtomicUsize::new(0)),
            slow_entered: Arc::new(Notify::new()),
        }
    }

    pub fn hits(&self) -> usize {
        self.secondary_hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureModule for EchoModule {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn load(&mut self, ctx: &mut KernelContext) -> Result<(), ModuleError> {
        ctx.route_gateway(
            Router::new()
                .fallback(echo)
                .with_state(Arc::clone(&self.secondary_hits)),
        )?;
        ctx.route_http(
            Router::new()
                .route("/api/{*rest}", any(|| async { "primary" }))
                .route("/slow", get(slow))
                .with_state(Arc::clone(&self.slow_entered)),
        )?;
        Ok(())
    }
}

async fn echo(
    State(hits): State<Arc<AtomicUsize>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "x-test": headers.get("x-test").and_then(|v| v.to_str().ok()),
        "body": String::from_utf8_lossy(&body),
    }))
}

async fn slow(State(entered): State<Arc<Notify>>) -> &'static str {
    entered.notify_one();
    tokio::time::sleep(Duration::from_secs(10)).await;
    "done"
}

/// Fails during `load` when asked to.
pub struct FailingModule {
    pub fail_in_load: bool,
}

#[async_trait]
impl FeatureModule for FailingModule {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn load(&mut self, _ctx: &mut KernelContext) -> Result<(), ModuleError> {
        if self.fail_in_load {
            return Err(ModuleError::Config("database url missing".into()));
        }
        Ok(())
    }
}
