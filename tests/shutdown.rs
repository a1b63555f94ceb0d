//! Shutdown ordering, deadline and failure-isolation tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use service_gateway::kernel::{KernelContext, ModuleError};
use service_gateway::lifecycle::{launch, ShutdownState, StartupError};
use service_gateway::modules::HealthModule;

mod common;

use common::{Events, FakeClient, FakeSink, FakeTelemetry};

#[tokio::test]
async fn test_teardown_runs_in_order_after_readiness_drops() {
    let events = Events::default();
    let mut ctx = KernelContext::new(common::test_config());
    ctx.set_telemetry_agent(FakeTelemetry {
        events: events.clone(),
        readiness: ctx.readiness(),
    });
    ctx.add_auxiliary_client(FakeClient {
        name: "first",
        events: events.clone(),
        fail: false,
    });
    ctx.add_auxiliary_client(FakeClient {
        name: "second",
        events: events.clone(),
        fail: false,
    });
    ctx.add_log_sink(FakeSink {
        events: events.clone(),
    });

    let kernel = launch(ctx).await.unwrap();
    let root = kernel.context().root().clone();
    assert!(events.snapshot().is_empty());

    let report = kernel.shutdown().await;

    assert_eq!(
        events.snapshot(),
        vec!["telemetry ready=false", "client first", "client second", "sink"]
    );
    assert_eq!(report.state, ShutdownState::Stopped);
    assert!(report.failures.is_empty());
    assert!(root.is_cancelled());
}

#[tokio::test]
async fn test_step_failure_does_not_stop_teardown() {
    let events = Events::default();
    let mut ctx = KernelContext::new(common::test_config());
    ctx.add_auxiliary_client(FakeClient {
        name: "shipper",
        events: events.clone(),
        fail: true,
    });
    ctx.add_log_sink(FakeSink {
        events: events.clone(),
    });

    let kernel = launch(ctx).await.unwrap();
    let report = kernel.shutdown().await;

    assert_eq!(events.snapshot(), vec!["client shipper", "sink"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].step, "auxiliary");
    assert_eq!(report.failures[0].target, "shipper");
    assert_eq!(report.state, ShutdownState::Stopped);
}

#[tokio::test]
async fn test_deadline_forces_slow_connection_closed() {
    let echo = common::EchoModule::new();
    let mut ctx = KernelContext::new(common::test_config());
    ctx.register(echo.clone());
    let kernel = launch(ctx).await.unwrap();

    let url = format!("http://{}/slow", kernel.local_addr());
    let request = tokio::spawn(async move { reqwest::get(url).await });
    tokio::time::timeout(Duration::from_secs(5), echo.slow_entered.notified())
        .await
        .expect("slow handler never started");

    // Handler needs 10s; the drain deadline is 500ms.
    let started = Instant::now();
    let report = kernel.shutdown().await;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(3), "shutdown took {elapsed:?}");
    assert_eq!(report.forced_connections(), 1);
    assert_eq!(report.state, ShutdownState::Stopped);

    let outcome = request.await.unwrap();
    assert!(outcome.is_err(), "slow request should not complete");
}

#[tokio::test]
async fn test_reloaded_config_does_not_extend_drain_deadline() {
    let echo = common::EchoModule::new();
    let mut ctx = KernelContext::new(common::test_config());
    ctx.register(echo.clone());
    let kernel = launch(ctx).await.unwrap();

    let mut reloaded = common::test_config();
    reloaded.timeouts.shutdown_ms = 60_000;
    kernel.context().shared_config().store(Arc::new(reloaded));
    assert_eq!(kernel.context().config().timeouts.shutdown_ms, 60_000);

    let url = format!("http://{}/slow", kernel.local_addr());
    let request = tokio::spawn(async move { reqwest::get(url).await });
    tokio::time::timeout(Duration::from_secs(5), echo.slow_entered.notified())
        .await
        .expect("slow handler never started");

    let started = Instant::now();
    let report = kernel.shutdown().await;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(3), "shutdown took {elapsed:?}");
    assert_eq!(report.forced_connections(), 1);
    let _ = request.await;
}

#[tokio::test]
async fn test_idle_server_drains_without_forcing() {
    let mut ctx = KernelContext::new(common::test_config());
    ctx.register(HealthModule);
    let kernel = launch(ctx).await.unwrap();

    let response = reqwest::get(format!("http://{}/healthz", kernel.local_addr()))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let report = kernel.shutdown().await;
    assert_eq!(report.forced_connections(), 0);
    assert_eq!(report.drains.len(), 2);
}

#[tokio::test]
async fn test_bootstrap_failure_aborts_launch() {
    let mut ctx = KernelContext::new(common::test_config());
    ctx.register(HealthModule);
    ctx.register(common::FailingModule { fail_in_load: true });
    let readiness = ctx.readiness();

    let err = launch(ctx).await.err().expect("launch should fail");
    match err {
        StartupError::Bootstrap(err) => {
            assert_eq!(err.index, 1);
            assert_eq!(err.module, "failing");
            assert!(matches!(err.source, ModuleError::Config(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!readiness.is_ready());
}
