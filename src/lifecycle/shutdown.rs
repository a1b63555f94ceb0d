//! Shutdown coordination.
//!
//! Teardown runs on a single task, in a fixed order:
//!
//! 1. readiness → false (health checks start failing)
//! 2. stop the telemetry agent
//! 3. close auxiliary clients
//! 4. stop log sinks
//! 5. stop accepting, then drain the HTTP servers inside a deadline scope
//!    derived from the root scope; connections still open at the deadline
//!    are closed
//! 6. cancel the root scope
//!
//! Failures in steps 2–4 are logged and collected; teardown always continues.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::health::Readiness;
use crate::http::{DrainReport, HttpServerHandle};
use crate::kernel::context::Teardown;
use crate::kernel::HookError;
use crate::net::ListenerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Serving,
    Draining,
    Stopped,
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownState::Serving => "serving",
            ShutdownState::Draining => "draining",
            ShutdownState::Stopped => "stopped",
        })
    }
}

/// A teardown step that failed. Never fatal.
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub step: &'static str,
    pub target: String,
    pub error: String,
}

#[derive(Debug)]
pub struct ShutdownReport {
    pub state: ShutdownState,
    pub failures: Vec<StepFailure>,
    pub drains: Vec<DrainReport>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Connections closed by the drain deadline, across all servers.
    pub fn forced_connections(&self) -> usize {
        self.drains.iter().map(|d| d.forced).sum()
    }
}

/// Child of `parent` that is cancelled after `timeout`, or earlier with `parent`.
pub fn deadline_scope(parent: &CancellationToken, timeout: Duration) -> CancellationToken {
    let scope = parent.child_token();
    let timer = scope.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => timer.cancel(),
            _ = timer.cancelled() => {}
        }
    });
    scope
}

pub(crate) struct ShutdownCoordinator {
    pub state: ShutdownState,
    pub readiness: Readiness,
    pub root: CancellationToken,
    /// Stops the demultiplexer's accept loop.
    pub accept: CancellationToken,
    pub tasks: TaskTracker,
    pub teardown: Teardown,
    pub servers: Vec<HttpServerHandle>,
    pub demux: Option<JoinHandle<Result<(), ListenerError>>>,
    pub timeout: Duration,
}

impl ShutdownCoordinator {
    pub async fn run(mut self) -> ShutdownReport {
        let started = Instant::now();
        let mut failures = Vec::new();
        self.transition(ShutdownState::Draining);

        // 1
        self.readiness.set(false);

        // 2
        if let Some(agent) = self.teardown.telemetry.take() {
            let result = agent.stop().await;
            record("telemetry", agent.name(), result, &mut failures);
        }

        // 3
        for client in std::mem::take(&mut self.teardown.auxiliary_clients) {
            let result = client.close().await;
            record("auxiliary", client.name(), result, &mut failures);
        }

        // 4
        for sink in std::mem::take(&mut self.teardown.log_sinks) {
            let result = sink.stop();
            record("log-sink", sink.name(), result, &mut failures);
        }

        // 5
        self.accept.cancel();
        let deadline = deadline_scope(&self.root, self.timeout);
        tracing::info!(timeout = ?self.timeout, servers = self.servers.len(), "Draining HTTP servers");
        let drains = drain_servers(std::mem::take(&mut self.servers), &deadline).await;
        deadline.cancel();

        // 6
        self.root.cancel();
        self.tasks.close();
        if let Some(demux) = self.demux.take() {
            match demux.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Demultiplexer exited with error"),
                Err(e) => tracing::warn!(error = %e, "Demultiplexer task failed"),
            }
        }
        if !self.tasks.is_empty() {
            tracing::debug!(remaining = self.tasks.len(), "Background tasks still running at exit");
        }

        self.transition(ShutdownState::Stopped);
        let report = ShutdownReport {
            state: self.state,
            failures,
            drains,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            elapsed = ?report.elapsed,
            failures = report.failures.len(),
            forced_connections = report.forced_connections(),
            "Shutdown complete"
        );
        report
    }

    fn transition(&mut self, next: ShutdownState) {
        tracing::info!(from = %self.state, to = %next, "Shutdown state");
        self.state = next;
    }
}

/// Drain every server concurrently under the same deadline.
async fn drain_servers(servers: Vec<HttpServerHandle>, deadline: &CancellationToken) -> Vec<DrainReport> {
    let handles: Vec<_> = servers
        .into_iter()
        .map(|server| {
            let deadline = deadline.clone();
            tokio::spawn(server.shutdown(deadline))
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => tracing::error!(error = %e, "Drain task failed"),
        }
    }
    reports
}

fn record(
    step: &'static str,
    target: &str,
    result: Result<(), HookError>,
    failures: &mut Vec<StepFailure>,
) {
    match result {
        Ok(()) => tracing::info!(step, hook = target, "Shutdown step complete"),
        Err(e) => {
            tracing::warn!(step, hook = target, error = %e, "Shutdown step failed, continuing");
            failures.push(StepFailure {
                step,
                target: target.to_string(),
                error: e.to_string(),
            });
        }
    }
}
