//! Remote log shipping.
//!
//! JSON log lines produced by the logging layer are queued on a bounded
//! channel and POSTed as NDJSON batches to a collector. The queue never
//! blocks the logging call site: when it is full the line is dropped.
//!
//! Events emitted from this module are excluded from shipping, so a failing
//! collector cannot feed itself.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;
use url::Url;

use crate::config::LogShippingConfig;
use crate::kernel::{AuxiliaryClient, HookError};
use crate::observability::metrics;

/// Tracing target of this module's own events.
pub const SHIPPING_TARGET: &str = module_path!();

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const FINAL_FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum ShippingError {
    #[error("invalid log shipping endpoint '{endpoint}': {source}")]
    Endpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Batches log lines and sends them to the collector.
pub struct LogShipper {
    endpoint: Url,
    writer: ShippingWriter,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LogShipper {
    /// Spawn the batching task. Requires a running Tokio runtime.
    pub fn start(config: &LogShippingConfig) -> Result<Self, ShippingError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|source| ShippingError::Endpoint {
            endpoint: config.endpoint.clone(),
            source,
        })?;
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stop = CancellationToken::new();
        let batcher = Batcher {
            client,
            endpoint: endpoint.clone(),
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
        };
        let task = tokio::spawn(batcher.run(rx, stop.clone()));

        Ok(Self {
            endpoint,
            writer: ShippingWriter {
                tx,
                open: Arc::new(AtomicBool::new(true)),
            },
            stop,
            task: Mutex::new(Some(task)),
        })
    }

    /// Writer for a `tracing_subscriber::fmt` layer.
    pub fn writer(&self) -> ShippingWriter {
        self.writer.clone()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl AuxiliaryClient for LogShipper {
    fn name(&self) -> &str {
        "log-shipper"
    }

    /// Stop accepting lines, flush what is queued, and stop the task.
    async fn close(&self) -> Result<(), HookError> {
        self.writer.close();
        self.stop.cancel();

        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };
        match tokio::time::timeout(FINAL_FLUSH_TIMEOUT, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(format!("final flush exceeded {FINAL_FLUSH_TIMEOUT:?}").into()),
        }
    }
}

struct Batcher {
    client: reqwest::Client,
    endpoint: Url,
    batch_size: usize,
    flush_interval: Duration,
}

impl Batcher {
    async fn run(self, mut rx: mpsc::Receiver<String>, stop: CancellationToken) {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                line = rx.recv() => match line {
                    Some(line) => {
                        batch.push(line);
                        if batch.len() >= self.batch_size {
                            self.send(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.send(&mut batch).await;
                    }
                }
            }
        }

        // Final flush of whatever is already queued.
        while let Ok(line) = rx.try_recv() {
            batch.push(line);
            if batch.len() >= self.batch_size {
                self.send(&mut batch).await;
            }
        }
        if !batch.is_empty() {
            self.send(&mut batch).await;
        }
        tracing::debug!(endpoint = %self.endpoint, "Log shipper stopped");
    }

    async fn send(&self, batch: &mut Vec<String>) {
        let lines = batch.len();
        let mut body = batch.join("\n");
        body.push('\n');
        batch.clear();

        let result = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        if let Err(e) = result {
            metrics::record_shipping_failure(lines);
            tracing::warn!(endpoint = %self.endpoint, lines, error = %e, "Log batch not delivered");
        }
    }
}

/// `MakeWriter` handing each formatted event to the shipper.
#[derive(Clone)]
pub struct ShippingWriter {
    tx: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
}

impl ShippingWriter {
    /// Stop forwarding lines. Idempotent.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl<'a> MakeWriter<'a> for ShippingWriter {
    type Writer = LineBuffer<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LineBuffer {
            writer: self,
            buf: Vec::new(),
        }
    }
}

/// Collects one formatted event and queues it on drop.
pub struct LineBuffer<'a> {
    writer: &'a ShippingWriter,
    buf: Vec<u8>,
}

impl io::Write for LineBuffer<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LineBuffer<'_> {
    fn drop(&mut self) {
        if self.buf.is_empty() || !self.writer.is_open() {
            return;
        }
        let line = String::from_utf8_lossy(&self.buf).trim_end().to_string();
        if self.writer.tx.try_send(line).is_err() {
            metrics::record_shipping_failure(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use axum::{extract::State, routing::post, Router};

    async fn collector() -> (String, Arc<std::sync::Mutex<Vec<String>>>) {
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/logs",
                post(|State(store): State<Arc<std::sync::Mutex<Vec<String>>>>, body: String| async move {
                    store.lock().unwrap().extend(body.lines().map(str::to_string));
                }),
            )
            .with_state(Arc::clone(&received));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}/logs"), received)
    }

    fn config(endpoint: String) -> LogShippingConfig {
        LogShippingConfig {
            enabled: true,
            endpoint,
            batch_size: 2,
            flush_interval_ms: 50,
            queue_capacity: 16,
        }
    }

    #[tokio::test]
    async fn ships_lines_and_flushes_on_close() {
        let (endpoint, received) = collector().await;
        let shipper = LogShipper::start(&config(endpoint)).unwrap();
        let writer = shipper.writer();

        for line in ["{\"n\":1}\n", "{\"n\":2}\n", "{\"n\":3}\n"] {
            let mut w = writer.make_writer();
            w.write_all(line.as_bytes()).unwrap();
        }

        shipper.close().await.unwrap();
        let lines = received.lock().unwrap().clone();
        assert_eq!(lines, vec!["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"]);
    }

    #[tokio::test]
    async fn closed_writer_drops_lines() {
        let (endpoint, received) = collector().await;
        let shipper = LogShipper::start(&config(endpoint)).unwrap();
        let writer = shipper.writer();
        writer.close();

        writer.make_writer().write_all(b"ignored\n").unwrap();
        shipper.close().await.unwrap();
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn rejects_invalid_endpoint() {
        let err = LogShipper::start(&config("not a url".into()))
            .err()
            .unwrap();
        assert!(matches!(err, ShippingError::Endpoint { .. }));
    }
}
