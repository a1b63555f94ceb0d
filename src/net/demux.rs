//! Protocol demultiplexer: one listening socket, several protocol handlers.
//!
//! # Responsibilities
//! - Run the accept loop on the bounded listener
//! - Read just enough of each connection to classify it against an ordered
//!   matcher set
//! - Hand the connection (with the consumed bytes replayed) to the matched
//!   handler's listener
//! - Drop connections that match nothing, or that stay silent past the peek
//!   timeout
//!
//! # Design Decisions
//! - Classification runs on a per-connection task; a slow client never
//!   blocks the accept loop
//! - Matchers are evaluated in registration order; an earlier matcher that
//!   still needs bytes holds the decision even if a later one already matches
//! - The matcher set is fixed before `serve` starts

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ListenerConfig;
use crate::net::connection::MuxedStream;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::observability::metrics;

/// Result of inspecting the first bytes of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Match,
    NoMatch,
    /// Undecided until more bytes arrive.
    NeedMore,
}

/// Predicate over the first bytes of a connection.
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Protocol label used in logs and metrics.
    fn name(&self) -> &'static str;

    fn matches(&self, prefix: &[u8]) -> MatchOutcome;
}

const HTTP1_METHODS: [&[u8]; 9] = [
    b"GET ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"HEAD ",
    b"OPTIONS ",
    b"PATCH ",
    b"CONNECT ",
    b"TRACE ",
];

/// Matches HTTP/1.x by its request-line method token.
#[derive(Debug, Clone, Copy, Default)]
pub struct Http1Matcher;

impl Matcher for Http1Matcher {
    fn name(&self) -> &'static str {
        "http1"
    }

    fn matches(&self, prefix: &[u8]) -> MatchOutcome {
        let mut need_more = false;
        for method in HTTP1_METHODS {
            if prefix.starts_with(method) {
                return MatchOutcome::Match;
            }
            if method.starts_with(prefix) {
                need_more = true;
            }
        }
        if need_more {
            MatchOutcome::NeedMore
        } else {
            MatchOutcome::NoMatch
        }
    }
}

/// Client connection preface of HTTP/2 with prior knowledge (RFC 9113 §3.4).
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Matches cleartext HTTP/2 framed traffic (e.g. gRPC clients).
#[derive(Debug, Clone, Copy, Default)]
pub struct Http2PrefaceMatcher;

impl Matcher for Http2PrefaceMatcher {
    fn name(&self) -> &'static str {
        "http2"
    }

    fn matches(&self, prefix: &[u8]) -> MatchOutcome {
        if prefix.starts_with(HTTP2_PREFACE) {
            MatchOutcome::Match
        } else if HTTP2_PREFACE.starts_with(prefix) {
            MatchOutcome::NeedMore
        } else {
            MatchOutcome::NoMatch
        }
    }
}

/// Matches every connection without reading from it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyMatcher;

impl Matcher for AnyMatcher {
    fn name(&self) -> &'static str {
        "any"
    }

    fn matches(&self, _prefix: &[u8]) -> MatchOutcome {
        MatchOutcome::Match
    }
}

/// Decision over the whole matcher set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Index of the winning matcher.
    Matched(usize),
    Rejected,
    Incomplete,
}

/// Evaluate matchers in order: the first `Match` wins unless an earlier
/// matcher still needs more bytes.
pub fn classify(matchers: &[Box<dyn Matcher>], prefix: &[u8]) -> Classification {
    for (index, matcher) in matchers.iter().enumerate() {
        match matcher.matches(prefix) {
            MatchOutcome::Match => return Classification::Matched(index),
            MatchOutcome::NeedMore => return Classification::Incomplete,
            MatchOutcome::NoMatch => {}
        }
    }
    Classification::Rejected
}

/// Why a connection was dropped before reaching a handler.
#[derive(Debug, Error)]
enum Unclassified {
    #[error("no matcher accepted the connection")]
    NoMatch,
    #[error("peek buffer limit of {0} bytes reached")]
    BufferFull(usize),
    #[error("peer closed before classification")]
    Closed,
    #[error("peek timed out after {0:?}")]
    Timeout(Duration),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Unclassified {
    fn reason(&self) -> &'static str {
        match self {
            Unclassified::NoMatch => "no_match",
            Unclassified::BufferFull(_) => "buffer_full",
            Unclassified::Closed => "closed",
            Unclassified::Timeout(_) => "timeout",
            Unclassified::Io(_) => "io",
        }
    }
}

/// Receiving end of one protocol handler.
#[derive(Debug)]
pub struct MuxListener {
    protocol: &'static str,
    rx: mpsc::Receiver<MuxedStream>,
}

impl MuxListener {
    /// Next classified connection, or `None` once the demultiplexer stopped.
    pub async fn accept(&mut self) -> Option<MuxedStream> {
        self.rx.recv().await
    }

    pub fn protocol(&self) -> &'static str {
        self.protocol
    }
}

/// Matchers and their hand-off channels, shared by per-connection tasks.
struct Routes {
    matchers: Vec<Box<dyn Matcher>>,
    handlers: Vec<mpsc::Sender<MuxedStream>>,
    peek_timeout: Duration,
    peek_limit: usize,
}

impl Routes {
    async fn dispatch(&self, mut stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let classified =
            match tokio::time::timeout(self.peek_timeout, self.read_prefix(&mut stream)).await {
                Ok(result) => result,
                Err(_) => Err(Unclassified::Timeout(self.peek_timeout)),
            };

        let (index, prefix) = match classified {
            Ok(found) => found,
            Err(reason) => {
                tracing::debug!(peer_addr = %peer, reason = %reason, "Dropping unclassified connection");
                metrics::record_dropped_connection(reason.reason());
                return;
            }
        };

        let protocol = self.matchers[index].name();
        metrics::record_connection(protocol);

        let muxed = MuxedStream::new(stream, peer, prefix, Some(permit));
        tracing::trace!(connection_id = %muxed.id(), peer_addr = %peer, protocol, "Connection classified");

        if self.handlers[index].send(muxed).await.is_err() {
            tracing::debug!(peer_addr = %peer, protocol, "Handler no longer accepting, dropping connection");
        }
    }

    async fn read_prefix(&self, stream: &mut TcpStream) -> Result<(usize, Bytes), Unclassified> {
        let mut buf = BytesMut::with_capacity(self.peek_limit.min(512));
        let mut chunk = [0u8; 256];
        loop {
            match classify(&self.matchers, &buf) {
                Classification::Matched(index) => return Ok((index, buf.freeze())),
                Classification::Rejected => return Err(Unclassified::NoMatch),
                Classification::Incomplete if buf.len() >= self.peek_limit => {
                    return Err(Unclassified::BufferFull(self.peek_limit));
                }
                Classification::Incomplete => {}
            }

            let want = (self.peek_limit - buf.len()).min(chunk.len());
            let n = stream.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Err(Unclassified::Closed);
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Owns the listening socket and fans connections out by protocol.
pub struct Demultiplexer {
    listener: Listener,
    routes: Routes,
}

impl Demultiplexer {
    pub fn new(listener: Listener, config: &ListenerConfig) -> Self {
        Self {
            listener,
            routes: Routes {
                matchers: Vec::new(),
                handlers: Vec::new(),
                peek_timeout: config.peek_timeout(),
                peek_limit: config.peek_buffer_bytes,
            },
        }
    }

    /// Append a matcher. Earlier registrations take priority.
    pub fn register(&mut self, matcher: impl Matcher + 'static) -> MuxListener {
        let (tx, rx) = mpsc::channel(64);
        let protocol = matcher.name();
        self.routes.matchers.push(Box::new(matcher));
        self.routes.handlers.push(tx);
        MuxListener { protocol, rx }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept and dispatch connections until `shutdown` is cancelled.
    ///
    /// Dropping the demultiplexer closes the listening socket and, once
    /// in-flight classifications finish, every `MuxListener`.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ListenerError> {
        let Demultiplexer { listener, routes } = self;
        let routes = Arc::new(routes);

        tracing::info!(
            protocols = ?routes.matchers.iter().map(|m| m.name()).collect::<Vec<_>>(),
            peek_timeout = ?routes.peek_timeout,
            "Demultiplexer serving"
        );

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer, permit)) => {
                    let routes = Arc::clone(&routes);
                    tokio::spawn(async move {
                        routes.dispatch(stream, peer, permit).await;
                    });
                }
                Err(ListenerError::Accept(e)) => {
                    // Transient (e.g. EMFILE); back off instead of spinning.
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("Demultiplexer stopped");
        Ok(())
    }
}
