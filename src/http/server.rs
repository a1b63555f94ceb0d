//! HTTP server setup for demultiplexed connections.
//!
//! # Responsibilities
//! - Build the primary router: module routes, gateway forwarding, middleware
//!   (tracing, metrics, limits, request ID)
//! - Build the secondary (gateway) router served to framed HTTP/2 clients
//! - Serve connections handed over by a `MuxListener`
//! - Drain in-flight connections under a deadline scope

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, MatchedPath, Request},
    http,
    middleware::{self, Next},
    response::Response,
    Router,
};
use hyper::body::Incoming;
use hyper::server::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::Span;

use crate::config::GatewayConfig;
use crate::http::gateway::GatewayRouter;
use crate::http::request::{MakeGatewayRequestId, RequestIdExt, X_REQUEST_ID};
use crate::net::{MuxListener, MuxedStream};
use crate::observability::metrics;

/// Route label for requests that matched no route.
const UNMATCHED: &str = "<unmatched>";

/// Wire protocol a server speaks on its connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    /// HTTP/2 with prior knowledge (no upgrade, no TLS).
    Http2,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http1 => "http1",
            Protocol::Http2 => "http2",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of draining one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub protocol: Protocol,
    /// Connections open when draining started.
    pub open: usize,
    /// Connections closed by the deadline instead of finishing.
    pub forced: usize,
}

/// Primary router: module routes, gateway forwarding and the middleware stack.
#[allow(deprecated)]
pub fn build_primary_router(routes: Router, gateway: &GatewayRouter, config: &GatewayConfig) -> Router {
    routes
        .merge(gateway.routes())
        .layer(middleware::from_fn(track_metrics))
        .layer(RequestBodyLimitLayer::new(config.limits.max_body_bytes))
        .layer(TimeoutLayer::new(config.timeouts.request()))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeGatewayRequestId))
}

/// Secondary router, reached through the gateway prefix or over HTTP/2.
#[allow(deprecated)]
pub fn build_gateway_router(routes: Router, config: &GatewayConfig) -> Router {
    routes
        .layer(TimeoutLayer::new(config.timeouts.request()))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeGatewayRequestId))
}

/// Span for one request, labelled by method and matched route template.
fn request_span<B>(request: &http::Request<B>) -> Span {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(MatchedPath::as_str)
        .unwrap_or(UNMATCHED);

    tracing::info_span!(
        "request",
        method = %request.method(),
        route,
        request_id = request.request_id().unwrap_or("-"),
    )
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| UNMATCHED.to_owned());

    let response = next.run(request).await;
    metrics::record_request(method.as_str(), &route, response.status().as_u16(), start);
    response
}

/// Serves an axum router on connections from one `MuxListener`.
pub struct HttpServer {
    app: Router,
    protocol: Protocol,
}

impl HttpServer {
    pub fn new(app: Router, protocol: Protocol) -> Self {
        Self { app, protocol }
    }

    /// Start serving in the background.
    pub fn spawn(self, listener: MuxListener) -> HttpServerHandle {
        let protocol = self.protocol;
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.serve(listener, stop_rx));
        HttpServerHandle {
            protocol,
            stop: Some(stop_tx),
            task,
        }
    }

    async fn serve(
        self,
        mut listener: MuxListener,
        mut stop: oneshot::Receiver<CancellationToken>,
    ) -> DrainReport {
        tracing::info!(protocol = %self.protocol, source = listener.protocol(), "HTTP server starting");

        let graceful = GracefulShutdown::new();
        let mut connections = JoinSet::new();

        let deadline = loop {
            tokio::select! {
                deadline = &mut stop => break deadline.ok(),
                accepted = listener.accept() => match accepted {
                    Some(stream) => self.serve_connection(stream, &graceful, &mut connections),
                    // Demultiplexer gone; keep existing connections until told to stop.
                    None => break (&mut stop).await.ok(),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        while connections.try_join_next().is_some() {}
        let open = connections.len();
        tracing::info!(protocol = %self.protocol, open, "HTTP server draining");

        let forced = match deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = graceful.shutdown() => 0,
                    _ = deadline.cancelled() => {
                        while connections.try_join_next().is_some() {}
                        let remaining = connections.len();
                        connections.shutdown().await;
                        remaining
                    }
                }
            }
            None => {
                connections.shutdown().await;
                open
            }
        };

        if forced > 0 {
            tracing::warn!(protocol = %self.protocol, forced, "Drain deadline reached, connections closed");
        }
        tracing::info!(protocol = %self.protocol, "HTTP server stopped");

        DrainReport {
            protocol: self.protocol,
            open,
            forced,
        }
    }

    fn serve_connection(
        &self,
        stream: MuxedStream,
        graceful: &GracefulShutdown,
        connections: &mut JoinSet<()>,
    ) {
        let id = stream.id();
        let peer: SocketAddr = stream.peer_addr();
        let protocol = self.protocol;

        let service = TowerToHyperService::new(self.app.clone().map_request(
            move |mut request: http::Request<Incoming>| {
                request.extensions_mut().insert(ConnectInfo(peer));
                request
            },
        ));
        let io = TokioIo::new(stream);

        match protocol {
            Protocol::Http1 => {
                let conn = graceful.watch(http1::Builder::new().serve_connection(io, service));
                connections.spawn(async move {
                    if let Err(e) = conn.await {
                        tracing::debug!(connection_id = %id, peer_addr = %peer, error = %e, "Connection error");
                    }
                });
            }
            Protocol::Http2 => {
                let conn = graceful.watch(
                    http2::Builder::new(TokioExecutor::new()).serve_connection(io, service),
                );
                connections.spawn(async move {
                    if let Err(e) = conn.await {
                        tracing::debug!(connection_id = %id, peer_addr = %peer, error = %e, "Connection error");
                    }
                });
            }
        }
    }
}

/// Handle to a running `HttpServer`.
pub struct HttpServerHandle {
    protocol: Protocol,
    stop: Option<oneshot::Sender<CancellationToken>>,
    task: JoinHandle<DrainReport>,
}

impl HttpServerHandle {
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Stop accepting and drain open connections until `deadline` is
    /// cancelled; whatever is still open then is closed.
    pub async fn shutdown(mut self, deadline: CancellationToken) -> DrainReport {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(deadline);
        }

        match (&mut self.task).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(protocol = %self.protocol, error = %e, "HTTP server task failed");
                DrainReport {
                    protocol: self.protocol,
                    open: 0,
                    forced: 0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;

    fn test_config() -> GatewayConfig {
        GatewayConfig::default()
    }

    #[tokio::test]
    async fn primary_router_sets_request_id() {
        let gateway = GatewayRouter::new("/grpc", Router::new());
        let app = build_primary_router(
            Router::new().route("/ping", get(|| async { "pong" })),
            &gateway,
            &test_config(),
        );

        let response = app
            .oneshot(http::Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        let id = response.headers().get(X_REQUEST_ID).unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn client_request_id_is_echoed() {
        let gateway = GatewayRouter::new("/grpc", Router::new());
        let app = build_primary_router(Router::new(), &gateway, &test_config());

        let response = app
            .oneshot(
                http::Request::get("/missing")
                    .header(X_REQUEST_ID, "given-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get(X_REQUEST_ID).unwrap(), "given-id");
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let mut config = test_config();
        config.limits.max_body_bytes = 8;
        let gateway = GatewayRouter::new("/grpc", Router::new());
        let app = build_primary_router(
            Router::new().route("/upload", axum::routing::post(|body: String| async move { body })),
            &gateway,
            &config,
        );

        let response = app
            .oneshot(
                http::Request::post("/upload")
                    .header(http::header::CONTENT_LENGTH, "21")
                    .body(Body::from("this body is too long"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::PAYLOAD_TOO_LARGE);
    }
}
