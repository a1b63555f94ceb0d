//! In-process gateway forwarding.
//!
//! Requests whose path starts with the reserved prefix are rewritten (prefix
//! removed from the URI) and handed to the secondary router by a direct
//! service call. No connection is opened and the body is passed through
//! untouched.

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{uri::PathAndQuery, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tower::ServiceExt;

/// Forwards prefixed requests to the secondary router.
#[derive(Clone)]
pub struct GatewayRouter {
    prefix: String,
    inner: Router,
}

impl GatewayRouter {
    /// `prefix` must start with `/`; a trailing `/` is ignored.
    pub fn new(prefix: impl Into<String>, inner: Router) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        Self {
            prefix: trimmed.to_string(),
            inner,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Routes to merge into the primary router: the bare prefix and
    /// everything below it.
    pub fn routes(&self) -> Router {
        let handler = any(forward);
        Router::new()
            .route(&self.prefix, handler.clone())
            .route(&format!("{}/", self.prefix), handler.clone())
            .route(&format!("{}/{{*rest}}", self.prefix), handler)
            .with_state(self.clone())
    }

    /// Strip the prefix and call the secondary router.
    ///
    /// Returns 404 when the path is outside the prefix.
    pub async fn dispatch(&self, mut request: Request<Body>) -> Response {
        let Some(uri) = strip_prefix(request.uri(), &self.prefix) else {
            return StatusCode::NOT_FOUND.into_response();
        };

        tracing::debug!(
            from = %request.uri().path(),
            to = %uri.path(),
            "Forwarding to gateway router"
        );

        *request.uri_mut() = uri;
        // The secondary router records its own matched route.
        request.extensions_mut().remove::<MatchedPath>();

        match self.inner.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

async fn forward(State(gateway): State<GatewayRouter>, request: Request) -> Response {
    gateway.dispatch(request).await
}

/// Remove `prefix` from the path of `uri`, keeping the query and authority.
///
/// `/grpc/foo?x=1` with prefix `/grpc` becomes `/foo?x=1`; `/grpc` becomes
/// `/`. A path that only shares leading characters (`/grpcx`) is not under
/// the prefix.
pub fn strip_prefix(uri: &Uri, prefix: &str) -> Option<Uri> {
    let rest = uri.path().strip_prefix(prefix)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let path = if rest.is_empty() { "/" } else { rest };

    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}
