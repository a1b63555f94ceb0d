//! Readiness endpoint backed by the kernel's readiness flag.

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::health::{Readiness, ReadinessState};
use crate::kernel::{FeatureModule, KernelContext, ModuleError};

#[derive(Debug, Default)]
pub struct HealthModule;

#[async_trait]
impl FeatureModule for HealthModule {
    fn name(&self) -> &'static str {
        "health"
    }

    async fn load(&mut self, ctx: &mut KernelContext) -> Result<(), ModuleError> {
        let path = ctx.config().health.path.clone();
        let routes = Router::new()
            .route(&path, get(readiness))
            .with_state(ctx.readiness());
        ctx.route_http(routes)?;
        tracing::debug!(path = %path, "Health endpoint registered");
        Ok(())
    }
}

async fn readiness(State(readiness): State<Readiness>) -> impl IntoResponse {
    let state = readiness.state();
    let status = match state {
        ReadinessState::Ready => StatusCode::OK,
        ReadinessState::Starting | ReadinessState::Draining => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(json!({ "status": state.as_str() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn check(app: &Router) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn reports_readiness_transitions() {
        let mut ctx = KernelContext::new(crate::config::GatewayConfig::default());
        HealthModule.load(&mut ctx).await.unwrap();
        let (app, _) = ctx.take_routes();
        let readiness = ctx.readiness();

        assert_eq!(check(&app).await, (StatusCode::SERVICE_UNAVAILABLE, json!({"status": "starting"})));
        readiness.set(true);
        assert_eq!(check(&app).await, (StatusCode::OK, json!({"status": "ready"})));
        readiness.set(false);
        assert_eq!(check(&app).await, (StatusCode::SERVICE_UNAVAILABLE, json!({"status": "draining"})));
    }
}
