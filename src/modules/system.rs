//! Process information on both route tables.
//!
//! `GET /api/system/info` on the primary router and `GET /v1/system/info` on
//! the gateway router (reachable through the gateway prefix or HTTP/2).

use std::time::Instant;

use async_trait::async_trait;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::kernel::{FeatureModule, KernelContext, ModuleError, SharedConfig};

/// Info route on the primary router.
pub const INFO_PATH: &str = "/api/system/info";
/// Info route on the gateway router.
pub const GATEWAY_INFO_PATH: &str = "/v1/system/info";

#[derive(Debug, Default)]
pub struct SystemModule {
    started_at: Option<Instant>,
}

#[derive(Clone)]
struct SystemState {
    started_at: Instant,
    config: SharedConfig,
}

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub mode: &'static str,
    pub uptime_secs: u64,
}

#[async_trait]
impl FeatureModule for SystemModule {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn init(&mut self, _ctx: &mut KernelContext) -> Result<(), ModuleError> {
        self.started_at = Some(Instant::now());
        Ok(())
    }

    async fn load(&mut self, ctx: &mut KernelContext) -> Result<(), ModuleError> {
        let state = SystemState {
            started_at: self
                .started_at
                .ok_or_else(|| ModuleError::msg("load ran before init"))?,
            config: ctx.shared_config(),
        };

        ctx.route_http(
            Router::new()
                .route(INFO_PATH, get(info))
                .with_state(state.clone()),
        )?;
        ctx.route_gateway(
            Router::new()
                .route(GATEWAY_INFO_PATH, get(info))
                .with_state(state),
        )?;

        ctx.on_config_change(|config| {
            tracing::info!(
                mode = config.mode.as_str(),
                log_level = config.log_directive(),
                "Configuration reloaded"
            );
        });
        Ok(())
    }
}

async fn info(State(state): State<SystemState>) -> Json<SystemInfo> {
    Json(SystemInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mode: state.config.load().mode.as_str(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
