//! Installs the Prometheus exporter as the process telemetry agent.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::kernel::{FeatureModule, KernelContext, ModuleError};
use crate::observability::MetricsAgent;

#[derive(Debug, Default)]
pub struct TelemetryModule;

#[async_trait]
impl FeatureModule for TelemetryModule {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    async fn pre_init(&mut self, ctx: &mut KernelContext) -> Result<(), ModuleError> {
        let config = ctx.config();
        if !config.observability.metrics_enabled {
            tracing::debug!("Metrics exporter disabled");
            return Ok(());
        }

        let address: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|e| ModuleError::failed("parse observability.metrics_address", e))?;

        let agent = MetricsAgent::install(address)
            .map_err(|e| ModuleError::failed("install metrics exporter", e))?;
        tracing::debug!(address = %agent.address(), "Telemetry agent registered");
        ctx.set_telemetry_agent(agent);
        Ok(())
    }
}
