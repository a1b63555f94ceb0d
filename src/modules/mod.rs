//! Built-in feature modules.
//!
//! Registration order is lifecycle order: telemetry first so later modules'
//! metrics have a recorder, then the health endpoint, then system info.

pub mod health;
pub mod system;
pub mod telemetry;

pub use health::HealthModule;
pub use system::SystemModule;
pub use telemetry::TelemetryModule;

use crate::kernel::FeatureModule;

/// Built-in modules, in registration order.
pub fn registered() -> Vec<Box<dyn FeatureModule>> {
    vec![
        Box::new(TelemetryModule::default()),
        Box::new(HealthModule),
        Box::new(SystemModule::default()),
    ]
}
