//! Service gateway library.
//!
//! One listening socket carries two protocols: HTTP/1 traffic is served by
//! the primary router, HTTP/2 prior-knowledge traffic by the gateway router.
//! HTTP/1 requests under the reserved prefix reach the gateway router too,
//! in-process. Feature modules are brought up through five ordered lifecycle
//! phases before any traffic is accepted, and torn down in a fixed order
//! under a drain deadline.

pub mod config;
pub mod health;
pub mod http;
pub mod kernel;
pub mod lifecycle;
pub mod modules;
pub mod net;
pub mod observability;

pub use config::schema::GatewayConfig;
pub use kernel::{FeatureModule, KernelContext};
pub use lifecycle::{launch, RunningKernel};
