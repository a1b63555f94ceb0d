//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! MuxListener (http1)
//!     → server.rs (hyper connection, middleware stack)
//!     → request.rs (request ID)
//!     → primary route table
//!         └─ {prefix}/… → gateway.rs (strip prefix) → secondary route table
//!
//! MuxListener (http2, prior knowledge)
//!     → server.rs → secondary route table
//! ```

pub mod gateway;
pub mod request;
pub mod server;

pub use gateway::{strip_prefix, GatewayRouter};
pub use request::{MakeGatewayRequestId, RequestIdExt, X_REQUEST_ID};
pub use server::{build_gateway_router, build_primary_router, DrainReport, HttpServer, HttpServerHandle, Protocol};
