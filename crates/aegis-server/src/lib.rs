//! # aegis-server
//!
//! HTTP gateway and process wiring for the Aegis control plane. The gateway
//! middleware verifies bearer tokens, builds the per-request
//! [`RequestContext`](aegis_core::RequestContext) and enforces rate limits
//! before any handler runs.

pub mod admin;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod maintenance;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{AppConfig, ConfigError, ServerConfig, StorageBackend};
pub use error::{ApiError, ApiResult};
pub use extract::Authenticated;
pub use observability::init_tracing;
pub use server::{AegisServer, build_router};
pub use state::{AppState, Backends};
