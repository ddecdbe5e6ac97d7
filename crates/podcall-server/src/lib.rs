//! HTTP gateway for podcall.
//!
//! This crate exposes a [`CallRouter`](podcall_router::CallRouter) over HTTP:
//!
//! - `POST /invoke` routes a call envelope and returns the method's result
//! - Health, readiness and pool inspection endpoints
//! - An optional token-protected Admin API
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use podcall_server::{PodcallServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = podcall_orchestrator::connect(&runtime_config).await?;
//!     let router = Arc::new(CallRouter::new(orchestrator, runtime_config.router.clone())?);
//!
//!     PodcallServer::new(router.clone(), ServerConfig::default()).run().await?;
//!     router.shutdown().await;
//!
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod handler;
pub mod response;
pub mod router;
pub mod server;
pub mod state;

pub use response::ErrorResponse;
pub use router::AdminRouterConfig;
pub use server::{PodcallServer, ServerConfig, TestHandle};
pub use state::AppState;
