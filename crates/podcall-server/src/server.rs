//! HTTP server implementation.
//!
//! This module provides the main [`PodcallServer`] struct for running
//! the podcall gateway.

use std::io;
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info};

use podcall_common::config_file::ServerConfigFile;
use podcall_router::CallRouter;

use crate::router::{AdminRouterConfig, build_router_with_admin};
use crate::state::AppState;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server.
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Enable graceful shutdown on SIGTERM/SIGINT.
    pub graceful_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout_secs: 120,
            graceful_shutdown: true,
        }
    }
}

impl ServerConfig {
    /// Build the server config from its configuration file section.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is not `host:port`.
    pub fn from_file(file: &ServerConfigFile) -> Result<Self, AddrParseError> {
        Ok(Self {
            bind_addr: file.bind_addr.parse()?,
            request_timeout_secs: file.request_timeout_secs,
            graceful_shutdown: file.graceful_shutdown,
        })
    }

    /// Override the bind address (the CLI `--bind` flag).
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Get the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Podcall HTTP gateway.
///
/// Exposes a [`CallRouter`] over HTTP.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use podcall_server::{PodcallServer, ServerConfig};
///
/// let router = Arc::new(CallRouter::new(orchestrator, RouterConfig::default())?);
/// router.warm_up().await;
///
/// PodcallServer::new(router.clone(), ServerConfig::default()).run().await?;
/// router.shutdown().await;
/// ```
pub struct PodcallServer {
    /// Application state.
    state: AppState,
    /// Server configuration.
    config: ServerConfig,
    /// Admin API, if enabled.
    admin: Option<AdminRouterConfig>,
}

impl PodcallServer {
    /// Create a new server instance.
    ///
    /// # Arguments
    ///
    /// * `router` - The call router to expose
    /// * `config` - Configuration for the HTTP server
    pub fn new(router: Arc<CallRouter>, config: ServerConfig) -> Self {
        Self {
            state: AppState::new(router),
            config,
            admin: None,
        }
    }

    /// Mount the Admin API.
    #[must_use]
    pub fn with_admin(mut self, admin: AdminRouterConfig) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Get a reference to the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server until shutdown.
    ///
    /// This will block until the server is shut down via signal
    /// (SIGTERM/SIGINT) if graceful shutdown is enabled. Pooled units are
    /// left running; the caller shuts the router down afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the address.
    pub async fn run(self) -> io::Result<()> {
        let app = build_router_with_admin(self.state, self.config.request_timeout(), self.admin);

        let listener = TcpListener::bind(&self.config.bind_addr).await?;

        info!(addr = %self.config.bind_addr, "Starting HTTP server");

        if self.config.graceful_shutdown {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        } else {
            axum::serve(listener, app).await?;
        }

        info!("Server shutdown complete");
        Ok(())
    }

    /// Start the server and return a handle for testing.
    ///
    /// The server binds to an ephemeral port (127.0.0.1:0) and
    /// returns a handle that can be used to get the actual address
    /// and shut down the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start_test(
        router: Arc<CallRouter>,
        admin: Option<AdminRouterConfig>,
    ) -> io::Result<TestHandle> {
        let state = AppState::new(router);
        let app = build_router_with_admin(state.clone(), Duration::from_secs(30), admin);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(TestHandle {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle for a test server instance.
///
/// Use this to interact with and shut down a test server.
pub struct TestHandle {
    /// The address the server is bound to.
    addr: SocketAddr,
    /// Application state (for registering methods).
    state: AppState,
    /// Shutdown signal sender.
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    /// Server task handle.
    handle: tokio::task::JoinHandle<io::Result<()>>,
}

impl TestHandle {
    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the server URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown the server gracefully.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// A handler that cannot be installed never fires; the other one still
/// shuts the server down.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
