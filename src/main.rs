//! Podcall CLI entry point.
//!
//! Loads the configuration file, connects the orchestrator backend,
//! registers and warms up the declared methods, and serves the HTTP
//! gateway until a shutdown signal arrives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use podcall_common::{ArtifactRef, ConfigFile};
use podcall_router::{CallRouter, MethodRegistration};
use podcall_server::{AdminRouterConfig, PodcallServer, ServerConfig};

/// Turn functions into containerized services and route calls to them.
#[derive(Debug, Parser)]
#[command(name = "podcall", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "PODCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the gateway bind address (e.g. 127.0.0.1:8080).
    #[arg(short, long, env = "PODCALL_BIND")]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,podcall=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting podcall");

    // Load configuration
    let config = match &args.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            info!("No config file given, using defaults");
            ConfigFile::default()
        }
    };

    let mut server_config = ServerConfig::from_file(&config.server).context(
        "Invalid server.bind_addr format. Expected format: 'host:port' (e.g., '0.0.0.0:8080')",
    )?;
    if let Some(bind) = args.bind {
        server_config = server_config.with_bind_addr(bind);
    }

    info!(
        backend = ?config.runtime.orchestrator.backend,
        bind_addr = %server_config.bind_addr,
        methods = config.methods.len(),
        "Configuration loaded"
    );

    // Connect the orchestrator and register methods
    let orchestrator = podcall_orchestrator::connect(&config.runtime)
        .await
        .context("Failed to connect orchestrator backend")?;
    let router = Arc::new(
        CallRouter::new(orchestrator, config.runtime.router.clone())
            .context("Failed to create call router")?,
    );

    for entry in &config.methods {
        let artifact = ArtifactRef::from_path(&entry.artifact).with_context(|| {
            format!("Failed to read artifact {}", entry.artifact.display())
        })?;
        let registration = MethodRegistration::new(entry.identity(), artifact)
            .with_policy(entry.policy())
            .returning(entry.returns);
        router.register(registration);
    }

    router.warm_up().await;

    // Create and run server
    let mut server = PodcallServer::new(router.clone(), server_config);
    if config.admin.enabled {
        match &config.admin.token {
            Some(token) => {
                info!(prefix = %config.admin.prefix, "Admin API enabled");
                server = server.with_admin(AdminRouterConfig {
                    prefix: config.admin.prefix.clone(),
                    token: token.clone(),
                });
            }
            None => warn!("Admin API enabled without a token, not mounting it"),
        }
    }

    info!("Server initialized. Available endpoints:");
    info!("  POST /invoke              - Route a call envelope");
    info!("  GET  /health              - Health check");
    info!("  GET  /ready               - Readiness check");
    info!("  GET  /pools               - Pooled units per method");

    let served = server.run().await;

    // Stop pooled units even if the server failed
    router.shutdown().await;

    served.context("HTTP server failed")?;
    Ok(())
}
