//! The orchestrator capability set and backend selection.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use podcall_common::{
    ArtifactRef, Backend, ExecutionUnit, MethodIdentity, OrchestratorError, RuntimeConfig,
};

use crate::clustered::ClusterOrchestrator;
use crate::docker_engine::DockerEngine;
use crate::kube_cluster::KubeCluster;
use crate::registry::RegistryClient;
use crate::single_host::SingleHostOrchestrator;

/// Everything a backend needs to start one execution unit.
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// The method the unit will serve.
    pub identity: MethodIdentity,
    /// The build context produced by the artifact builder.
    pub artifact: ArtifactRef,
}

impl StartRequest {
    /// Create a start request.
    pub fn new(identity: MethodIdentity, artifact: ArtifactRef) -> Self {
        Self { identity, artifact }
    }
}

/// Lifecycle operations on execution units.
///
/// Implemented by the single-host and the clustered backend. A backend owns
/// every remote resource it creates; callers keep only the returned
/// [`ExecutionUnit`] and hand its instance id back to [`Orchestrator::stop`].
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Build (if needed) and deploy a fresh unit for the requested method.
    async fn start(&self, request: &StartRequest) -> Result<ExecutionUnit, OrchestratorError>;

    /// Stop and remove a unit previously returned by [`Orchestrator::start`].
    ///
    /// Unknown instance ids fail with [`OrchestratorError::NotFound`].
    async fn stop(&self, instance_id: &str) -> Result<(), OrchestratorError>;

    /// Release shared helper resources. Safe to call more than once.
    async fn cleanup(&self) -> Result<(), OrchestratorError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Connect the backend selected by the configuration.
///
/// # Errors
///
/// Returns an error if the container engine or the cluster cannot be reached.
pub async fn connect(config: &RuntimeConfig) -> Result<Arc<dyn Orchestrator>, OrchestratorError> {
    let orchestrator: Arc<dyn Orchestrator> = match config.orchestrator.backend {
        Backend::Docker => {
            let engine = DockerEngine::connect()?;
            Arc::new(SingleHostOrchestrator::new(
                Arc::new(engine),
                config.orchestrator.docker.clone(),
                config.orchestrator.cache_key,
            ))
        }
        Backend::Kubernetes => {
            let cluster = KubeCluster::connect(&config.orchestrator.kubernetes).await?;
            let registry = RegistryClient::new(config.registry.clone())?;
            Arc::new(ClusterOrchestrator::new(
                Arc::new(cluster),
                Arc::new(registry),
                config.orchestrator.kubernetes.clone(),
                config.registry.clone(),
                config.orchestrator.cache_key,
            ))
        }
    };

    info!(backend = orchestrator.name(), "Orchestrator connected");
    Ok(orchestrator)
}
