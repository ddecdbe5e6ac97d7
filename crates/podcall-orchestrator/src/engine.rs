//! Local container engine operations used by the single-host backend.

use std::time::Duration;

use async_trait::async_trait;

use podcall_common::OrchestratorError;

/// A container to create and start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Port the unit listens on inside the container.
    pub container_port: u16,
    /// Host interface to bind.
    pub host_ip: String,
    /// Host port mapped to `container_port`.
    pub host_port: u16,
}

/// The container engine operations the single-host backend relies on.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Build an image from a tar build context and apply every tag in `tags`.
    async fn build_image(&self, context: Vec<u8>, tags: &[String])
    -> Result<(), OrchestratorError>;

    /// Create and start a container, returning its id once started.
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, OrchestratorError>;

    /// Stop a container, killing it after `grace`.
    ///
    /// Unknown containers fail with [`OrchestratorError::NotFound`].
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), OrchestratorError>;

    /// Remove a stopped container.
    ///
    /// Unknown containers fail with [`OrchestratorError::NotFound`].
    async fn remove_container(&self, id: &str) -> Result<(), OrchestratorError>;
}
