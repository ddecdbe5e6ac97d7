//! Docker Engine API client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{BuildImageOptions, TagImageOptions};
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;
use tracing::{debug, trace};

use podcall_common::OrchestratorError;

use crate::engine::{ContainerEngine, ContainerSpec};

/// [`ContainerEngine`] backed by the local Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the local Docker daemon using the platform defaults
    /// (`DOCKER_HOST` or the local socket).
    ///
    /// # Errors
    ///
    /// Returns a deploy error if the client cannot be configured.
    pub fn connect() -> Result<Self, OrchestratorError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| OrchestratorError::deploy(format!("Failed to connect to Docker: {e}")))?;
        Ok(Self { docker })
    }
}

/// Split `repo:tag` at the last colon that is not part of a registry port.
fn split_reference(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (reference, "latest"),
    }
}

fn is_not_found(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn build_image(
        &self,
        context: Vec<u8>,
        tags: &[String],
    ) -> Result<(), OrchestratorError> {
        let Some((primary, extra)) = tags.split_first() else {
            return Err(OrchestratorError::build("No image tag given"));
        };

        let options = BuildImageOptions {
            t: primary.clone(),
            rm: true,
            ..Default::default()
        };

        let mut progress = self
            .docker
            .build_image(options, None, Some(bytes::Bytes::from(context)));
        while let Some(event) = progress.next().await {
            let info = event.map_err(|e| OrchestratorError::build(e.to_string()))?;
            if let Some(error) = info.error {
                return Err(OrchestratorError::build(error));
            }
            if let Some(line) = info.stream {
                trace!(line = line.trim_end(), "docker build");
            }
        }

        for tag in extra {
            let (repo, tag) = split_reference(tag);
            self.docker
                .tag_image(primary, Some(TagImageOptions { repo, tag }))
                .await
                .map_err(|e| OrchestratorError::build(format!("Failed to tag image: {e}")))?;
        }

        debug!(image = %primary, "Image built");
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, OrchestratorError> {
        let container_port = format!("{}/tcp", spec.container_port);

        let config = Config {
            image: Some(spec.image.clone()),
            exposed_ports: Some(HashMap::from([(container_port.clone(), HashMap::new())])),
            host_config: Some(HostConfig {
                port_bindings: Some(HashMap::from([(
                    container_port,
                    Some(vec![PortBinding {
                        host_ip: Some(spec.host_ip.clone()),
                        host_port: Some(spec.host_port.to_string()),
                    }]),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| OrchestratorError::deploy(format!("Failed to create container: {e}")))?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| OrchestratorError::deploy(format!("Failed to start container: {e}")))?;

        Ok(created.id)
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), OrchestratorError> {
        let t = i64::try_from(grace.as_secs()).unwrap_or(i64::MAX);
        self.docker
            .stop_container(id, Some(StopContainerOptions { t }))
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    OrchestratorError::not_found(id)
                } else {
                    OrchestratorError::deploy(format!("Failed to stop container: {e}"))
                }
            })
    }

    async fn remove_container(&self, id: &str) -> Result<(), OrchestratorError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    OrchestratorError::not_found(id)
                } else {
                    OrchestratorError::deploy(format!("Failed to remove container: {e}"))
                }
            })
    }
}
