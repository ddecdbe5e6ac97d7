//! Single-host backend.
//!
//! Builds the image directly from the artifact with the local container
//! engine and runs each unit as a container published on a pseudo-random
//! host port. Units are returned as soon as the engine reports them started.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use podcall_common::{
    CacheKeyStrategy, DockerConfig, ExecutionUnit, MethodIdentity, OrchestratorError,
};

use crate::cache_key::CacheKey;
use crate::engine::{ContainerEngine, ContainerSpec};
use crate::orchestrator::{Orchestrator, StartRequest};

/// Random draws before port allocation gives up.
const MAX_PORT_ATTEMPTS: usize = 64;

/// Orchestrator running units as containers on the local engine.
pub struct SingleHostOrchestrator {
    engine: Arc<dyn ContainerEngine>,
    config: DockerConfig,
    cache_key: CacheKeyStrategy,
    /// Per-identity instance counters for deterministic names.
    counters: DashMap<MethodIdentity, u32>,
    /// Host ports held by live units.
    ports: Mutex<HashSet<u16>>,
    /// Instance id -> host port.
    units: DashMap<String, u16>,
}

impl SingleHostOrchestrator {
    /// Create a single-host orchestrator on top of a container engine.
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        config: DockerConfig,
        cache_key: CacheKeyStrategy,
    ) -> Self {
        Self {
            engine,
            config,
            cache_key,
            counters: DashMap::new(),
            ports: Mutex::new(HashSet::new()),
            units: DashMap::new(),
        }
    }

    /// Number of units this orchestrator currently tracks.
    pub fn live_units(&self) -> usize {
        self.units.len()
    }

    /// Next deterministic instance name for `identity`.
    fn next_name(&self, identity: &MethodIdentity) -> String {
        let mut counter = self.counters.entry(identity.clone()).or_insert(0);
        *counter += 1;
        format!("{}-inst-{}", identity.slug(), *counter)
    }

    /// Reserve a host port not held by any live unit.
    fn allocate_port(&self) -> Result<u16, OrchestratorError> {
        let (start, end) = (self.config.port_range_start, self.config.port_range_end);
        if start >= end {
            return Err(OrchestratorError::deploy(format!(
                "Empty host port range [{start}, {end})"
            )));
        }

        let mut ports = self.ports.lock();
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_PORT_ATTEMPTS {
            let port = rng.gen_range(start..end);
            if ports.insert(port) {
                return Ok(port);
            }
        }

        Err(OrchestratorError::deploy(format!(
            "No free host port in [{start}, {end}) after {MAX_PORT_ATTEMPTS} attempts"
        )))
    }

    fn release_port(&self, port: u16) {
        self.ports.lock().remove(&port);
    }
}

#[async_trait]
impl Orchestrator for SingleHostOrchestrator {
    #[instrument(skip(self, request), fields(identity = %request.identity))]
    async fn start(&self, request: &StartRequest) -> Result<ExecutionUnit, OrchestratorError> {
        let identity = &request.identity;
        let slug = identity.slug();

        let cache_key = CacheKey::derive(&request.artifact, self.cache_key).await?;
        let context = tokio::fs::read(&request.artifact.path).await.map_err(|e| {
            OrchestratorError::build(format!(
                "Failed to read artifact {}: {e}",
                request.artifact.path.display()
            ))
        })?;

        let latest = format!("{slug}:latest");
        let tags = vec![latest.clone(), format!("{slug}:{cache_key}")];
        self.engine.build_image(context, &tags).await?;
        debug!(image = %latest, cache_key = %cache_key, "Image ready");

        let host_port = self.allocate_port()?;
        let spec = ContainerSpec {
            name: self.next_name(identity),
            image: latest,
            container_port: self.config.unit_port,
            host_ip: self.config.host.clone(),
            host_port,
        };

        let instance_id = match self.engine.run_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                self.release_port(host_port);
                return Err(e);
            }
        };
        self.units.insert(instance_id.clone(), host_port);

        info!(
            instance_id = %instance_id,
            name = %spec.name,
            host_port,
            "Execution unit started"
        );
        Ok(ExecutionUnit::new(
            instance_id,
            identity.clone(),
            self.config.host.clone(),
            host_port,
        ))
    }

    #[instrument(skip(self))]
    async fn stop(&self, instance_id: &str) -> Result<(), OrchestratorError> {
        let Some(host_port) = self.units.get(instance_id).map(|entry| *entry) else {
            return Err(OrchestratorError::not_found(instance_id));
        };

        // The unit stays tracked, and its port reserved, until the engine
        // confirms the container is gone.
        match self
            .engine
            .stop_container(instance_id, self.config.stop_grace())
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("Container already stopped"),
            Err(e) => {
                warn!(error = %e, "Failed to stop execution unit");
                return Err(e);
            }
        }
        match self.engine.remove_container(instance_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("Container already removed"),
            Err(e) => {
                warn!(error = %e, "Failed to remove execution unit");
                return Err(e);
            }
        }

        if self.units.remove(instance_id).is_some() {
            self.release_port(host_port);
        }
        info!("Execution unit stopped");
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), OrchestratorError> {
        if !self.units.is_empty() {
            warn!(
                remaining = self.units.len(),
                "Cleanup with units still running"
            );
        }
        debug!("Single-host backend has no shared resources to release");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    struct NullEngine;

    #[async_trait]
    impl ContainerEngine for NullEngine {
        async fn build_image(
            &self,
            _context: Vec<u8>,
            _tags: &[String],
        ) -> Result<(), OrchestratorError> {
            Ok(())
        }

        async fn run_container(&self, spec: &ContainerSpec) -> Result<String, OrchestratorError> {
            Ok(spec.name.clone())
        }

        async fn stop_container(
            &self,
            _id: &str,
            _grace: Duration,
        ) -> Result<(), OrchestratorError> {
            Ok(())
        }

        async fn remove_container(&self, _id: &str) -> Result<(), OrchestratorError> {
            Ok(())
        }
    }

    fn orchestrator(start: u16, end: u16) -> SingleHostOrchestrator {
        SingleHostOrchestrator::new(
            Arc::new(NullEngine),
            DockerConfig {
                port_range_start: start,
                port_range_end: end,
                ..Default::default()
            },
            CacheKeyStrategy::ByteLength,
        )
    }

    #[test]
    fn test_ports_never_collide() {
        let orchestrator = orchestrator(7000, 7004);
        let mut seen = HashSet::new();
        for _ in 0..4 {
            // Four ports, four draws: some retries will be needed but each
            // allocation must be distinct.
            if let Ok(port) = orchestrator.allocate_port() {
                assert!((7000..7004).contains(&port));
                assert!(seen.insert(port));
            }
        }
    }

    #[test]
    fn test_port_range_exhausted() {
        let orchestrator = orchestrator(7000, 7001);
        assert_eq!(orchestrator.allocate_port().unwrap(), 7000);
        assert!(matches!(
            orchestrator.allocate_port(),
            Err(OrchestratorError::Deploy { .. })
        ));

        orchestrator.release_port(7000);
        assert_eq!(orchestrator.allocate_port().unwrap(), 7000);
    }

    #[test]
    fn test_empty_range() {
        assert!(orchestrator(7000, 7000).allocate_port().is_err());
    }

    #[test]
    fn test_names_count_per_identity() {
        let orchestrator = orchestrator(7000, 8000);
        let greet = MethodIdentity::new("Greeter", "Greet");
        let ping = MethodIdentity::new("Health", "Ping");

        assert_eq!(orchestrator.next_name(&greet), "greeter-greet-cae1c917-inst-1");
        assert_eq!(orchestrator.next_name(&greet), "greeter-greet-cae1c917-inst-2");
        assert_eq!(orchestrator.next_name(&ping), "health-ping-0eafd471-inst-1");
    }
}
