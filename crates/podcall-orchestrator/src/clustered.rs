//! Clustered backend.
//!
//! Deploying a unit runs through five stages:
//!
//! 1. Make sure a service endpoint exists for the method and has an address.
//! 2. Ask the registry whether an image tagged with the artifact's cache key
//!    already exists. Probe failures count as "build needed".
//! 3. If a build is needed, lazily start the build agent, transfer the
//!    artifact, build, log in and push. Otherwise tear the agent down.
//! 4. Schedule a fresh unit pod on the floating `latest` tag.
//! 5. Wait for the pod to run and hand back the service address.
//!
//! The build agent is torn down whenever a build stage fails, and units that
//! never become ready are deleted before the error is returned.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use podcall_common::{
    ArtifactRef, CacheKeyStrategy, ExecutionUnit, KubernetesConfig, MethodIdentity,
    OrchestratorError, RegistryConfig,
};

use crate::build_agent::{BuildAgent, BuildAgentProtocol};
use crate::cache_key::CacheKey;
use crate::cluster::{APP_LABEL, ClusterApi, METHOD_LABEL, ServiceSpec, WorkloadSpec};
use crate::orchestrator::{Orchestrator, StartRequest};
use crate::registry::{ImageCoordinates, TagRegistry};

/// Name prefix of build agent pods.
pub const AGENT_PREFIX: &str = "podcall-build-agent";

/// Container name inside the build agent pod.
const AGENT_CONTAINER: &str = "builder";

/// Container name inside unit pods.
const UNIT_CONTAINER: &str = "unit";

/// Role label marking the build agent.
const ROLE_LABEL: (&str, &str) = ("podcall/role", "build-agent");

/// Orchestrator deploying units as pods behind one service per method.
pub struct ClusterOrchestrator {
    cluster: Arc<dyn ClusterApi>,
    registry: Arc<dyn TagRegistry>,
    protocol: BuildAgentProtocol,
    config: KubernetesConfig,
    registry_config: RegistryConfig,
    cache_key: CacheKeyStrategy,
    /// The build agent, if one is running. Held for the whole build.
    agent: Mutex<Option<BuildAgent>>,
    /// Service name -> cluster address, for services created by this orchestrator.
    services: Mutex<HashMap<String, String>>,
    /// Image references (`repo:cache_key`) pushed during this run.
    built: parking_lot::Mutex<HashSet<String>>,
    /// Unit pod name -> method.
    units: DashMap<String, MethodIdentity>,
}

fn short_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

impl ClusterOrchestrator {
    /// Create a clustered orchestrator.
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        registry: Arc<dyn TagRegistry>,
        config: KubernetesConfig,
        registry_config: RegistryConfig,
        cache_key: CacheKeyStrategy,
    ) -> Self {
        let protocol = BuildAgentProtocol::new(cluster.clone(), &config);
        Self {
            cluster,
            registry,
            protocol,
            config,
            registry_config,
            cache_key,
            agent: Mutex::new(None),
            services: Mutex::new(HashMap::new()),
            built: parking_lot::Mutex::new(HashSet::new()),
            units: DashMap::new(),
        }
    }

    /// Name of the running build agent pod, if any.
    pub async fn agent_pod(&self) -> Option<String> {
        self.agent.lock().await.as_ref().map(|agent| agent.pod.clone())
    }

    /// Number of unit pods this orchestrator currently tracks.
    pub fn live_units(&self) -> usize {
        self.units.len()
    }

    fn selector(slug: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (APP_LABEL.0.to_string(), APP_LABEL.1.to_string()),
            (METHOD_LABEL.to_string(), slug.to_string()),
        ])
    }

    /// Return the service address for `slug`, creating the service on first use.
    async fn ensure_service(&self, slug: &str) -> Result<String, OrchestratorError> {
        let mut services = self.services.lock().await;
        if let Some(address) = services.get(slug) {
            return Ok(address.clone());
        }

        let spec = ServiceSpec {
            name: slug.to_string(),
            selector: Self::selector(slug),
            port: self.config.unit_port,
        };
        let address = self
            .cluster
            .ensure_service(&spec, self.config.readiness_timeout())
            .await?;

        info!(service = %slug, address = %address, "Service endpoint ready");
        services.insert(slug.to_string(), address.clone());
        Ok(address)
    }

    /// Create the build agent and wait until it runs.
    async fn create_agent(&self) -> Result<BuildAgent, OrchestratorError> {
        let pod = format!("{AGENT_PREFIX}-{}", short_id());
        let spec = WorkloadSpec {
            name: pod.clone(),
            container: AGENT_CONTAINER.to_string(),
            image: self.config.agent_image.clone(),
            labels: BTreeMap::from([
                (APP_LABEL.0.to_string(), APP_LABEL.1.to_string()),
                (ROLE_LABEL.0.to_string(), ROLE_LABEL.1.to_string()),
            ]),
            port: None,
            privileged: true,
            always_pull: false,
        };

        let pod = self.cluster.create_pod(&spec).await?;
        if let Err(e) = self
            .cluster
            .wait_for_running(&pod, self.config.readiness_timeout())
            .await
        {
            self.delete_quietly(&pod).await;
            return Err(e);
        }

        info!(pod = %pod, "Build agent running");
        Ok(BuildAgent {
            pod,
            container: AGENT_CONTAINER.to_string(),
        })
    }

    /// Tear down the agent held in `slot`, if any. Failures are logged.
    async fn teardown_agent(&self, slot: &mut Option<BuildAgent>) {
        if let Some(agent) = slot.take() {
            self.delete_quietly(&agent.pod).await;
            info!(pod = %agent.pod, "Build agent torn down");
        }
    }

    async fn delete_quietly(&self, pod: &str) {
        if let Err(e) = self.cluster.delete_pod(pod).await {
            warn!(pod = %pod, error = %e, "Failed to delete pod");
        }
    }

    /// Run the build stages on the agent, creating it first if needed.
    ///
    /// The agent is torn down if any stage fails.
    async fn build_and_push(
        &self,
        image: &ImageCoordinates,
        cache_key: &CacheKey,
        artifact: &ArtifactRef,
    ) -> Result<(), OrchestratorError> {
        let reference = image.reference(cache_key.as_str());
        let mut slot = self.agent.lock().await;

        // A concurrent start may have pushed the same image while we waited.
        if self.built.lock().contains(&reference) {
            debug!(image = %reference, "Image pushed by a concurrent deploy");
            return Ok(());
        }

        let agent = match slot.as_ref() {
            Some(agent) => agent.clone(),
            None => {
                let agent = self.create_agent().await?;
                *slot = Some(agent.clone());
                agent
            }
        };

        let outcome = async {
            let context = self.protocol.transfer_artifact(&agent, artifact).await?;
            self.protocol
                .build(&agent, &context, image, cache_key)
                .await?;
            if self.registry_config.requires_login() {
                self.protocol.login(&agent, &self.registry_config).await?;
            }
            self.protocol.push(&agent, image).await
        }
        .await;

        match outcome {
            Ok(()) => {
                self.built.lock().insert(reference);
                Ok(())
            }
            Err(e) => {
                error!(image = %image.repository(), error = %e, "Build failed");
                self.teardown_agent(&mut slot).await;
                Err(e)
            }
        }
    }

    /// Schedule a unit pod and wait until it runs.
    async fn schedule_unit(
        &self,
        identity: &MethodIdentity,
        image: &ImageCoordinates,
    ) -> Result<String, OrchestratorError> {
        let slug = identity.slug();
        let mut name = format!("{slug}-{}", short_id());
        if name.len() > 63 {
            // Keep the random suffix; the slug already fits a DNS label.
            name = format!("{}-{}", &slug[..54], short_id());
        }

        let spec = WorkloadSpec {
            name,
            container: UNIT_CONTAINER.to_string(),
            image: image.reference("latest"),
            labels: Self::selector(&slug),
            port: Some(self.config.unit_port),
            privileged: false,
            always_pull: true,
        };

        let pod = self.cluster.create_pod(&spec).await?;
        if let Err(e) = self
            .cluster
            .wait_for_running(&pod, self.config.readiness_timeout())
            .await
        {
            error!(pod = %pod, error = %e, "Unit did not become ready");
            self.delete_quietly(&pod).await;
            return Err(e);
        }

        Ok(pod)
    }
}

#[async_trait]
impl Orchestrator for ClusterOrchestrator {
    #[instrument(skip(self, request), fields(identity = %request.identity))]
    async fn start(&self, request: &StartRequest) -> Result<ExecutionUnit, OrchestratorError> {
        let identity = &request.identity;
        let slug = identity.slug();
        let image = ImageCoordinates::for_identity(&self.registry_config, identity);
        let cache_key = CacheKey::derive(&request.artifact, self.cache_key).await?;

        let address = self.ensure_service(&slug).await?;

        let reference = image.reference(cache_key.as_str());
        let built_this_run = self.built.lock().contains(&reference);
        let needs_build =
            !built_this_run && self.registry.needs_build(&image, &cache_key).await;

        if needs_build {
            info!(image = %reference, "Building image");
            self.build_and_push(&image, &cache_key, &request.artifact)
                .await?;
        } else {
            debug!(image = %reference, "Image up to date, skipping build");
            let mut slot = self.agent.lock().await;
            self.teardown_agent(&mut slot).await;
        }

        let pod = self.schedule_unit(identity, &image).await?;
        self.units.insert(pod.clone(), identity.clone());

        info!(instance_id = %pod, address = %address, "Execution unit started");
        Ok(ExecutionUnit::new(
            pod,
            identity.clone(),
            address,
            self.config.unit_port,
        ))
    }

    #[instrument(skip(self))]
    async fn stop(&self, instance_id: &str) -> Result<(), OrchestratorError> {
        if !self.units.contains_key(instance_id) {
            return Err(OrchestratorError::not_found(instance_id));
        }
        let deleted = self.cluster.delete_pod(instance_id).await.inspect_err(|e| {
            warn!(error = %e, "Failed to delete unit pod");
        })?;
        self.units.remove(instance_id);
        if !deleted {
            return Err(OrchestratorError::not_found(instance_id));
        }
        info!("Execution unit stopped");
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), OrchestratorError> {
        let mut slot = self.agent.lock().await;
        self.teardown_agent(&mut slot).await;
        drop(slot);

        let services: Vec<String> = self
            .services
            .lock()
            .await
            .drain()
            .map(|(name, _)| name)
            .collect();
        for name in services {
            match self.cluster.delete_service(&name).await {
                Ok(_) => debug!(service = %name, "Service deleted"),
                Err(e) => warn!(service = %name, error = %e, "Failed to delete service"),
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }
}
