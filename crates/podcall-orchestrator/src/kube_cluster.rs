//! Kubernetes implementation of [`ClusterApi`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{AttachParams, DeleteParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, Config};
use serde_json::{Value, json};
use tracing::{debug, info};

use podcall_common::{KubernetesConfig, OrchestratorError};

use crate::cluster::{APP_LABEL, ClusterApi, ExecSession, ServiceSpec, WorkloadSpec};
use crate::readiness::await_first;

/// Cluster client scoped to one namespace.
pub struct KubeCluster {
    pods: Api<Pod>,
    services: Api<Service>,
}

impl KubeCluster {
    /// Connect using the configured kubeconfig context, or the inferred
    /// configuration (in-cluster or default context) when none is set.
    ///
    /// # Errors
    ///
    /// Returns a deploy error if no usable cluster configuration is found.
    pub async fn connect(config: &KubernetesConfig) -> Result<Self, OrchestratorError> {
        let kube_config = match &config.context {
            Some(context) => Config::from_kubeconfig(&KubeConfigOptions {
                context: Some(context.clone()),
                ..Default::default()
            })
            .await
            .map_err(|e| {
                OrchestratorError::deploy(format!("Failed to load kube context {context}: {e}"))
            })?,
            None => Config::infer().await.map_err(|e| {
                OrchestratorError::deploy(format!("Failed to infer cluster config: {e}"))
            })?,
        };

        let client = Client::try_from(kube_config)
            .map_err(|e| OrchestratorError::deploy(format!("Failed to create kube client: {e}")))?;

        info!(
            context = config.context.as_deref().unwrap_or("inferred"),
            namespace = %config.namespace,
            "Connected to cluster"
        );
        Ok(Self::new(client, &config.namespace))
    }

    /// Wrap an existing client.
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client.clone(), namespace),
            services: Api::namespaced(client, namespace),
        }
    }
}

/// Pod manifest for a workload.
fn pod_manifest(spec: &WorkloadSpec) -> Value {
    let mut container = json!({
        "name": spec.container,
        "image": spec.image,
        "imagePullPolicy": if spec.always_pull { "Always" } else { "IfNotPresent" },
    });
    if let Some(port) = spec.port {
        container["ports"] = json!([{ "containerPort": port }]);
    }
    if spec.privileged {
        container["securityContext"] = json!({ "privileged": true });
    }

    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": spec.name, "labels": spec.labels },
        "spec": { "containers": [container] },
    })
}

/// Service manifest for an identity group.
fn service_manifest(spec: &ServiceSpec) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": spec.name,
            "labels": BTreeMap::from([APP_LABEL]),
        },
        "spec": {
            "selector": spec.selector,
            "ports": [{ "port": spec.port, "targetPort": spec.port }],
        },
    })
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some("Running")
}

fn cluster_ip(service: &Service) -> Option<String> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.clone())
        .filter(|ip| !ip.is_empty() && ip != "None")
}

fn name_selector(name: &str) -> watcher::Config {
    watcher::Config::default().fields(&format!("metadata.name={name}"))
}

fn is_missing(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_pod(&self, spec: &WorkloadSpec) -> Result<String, OrchestratorError> {
        let pod: Pod = serde_json::from_value(pod_manifest(spec))
            .map_err(|e| OrchestratorError::deploy(format!("Invalid pod manifest: {e}")))?;

        let created = self
            .pods
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| {
                OrchestratorError::deploy(format!("Failed to create pod {}: {e}", spec.name))
            })?;

        let name = created.metadata.name.unwrap_or_else(|| spec.name.clone());
        debug!(pod = %name, image = %spec.image, "Pod created");
        Ok(name)
    }

    async fn wait_for_running(
        &self,
        pod: &str,
        timeout: Duration,
    ) -> Result<(), OrchestratorError> {
        let events = watcher(self.pods.clone(), name_selector(pod)).applied_objects();
        await_first(&format!("pod {pod}"), events, timeout, is_running).await?;
        Ok(())
    }

    async fn delete_pod(&self, pod: &str) -> Result<bool, OrchestratorError> {
        match self.pods.delete(pod, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(OrchestratorError::deploy(format!(
                "Failed to delete pod {pod}: {e}"
            ))),
        }
    }

    async fn ensure_service(
        &self,
        spec: &ServiceSpec,
        timeout: Duration,
    ) -> Result<String, OrchestratorError> {
        let existing = self.services.get_opt(&spec.name).await.map_err(|e| {
            OrchestratorError::deploy(format!("Failed to look up service {}: {e}", spec.name))
        })?;

        let service = if let Some(service) = existing {
            service
        } else {
            let manifest: Service = serde_json::from_value(service_manifest(spec))
                .map_err(|e| OrchestratorError::deploy(format!("Invalid service manifest: {e}")))?;
            let created = self
                .services
                .create(&PostParams::default(), &manifest)
                .await
                .map_err(|e| {
                    OrchestratorError::deploy(format!(
                        "Failed to create service {}: {e}",
                        spec.name
                    ))
                })?;
            info!(service = %spec.name, "Service created");
            created
        };

        if let Some(ip) = cluster_ip(&service) {
            return Ok(ip);
        }

        let events = watcher(self.services.clone(), name_selector(&spec.name)).applied_objects();
        let ready = await_first(&format!("service {}", spec.name), events, timeout, |s: &Service| {
            cluster_ip(s).is_some()
        })
        .await?;

        cluster_ip(&ready).ok_or_else(|| {
            OrchestratorError::deploy(format!("Service {} has no cluster address", spec.name))
        })
    }

    async fn delete_service(&self, name: &str) -> Result<bool, OrchestratorError> {
        match self.services.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(OrchestratorError::deploy(format!(
                "Failed to delete service {name}: {e}"
            ))),
        }
    }

    async fn exec(
        &self,
        pod: &str,
        container: &str,
        argv: Vec<String>,
    ) -> Result<ExecSession, OrchestratorError> {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(false);

        let mut process = self
            .pods
            .exec(pod, argv, &params)
            .await
            .map_err(|e| OrchestratorError::build(format!("Exec in pod {pod} failed: {e}")))?;

        let stdout = process
            .stdout()
            .ok_or_else(|| OrchestratorError::build("Exec session has no standard output"))?;

        Ok(ExecSession::new(stdout, move || process.abort()))
    }
}
