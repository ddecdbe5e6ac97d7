//! Cluster operations used by the clustered backend.
//!
//! [`ClusterApi`] is the seam between the deploy state machine in
//! [`crate::clustered`] and the Kubernetes client in
//! [`crate::kube_cluster`].

use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use podcall_common::OrchestratorError;

/// Label carried by every object podcall creates.
pub const APP_LABEL: (&str, &str) = ("app", "podcall");

/// Label key grouping units (and their service) by method.
pub const METHOD_LABEL: &str = "podcall/method";

/// A pod to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// Pod name.
    pub name: String,
    /// Name of the single container.
    pub container: String,
    /// Image reference.
    pub image: String,
    /// Labels applied to the pod.
    pub labels: BTreeMap<String, String>,
    /// Container port to declare.
    pub port: Option<u16>,
    /// Run the container privileged.
    pub privileged: bool,
    /// Always pull the image (floating tags).
    pub always_pull: bool,
}

/// A service endpoint to ensure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Service name.
    pub name: String,
    /// Pod selector.
    pub selector: BTreeMap<String, String>,
    /// Service port, forwarded to the same container port.
    pub port: u16,
}

/// Output side of a command running inside a pod.
///
/// Dropping the session aborts the remote attachment.
pub struct ExecSession {
    stdout: Pin<Box<dyn AsyncRead + Send>>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl ExecSession {
    /// Wrap a standard output reader and the action that tears the session down.
    pub fn new(
        stdout: impl AsyncRead + Send + 'static,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            stdout: Box::pin(stdout),
            on_close: Some(Box::new(on_close)),
        }
    }

    /// Standard output of the remote command.
    pub fn stdout(&mut self) -> Pin<&mut (dyn AsyncRead + Send + 'static)> {
        self.stdout.as_mut()
    }
}

impl Drop for ExecSession {
    fn drop(&mut self) {
        if let Some(close) = self.on_close.take() {
            close();
        }
    }
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecSession").finish_non_exhaustive()
    }
}

/// The cluster operations the clustered backend relies on.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create a pod and return its name.
    async fn create_pod(&self, spec: &WorkloadSpec) -> Result<String, OrchestratorError>;

    /// Wait until the pod reports the `Running` phase.
    async fn wait_for_running(&self, pod: &str, timeout: Duration)
    -> Result<(), OrchestratorError>;

    /// Delete a pod. Returns `false` if it did not exist.
    async fn delete_pod(&self, pod: &str) -> Result<bool, OrchestratorError>;

    /// Create the service if missing and return its cluster-internal address
    /// once one is assigned.
    async fn ensure_service(
        &self,
        spec: &ServiceSpec,
        timeout: Duration,
    ) -> Result<String, OrchestratorError>;

    /// Delete a service. Returns `false` if it did not exist.
    async fn delete_service(&self, name: &str) -> Result<bool, OrchestratorError>;

    /// Run `argv` in a container of a pod, attached to its standard output.
    async fn exec(
        &self,
        pod: &str,
        container: &str,
        argv: Vec<String>,
    ) -> Result<ExecSession, OrchestratorError>;
}
