//! Integration tests for the clustered backend.
//!
//! The cluster and the registry are replaced by in-process fakes that record
//! every operation, so the tests can assert on the exact deploy sequence:
//! - Cache hits skip the build agent entirely
//! - The build agent is torn down on failure and when no build is needed
//! - Units that never become ready are deleted

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_test::{assert_err, assert_ok};

use podcall_common::{
    ArtifactRef, CacheKeyStrategy, KubernetesConfig, MethodIdentity, OrchestratorError,
    RegistryConfig,
};
use podcall_orchestrator::clustered::AGENT_PREFIX;
use podcall_orchestrator::{
    CacheKey, ClusterApi, ClusterOrchestrator, ExecSession, ImageCoordinates, Orchestrator,
    ServiceSpec, StartRequest, TagRegistry, WorkloadSpec,
};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeCluster {
    log: Mutex<Vec<String>>,
    live_pods: Mutex<HashSet<String>>,
    /// Commands whose joined argv contains this fail to start.
    fail_exec: Option<&'static str>,
    /// Pods whose name starts with this never become ready.
    never_ready: Option<&'static str>,
    /// Number of upcoming `delete_pod` calls that fail.
    failing_deletes: AtomicUsize,
}

impl FakeCluster {
    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.log().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn live(&self) -> HashSet<String> {
        self.live_pods.lock().clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn create_pod(&self, spec: &WorkloadSpec) -> Result<String, OrchestratorError> {
        self.log.lock().push(format!("create_pod {} {}", spec.name, spec.image));
        self.live_pods.lock().insert(spec.name.clone());
        Ok(spec.name.clone())
    }

    async fn wait_for_running(
        &self,
        pod: &str,
        timeout: Duration,
    ) -> Result<(), OrchestratorError> {
        self.log.lock().push(format!("wait {pod}"));
        match self.never_ready {
            Some(prefix) if pod.starts_with(prefix) => {
                Err(OrchestratorError::readiness_timeout(format!("pod {pod}"), timeout))
            }
            _ => Ok(()),
        }
    }

    async fn delete_pod(&self, pod: &str) -> Result<bool, OrchestratorError> {
        self.log.lock().push(format!("delete_pod {pod}"));
        let pending = self.failing_deletes.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_deletes.store(pending - 1, Ordering::SeqCst);
            return Err(OrchestratorError::deploy("api server unavailable"));
        }
        Ok(self.live_pods.lock().remove(pod))
    }

    async fn ensure_service(
        &self,
        spec: &ServiceSpec,
        _timeout: Duration,
    ) -> Result<String, OrchestratorError> {
        self.log.lock().push(format!("ensure_service {}", spec.name));
        Ok("10.96.0.17".into())
    }

    async fn delete_service(&self, name: &str) -> Result<bool, OrchestratorError> {
        self.log.lock().push(format!("delete_service {name}"));
        Ok(true)
    }

    async fn exec(
        &self,
        _pod: &str,
        _container: &str,
        argv: Vec<String>,
    ) -> Result<ExecSession, OrchestratorError> {
        let command = argv.join(" ");
        self.log.lock().push(format!("exec {command}"));
        if let Some(needle) = self.fail_exec {
            if command.contains(needle) {
                return Err(OrchestratorError::build("exec stream refused"));
            }
        }
        Ok(ExecSession::new(&b""[..], || {}))
    }
}

/// Registry holding a fixed set of tags.
#[derive(Default)]
struct FakeRegistry {
    tags: Mutex<HashSet<String>>,
    probes: AtomicUsize,
}

impl FakeRegistry {
    fn with_tag(tag: &str) -> Self {
        let registry = Self::default();
        registry.tags.lock().insert(tag.to_string());
        registry
    }
}

#[async_trait]
impl TagRegistry for FakeRegistry {
    async fn needs_build(&self, _image: &ImageCoordinates, cache_key: &CacheKey) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        !self.tags.lock().contains(cache_key.as_str())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn registry_config() -> RegistryConfig {
    RegistryConfig {
        namespace: Some("acme".into()),
        username: Some("bot".into()),
        password: Some("secret".into()),
        ..Default::default()
    }
}

fn orchestrator(cluster: Arc<FakeCluster>, registry: Arc<FakeRegistry>) -> ClusterOrchestrator {
    ClusterOrchestrator::new(
        cluster,
        registry,
        KubernetesConfig {
            idle_poll_ms: 50,
            ..Default::default()
        },
        registry_config(),
        CacheKeyStrategy::ByteLength,
    )
}

/// Write a small artifact and return a start request for it.
async fn request(type_name: &str, method: &str) -> StartRequest {
    let path = std::env::temp_dir().join(format!("podcall-it-{}.tar", uuid::Uuid::new_v4()));
    tokio::fs::write(&path, b"build context").await.unwrap();
    StartRequest::new(
        MethodIdentity::new(type_name, method),
        ArtifactRef::from_path(&path).unwrap(),
    )
}

// ============================================================================
// Test: Build and Deploy
// ============================================================================

#[tokio::test]
async fn test_first_deploy_builds_and_pushes() {
    let cluster = Arc::new(FakeCluster::default());
    let registry = Arc::new(FakeRegistry::default());
    let orchestrator = orchestrator(cluster.clone(), registry.clone());

    let unit = orchestrator
        .start(&request("Sample.Greeter", "Greet").await)
        .await
        .unwrap();

    assert_eq!(unit.host, "10.96.0.17");
    assert_eq!(unit.port, 5959);
    assert!(unit.instance_id.starts_with("greeter-greet-f860b2fe-"));

    let log = cluster.log();
    let service = log.iter().position(|e| e == "ensure_service greeter-greet-f860b2fe").unwrap();
    let agent = log
        .iter()
        .position(|e| e.starts_with(&format!("create_pod {AGENT_PREFIX}")))
        .unwrap();
    let build = log.iter().position(|e| e.starts_with("exec docker build")).unwrap();
    let login = log.iter().position(|e| e.starts_with("exec docker login")).unwrap();
    let push = log
        .iter()
        .position(|e| e == "exec docker push --all-tags acme/greeter-greet-f860b2fe")
        .unwrap();
    let unit_pod = log
        .iter()
        .position(|e| e.starts_with("create_pod greeter-greet-f860b2fe-"))
        .unwrap();

    assert!(service < agent);
    assert!(agent < build && build < login && login < push && push < unit_pod);
    assert!(log[unit_pod].ends_with("acme/greeter-greet-f860b2fe:latest"));
    assert!(log[build].contains("-t acme/greeter-greet-f860b2fe:13"));
    assert_eq!(registry.probes.load(Ordering::SeqCst), 1);
    assert!(orchestrator.agent_pod().await.is_some());
}

#[tokio::test]
async fn test_unchanged_cache_key_skips_build() {
    // First run: the registry does not know the tag yet.
    let cluster = Arc::new(FakeCluster::default());
    let first = orchestrator(cluster.clone(), Arc::new(FakeRegistry::default()));
    first.start(&request("Sample.Greeter", "Greet").await).await.unwrap();
    assert_eq!(cluster.count("exec docker push"), 1);

    // Second run: the pushed tag ("13", the artifact length) is now present.
    let cluster = Arc::new(FakeCluster::default());
    let second = orchestrator(cluster.clone(), Arc::new(FakeRegistry::with_tag("13")));
    second
        .start(&request("Sample.Greeter", "Greet").await)
        .await
        .unwrap();

    assert_eq!(cluster.count("exec"), 0);
    assert_eq!(cluster.count(&format!("create_pod {AGENT_PREFIX}")), 0);
    assert_eq!(cluster.count("create_pod greeter-greet-f860b2fe-"), 1);
}

#[tokio::test]
async fn test_same_run_builds_once() {
    let cluster = Arc::new(FakeCluster::default());
    let registry = Arc::new(FakeRegistry::default());
    let orchestrator = orchestrator(cluster.clone(), registry.clone());

    for _ in 0..3 {
        orchestrator
            .start(&request("Sample.Greeter", "Greet").await)
            .await
            .unwrap();
    }

    assert_eq!(cluster.count("exec docker build"), 1);
    assert_eq!(cluster.count("ensure_service"), 1);
    assert_eq!(cluster.count("create_pod greeter-greet-f860b2fe-"), 3);
    assert_eq!(registry.probes.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.live_units(), 3);
}

// ============================================================================
// Test: Build Agent Teardown
// ============================================================================

#[tokio::test]
async fn test_agent_torn_down_on_build_failure() {
    let cluster = Arc::new(FakeCluster {
        fail_exec: Some("docker build"),
        ..Default::default()
    });
    let orchestrator = orchestrator(cluster.clone(), Arc::new(FakeRegistry::default()));

    let result = orchestrator
        .start(&request("Sample.Greeter", "Greet").await)
        .await;

    assert!(matches!(result, Err(OrchestratorError::Build { .. })));
    assert!(orchestrator.agent_pod().await.is_none());
    assert!(cluster.live().is_empty());
    assert_eq!(cluster.count("exec docker push"), 0);
    assert_eq!(cluster.count("create_pod greeter-greet-f860b2fe-"), 0);
}

#[tokio::test]
async fn test_agent_torn_down_when_build_not_needed() {
    let cluster = Arc::new(FakeCluster::default());
    let registry = Arc::new(FakeRegistry::default());
    let orchestrator = orchestrator(cluster.clone(), registry.clone());

    orchestrator
        .start(&request("Sample.Greeter", "Greet").await)
        .await
        .unwrap();
    let agent = orchestrator.agent_pod().await.unwrap();

    // Another method whose image is already in the registry.
    registry.tags.lock().insert("13".into());
    orchestrator
        .start(&request("Sample.Health", "Ping").await)
        .await
        .unwrap();

    assert!(orchestrator.agent_pod().await.is_none());
    assert!(cluster.log().contains(&format!("delete_pod {agent}")));
    assert!(!cluster.live().contains(&agent));
}

#[tokio::test]
async fn test_agent_not_ready() {
    let cluster = Arc::new(FakeCluster {
        never_ready: Some(AGENT_PREFIX),
        ..Default::default()
    });
    let orchestrator = orchestrator(cluster.clone(), Arc::new(FakeRegistry::default()));

    let result = orchestrator
        .start(&request("Sample.Greeter", "Greet").await)
        .await;

    assert!(matches!(
        result,
        Err(OrchestratorError::ReadinessTimeout { .. })
    ));
    assert!(cluster.live().is_empty());
    assert_eq!(cluster.count("exec"), 0);
}

// ============================================================================
// Test: Unit Lifecycle
// ============================================================================

#[tokio::test]
async fn test_unit_deleted_when_not_ready() {
    let cluster = Arc::new(FakeCluster {
        never_ready: Some("greeter-greet-f860b2fe-"),
        ..Default::default()
    });
    let orchestrator = orchestrator(cluster.clone(), Arc::new(FakeRegistry::with_tag("13")));

    let result = orchestrator
        .start(&request("Sample.Greeter", "Greet").await)
        .await;

    assert!(matches!(
        result,
        Err(OrchestratorError::ReadinessTimeout { .. })
    ));
    assert!(cluster.live().is_empty());
    assert_eq!(orchestrator.live_units(), 0);
}

#[tokio::test]
async fn test_stop_and_not_found() {
    let cluster = Arc::new(FakeCluster::default());
    let orchestrator = orchestrator(cluster.clone(), Arc::new(FakeRegistry::with_tag("13")));

    let unit = orchestrator
        .start(&request("Sample.Greeter", "Greet").await)
        .await
        .unwrap();
    assert!(cluster.live().contains(&unit.instance_id));

    orchestrator.stop(&unit.instance_id).await.unwrap();
    assert!(!cluster.live().contains(&unit.instance_id));

    let again = orchestrator.stop(&unit.instance_id).await;
    assert!(again.unwrap_err().is_not_found());

    let unknown = orchestrator.stop("never-started").await;
    assert!(unknown.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_failed_delete_keeps_unit_tracked() {
    let cluster = Arc::new(FakeCluster {
        failing_deletes: AtomicUsize::new(1),
        ..Default::default()
    });
    let orchestrator = orchestrator(cluster.clone(), Arc::new(FakeRegistry::with_tag("13")));

    let unit = orchestrator
        .start(&request("Sample.Greeter", "Greet").await)
        .await
        .unwrap();

    let err = assert_err!(orchestrator.stop(&unit.instance_id).await);
    assert_eq!(err.to_string(), "Deploy failed: api server unavailable");
    assert_eq!(orchestrator.live_units(), 1);
    assert!(cluster.live().contains(&unit.instance_id));

    assert_ok!(orchestrator.stop(&unit.instance_id).await);
    assert_eq!(orchestrator.live_units(), 0);
    assert!(cluster.live().is_empty());
}

#[tokio::test]
async fn test_same_short_name_methods_get_separate_services() {
    let cluster = Arc::new(FakeCluster::default());
    let orchestrator = orchestrator(cluster.clone(), Arc::new(FakeRegistry::with_tag("13")));

    orchestrator
        .start(&request("Billing.Invoice", "Send").await)
        .await
        .unwrap();
    orchestrator
        .start(&request("Email.Invoice", "Send").await)
        .await
        .unwrap();

    assert_eq!(cluster.count("ensure_service invoice-send-5b2417af"), 1);
    assert_eq!(cluster.count("ensure_service invoice-send-fd1fae75"), 1);
    assert_eq!(cluster.count("create_pod invoice-send-5b2417af-"), 1);
    assert_eq!(cluster.count("create_pod invoice-send-fd1fae75-"), 1);

    let log = cluster.log();
    assert!(log.iter().any(|e| e.starts_with("create_pod invoice-send-5b2417af-")
        && e.ends_with("acme/invoice-send-5b2417af:latest")));
    assert!(log.iter().any(|e| e.starts_with("create_pod invoice-send-fd1fae75-")
        && e.ends_with("acme/invoice-send-fd1fae75:latest")));
}

#[tokio::test]
async fn test_cleanup_releases_agent_and_services() {
    let cluster = Arc::new(FakeCluster::default());
    let orchestrator = orchestrator(cluster.clone(), Arc::new(FakeRegistry::default()));

    orchestrator
        .start(&request("Sample.Greeter", "Greet").await)
        .await
        .unwrap();
    assert!(orchestrator.agent_pod().await.is_some());

    orchestrator.cleanup().await.unwrap();
    assert!(orchestrator.agent_pod().await.is_none());
    assert_eq!(cluster.count("delete_service greeter-greet-f860b2fe"), 1);

    // Idempotent.
    orchestrator.cleanup().await.unwrap();
    assert_eq!(cluster.count("delete_service"), 1);
    assert_eq!(orchestrator.name(), "kubernetes");
}
