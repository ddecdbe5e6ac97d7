//! Configuration structures for podcall.
//!
//! This module defines configuration options for the core components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`OrchestratorConfig`]: Backend selection and per-backend settings
//! - [`RegistryConfig`]: Image registry target for the clustered backend
//! - [`RouterConfig`]: Call routing settings (warm-up delay, timeouts)

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// It can be loaded from files (TOML, JSON) or built in code.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Execution unit orchestration.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Image registry used by the clustered backend.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Call routing.
    #[serde(default)]
    pub router: RouterConfig,
}

/// Which orchestrator backend runs execution units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// A single host with a local container engine.
    #[default]
    Docker,
    /// A Kubernetes cluster, building images through an in-cluster build agent.
    Kubernetes,
}

/// How the build cache key is derived from an artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeyStrategy {
    /// The artifact's byte length. Cheap, but distinct artifacts of equal
    /// size collide.
    #[default]
    ByteLength,
    /// A SHA-256 digest of the artifact contents.
    ContentHash,
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Backend to use.
    #[serde(default)]
    pub backend: Backend,

    /// Build cache key derivation.
    #[serde(default)]
    pub cache_key: CacheKeyStrategy,

    /// Single-host backend settings.
    #[serde(default)]
    pub docker: DockerConfig,

    /// Clustered backend settings.
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
}

/// Single-host backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DockerConfig {
    /// First host port (inclusive) handed out to units.
    #[serde(default = "defaults::port_range_start")]
    pub port_range_start: u16,

    /// Last host port (exclusive) handed out to units.
    #[serde(default = "defaults::port_range_end")]
    pub port_range_end: u16,

    /// Port the unit listens on inside its container.
    #[serde(default = "defaults::unit_port")]
    pub unit_port: u16,

    /// Host name callers use to reach published ports.
    #[serde(default = "defaults::docker_host")]
    pub host: String,

    /// Seconds to wait for a unit to stop before it is killed.
    #[serde(default = "defaults::stop_grace_secs")]
    pub stop_grace_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            port_range_start: defaults::port_range_start(),
            port_range_end: defaults::port_range_end(),
            unit_port: defaults::unit_port(),
            host: defaults::docker_host(),
            stop_grace_secs: defaults::stop_grace_secs(),
        }
    }
}

impl DockerConfig {
    /// Get the stop grace period as a `Duration`.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Clustered backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KubernetesConfig {
    /// Kubeconfig context to use. When unset the client configuration is
    /// inferred (in-cluster or the current context).
    #[serde(default)]
    pub context: Option<String>,

    /// Namespace units, services and the build agent live in.
    #[serde(default = "defaults::namespace")]
    pub namespace: String,

    /// Port units listen on, also exposed by their service.
    #[serde(default = "defaults::unit_port")]
    pub unit_port: u16,

    /// Image of the privileged build agent.
    #[serde(default = "defaults::agent_image")]
    pub agent_image: String,

    /// Upper bound on readiness waits (pods running, service addresses).
    #[serde(default = "defaults::readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,

    /// A build agent command is considered complete after this long without output.
    #[serde(default = "defaults::idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Hard upper bound on a single build agent command.
    #[serde(default = "defaults::command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Bytes of encoded artifact sent per transfer command.
    #[serde(default = "defaults::transfer_chunk_bytes")]
    pub transfer_chunk_bytes: usize,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            context: None,
            namespace: defaults::namespace(),
            unit_port: defaults::unit_port(),
            agent_image: defaults::agent_image(),
            readiness_timeout_secs: defaults::readiness_timeout_secs(),
            idle_poll_ms: defaults::idle_poll_ms(),
            command_timeout_secs: defaults::command_timeout_secs(),
            transfer_chunk_bytes: defaults::transfer_chunk_bytes(),
        }
    }
}

impl KubernetesConfig {
    /// Get the readiness timeout as a `Duration`.
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    /// Get the idle poll interval as a `Duration`.
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Get the command timeout as a `Duration`.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Kind of image registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    /// The hosted Docker Hub registry (images live under a namespace).
    #[default]
    DockerHub,
    /// A private registry addressed by host.
    Private,
}

/// Image registry configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Registry kind.
    #[serde(default)]
    pub kind: RegistryKind,

    /// Registry host (private registries), e.g. `registry.internal:5000`.
    #[serde(default)]
    pub host: Option<String>,

    /// Account or organization namespace (Docker Hub).
    #[serde(default)]
    pub namespace: Option<String>,

    /// Registry user name.
    #[serde(default)]
    pub username: Option<String>,

    /// Registry password or access token.
    #[serde(default)]
    pub password: Option<String>,

    /// Override for the tag-listing API base URL.
    ///
    /// Defaults to `https://hub.docker.com` for Docker Hub and
    /// `https://<host>` for private registries.
    #[serde(default)]
    pub api_base: Option<String>,
}

impl RegistryConfig {
    /// Returns `true` if both user name and password are set.
    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
            && self.password.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Returns `true` if pushes must be preceded by a login.
    ///
    /// Docker Hub always requires one; private registries only when
    /// credentials are configured.
    pub fn requires_login(&self) -> bool {
        match self.kind {
            RegistryKind::DockerHub => true,
            RegistryKind::Private => self.has_credentials(),
        }
    }
}

/// Call routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Fixed delay between starting an ephemeral unit and calling it.
    #[serde(default = "defaults::warmup_delay_ms")]
    pub warmup_delay_ms: u64,

    /// Upper bound on a single remote call. `None` waits indefinitely.
    #[serde(default = "defaults::call_timeout_secs")]
    pub call_timeout_secs: Option<u64>,

    /// `User-Agent` sent with every remote call.
    #[serde(default = "defaults::client_name")]
    pub client_name: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            warmup_delay_ms: defaults::warmup_delay_ms(),
            call_timeout_secs: defaults::call_timeout_secs(),
            client_name: defaults::client_name(),
        }
    }
}

impl RouterConfig {
    /// Get the warm-up delay as a `Duration`.
    pub fn warmup_delay(&self) -> Duration {
        Duration::from_millis(self.warmup_delay_ms)
    }

    /// Get the call timeout as a `Duration`, if bounded.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn port_range_start() -> u16 {
        6000
    }

    pub const fn port_range_end() -> u16 {
        9000
    }

    pub const fn unit_port() -> u16 {
        5959
    }

    pub fn docker_host() -> String {
        "127.0.0.1".to_string()
    }

    pub const fn stop_grace_secs() -> u64 {
        3
    }

    pub fn namespace() -> String {
        "default".to_string()
    }

    pub fn agent_image() -> String {
        "docker:dind".to_string()
    }

    pub const fn readiness_timeout_secs() -> u64 {
        300
    }

    pub const fn idle_poll_ms() -> u64 {
        5000
    }

    pub const fn command_timeout_secs() -> u64 {
        900
    }

    pub const fn transfer_chunk_bytes() -> usize {
        32 * 1024
    }

    pub const fn warmup_delay_ms() -> u64 {
        2000
    }

    #[allow(clippy::unnecessary_wraps)]
    pub const fn call_timeout_secs() -> Option<u64> {
        Some(60)
    }

    pub fn client_name() -> String {
        "podcall".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert_eq!(config.orchestrator.backend, Backend::Docker);
        assert_eq!(config.orchestrator.cache_key, CacheKeyStrategy::ByteLength);
        assert_eq!(config.orchestrator.docker.port_range_start, 6000);
        assert_eq!(config.orchestrator.docker.port_range_end, 9000);
        assert_eq!(config.orchestrator.docker.unit_port, 5959);
        assert_eq!(config.orchestrator.kubernetes.agent_image, "docker:dind");
        assert_eq!(config.orchestrator.kubernetes.namespace, "default");

        assert_eq!(config.registry.kind, RegistryKind::DockerHub);
        assert_eq!(config.router.warmup_delay_ms, 2000);
        assert_eq!(config.router.call_timeout_secs, Some(60));
        assert_eq!(config.router.client_name, "podcall");
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            config.orchestrator.docker.unit_port,
            deserialized.orchestrator.docker.unit_port
        );
        assert_eq!(
            config.router.warmup_delay_ms,
            deserialized.router.warmup_delay_ms
        );
    }

    #[test]
    fn test_durations() {
        let router = RouterConfig {
            warmup_delay_ms: 250,
            call_timeout_secs: None,
            ..Default::default()
        };
        assert_eq!(router.warmup_delay(), Duration::from_millis(250));
        assert!(router.call_timeout().is_none());

        let k8s = KubernetesConfig::default();
        assert_eq!(k8s.idle_poll(), Duration::from_secs(5));
        assert_eq!(k8s.readiness_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"orchestrator": {"backend": "kubernetes", "kubernetes": {"context": "docker-desktop"}}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.orchestrator.backend, Backend::Kubernetes);
        assert_eq!(
            config.orchestrator.kubernetes.context.as_deref(),
            Some("docker-desktop")
        );
        // Default values for unspecified fields
        assert_eq!(config.orchestrator.kubernetes.unit_port, 5959);
        assert_eq!(config.router.warmup_delay_ms, 2000);
    }

    #[test]
    fn test_registry_login_rules() {
        let hub = RegistryConfig::default();
        assert!(hub.requires_login());

        let mut private = RegistryConfig {
            kind: RegistryKind::Private,
            host: Some("registry.internal:5000".into()),
            ..Default::default()
        };
        assert!(!private.requires_login());

        private.username = Some("ci".into());
        assert!(!private.requires_login());

        private.password = Some("secret".into());
        assert!(private.requires_login());
    }
}
