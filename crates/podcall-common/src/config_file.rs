//! Configuration file structures for podcall.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ServerConfigFile`]: Gateway HTTP server settings
//! - [`AdminConfig`]: Admin API settings
//! - [`MethodEntry`]: A containerized method declared in the file

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ContainerizationPolicy, MethodIdentity, RuntimeConfig};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.orchestrator]
/// backend = "kubernetes"
///
/// [runtime.orchestrator.kubernetes]
/// context = "docker-desktop"
///
/// [runtime.registry]
/// kind = "docker_hub"
/// namespace = "acme"
///
/// [server]
/// bind_addr = "0.0.0.0:8080"
///
/// [admin]
/// enabled = true
/// token = "your-secret-token"
///
/// [[methods]]
/// type_name = "Sample.Services.UserService"
/// method = "CreateUser"
/// artifact = "./artifacts/createuser.tar"
/// minimum_available = 3
/// bearer_token = "mytesttoken"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (orchestrator, registry, router).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Gateway HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfigFile,

    /// Admin API configuration.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Methods to containerize at startup.
    #[serde(default)]
    pub methods: Vec<MethodEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// Gateway HTTP server configuration from config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfigFile {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Request timeout in seconds.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable graceful shutdown.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    /// Enable Admin API.
    #[serde(default)]
    pub enabled: bool,

    /// Authentication token (required when enabled).
    ///
    /// Clients must include this token in the `X-Admin-Token` header.
    pub token: Option<String>,

    /// URL prefix for Admin API endpoints.
    #[serde(default = "defaults::admin_prefix")]
    pub prefix: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            prefix: defaults::admin_prefix(),
        }
    }
}

impl AdminConfig {
    /// Check if Admin API is properly configured.
    ///
    /// Returns `true` if enabled and token is set.
    pub fn is_configured(&self) -> bool {
        self.enabled && self.token.is_some()
    }
}

/// Whether a method produces a value callers wait for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    /// The caller blocks on the remote round-trip and receives its result.
    #[default]
    Value,
    /// The remote call is detached and the caller returns immediately.
    Unit,
}

/// A containerized method declared in the configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MethodEntry {
    /// Fully qualified declaring type name.
    pub type_name: String,

    /// Method name.
    pub method: String,

    /// Path to the build context archive produced by the artifact builder.
    pub artifact: PathBuf,

    /// Return kind of the method.
    #[serde(default)]
    pub returns: ReturnKind,

    /// Units to keep running.
    #[serde(default = "defaults::minimum_available")]
    pub minimum_available: u32,

    /// Start a unit per call instead of pooling.
    #[serde(default)]
    pub create_as_needed: bool,

    /// Serve without authorization.
    #[serde(default)]
    pub open: bool,

    /// Custom bearer token.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl MethodEntry {
    /// The identity of the declared method.
    pub fn identity(&self) -> MethodIdentity {
        MethodIdentity::new(&self.type_name, &self.method)
    }

    /// The containerization policy of the declared method.
    pub fn policy(&self) -> ContainerizationPolicy {
        let mut builder = ContainerizationPolicy::builder().minimum_available(self.minimum_available);
        if self.create_as_needed {
            builder = builder.as_needed();
        }
        if self.open {
            builder = builder.open();
        }
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_token(token);
        }
        builder.build()
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub fn bind_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    pub const fn request_timeout_secs() -> u64 {
        120
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }

    pub fn admin_prefix() -> String {
        "/admin".to_string()
    }

    pub const fn minimum_available() -> u32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backend, RegistryKind};

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.server.request_timeout_secs, 120);
        assert!(config.server.graceful_shutdown);
        assert!(!config.admin.enabled);
        assert!(config.admin.token.is_none());
        assert_eq!(config.admin.prefix, "/admin");
        assert!(config.methods.is_empty());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:3000"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
        // Defaults applied
        assert_eq!(config.server.request_timeout_secs, 120);
        assert_eq!(config.runtime.orchestrator.backend, Backend::Docker);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.orchestrator]
            backend = "kubernetes"
            cache_key = "content_hash"

            [runtime.orchestrator.kubernetes]
            context = "docker-desktop"
            namespace = "methods"

            [runtime.registry]
            kind = "private"
            host = "registry.internal:5000"
            username = "ci"
            password = "hunter2"

            [runtime.router]
            warmup_delay_ms = 500

            [server]
            bind_addr = "0.0.0.0:9000"
            graceful_shutdown = false

            [admin]
            enabled = true
            token = "secret-token"
            prefix = "/api/admin"

            [[methods]]
            type_name = "Sample.Services.UserService"
            method = "CreateUser"
            artifact = "./artifacts/createuser.tar"
            minimum_available = 3
            bearer_token = "mytesttoken"

            [[methods]]
            type_name = "Sample.Services.AuditService"
            method = "Record"
            artifact = "./artifacts/record.tar"
            returns = "unit"
            create_as_needed = true
            open = true
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.orchestrator.backend, Backend::Kubernetes);
        assert_eq!(config.runtime.orchestrator.kubernetes.namespace, "methods");
        assert_eq!(config.runtime.registry.kind, RegistryKind::Private);
        assert!(config.runtime.registry.requires_login());
        assert_eq!(config.runtime.router.warmup_delay_ms, 500);
        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert!(!config.server.graceful_shutdown);
        assert!(config.admin.is_configured());
        assert_eq!(config.admin.prefix, "/api/admin");
        assert_eq!(config.methods.len(), 2);

        let create_user = &config.methods[0];
        assert_eq!(
            create_user.identity(),
            MethodIdentity::new("Sample.Services.UserService", "CreateUser")
        );
        assert_eq!(create_user.returns, ReturnKind::Value);
        let policy = create_user.policy();
        assert_eq!(policy.minimum_available, 3);
        assert_eq!(policy.bearer_token.as_deref(), Some("mytesttoken"));

        let record = &config.methods[1];
        assert_eq!(record.returns, ReturnKind::Unit);
        let policy = record.policy();
        assert!(policy.create_as_needed);
        assert!(policy.is_open);
        assert_eq!(policy.pooled_units(), 0);
    }

    #[test]
    fn test_admin_config_is_configured() {
        let mut admin = AdminConfig::default();
        assert!(!admin.is_configured());

        admin.enabled = true;
        assert!(!admin.is_configured());

        admin.token = Some("token".to_string());
        assert!(admin.is_configured());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigFile::from_file("/nonexistent/podcall.toml").unwrap_err();
        assert!(matches!(err, ConfigFileError::Io { .. }));
    }
}
