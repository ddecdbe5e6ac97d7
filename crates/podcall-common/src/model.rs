//! Core data model shared by the orchestrator and the router.
//!
//! - [`MethodIdentity`]: Stable key of a containerizable method
//! - [`ContainerizationPolicy`]: Per-method deployment and access policy
//! - [`ExecutionUnit`]: A running instance hosting one method
//! - [`ArtifactRef`]: The deployable build context handed over by the artifact builder

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum length of a DNS-1035 label (Kubernetes object names).
const MAX_SLUG_LEN: usize = 63;

/// Hex digits of the key digest appended to every slug.
const SLUG_DIGEST_LEN: usize = 8;

/// Identity of a containerized method.
///
/// Equality is structural over the declaring type name and the method name.
/// The textual form `Type|Method` is the header of every call envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodIdentity {
    /// Fully qualified name of the declaring type.
    pub type_name: String,
    /// Name of the method.
    pub method: String,
}

impl MethodIdentity {
    /// Separator between type and method in the textual key.
    pub const KEY_SEPARATOR: char = '|';

    /// Create a new method identity.
    pub fn new(type_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            method: method.into(),
        }
    }

    /// Parse a `Type|Method` key.
    ///
    /// Returns `None` if the separator is missing or either side is empty.
    pub fn parse(key: &str) -> Option<Self> {
        let (type_name, method) = key.split_once(Self::KEY_SEPARATOR)?;
        if type_name.is_empty() || method.is_empty() {
            return None;
        }
        Some(Self::new(type_name, method))
    }

    /// The `Type|Method` key form.
    pub fn key(&self) -> String {
        format!("{}{}{}", self.type_name, Self::KEY_SEPARATOR, self.method)
    }

    /// Unqualified type name (last segment of a dotted or `::` path).
    pub fn short_type_name(&self) -> &str {
        self.type_name
            .rsplit(['.', ':', '+'])
            .next()
            .unwrap_or(&self.type_name)
    }

    /// DNS-1035 safe name for this identity.
    ///
    /// Used as image name, service name and instance-name prefix:
    /// lowercase, non-alphanumerics folded into single `-`, starting with a
    /// letter and at most 63 characters. The readable part is followed by
    /// the first 8 hex digits of the SHA-256 of [`key`](Self::key), so two
    /// identities that share a short type name never share a slug.
    pub fn slug(&self) -> String {
        let raw = format!("{}-{}", self.short_type_name(), self.method);
        let mut readable = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c.is_ascii_alphanumeric() {
                readable.push(c.to_ascii_lowercase());
            } else if !readable.ends_with('-') {
                readable.push('-');
            }
        }

        let readable = readable.trim_matches('-');
        let mut readable = if readable.starts_with(|c: char| c.is_ascii_alphabetic()) {
            readable.to_string()
        } else {
            format!("m-{readable}")
        };

        readable.truncate(MAX_SLUG_LEN - SLUG_DIGEST_LEN - 1);
        let digest = format!("{:x}", Sha256::digest(self.key().as_bytes()));
        format!(
            "{}-{}",
            readable.trim_end_matches('-'),
            &digest[..SLUG_DIGEST_LEN]
        )
    }
}

impl fmt::Display for MethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.type_name, Self::KEY_SEPARATOR, self.method)
    }
}

/// Deployment and access policy for one containerized method.
///
/// Invariant: when `create_as_needed` is set, no units are pooled for the
/// method and every call gets its own short-lived unit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContainerizationPolicy {
    /// Number of units to keep running (started at warm-up).
    pub minimum_available: u32,
    /// Start a fresh unit per call and stop it afterwards.
    pub create_as_needed: bool,
    /// Serve calls without a bearer token.
    pub is_open: bool,
    /// Bearer token required by the unit when the policy is not open.
    pub bearer_token: Option<String>,
}

impl Default for ContainerizationPolicy {
    fn default() -> Self {
        Self {
            minimum_available: 1,
            create_as_needed: false,
            is_open: false,
            bearer_token: None,
        }
    }
}

impl ContainerizationPolicy {
    /// Create a builder for constructing a policy.
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// Number of units warm-up should start for this policy.
    pub fn pooled_units(&self) -> u32 {
        if self.create_as_needed {
            0
        } else {
            self.minimum_available
        }
    }

    /// The `Authorization` header value to send, if any.
    pub fn authorization(&self) -> Option<String> {
        if self.is_open {
            return None;
        }
        self.bearer_token
            .as_deref()
            .map(|token| format!("Bearer {token}"))
    }
}

/// Builder for [`ContainerizationPolicy`].
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    inner: ContainerizationPolicy,
}

impl PolicyBuilder {
    /// Set the number of units to keep available.
    #[must_use]
    pub fn minimum_available(mut self, amount: u32) -> Self {
        self.inner.minimum_available = amount;
        self
    }

    /// Only create units when the method is called.
    ///
    /// This also resets the minimum available count to zero.
    #[must_use]
    pub fn as_needed(mut self) -> Self {
        self.inner.minimum_available = 0;
        self.inner.create_as_needed = true;
        self
    }

    /// Serve the method without authorization.
    #[must_use]
    pub fn open(mut self) -> Self {
        self.inner.is_open = true;
        self
    }

    /// Use a caller-provided bearer token instead of a generated one.
    #[must_use]
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.inner.bearer_token = Some(token.into());
        self
    }

    /// Build the policy.
    #[must_use]
    pub fn build(self) -> ContainerizationPolicy {
        self.inner
    }
}

/// A running instance hosting exactly one method as a network service.
///
/// The orchestrator backend that created the unit owns the remote resource;
/// everyone else holds this value as a reference and may only ask the
/// orchestrator to stop it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    /// Backend-specific instance identifier (container id, pod name).
    pub instance_id: String,
    /// The method this unit serves.
    pub identity: MethodIdentity,
    /// Host (or service address) the unit is reachable at.
    pub host: String,
    /// Port the unit is reachable at.
    pub port: u16,
    /// When the unit was started.
    pub created_at: SystemTime,
}

impl ExecutionUnit {
    /// Create a unit record stamped with the current time.
    pub fn new(
        instance_id: impl Into<String>,
        identity: MethodIdentity,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            identity,
            host: host.into(),
            port,
            created_at: SystemTime::now(),
        }
    }

    /// Base URL of the unit's HTTP endpoint.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// A deployable build context produced by the artifact builder.
///
/// The core never looks inside the archive; the size hint doubles as the
/// default build cache key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArtifactRef {
    /// Path to the build context archive.
    pub path: PathBuf,
    /// Size of the archive in bytes.
    pub size_hint: u64,
}

impl ArtifactRef {
    /// Create an artifact reference.
    pub fn new(path: impl Into<PathBuf>, size_hint: u64) -> Self {
        Self {
            path: path.into(),
            size_hint,
        }
    }

    /// Create an artifact reference, reading the size hint from the filesystem.
    pub fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let size_hint = std::fs::metadata(&path)?.len();
        Ok(Self { path, size_hint })
    }
}
