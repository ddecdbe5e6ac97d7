//! Error types for podcall.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RouterError`]: Top-level errors surfaced to callers of a routed method
//! - [`OrchestratorError`]: Failures building, deploying, or stopping execution units
//! - [`RegistryProbeError`]: Registry tag-listing failures (never surfaced, see below)

use thiserror::Error;

/// Top-level errors for a routed method call.
///
/// These are the errors a caller sees when invoking a containerized method.
/// They travel through the method's ordinary error channel so that a remote
/// call fails the same way the in-process call would.
#[derive(Error, Debug)]
pub enum RouterError {
    /// No policy is registered for the method identity.
    #[error("No containerization policy for method: {identity}")]
    Policy {
        /// The `Type|Method` key that was not registered.
        identity: String,
    },

    /// The call envelope could not be decoded.
    #[error("Invalid call envelope: {reason}")]
    InvalidEnvelope {
        /// Description of the decoding failure.
        reason: String,
    },

    /// The remote execution unit failed to answer the call.
    #[error("Remote invocation of {identity} failed (status: {status}): {reason}")]
    RemoteInvocation {
        /// The method identity that was invoked.
        identity: String,
        /// HTTP status code (0 if the request never completed).
        status: u16,
        /// Description of the failure.
        reason: String,
    },

    /// Starting or stopping an execution unit failed.
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// The method has no pooled unit and no local implementation to fall back to.
    #[error("No execution unit or local handler available for {identity}")]
    LocalUnavailable {
        /// The method identity that could not be served.
        identity: String,
    },

    /// The local fallback implementation returned an error.
    #[error("Local invocation of {identity} failed: {reason}")]
    LocalInvocation {
        /// The method identity that was invoked locally.
        identity: String,
        /// Description of the failure.
        reason: String,
    },

    /// Arguments or results could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The router could not be set up.
    #[error("Router configuration error: {reason}")]
    Configuration {
        /// Description of the problem.
        reason: String,
    },
}

/// Errors from execution unit orchestration.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Building or pushing the image failed.
    #[error("Build failed: {reason}")]
    Build {
        /// Description of the build failure.
        reason: String,
    },

    /// Scheduling or starting the execution unit failed.
    #[error("Deploy failed: {reason}")]
    Deploy {
        /// Description of the deploy failure.
        reason: String,
    },

    /// A resource did not reach the awaited state in time.
    #[error("Timed out after {waited_ms}ms waiting for {resource}")]
    ReadinessTimeout {
        /// The resource being waited on (pod, service, ...).
        resource: String,
        /// How long the wait lasted in milliseconds.
        waited_ms: u64,
    },

    /// Stop was requested for an instance this orchestrator does not know.
    #[error("Execution unit not found: {instance_id}")]
    NotFound {
        /// The unknown instance identifier.
        instance_id: String,
    },
}

/// Registry tag-listing failures.
///
/// These never propagate out of the cache check: any probe failure is
/// converted into "rebuild needed".
#[derive(Error, Debug)]
pub enum RegistryProbeError {
    /// The registry could not be reached.
    #[error("Registry unreachable: {reason}")]
    Transport {
        /// Description of the transport failure.
        reason: String,
    },

    /// The registry answered with a non-success status.
    #[error("Registry returned status {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
    },

    /// The tag listing body could not be parsed.
    #[error("Malformed tag listing: {reason}")]
    Parse {
        /// Description of the parse failure.
        reason: String,
    },
}

impl RouterError {
    /// Create a new `Policy` error.
    pub fn policy(identity: impl Into<String>) -> Self {
        Self::Policy {
            identity: identity.into(),
        }
    }

    /// Create a new `InvalidEnvelope` error.
    pub fn invalid_envelope(reason: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            reason: reason.into(),
        }
    }

    /// Create a new `RemoteInvocation` error.
    pub fn remote(identity: impl Into<String>, status: u16, reason: impl Into<String>) -> Self {
        Self::RemoteInvocation {
            identity: identity.into(),
            status,
            reason: reason.into(),
        }
    }

    /// Create a new `LocalInvocation` error.
    pub fn local(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LocalInvocation {
            identity: identity.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Configuration` error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the method identity was not registered.
    pub fn is_policy(&self) -> bool {
        matches!(self, Self::Policy { .. })
    }

    /// Returns `true` if the failure happened on the remote side of the call.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteInvocation { .. })
    }
}

impl OrchestratorError {
    /// Create a new `Build` error.
    pub fn build(reason: impl Into<String>) -> Self {
        Self::Build {
            reason: reason.into(),
        }
    }

    /// Create a new `Deploy` error.
    pub fn deploy(reason: impl Into<String>) -> Self {
        Self::Deploy {
            reason: reason.into(),
        }
    }

    /// Create a new `NotFound` error.
    pub fn not_found(instance_id: impl Into<String>) -> Self {
        Self::NotFound {
            instance_id: instance_id.into(),
        }
    }

    /// Create a new `ReadinessTimeout` error.
    pub fn readiness_timeout(resource: impl Into<String>, waited: std::time::Duration) -> Self {
        Self::ReadinessTimeout {
            resource: resource.into(),
            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns `true` if this error indicates the instance was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RouterError::policy("Sample.UserService|CreateUser");
        assert_eq!(
            err.to_string(),
            "No containerization policy for method: Sample.UserService|CreateUser"
        );

        let err = OrchestratorError::not_found("abc123");
        assert_eq!(err.to_string(), "Execution unit not found: abc123");
    }

    #[test]
    fn test_error_from_orchestrator() {
        let err: RouterError = OrchestratorError::build("docker build exited").into();
        assert!(matches!(err, RouterError::Orchestrator(_)));
        assert!(!err.is_remote());
    }

    #[test]
    fn test_readiness_timeout_millis() {
        let err = OrchestratorError::readiness_timeout(
            "pod greet-1",
            std::time::Duration::from_secs(2),
        );
        assert_eq!(
            err.to_string(),
            "Timed out after 2000ms waiting for pod greet-1"
        );
    }

    #[test]
    fn test_classification() {
        assert!(RouterError::policy("A|b").is_policy());
        assert!(RouterError::remote("A|b", 502, "bad gateway").is_remote());
        assert!(OrchestratorError::not_found("x").is_not_found());
        assert!(!OrchestratorError::deploy("x").is_not_found());
    }
}
