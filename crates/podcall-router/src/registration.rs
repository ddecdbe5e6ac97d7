//! Method registrations.
//!
//! A registration ties a method identity to its policy, the artifact its
//! units are built from, its return kind, and optionally the in-process
//! implementation used when no unit is pooled.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use podcall_common::{ArtifactRef, ContainerizationPolicy, MethodIdentity, ReturnKind};

/// Error returned by a local implementation.
pub type LocalError = Box<dyn std::error::Error + Send + Sync>;

/// In-process implementation of a method, taking its positional arguments.
pub type LocalHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, LocalError>> + Send + Sync>;

/// Wrap an async function as a [`LocalHandler`].
pub fn local_handler<F, Fut>(handler: F) -> LocalHandler
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, LocalError>> + Send + 'static,
{
    Arc::new(move |args| handler(args).boxed())
}

/// Everything the router knows about one containerized method.
#[derive(Clone)]
pub struct MethodRegistration {
    /// The method.
    pub identity: MethodIdentity,
    /// Deployment and access policy.
    pub policy: ContainerizationPolicy,
    /// Build context for the method's units.
    pub artifact: ArtifactRef,
    /// Whether callers wait for a result.
    pub returns: ReturnKind,
    /// In-process fallback.
    pub local: Option<LocalHandler>,
}

impl MethodRegistration {
    /// Register `identity` with the default policy.
    pub fn new(identity: MethodIdentity, artifact: ArtifactRef) -> Self {
        Self {
            identity,
            policy: ContainerizationPolicy::default(),
            artifact,
            returns: ReturnKind::Value,
            local: None,
        }
    }

    /// Set the policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ContainerizationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the return kind.
    #[must_use]
    pub fn returning(mut self, returns: ReturnKind) -> Self {
        self.returns = returns;
        self
    }

    /// Set the in-process fallback.
    #[must_use]
    pub fn with_local(mut self, handler: LocalHandler) -> Self {
        self.local = Some(handler);
        self
    }

    /// Returns `true` if callers do not wait for a result.
    pub fn is_unit(&self) -> bool {
        self.returns == ReturnKind::Unit
    }
}

impl std::fmt::Debug for MethodRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistration")
            .field("identity", &self.identity)
            .field("policy", &self.policy)
            .field("artifact", &self.artifact)
            .field("returns", &self.returns)
            .field("local", &self.local.is_some())
            .finish()
    }
}
