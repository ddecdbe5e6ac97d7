//! The call router.
//!
//! Routing policy per call:
//!
//! - **As needed**: start a fresh unit, wait the fixed warm-up delay, call
//!   it, and stop it whatever the outcome. The whole lifecycle runs on its
//!   own task so an abandoned caller cannot skip the stop.
//! - **Pooled**: call the earliest started unit of the method.
//! - **No pooled unit**: run the registered local implementation.
//!
//! Methods without a return value are called on a detached task and the
//! router answers immediately with `null`.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use podcall_common::{
    ContainerizationPolicy, ExecutionUnit, MethodIdentity, RouterConfig, RouterError,
};
use podcall_orchestrator::{Orchestrator, StartRequest};

use crate::envelope::CallEnvelope;
use crate::pool::PoolTable;
use crate::registration::MethodRegistration;
use crate::remote::RemoteInvoker;

/// Routes intercepted calls to execution units or local implementations.
pub struct CallRouter {
    orchestrator: Arc<dyn Orchestrator>,
    invoker: RemoteInvoker,
    registrations: DashMap<MethodIdentity, Arc<MethodRegistration>>,
    pool: PoolTable,
    config: RouterConfig,
    /// Detached calls still in flight.
    detached: Mutex<Vec<JoinHandle<()>>>,
}

impl CallRouter {
    /// Create a router on top of an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        config: RouterConfig,
    ) -> Result<Self, RouterError> {
        Ok(Self {
            orchestrator,
            invoker: RemoteInvoker::new(&config)?,
            registrations: DashMap::new(),
            pool: PoolTable::new(),
            config,
            detached: Mutex::new(Vec::new()),
        })
    }

    /// Register a method.
    ///
    /// A closed policy without a bearer token gets a generated one. Returns
    /// the effective policy.
    pub fn register(&self, mut registration: MethodRegistration) -> ContainerizationPolicy {
        if !registration.policy.is_open && registration.policy.bearer_token.is_none() {
            registration.policy.bearer_token = Some(uuid::Uuid::new_v4().simple().to_string());
            debug!(identity = %registration.identity, "Generated bearer token");
        }

        let policy = registration.policy.clone();
        info!(
            identity = %registration.identity,
            minimum_available = policy.minimum_available,
            create_as_needed = policy.create_as_needed,
            open = policy.is_open,
            local_fallback = registration.local.is_some(),
            "Method registered"
        );
        self.registrations
            .insert(registration.identity.clone(), Arc::new(registration));
        policy
    }

    /// The registration for `identity`.
    pub fn registration(&self, identity: &MethodIdentity) -> Option<Arc<MethodRegistration>> {
        self.registrations.get(identity).map(|r| r.value().clone())
    }

    /// Registered identities, ordered.
    pub fn identities(&self) -> Vec<MethodIdentity> {
        let mut identities: Vec<_> = self.registrations.iter().map(|r| r.key().clone()).collect();
        identities.sort();
        identities
    }

    /// The pool table.
    pub fn pool(&self) -> &PoolTable {
        &self.pool
    }

    /// Name of the orchestrator backend.
    pub fn backend(&self) -> &'static str {
        self.orchestrator.name()
    }

    /// Start the configured minimum of units for every pooled method.
    ///
    /// Units are started one at a time. A failed start is logged and ends
    /// warm-up for that method; a method left without units is served by its
    /// local implementation. Returns the number of units started.
    #[instrument(skip(self))]
    pub async fn warm_up(&self) -> usize {
        let mut started = 0;

        for identity in self.identities() {
            let Some(registration) = self.registration(&identity) else {
                continue;
            };

            for _ in 0..registration.policy.pooled_units() {
                let request =
                    StartRequest::new(identity.clone(), registration.artifact.clone());
                match self.orchestrator.start(&request).await {
                    Ok(unit) => {
                        debug!(
                            identity = %identity,
                            instance_id = %unit.instance_id,
                            "Pooled unit started"
                        );
                        self.pool.add(unit);
                        started += 1;
                    }
                    Err(e) => {
                        error!(identity = %identity, error = %e, "Failed to start pooled unit");
                        break;
                    }
                }
            }
        }

        info!(started, "Warm-up complete");
        started
    }

    /// Route one call.
    ///
    /// Returns the method's JSON result, or `null` for methods without a
    /// return value.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Policy`] for unregistered methods, and the
    /// remote, orchestrator or local failure of the call otherwise.
    #[instrument(skip(self, envelope), fields(identity = %envelope.identity))]
    pub async fn intercept(&self, envelope: CallEnvelope) -> Result<Value, RouterError> {
        let registration = self
            .registration(&envelope.identity)
            .ok_or_else(|| RouterError::policy(envelope.identity.key()))?;

        if registration.policy.create_as_needed {
            return self.call_ephemeral(registration, envelope.args).await;
        }

        match self.pool.first(&registration.identity) {
            Some(unit) => self.call_pooled(&registration, unit, envelope.args).await,
            None => Self::call_local(&registration, envelope.args).await,
        }
    }

    /// Route a call and deserialize its result.
    ///
    /// # Errors
    ///
    /// Returns the routing error, or a serialization error if the result
    /// does not match `R`.
    pub async fn call<R: DeserializeOwned>(
        &self,
        identity: &MethodIdentity,
        args: Vec<Value>,
    ) -> Result<R, RouterError> {
        let value = self
            .intercept(CallEnvelope::new(identity.clone(), args))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Start a unit for this call only and stop it afterwards.
    async fn call_ephemeral(
        &self,
        registration: Arc<MethodRegistration>,
        args: Vec<Value>,
    ) -> Result<Value, RouterError> {
        let orchestrator = self.orchestrator.clone();
        let invoker = self.invoker.clone();
        let delay = self.config.warmup_delay();
        let is_unit = registration.is_unit();
        let identity = registration.identity.key();

        let lifecycle = async move {
            let request = StartRequest::new(
                registration.identity.clone(),
                registration.artifact.clone(),
            );
            let unit = orchestrator.start(&request).await?;
            debug!(instance_id = %unit.instance_id, "Ephemeral unit started");

            tokio::time::sleep(delay).await;
            let result = invoker.invoke(&unit, &registration.policy, &args).await;

            match orchestrator.stop(&unit.instance_id).await {
                Ok(()) => debug!(instance_id = %unit.instance_id, "Ephemeral unit stopped"),
                Err(e) => warn!(
                    instance_id = %unit.instance_id,
                    error = %e,
                    "Failed to stop ephemeral unit"
                ),
            }
            result
        };

        if is_unit {
            self.detach(identity, lifecycle);
            return Ok(Value::Null);
        }

        tokio::spawn(lifecycle)
            .await
            .map_err(|e| RouterError::remote(identity, 0, format!("call task failed: {e}")))?
    }

    /// Call a pooled unit.
    async fn call_pooled(
        &self,
        registration: &MethodRegistration,
        unit: ExecutionUnit,
        args: Vec<Value>,
    ) -> Result<Value, RouterError> {
        if registration.is_unit() {
            let invoker = self.invoker.clone();
            let policy = registration.policy.clone();
            self.detach(registration.identity.key(), async move {
                invoker.invoke(&unit, &policy, &args).await
            });
            return Ok(Value::Null);
        }

        self.invoker
            .invoke(&unit, &registration.policy, &args)
            .await
    }

    /// Run the in-process implementation.
    async fn call_local(
        registration: &MethodRegistration,
        args: Vec<Value>,
    ) -> Result<Value, RouterError> {
        let identity = registration.identity.key();
        let Some(local) = &registration.local else {
            return Err(RouterError::LocalUnavailable { identity });
        };

        debug!(identity = %identity, "No pooled unit, running locally");
        local(args)
            .await
            .map_err(|e| RouterError::local(identity, e.to_string()))
    }

    /// Run a call on a detached task, logging its failure.
    fn detach<F>(&self, identity: String, call: F)
    where
        F: Future<Output = Result<Value, RouterError>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            if let Err(e) = call.await {
                warn!(identity = %identity, error = %e, "Detached call failed");
            }
        });

        let mut detached = self.detached.lock();
        detached.retain(|h| !h.is_finished());
        detached.push(handle);
    }

    /// Wait for every detached call started so far.
    pub async fn drain_detached(&self) {
        let handles = std::mem::take(&mut *self.detached.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Detached call task failed");
            }
        }
    }

    /// Stop every pooled unit. Failures are logged and never abort the
    /// sweep. Returns the number of units stopped.
    #[instrument(skip(self))]
    pub async fn shutdown_all(&self) -> usize {
        let units = self.pool.drain();
        let mut stopped = 0;

        for unit in units {
            match self.orchestrator.stop(&unit.instance_id).await {
                Ok(()) => stopped += 1,
                Err(e) => warn!(
                    identity = %unit.identity,
                    instance_id = %unit.instance_id,
                    error = %e,
                    "Failed to stop pooled unit"
                ),
            }
        }

        info!(stopped, "Pooled units stopped");
        stopped
    }

    /// Wait for detached calls, stop every pooled unit and release the
    /// orchestrator's shared resources.
    pub async fn shutdown(&self) {
        self.drain_detached().await;
        self.shutdown_all().await;

        if let Err(e) = self.orchestrator.cleanup().await {
            warn!(backend = self.orchestrator.name(), error = %e, "Orchestrator cleanup failed");
        }
    }
}
