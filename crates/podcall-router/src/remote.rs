//! Remote invocation of execution units.
//!
//! The unit wire contract: `POST /` with the positional arguments as a JSON
//! array, JSON in and out, and a bearer token unless the method is open.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;
use tracing::{debug, warn};

use podcall_common::{ContainerizationPolicy, ExecutionUnit, RouterConfig, RouterError};

/// Longest error body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for execution unit calls.
#[derive(Clone)]
pub struct RemoteInvoker {
    /// HTTP client (shared, connection pooled).
    client: Client,

    /// Upper bound on a call, if any.
    timeout: Option<Duration>,
}

impl RemoteInvoker {
    /// Create an invoker from the router configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: &RouterConfig) -> Result<Self, RouterError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(config.client_name.clone())
            .build()
            .map_err(|e| RouterError::configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout: config.call_timeout(),
        })
    }

    /// Call `unit` with `args` and return its JSON result.
    ///
    /// An empty response body is returned as `null`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::RemoteInvocation`] if the request fails, the
    /// unit answers with a non-success status, or the body is not JSON.
    pub async fn invoke(
        &self,
        unit: &ExecutionUnit,
        policy: &ContainerizationPolicy,
        args: &[Value],
    ) -> Result<Value, RouterError> {
        let identity = unit.identity.key();
        let endpoint = unit.endpoint();

        let mut request = self
            .client
            .post(&endpoint)
            .header(ACCEPT, "application/json")
            .json(args);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        if let Some(authorization) = policy.authorization() {
            request = request.header(AUTHORIZATION, authorization);
        }

        debug!(
            identity = %identity,
            instance_id = %unit.instance_id,
            endpoint = %endpoint,
            args = args.len(),
            "Invoking execution unit"
        );

        let response = request.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            };
            RouterError::remote(&identity, 0, reason)
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RouterError::remote(&identity, status.as_u16(), e.to_string()))?;

        if !status.is_success() {
            let excerpt = String::from_utf8_lossy(&body[..body.len().min(MAX_ERROR_BODY)]);
            warn!(
                identity = %identity,
                instance_id = %unit.instance_id,
                status = status.as_u16(),
                "Execution unit returned an error"
            );
            return Err(RouterError::remote(
                &identity,
                status.as_u16(),
                excerpt.into_owned(),
            ));
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&body).map_err(|e| {
            RouterError::remote(
                &identity,
                status.as_u16(),
                format!("invalid JSON response: {e}"),
            )
        })
    }
}
