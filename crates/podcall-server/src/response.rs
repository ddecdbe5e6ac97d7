//! HTTP responses for routing failures.
//!
//! Every failed call is answered with a JSON body of the form
//! `{"error": {"kind": "...", "message": "..."}}` and a status code
//! derived from the [`RouterError`] variant.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use podcall_common::RouterError;

/// A routing failure rendered as an HTTP response.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Machine-readable error kind.
    pub kind: &'static str,
    /// Human-readable message.
    pub message: String,
}

impl ErrorResponse {
    /// Create an error response.
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    /// The JSON body sent to the client.
    pub fn body(&self) -> serde_json::Value {
        json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
            }
        })
    }
}

impl From<&RouterError> for ErrorResponse {
    fn from(error: &RouterError) -> Self {
        let (status, kind) = match error {
            RouterError::Policy { .. } => (StatusCode::NOT_FOUND, "policy"),
            RouterError::InvalidEnvelope { .. } => (StatusCode::BAD_REQUEST, "invalid_envelope"),
            RouterError::RemoteInvocation { .. } => (StatusCode::BAD_GATEWAY, "remote_invocation"),
            RouterError::Orchestrator(_) => (StatusCode::SERVICE_UNAVAILABLE, "orchestrator"),
            RouterError::LocalUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "local_unavailable")
            }
            RouterError::LocalInvocation { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "local_invocation")
            }
            RouterError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serialization"),
            RouterError::Configuration { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration")
            }
        };
        Self::new(status, kind, error.to_string())
    }
}

impl From<RouterError> for ErrorResponse {
    fn from(error: RouterError) -> Self {
        Self::from(&error)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use podcall_common::OrchestratorError;

    #[test]
    fn test_policy_is_not_found() {
        let resp = ErrorResponse::from(RouterError::policy("Greeter|Greet"));
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(resp.kind, "policy");
        assert!(resp.message.contains("Greeter|Greet"));
    }

    #[test]
    fn test_envelope_is_bad_request() {
        let resp = ErrorResponse::from(RouterError::invalid_envelope("expected a JSON array"));
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_remote_is_bad_gateway() {
        let resp = ErrorResponse::from(RouterError::remote("Greeter|Greet", 503, "busy"));
        assert_eq!(resp.status, StatusCode::BAD_GATEWAY);
        assert_eq!(resp.body()["error"]["kind"], "remote_invocation");
    }

    #[test]
    fn test_unavailable() {
        let resp = ErrorResponse::from(RouterError::from(OrchestratorError::deploy("no capacity")));
        assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);

        let resp = ErrorResponse::from(RouterError::LocalUnavailable {
            identity: "Health|Ping".into(),
        });
        assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_local_failure_is_internal() {
        let resp = ErrorResponse::from(RouterError::local("Health|Ping", "boom"));
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_into_axum_response() {
        let resp = ErrorResponse::from(RouterError::policy("Greeter|Greet")).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
