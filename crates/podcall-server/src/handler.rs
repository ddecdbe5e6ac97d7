//! Request handlers for routed calls.
//!
//! This module provides the HTTP handlers that decode call envelopes,
//! hand them to the call router, and report the router's state.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use podcall_router::CallEnvelope;

use crate::response::ErrorResponse;
use crate::state::AppState;

/// Route one call.
///
/// The body is a call envelope, `["Type|Method", arg0, arg1, ...]`. The
/// response body is the method's JSON result, `null` for methods without
/// a return value.
#[instrument(skip(state, body))]
pub async fn invoke(State(state): State<AppState>, body: Bytes) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    let envelope = match CallEnvelope::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Rejected call envelope");
            return ErrorResponse::from(e).into_response();
        }
    };

    let identity = envelope.identity.key();
    let result = state.router().intercept(envelope).await;
    let duration_ms = start.elapsed().as_millis();

    match result {
        Ok(value) => {
            info!(
                request_id = %request_id,
                identity = %identity,
                duration_ms,
                "Call completed"
            );
            (StatusCode::OK, Json(value)).into_response()
        }
        Err(e) => {
            warn!(
                request_id = %request_id,
                identity = %identity,
                duration_ms,
                error = %e,
                "Call failed"
            );
            ErrorResponse::from(e).into_response()
        }
    }
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
///
/// Reports the backend, the registered methods and the pooled units.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let router = state.router();
    let methods: Vec<String> = router.identities().iter().map(|id| id.key()).collect();

    let body = serde_json::json!({
        "status": "ready",
        "backend": router.backend(),
        "methods": methods,
        "pooled_units": router.pool().total(),
    });

    (StatusCode::OK, Json(body))
}

/// Pooled unit count per method.
pub async fn list_pools(State(state): State<AppState>) -> impl IntoResponse {
    let router = state.router();
    let pools: BTreeMap<String, usize> = router
        .identities()
        .into_iter()
        .map(|id| {
            let count = router.pool().len(&id);
            (id.key(), count)
        })
        .collect();

    Json(serde_json::json!({
        "pools": pools,
        "total": router.pool().total(),
    }))
}
