//! Admin API handlers for pool management.
//!
//! # Authentication
//!
//! All Admin API endpoints require the `X-Admin-Token` header
//! to match the configured admin token. The comparison runs in
//! constant time.
//!
//! # Endpoints
//!
//! - `GET /admin/pools` - List every pooled unit
//! - `POST /admin/shutdown` - Stop every pooled unit

use axum::{
    Extension, Json, Router,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{info, instrument};

use podcall_common::ExecutionUnit;

use crate::state::AppState;

/// Admin API state containing app state and auth token.
#[derive(Clone)]
pub struct AdminState {
    /// Application state (call router).
    pub app_state: AppState,
    /// Expected admin token for authentication.
    pub admin_token: String,
}

/// Pooled unit information for API responses.
#[derive(Debug, Serialize)]
pub struct UnitInfo {
    /// Backend instance identifier.
    pub instance_id: String,
    /// Host the unit is reachable at.
    pub host: String,
    /// Port the unit is reachable at.
    pub port: u16,
    /// Full endpoint URL.
    pub endpoint: String,
}

impl From<&ExecutionUnit> for UnitInfo {
    fn from(unit: &ExecutionUnit) -> Self {
        Self {
            instance_id: unit.instance_id.clone(),
            host: unit.host.clone(),
            port: unit.port,
            endpoint: unit.endpoint(),
        }
    }
}

/// Pool of one method for API responses.
#[derive(Debug, Serialize)]
pub struct PoolInfo {
    /// `Type|Method` key.
    pub identity: String,
    /// Units in start order.
    pub units: Vec<UnitInfo>,
}

/// Build the Admin API router.
///
/// Returns a router that uses Extension to pass the admin state,
/// allowing it to be nested into routers with different state types.
///
/// # Arguments
///
/// * `admin_state` - Admin state containing app state and auth token
pub fn build_admin_router(admin_state: AdminState) -> Router<AppState> {
    Router::new()
        .route("/pools", get(list_pools_admin))
        .route("/shutdown", post(shutdown_pools))
        .layer(Extension(admin_state))
}

/// Verify the admin token from request headers.
fn verify_token(headers: &HeaderMap, expected: &str) -> Result<(), (StatusCode, &'static str)> {
    match headers.get("X-Admin-Token") {
        Some(token) => {
            if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
                Ok(())
            } else {
                Err((StatusCode::UNAUTHORIZED, "Invalid admin token"))
            }
        }
        None => Err((StatusCode::UNAUTHORIZED, "Missing X-Admin-Token header")),
    }
}

/// List every pooled unit.
///
/// # Request
///
/// `GET /admin/pools`
///
/// # Response
///
/// ```json
/// {
///   "pools": [
///     {
///       "identity": "Sample.UserService|CreateUser",
///       "units": [
///         {
///           "instance_id": "3f2a...",
///           "host": "localhost",
///           "port": 6123,
///           "endpoint": "http://localhost:6123/"
///         }
///       ]
///     }
///   ],
///   "total": 1
/// }
/// ```
#[instrument(skip(admin_state, headers))]
pub async fn list_pools_admin(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = verify_token(&headers, &admin_state.admin_token) {
        return e.into_response();
    }

    let pools: Vec<PoolInfo> = admin_state
        .app_state
        .router()
        .pool()
        .snapshot()
        .into_iter()
        .map(|(identity, units)| PoolInfo {
            identity: identity.key(),
            units: units.iter().map(UnitInfo::from).collect(),
        })
        .collect();

    let total: usize = pools.iter().map(|p| p.units.len()).sum();

    Json(serde_json::json!({
        "pools": pools,
        "total": total
    }))
    .into_response()
}

/// Stop every pooled unit.
///
/// Methods whose pool is emptied fall back to their local implementation.
///
/// # Request
///
/// `POST /admin/shutdown`
///
/// # Response
///
/// ```json
/// {
///   "stopped": 3
/// }
/// ```
#[instrument(skip(admin_state, headers))]
pub async fn shutdown_pools(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = verify_token(&headers, &admin_state.admin_token) {
        return e.into_response();
    }

    let stopped = admin_state.app_state.router().shutdown_all().await;
    info!(stopped, "Pools shut down via Admin API");

    Json(serde_json::json!({ "stopped": stopped })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_token_valid() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Admin-Token", "secret".parse().unwrap());

        let result = verify_token(&headers, "secret");
        assert!(result.is_ok());
    }

    #[test]
    fn test_verify_token_invalid() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Admin-Token", "wrong".parse().unwrap());

        let result = verify_token(&headers, "secret");
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_verify_token_prefix_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Admin-Token", "secret-and-more".parse().unwrap());

        assert!(verify_token(&headers, "secret").is_err());
    }

    #[test]
    fn test_verify_token_missing() {
        let headers = HeaderMap::new();

        let result = verify_token(&headers, "secret");
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_unit_info() {
        let unit = ExecutionUnit::new(
            "c1",
            podcall_common::MethodIdentity::new("Greeter", "Greet"),
            "localhost",
            6001,
        );
        let info = UnitInfo::from(&unit);
        assert_eq!(info.endpoint, "http://localhost:6001/");
    }
}
