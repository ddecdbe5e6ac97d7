//! Shared application state.
//!
//! This module provides [`AppState`], which holds shared resources
//! across all HTTP request handlers.

use std::sync::Arc;

use podcall_router::CallRouter;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
#[derive(Clone)]
pub struct AppState {
    /// Call router (shared with the binary for shutdown).
    router: Arc<CallRouter>,
}

impl AppState {
    /// Create application state around a call router.
    pub fn new(router: Arc<CallRouter>) -> Self {
        Self { router }
    }

    /// Get the call router.
    pub fn router(&self) -> &CallRouter {
        &self.router
    }

    /// Get a shared handle to the call router.
    pub fn shared_router(&self) -> Arc<CallRouter> {
        self.router.clone()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("backend", &self.router.backend())
            .field("methods", &self.router.identities().len())
            .field("pooled_units", &self.router.pool().total())
            .finish_non_exhaustive()
    }
}
