// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, HeaderName};
use backdesk_core::SessionRegistry;

use crate::config::Args;
use crate::error::{ApiError, ApiResult};
use crate::jobs::builtin_catalog;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Every live session. Its methods block, so handlers reach it through
    /// [`AppState::blocking`].
    pub registry: Arc<SessionRegistry>,
    /// Header set by the authenticating proxy.
    pub user_header: HeaderName,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, user_header: HeaderName) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            registry,
            user_header,
        })
    }

    /// Build the state described by the command line, with the built-in job
    /// catalog.
    pub fn from_args(args: &Args) -> anyhow::Result<Arc<Self>> {
        let registry = SessionRegistry::new(args.registry_config(), Arc::new(builtin_catalog()))?;
        Ok(Self::new(Arc::new(registry), args.user_header_name()?))
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// The authenticated caller, as named by the proxy header.
    pub fn caller(&self, headers: &HeaderMap) -> ApiResult<String> {
        headers
            .get(&self.user_header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::Unauthorized(self.user_header.to_string()))
    }

    /// Run `f` against the registry on the blocking pool. Acquiring a session
    /// may wait behind another request for the same session.
    pub async fn blocking<T, F>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&SessionRegistry) -> ApiResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || f(&registry))
            .await
            .map_err(|err| {
                if err.is_panic() {
                    ApiError::Internal("session request panicked".to_string())
                } else {
                    ApiError::Internal(format!("session request aborted: {err}"))
                }
            })?
    }
}
