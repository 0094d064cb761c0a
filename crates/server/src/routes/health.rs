// crates/server/src/routes/health.rs
//! Liveness check for the proxy in front of backdesk.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Live sessions across all users, closing ones included.
    pub sessions: usize,
}

/// GET /api/health - Answers without identity, even while every session is
/// busy running a job: only the registry table lock is taken.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        sessions: state.registry.len(),
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use clap::Parser;

    #[tokio::test]
    async fn test_health_counts_sessions_while_one_is_held() {
        let state = AppState::from_args(&Args::parse_from(["backdesk"])).unwrap();
        let id = state.registry.create("alice").unwrap();
        state.registry.create("bob").unwrap();
        let _lease = state.registry.acquire(&id).unwrap();

        let Json(health) = health_check(State(state.clone())).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.sessions, 2);
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }
}
