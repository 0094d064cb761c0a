// crates/server/src/routes/jobs.rs
//! GET /jobs - job kinds a session can start.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use backdesk_core::JobKind;

use crate::state::AppState;

/// GET /api/jobs - List the job catalog.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobKind>> {
    Json(state.registry.catalog().kinds())
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/jobs", get(list_jobs))
}
