//! API route handlers for the backdesk server.

pub mod health;
pub mod jobs;
pub mod sessions;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET    /api/health - Health check
/// - GET    /api/jobs - Job kinds a session can start
/// - GET    /api/session - Land on the caller's session (create, resume or choose)
/// - GET    /api/sessions - The caller's sessions
/// - POST   /api/sessions - Open a session
/// - GET    /api/sessions/all - Every live session
/// - GET    /api/sessions/{id} - Refresh one session
/// - POST   /api/sessions/{id} - Apply a session request
/// - DELETE /api/sessions/{id} - Close a session
/// - POST   /api/logout - Close all of the caller's sessions
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", sessions::router())
        .with_state(state)
}
