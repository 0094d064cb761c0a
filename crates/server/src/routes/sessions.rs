// crates/server/src/routes/sessions.rs
//! Session lifecycle endpoints.
//!
//! Every handler identifies the caller from the proxy header, then does its
//! registry work on the blocking pool: acquiring a session waits for any
//! other request holding it.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use backdesk_core::session::MAX_DISPLAY_NAME_CHARS;
use backdesk_core::{Landing, SessionRequest, SessionSummary, SessionView};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of POST /api/sessions. An empty body is accepted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreateSessionRequest {
    pub display_name: Option<String>,
}

/// Response for the session listing endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
}

impl From<Vec<SessionSummary>> for SessionListResponse {
    fn from(sessions: Vec<SessionSummary>) -> Self {
        Self {
            total: sessions.len(),
            sessions,
        }
    }
}

/// Response for GET /api/session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntryResponse {
    /// First visit: a session was opened for the caller.
    Created { session: SessionView },
    /// The caller's only session.
    Resumed { session: SessionView },
    /// Several sessions; the front end shows the chooser.
    Choose {
        sessions: Vec<SessionSummary>,
        total: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseResponse {
    pub closed: usize,
}

/// GET /api/sessions - The caller's sessions.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionListResponse>> {
    let caller = state.caller(&headers)?;
    let summaries = state
        .blocking(move |registry| Ok(registry.summaries_for(&caller)))
        .await?;
    Ok(Json(summaries.into()))
}

/// GET /api/sessions/all - Every live session, for the administration page.
pub async fn list_all_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionListResponse>> {
    state.caller(&headers)?;
    let summaries = state
        .blocking(|registry| Ok(registry.list_summaries()))
        .await?;
    Ok(Json(summaries.into()))
}

/// POST /api/sessions - Open a new session for the caller.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SessionView>)> {
    let caller = state.caller(&headers)?;
    let request = parse_create_request(&body)?;
    let display_name = validate_display_name(request.display_name)?;

    let view = state
        .blocking(move |registry| {
            let id = registry.create_named(&caller, display_name)?;
            let lease = registry
                .acquire_for(&caller, &id)
                .ok_or_else(|| ApiError::SessionNotFound(id.clone()))?;
            Ok(lease.handle(SessionRequest::Refresh))
        })
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/session - Where a visit without a session id lands: a new
/// session on the first visit, the only session if there is one, otherwise
/// the list to pick from.
pub async fn enter_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<EntryResponse>)> {
    let caller = state.caller(&headers)?;
    let entry = state
        .blocking(move |registry| {
            let (id, created) = match registry.land(&caller)? {
                Landing::Choose(sessions) => {
                    return Ok(EntryResponse::Choose {
                        total: sessions.len(),
                        sessions,
                    });
                }
                Landing::Created(id) => (id, true),
                Landing::Sole(id) => (id, false),
            };
            let lease = registry
                .acquire_for(&caller, &id)
                .ok_or_else(|| ApiError::SessionNotFound(id.clone()))?;
            let session = lease.handle(SessionRequest::Refresh);
            Ok(if created {
                EntryResponse::Created { session }
            } else {
                EntryResponse::Resumed { session }
            })
        })
        .await?;
    let status = match entry {
        EntryResponse::Created { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(entry)))
}

/// GET /api/sessions/{id} - Current state of one session.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let caller = state.caller(&headers)?;
    handle_request(&state, caller, session_id, SessionRequest::Refresh).await
}

/// POST /api/sessions/{id} - Apply one session request.
pub async fn post_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(request): Json<SessionRequest>,
) -> ApiResult<Json<SessionView>> {
    let caller = state.caller(&headers)?;
    handle_request(&state, caller, session_id, request).await
}

/// DELETE /api/sessions/{id} - Close a session. A running job is stopped
/// once the last request holding the session finishes.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> ApiResult<Json<CloseResponse>> {
    let caller = state.caller(&headers)?;
    let closed = state
        .blocking(move |registry| {
            if !registry.close_for(&caller, &session_id) {
                return Err(ApiError::SessionNotFound(session_id));
            }
            Ok(1)
        })
        .await?;
    Ok(Json(CloseResponse { closed }))
}

/// POST /api/logout - Close all of the caller's sessions.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<CloseResponse>> {
    let caller = state.caller(&headers)?;
    let closed = state
        .blocking(move |registry| Ok(registry.close_all_for(&caller)))
        .await?;
    Ok(Json(CloseResponse { closed }))
}

async fn handle_request(
    state: &AppState,
    caller: String,
    session_id: String,
    request: SessionRequest,
) -> ApiResult<Json<SessionView>> {
    let view = state
        .blocking(move |registry| {
            let lease = registry
                .acquire_for(&caller, &session_id)
                .ok_or_else(|| ApiError::SessionNotFound(session_id.clone()))?;
            Ok(lease.handle(request))
        })
        .await?;
    Ok(Json(view))
}

fn parse_create_request(body: &[u8]) -> ApiResult<CreateSessionRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CreateSessionRequest::default());
    }
    serde_json::from_slice(body).map_err(|err| ApiError::BadRequest(err.to_string()))
}

fn validate_display_name(name: Option<String>) -> ApiResult<Option<String>> {
    let Some(name) = name else {
        return Ok(None);
    };
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(ApiError::BadRequest(format!(
            "display name is longer than {MAX_DISPLAY_NAME_CHARS} characters"
        )));
    }
    Ok(Some(name.to_string()))
}

/// Create the session routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session", get(enter_session))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/all", get(list_all_sessions))
        .route(
            "/sessions/{id}",
            get(get_session).post(post_session).delete(delete_session),
        )
        .route("/logout", post(logout))
}
