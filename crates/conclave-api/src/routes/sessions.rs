use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use conclave_core::{session, AppState};
use conclave_db::sessions::SessionFilter;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub title: String,
    pub description: Option<String>,
    pub mode: String,
    pub max_participants: i32,
}

pub async fn create_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (created, creator) = session::create_session(
        &state.db,
        auth.user_id,
        &body.title,
        body.description.as_deref(),
        &body.mode,
        body.max_participants,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "session": session::session_json(&created),
            "creator": conclave_core::participant::participant_json(&creator),
        })),
    ))
}

pub async fn get_session(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(session_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let found = session::get_session(&state.db, session_id).await?;
    Ok(Json(session::session_json(&found)))
}

#[derive(Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default)]
    pub active: bool,
    pub creator_id: Option<i64>,
    /// When set, only sessions the caller has a participant row in.
    #[serde(default)]
    pub mine: bool,
    pub before: Option<i64>,
    pub limit: Option<u32>,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = SessionFilter {
        active_only: query.active,
        creator_id: query.creator_id,
        member_id: query.mine.then_some(auth.user_id),
    };
    let limit = i64::from(query.limit.unwrap_or(50).clamp(1, 100));
    let sessions = session::list_sessions(&state.db, filter, query.before, limit).await?;
    let items: Vec<Value> = sessions.iter().map(session::session_json).collect();
    Ok(Json(json!(items)))
}

pub async fn end_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let ended = session::end_session(
        &state.db,
        &state.event_bus,
        session_id,
        auth.user_id,
        auth.is_admin,
    )
    .await?;
    Ok(Json(session::session_json(&ended)))
}
