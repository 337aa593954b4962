use axum::{
    extract::{Path, State},
    Json,
};
use conclave_core::{participant, AppState};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

pub async fn list_participants(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(session_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let participants = participant::list_participants(&state.db, session_id).await?;
    let items: Vec<Value> = participants
        .iter()
        .map(participant::participant_json)
        .collect();
    Ok(Json(json!(items)))
}

pub async fn invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((session_id, user_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, ApiError> {
    let row = participant::invite(
        &state.db,
        &state.event_bus,
        session_id,
        auth.user_id,
        user_id,
    )
    .await?;
    Ok(Json(participant::participant_json(&row)))
}

pub async fn request_join(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let row =
        participant::request_join(&state.db, &state.event_bus, session_id, auth.user_id).await?;
    Ok(Json(participant::participant_json(&row)))
}

pub async fn accept_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let row = participant::accept(&state.db, &state.event_bus, session_id, auth.user_id).await?;
    Ok(Json(participant::participant_json(&row)))
}

pub async fn approve(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((session_id, user_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, ApiError> {
    let row = participant::approve(
        &state.db,
        &state.event_bus,
        session_id,
        auth.user_id,
        user_id,
        auth.is_admin,
    )
    .await?;
    Ok(Json(participant::participant_json(&row)))
}

pub async fn reject(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((session_id, user_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, ApiError> {
    let row = participant::reject(
        &state.db,
        &state.event_bus,
        session_id,
        auth.user_id,
        user_id,
        auth.is_admin,
    )
    .await?;
    Ok(Json(participant::participant_json(&row)))
}

pub async fn remove(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((session_id, user_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, ApiError> {
    let row = participant::remove(
        &state.db,
        &state.event_bus,
        session_id,
        auth.user_id,
        user_id,
        auth.is_admin,
    )
    .await?;
    Ok(Json(participant::participant_json(&row)))
}

pub async fn leave(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let row = participant::leave(&state.db, &state.event_bus, session_id, auth.user_id).await?;
    Ok(Json(participant::participant_json(&row)))
}
