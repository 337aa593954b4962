use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use conclave_core::{message, AppState};
use conclave_models::message::AttachmentMeta;
use conclave_util::pagination::{CursorPage, CursorParams};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    pub attachment: Option<AttachmentMeta>,
}

fn default_message_type() -> String {
    "text".to_string()
}

pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<i64>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let row = message::append_message(
        &state.db,
        &state.event_bus,
        &state.config,
        session_id,
        auth.user_id,
        body.content.as_deref(),
        &body.message_type,
        body.attachment.as_ref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(message::message_json(&row))))
}

pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<i64>,
    Query(cursor): Query<CursorParams>,
) -> Result<Json<CursorPage<Value>>, ApiError> {
    let limit = cursor.limit();
    let rows = message::list_messages(
        &state.db,
        session_id,
        auth.user_id,
        cursor.after,
        limit,
    )
    .await?;
    let has_more = rows.len() as i64 == limit;
    let items: Vec<Value> = rows.iter().map(message::message_json).collect();
    Ok(Json(CursorPage { items, has_more }))
}

pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((session_id, message_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    message::moderate_delete(
        &state.db,
        &state.event_bus,
        session_id,
        message_id,
        auth.user_id,
        auth.is_admin,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
