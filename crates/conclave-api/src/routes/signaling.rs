use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use conclave_core::{signaling, AppState};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Deserialize)]
pub struct SignalRequest {
    pub to_user_id: String,
    pub payload: Value,
}

/// Fire-and-forget relay: 202 means the payload was handed to the fan-out,
/// not that the peer received it.
pub async fn relay_signal(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<i64>,
    Json(body): Json<SignalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let to_user_id = body
        .to_user_id
        .parse::<i64>()
        .map_err(|_| ApiError::BadRequest("invalid to_user_id".into()))?;

    signaling::relay(
        &state.db,
        &state.event_bus,
        session_id,
        auth.user_id,
        to_user_id,
        body.payload,
    )
    .await?;
    Ok(StatusCode::ACCEPTED)
}
