use axum::{
    extract::{Path, State},
    Json,
};
use conclave_core::AppState;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AdminUser;

#[derive(Deserialize)]
pub struct SetFlagsRequest {
    pub flags: i32,
}

pub async fn set_user_flags(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(user_id): Path<i64>,
    Json(body): Json<SetFlagsRequest>,
) -> Result<Json<Value>, ApiError> {
    conclave_db::users::set_user_flags(&state.db, user_id, body.flags).await?;
    tracing::info!(admin_id = admin.user_id, user_id, flags = body.flags, "user flags updated");
    Ok(Json(json!({ "id": user_id.to_string(), "flags": body.flags })))
}
