use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use conclave_core::AppState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;

fn normalize_email(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

pub fn user_json(user: &conclave_db::users::UserRow) -> Value {
    json!({
        "id": user.id.to_string(),
        "username": user.username,
        "email": user.email,
        "flags": user.flags,
        "created_at": user.created_at.to_rfc3339(),
    })
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: Value,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.config.registration_enabled {
        return Err(ApiError::Forbidden);
    }

    conclave_util::validation::validate_username(&body.username)
        .map_err(|e| ApiError::Unprocessable(format!("username: {e}")))?;
    let email = normalize_email(&body.email);
    conclave_util::validation::validate_email(&email)
        .map_err(|e| ApiError::Unprocessable(format!("email: {e}")))?;
    conclave_util::validation::validate_password(&body.password)
        .map_err(|e| ApiError::Unprocessable(format!("password: {e}")))?;

    if conclave_db::users::get_user_by_email(&state.db, &email)
        .await?
        .is_some()
        || conclave_db::users::get_user_by_username(&state.db, &body.username)
            .await?
            .is_some()
    {
        // Deliberately vague; don't confirm which field collided.
        return Err(ApiError::BadRequest("Unable to complete registration".into()));
    }

    let password_hash = conclave_core::auth::hash_password(&body.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e.to_string())))?;
    let id = conclave_util::snowflake::generate(1);
    let user =
        conclave_db::users::create_user(&state.db, id, &body.username, &email, &password_hash)
            .await?;

    let token = conclave_core::auth::create_token(
        user.id,
        &state.config.jwt_secret,
        state.config.jwt_expiry_seconds,
    )
    .map_err(|e| ApiError::Internal(anyhow::anyhow!(e.to_string())))?;

    tracing::info!(user_id = user.id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user_json(&user),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = normalize_email(&body.email);
    let user = conclave_db::users::get_user_by_email(&state.db, &email)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let valid = conclave_core::auth::verify_password(&body.password, &user.password_hash)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e.to_string())))?;
    if !valid {
        return Err(ApiError::Unauthorized);
    }

    let token = conclave_core::auth::create_token(
        user.id,
        &state.config.jwt_secret,
        state.config.jwt_expiry_seconds,
    )
    .map_err(|e| ApiError::Internal(anyhow::anyhow!(e.to_string())))?;

    Ok(Json(AuthResponse {
        token,
        user: user_json(&user),
    }))
}
