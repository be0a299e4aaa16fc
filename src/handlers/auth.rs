use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use super::shared::validation_error;
use crate::{
    auth::{hash_password, mint_token},
    error::AppResult,
    models::UserDto,
    state::AppState,
    store,
};

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 80, message = "Name must be 1–80 characters"))]
    pub name: String,
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "Password must be 8–128 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/auth/register — create an account and mint a session token.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    req.validate().map_err(validation_error)?;

    let password_hash = hash_password(&req.password)?;
    let user = store::users::create_user(&state.pool, &req.name, &req.email, &password_hash).await?;
    let token = mint_token(user.id, user.email.clone(), &state.session_secret)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": UserDto::from(user), "token": token })),
    ))
}

/// POST /api/auth/login — verify credentials and mint a session token.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<Value>> {
    let user = store::users::authenticate_user(&state.pool, &req.email, &req.password).await?;
    let token = mint_token(user.id, user.email.clone(), &state.session_secret)?;

    Ok(Json(json!({ "user": UserDto::from(user), "token": token })))
}
