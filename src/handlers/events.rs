use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use super::shared::validation_error;
use crate::{
    auth::AuthUser,
    error::AppResult,
    models::{DateLabel, NewEvent},
    state::AppState,
    store,
};

// ============================================================================
// Input validation
// ============================================================================

fn default_gender() -> String {
    "any".to_string()
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEventRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be 1–100 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 200, message = "Location must be 1–200 characters"))]
    pub location: String,
    #[validate(length(min = 1, max = 40, message = "Time must be 1–40 characters"))]
    pub time: String,
    pub date_label: DateLabel,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_gender")]
    pub gender: String,
    #[serde(default)]
    pub min_age: i64,
    #[serde(default)]
    pub max_age: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/events — publish an event. Its group conversation is created in
/// the same transaction with the caller enrolled as owner.
pub async fn create_event(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateEventRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    req.validate().map_err(validation_error)?;

    let (event, conversation) = store::events::create_event(
        &state.pool,
        NewEvent {
            host_user_id: auth.user_id(),
            title: req.title,
            location: req.location,
            time: req.time,
            date_label: req.date_label,
            description: req.description,
            gender: req.gender,
            min_age: req.min_age,
            max_age: req.max_age,
        },
    )
    .await?;

    let summary = store::conversations::summary(&state.pool, conversation.id, auth.user_id()).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "event": event, "conversation": summary })),
    ))
}
