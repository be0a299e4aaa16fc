use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use super::shared::{require_member, validation_error};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
    store,
};

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateConversationRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be 1–100 characters"))]
    pub title: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    /// Page size; non-positive or absent falls back to the default of 20.
    pub limit: Option<i64>,
    /// Rows to skip; negative is treated as 0.
    pub offset: Option<i64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/conversations — every conversation the caller belongs to,
/// newest-first, hydrated with participants, last message, and unread count.
pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Value>> {
    let conversations = store::conversations::list_for_user(&state.pool, auth.user_id()).await?;
    Ok(Json(json!({ "conversations": conversations })))
}

/// POST /api/conversations — create a direct or named-group conversation;
/// the caller is enrolled as owner.
pub async fn create_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateConversationRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    req.validate().map_err(validation_error)?;

    let conversation = store::conversations::create_conversation(
        &state.pool,
        req.title.as_deref(),
        auth.user_id(),
        &req.member_ids,
        None,
    )
    .await?;

    let summary =
        store::conversations::summary(&state.pool, conversation.id, auth.user_id()).await?;

    Ok((StatusCode::CREATED, Json(json!({ "conversation": summary }))))
}

/// GET /api/conversations/:id/messages — newest-first page (members only).
///
/// Returning a non-empty page acknowledges it: the caller's read cursor
/// advances to the newest returned id. A failed cursor write is logged, not
/// surfaced.
pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<i64>,
    Query(query): Query<ListMessagesQuery>,
) -> AppResult<Json<Value>> {
    if conversation_id <= 0 {
        return Err(AppError::InvalidInput(
            "Conversation id must be positive".into(),
        ));
    }

    require_member(&state.pool, conversation_id, auth.user_id()).await?;

    let messages = store::messages::list_messages(
        &state.pool,
        conversation_id,
        query.limit.unwrap_or(0),
        query.offset.unwrap_or(0),
    )
    .await?;

    if let Some(newest) = messages.first() {
        if let Err(e) = store::messages::update_read_cursor(
            &state.pool,
            conversation_id,
            auth.user_id(),
            newest.id,
        )
        .await
        {
            tracing::warn!(
                user_id = auth.user_id(),
                conversation_id,
                error = ?e,
                "Failed to advance read cursor after listing messages"
            );
        }
    }

    Ok(Json(json!({ "messages": messages })))
}
