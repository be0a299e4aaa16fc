use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use super::shared::is_event_host;
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
    store,
    websocket::{MembershipAction, MembershipChange},
};

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/events/:id/chat/requests — ask the host to join an event's
/// conversation.
pub async fn request_join(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(event_id): Path<i64>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let request =
        store::join_requests::create_join_request(&state.pool, event_id, auth.user_id()).await?;

    Ok((StatusCode::CREATED, Json(json!({ "request": request }))))
}

/// POST /api/events/:id/chat/requests/:user_id/approve — host approves a
/// pending request; the requester is enrolled and live sessions are attached.
pub async fn approve_join(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((event_id, user_id)): Path<(i64, i64)>,
) -> AppResult<Json<Value>> {
    let (request, conversation_id) =
        store::join_requests::approve_join_request(&state.pool, event_id, user_id, auth.user_id())
            .await?;

    state
        .hub
        .notify_membership(MembershipChange {
            conversation_id,
            user_id,
            action: MembershipAction::Added,
        })
        .await;

    Ok(Json(
        json!({ "request": request, "conversation_id": conversation_id }),
    ))
}

/// POST /api/events/:id/chat/requests/:user_id/deny — host denies a pending
/// request. No membership change, no notification.
pub async fn deny_join(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((event_id, user_id)): Path<(i64, i64)>,
) -> AppResult<Json<Value>> {
    let request =
        store::join_requests::deny_join_request(&state.pool, event_id, user_id, auth.user_id())
            .await?;

    Ok(Json(json!({ "request": request })))
}

/// DELETE /api/events/:id/chat/members/:user_id — evict a member (host) or
/// leave (the member themselves). The host can never be removed.
pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((event_id, user_id)): Path<(i64, i64)>,
) -> AppResult<StatusCode> {
    let event = store::events::by_id(&state.pool, event_id).await?;

    if auth.user_id() != user_id && !is_event_host(&event, auth.user_id()) {
        return Err(AppError::Forbidden(
            "Only the event host or the member themselves can remove a member".into(),
        ));
    }

    let conversation_id =
        store::join_requests::remove_event_member(&state.pool, event_id, user_id).await?;

    state
        .hub
        .notify_membership(MembershipChange {
            conversation_id,
            user_id,
            action: MembershipAction::Removed,
        })
        .await;

    Ok(StatusCode::NO_CONTENT)
}
