use chrono::Utc;
use sqlx::SqlitePool;

use super::{bounded, conversations, events};
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Event, JoinRequest, JoinStatus, MemberRole};

/// Resolve the event and its conversation; a published event without a
/// conversation is a broken invariant, not a domain error.
async fn event_and_conversation(
    pool: &SqlitePool,
    event_id: i64,
) -> AppResult<(Event, Conversation)> {
    let event = events::by_id(pool, event_id).await?;
    let conversation = conversations::by_event_id(pool, event_id)
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) => {
                tracing::error!(event_id, "Event has no conversation");
                AppError::Internal
            }
            other => other,
        })?;
    Ok((event, conversation))
}

/// File a pending join request for an event's conversation.
///
/// At most one pending request per `(event, user)` pair; the host and
/// existing members cannot request to join.
pub async fn create_join_request(
    pool: &SqlitePool,
    event_id: i64,
    user_id: i64,
) -> AppResult<JoinRequest> {
    bounded(async {
        let (event, conversation) = event_and_conversation(pool, event_id).await?;

        if user_id == event.host_user_id
            || conversations::is_member(pool, conversation.id, user_id).await?
        {
            return Err(AppError::Conflict(
                "Already a member of this conversation".into(),
            ));
        }

        let pending: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM join_requests
                 WHERE event_id = $1 AND user_id = $2 AND status = 'pending'
             )",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        if pending {
            return Err(AppError::Conflict(
                "A join request is already pending".into(),
            ));
        }

        let request = sqlx::query_as::<_, JoinRequest>(
            "INSERT INTO join_requests (event_id, user_id, status, created_at)
             VALUES ($1, $2, $3, $4)
             RETURNING id, event_id, user_id, status, created_at, decided_at, decided_by",
        )
        .bind(event_id)
        .bind(user_id)
        .bind(JoinStatus::Pending)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(request)
    })
    .await
}

async fn pending_request(
    pool: &SqlitePool,
    event_id: i64,
    user_id: i64,
) -> AppResult<JoinRequest> {
    sqlx::query_as::<_, JoinRequest>(
        "SELECT id, event_id, user_id, status, created_at, decided_at, decided_by
         FROM join_requests
         WHERE event_id = $1 AND user_id = $2 AND status = 'pending'",
    )
    .bind(event_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Join request not found".into()))
}

/// Approve a pending request: flip it to `approved`, stamp the decision, and
/// enroll the requester — one transaction. Returns the decided request and
/// the event conversation's id (for the live membership notification).
pub async fn approve_join_request(
    pool: &SqlitePool,
    event_id: i64,
    requester_id: i64,
    approver_id: i64,
) -> AppResult<(JoinRequest, i64)> {
    bounded(async {
        let (event, conversation) = event_and_conversation(pool, event_id).await?;

        if approver_id != event.host_user_id {
            return Err(AppError::Forbidden(
                "Only the event host can decide join requests".into(),
            ));
        }

        let request = pending_request(pool, event_id, requester_id).await?;

        if conversations::is_member(pool, conversation.id, requester_id).await? {
            return Err(AppError::Conflict(
                "Already a member of this conversation".into(),
            ));
        }

        let mut tx = pool.begin().await?;
        let now = Utc::now();

        let request = sqlx::query_as::<_, JoinRequest>(
            "UPDATE join_requests
             SET status = $1, decided_at = $2, decided_by = $3
             WHERE id = $4
             RETURNING id, event_id, user_id, status, created_at, decided_at, decided_by",
        )
        .bind(JoinStatus::Approved)
        .bind(now)
        .bind(approver_id)
        .bind(request.id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(conversation.id)
        .bind(requester_id)
        .bind(MemberRole::Member)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((request, conversation.id))
    })
    .await
}

/// Deny a pending request. No membership change.
pub async fn deny_join_request(
    pool: &SqlitePool,
    event_id: i64,
    requester_id: i64,
    approver_id: i64,
) -> AppResult<JoinRequest> {
    bounded(async {
        let (event, _) = event_and_conversation(pool, event_id).await?;

        if approver_id != event.host_user_id {
            return Err(AppError::Forbidden(
                "Only the event host can decide join requests".into(),
            ));
        }

        let request = pending_request(pool, event_id, requester_id).await?;

        let request = sqlx::query_as::<_, JoinRequest>(
            "UPDATE join_requests
             SET status = $1, decided_at = $2, decided_by = $3
             WHERE id = $4
             RETURNING id, event_id, user_id, status, created_at, decided_at, decided_by",
        )
        .bind(JoinStatus::Denied)
        .bind(Utc::now())
        .bind(approver_id)
        .bind(request.id)
        .fetch_one(pool)
        .await?;

        Ok(request)
    })
    .await
}

/// Remove a member from an event conversation, deleting their read cursor in
/// the same transaction. The host can never be removed. Returns the
/// conversation id.
pub async fn remove_event_member(
    pool: &SqlitePool,
    event_id: i64,
    user_id: i64,
) -> AppResult<i64> {
    bounded(async {
        let (event, conversation) = event_and_conversation(pool, event_id).await?;

        if user_id == event.host_user_id {
            return Err(AppError::DomainRule(
                "The event host cannot be removed from its conversation".into(),
            ));
        }

        if !conversations::is_member(pool, conversation.id, user_id).await? {
            return Err(AppError::NotFound(
                "Not a member of this conversation".into(),
            ));
        }

        let mut tx = pool.begin().await?;

        sqlx::query(
            "DELETE FROM conversation_members WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation.id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM read_cursors WHERE conversation_id = $1 AND user_id = $2")
            .bind(conversation.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(conversation.id)
    })
    .await
}
