use chrono::Utc;
use sqlx::SqlitePool;

use super::{bounded, messages};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationSummary, EventSummary, LastMessage, MemberRole, Participant,
};

/// Create a direct or named-group conversation. The creator is enrolled as
/// `owner`, every other deduplicated member id as `member`; all rows land in
/// one transaction.
pub async fn create_conversation(
    pool: &SqlitePool,
    title: Option<&str>,
    creator_id: i64,
    member_ids: &[i64],
    event_id: Option<i64>,
) -> AppResult<Conversation> {
    bounded(async {
        let mut tx = pool.begin().await?;
        let now = Utc::now();

        let conversation = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (title, created_by, event_id, created_at)
             VALUES ($1, $2, $3, $4)
             RETURNING id, title, created_by, event_id, created_at",
        )
        .bind(title)
        .bind(creator_id)
        .bind(event_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(conversation.id)
        .bind(creator_id)
        .bind(MemberRole::Owner)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut seen = std::collections::HashSet::from([creator_id]);
        for &member_id in member_ids {
            if !seen.insert(member_id) {
                continue;
            }
            sqlx::query(
                "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(conversation.id)
            .bind(member_id)
            .bind(MemberRole::Member)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(conversation)
    })
    .await
}

pub async fn by_id(pool: &SqlitePool, conversation_id: i64) -> AppResult<Conversation> {
    bounded(async {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, title, created_by, event_id, created_at
             FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Conversation not found".into()))
    })
    .await
}

pub async fn by_event_id(pool: &SqlitePool, event_id: i64) -> AppResult<Conversation> {
    bounded(async {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, title, created_by, event_id, created_at
             FROM conversations WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Conversation not found".into()))
    })
    .await
}

/// Side-effect-free membership probe. Every send authorization goes through
/// here — membership can change while a session is alive, so this is always
/// a fresh read, never a cache.
pub async fn is_member(pool: &SqlitePool, conversation_id: i64, user_id: i64) -> AppResult<bool> {
    bounded(async {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM conversation_members
                 WHERE conversation_id = $1 AND user_id = $2
             )",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    })
    .await
}

/// Conversation ids the user belongs to; seeds a fresh session's
/// subscription set.
pub async fn ids_for_user(pool: &SqlitePool, user_id: i64) -> AppResult<Vec<i64>> {
    bounded(async {
        let ids = sqlx::query_scalar(
            "SELECT conversation_id FROM conversation_members WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(ids)
    })
    .await
}

/// All conversations for the user, newest-first, each hydrated with member
/// ids, participants, newest-message preview, unread count, and event
/// metadata.
pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: i64,
) -> AppResult<Vec<ConversationSummary>> {
    bounded(async {
        let conversations = sqlx::query_as::<_, Conversation>(
            "SELECT c.id, c.title, c.created_by, c.event_id, c.created_at
             FROM conversations c
             JOIN conversation_members cm ON cm.conversation_id = c.id
             WHERE cm.user_id = $1
             ORDER BY c.created_at DESC, c.id DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            summaries.push(hydrate(pool, conversation, user_id).await?);
        }

        Ok(summaries)
    })
    .await
}

/// Hydrated summary for a single conversation, as seen by `user_id`.
pub async fn summary(
    pool: &SqlitePool,
    conversation_id: i64,
    user_id: i64,
) -> AppResult<ConversationSummary> {
    let conversation = by_id(pool, conversation_id).await?;
    bounded(hydrate(pool, conversation, user_id)).await
}

async fn hydrate(
    pool: &SqlitePool,
    conversation: Conversation,
    user_id: i64,
) -> AppResult<ConversationSummary> {
    let member_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT user_id FROM conversation_members
         WHERE conversation_id = $1
         ORDER BY joined_at ASC, user_id ASC",
    )
    .bind(conversation.id)
    .fetch_all(pool)
    .await?;

    let participants = sqlx::query_as::<_, Participant>(
        "SELECT u.id, u.name
         FROM conversation_members cm
         JOIN users u ON u.id = cm.user_id
         WHERE cm.conversation_id = $1
         ORDER BY cm.joined_at ASC, u.id ASC",
    )
    .bind(conversation.id)
    .fetch_all(pool)
    .await?;

    let last_message = sqlx::query_as::<_, LastMessage>(
        "SELECT id, sender_id, body, created_at
         FROM messages
         WHERE conversation_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT 1",
    )
    .bind(conversation.id)
    .fetch_optional(pool)
    .await?;

    let unread_count = messages::unread_count(pool, conversation.id, user_id).await?;

    let event = match conversation.event_id {
        Some(event_id) => {
            sqlx::query_as::<_, EventSummary>(
                "SELECT id, title, location, time, date_label FROM events WHERE id = $1",
            )
            .bind(event_id)
            .fetch_optional(pool)
            .await?
        }
        None => None,
    };

    Ok(ConversationSummary {
        id: conversation.id,
        title: conversation.title,
        created_by: conversation.created_by,
        created_at: conversation.created_at,
        event_id: conversation.event_id,
        member_ids,
        participants,
        last_message,
        unread_count,
        event,
    })
}
