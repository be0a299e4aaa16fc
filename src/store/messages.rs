use chrono::Utc;
use sqlx::SqlitePool;

use super::bounded;
use crate::error::{AppError, AppResult};
use crate::models::{Message, NewMessage};

/// Default page size for [`list_messages`].
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Newest-first page of messages. A non-positive `limit` falls back to
/// [`DEFAULT_PAGE_SIZE`]; a negative `offset` is treated as 0.
pub async fn list_messages(
    pool: &SqlitePool,
    conversation_id: i64,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<Message>> {
    let limit = if limit <= 0 { DEFAULT_PAGE_SIZE } else { limit };
    let offset = offset.max(0);

    bounded(async {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, sender_id, body, attachment_url,
                    delivery_status, created_at
             FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(messages)
    })
    .await
}

/// Append a message. The body must be non-empty after trimming; the id and
/// timestamp are server-assigned.
pub async fn create_message(pool: &SqlitePool, new: NewMessage) -> AppResult<Message> {
    if new.body.trim().is_empty() {
        return Err(AppError::InvalidInput("Message body must not be empty".into()));
    }

    bounded(async {
        let message = sqlx::query_as::<_, Message>(
            "INSERT INTO messages
               (conversation_id, sender_id, body, attachment_url, delivery_status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, conversation_id, sender_id, body, attachment_url,
                       delivery_status, created_at",
        )
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(&new.body)
        .bind(&new.attachment_url)
        .bind(&new.delivery_status)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(message)
    })
    .await
}

/// Upsert the user's read cursor. A non-positive `last_read_message_id` is a
/// no-op, and an existing cursor never moves backwards.
pub async fn update_read_cursor(
    pool: &SqlitePool,
    conversation_id: i64,
    user_id: i64,
    last_read_message_id: i64,
) -> AppResult<()> {
    if last_read_message_id <= 0 {
        return Ok(());
    }

    bounded(async {
        sqlx::query(
            "INSERT INTO read_cursors (conversation_id, user_id, last_read_message_id, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (conversation_id, user_id)
             DO UPDATE SET
                 last_read_message_id = MAX(read_cursors.last_read_message_id, excluded.last_read_message_id),
                 updated_at = excluded.updated_at",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(last_read_message_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

/// Count of messages above the user's cursor (cursor 0 when absent).
pub async fn unread_count(
    pool: &SqlitePool,
    conversation_id: i64,
    user_id: i64,
) -> AppResult<i64> {
    bounded(async {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)
             FROM messages
             WHERE conversation_id = $1
               AND id > COALESCE(
                   (SELECT last_read_message_id FROM read_cursors
                    WHERE conversation_id = $1 AND user_id = $2),
                   0
               )",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    })
    .await
}
