use chrono::Utc;
use sqlx::SqlitePool;

use super::bounded;
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Event, MemberRole, NewEvent};

/// Publish an event. Atomically inserts the event row, its event-group
/// conversation (titled after the event), and the host's `owner` membership —
/// the conversation exists for exactly as long as the event does.
pub async fn create_event(
    pool: &SqlitePool,
    new: NewEvent,
) -> AppResult<(Event, Conversation)> {
    if new.min_age < 0 || new.min_age > new.max_age {
        return Err(AppError::InvalidInput(
            "min_age must satisfy 0 <= min_age <= max_age".into(),
        ));
    }

    bounded(async {
        let mut tx = pool.begin().await?;
        let now = Utc::now();

        let event = sqlx::query_as::<_, Event>(
            "INSERT INTO events
               (host_user_id, title, location, time, date_label, description,
                gender, min_age, max_age, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING id, host_user_id, title, location, time, date_label,
                       description, gender, min_age, max_age, created_at",
        )
        .bind(new.host_user_id)
        .bind(&new.title)
        .bind(&new.location)
        .bind(&new.time)
        .bind(new.date_label)
        .bind(&new.description)
        .bind(&new.gender)
        .bind(new.min_age)
        .bind(new.max_age)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (title, created_by, event_id, created_at)
             VALUES ($1, $2, $3, $4)
             RETURNING id, title, created_by, event_id, created_at",
        )
        .bind(&event.title)
        .bind(event.host_user_id)
        .bind(event.id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(conversation.id)
        .bind(event.host_user_id)
        .bind(MemberRole::Owner)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((event, conversation))
    })
    .await
}

pub async fn by_id(pool: &SqlitePool, event_id: i64) -> AppResult<Event> {
    bounded(async {
        sqlx::query_as::<_, Event>(
            "SELECT id, host_user_id, title, location, time, date_label,
                    description, gender, min_age, max_age, created_at
             FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".into()))
    })
    .await
}
