use sqlx::SqlitePool;

use crate::{
    error::{AppError, AppResult},
    models::Event,
    store,
};

/// Convert [`validator::ValidationErrors`] into an [`AppError::InvalidInput`]
/// with a human-readable message. Shared across all handler modules to avoid
/// copy-pasting the same boilerplate.
pub fn validation_error(e: validator::ValidationErrors) -> AppError {
    AppError::InvalidInput(
        e.field_errors()
            .values()
            .flat_map(|v| v.iter())
            .filter_map(|e| e.message.as_ref())
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Verify the user is a member of the conversation; non-members get 403.
///
/// Always a fresh store read — membership can change while a token (or a
/// live session) is outstanding.
pub async fn require_member(
    pool: &SqlitePool,
    conversation_id: i64,
    user_id: i64,
) -> AppResult<()> {
    if store::conversations::is_member(pool, conversation_id, user_id).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Not a member of this conversation".into(),
        ))
    }
}

/// True iff the user hosts the event.
pub fn is_event_host(event: &Event, user_id: i64) -> bool {
    event.host_user_id == user_id
}
