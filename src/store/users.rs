use chrono::Utc;
use sqlx::SqlitePool;

use super::bounded;
use crate::auth::verify_password;
use crate::error::{AppError, AppResult};
use crate::models::User;

pub async fn create_user(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    password_hash: &str,
) -> AppResult<User> {
    bounded(async {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (name, email, password_hash, created_at)
             VALUES ($1, $2, $3, $4)
             RETURNING id, name, email, password_hash, created_at",
        )
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(user)
    })
    .await
}

pub async fn by_id(pool: &SqlitePool, user_id: i64) -> AppResult<User> {
    bounded(async {
        sqlx::query_as::<_, User>(
            "SELECT id, name, email, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
    })
    .await
}

/// Check email + password against the stored bcrypt hash.
///
/// Unknown email and wrong password produce the same error; callers are
/// expected to rate-limit at the API edge.
pub async fn authenticate_user(pool: &SqlitePool, email: &str, password: &str) -> AppResult<User> {
    bounded(async {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, email, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("Invalid email or password".into()))?;

        if !verify_password(password, &user.password_hash)? {
            return Err(AppError::Unauthenticated("Invalid email or password".into()));
        }

        Ok(user)
    })
    .await
}
