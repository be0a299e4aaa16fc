use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{AppError, AppResult};

pub async fn create_pool(database_url: &str) -> AppResult<SqlitePool> {
    info!("Connecting to database...");

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(AppError::Storage)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        // Write-busy retry window: a writer that hits SQLITE_BUSY backs off
        // and retries for up to 5 seconds before the call fails.
        .busy_timeout(Duration::from_secs(5));

    // SQLite under WAL is single-writer, multi-reader. An in-memory database
    // exists per connection, so tests pin the pool to one connection.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {:?}", e);
            AppError::Storage(e)
        })?;

    info!("Database connection pool created");
    Ok(pool)
}

pub async fn health_check(pool: &SqlitePool) -> AppResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(AppError::Storage)?;

    Ok(())
}

/// Apply the schema. Every statement is create-if-missing, so running this
/// against an already-migrated database is a no-op; additive columns go
/// through [`add_column_if_missing`] so databases created by older builds
/// survive upgrades.
pub async fn migrate(pool: &SqlitePool) -> AppResult<()> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS users (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            name          TEXT NOT NULL,
            email         TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            host_user_id INTEGER NOT NULL REFERENCES users(id),
            title        TEXT NOT NULL,
            location     TEXT NOT NULL,
            time         TEXT NOT NULL,
            date_label   TEXT NOT NULL CHECK (date_label IN ('Today', 'Tmrw')),
            description  TEXT NOT NULL DEFAULT '',
            gender       TEXT NOT NULL DEFAULT 'any',
            min_age      INTEGER NOT NULL DEFAULT 0,
            max_age      INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL,
            CHECK (min_age >= 0 AND min_age <= max_age)
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            title      TEXT,
            created_by INTEGER NOT NULL REFERENCES users(id),
            event_id   INTEGER UNIQUE REFERENCES events(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversation_members (
            conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            user_id         INTEGER NOT NULL REFERENCES users(id),
            role            TEXT NOT NULL DEFAULT 'member' CHECK (role IN ('owner', 'member')),
            joined_at       TEXT NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id       INTEGER NOT NULL REFERENCES users(id),
            body            TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
            ON messages(conversation_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS read_cursors (
            conversation_id      INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            user_id              INTEGER NOT NULL REFERENCES users(id),
            last_read_message_id INTEGER NOT NULL DEFAULT 0,
            updated_at           TEXT NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS join_requests (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id   INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            user_id    INTEGER NOT NULL REFERENCES users(id),
            status     TEXT NOT NULL DEFAULT 'pending'
                       CHECK (status IN ('pending', 'approved', 'denied')),
            created_at TEXT NOT NULL,
            decided_at TEXT,
            decided_by INTEGER REFERENCES users(id)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_join_requests_pending
            ON join_requests(event_id, user_id) WHERE status = 'pending';",
    )
    .execute(pool)
    .await?;

    // Columns added after the initial schema shipped.
    add_column_if_missing(pool, "messages", "attachment_url", "TEXT").await?;
    add_column_if_missing(
        pool,
        "messages",
        "delivery_status",
        "TEXT NOT NULL DEFAULT 'sent'",
    )
    .await?;

    Ok(())
}

/// Inspect-then-alter: `ALTER TABLE ... ADD COLUMN` only when
/// `pragma_table_info` does not already list the column.
async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    definition: &str,
) -> AppResult<()> {
    let present: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info($1) WHERE name = $2")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;

    if present == 0 {
        sqlx::query(&format!(
            "ALTER TABLE {table} ADD COLUMN {column} {definition}"
        ))
        .execute(pool)
        .await?;
        info!(table, column, "Added column during migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        // A second run must be a clean no-op.
        migrate(&pool).await.unwrap();
        health_check(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn migrate_adds_additive_columns() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        migrate(&pool).await.unwrap();

        let present: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('messages')
             WHERE name IN ('attachment_url', 'delivery_status')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(present, 2);
    }
}
