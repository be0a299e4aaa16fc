use std::sync::Arc;

use sqlx::SqlitePool;

use crate::websocket::Hub;

/// Shared application state passed to all handlers and extractors.
///
/// `Hub` is cheaply cloneable (it holds only queue senders), so cloning
/// `AppState` for each request is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub session_secret: Arc<str>,
    pub hub: Hub,
}
