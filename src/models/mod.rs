use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// User Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UserDto {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        UserDto {
            id: user.id,
            name: user.name,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

// ============================================================================
// Event Models
// ============================================================================

/// "Today" / "Tmrw" label shown on event cards; the only two values the
/// product schedules over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum DateLabel {
    Today,
    Tmrw,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Event {
    pub id: i64,
    pub host_user_id: i64,
    pub title: String,
    pub location: String,
    pub time: String,
    pub date_label: DateLabel,
    pub description: String,
    pub gender: String,
    pub min_age: i64,
    pub max_age: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NewEvent {
    pub host_user_id: i64,
    pub title: String,
    pub location: String,
    pub time: String,
    pub date_label: DateLabel,
    pub description: String,
    pub gender: String,
    pub min_age: i64,
    pub max_age: i64,
}

/// Event metadata embedded in a [`ConversationSummary`].
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EventSummary {
    pub id: i64,
    pub title: String,
    pub location: String,
    pub time: String,
    pub date_label: DateLabel,
}

// ============================================================================
// Conversation Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub title: Option<String>,
    pub created_by: i64,
    pub event_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Member,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ConversationMember {
    pub conversation_id: i64,
    pub user_id: i64,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// `{id, name}` pair for the participant list, ordered by join time.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Participant {
    pub id: i64,
    pub name: String,
}

/// Newest-message preview on a conversation summary.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LastMessage {
    pub id: i64,
    pub sender_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Hydrated conversation row as returned by GET /api/conversations.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i64>,
    pub member_ids: Vec<i64>,
    pub participants: Vec<Participant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    pub unread_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EventSummary>,
}

// ============================================================================
// Message Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    pub delivery_status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub attachment_url: Option<String>,
    pub delivery_status: String,
}

// ============================================================================
// Read Cursor Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReadCursor {
    pub conversation_id: i64,
    pub user_id: i64,
    pub last_read_message_id: i64,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Join Request Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JoinStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JoinRequest {
    pub id: i64,
    pub event_id: i64,
    pub user_id: i64,
    pub status: JoinStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<i64>,
}
