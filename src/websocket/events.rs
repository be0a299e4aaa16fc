use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::models::Message;

// ============================================================================
// Client → server frames
// ============================================================================

/// Inbound envelope, a tagged union over `type`. Unknown types decode to
/// [`ClientFrame::Unknown`] so a newer client never kills the session.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "message:send")]
    MessageSend {
        #[serde(rename = "conversationId", default)]
        conversation_id: i64,
        #[serde(default)]
        body: String,
        #[serde(rename = "tempId", default)]
        temp_id: Option<String>,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(other)]
    Unknown,
}

// ============================================================================
// Server → client frames
// ============================================================================

/// Message body as it crosses the socket. `created_at` is RFC 3339 with
/// nanoseconds, matching what clients parse for ordering.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub created_at: String,
}

impl WireMessage {
    pub fn from_message(message: &Message) -> Self {
        WireMessage {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            body: message.body.clone(),
            created_at: message
                .created_at
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipAction {
    Added,
    Removed,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// A persisted message, fanned out to every subscriber. `tempId` echoes
    /// the sender's optimistic-send correlator to all subscribers — clients
    /// reconcile by `(senderId, tempId)`, never by `tempId` alone.
    #[serde(rename = "message:new")]
    MessageNew {
        #[serde(rename = "tempId", skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
        message: WireMessage,
    },
    #[serde(rename = "conversation:membership")]
    Membership {
        #[serde(rename = "conversationId")]
        conversation_id: i64,
        #[serde(rename = "userId")]
        user_id: i64,
        action: MembershipAction,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "system:error")]
    SystemError { code: &'static str },
}

impl ServerFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = ?e, "Failed to serialize server frame");
            String::from("{}")
        })
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
