use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};

use super::events::{ClientFrame, ServerFrame, WireMessage};
use super::hub::{next_session_id, Registration, OUTBOUND_BUFFER};
use super::rate_limit::SlidingWindow;
use crate::{auth::verify_token, models::NewMessage, state::AppState, store};

/// Inbound frames above this size terminate the session before decoding.
const MAX_FRAME_BYTES: usize = 1024;
/// Reader inactivity deadline; any inbound frame (pong included) re-arms it.
const READ_DEADLINE: Duration = Duration::from_secs(60);
/// Keepalive ping cadence on the writer pump.
const PING_INTERVAL: Duration = Duration::from_secs(50);
/// Per-frame write deadline; a socket slower than this ends the session.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

// ============================================================================
// Query params
// ============================================================================

/// The session token is passed as a query parameter because WebSocket
/// upgrade requests are plain GET requests and cannot carry an Authorization
/// header reliably across all client environments. Optional so that a
/// missing token yields 401 rather than a query-deserialization 400.
#[derive(Debug, serde::Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub token: Option<String>,
}

// ============================================================================
// Upgrade handler
// ============================================================================

/// GET /api/ws?token=<session_token> — upgrade to a WebSocket connection.
///
/// The token is validated before the upgrade is accepted; invalid or expired
/// tokens get a plain 401 without an upgrade attempt.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let Some(token) = params.token.as_deref() else {
        return (StatusCode::UNAUTHORIZED, "Missing session token").into_response();
    };

    let claims = match verify_token(token, &state.session_secret) {
        Ok(c) => c,
        Err(_) => {
            return (StatusCode::UNAUTHORIZED, "Invalid or expired token").into_response();
        }
    };

    // Snapshot the caller's memberships before the upgrade; they seed the
    // session's subscription set.
    let conversation_ids = match store::conversations::ids_for_user(&state.pool, claims.user_id)
        .await
    {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(
                user_id = claims.user_id,
                error = ?e,
                "Failed to snapshot memberships for session"
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, claims.user_id, conversation_ids, state))
}

// ============================================================================
// Connection lifecycle
// ============================================================================

async fn handle_socket(
    socket: WebSocket,
    user_id: i64,
    conversation_ids: Vec<i64>,
    state: AppState,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let session_id = next_session_id();

    // The hub owns the only strong sender. The reader keeps a weak handle for
    // session-local replies, so the moment the hub drops the session (either
    // unregister or slow-consumer drop) the writer pump sees the channel
    // close and tears down.
    let outbound = tx.downgrade();

    state
        .hub
        .register(Registration {
            session_id,
            user_id,
            outbound: tx,
            conversation_ids,
        })
        .await;

    // Writer pump: forward hub fan-out to the socket and ping every 50s.
    // Exits when the hub closes the outbound channel (unregister or
    // slow-consumer drop) or a write misses its deadline.
    let send_task = tokio::spawn(async move {
        let mut keepalive = interval(PING_INTERVAL);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await; // first tick completes immediately

        loop {
            tokio::select! {
                maybe_frame = rx.recv() => match maybe_frame {
                    Some(json) => {
                        match timeout(WRITE_DEADLINE, ws_sender.send(Message::Text(json))).await {
                            Ok(Ok(())) => {}
                            _ => break,
                        }
                    }
                    // Channel closed by the hub (unregister or slow-consumer
                    // drop): close the socket and shut down cleanly.
                    None => {
                        let _ = timeout(WRITE_DEADLINE, ws_sender.send(Message::Close(None))).await;
                        break;
                    }
                },
                _ = keepalive.tick() => {
                    match timeout(WRITE_DEADLINE, ws_sender.send(Message::Ping(Vec::new()))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
            }
        }
    });

    // Reader pump, inline: decode inbound frames until the socket closes,
    // errors, or goes silent past the read deadline.
    let mut limiter = SlidingWindow::for_messages();
    loop {
        let frame = match timeout(READ_DEADLINE, ws_receiver.next()).await {
            Err(_) => {
                tracing::debug!(user_id, session_id, "Read deadline expired; closing session");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(
                    user_id,
                    session_id,
                    error = ?e,
                    "WebSocket receive error; closing session"
                );
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                handle_client_frame(&state, user_id, &text, &mut limiter, &outbound).await;
            }
            Message::Close(_) => break,
            // Pong (and every other control frame) only re-arms the deadline.
            _ => {}
        }
    }

    state.hub.unregister(session_id).await;
    send_task.abort();
}

// ============================================================================
// Inbound frame handling
// ============================================================================

/// Reply on this session's own queue — pong and rate-limit errors never fan
/// out. Best-effort: a full queue or an already-dropped session loses the
/// reply.
fn reply(outbound: &mpsc::WeakSender<String>, frame: ServerFrame) {
    if let Some(tx) = outbound.upgrade() {
        let _ = tx.try_send(frame.to_json());
    }
}

/// Process a text frame received from the client. `outbound` is this
/// session's own queue, used for replies that must not fan out (pong,
/// rate-limit errors).
async fn handle_client_frame(
    state: &AppState,
    user_id: i64,
    text: &str,
    limiter: &mut SlidingWindow,
    outbound: &mpsc::WeakSender<String>,
) {
    let Ok(frame) = serde_json::from_str::<ClientFrame>(text) else {
        // Ignore unparseable frames — don't disconnect for bad JSON.
        return;
    };

    match frame {
        ClientFrame::MessageSend {
            conversation_id,
            body,
            temp_id,
        } => {
            handle_send(state, user_id, conversation_id, &body, temp_id, limiter, outbound).await;
        }
        ClientFrame::Ping => {
            reply(outbound, ServerFrame::Pong);
        }
        ClientFrame::Unknown => {
            tracing::debug!(user_id, "Ignoring unknown client frame");
        }
    }
}

/// The `message:send` path: validate, rate-limit, authorize against the
/// store, persist, advance the sender's cursor, fan out.
async fn handle_send(
    state: &AppState,
    sender_id: i64,
    conversation_id: i64,
    body: &str,
    temp_id: Option<String>,
    limiter: &mut SlidingWindow,
    outbound: &mpsc::WeakSender<String>,
) {
    let body = body.trim();
    if conversation_id <= 0 || body.is_empty() {
        return;
    }

    if !limiter.allow() {
        reply(outbound, ServerFrame::SystemError { code: "rate_limited" });
        return;
    }

    // Always a fresh storage read, never the in-memory subscription set:
    // membership can change while a session is alive.
    match store::conversations::is_member(&state.pool, conversation_id, sender_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(
                user_id = sender_id,
                conversation_id,
                "Dropping send from non-member"
            );
            return;
        }
        Err(e) => {
            tracing::warn!(
                user_id = sender_id,
                conversation_id,
                error = ?e,
                "Membership check failed; dropping send"
            );
            return;
        }
    }

    let message = match store::messages::create_message(
        &state.pool,
        NewMessage {
            conversation_id,
            sender_id,
            body: body.to_string(),
            attachment_url: None,
            delivery_status: "sent".to_string(),
        },
    )
    .await
    {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(
                user_id = sender_id,
                conversation_id,
                error = ?e,
                "Failed to persist message"
            );
            return;
        }
    };

    // Best effort: the sender has read their own message.
    if let Err(e) =
        store::messages::update_read_cursor(&state.pool, conversation_id, sender_id, message.id)
            .await
    {
        tracing::warn!(
            user_id = sender_id,
            conversation_id,
            error = ?e,
            "Failed to advance sender read cursor"
        );
    }

    let frame = ServerFrame::MessageNew {
        temp_id,
        message: WireMessage::from_message(&message),
    };
    state.hub.broadcast(conversation_id, frame.to_json()).await;
}

// ── Unit tests ────────────────────────────────────────────────────────────────
