use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use super::events::{MembershipAction, ServerFrame};

/// Capacity of each session's outbound queue. A session whose queue is full
/// when a broadcast arrives is a slow consumer and gets dropped — durability
/// lives in the store, not here.
pub const OUTBOUND_BUFFER: usize = 8;

/// Depth of the membership queue, sized so HTTP handlers never block on a
/// busy hub.
const MEMBERSHIP_BUFFER: usize = 16;

pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for a client session.
pub fn next_session_id() -> SessionId {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Everything the hub needs to adopt a freshly upgraded session.
pub struct Registration {
    pub session_id: SessionId,
    pub user_id: i64,
    pub outbound: mpsc::Sender<String>,
    /// Conversation ids snapshotted from the store at upgrade time.
    pub conversation_ids: Vec<i64>,
}

pub struct Broadcast {
    pub conversation_id: i64,
    pub payload: String,
}

#[derive(Debug)]
pub struct MembershipChange {
    pub conversation_id: i64,
    pub user_id: i64,
    pub action: MembershipAction,
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to the hub worker. Cheaply cloneable — it holds only queue senders.
///
/// `register`, `unregister` and `broadcast` are rendezvous-sized so producers
/// feel backpressure from the single consumer; `membership` is buffered.
/// Sends after the worker has shut down are silently dropped.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<SessionId>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    membership_tx: mpsc::Sender<MembershipChange>,
}

impl Hub {
    /// Spawn the hub worker task and return its handle.
    pub fn spawn() -> Self {
        let (register_tx, register_rx) = mpsc::channel(1);
        let (unregister_tx, unregister_rx) = mpsc::channel(1);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(1);
        let (membership_tx, membership_rx) = mpsc::channel(MEMBERSHIP_BUFFER);

        let worker = HubWorker {
            register_rx,
            unregister_rx,
            broadcast_rx,
            membership_rx,
            sessions: HashMap::new(),
            clients_by_user: HashMap::new(),
            subscribers: HashMap::new(),
        };
        tokio::spawn(worker.run());

        Hub {
            register_tx,
            unregister_tx,
            broadcast_tx,
            membership_tx,
        }
    }

    pub async fn register(&self, registration: Registration) {
        let _ = self.register_tx.send(registration).await;
    }

    pub async fn unregister(&self, session_id: SessionId) {
        let _ = self.unregister_tx.send(session_id).await;
    }

    pub async fn broadcast(&self, conversation_id: i64, payload: String) {
        let _ = self
            .broadcast_tx
            .send(Broadcast {
                conversation_id,
                payload,
            })
            .await;
    }

    pub async fn notify_membership(&self, change: MembershipChange) {
        let _ = self.membership_tx.send(change).await;
    }
}

// ============================================================================
// Worker
// ============================================================================

struct SessionEntry {
    user_id: i64,
    outbound: mpsc::Sender<String>,
    subscriptions: HashSet<i64>,
}

/// Sole owner of the session registry and subscriber index. All mutation
/// happens on this task; the queues are the synchronization primitive, so no
/// locks guard the maps.
struct HubWorker {
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<SessionId>,
    broadcast_rx: mpsc::Receiver<Broadcast>,
    membership_rx: mpsc::Receiver<MembershipChange>,

    sessions: HashMap<SessionId, SessionEntry>,
    clients_by_user: HashMap<i64, HashSet<SessionId>>,
    subscribers: HashMap<i64, HashSet<SessionId>>,
}

impl HubWorker {
    async fn run(mut self) {
        loop {
            // Biased: registrations and membership changes drain before
            // broadcasts, so a session attached by an `added` event observes
            // every message broadcast enqueued after it.
            tokio::select! {
                biased;
                Some(registration) = self.register_rx.recv() => self.register(registration),
                Some(session_id) = self.unregister_rx.recv() => self.drop_session(session_id),
                Some(change) = self.membership_rx.recv() => self.membership(change),
                Some(broadcast) = self.broadcast_rx.recv() => self.broadcast(broadcast),
                else => break,
            }
        }
    }

    fn register(&mut self, registration: Registration) {
        let Registration {
            session_id,
            user_id,
            outbound,
            conversation_ids,
        } = registration;

        let subscriptions: HashSet<i64> = conversation_ids.into_iter().collect();
        for &conversation_id in &subscriptions {
            self.subscribers
                .entry(conversation_id)
                .or_default()
                .insert(session_id);
        }
        self.clients_by_user
            .entry(user_id)
            .or_default()
            .insert(session_id);
        self.sessions.insert(
            session_id,
            SessionEntry {
                user_id,
                outbound,
                subscriptions,
            },
        );

        tracing::debug!(session_id, user_id, "Session registered");
    }

    /// Remove a session from every index. Idempotent — a double unregister
    /// (reader teardown racing a slow-consumer drop) is a no-op the second
    /// time. Dropping the entry closes the outbound channel, which the writer
    /// pump reads as a clean shutdown.
    fn drop_session(&mut self, session_id: SessionId) {
        let Some(entry) = self.sessions.remove(&session_id) else {
            return;
        };

        for conversation_id in &entry.subscriptions {
            if let Some(set) = self.subscribers.get_mut(conversation_id) {
                set.remove(&session_id);
                if set.is_empty() {
                    self.subscribers.remove(conversation_id);
                }
            }
        }

        if let Some(set) = self.clients_by_user.get_mut(&entry.user_id) {
            set.remove(&session_id);
            if set.is_empty() {
                self.clients_by_user.remove(&entry.user_id);
            }
        }

        tracing::debug!(session_id, user_id = entry.user_id, "Session unregistered");
    }

    fn broadcast(&mut self, broadcast: Broadcast) {
        let Some(subscriber_ids) = self.subscribers.get(&broadcast.conversation_id) else {
            return;
        };
        let recipients: Vec<SessionId> = subscriber_ids.iter().copied().collect();
        self.deliver(&recipients, &broadcast.payload);
    }

    fn membership(&mut self, change: MembershipChange) {
        let MembershipChange {
            conversation_id,
            user_id,
            action,
        } = change;

        let user_sessions: Vec<SessionId> = self
            .clients_by_user
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        match action {
            MembershipAction::Added => {
                let set = self.subscribers.entry(conversation_id).or_default();
                for &session_id in &user_sessions {
                    set.insert(session_id);
                }
                for &session_id in &user_sessions {
                    if let Some(entry) = self.sessions.get_mut(&session_id) {
                        entry.subscriptions.insert(conversation_id);
                    }
                }
            }
            MembershipAction::Removed => {
                if let Some(set) = self.subscribers.get_mut(&conversation_id) {
                    for session_id in &user_sessions {
                        set.remove(session_id);
                    }
                    if set.is_empty() {
                        self.subscribers.remove(&conversation_id);
                    }
                }
                for &session_id in &user_sessions {
                    if let Some(entry) = self.sessions.get_mut(&session_id) {
                        entry.subscriptions.remove(&conversation_id);
                    }
                }
            }
        }

        // Indices are settled; now tell everyone. The freshly attached
        // sessions are already subscribers; the freshly detached user still
        // hears about their own removal.
        let mut recipients: HashSet<SessionId> = self
            .subscribers
            .get(&conversation_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        if action == MembershipAction::Removed {
            recipients.extend(user_sessions);
        }

        let payload = ServerFrame::Membership {
            conversation_id,
            user_id,
            action,
        }
        .to_json();
        let recipients: Vec<SessionId> = recipients.into_iter().collect();
        self.deliver(&recipients, &payload);
    }

    /// Non-blocking fan-out. A full or closed outbound queue marks the
    /// session as a slow consumer: it is dropped from every index rather
    /// than ever blocking the worker.
    fn deliver(&mut self, recipients: &[SessionId], payload: &str) {
        let mut slow: Vec<SessionId> = Vec::new();

        for &session_id in recipients {
            let Some(entry) = self.sessions.get(&session_id) else {
                continue;
            };
            match entry.outbound.try_send(payload.to_owned()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        session_id,
                        user_id = entry.user_id,
                        "Dropping slow consumer: outbound queue full"
                    );
                    slow.push(session_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    slow.push(session_id);
                }
            }
        }

        for session_id in slow {
            self.drop_session(session_id);
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
