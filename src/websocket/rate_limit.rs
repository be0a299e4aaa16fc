use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sends admitted per window per session.
pub const MESSAGE_RATE_LIMIT: usize = 30;
/// Sliding-window length for the send limiter.
pub const MESSAGE_RATE_WINDOW: Duration = Duration::from_secs(10);
/// Upper bound on retained send timestamps.
const HISTORY_CAPACITY: usize = 64;

/// Sliding-window rate limiter for one session's sends.
///
/// Owned by the session's reader pump, so it needs no synchronization. The
/// history is bounded at [`HISTORY_CAPACITY`] entries regardless of the
/// configured limit.
#[derive(Debug)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    history: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(limit: usize, window: Duration) -> Self {
        SlidingWindow {
            limit: limit.min(HISTORY_CAPACITY),
            window,
            history: VecDeque::with_capacity(HISTORY_CAPACITY.min(limit + 1)),
        }
    }

    /// Limiter with the message-send defaults (30 sends per 10 seconds).
    pub fn for_messages() -> Self {
        Self::new(MESSAGE_RATE_LIMIT, MESSAGE_RATE_WINDOW)
    }

    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Compact entries that have aged out of the window, then admit the send
    /// iff the remaining history is under the limit.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.history.front() {
            if now.duration_since(oldest) >= self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }

        if self.history.len() >= self.limit {
            return false;
        }

        self.history.push_back(now);
        true
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
