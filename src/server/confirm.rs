//! Two-step entry confirmation.
//!
//! With confirmation enabled, a webhook alert only arms a pending entry.
//! The trade executes when a follow-up `/confirm` arrives at least
//! `delay_secs` later and within `ttl_secs`. This debounces strategies
//! that repaint right after the bar close.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::types::{Direction, WebhookSignal};

#[derive(Debug, Clone)]
pub struct PendingSignal {
    pub signal: WebhookSignal,
    pub direction: Direction,
    pub armed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum ConfirmOutcome {
    /// Delay satisfied; the armed signal is returned and removed.
    Ready(PendingSignal),
    /// Confirmation arrived before the delay elapsed.
    TooEarly { remaining_secs: i64 },
    /// The pending entry outlived its TTL and was discarded.
    Expired,
    /// Nothing armed under this key.
    Unknown,
}

pub struct ConfirmationStore {
    delay: Duration,
    ttl: Duration,
    pending: Mutex<HashMap<String, PendingSignal>>,
}

impl ConfirmationStore {
    pub fn new(delay_secs: u64, ttl_secs: u64) -> Self {
        Self {
            delay: Duration::seconds(delay_secs as i64),
            ttl: Duration::seconds(ttl_secs as i64),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn key(direction: Direction, signal_id: &str) -> String {
        format!("pm:confirm:{}:{}", direction.as_str(), signal_id)
    }

    /// Arm a pending entry, replacing any previous one under the same key.
    /// `signal_id` must be the same effective id later used to confirm:
    /// payloads without an explicit id are keyed by their bar-time fallback.
    pub fn arm(
        &self,
        signal_id: &str,
        signal: WebhookSignal,
        direction: Direction,
        now: DateTime<Utc>,
    ) {
        let key = Self::key(direction, signal_id);
        self.pending.lock().insert(
            key,
            PendingSignal {
                signal,
                direction,
                armed_at: now,
            },
        );
    }

    /// Resolve a confirmation. When the caller does not name a direction,
    /// both sides are tried.
    pub fn resolve(
        &self,
        signal_id: &str,
        direction: Option<Direction>,
        now: DateTime<Utc>,
    ) -> ConfirmOutcome {
        let candidates = match direction {
            Some(d) => vec![d],
            None => vec![Direction::Up, Direction::Down],
        };
        let mut pending = self.pending.lock();
        for dir in candidates {
            let key = Self::key(dir, signal_id);
            let Some(entry) = pending.remove(&key) else {
                continue;
            };
            let age = now - entry.armed_at;
            if age > self.ttl {
                return ConfirmOutcome::Expired;
            }
            if age < self.delay {
                let remaining_secs = (self.delay - age).num_seconds();
                pending.insert(key, entry);
                return ConfirmOutcome::TooEarly { remaining_secs };
            }
            return ConfirmOutcome::Ready(entry);
        }
        ConfirmOutcome::Unknown
    }

    /// Drop pending entries past their TTL.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, p| now - p.armed_at <= self.ttl);
        before - pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
