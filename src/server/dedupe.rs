//! Duplicate-signal suppression.
//!
//! Alert senders re-fire on reconnects, so the webhook must be idempotent.
//! Signals are keyed by a hash of (signal id, direction) and suppressed
//! for a TTL. The check runs before any other gate or side effect.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

pub struct DedupeStore {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupeStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn key(signal_id: &str, direction: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(signal_id.as_bytes());
        hasher.update(b":");
        hasher.update(direction.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns `true` when the signal is fresh, recording it. A repeat
    /// within the TTL returns `false`.
    pub fn check_and_insert(&self, signal_id: &str, direction: &str) -> bool {
        let key = Self::key(signal_id, direction);
        let now = Instant::now();
        let mut seen = self.seen.lock();
        seen.retain(|_, at| now.duration_since(*at) < self.ttl);
        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, now);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}
