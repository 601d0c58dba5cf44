//! Top-of-book cache fed by the market WebSocket.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use rust_decimal::Decimal;

/// Best bid/ask for one outcome token.
#[derive(Debug, Clone)]
pub struct BookTop {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub best_ask_size: Option<Decimal>,
    updated_at: Instant,
}

impl BookTop {
    pub fn new(
        best_bid: Option<Decimal>,
        best_ask: Option<Decimal>,
        best_ask_size: Option<Decimal>,
    ) -> Self {
        Self {
            best_bid,
            best_ask,
            best_ask_size,
            updated_at: Instant::now(),
        }
    }

    pub fn age_secs(&self) -> f64 {
        self.updated_at.elapsed().as_secs_f64()
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }
}

/// Shared cache of token -> top of book.
#[derive(Default)]
pub struct BookCache {
    books: RwLock<HashMap<String, BookTop>>,
}

impl BookCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, token_id: &str, top: BookTop) {
        self.books.write().insert(token_id.to_string(), top);
    }

    pub fn get(&self, token_id: &str) -> Option<BookTop> {
        self.books.read().get(token_id).cloned()
    }

    /// Age of the cached book in seconds, if present.
    pub fn age_secs(&self, token_id: &str) -> Option<f64> {
        self.books.read().get(token_id).map(|b| b.age_secs())
    }

    pub fn is_fresh(&self, token_id: &str, max_age_secs: f64) -> bool {
        self.age_secs(token_id)
            .map(|age| age <= max_age_secs)
            .unwrap_or(false)
    }

    pub fn remove(&self, token_id: &str) {
        self.books.write().remove(token_id);
    }

    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }
}
