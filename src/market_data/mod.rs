//! Live top-of-book tracking for subscribed outcome tokens.

pub mod cache;
pub mod ws;

pub use cache::{BookCache, BookTop};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::MarketDataConfig;

/// Handle over the book cache and the feed's subscription set.
pub struct MarketData {
    settings: MarketDataConfig,
    cache: Arc<BookCache>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    missing_counts: Mutex<HashMap<String, u32>>,
}

impl MarketData {
    pub fn new(settings: MarketDataConfig) -> Self {
        Self {
            settings,
            cache: Arc::new(BookCache::new()),
            subscriptions: Arc::new(Mutex::new(HashSet::new())),
            missing_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> Arc<BookCache> {
        self.cache.clone()
    }

    pub fn subscribe(&self, token_id: &str) {
        if self.subscriptions.lock().insert(token_id.to_string()) {
            info!(token = token_id, "subscribed to book updates");
        }
    }

    pub fn unsubscribe(&self, token_id: &str) {
        self.subscriptions.lock().remove(token_id);
        self.missing_counts.lock().remove(token_id);
        self.cache.remove(token_id);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn top_of_book(&self, token_id: &str) -> Option<BookTop> {
        self.cache.get(token_id)
    }

    /// Spawn the WebSocket feed task, if enabled.
    pub fn spawn_feed(&self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.settings.ws_enabled {
            info!("market data feed disabled");
            return None;
        }
        let settings = self.settings.clone();
        let cache = self.cache.clone();
        let subs = self.subscriptions.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = ws::run_market_feed(settings, cache, subs).await {
                warn!(error = %e, "market feed terminated");
            }
        }))
    }

    /// Periodically drop subscriptions that never produce data. A token
    /// with a stale or absent book for `reconcile_missing_threshold`
    /// consecutive checks is unsubscribed.
    pub async fn run_reconcile_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.settings.reconcile_secs);
        loop {
            tokio::time::sleep(interval).await;
            self.reconcile_once();
        }
    }

    fn reconcile_once(&self) {
        let tokens: Vec<String> = self.subscriptions.lock().iter().cloned().collect();
        let mut to_drop = Vec::new();
        {
            let mut counts = self.missing_counts.lock();
            for token in &tokens {
                if self.cache.is_fresh(token, self.settings.cache_stale_secs) {
                    counts.remove(token);
                } else {
                    let count = counts.entry(token.clone()).or_insert(0);
                    *count += 1;
                    if *count >= self.settings.reconcile_missing_threshold {
                        to_drop.push(token.clone());
                    }
                }
            }
            counts.retain(|t, _| tokens.contains(t));
        }
        for token in to_drop {
            warn!(token = %token, "no book data after repeated checks, unsubscribing");
            self.unsubscribe(&token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_settings() -> MarketDataConfig {
        MarketDataConfig {
            ws_enabled: false,
            ws_url: "wss://example.invalid".into(),
            ping_interval_secs: 10,
            pong_timeout_secs: 30,
            reconnect_max: 30,
            cache_stale_secs: 30.0,
            reconcile_secs: 30,
            reconcile_missing_threshold: 3,
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let md = MarketData::new(test_settings());
        md.subscribe("tok");
        md.subscribe("tok");
        assert_eq!(md.subscription_count(), 1);
        md.unsubscribe("tok");
        assert_eq!(md.subscription_count(), 0);
    }

    #[test]
    fn test_reconcile_drops_silent_tokens() {
        let md = MarketData::new(test_settings());
        md.subscribe("silent");
        md.subscribe("live");
        md.cache
            .update("live", BookTop::new(Some(dec!(0.5)), Some(dec!(0.51)), None));

        for _ in 0..3 {
            md.reconcile_once();
        }
        assert_eq!(md.subscription_count(), 1);
        assert!(md.top_of_book("live").is_some());
        assert!(md.top_of_book("silent").is_none());
    }

    #[test]
    fn test_reconcile_resets_on_data() {
        let md = MarketData::new(test_settings());
        md.subscribe("tok");
        md.reconcile_once();
        md.reconcile_once();
        // data arrives before the third strike
        md.cache
            .update("tok", BookTop::new(Some(dec!(0.5)), None, None));
        md.reconcile_once();
        md.cache.remove("tok");
        md.reconcile_once();
        md.reconcile_once();
        assert_eq!(md.subscription_count(), 1);
    }
}
