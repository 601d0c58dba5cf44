//! CLOB market-channel WebSocket feed.
//!
//! Maintains one connection to the market channel, resubscribing to the
//! desired token set after every reconnect. Book snapshots and price
//! changes update the shared [`BookCache`]. A stale connection (no frames
//! within the pong timeout) is torn down and redialed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::MarketDataConfig;
use crate::error::{BotError, Result};
use crate::market_data::cache::{BookCache, BookTop};

#[derive(Debug, Deserialize)]
struct BookEvent {
    event_type: String,
    asset_id: Option<String>,
    #[serde(default)]
    bids: Vec<PriceLevel>,
    #[serde(default)]
    asks: Vec<PriceLevel>,
}

#[derive(Debug, Deserialize)]
struct PriceLevel {
    price: Decimal,
    size: Decimal,
}

/// Long-running feed task. Returns only when the reconnect budget is spent.
pub async fn run_market_feed(
    settings: MarketDataConfig,
    cache: Arc<BookCache>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
) -> Result<()> {
    let url = format!("{}/ws/market", settings.ws_url.trim_end_matches('/'));
    let mut reconnects = 0u32;

    loop {
        match run_connection(&url, &settings, &cache, &subscriptions).await {
            Ok(()) => {
                // Clean close; reset the budget.
                reconnects = 0;
            }
            Err(e) => {
                reconnects += 1;
                if reconnects >= settings.reconnect_max {
                    warn!(reconnects, "market feed reconnect budget exhausted");
                    return Err(BotError::WebSocket(format!(
                        "gave up after {reconnects} reconnects: {e}"
                    )));
                }
                warn!(error = %e, attempt = reconnects, "market feed dropped, redialing");
            }
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

async fn run_connection(
    url: &str,
    settings: &MarketDataConfig,
    cache: &BookCache,
    subscriptions: &Mutex<HashSet<String>>,
) -> Result<()> {
    let (stream, _) = connect_async(url)
        .await
        .map_err(|e| BotError::WebSocket(e.to_string()))?;
    info!(url, "market feed connected");
    let (mut write, mut read) = stream.split();

    let tokens: Vec<String> = subscriptions.lock().iter().cloned().collect();
    if !tokens.is_empty() {
        let sub = serde_json::json!({ "type": "market", "assets_ids": tokens });
        write
            .send(Message::Text(sub.to_string().into()))
            .await
            .map_err(|e| BotError::WebSocket(e.to_string()))?;
        debug!(count = tokens.len(), "resubscribed");
    }

    let mut subscribed: HashSet<String> = tokens.into_iter().collect();
    let mut ping = tokio::time::interval(Duration::from_secs(settings.ping_interval_secs));
    ping.tick().await;
    let mut last_frame = Instant::now();
    let pong_timeout = Duration::from_secs(settings.pong_timeout_secs);

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if last_frame.elapsed() > pong_timeout {
                    return Err(BotError::WebSocket("pong timeout".into()));
                }
                // Desired set may have changed since the last tick.
                let desired = subscriptions.lock().clone();
                let added: Vec<String> = desired.difference(&subscribed).cloned().collect();
                if !added.is_empty() {
                    let sub = serde_json::json!({ "type": "market", "assets_ids": added });
                    write
                        .send(Message::Text(sub.to_string().into()))
                        .await
                        .map_err(|e| BotError::WebSocket(e.to_string()))?;
                    subscribed = desired;
                }
                write
                    .send(Message::Ping(Vec::new().into()))
                    .await
                    .map_err(|e| BotError::WebSocket(e.to_string()))?;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_frame = Instant::now();
                        handle_text(&text, cache);
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                        last_frame = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("market feed closed by peer");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(BotError::WebSocket(e.to_string())),
                }
            }
        }
    }
}

fn handle_text(text: &str, cache: &BookCache) {
    // The channel delivers both single events and arrays of events.
    if let Ok(events) = serde_json::from_str::<Vec<BookEvent>>(text) {
        for ev in events {
            apply_event(ev, cache);
        }
    } else if let Ok(ev) = serde_json::from_str::<BookEvent>(text) {
        apply_event(ev, cache);
    }
}

fn apply_event(ev: BookEvent, cache: &BookCache) {
    if ev.event_type != "book" {
        return;
    }
    let Some(asset_id) = ev.asset_id else { return };
    let best_bid = ev.bids.iter().map(|l| l.price).max();
    let best_ask_level = ev
        .asks
        .iter()
        .min_by_key(|l| l.price)
        .map(|l| (l.price, l.size));
    cache.update(
        &asset_id,
        BookTop::new(
            best_bid,
            best_ask_level.map(|(p, _)| p),
            best_ask_level.map(|(_, s)| s),
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_book_event_updates_cache() {
        let cache = BookCache::new();
        let text = r#"{
            "event_type": "book",
            "asset_id": "tok-1",
            "bids": [{"price": "0.40", "size": "10"}, {"price": "0.48", "size": "5"}],
            "asks": [{"price": "0.55", "size": "20"}, {"price": "0.52", "size": "7"}]
        }"#;
        handle_text(text, &cache);
        let top = cache.get("tok-1").unwrap();
        assert_eq!(top.best_bid, Some(dec!(0.48)));
        assert_eq!(top.best_ask, Some(dec!(0.52)));
        assert_eq!(top.best_ask_size, Some(dec!(7)));
    }

    #[test]
    fn test_event_array() {
        let cache = BookCache::new();
        let text = r#"[
            {"event_type": "book", "asset_id": "a", "bids": [{"price": "0.3", "size": "1"}], "asks": []},
            {"event_type": "book", "asset_id": "b", "bids": [], "asks": [{"price": "0.7", "size": "2"}]}
        ]"#;
        handle_text(text, &cache);
        assert_eq!(cache.get("a").unwrap().best_bid, Some(dec!(0.3)));
        assert_eq!(cache.get("b").unwrap().best_ask, Some(dec!(0.7)));
    }

    #[test]
    fn test_non_book_events_ignored() {
        let cache = BookCache::new();
        handle_text(r#"{"event_type": "price_change", "asset_id": "a"}"#, &cache);
        handle_text("not json", &cache);
        assert!(cache.is_empty());
    }
}
