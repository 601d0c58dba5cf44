//! Gamma API client and BTC up/down market discovery.
//!
//! Up/down markets use predictable slugs of the form
//! `btc-updown-{tf}m-{window_start_s}` where `window_start_s` is aligned to
//! the timeframe boundary. Given a webhook signal we derive the slot either
//! from an explicit window end in the payload, from a 13-digit epoch-ms
//! timestamp embedded in the signal id, or from the wall clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::{BotError, Result};
use crate::market_data::BookTop;
use crate::resilience::{CircuitBreaker, RetryPolicy};
use crate::types::Direction;

/// One timeframe-aligned trading window and its market slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub slug: String,
}

impl SlotWindow {
    fn from_start(timeframe_minutes: u32, start_s: i64) -> Self {
        let slot = timeframe_minutes as i64 * 60;
        Self {
            start: Utc.timestamp_opt(start_s, 0).single().unwrap_or_default(),
            end: Utc
                .timestamp_opt(start_s + slot, 0)
                .single()
                .unwrap_or_default(),
            slug: format!("btc-updown-{timeframe_minutes}m-{start_s}"),
        }
    }

    /// The slot containing `now`, floor-aligned to the timeframe.
    pub fn current(timeframe_minutes: u32, now: DateTime<Utc>) -> Self {
        let slot = timeframe_minutes as i64 * 60;
        let start = now.timestamp().div_euclid(slot) * slot;
        Self::from_start(timeframe_minutes, start)
    }

    /// The slot whose window end is closest to `end_ms`. Signal sources
    /// drift by a few seconds, so the end is rounded to the nearest slot
    /// boundary rather than floored.
    pub fn for_window_end_ms(timeframe_minutes: u32, end_ms: i64) -> Self {
        let slot = timeframe_minutes as i64 * 60;
        let end_s = end_ms.div_euclid(1000);
        let rounded_end = ((end_s + slot / 2).div_euclid(slot)) * slot;
        Self::from_start(timeframe_minutes, rounded_end - slot)
    }

    /// Seconds until the window closes; negative once the window has ended.
    pub fn seconds_to_end(&self, now: DateTime<Utc>) -> i64 {
        (self.end - now).num_seconds()
    }

    /// Seconds elapsed since the window opened.
    pub fn seconds_since_start(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start).num_seconds()
    }
}

/// Extract a 13-digit epoch-milliseconds timestamp embedded in a signal id
/// such as `tv-btc-1700000400000-up`.
pub fn extract_epoch_ms(signal_id: &str) -> Option<i64> {
    let bytes = signal_id.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start == 13 {
                return signal_id[start..i].parse().ok();
            }
        } else {
            i += 1;
        }
    }
    None
}

/// A discovered up/down market with its outcome tokens resolved.
#[derive(Debug, Clone)]
pub struct ResolvedMarket {
    pub slug: String,
    pub market_id: String,
    pub question: String,
    pub up_token: String,
    pub down_token: String,
    pub end_date: Option<DateTime<Utc>>,
    pub best_prices: Vec<Decimal>,
    pub active: bool,
    pub closed: bool,
}

impl ResolvedMarket {
    pub fn token_for(&self, direction: Direction) -> &str {
        match direction {
            Direction::Up => &self.up_token,
            Direction::Down => &self.down_token,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GammaMarket {
    id: String,
    question: String,
    slug: Option<String>,
    #[serde(rename = "endDate")]
    end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    closed: bool,
    /// JSON string, e.g. `["Up", "Down"]`.
    outcomes: Option<String>,
    /// JSON string of string prices, e.g. `["0.55", "0.45"]`.
    #[serde(rename = "outcomePrices")]
    outcome_prices: Option<String>,
    /// JSON string of token ids.
    #[serde(rename = "clobTokenIds")]
    clob_token_ids: Option<String>,
}

/// Raw order book from the CLOB REST API; prices and sizes arrive as
/// strings.
#[derive(Debug, Default, Deserialize)]
struct RestBook {
    #[serde(default)]
    bids: Vec<RestLevel>,
    #[serde(default)]
    asks: Vec<RestLevel>,
}

#[derive(Debug, Deserialize)]
struct RestLevel {
    price: String,
    size: String,
}

/// Gamma market-data client, guarded by retry and a circuit breaker.
#[derive(Clone)]
pub struct GammaClient {
    http: Client,
    base_url: String,
    clob_url: String,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl GammaClient {
    pub fn new(
        base_url: &str,
        clob_url: &str,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            clob_url: clob_url.trim_end_matches('/').to_string(),
            retry,
            breaker,
        })
    }

    /// Fetch a market by slug and resolve its Up/Down outcome tokens.
    pub async fn resolve_market(&self, slug: &str) -> Result<ResolvedMarket> {
        let raw = self
            .retry
            .run(|| self.breaker.call(|| self.fetch_by_slug(slug)))
            .await?;
        parse_resolved(raw, slug)
    }

    /// Fetch the current top of book over REST. The WS feed normally keeps
    /// the cache warm, but the first signal for a market arrives before any
    /// snapshot; books right after a window opens can also be momentarily
    /// empty, so an empty result is retried once after a short pause.
    pub async fn fetch_book(&self, token_id: &str) -> Result<Option<BookTop>> {
        let raw = self.fetch_rest_book(token_id).await?;
        if let Some(top) = book_top_from_rest(&raw) {
            return Ok(Some(top));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let raw = self.fetch_rest_book(token_id).await?;
        Ok(book_top_from_rest(&raw))
    }

    async fn fetch_rest_book(&self, token_id: &str) -> Result<RestBook> {
        let url = format!("{}/book", self.clob_url);
        debug!(token = token_id, "fetching order book over REST");
        Ok(self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    pub fn retry_stats(&self) -> crate::resilience::RetryStats {
        self.retry.stats()
    }

    async fn fetch_by_slug(&self, slug: &str) -> Result<GammaMarket> {
        let url = format!("{}/markets", self.base_url);
        let resp: Vec<GammaMarket> = self
            .http
            .get(&url)
            .query(&[("slug", slug)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        resp.into_iter()
            .next()
            .ok_or_else(|| BotError::MarketNotFound(slug.to_string()))
    }
}

/// Pick the slot for a signal. Explicit window end wins, then an epoch-ms
/// timestamp in the signal id (treated as a bar-close time), then now.
pub fn derive_window(
    timeframe_minutes: u32,
    window_end_ms: Option<i64>,
    signal_id: Option<&str>,
    now: DateTime<Utc>,
) -> SlotWindow {
    if let Some(end_ms) = window_end_ms {
        return SlotWindow::for_window_end_ms(timeframe_minutes, end_ms);
    }
    if let Some(ms) = signal_id.and_then(extract_epoch_ms) {
        // Embedded timestamp is the bar open; its window ends one slot later.
        return SlotWindow::for_window_end_ms(
            timeframe_minutes,
            ms + timeframe_minutes as i64 * 60_000,
        );
    }
    SlotWindow::current(timeframe_minutes, now)
}

/// Best bid is the highest bid, best ask the lowest ask with its size.
/// Returns `None` for a book with neither side.
fn book_top_from_rest(book: &RestBook) -> Option<BookTop> {
    let parse = |l: &RestLevel| -> Option<(Decimal, Decimal)> {
        Some((l.price.parse().ok()?, l.size.parse().ok()?))
    };
    let best_bid = book
        .bids
        .iter()
        .filter_map(|l| parse(l).map(|(p, _)| p))
        .max();
    let best_ask = book
        .asks
        .iter()
        .filter_map(&parse)
        .min_by_key(|(p, _)| *p);
    if best_bid.is_none() && best_ask.is_none() {
        return None;
    }
    Some(BookTop::new(
        best_bid,
        best_ask.map(|(p, _)| p),
        best_ask.map(|(_, s)| s),
    ))
}

fn parse_resolved(gm: GammaMarket, requested_slug: &str) -> Result<ResolvedMarket> {
    let token_ids: Vec<String> = gm
        .clob_token_ids
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    let outcome_names: Vec<String> = gm
        .outcomes
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    // Prices arrive as a JSON string of string numbers.
    let best_prices: Vec<Decimal> = gm
        .outcome_prices
        .as_deref()
        .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .map(|v| v.iter().filter_map(|p| p.parse().ok()).collect())
        .unwrap_or_default();

    let mut up_token = None;
    let mut down_token = None;
    for (i, name) in outcome_names.iter().enumerate() {
        match name.to_ascii_lowercase().as_str() {
            "up" | "yes" => up_token = token_ids.get(i).cloned(),
            "down" | "no" => down_token = token_ids.get(i).cloned(),
            _ => {}
        }
    }
    // Up/down markets list Up first when outcome names are missing.
    if up_token.is_none() && down_token.is_none() && token_ids.len() == 2 {
        up_token = Some(token_ids[0].clone());
        down_token = Some(token_ids[1].clone());
    }

    let (up_token, down_token) = match (up_token, down_token) {
        (Some(u), Some(d)) => (u, d),
        _ => {
            return Err(BotError::MarketNotFound(format!(
                "{requested_slug}: missing outcome tokens"
            )))
        }
    };

    Ok(ResolvedMarket {
        slug: gm.slug.unwrap_or_else(|| requested_slug.to_string()),
        market_id: gm.id,
        question: gm.question,
        up_token,
        down_token,
        end_date: gm.end_date,
        best_prices,
        active: gm.active,
        closed: gm.closed,
    })
}
