//! Core domain types shared across modules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction on a binary up/down market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Normalize the free-form signal field alert senders emit.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "UP" | "BULL" | "BUY_UP" | "LONG" | "BUY" => Some(Direction::Up),
            "DOWN" | "BEAR" | "BUY_DOWN" | "SHORT" | "SELL" => Some(Direction::Down),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound webhook alert payload.
///
/// Senders are inconsistent about field names, so both `signal` and `side`
/// are accepted and several timestamp fields are recognized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSignal {
    #[serde(default)]
    pub signal_id: Option<String>,
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    /// Strategy confidence, 1-10.
    #[serde(default)]
    pub confidence: Option<u8>,
    /// Epoch millis of the bar that produced the alert (window start).
    #[serde(default, alias = "barTime")]
    pub bar_time: Option<i64>,
    /// Epoch millis of the market window end, if the sender knows it.
    #[serde(default, alias = "windowEndMs", alias = "window_end")]
    pub window_end_ms: Option<i64>,
    #[serde(default)]
    pub symbol: Option<String>,
    /// Requested stake in USDC; falls back to the configured paper size.
    #[serde(default)]
    pub size: Option<Decimal>,
}

impl WebhookSignal {
    pub fn direction(&self) -> Option<Direction> {
        self.signal
            .as_deref()
            .or(self.side.as_deref())
            .and_then(Direction::parse)
    }
}

/// Explicit confirmation of a pending signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationPayload {
    pub signal_id: String,
    #[serde(default)]
    pub signal: Option<String>,
}

/// Paper trade lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    /// Opened, not yet confirmed by a follow-up alert.
    Pending,
    Confirmed,
    Closed,
    Timeout,
    Failed,
}

impl TradeStatus {
    /// Statuses that count toward exposure.
    pub fn is_open(&self) -> bool {
        matches!(self, TradeStatus::Pending | TradeStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    SoftStop,
    TimeStop,
    AutoCloseTtl,
    MarketEnd,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::SoftStop => "soft_stop",
            ExitReason::TimeStop => "time_stop",
            ExitReason::AutoCloseTtl => "auto_close_ttl",
            ExitReason::MarketEnd => "market_end",
            ExitReason::Manual => "manual",
        }
    }
}

/// A simulated position tracked by the paper engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperTrade {
    pub trade_id: String,
    pub market_slug: String,
    pub token_id: String,
    pub direction: Direction,
    pub size: Decimal,
    pub entry_price: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    /// Market window end; auto-close fires shortly before it.
    pub window_end: Option<DateTime<Utc>>,
    pub status: TradeStatus,
    pub confidence: Option<u8>,
    pub session_id: Option<String>,
    pub signal_id: Option<String>,
    pub bars_elapsed: u32,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<Decimal>,
}

impl PaperTrade {
    /// Realized PnL for a closed binary position: shares * (exit - entry),
    /// with shares = size / entry. Both prices must be known.
    pub fn compute_pnl(&self, exit_price: Decimal) -> Option<Decimal> {
        let entry = self.entry_price?;
        if entry <= Decimal::ZERO {
            return None;
        }
        let shares = self.size / entry;
        Some(shares * (exit_price - entry))
    }
}

/// Webhook decision returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDecision {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebhookDecision {
    pub fn accepted(trade_id: String) -> Self {
        Self {
            status: "accepted".into(),
            reason: None,
            trade_id: Some(trade_id),
            message: None,
        }
    }

    pub fn skipped(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: "skipped".into(),
            reason: Some(reason.into()),
            trade_id: None,
            message: Some(message.into()),
        }
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            status: "pending_confirmation".into(),
            reason: None,
            trade_id: None,
            message: Some(message.into()),
        }
    }
}
