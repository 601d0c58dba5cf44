//! Paper trading: positions, ledger and auto-close.

pub mod auto_close;
pub mod ledger;

pub use auto_close::AutoCloser;
pub use ledger::{Ledger, LedgerEvent};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{BotError, Result};
use crate::types::{ExitReason, PaperTrade, TradeStatus};

#[derive(Default)]
struct PmInner {
    open: HashMap<String, PaperTrade>,
    closed: Vec<PaperTrade>,
}

/// In-memory position book, mirrored to the JSONL ledger.
pub struct PositionManager {
    ledger: Ledger,
    inner: Mutex<PmInner>,
}

/// Session roll-up for the health and state endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub open_count: usize,
    pub closed_count: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: Option<f64>,
    pub realized_pnl: Decimal,
    pub open_exposure: Decimal,
    pub exits_by_reason: HashMap<String, usize>,
}

/// Startup go/no-go verdict.
#[derive(Debug, Clone, Serialize)]
pub struct GoNoGo {
    pub go: bool,
    pub reasons: Vec<String>,
}

impl PositionManager {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            inner: Mutex::new(PmInner::default()),
        }
    }

    /// Replay the ledger into memory.
    pub fn rehydrate(&self, max_age_hours: f64) -> Result<usize> {
        let out = self.ledger.rehydrate(max_age_hours)?;
        let mut inner = self.inner.lock();
        let restored = out.open.len();
        for trade in out.open {
            inner.open.insert(trade.trade_id.clone(), trade);
        }
        inner.closed = out.closed;
        Ok(restored)
    }

    /// Open a new paper trade. One open trade per market and direction.
    pub fn open(&self, trade: PaperTrade) -> Result<()> {
        let mut inner = self.inner.lock();
        let dup = inner.open.values().any(|t| {
            t.market_slug == trade.market_slug && t.direction == trade.direction
        });
        if dup {
            return Err(BotError::Ledger(format!(
                "open trade already exists for {} {}",
                trade.market_slug, trade.direction
            )));
        }
        self.ledger.append(LedgerEvent::Open, &trade)?;
        info!(
            trade_id = %trade.trade_id,
            market = %trade.market_slug,
            direction = %trade.direction,
            size = %trade.size,
            "paper trade opened"
        );
        inner.open.insert(trade.trade_id.clone(), trade);
        Ok(())
    }

    pub fn confirm(&self, trade_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let trade = inner
            .open
            .get_mut(trade_id)
            .ok_or_else(|| BotError::Ledger(format!("unknown trade {trade_id}")))?;
        trade.status = TradeStatus::Confirmed;
        Ok(())
    }

    /// Close an open trade, computing realized PnL when both prices exist.
    pub fn close(
        &self,
        trade_id: &str,
        exit_price: Option<Decimal>,
        reason: ExitReason,
        status: TradeStatus,
        now: DateTime<Utc>,
    ) -> Result<PaperTrade> {
        let mut inner = self.inner.lock();
        let mut trade = inner
            .open
            .remove(trade_id)
            .ok_or_else(|| BotError::Ledger(format!("unknown trade {trade_id}")))?;
        trade.status = status;
        trade.exit_price = exit_price;
        trade.exit_reason = Some(reason);
        trade.closed_at = Some(now);
        trade.realized_pnl = exit_price.and_then(|p| trade.compute_pnl(p));
        self.ledger.append(LedgerEvent::Close, &trade)?;
        info!(
            trade_id = %trade.trade_id,
            reason = reason.as_str(),
            pnl = ?trade.realized_pnl,
            "paper trade closed"
        );
        inner.closed.push(trade.clone());
        Ok(trade)
    }

    /// Advance bar counters on all open trades; called once per timeframe
    /// bar so the time stop can fire.
    pub fn on_bar(&self) {
        let mut inner = self.inner.lock();
        for trade in inner.open.values_mut() {
            trade.bars_elapsed += 1;
        }
    }

    pub fn open_trades(&self) -> Vec<PaperTrade> {
        self.inner.lock().open.values().cloned().collect()
    }

    pub fn closed_trades(&self) -> Vec<PaperTrade> {
        self.inner.lock().closed.clone()
    }

    pub fn open_exposure(&self) -> Decimal {
        self.inner.lock().open.values().map(|t| t.size).sum()
    }

    /// Open trades whose market window ended and were never closed.
    pub fn orphan_count(&self, now: DateTime<Utc>) -> usize {
        self.inner
            .lock()
            .open
            .values()
            .filter(|t| t.window_end.map(|end| end < now).unwrap_or(false))
            .count()
    }

    pub fn stats(&self) -> SessionStats {
        let inner = self.inner.lock();
        let wins = inner
            .closed
            .iter()
            .filter(|t| t.realized_pnl.map(|p| p > Decimal::ZERO).unwrap_or(false))
            .count();
        let valid_closed = inner
            .closed
            .iter()
            .filter(|t| t.realized_pnl.is_some())
            .count();
        let mut exits_by_reason: HashMap<String, usize> = HashMap::new();
        for trade in &inner.closed {
            if let Some(reason) = trade.exit_reason {
                *exits_by_reason.entry(reason.as_str().to_string()).or_insert(0) += 1;
            }
        }
        SessionStats {
            open_count: inner.open.len(),
            closed_count: inner.closed.len(),
            wins,
            losses: valid_closed - wins,
            win_rate: if valid_closed > 0 {
                Some(wins as f64 / valid_closed as f64)
            } else {
                None
            },
            realized_pnl: inner.closed.iter().filter_map(|t| t.realized_pnl).sum(),
            open_exposure: inner.open.values().map(|t| t.size).sum(),
            exits_by_reason,
        }
    }

    /// Startup sanity verdict. NO-GO when orphans exist, when memory lost
    /// a material share of what the ledger file recorded, or when trades
    /// happened but none closed with a usable PnL.
    pub fn go_no_go(&self, now: DateTime<Utc>) -> GoNoGo {
        let mut reasons = Vec::new();

        let orphans = self.orphan_count(now);
        if orphans > 0 {
            reasons.push(format!("{orphans} orphaned open trades"));
        }

        match self.ledger.file_counts() {
            Ok((file_opens, _)) => {
                let inner = self.inner.lock();
                let in_memory = inner.open.len() + inner.closed.len();
                let threshold = (file_opens as f64 * 0.8).floor() as usize;
                if file_opens > 0 && in_memory < threshold {
                    reasons.push(format!(
                        "memory holds {in_memory} of {file_opens} ledgered trades"
                    ));
                }
            }
            Err(e) => {
                warn!(error = %e, "ledger unreadable during go/no-go");
                reasons.push("ledger unreadable".into());
            }
        }

        let stats = self.stats();
        let total = stats.open_count + stats.closed_count;
        let valid_closed = stats.wins + stats.losses;
        if total >= 5 && valid_closed == 0 {
            reasons.push(format!("{total} trades but none closed with valid PnL"));
        }

        GoNoGo {
            go: reasons.is_empty(),
            reasons,
        }
    }
}
