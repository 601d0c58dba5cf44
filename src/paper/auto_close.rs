//! Background exit engine for open paper trades.
//!
//! Each poll cycle walks the open book and closes positions on, in order
//! of precedence: soft stop, time stop, market window end (minus buffer),
//! and finally the hard TTL. After any close the kill switch re-evaluates
//! the session.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::{AutoCloseConfig, EntryWindowConfig};
use crate::market_data::MarketData;
use crate::paper::PositionManager;
use crate::risk::RiskManager;
use crate::types::{ExitReason, PaperTrade, TradeStatus};

pub struct AutoCloser {
    config: AutoCloseConfig,
    window: EntryWindowConfig,
    positions: Arc<PositionManager>,
    market_data: Arc<MarketData>,
    risk: Arc<RiskManager>,
}

impl AutoCloser {
    pub fn new(
        config: AutoCloseConfig,
        window: EntryWindowConfig,
        positions: Arc<PositionManager>,
        market_data: Arc<MarketData>,
        risk: Arc<RiskManager>,
    ) -> Self {
        Self {
            config,
            window,
            positions,
            market_data,
            risk,
        }
    }

    pub async fn run(self: Arc<Self>) {
        if !self.config.enabled {
            info!("auto-close disabled");
            return;
        }
        let interval = Duration::from_secs(self.config.price_poll_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            self.check_once(Utc::now());
        }
    }

    /// One pass over the open book. Returns the trades closed this cycle.
    pub fn check_once(&self, now: DateTime<Utc>) -> Vec<PaperTrade> {
        let mut closed = Vec::new();
        for trade in self.positions.open_trades() {
            let price = self.current_price(&trade.token_id);
            let reason = self.exit_reason_for(&trade, price, now);
            let Some(reason) = reason else { continue };

            let exit_price = price.or(trade.entry_price);
            let status = if exit_price.is_some() {
                TradeStatus::Closed
            } else {
                TradeStatus::Timeout
            };
            match self
                .positions
                .close(&trade.trade_id, exit_price, reason, status, now)
            {
                Ok(done) => {
                    self.market_data.unsubscribe(&trade.token_id);
                    closed.push(done);
                }
                Err(e) => debug!(trade_id = %trade.trade_id, error = %e, "close failed"),
            }
        }
        if !closed.is_empty() {
            self.risk
                .kill_switch
                .evaluate(&self.positions.closed_trades(), now);
        }
        closed
    }

    fn exit_reason_for(
        &self,
        trade: &PaperTrade,
        price: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Option<ExitReason> {
        if let Some(p) = price {
            if self.risk.soft_stop_hit(trade, p) {
                return Some(ExitReason::SoftStop);
            }
        }
        if self.risk.time_stop_hit(trade) {
            return Some(ExitReason::TimeStop);
        }
        if self.config.on_market_end {
            if let Some(end) = trade.window_end {
                let buffer = chrono::Duration::seconds(self.window.auto_close_buffer_secs as i64);
                if now >= end - buffer {
                    return Some(ExitReason::MarketEnd);
                }
            }
        }
        let ttl = chrono::Duration::seconds((self.config.ttl_minutes * 60.0) as i64);
        if now - trade.opened_at >= ttl {
            return Some(ExitReason::AutoCloseTtl);
        }
        None
    }

    /// Exit price for a long position is what the book will pay: best bid,
    /// falling back to mid when one-sided.
    fn current_price(&self, token_id: &str) -> Option<Decimal> {
        let top = self.market_data.top_of_book(token_id)?;
        top.best_bid.or_else(|| top.mid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MarketDataConfig, RiskConfig};
    use crate::market_data::BookTop;
    use crate::paper::Ledger;
    use crate::types::Direction;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    fn setup(dir: &std::path::Path, ttl_minutes: f64) -> AutoCloser {
        let md_config = MarketDataConfig {
            ws_enabled: false,
            ..MarketDataConfig::default()
        };
        AutoCloser::new(
            AutoCloseConfig {
                enabled: true,
                ttl_minutes,
                on_market_end: true,
                price_poll_interval_secs: 30,
            },
            EntryWindowConfig::default(),
            Arc::new(PositionManager::new(Ledger::new(dir.join("trades.jsonl")))),
            Arc::new(MarketData::new(md_config)),
            Arc::new(RiskManager::new(
                RiskConfig {
                    kill_switch: crate::config::KillSwitchConfig {
                        state_path: dir.join("risk_state.json").to_string_lossy().into_owned(),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                dec!(100),
            )),
        )
    }

    fn trade(id: &str, opened_at: DateTime<Utc>, window_end: Option<DateTime<Utc>>) -> PaperTrade {
        PaperTrade {
            trade_id: id.into(),
            market_slug: format!("btc-updown-15m-{id}"),
            token_id: format!("tok-{id}"),
            direction: Direction::Up,
            size: dec!(1),
            entry_price: Some(dec!(0.50)),
            opened_at,
            window_end,
            status: TradeStatus::Confirmed,
            confidence: Some(5),
            session_id: None,
            signal_id: None,
            bars_elapsed: 0,
            exit_price: None,
            exit_reason: None,
            closed_at: None,
            realized_pnl: None,
        }
    }

    #[test]
    fn test_ttl_close() {
        let dir = tempfile::tempdir().unwrap();
        let ac = setup(dir.path(), 13.0);
        let now = Utc::now();
        ac.positions
            .open(trade("a", now - ChronoDuration::minutes(14), None))
            .unwrap();
        ac.positions
            .open(trade("b", now - ChronoDuration::minutes(5), None))
            .unwrap();

        let closed = ac.check_once(now);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].trade_id, "a");
        assert_eq!(closed[0].exit_reason, Some(ExitReason::AutoCloseTtl));
        // no book data: falls back to entry, flat PnL
        assert_eq!(closed[0].realized_pnl, Some(dec!(0)));
    }

    #[test]
    fn test_market_end_close_with_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let ac = setup(dir.path(), 60.0);
        let now = Utc::now();
        // window ends in 10s, buffer is 15s: close now
        ac.positions
            .open(trade("a", now, Some(now + ChronoDuration::seconds(10))))
            .unwrap();
        let closed = ac.check_once(now);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].exit_reason, Some(ExitReason::MarketEnd));
    }

    #[test]
    fn test_soft_stop_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let ac = setup(dir.path(), 13.0);
        let now = Utc::now();
        ac.positions
            .open(trade("a", now - ChronoDuration::minutes(14), None))
            .unwrap();
        ac.market_data
            .cache()
            .update("tok-a", BookTop::new(Some(dec!(0.35)), Some(dec!(0.40)), None));

        let closed = ac.check_once(now);
        assert_eq!(closed[0].exit_reason, Some(ExitReason::SoftStop));
        assert_eq!(closed[0].exit_price, Some(dec!(0.35)));
    }

    #[test]
    fn test_time_stop() {
        let dir = tempfile::tempdir().unwrap();
        let ac = setup(dir.path(), 60.0);
        let now = Utc::now();
        ac.positions.open(trade("a", now, None)).unwrap();
        ac.positions.on_bar();
        ac.positions.on_bar();

        let closed = ac.check_once(now);
        assert_eq!(closed[0].exit_reason, Some(ExitReason::TimeStop));
    }

    #[test]
    fn test_healthy_position_stays_open() {
        let dir = tempfile::tempdir().unwrap();
        let ac = setup(dir.path(), 13.0);
        let now = Utc::now();
        ac.positions
            .open(trade("a", now, Some(now + ChronoDuration::minutes(10))))
            .unwrap();
        ac.market_data
            .cache()
            .update("tok-a", BookTop::new(Some(dec!(0.52)), Some(dec!(0.55)), None));

        assert!(ac.check_once(now).is_empty());
        assert_eq!(ac.positions.open_trades().len(), 1);
    }
}
