//! Pre-trade risk gates and in-trade stop logic.

pub mod kill_switch;

pub use kill_switch::{KillSwitch, TrippedState};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::RiskConfig;
use crate::market_data::BookTop;
use crate::types::{Direction, PaperTrade};

/// Gate outcome: `Err` carries the machine-readable block reason used in
/// webhook responses and metrics labels.
pub type Gate = std::result::Result<(), String>;

pub struct RiskManager {
    config: RiskConfig,
    equity: Decimal,
    pub kill_switch: KillSwitch,
}

impl RiskManager {
    pub fn new(config: RiskConfig, equity: Decimal) -> Self {
        let kill_switch = KillSwitch::new(config.kill_switch.clone());
        Self {
            config,
            equity,
            kill_switch,
        }
    }

    pub fn equity(&self) -> Decimal {
        self.equity
    }

    /// Position size from confidence: base risk scaled up for stronger
    /// signals, with an absolute floor so a tiny account still trades.
    pub fn position_size(&self, confidence: u8) -> Decimal {
        let scale = match confidence {
            0..=5 => dec!(1.0),
            6 => dec!(1.5),
            7 => dec!(2.0),
            8 => dec!(2.5),
            _ => dec!(3.0),
        };
        let size = self.equity * self.config.base_risk_pct * scale;
        size.max(dec!(0.01))
    }

    pub fn check_confidence(&self, confidence: u8) -> Gate {
        if confidence < self.config.min_confidence || confidence > self.config.max_confidence {
            return Err("confidence_out_of_range".into());
        }
        Ok(())
    }

    /// Total open exposure plus the new stake must stay inside the cap.
    pub fn check_exposure(&self, open_exposure: Decimal, new_size: Decimal) -> Gate {
        let cap = self.equity * self.config.max_exposure_pct;
        if open_exposure + new_size > cap {
            return Err("max_exposure".into());
        }
        Ok(())
    }

    /// One open trade per direction.
    pub fn check_direction_limit(&self, open: &[PaperTrade], direction: Direction) -> Gate {
        if open.iter().any(|t| t.direction == direction) {
            return Err("direction_limit".into());
        }
        Ok(())
    }

    /// Spread, book freshness and top-of-book depth at entry.
    pub fn check_market_quality(&self, top: Option<&BookTop>) -> Gate {
        let Some(top) = top else {
            if self.config.entry_require_fresh_book {
                return Err("no_book".into());
            }
            return Ok(());
        };
        if self.config.entry_require_fresh_book
            && top.age_secs() > self.config.entry_max_book_age_secs as f64
        {
            return Err("stale_book".into());
        }
        let Some(spread) = top.spread() else {
            return Err("one_sided_book".into());
        };
        if spread >= self.config.hard_reject_spread {
            return Err("broken_market".into());
        }
        if spread > self.config.max_entry_spread {
            return Err("spread_too_wide".into());
        }
        if let Some(ask_size) = top.best_ask_size {
            if ask_size < self.config.min_ask_size {
                return Err("thin_ask".into());
            }
        }
        Ok(())
    }

    /// Soft stop: absolute adverse move from entry.
    pub fn soft_stop_hit(&self, trade: &PaperTrade, current_price: Decimal) -> bool {
        let Some(entry) = trade.entry_price else {
            return false;
        };
        entry - current_price >= self.config.soft_stop_adverse_move
    }

    /// Time stop: position has sat through too many bars.
    pub fn time_stop_hit(&self, trade: &PaperTrade) -> bool {
        trade.bars_elapsed >= self.config.time_stop_bars
    }

    /// Kill switch gate for the webhook path.
    pub fn check_kill_switch(&self, now: DateTime<Utc>) -> Gate {
        if self.kill_switch.active_trip(now).is_some() {
            return Err("kill_switch".into());
        }
        Ok(())
    }
}
