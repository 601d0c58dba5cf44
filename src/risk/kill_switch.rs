//! Session kill switch with a cooldown that survives restarts.
//!
//! The switch watches the most recent closed trades. It trips when the
//! window's summed realized PnL falls to the configured loss, or when a
//! full window's win rate drops below the floor. A tripped switch blocks
//! new entries until the cooldown expires; the trip is persisted to disk
//! so a restart cannot reset it early.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::KillSwitchConfig;
use crate::types::PaperTrade;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrippedState {
    pub reason: String,
    pub tripped_at: DateTime<Utc>,
    pub cooldown_until: DateTime<Utc>,
}

pub struct KillSwitch {
    config: KillSwitchConfig,
    state_path: PathBuf,
    state: Mutex<Option<TrippedState>>,
}

impl KillSwitch {
    /// Load persisted state; an already-expired cooldown is discarded and
    /// its file removed.
    pub fn new(config: KillSwitchConfig) -> Self {
        let state_path = PathBuf::from(&config.state_path);
        let state = load_state(&state_path);
        let state = match state {
            Some(s) if s.cooldown_until > Utc::now() => {
                warn!(
                    reason = %s.reason,
                    until = %s.cooldown_until,
                    "kill switch restored from disk, still in cooldown"
                );
                Some(s)
            }
            Some(_) => {
                let _ = fs::remove_file(&state_path);
                None
            }
            None => None,
        };
        Self {
            config,
            state_path,
            state: Mutex::new(state),
        }
    }

    /// Active trip, if any. Expired cooldowns are cleared here, including
    /// the on-disk copy.
    pub fn active_trip(&self, now: DateTime<Utc>) -> Option<TrippedState> {
        let mut state = self.state.lock();
        if let Some(s) = state.as_ref() {
            if s.cooldown_until <= now {
                info!("kill switch cooldown expired");
                *state = None;
                let _ = fs::remove_file(&self.state_path);
                return None;
            }
            return Some(s.clone());
        }
        None
    }

    /// Re-evaluate trip conditions over recently closed trades. Returns the
    /// new trip state if one was just created.
    pub fn evaluate(&self, closed: &[PaperTrade], now: DateTime<Utc>) -> Option<TrippedState> {
        if !self.config.enabled || self.active_trip(now).is_some() {
            return None;
        }

        let window: Vec<&PaperTrade> = closed
            .iter()
            .rev()
            .filter(|t| t.realized_pnl.is_some())
            .take(self.config.lookback_closed)
            .collect();
        if window.is_empty() {
            return None;
        }

        let total_pnl: Decimal = window.iter().filter_map(|t| t.realized_pnl).sum();
        if total_pnl <= self.config.max_realized_loss {
            return Some(self.trip(
                format!("realized_loss {total_pnl} over last {} trades", window.len()),
                now,
            ));
        }

        // Win rate only fires on a full window; a short losing streak at
        // session start should not lock the bot out.
        if window.len() == self.config.lookback_closed {
            let wins = window
                .iter()
                .filter(|t| t.realized_pnl.map(|p| p > Decimal::ZERO).unwrap_or(false))
                .count();
            let winrate = wins as f64 / window.len() as f64;
            if winrate < self.config.min_winrate {
                return Some(self.trip(
                    format!("winrate {winrate:.2} below {:.2}", self.config.min_winrate),
                    now,
                ));
            }
        }
        None
    }

    fn trip(&self, reason: String, now: DateTime<Utc>) -> TrippedState {
        let tripped = TrippedState {
            reason,
            tripped_at: now,
            cooldown_until: now + Duration::seconds(self.config.cooldown_secs as i64),
        };
        warn!(
            reason = %tripped.reason,
            until = %tripped.cooldown_until,
            "kill switch tripped"
        );
        if let Err(e) = persist_state(&self.state_path, &tripped) {
            warn!(error = %e, "failed to persist kill switch state");
        }
        *self.state.lock() = Some(tripped.clone());
        tripped
    }

    /// Manual reset, clearing memory and disk.
    pub fn reset(&self) {
        *self.state.lock() = None;
        let _ = fs::remove_file(&self.state_path);
        info!("kill switch manually reset");
    }
}

fn load_state(path: &Path) -> Option<TrippedState> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "unreadable kill switch state, ignoring");
            None
        }
    }
}

/// Write-then-rename so a crash mid-write never leaves a corrupt file.
fn persist_state(path: &Path, state: &TrippedState) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config(dir: &Path) -> KillSwitchConfig {
        KillSwitchConfig {
            enabled: true,
            lookback_closed: 4,
            max_realized_loss: dec!(-5),
            min_winrate: 0.25,
            cooldown_secs: 900,
            state_path: dir.join("risk_state.json").to_string_lossy().into_owned(),
        }
    }

    fn closed_trade(pnl: Decimal) -> PaperTrade {
        use crate::types::{Direction, TradeStatus};
        PaperTrade {
            trade_id: "t".into(),
            market_slug: "btc-updown-15m-0".into(),
            token_id: "tok".into(),
            direction: Direction::Up,
            size: dec!(1),
            entry_price: Some(dec!(0.5)),
            opened_at: Utc::now(),
            window_end: None,
            status: TradeStatus::Closed,
            confidence: Some(5),
            session_id: None,
            signal_id: None,
            bars_elapsed: 0,
            exit_price: Some(dec!(0.5)),
            exit_reason: None,
            closed_at: Some(Utc::now()),
            realized_pnl: Some(pnl),
        }
    }

    #[test]
    fn test_trips_on_realized_loss() {
        let dir = tempfile::tempdir().unwrap();
        let ks = KillSwitch::new(config(dir.path()));
        let now = Utc::now();
        let closed = vec![closed_trade(dec!(-3)), closed_trade(dec!(-2.5))];
        let trip = ks.evaluate(&closed, now).unwrap();
        assert!(trip.reason.starts_with("realized_loss"));
        assert!(ks.active_trip(now).is_some());
    }

    #[test]
    fn test_no_trip_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let ks = KillSwitch::new(config(dir.path()));
        let closed = vec![closed_trade(dec!(-2)), closed_trade(dec!(1))];
        assert!(ks.evaluate(&closed, Utc::now()).is_none());
    }

    #[test]
    fn test_winrate_requires_full_window() {
        let dir = tempfile::tempdir().unwrap();
        let ks = KillSwitch::new(config(dir.path()));
        let now = Utc::now();
        // three losers, window of four not yet full: no trip
        let closed = vec![
            closed_trade(dec!(-1)),
            closed_trade(dec!(-1)),
            closed_trade(dec!(-1)),
        ];
        assert!(ks.evaluate(&closed, now).is_none());
        // fourth small loss fills the window: winrate 0.0 trips
        let closed = vec![
            closed_trade(dec!(-1)),
            closed_trade(dec!(-1)),
            closed_trade(dec!(-1)),
            closed_trade(dec!(-0.5)),
        ];
        let trip = ks.evaluate(&closed, now).unwrap();
        assert!(trip.reason.starts_with("winrate"));
    }

    #[test]
    fn test_persists_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        {
            let ks = KillSwitch::new(cfg.clone());
            ks.evaluate(&[closed_trade(dec!(-10))], Utc::now());
        }
        // fresh instance restores the cooldown from disk
        let ks = KillSwitch::new(cfg);
        assert!(ks.active_trip(Utc::now()).is_some());
    }

    #[test]
    fn test_expired_state_cleared_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let path = PathBuf::from(&cfg.state_path);
        let expired = TrippedState {
            reason: "realized_loss".into(),
            tripped_at: Utc::now() - Duration::seconds(2000),
            cooldown_until: Utc::now() - Duration::seconds(1100),
        };
        persist_state(&path, &expired).unwrap();

        let ks = KillSwitch::new(cfg);
        assert!(ks.active_trip(Utc::now()).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_expiry_during_run_clears_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.cooldown_secs = 0;
        let path = PathBuf::from(&cfg.state_path);
        let ks = KillSwitch::new(cfg);
        let now = Utc::now();
        ks.evaluate(&[closed_trade(dec!(-10))], now);
        assert!(path.exists());
        assert!(ks.active_trip(now + Duration::seconds(1)).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_manual_reset() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let path = PathBuf::from(&cfg.state_path);
        let ks = KillSwitch::new(cfg);
        ks.evaluate(&[closed_trade(dec!(-10))], Utc::now());
        assert!(path.exists());
        ks.reset();
        assert!(ks.active_trip(Utc::now()).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_disabled_never_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.enabled = false;
        let ks = KillSwitch::new(cfg);
        assert!(ks.evaluate(&[closed_trade(dec!(-100))], Utc::now()).is_none());
    }
}
