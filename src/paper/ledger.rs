//! Append-only JSONL trade ledger.
//!
//! Every open and close is appended as one JSON line, so the file doubles
//! as an audit log and as the source for rehydrating open positions after
//! a restart.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BotError, Result};
use crate::types::{PaperTrade, TradeStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub event: LedgerEvent,
    pub at: DateTime<Utc>,
    pub trade: PaperTrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    Open,
    Close,
}

pub struct Ledger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

/// Result of replaying the ledger file at startup.
#[derive(Debug, Default)]
pub struct Rehydrated {
    pub open: Vec<PaperTrade>,
    pub closed: Vec<PaperTrade>,
    /// Open records skipped because they were older than the cutoff.
    pub expired: usize,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: LedgerEvent, trade: &PaperTrade) -> Result<()> {
        let record = LedgerRecord {
            event,
            at: Utc::now(),
            trade: trade.clone(),
        };
        let line = serde_json::to_string(&record)?;
        let _guard = self.write_lock.lock();
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Replay the file: opens without a matching close become live again,
    /// unless older than `max_age_hours`.
    pub fn rehydrate(&self, max_age_hours: f64) -> Result<Rehydrated> {
        let mut out = Rehydrated::default();
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        let cutoff = Utc::now() - Duration::seconds((max_age_hours * 3600.0) as i64);
        let mut open: Vec<PaperTrade> = Vec::new();
        for (i, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: LedgerRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    warn!(line = i + 1, error = %e, "skipping corrupt ledger line");
                    continue;
                }
            };
            match record.event {
                LedgerEvent::Open => open.push(record.trade),
                LedgerEvent::Close => {
                    open.retain(|t| t.trade_id != record.trade.trade_id);
                    out.closed.push(record.trade);
                }
            }
        }

        for trade in open {
            if trade.opened_at < cutoff {
                out.expired += 1;
            } else if trade.status.is_open() {
                out.open.push(trade);
            }
        }
        info!(
            open = out.open.len(),
            closed = out.closed.len(),
            expired = out.expired,
            "ledger rehydrated"
        );
        Ok(out)
    }

    /// Counts of open/close records in the file, for startup consistency
    /// checks against in-memory state.
    pub fn file_counts(&self) -> Result<(usize, usize)> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
            Err(e) => return Err(e.into()),
        };
        let mut opens = 0;
        let mut closes = 0;
        for line in raw.lines() {
            if let Ok(record) = serde_json::from_str::<LedgerRecord>(line) {
                match record.event {
                    LedgerEvent::Open => opens += 1,
                    LedgerEvent::Close => closes += 1,
                }
            }
        }
        Ok((opens, closes))
    }
}

impl From<TradeStatus> for LedgerEvent {
    fn from(status: TradeStatus) -> Self {
        if status.is_open() {
            LedgerEvent::Open
        } else {
            LedgerEvent::Close
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use rust_decimal_macros::dec;

    fn trade(id: &str, status: TradeStatus, opened_at: DateTime<Utc>) -> PaperTrade {
        PaperTrade {
            trade_id: id.into(),
            market_slug: "btc-updown-15m-0".into(),
            token_id: "tok".into(),
            direction: Direction::Up,
            size: dec!(1),
            entry_price: Some(dec!(0.5)),
            opened_at,
            window_end: None,
            status,
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
    fn test_append_and_rehydrate() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("trades.jsonl"));
        let now = Utc::now();

        ledger
            .append(LedgerEvent::Open, &trade("a", TradeStatus::Pending, now))
            .unwrap();
        ledger
            .append(LedgerEvent::Open, &trade("b", TradeStatus::Confirmed, now))
            .unwrap();
        let mut closed = trade("a", TradeStatus::Closed, now);
        closed.realized_pnl = Some(dec!(0.2));
        ledger.append(LedgerEvent::Close, &closed).unwrap();

        let out = ledger.rehydrate(24.0).unwrap();
        assert_eq!(out.open.len(), 1);
        assert_eq!(out.open[0].trade_id, "b");
        assert_eq!(out.closed.len(), 1);
        assert_eq!(out.closed[0].realized_pnl, Some(dec!(0.2)));
    }

    #[test]
    fn test_rehydrate_drops_stale_opens() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("trades.jsonl"));
        let old = Utc::now() - Duration::hours(48);
        ledger
            .append(LedgerEvent::Open, &trade("old", TradeStatus::Pending, old))
            .unwrap();

        let out = ledger.rehydrate(24.0).unwrap();
        assert!(out.open.is_empty());
        assert_eq!(out.expired, 1);
    }

    #[test]
    fn test_rehydrate_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("missing.jsonl"));
        let out = ledger.rehydrate(24.0).unwrap();
        assert!(out.open.is_empty());
        assert!(out.closed.is_empty());
    }

    #[test]
    fn test_rehydrate_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.jsonl");
        let ledger = Ledger::new(&path);
        ledger
            .append(LedgerEvent::Open, &trade("a", TradeStatus::Pending, Utc::now()))
            .unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{{not json"))
            .unwrap();

        let out = ledger.rehydrate(24.0).unwrap();
        assert_eq!(out.open.len(), 1);
    }

    #[test]
    fn test_file_counts() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("trades.jsonl"));
        let now = Utc::now();
        ledger
            .append(LedgerEvent::Open, &trade("a", TradeStatus::Pending, now))
            .unwrap();
        ledger
            .append(LedgerEvent::Close, &trade("a", TradeStatus::Closed, now))
            .unwrap();
        assert_eq!(ledger.file_counts().unwrap(), (1, 1));
    }
}
