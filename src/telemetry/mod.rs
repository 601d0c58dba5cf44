//! Metrics collection and export.
//!
//! Counters and latency histograms are kept in-process and exported in
//! Prometheus text format on `/metrics` and as JSON on `/metrics/risk` and
//! `/state`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;

/// Histogram bucket upper bounds in milliseconds. The final implicit bucket
/// is +Inf.
pub const LATENCY_BUCKETS_MS: [u64; 8] = [0, 100, 250, 500, 1000, 2500, 5000, 10000];

/// Outcome of one processed signal, for the trade log ring.
#[derive(Debug, Clone, Serialize)]
pub struct TradeMetric {
    pub timestamp: DateTime<Utc>,
    pub market_slug: String,
    pub direction: String,
    pub size: Decimal,
    /// "accepted", "blocked" or "failed".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    pub latency_ms: u64,
}

#[derive(Default)]
struct CollectorInner {
    counters: HashMap<String, u64>,
    block_reasons: HashMap<String, u64>,
    trades: Vec<TradeMetric>,
    histograms: HashMap<String, Vec<u64>>,
}

pub struct MetricsCollector {
    max_history: usize,
    inner: Mutex<CollectorInner>,
}

impl MetricsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            inner: Mutex::new(CollectorInner::default()),
        }
    }

    pub fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }

    pub fn increment_by(&self, name: &str, value: u64) {
        let mut inner = self.inner.lock();
        *inner.counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Record one processed signal and roll up the standard counters.
    pub fn record_trade(&self, metric: TradeMetric) {
        let mut inner = self.inner.lock();
        *inner
            .counters
            .entry("signals_processed_total".into())
            .or_insert(0) += 1;
        let counter = match metric.status.as_str() {
            "accepted" => "trades_opened_total",
            "blocked" => "trades_blocked_total",
            _ => "trades_failed_total",
        };
        *inner.counters.entry(counter.into()).or_insert(0) += 1;
        if let Some(reason) = &metric.block_reason {
            *inner.block_reasons.entry(reason.clone()).or_insert(0) += 1;
        }

        let bucket = Self::bucket_index(metric.latency_ms);
        let hist = inner
            .histograms
            .entry("webhook_latency".into())
            .or_insert_with(|| vec![0; LATENCY_BUCKETS_MS.len() + 1]);
        hist[bucket] += 1;

        inner.trades.push(metric);
        if inner.trades.len() > self.max_history {
            let excess = inner.trades.len() - self.max_history;
            inner.trades.drain(..excess);
        }
    }

    pub fn observe_latency(&self, name: &str, latency_ms: u64) {
        let mut inner = self.inner.lock();
        let bucket = Self::bucket_index(latency_ms);
        let hist = inner
            .histograms
            .entry(name.to_string())
            .or_insert_with(|| vec![0; LATENCY_BUCKETS_MS.len() + 1]);
        hist[bucket] += 1;
    }

    fn bucket_index(latency_ms: u64) -> usize {
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if latency_ms <= *bound {
                return i;
            }
        }
        LATENCY_BUCKETS_MS.len()
    }

    pub fn block_reasons(&self) -> HashMap<String, u64> {
        self.inner.lock().block_reasons.clone()
    }

    pub fn recent_trades(&self, n: usize) -> Vec<TradeMetric> {
        let inner = self.inner.lock();
        inner.trades.iter().rev().take(n).cloned().collect()
    }

    /// Summary for the JSON endpoints.
    pub fn summary(&self) -> serde_json::Value {
        let inner = self.inner.lock();
        let processed = inner
            .counters
            .get("signals_processed_total")
            .copied()
            .unwrap_or(0);
        let opened = inner.counters.get("trades_opened_total").copied().unwrap_or(0);
        let blocked = inner.counters.get("trades_blocked_total").copied().unwrap_or(0);
        serde_json::json!({
            "timestamp": Utc::now(),
            "counters": inner.counters,
            "block_reasons": inner.block_reasons,
            "open_rate": if processed > 0 { opened as f64 / processed as f64 } else { 0.0 },
            "block_rate": if processed > 0 { blocked as f64 / processed as f64 } else { 0.0 },
            "recent_trades": inner.trades.iter().rev().take(10).collect::<Vec<_>>(),
        })
    }

    /// Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        let inner = self.inner.lock();
        let mut lines = Vec::new();

        let mut counters: Vec<_> = inner.counters.iter().collect();
        counters.sort_by_key(|(k, _)| k.as_str());
        for (name, value) in counters {
            lines.push(format!("# TYPE {name} counter"));
            lines.push(format!("{name} {value}"));
        }

        lines.push("# TYPE trades_blocked_by_reason_total counter".into());
        let mut reasons: Vec<_> = inner.block_reasons.iter().collect();
        reasons.sort_by_key(|(k, _)| k.as_str());
        for (reason, count) in reasons {
            lines.push(format!(
                "trades_blocked_by_reason_total{{reason=\"{reason}\"}} {count}"
            ));
        }

        let mut histograms: Vec<_> = inner.histograms.iter().collect();
        histograms.sort_by_key(|(k, _)| k.as_str());
        for (name, counts) in histograms {
            lines.push(format!("# TYPE {name}_milliseconds histogram"));
            let mut cumulative = 0u64;
            for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
                cumulative += counts[i];
                lines.push(format!(
                    "{name}_milliseconds_bucket{{le=\"{bound}\"}} {cumulative}"
                ));
            }
            cumulative += counts[LATENCY_BUCKETS_MS.len()];
            lines.push(format!(
                "{name}_milliseconds_bucket{{le=\"+Inf\"}} {cumulative}"
            ));
            lines.push(format!("{name}_milliseconds_count {cumulative}"));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn metric(status: &str, reason: Option<&str>, latency_ms: u64) -> TradeMetric {
        TradeMetric {
            timestamp: Utc::now(),
            market_slug: "btc-updown-15m-0".into(),
            direction: "UP".into(),
            size: dec!(1),
            status: status.into(),
            block_reason: reason.map(String::from),
            latency_ms,
        }
    }

    #[test]
    fn test_counters() {
        let c = MetricsCollector::new(100);
        c.increment("gamma_requests_total");
        c.increment_by("gamma_requests_total", 2);
        assert_eq!(c.counter("gamma_requests_total"), 3);
        assert_eq!(c.counter("unknown"), 0);
    }

    #[test]
    fn test_trade_rollup() {
        let c = MetricsCollector::new(100);
        c.record_trade(metric("accepted", None, 50));
        c.record_trade(metric("blocked", Some("max_exposure"), 10));
        c.record_trade(metric("blocked", Some("max_exposure"), 10));
        c.record_trade(metric("failed", None, 2000));

        assert_eq!(c.counter("signals_processed_total"), 4);
        assert_eq!(c.counter("trades_opened_total"), 1);
        assert_eq!(c.counter("trades_blocked_total"), 2);
        assert_eq!(c.counter("trades_failed_total"), 1);
        assert_eq!(c.block_reasons().get("max_exposure"), Some(&2));
    }

    #[test]
    fn test_history_bounded() {
        let c = MetricsCollector::new(3);
        for _ in 0..10 {
            c.record_trade(metric("accepted", None, 1));
        }
        assert_eq!(c.recent_trades(100).len(), 3);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(MetricsCollector::bucket_index(0), 0);
        assert_eq!(MetricsCollector::bucket_index(1), 1);
        assert_eq!(MetricsCollector::bucket_index(100), 1);
        assert_eq!(MetricsCollector::bucket_index(101), 2);
        assert_eq!(MetricsCollector::bucket_index(10000), 7);
        assert_eq!(MetricsCollector::bucket_index(99999), 8);
    }

    #[test]
    fn test_prometheus_export() {
        let c = MetricsCollector::new(100);
        c.record_trade(metric("blocked", Some("kill_switch"), 120));
        let out = c.export_prometheus();
        assert!(out.contains("trades_blocked_total 1"));
        assert!(out.contains("trades_blocked_by_reason_total{reason=\"kill_switch\"} 1"));
        assert!(out.contains("webhook_latency_milliseconds_bucket{le=\"250\"} 1"));
        assert!(out.contains("webhook_latency_milliseconds_bucket{le=\"+Inf\"} 1"));
        assert!(out.contains("webhook_latency_milliseconds_count 1"));
    }

    #[test]
    fn test_histogram_cumulative() {
        let c = MetricsCollector::new(100);
        c.observe_latency("poll", 50);
        c.observe_latency("poll", 400);
        c.observe_latency("poll", 50_000);
        let out = c.export_prometheus();
        assert!(out.contains("poll_milliseconds_bucket{le=\"100\"} 1"));
        assert!(out.contains("poll_milliseconds_bucket{le=\"500\"} 2"));
        assert!(out.contains("poll_milliseconds_bucket{le=\"+Inf\"} 3"));
    }

    #[test]
    fn test_summary_rates() {
        let c = MetricsCollector::new(100);
        c.record_trade(metric("accepted", None, 5));
        c.record_trade(metric("blocked", Some("spread_too_wide"), 5));
        let summary = c.summary();
        assert_eq!(summary["open_rate"], 0.5);
        assert_eq!(summary["block_rate"], 0.5);
    }
}
