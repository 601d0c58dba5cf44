//! Circuit breaker guarding outbound API calls.
//!
//! Closed: calls pass, consecutive failures count up. Open: calls are
//! rejected until the recovery timeout elapses. HalfOpen: a limited number
//! of probe calls are let through; enough successes close the circuit, any
//! failure reopens it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::BreakerSettings;
use crate::error::{BotError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            success_threshold: 2,
        }
    }
}

impl BreakerConfig {
    /// Per-service presets. Trading paths fail fast and recover quickly;
    /// model inference is given more slack.
    pub fn for_service(name: &str) -> Self {
        match name {
            "polymarket" => Self {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(30),
                half_open_max_calls: 1,
                success_threshold: 1,
            },
            "gamma" => Self {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(60),
                half_open_max_calls: 2,
                success_threshold: 2,
            },
            "model" => Self {
                failure_threshold: 10,
                recovery_timeout: Duration::from_secs(120),
                half_open_max_calls: 2,
                success_threshold: 2,
            },
            _ => Self::default(),
        }
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(s: &BreakerSettings) -> Self {
        Self {
            failure_threshold: s.failure_threshold,
            recovery_timeout: Duration::from_secs(s.recovery_timeout_secs),
            half_open_max_calls: s.half_open_max_calls,
            success_threshold: s.success_threshold,
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: State,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_failure: Option<Instant>,
    total_failures: u64,
    total_successes: u64,
    blocked_calls: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Snapshot for the metrics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub blocked_calls: u64,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.check_recovery(&mut inner);
        match inner.state {
            State::Closed => CircuitState::Closed,
            State::Open => CircuitState::Open,
            State::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Reserve a call slot. Must be paired with `record_success` or
    /// `record_failure` when the call completes.
    pub fn acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_recovery(&mut inner);

        match inner.state {
            State::Open => {
                inner.blocked_calls += 1;
                Err(BotError::CircuitOpen(self.name.clone()))
            }
            State::HalfOpen => {
                if inner.half_open_calls >= self.config.half_open_max_calls {
                    inner.blocked_calls += 1;
                    return Err(BotError::CircuitOpen(format!(
                        "{} (half-open probe limit)",
                        self.name
                    )));
                }
                inner.half_open_calls += 1;
                Ok(())
            }
            State::Closed => Ok(()),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        match inner.state {
            State::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = State::Closed;
                    inner.failure_count = 0;
                    tracing::info!(breaker = %self.name, "circuit closed after recovery");
                }
            }
            _ => inner.failure_count = 0,
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
                tracing::warn!(breaker = %self.name, "circuit reopened: probe failed");
            }
            State::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = State::Open;
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "circuit opened"
                );
            }
            _ => {}
        }
    }

    /// Run an async operation under this breaker.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.acquire()?;
        match op().await {
            Ok(v) => {
                self.record_success();
                Ok(v)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Force the circuit closed (manual recovery).
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = BreakerInner {
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            blocked_calls: inner.blocked_calls,
            ..BreakerInner::default()
        };
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        self.check_recovery(&mut inner);
        BreakerSnapshot {
            name: self.name.clone(),
            state: match inner.state {
                State::Closed => CircuitState::Closed,
                State::Open => CircuitState::Open,
                State::HalfOpen => CircuitState::HalfOpen,
            },
            failure_count: inner.failure_count,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            blocked_calls: inner.blocked_calls,
        }
    }

    fn check_recovery(&self, inner: &mut BreakerInner) {
        if inner.state == State::Open {
            if let Some(at) = inner.last_failure {
                if at.elapsed() >= self.config.recovery_timeout {
                    inner.state = State::HalfOpen;
                    inner.half_open_calls = 0;
                    inner.success_count = 0;
                    tracing::info!(breaker = %self.name, "circuit half-open");
                }
            }
        }
    }
}

/// Named breakers shared across clients.
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_with(name, BreakerConfig::for_service(name))
    }

    /// Like [`get`](Self::get) but with explicit settings, used when the
    /// configuration overrides the per-service preset. Settings only apply
    /// on first creation.
    pub fn get_with(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        let mut map = self.breakers.lock();
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.lock().values().map(|b| b.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(20),
            half_open_max_calls: 1,
            success_threshold: 1,
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new("t", fast_config());
        for _ in 0..2 {
            cb.acquire().unwrap();
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.acquire().unwrap();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.acquire(), Err(BotError::CircuitOpen(_))));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("t", fast_config());
        cb.acquire().unwrap();
        cb.record_failure();
        cb.acquire().unwrap();
        cb.record_failure();
        cb.acquire().unwrap();
        cb.record_success();
        // counter reset; two more failures should not open
        cb.acquire().unwrap();
        cb.record_failure();
        cb.acquire().unwrap();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let cb = CircuitBreaker::new("t", fast_config());
        for _ in 0..3 {
            cb.acquire().unwrap();
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // one probe allowed, second blocked
        cb.acquire().unwrap();
        assert!(cb.acquire().is_err());
    }

    #[test]
    fn test_probe_success_closes() {
        let cb = CircuitBreaker::new("t", fast_config());
        for _ in 0..3 {
            cb.acquire().unwrap();
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        cb.acquire().unwrap();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_probe_failure_reopens() {
        let cb = CircuitBreaker::new("t", fast_config());
        for _ in 0..3 {
            cb.acquire().unwrap();
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        cb.acquire().unwrap();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_call_wrapper() {
        let cb = CircuitBreaker::new("t", fast_config());
        let ok: Result<i32> = cb.call(|| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        let snap = cb.snapshot();
        assert_eq!(snap.total_successes, 1);
    }

    #[test]
    fn test_registry_presets() {
        let reg = BreakerRegistry::new();
        let poly = reg.get("polymarket");
        let again = reg.get("polymarket");
        assert!(Arc::ptr_eq(&poly, &again));
        assert_eq!(reg.snapshots().len(), 1);
    }

    #[test]
    fn test_forced_reset() {
        let cb = CircuitBreaker::new("t", fast_config());
        for _ in 0..3 {
            cb.acquire().unwrap();
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.acquire().is_ok());
    }
}
