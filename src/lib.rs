//! Webhook-driven paper trading server for Polymarket BTC up/down markets.
//!
//! ## Architecture
//!
//! ```text
//! Webhook (TradingView) → Gates (dedupe, confirm, confidence, kill switch,
//!                          entry window, market quality, risk) → Paper Engine
//!                                     ↑                              ↓
//!                         Market Data (WS book cache)          JSONL Ledger
//!                                     ↑
//!                  Resilience (circuit breaker, retry) around Gamma REST
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod market_data;
pub mod paper;
pub mod pipeline;
pub mod resilience;
pub mod risk;
pub mod server;
pub mod supervisor;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod types_tests;
