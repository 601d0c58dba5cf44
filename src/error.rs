//! Error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Market not found: {0}")]
    MarketNotFound(String),

    #[error("Risk limit: {0}")]
    RiskLimit(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Invalid status transition: {0} -> {1}")]
    InvalidTransition(String, String),

    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Whether the retry policy may re-attempt the failed call.
    ///
    /// Transport-level failures are retryable; everything that reflects a
    /// decision (risk limits, open circuits, bad transitions) is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            BotError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            BotError::WebSocket(_) | BotError::Io(_) => true,
            BotError::MarketNotFound(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_limit_not_retryable() {
        let err = BotError::RiskLimit("max exposure".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_circuit_open_not_retryable() {
        let err = BotError::CircuitOpen("gamma".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_market_not_found_retryable() {
        // The slot market may simply not be listed yet.
        let err = BotError::MarketNotFound("btc-updown-15m-0".into());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_io_retryable() {
        let err = BotError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_transition_display() {
        let err = BotError::InvalidTransition("published".into(), "qa".into());
        assert_eq!(err.to_string(), "Invalid status transition: published -> qa");
    }
}
