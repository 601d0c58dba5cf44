//! API resilience: circuit breaking and bounded retries.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState};
pub use retry::{RetryPolicy, RetryStats};
