//! Request Governor: every upstream call passes through here.
//!
//! Combines a token bucket (admission), a circuit breaker (protection) and a
//! bounded retry policy. One instance is built at process start and shared
//! by reference with every consumer.

pub mod breaker;
pub mod bucket;
pub mod governor;
pub mod retry;

pub use breaker::{Admission, CircuitBreaker, CircuitState};
pub use bucket::TokenBucket;
pub use governor::{Governor, GovernorSnapshot, UpstreamError};
pub use retry::RetryPolicy;
