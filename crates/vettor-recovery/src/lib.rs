//! Error classification, retry policy, circuit breaking, and compensation.
//!
//! Every agent or queue failure in the engine is routed through the
//! [`ErrorHandler`] before any retry decision is made: the error message is
//! classified against an ordered list of patterns (first match wins, with an
//! explicit unknown fallback), the per-agent circuit breaker is advanced,
//! compensation actions run best-effort, and statistics are updated. The
//! returned [`CategorizedError`] then drives `should_retry`/`retry_delay`.
//!
//! # Main types
//!
//! - [`ErrorHandler`] — The classification and recovery pipeline.
//! - [`ErrorPattern`] / [`ErrorMatcher`] — Ordered tagged-variant matchers.
//! - [`RetryPolicy`] — Exponential/linear backoff with optional jitter.
//! - [`CircuitBreakers`] — Per-key failure counters with an open threshold.
//! - [`CompensationAction`] — Best-effort remediation hooks.

/// Per-key circuit breakers.
pub mod circuit;
/// Best-effort compensation actions.
pub mod compensation;
/// The error handler pipeline and its context/statistics types.
pub mod handler;
/// Error categories, severities, and match patterns.
pub mod patterns;
/// Retry policies and backoff math.
pub mod policy;

pub use circuit::{BreakerSnapshot, CircuitBreakers};
pub use compensation::CompensationAction;
pub use handler::{
    CategorizedError, ErrorContext, ErrorHandler, ErrorStatistics, EscalationConfig,
    RecentError, RecoveryConfig, RecoveryEvent,
};
pub use patterns::{builtin_patterns, ErrorCategory, ErrorMatcher, ErrorPattern, ErrorSeverity};
pub use policy::{BackoffStrategy, RetryPolicy};
