use rand::Rng;
use serde::{Deserialize, Serialize};

/// Shape of the delay curve between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * 2^(attempt-1)`.
    Exponential,
    /// `base * attempt`.
    Linear,
}

/// Retry budget and backoff configuration for one error pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure.
    pub max_retries: u32,
    /// Delay curve.
    pub backoff: BackoffStrategy,
    /// First-attempt delay in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any computed delay.
    pub max_delay_ms: u64,
    /// Apply ±10% uniform noise to computed delays.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffStrategy::Exponential,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// An exponential policy with the default 30s cap and no jitter.
    pub fn exponential(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::Exponential,
            base_delay_ms,
            ..Self::default()
        }
    }

    /// A linear policy with the default 30s cap and no jitter.
    pub fn linear(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::Linear,
            base_delay_ms,
            ..Self::default()
        }
    }

    /// Sets the delay cap.
    pub fn with_max_delay(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Enables ±10% jitter.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay in milliseconds before the given 1-based attempt.
    ///
    /// Without jitter the result is exact: exponential doubles from the base
    /// (1000, 2000, 4000, ...), linear grows by the base (5000, 10000,
    /// 15000, ...), both clamped to `max_delay_ms`.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let attempt = attempt.max(1);
        let raw = match self.backoff {
            BackoffStrategy::Exponential => {
                let exp = (attempt - 1).min(32);
                self.base_delay_ms.saturating_mul(1u64 << exp)
            }
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(u64::from(attempt)),
        };
        let clamped = raw.min(self.max_delay_ms);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.9..=1.1);
            (clamped as f64 * factor) as u64
        } else {
            clamped
        }
    }
}
