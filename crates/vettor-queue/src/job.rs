use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Enqueued, not yet picked up (or re-queued awaiting a retry slot).
    Waiting,
    /// A handler invocation is in flight.
    Active,
    /// The handler returned successfully.
    Completed,
    /// The attempt budget is exhausted.
    Failed,
}

/// Delay strategy applied between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    /// The same delay before every retry.
    Fixed {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// `base_ms * 2^(attempt-1)`, capped at `max_ms`.
    Exponential {
        /// First-retry delay in milliseconds.
        base_ms: u64,
        /// Upper bound in milliseconds.
        max_ms: u64,
    },
}

impl RetryBackoff {
    /// Delay before the retry following the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> u64 {
        match *self {
            RetryBackoff::Fixed { delay_ms } => delay_ms,
            RetryBackoff::Exponential { base_ms, max_ms } => {
                let exp = attempt.saturating_sub(1).min(32);
                base_ms.saturating_mul(1u64 << exp).min(max_ms)
            }
        }
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        RetryBackoff::Fixed { delay_ms: 1000 }
    }
}

/// Per-job dispatch options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    /// Total handler invocations allowed (1 = no retries).
    pub attempts: u32,
    /// Higher priority dispatches first among eligible jobs of a type.
    pub priority: i32,
    /// Delay strategy between retries.
    pub backoff: RetryBackoff,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 1,
            priority: 0,
            backoff: RetryBackoff::default(),
        }
    }
}

impl JobOptions {
    /// Sets the attempt budget.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Sets the dispatch priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the retry backoff.
    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// A unit of queued work.
///
/// The job id is stable across retries; `attempts` counts handler
/// invocations made so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, preserved across retries.
    pub id: Uuid,
    /// Dispatch key; one handler per type.
    pub job_type: String,
    /// Opaque payload handed to the handler.
    pub payload: serde_json::Value,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Handler invocations made so far.
    pub attempts: u32,
    /// Total invocations allowed.
    pub max_attempts: u32,
    /// Dispatch priority.
    pub priority: i32,
    /// Enqueue time; FIFO tiebreaker within a priority.
    pub created_at: DateTime<Utc>,
    /// Earliest time the next attempt may dispatch (set while a retry
    /// delay is pending).
    pub not_before: Option<DateTime<Utc>>,
    /// Retry backoff configured at enqueue time.
    pub backoff: RetryBackoff,
    /// Message from the most recent failed attempt.
    pub last_error: Option<String>,
    /// Handler return value, set once the job completes.
    pub result: Option<serde_json::Value>,
}

impl Job {
    /// Creates a waiting job from a payload and options.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value, opts: &JobOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Waiting,
            attempts: 0,
            max_attempts: opts.attempts.max(1),
            priority: opts.priority,
            created_at: Utc::now(),
            not_before: None,
            backoff: opts.backoff,
            last_error: None,
            result: None,
        }
    }

    /// True once the job has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}
