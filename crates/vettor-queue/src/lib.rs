//! Typed asynchronous job queue with priority dispatch and delayed retries.
//!
//! The queue is the concurrency substrate the rest of the engine is built
//! on: callers enqueue jobs by type, register one handler per type, and the
//! queue dispatches FIFO-with-priority, retrying failed handlers with a
//! configurable backoff before marking them terminally failed. Every state
//! transition is published on a broadcast channel.
//!
//! # Main types
//!
//! - [`JobQueue`] — The queue itself; one dispatcher task per job type.
//! - [`Job`] — A unit of queued work and its lifecycle state.
//! - [`JobOptions`] — Per-job attempt budget, priority, and backoff.
//! - [`QueueEvent`] — Broadcast notification of a job state transition.
//! - [`QueueMetrics`] — Counts, processing times, error rate, throughput.

/// Job record, options, and retry backoff.
pub mod job;
/// Queue implementation and dispatcher loop.
pub mod queue;

pub use job::{Job, JobOptions, JobStatus, RetryBackoff};
pub use queue::{JobQueue, QueueConfig, QueueEvent, QueueMetrics};
