use crate::job::{Job, JobOptions, JobStatus};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vettor_core::{VettorError, VettorResult};

/// Boxed handler invoked once per dispatched job attempt.
type JobHandler = Arc<dyn Fn(Job) -> BoxFuture<'static, VettorResult<serde_json::Value>> + Send + Sync>;

/// Tuning knobs for a [`JobQueue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Broadcast channel capacity for queue events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Dispatcher poll fallback in milliseconds (covers delayed retries).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How many recent processing durations to keep for metrics.
    #[serde(default = "default_processing_sample")]
    pub processing_sample: usize,
}

fn default_event_capacity() -> usize {
    256
}

fn default_poll_interval_ms() -> u64 {
    25
}

fn default_processing_sample() -> usize {
    100
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            processing_sample: default_processing_sample(),
        }
    }
}

/// Broadcast notification of a job state transition.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A job entered (or re-entered, for retries) the waiting state.
    Waiting {
        /// Job identifier.
        job_id: Uuid,
        /// Dispatch key.
        job_type: String,
    },
    /// A handler invocation started.
    Active {
        /// Job identifier.
        job_id: Uuid,
        /// Dispatch key.
        job_type: String,
        /// 1-based invocation number.
        attempt: u32,
    },
    /// The handler returned successfully; terminal.
    Completed {
        /// Job identifier.
        job_id: Uuid,
        /// Dispatch key.
        job_type: String,
        /// Value returned by the handler.
        result: serde_json::Value,
    },
    /// The attempt budget is exhausted; terminal.
    Failed {
        /// Job identifier.
        job_id: Uuid,
        /// Dispatch key.
        job_type: String,
        /// Message from the last attempt.
        error: String,
        /// Invocations made.
        attempts: u32,
    },
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Jobs waiting for dispatch.
    pub waiting: usize,
    /// Jobs with a handler in flight.
    pub active: usize,
    /// Jobs completed since queue creation.
    pub completed: u64,
    /// Jobs terminally failed since queue creation.
    pub failed: u64,
    /// Per-type count of jobs currently held by the queue.
    pub job_counts: HashMap<String, usize>,
    /// Recent handler durations in milliseconds, newest last.
    pub processing_times: Vec<u64>,
    /// failed / (completed + failed), 0.0 when nothing finished yet.
    pub error_rate: f64,
    /// Completions per minute since queue creation.
    pub throughput: f64,
}

struct QueueState {
    jobs: HashMap<Uuid, Job>,
    pending: HashMap<String, Vec<Uuid>>,
    processors: HashSet<String>,
    paused: bool,
    shutdown: bool,
    completed: u64,
    failed: u64,
    processing_times: VecDeque<u64>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            pending: HashMap::new(),
            processors: HashSet::new(),
            paused: false,
            shutdown: false,
            completed: 0,
            failed: 0,
            processing_times: VecDeque::new(),
        }
    }

    /// Pick the best eligible waiting job of a type: highest priority,
    /// then earliest enqueue time, skipping jobs still inside a retry delay.
    fn take_next(&mut self, job_type: &str, now: DateTime<Utc>) -> Option<Job> {
        let ids = self.pending.get(job_type)?;
        let mut best: Option<(usize, i32, DateTime<Utc>)> = None;
        for (idx, id) in ids.iter().enumerate() {
            let Some(job) = self.jobs.get(id) else {
                continue;
            };
            if job.not_before.is_some_and(|t| t > now) {
                continue;
            }
            let candidate = (idx, job.priority, job.created_at);
            best = match best {
                None => Some(candidate),
                Some((_, p, c)) if job.priority > p || (job.priority == p && job.created_at < c) => {
                    Some(candidate)
                }
                other => other,
            };
        }
        let (idx, _, _) = best?;
        let id = self.pending.get_mut(job_type)?.remove(idx);
        let job = self.jobs.get_mut(&id)?;
        job.status = JobStatus::Active;
        job.attempts += 1;
        job.not_before = None;
        Some(job.clone())
    }
}

/// Typed asynchronous job queue.
///
/// One dispatcher task per registered job type; at most one handler
/// invocation is in flight per type, while different types run
/// concurrently. Dispatch is FIFO within a priority, highest priority
/// first.
pub struct JobQueue {
    state: Arc<RwLock<QueueState>>,
    events: broadcast::Sender<QueueEvent>,
    wake: Arc<Notify>,
    config: QueueConfig,
    started_at: Instant,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    /// Creates a queue with default configuration.
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Creates a queue with the given configuration.
    pub fn with_config(config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(16));
        Self {
            state: Arc::new(RwLock::new(QueueState::new())),
            events,
            wake: Arc::new(Notify::new()),
            config,
            started_at: Instant::now(),
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Subscribes to job state-transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Enqueues a job and returns its record.
    pub async fn add(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        opts: JobOptions,
    ) -> VettorResult<Job> {
        let job = Job::new(job_type, payload, &opts);
        {
            let mut state = self.state.write().await;
            if state.shutdown {
                return Err(VettorError::Queue("queue is shut down".to_string()));
            }
            state
                .pending
                .entry(job.job_type.clone())
                .or_default()
                .push(job.id);
            state.jobs.insert(job.id, job.clone());
        }
        debug!(job_id = %job.id, job_type, priority = job.priority, "Job enqueued");
        let _ = self.events.send(QueueEvent::Waiting {
            job_id: job.id,
            job_type: job.job_type.clone(),
        });
        self.wake.notify_waiters();
        Ok(job)
    }

    /// Returns a snapshot of a job by id.
    pub async fn get_job(&self, id: Uuid) -> Option<Job> {
        self.state.read().await.jobs.get(&id).cloned()
    }

    /// Stops dispatching new jobs; in-flight handlers finish normally.
    pub async fn pause(&self) {
        self.state.write().await.paused = true;
        info!("Job queue paused");
    }

    /// Resumes dispatching.
    pub async fn resume(&self) {
        self.state.write().await.paused = false;
        info!("Job queue resumed");
        self.wake.notify_waiters();
    }

    /// Registers the handler for a job type and starts its dispatcher task.
    ///
    /// Fails if a handler for the type is already registered.
    pub async fn process<F, Fut>(&self, job_type: &str, handler: F) -> VettorResult<()>
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = VettorResult<serde_json::Value>> + Send + 'static,
    {
        {
            let mut state = self.state.write().await;
            if !state.processors.insert(job_type.to_string()) {
                return Err(VettorError::Queue(format!(
                    "handler already registered for job type '{job_type}'"
                )));
            }
        }
        let handler: JobHandler = Arc::new(move |job| Box::pin(handler(job)));
        let handle = tokio::spawn(dispatch_loop(
            Arc::clone(&self.state),
            self.events.clone(),
            Arc::clone(&self.wake),
            job_type.to_string(),
            handler,
            self.config.clone(),
        ));
        if let Ok(mut workers) = self.workers.lock() {
            workers.push(handle);
        }
        info!(job_type, "Job processor registered");
        Ok(())
    }

    /// Signals all dispatcher tasks to exit after their current job.
    pub async fn shutdown(&self) {
        self.state.write().await.shutdown = true;
        self.wake.notify_waiters();
    }

    /// Drops completed and failed jobs from the in-memory map.
    pub async fn evict_finished(&self) -> usize {
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| !job.is_finished());
        before - state.jobs.len()
    }

    /// Point-in-time queue statistics.
    pub async fn metrics(&self) -> QueueMetrics {
        let state = self.state.read().await;
        let mut waiting = 0;
        let mut active = 0;
        let mut job_counts: HashMap<String, usize> = HashMap::new();
        for job in state.jobs.values() {
            *job_counts.entry(job.job_type.clone()).or_insert(0) += 1;
            match job.status {
                JobStatus::Waiting => waiting += 1,
                JobStatus::Active => active += 1,
                _ => {}
            }
        }
        let finished = state.completed + state.failed;
        let error_rate = if finished == 0 {
            0.0
        } else {
            state.failed as f64 / finished as f64
        };
        let minutes = (self.started_at.elapsed().as_secs_f64() / 60.0).max(1.0 / 60.0);
        QueueMetrics {
            waiting,
            active,
            completed: state.completed,
            failed: state.failed,
            job_counts,
            processing_times: state.processing_times.iter().copied().collect(),
            error_rate,
            throughput: state.completed as f64 / minutes,
        }
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-type dispatcher: pulls eligible jobs, runs the handler, and applies
/// retry or terminal-failure transitions. Handler errors never escape the
/// loop.
async fn dispatch_loop(
    state: Arc<RwLock<QueueState>>,
    events: broadcast::Sender<QueueEvent>,
    wake: Arc<Notify>,
    job_type: String,
    handler: JobHandler,
    config: QueueConfig,
) {
    loop {
        let job = {
            let mut st = state.write().await;
            if st.shutdown {
                break;
            }
            if st.paused {
                None
            } else {
                st.take_next(&job_type, Utc::now())
            }
        };

        let job = match job {
            Some(job) => job,
            None => {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)) => {}
                }
                continue;
            }
        };

        let _ = events.send(QueueEvent::Active {
            job_id: job.id,
            job_type: job.job_type.clone(),
            attempt: job.attempts,
        });

        let started = Instant::now();
        let result = handler(job.clone()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                let mut st = state.write().await;
                if let Some(stored) = st.jobs.get_mut(&job.id) {
                    stored.status = JobStatus::Completed;
                    stored.result = Some(value.clone());
                }
                st.completed += 1;
                st.processing_times.push_back(elapsed_ms);
                while st.processing_times.len() > config.processing_sample {
                    st.processing_times.pop_front();
                }
                drop(st);
                debug!(job_id = %job.id, job_type = %job.job_type, elapsed_ms, "Job completed");
                let _ = events.send(QueueEvent::Completed {
                    job_id: job.id,
                    job_type: job.job_type.clone(),
                    result: value,
                });
            }
            Err(err) => {
                let message = err.to_string();
                enum Disposition {
                    Retry(u64),
                    Fail,
                    Gone,
                }
                let retrying = {
                    let mut st = state.write().await;
                    let disposition = match st.jobs.get_mut(&job.id) {
                        Some(stored) if stored.attempts < stored.max_attempts => {
                            let delay = stored.backoff.delay_for(stored.attempts);
                            stored.status = JobStatus::Waiting;
                            stored.not_before =
                                Some(Utc::now() + chrono::Duration::milliseconds(delay as i64));
                            stored.last_error = Some(message.clone());
                            Disposition::Retry(delay)
                        }
                        Some(stored) => {
                            stored.status = JobStatus::Failed;
                            stored.last_error = Some(message.clone());
                            Disposition::Fail
                        }
                        None => Disposition::Gone,
                    };
                    match disposition {
                        Disposition::Retry(delay) => {
                            st.pending
                                .entry(job.job_type.clone())
                                .or_default()
                                .push(job.id);
                            Some(delay)
                        }
                        Disposition::Fail => {
                            st.failed += 1;
                            None
                        }
                        Disposition::Gone => None,
                    }
                };

                match retrying {
                    Some(delay) => {
                        debug!(
                            job_id = %job.id,
                            job_type = %job.job_type,
                            attempt = job.attempts,
                            delay_ms = delay,
                            error = %message,
                            "Job attempt failed, retry scheduled"
                        );
                        let _ = events.send(QueueEvent::Waiting {
                            job_id: job.id,
                            job_type: job.job_type.clone(),
                        });
                        let wake = Arc::clone(&wake);
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                            wake.notify_waiters();
                        });
                    }
                    None => {
                        warn!(
                            job_id = %job.id,
                            job_type = %job.job_type,
                            attempts = job.attempts,
                            error = %message,
                            "Job failed terminally"
                        );
                        let _ = events.send(QueueEvent::Failed {
                            job_id: job.id,
                            job_type: job.job_type.clone(),
                            error: message,
                            attempts: job.attempts,
                        });
                    }
                }
            }
        }
    }
}
