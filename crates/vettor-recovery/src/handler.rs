use crate::circuit::{BreakerSnapshot, CircuitBreakers};
use crate::compensation::CompensationAction;
use crate::patterns::{
    builtin_patterns, unknown_pattern, ErrorCategory, ErrorPattern, ErrorSeverity,
};
use crate::policy::RetryPolicy;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, warn};
use uuid::Uuid;
use vettor_core::{AgentType, VettorError};

/// Caller-supplied context for one handled error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// The agent the failure is attributed to.
    pub agent_type: AgentType,
    /// Optional operation name, folded into the breaker key when present.
    pub operation: Option<String>,
    /// When the failure happened.
    pub timestamp: DateTime<Utc>,
    /// Correlation id threaded through logs and events.
    pub correlation_id: Option<Uuid>,
    /// User on whose behalf the failing work ran.
    pub user_id: Option<String>,
}

impl ErrorContext {
    /// Context for an agent failure happening now.
    pub fn new(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            operation: None,
            timestamp: Utc::now(),
            correlation_id: None,
            user_id: None,
        }
    }

    /// Attaches an operation name.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Attaches a correlation id.
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// The circuit-breaker key for this context: the agent type, suffixed
    /// with the operation when one is set.
    pub fn breaker_key(&self) -> String {
        match &self.operation {
            Some(op) => format!("{}:{op}", self.agent_type),
            None => self.agent_type.to_string(),
        }
    }
}

/// The classification returned for every handled error.
///
/// Ephemeral: recomputed per error. The escalation level additionally
/// reflects how often the same agent/category signature failed recently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizedError {
    /// Name of the pattern that matched (or `unknown`).
    pub pattern: String,
    /// Assigned category.
    pub category: ErrorCategory,
    /// Assigned severity.
    pub severity: ErrorSeverity,
    /// Whether retrying is allowed at all.
    pub retryable: bool,
    /// Retry budget and backoff, when retryable.
    pub retry_policy: Option<RetryPolicy>,
    /// Severity weight plus the repeat boost.
    pub escalation_level: u32,
    /// Compensation action names that were triggered.
    pub compensation_actions: Vec<String>,
}

/// Escalation tuning: how long repeats count and how far they can boost.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Repeats inside this window raise the escalation level.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Upper bound on the boost added to the severity weight.
    #[serde(default = "default_max_boost")]
    pub max_boost: u32,
}

fn default_window_secs() -> u64 {
    300
}

fn default_max_boost() -> u32 {
    3
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_boost: default_max_boost(),
        }
    }
}

/// Error-handler tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Consecutive failures that open a circuit breaker.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    /// Escalation window and boost cap.
    #[serde(default)]
    pub escalation: EscalationConfig,
    /// Size of the recent-errors ring buffer.
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_recent_capacity() -> usize {
    100
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            breaker_threshold: default_breaker_threshold(),
            escalation: EscalationConfig::default(),
            recent_capacity: default_recent_capacity(),
        }
    }
}

/// Recovery-pipeline notifications.
#[derive(Debug, Clone)]
pub enum RecoveryEvent {
    /// An error finished classification.
    ErrorHandled {
        /// Assigned category.
        category: ErrorCategory,
        /// Assigned severity.
        severity: ErrorSeverity,
        /// Whether retrying is allowed.
        retryable: bool,
        /// The agent the failure is attributed to.
        agent_type: AgentType,
    },
    /// A breaker key crossed the failure threshold.
    CircuitBreakerOpened {
        /// The breaker key.
        key: String,
        /// Failures recorded when it opened.
        failure_count: u32,
    },
    /// A compensation action ran successfully.
    CompensationActionSucceeded {
        /// Action name.
        action: String,
        /// Pattern that triggered it.
        pattern: String,
    },
    /// A compensation action returned an error.
    CompensationActionFailed {
        /// Action name.
        action: String,
        /// Pattern that triggered it.
        pattern: String,
        /// The action's error message.
        error: String,
    },
    /// A pattern referenced an action that is not registered.
    CompensationActionError {
        /// Action name.
        action: String,
        /// Pattern that referenced it.
        pattern: String,
        /// Description of the lookup failure.
        error: String,
    },
}

/// One entry in the bounded recent-errors buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentError {
    /// The raw error message.
    pub message: String,
    /// Assigned category.
    pub category: ErrorCategory,
    /// Assigned severity.
    pub severity: ErrorSeverity,
    /// The agent the failure is attributed to.
    pub agent_type: AgentType,
    /// When the failure happened.
    pub timestamp: DateTime<Utc>,
}

/// Running counters exposed by [`ErrorHandler::statistics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorStatistics {
    /// Errors handled since creation or the last `clear_history`.
    pub total_errors: u64,
    /// Count per category.
    pub by_category: HashMap<ErrorCategory, u64>,
    /// Count per severity.
    pub by_severity: HashMap<ErrorSeverity, u64>,
    /// Current breaker state per key.
    pub circuit_breakers: HashMap<String, BreakerSnapshot>,
    /// Most recent errors, oldest first.
    pub recent_errors: Vec<RecentError>,
}

struct HistoryState {
    total: u64,
    by_category: HashMap<ErrorCategory, u64>,
    by_severity: HashMap<ErrorSeverity, u64>,
    per_signature: HashMap<String, VecDeque<DateTime<Utc>>>,
    recent: VecDeque<RecentError>,
}

impl HistoryState {
    fn new() -> Self {
        Self {
            total: 0,
            by_category: HashMap::new(),
            by_severity: HashMap::new(),
            per_signature: HashMap::new(),
            recent: VecDeque::new(),
        }
    }
}

/// Classification and recovery pipeline for all engine failures.
///
/// `handle_error` never fails: unmatched errors fall back to the unknown
/// pattern with a limited retry budget. One handler instance is shared
/// across all workflows by constructor injection.
pub struct ErrorHandler {
    patterns: RwLock<Vec<ErrorPattern>>,
    fallback: ErrorPattern,
    breakers: CircuitBreakers,
    actions: RwLock<HashMap<String, Arc<dyn CompensationAction>>>,
    history: Mutex<HistoryState>,
    config: RecoveryConfig,
    events: broadcast::Sender<RecoveryEvent>,
}

impl ErrorHandler {
    /// Creates a handler with the built-in pattern table and defaults.
    pub fn new() -> Self {
        Self::with_config(RecoveryConfig::default())
    }

    /// Creates a handler with the built-in pattern table and custom tuning.
    pub fn with_config(config: RecoveryConfig) -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            patterns: RwLock::new(builtin_patterns()),
            fallback: unknown_pattern(),
            breakers: CircuitBreakers::new(config.breaker_threshold),
            actions: RwLock::new(HashMap::new()),
            history: Mutex::new(HistoryState::new()),
            config,
            events,
        }
    }

    /// Subscribes to recovery events.
    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.events.subscribe()
    }

    /// Appends a pattern; it is evaluated after all existing ones.
    pub async fn add_error_pattern(&self, pattern: ErrorPattern) {
        self.patterns.write().await.push(pattern);
    }

    /// Removes a pattern by name.
    pub async fn remove_error_pattern(&self, name: &str) -> bool {
        let mut patterns = self.patterns.write().await;
        let before = patterns.len();
        patterns.retain(|p| p.name != name);
        patterns.len() != before
    }

    /// Registers a compensation action patterns can reference by name.
    pub async fn add_compensation_action(&self, action: Arc<dyn CompensationAction>) {
        self.actions
            .write()
            .await
            .insert(action.name().to_string(), action);
    }

    /// Classifies a failure, advances the circuit breaker, runs
    /// compensation, and updates statistics.
    ///
    /// Infallible by design: every failure yields a classification.
    pub async fn handle_error(
        &self,
        err: &VettorError,
        ctx: &ErrorContext,
    ) -> CategorizedError {
        let message = err.to_string();

        let pattern = {
            let patterns = self.patterns.read().await;
            patterns
                .iter()
                .find(|p| p.matcher.matches(&message))
                .cloned()
                .unwrap_or_else(|| self.fallback.clone())
        };

        let key = ctx.breaker_key();
        let (breaker, just_opened) = self.breakers.record_failure(&key).await;
        if just_opened {
            warn!(
                key = %key,
                failures = breaker.consecutive_failures,
                "Circuit breaker opened"
            );
            let _ = self.events.send(RecoveryEvent::CircuitBreakerOpened {
                key: key.clone(),
                failure_count: breaker.consecutive_failures,
            });
        }

        let escalation_level = {
            let mut history = self.history.lock().await;
            let signature = format!("{}:{}", ctx.agent_type, pattern.category);
            let window = Duration::seconds(self.config.escalation.window_secs as i64);
            let cutoff = ctx.timestamp - window;
            let occurrences = history.per_signature.entry(signature).or_default();
            while occurrences.front().is_some_and(|t| *t < cutoff) {
                occurrences.pop_front();
            }
            let boost = (occurrences.len() as u32).min(self.config.escalation.max_boost);
            occurrences.push_back(ctx.timestamp);

            history.total += 1;
            *history.by_category.entry(pattern.category).or_insert(0) += 1;
            *history.by_severity.entry(pattern.severity).or_insert(0) += 1;
            history.recent.push_back(RecentError {
                message: message.clone(),
                category: pattern.category,
                severity: pattern.severity,
                agent_type: ctx.agent_type,
                timestamp: ctx.timestamp,
            });
            while history.recent.len() > self.config.recent_capacity {
                history.recent.pop_front();
            }

            pattern.severity.weight() + boost
        };

        self.run_compensation(&pattern, ctx, &message).await;

        error!(
            agent = %ctx.agent_type,
            category = %pattern.category,
            severity = ?pattern.severity,
            retryable = pattern.retryable,
            escalation = escalation_level,
            error = %message,
            "Error handled"
        );
        let _ = self.events.send(RecoveryEvent::ErrorHandled {
            category: pattern.category,
            severity: pattern.severity,
            retryable: pattern.retryable,
            agent_type: ctx.agent_type,
        });

        CategorizedError {
            pattern: pattern.name,
            category: pattern.category,
            severity: pattern.severity,
            retryable: pattern.retryable,
            retry_policy: pattern.retry_policy,
            escalation_level,
            compensation_actions: pattern.compensation_actions,
        }
    }

    /// Runs every compensation action the pattern names, best-effort and in
    /// ascending priority order.
    async fn run_compensation(
        &self,
        pattern: &ErrorPattern,
        ctx: &ErrorContext,
        message: &str,
    ) {
        if pattern.compensation_actions.is_empty() {
            return;
        }
        let mut resolved: Vec<Arc<dyn CompensationAction>> = Vec::new();
        {
            let actions = self.actions.read().await;
            for name in &pattern.compensation_actions {
                match actions.get(name) {
                    Some(action) => resolved.push(Arc::clone(action)),
                    None => {
                        debug!(action = %name, pattern = %pattern.name, "Compensation action not registered");
                        let _ = self.events.send(RecoveryEvent::CompensationActionError {
                            action: name.clone(),
                            pattern: pattern.name.clone(),
                            error: "action not registered".to_string(),
                        });
                    }
                }
            }
        }
        resolved.sort_by_key(|a| a.priority());

        for action in resolved {
            match action.execute(ctx, message).await {
                Ok(()) => {
                    debug!(action = %action.name(), pattern = %pattern.name, "Compensation action succeeded");
                    let _ = self.events.send(RecoveryEvent::CompensationActionSucceeded {
                        action: action.name().to_string(),
                        pattern: pattern.name.clone(),
                    });
                }
                Err(e) => {
                    warn!(
                        action = %action.name(),
                        pattern = %pattern.name,
                        error = %e,
                        "Compensation action failed"
                    );
                    let _ = self.events.send(RecoveryEvent::CompensationActionFailed {
                        action: action.name().to_string(),
                        pattern: pattern.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Whether the given 1-based attempt may be retried.
    ///
    /// False once the attempt number exceeds the policy's budget, false for
    /// non-retryable classifications, and false unconditionally while the
    /// context's breaker is open.
    pub async fn should_retry(
        &self,
        categorized: &CategorizedError,
        ctx: &ErrorContext,
        attempt: u32,
    ) -> bool {
        if !categorized.retryable {
            return false;
        }
        if self.breakers.is_open(&ctx.breaker_key()).await {
            return false;
        }
        match &categorized.retry_policy {
            Some(policy) => attempt <= policy.max_retries,
            None => false,
        }
    }

    /// Backoff delay in milliseconds before the given 1-based attempt.
    pub fn retry_delay(&self, categorized: &CategorizedError, attempt: u32) -> u64 {
        categorized
            .retry_policy
            .as_ref()
            .map_or(0, |policy| policy.delay_ms(attempt))
    }

    /// Records a success for the context's breaker key, closing the breaker
    /// and zeroing its failure counter.
    pub async fn record_success(&self, ctx: &ErrorContext) {
        self.breakers.record_success(&ctx.breaker_key()).await;
    }

    /// Whether the breaker for a key is open.
    pub async fn is_circuit_breaker_open(&self, key: &str) -> bool {
        self.breakers.is_open(key).await
    }

    /// Running counters, breaker snapshots, and the recent-errors buffer.
    pub async fn statistics(&self) -> ErrorStatistics {
        let history = self.history.lock().await;
        ErrorStatistics {
            total_errors: history.total,
            by_category: history.by_category.clone(),
            by_severity: history.by_severity.clone(),
            circuit_breakers: self.breakers.snapshot().await,
            recent_errors: history.recent.iter().cloned().collect(),
        }
    }

    /// Resets every counter, the recent buffer, and all breaker state.
    pub async fn clear_history(&self) {
        *self.history.lock().await = HistoryState::new();
        self.breakers.reset().await;
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}
