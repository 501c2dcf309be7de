use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Point-in-time state of one breaker key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Failures since the last recorded success.
    pub consecutive_failures: u32,
    /// Whether the breaker is vetoing retries.
    pub is_open: bool,
    /// When the breaker opened, if it is open.
    pub opened_at: Option<DateTime<Utc>>,
}

/// Per-agent-key failure counters with an open threshold.
///
/// A key's counter increments on every handled error and resets on a
/// recorded success; reaching the threshold opens the breaker, which then
/// vetoes retries for that key unconditionally.
///
/// Known limitation: there is no time-based half-open probe — an open
/// breaker closes only when a success is explicitly recorded for its key.
pub struct CircuitBreakers {
    threshold: u32,
    states: Mutex<HashMap<String, BreakerSnapshot>>,
}

impl CircuitBreakers {
    /// Creates breakers that open after `threshold` consecutive failures.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// The configured open threshold.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Records a failure for a key.
    ///
    /// Returns the updated snapshot and whether this call is the one that
    /// opened the breaker.
    pub async fn record_failure(&self, key: &str) -> (BreakerSnapshot, bool) {
        let mut states = self.states.lock().await;
        let state = states.entry(key.to_string()).or_default();
        state.consecutive_failures += 1;
        let just_opened = !state.is_open && state.consecutive_failures >= self.threshold;
        if just_opened {
            state.is_open = true;
            state.opened_at = Some(Utc::now());
        }
        (state.clone(), just_opened)
    }

    /// Records a success, closing the key's breaker and zeroing its counter.
    pub async fn record_success(&self, key: &str) {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(key) {
            state.consecutive_failures = 0;
            state.is_open = false;
            state.opened_at = None;
        }
    }

    /// Whether the key's breaker is open.
    pub async fn is_open(&self, key: &str) -> bool {
        self.states
            .lock()
            .await
            .get(key)
            .is_some_and(|s| s.is_open)
    }

    /// Snapshot of every tracked key.
    pub async fn snapshot(&self) -> HashMap<String, BreakerSnapshot> {
        self.states.lock().await.clone()
    }

    /// Drops all tracked state.
    pub async fn reset(&self) {
        self.states.lock().await.clear();
    }
}
