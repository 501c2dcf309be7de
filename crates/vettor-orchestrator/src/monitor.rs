use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vettor_agents::AgentRegistry;
use vettor_core::{AgentType, HealthStatus};
use vettor_recovery::ErrorHandler;

/// Health-monitor tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between health-check passes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// New handled errors per pass that trigger an error-burst alert.
    #[serde(default = "default_max_new_errors")]
    pub max_new_errors: u64,
    /// Raise an alert for every open circuit breaker.
    #[serde(default = "default_alert_on_open_breaker")]
    pub alert_on_open_breaker: bool,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_max_new_errors() -> u64 {
    10
}

fn default_alert_on_open_breaker() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_new_errors: default_max_new_errors(),
            alert_on_open_breaker: default_alert_on_open_breaker(),
        }
    }
}

/// What a raised alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// An agent reported itself unhealthy.
    UnhealthyAgent,
    /// A circuit breaker is open.
    CircuitBreakerOpen,
    /// More errors were handled this pass than the configured budget.
    ErrorBurst,
}

/// One alert raised by a monitoring pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAlert {
    /// What the alert is about.
    pub kind: AlertKind,
    /// Human-readable description.
    pub message: String,
    /// The agent involved, when attributable.
    pub agent_type: Option<AgentType>,
    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
}

/// Monitor notifications.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A threshold was breached.
    AlertTriggered {
        /// The raised alert.
        alert: HealthAlert,
    },
}

/// Periodically health-checks registered agents and raises alerts from
/// registry and error-handler statistics.
pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    recovery: Arc<ErrorHandler>,
    config: MonitorConfig,
    events: broadcast::Sender<MonitorEvent>,
    last_error_total: Mutex<u64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Wires a monitor over the shared registry and error handler.
    pub fn new(
        registry: Arc<AgentRegistry>,
        recovery: Arc<ErrorHandler>,
        config: MonitorConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            registry,
            recovery,
            config,
            events,
            last_error_total: Mutex::new(0),
            handle: Mutex::new(None),
        })
    }

    /// Subscribes to monitor alerts.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Starts the periodic monitoring loop; a second call replaces nothing
    /// and is a no-op while the loop is running.
    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }
        let monitor = Arc::clone(self);
        let interval_secs = self.config.interval_secs.max(1);
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.check_once().await;
            }
        }));
        info!(interval_secs, "Health monitor started");
    }

    /// Stops the monitoring loop.
    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            info!("Health monitor stopped");
        }
    }

    /// Runs one monitoring pass and returns the alerts it raised.
    pub async fn check_once(&self) -> Vec<HealthAlert> {
        let mut alerts: Vec<HealthAlert> = Vec::new();

        let health = self.registry.perform_health_check().await;
        for (agent_type, report) in &health {
            if report.status == HealthStatus::Unhealthy {
                alerts.push(HealthAlert {
                    kind: AlertKind::UnhealthyAgent,
                    message: format!("agent {agent_type} reported unhealthy"),
                    agent_type: Some(*agent_type),
                    raised_at: Utc::now(),
                });
            }
        }

        let stats = self.recovery.statistics().await;
        if self.config.alert_on_open_breaker {
            for (key, breaker) in &stats.circuit_breakers {
                if breaker.is_open {
                    alerts.push(HealthAlert {
                        kind: AlertKind::CircuitBreakerOpen,
                        message: format!(
                            "circuit breaker open for {key} ({} consecutive failures)",
                            breaker.consecutive_failures
                        ),
                        agent_type: key.parse().ok(),
                        raised_at: Utc::now(),
                    });
                }
            }
        }

        {
            let mut last = self.last_error_total.lock().await;
            let new_errors = stats.total_errors.saturating_sub(*last);
            if new_errors > self.config.max_new_errors {
                alerts.push(HealthAlert {
                    kind: AlertKind::ErrorBurst,
                    message: format!(
                        "{new_errors} errors handled since the last pass (budget {})",
                        self.config.max_new_errors
                    ),
                    agent_type: None,
                    raised_at: Utc::now(),
                });
            }
            *last = stats.total_errors;
        }

        for alert in &alerts {
            warn!(kind = ?alert.kind, message = %alert.message, "Alert triggered");
            let _ = self.events.send(MonitorEvent::AlertTriggered {
                alert: alert.clone(),
            });
        }
        alerts
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use vettor_agents::{Agent, Capability};
    use vettor_core::{
        AgentContext, AgentHealth, AgentRequest, AgentResponse, VettorError, VettorResult,
    };
    use vettor_recovery::ErrorContext;

    struct FlakyHealthAgent {
        healthy: bool,
    }

    #[async_trait]
    impl Agent for FlakyHealthAgent {
        fn agent_type(&self) -> AgentType {
            AgentType::Competition
        }

        fn capabilities(&self) -> Capability {
            Capability::new("competition", "1.0.0")
        }

        async fn health_check(&self) -> AgentHealth {
            if self.healthy {
                AgentHealth::healthy()
            } else {
                AgentHealth::unhealthy()
            }
        }

        async fn execute(
            &self,
            _request: &AgentRequest,
            _ctx: &AgentContext,
        ) -> VettorResult<AgentResponse> {
            Ok(AgentResponse {
                agent_type: AgentType::Competition,
                score: 1.0,
                insights: Vec::new(),
                confidence: 1.0,
                metadata: HashMap::new(),
                raw_data: serde_json::Value::Null,
            })
        }
    }

    #[tokio::test]
    async fn test_unhealthy_agent_raises_alert() {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register_agent(Arc::new(FlakyHealthAgent { healthy: false }))
            .await
            .unwrap();
        let recovery = Arc::new(ErrorHandler::new());
        let monitor = HealthMonitor::new(registry, recovery, MonitorConfig::default());

        let mut rx = monitor.subscribe();
        let alerts = monitor.check_once().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::UnhealthyAgent);
        assert_eq!(alerts[0].agent_type, Some(AgentType::Competition));

        match rx.try_recv().unwrap() {
            MonitorEvent::AlertTriggered { alert } => {
                assert_eq!(alert.kind, AlertKind::UnhealthyAgent);
            }
        }
    }

    #[tokio::test]
    async fn test_open_breaker_raises_alert() {
        let registry = Arc::new(AgentRegistry::new());
        let recovery = Arc::new(ErrorHandler::new());
        let ctx = ErrorContext::new(AgentType::Pricing);
        for _ in 0..5 {
            recovery
                .handle_error(&VettorError::Agent("connection refused".to_string()), &ctx)
                .await;
        }

        let monitor = HealthMonitor::new(registry, recovery, MonitorConfig::default());
        let alerts = monitor.check_once().await;
        let breaker_alert = alerts
            .iter()
            .find(|a| a.kind == AlertKind::CircuitBreakerOpen)
            .unwrap();
        assert!(breaker_alert.message.contains("pricing"));
        assert_eq!(breaker_alert.agent_type, Some(AgentType::Pricing));
    }

    #[tokio::test]
    async fn test_error_burst_alert_uses_delta() {
        let registry = Arc::new(AgentRegistry::new());
        let recovery = Arc::new(ErrorHandler::new());
        let config = MonitorConfig {
            max_new_errors: 2,
            alert_on_open_breaker: false,
            ..MonitorConfig::default()
        };
        let monitor = HealthMonitor::new(registry, Arc::clone(&recovery), config);

        // Three fresh errors exceed the budget of two.
        let ctx = ErrorContext::new(AgentType::MarketSizing);
        for _ in 0..3 {
            recovery
                .handle_error(&VettorError::Agent("some mystery".to_string()), &ctx)
                .await;
        }
        let alerts = monitor.check_once().await;
        assert!(alerts.iter().any(|a| a.kind == AlertKind::ErrorBurst));

        // No new errors since the last pass: no burst alert.
        let alerts = monitor.check_once().await;
        assert!(alerts.iter().all(|a| a.kind != AlertKind::ErrorBurst));
    }
}
