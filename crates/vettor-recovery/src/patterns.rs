use crate::policy::RetryPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Failure taxonomy every handled error is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Operation exceeded its time budget.
    Timeout,
    /// Connectivity failure to an upstream.
    Network,
    /// Credential or permission failure.
    Authentication,
    /// Upstream throttling.
    RateLimit,
    /// Memory/quota/disk exhaustion.
    Resource,
    /// Malformed or rejected input.
    Validation,
    /// An upstream agent or service the work depends on failed.
    Dependency,
    /// Domain-rule violation inside an agent.
    BusinessLogic,
    /// Engine-internal fault.
    System,
    /// Nothing matched; the explicit fallback.
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::RateLimit => "rate-limit",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::BusinessLogic => "business-logic",
            ErrorCategory::System => "system",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Severity ladder; feeds the escalation level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Cosmetic or caller-correctable.
    Low,
    /// Degrades one evaluation.
    Medium,
    /// Degrades a workflow or agent.
    High,
    /// Threatens the process.
    Critical,
}

impl ErrorSeverity {
    /// Numeric base for escalation levels (LOW=1 .. CRITICAL=4).
    pub fn weight(self) -> u32 {
        match self {
            ErrorSeverity::Low => 1,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 3,
            ErrorSeverity::Critical => 4,
        }
    }
}

/// How a pattern decides whether an error message belongs to it.
///
/// Tagged variants instead of opaque predicate functions keep the matcher
/// list inspectable and the evaluation order explicit.
#[derive(Debug, Clone)]
pub enum ErrorMatcher {
    /// Case-insensitive substring match.
    MessageContains(String),
    /// Case-insensitive match on any of several substrings.
    AnyContains(Vec<String>),
    /// Regular-expression match on the raw message.
    MessageRegex(Regex),
}

impl ErrorMatcher {
    /// A case-insensitive substring matcher.
    pub fn contains(needle: impl Into<String>) -> Self {
        ErrorMatcher::MessageContains(needle.into().to_lowercase())
    }

    /// A matcher over several case-insensitive substrings.
    pub fn any(needles: &[&str]) -> Self {
        ErrorMatcher::AnyContains(needles.iter().map(|n| n.to_lowercase()).collect())
    }

    /// A regex matcher; fails on an invalid pattern.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(ErrorMatcher::MessageRegex(Regex::new(pattern)?))
    }

    /// Whether the message belongs to this matcher.
    pub fn matches(&self, message: &str) -> bool {
        match self {
            ErrorMatcher::MessageContains(needle) => message.to_lowercase().contains(needle),
            ErrorMatcher::AnyContains(needles) => {
                let lower = message.to_lowercase();
                needles.iter().any(|n| lower.contains(n))
            }
            ErrorMatcher::MessageRegex(re) => re.is_match(message),
        }
    }
}

/// One entry in the ordered classification list.
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    /// Stable name, used for removal and event payloads.
    pub name: String,
    /// Match predicate.
    pub matcher: ErrorMatcher,
    /// Category assigned on match.
    pub category: ErrorCategory,
    /// Severity assigned on match.
    pub severity: ErrorSeverity,
    /// Whether errors in this pattern may be retried at all.
    pub retryable: bool,
    /// Retry budget and backoff; `None` for non-retryable patterns.
    pub retry_policy: Option<RetryPolicy>,
    /// Names of compensation actions to run on match.
    pub compensation_actions: Vec<String>,
}

impl ErrorPattern {
    /// A non-retryable pattern with no compensation.
    pub fn new(
        name: impl Into<String>,
        matcher: ErrorMatcher,
        category: ErrorCategory,
        severity: ErrorSeverity,
    ) -> Self {
        Self {
            name: name.into(),
            matcher,
            category,
            severity,
            retryable: false,
            retry_policy: None,
            compensation_actions: Vec::new(),
        }
    }

    /// Marks the pattern retryable under the given policy.
    pub fn retryable(mut self, policy: RetryPolicy) -> Self {
        self.retryable = true;
        self.retry_policy = Some(policy);
        self
    }

    /// Attaches compensation action names.
    pub fn with_compensation(mut self, actions: &[&str]) -> Self {
        self.compensation_actions = actions.iter().map(|a| (*a).to_string()).collect();
        self
    }
}

/// The built-in classification table, in evaluation order.
///
/// First match wins; anything that falls through is handled by
/// [`unknown_pattern`].
pub fn builtin_patterns() -> Vec<ErrorPattern> {
    vec![
        ErrorPattern::new(
            "timeout",
            ErrorMatcher::any(&["timeout", "timed out", "deadline exceeded"]),
            ErrorCategory::Timeout,
            ErrorSeverity::Medium,
        )
        .retryable(RetryPolicy::exponential(3, 1_000)),
        ErrorPattern::new(
            "network",
            ErrorMatcher::any(&[
                "network",
                "connection refused",
                "connection reset",
                "unreachable",
                "dns",
                "broken pipe",
            ]),
            ErrorCategory::Network,
            ErrorSeverity::High,
        )
        .retryable(RetryPolicy::exponential(5, 1_000))
        .with_compensation(&["activate-fallback"]),
        ErrorPattern::new(
            "authentication",
            ErrorMatcher::any(&[
                "unauthorized",
                "authentication",
                "invalid api key",
                "forbidden",
                "401",
                "403",
            ]),
            ErrorCategory::Authentication,
            ErrorSeverity::High,
        )
        .with_compensation(&["refresh-credentials"]),
        ErrorPattern::new(
            "rate-limit",
            ErrorMatcher::any(&["rate limit", "too many requests", "429"]),
            ErrorCategory::RateLimit,
            ErrorSeverity::Medium,
        )
        .retryable(RetryPolicy::exponential(10, 1_000).with_max_delay(60_000)),
        ErrorPattern::new(
            "resource",
            ErrorMatcher::any(&[
                "out of memory",
                "resource exhausted",
                "quota exceeded",
                "no space left",
            ]),
            ErrorCategory::Resource,
            ErrorSeverity::Critical,
        )
        .with_compensation(&["release-resources"]),
        ErrorPattern::new(
            "validation",
            ErrorMatcher::any(&["validation", "invalid input", "missing field", "schema"]),
            ErrorCategory::Validation,
            ErrorSeverity::Low,
        ),
        ErrorPattern::new(
            "dependency",
            ErrorMatcher::any(&["dependency", "upstream", "prerequisite"]),
            ErrorCategory::Dependency,
            ErrorSeverity::High,
        )
        .retryable(RetryPolicy::linear(3, 5_000)),
    ]
}

/// The explicit fallback applied when nothing in the list matches.
pub fn unknown_pattern() -> ErrorPattern {
    ErrorPattern::new(
        "unknown",
        ErrorMatcher::contains(""),
        ErrorCategory::Unknown,
        ErrorSeverity::Medium,
    )
    .retryable(RetryPolicy::exponential(2, 1_000))
}
