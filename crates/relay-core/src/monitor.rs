//! Error Monitoring
//!
//! Turns typed [`AgentError`]s into [`MonitoredError`]s, the only shape a
//! caller ever sees. Classification is by error kind:
//!
//! ```text
//!   AgentError ──▶ ErrorCategory ──▶ (message template, severity, retryable, recovery)
//!                        │
//!                        └──▶ rolling counter ──▶ RateAlert (detection only)
//! ```
//!
//! Every monitored error is forwarded to a [`MonitoringSink`], which may
//! hand back a tracking id.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Error classification, independent of the component that failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Memory,
    Input,
    Tool,
    #[serde(rename = "LLM")]
    Llm,
    Context,
    Governance,
    System,
    Network,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [Self; 9] = [
        Self::Memory,
        Self::Input,
        Self::Tool,
        Self::Llm,
        Self::Context,
        Self::Governance,
        Self::System,
        Self::Network,
        Self::Unknown,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "Memory",
            Self::Input => "Input",
            Self::Tool => "Tool",
            Self::Llm => "LLM",
            Self::Context => "Context",
            Self::Governance => "Governance",
            Self::System => "System",
            Self::Network => "Network",
            Self::Unknown => "Unknown",
        }
    }

    pub const fn severity(self) -> Severity {
        match self {
            Self::Input | Self::Context | Self::Governance => Severity::Warning,
            Self::Memory | Self::Tool | Self::Llm | Self::Network | Self::Unknown => {
                Severity::Error
            }
            Self::System => Severity::Critical,
        }
    }

    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Memory | Self::Llm | Self::Context | Self::System | Self::Network
        )
    }

    pub const fn recovery_action(self) -> RecoveryAction {
        match self {
            Self::Input | Self::Tool | Self::Governance => RecoveryAction::RephraseInput,
            Self::Memory => RecoveryAction::Retry,
            Self::Llm | Self::Network => RecoveryAction::RetryWithBackoff,
            Self::Context => RecoveryAction::StartNewSession,
            Self::System | Self::Unknown => RecoveryAction::ContactSupport,
        }
    }

    /// Fixed text shown to the end user
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::Memory => "We could not load or save this conversation. Please try again.",
            Self::Input => "Your request could not be processed. Please check your input and try again.",
            Self::Tool => "One of the assistant's tools failed while handling your request.",
            Self::Llm => "The AI service is temporarily unavailable. Please try again in a moment.",
            Self::Context => {
                "This conversation is too long for the model. Please shorten your message or start a new session."
            }
            Self::Governance => "This request was blocked by the content policy.",
            Self::System => "An internal error occurred. Please try again later.",
            Self::Network => "A network problem prevented the request from completing.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Suggested next step for the caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    RetryWithBackoff,
    RephraseInput,
    StartNewSession,
    ContactSupport,
}

/// A classified failure, ready to hand back to the caller
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoredError {
    pub user_facing_message: String,

    /// Never returned to end users; sink only
    #[serde(skip_serializing)]
    pub internal_details: String,

    pub category: ErrorCategory,
    pub severity: Severity,
    pub is_retryable: bool,
    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_action: Option<RecoveryAction>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<String>,
}

impl fmt::Display for MonitoredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.user_facing_message)
    }
}

impl std::error::Error for MonitoredError {}

/// Key/value context attached to a reported error
#[derive(Clone, Debug, Default, Serialize)]
pub struct ErrorContext(BTreeMap<String, serde_json::Value>);

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.0
    }
}

/// Raised when a category's error count within the window reaches the threshold
#[derive(Clone, Debug)]
pub struct RateAlert {
    pub category: ErrorCategory,
    pub count: usize,
    pub window: Duration,
}

/// Destination for monitored errors (log pipeline, APM, test recorder)
pub trait MonitoringSink: Send + Sync {
    /// Record an error. The returned string, if any, becomes the tracking id.
    fn capture(&self, error: &MonitoredError, context: &ErrorContext) -> Option<String>;

    /// Error-rate threshold crossed
    fn rate_exceeded(&self, _alert: &RateAlert) {}
}

/// Default sink: structured `tracing` events
#[derive(Debug, Default)]
pub struct TracingSink;

impl MonitoringSink for TracingSink {
    fn capture(&self, error: &MonitoredError, context: &ErrorContext) -> Option<String> {
        let context = serde_json::to_string(context).unwrap_or_default();
        match error.severity {
            Severity::Critical | Severity::Error => tracing::error!(
                category = %error.category,
                retryable = error.is_retryable,
                details = %error.internal_details,
                %context,
                "Request failed"
            ),
            Severity::Warning | Severity::Info => tracing::warn!(
                category = %error.category,
                retryable = error.is_retryable,
                details = %error.internal_details,
                %context,
                "Request rejected"
            ),
        }
        None
    }

    fn rate_exceeded(&self, alert: &RateAlert) {
        tracing::warn!(
            category = %alert.category,
            count = alert.count,
            window_secs = alert.window.as_secs(),
            "Error rate threshold crossed"
        );
    }
}

/// Rolling-window alert settings
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Errors per category within `window` that trigger an alert
    pub threshold: usize,
    pub window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Classifies and reports failures from every component
pub struct ErrorHandler {
    sink: Arc<dyn MonitoringSink>,
    config: MonitorConfig,
    recent: Mutex<HashMap<ErrorCategory, VecDeque<Instant>>>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink), MonitorConfig::default())
    }
}

impl ErrorHandler {
    pub fn new(sink: Arc<dyn MonitoringSink>, config: MonitorConfig) -> Self {
        Self {
            sink,
            config,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Classify a typed error
    pub fn handle(&self, error: &AgentError, context: &ErrorContext) -> MonitoredError {
        self.report(error.category(), error.to_string(), context)
    }

    /// Classify anything that is not an [`AgentError`] (panic payloads, foreign errors)
    pub fn handle_unknown(&self, description: &dyn fmt::Display, context: &ErrorContext) -> MonitoredError {
        self.report(ErrorCategory::Unknown, description.to_string(), context)
    }

    /// Errors recorded for `category` within the current window
    pub fn recent_count(&self, category: ErrorCategory) -> usize {
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        let window = self.config.window;
        recent.get_mut(&category).map_or(0, |hits| {
            prune(hits, Instant::now(), window);
            hits.len()
        })
    }

    fn report(&self, category: ErrorCategory, details: String, context: &ErrorContext) -> MonitoredError {
        let mut monitored = MonitoredError {
            user_facing_message: category.user_message().into(),
            internal_details: details,
            category,
            severity: category.severity(),
            is_retryable: category.is_retryable(),
            timestamp: Utc::now(),
            recovery_action: Some(category.recovery_action()),
            tracking_id: None,
        };

        if let Some(alert) = self.record(category) {
            self.sink.rate_exceeded(&alert);
        }

        let tracking_id = self
            .sink
            .capture(&monitored, context)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        monitored.tracking_id = Some(tracking_id);
        monitored
    }

    /// Count one error; returns an alert when the threshold is reached
    fn record(&self, category: ErrorCategory) -> Option<RateAlert> {
        let now = Instant::now();
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        let hits = recent.entry(category).or_default();
        prune(hits, now, self.config.window);
        hits.push_back(now);

        (hits.len() == self.config.threshold).then(|| RateAlert {
            category,
            count: hits.len(),
            window: self.config.window,
        })
    }
}

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while hits
        .front()
        .is_some_and(|t| now.saturating_duration_since(*t) >= window)
    {
        hits.pop_front();
    }
}
