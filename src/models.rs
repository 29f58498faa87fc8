//! Data models for bundlecheck.
//!
//! This module contains the structures exchanged between checks, agents and
//! the orchestration engine: outcome rules, verdicts, agent results and the
//! merged analysis report. Everything here serializes to camelCase JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Kind of a verdict, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictKind {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictKind::Pass => write!(f, "Pass"),
            VerdictKind::Warn => write!(f, "Warn"),
            VerdictKind::Fail => write!(f, "Fail"),
        }
    }
}

impl VerdictKind {
    /// Returns an emoji representation of the verdict kind.
    pub fn emoji(&self) -> &'static str {
        match self {
            VerdictKind::Pass => "✅",
            VerdictKind::Warn => "⚠️",
            VerdictKind::Fail => "❌",
        }
    }
}

/// Body of an outcome rule. An empty `when` makes the rule a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default)]
    pub when: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// One declared `(optional condition -> verdict kind)` pair.
///
/// Serialized externally tagged, the way check definitions write it:
/// `{ "fail": { "when": "used/total >= 90%", "message": "..." } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeRule {
    Fail(Outcome),
    Warn(Outcome),
    Pass(Outcome),
}

impl OutcomeRule {
    pub fn fail(when: impl Into<String>, message: impl Into<String>) -> Self {
        OutcomeRule::Fail(Outcome {
            when: when.into(),
            message: message.into(),
            uri: None,
        })
    }

    pub fn warn(when: impl Into<String>, message: impl Into<String>) -> Self {
        OutcomeRule::Warn(Outcome {
            when: when.into(),
            message: message.into(),
            uri: None,
        })
    }

    pub fn pass(when: impl Into<String>, message: impl Into<String>) -> Self {
        OutcomeRule::Pass(Outcome {
            when: when.into(),
            message: message.into(),
            uri: None,
        })
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        match &mut self {
            OutcomeRule::Fail(o) | OutcomeRule::Warn(o) | OutcomeRule::Pass(o) => {
                o.uri = Some(uri.into())
            }
        }
        self
    }

    pub fn kind(&self) -> VerdictKind {
        match self {
            OutcomeRule::Fail(_) => VerdictKind::Fail,
            OutcomeRule::Warn(_) => VerdictKind::Warn,
            OutcomeRule::Pass(_) => VerdictKind::Pass,
        }
    }

    pub fn outcome(&self) -> &Outcome {
        match self {
            OutcomeRule::Fail(o) | OutcomeRule::Warn(o) | OutcomeRule::Pass(o) => o,
        }
    }

    /// Whether the rule has no condition.
    pub fn is_default(&self) -> bool {
        self.outcome().when.trim().is_empty()
    }
}

/// Result of evaluating one check against one entity. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub kind: VerdictKind,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Name of the agent that produced the verdict, stamped by the engine.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent: String,
    /// Confidence in `[0, 1]`, when the producer declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<RemediationStep>,
}

impl Verdict {
    pub fn new(kind: VerdictKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            uri: None,
            agent: String::new(),
            confidence: None,
            category: None,
            remediation: None,
        }
    }

    pub fn pass(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(VerdictKind::Pass, title, message)
    }

    pub fn warn(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(VerdictKind::Warn, title, message)
    }

    pub fn fail(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(VerdictKind::Fail, title, message)
    }

    pub fn with_uri(mut self, uri: Option<String>) -> Self {
        self.uri = uri;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_remediation(mut self, step: RemediationStep) -> Self {
        self.remediation = Some(step);
        self
    }

    pub fn is_pass(&self) -> bool {
        self.kind == VerdictKind::Pass
    }

    pub fn is_warn(&self) -> bool {
        self.kind == VerdictKind::Warn
    }

    pub fn is_fail(&self) -> bool {
        self.kind == VerdictKind::Fail
    }
}

fn default_priority() -> u32 {
    3
}

/// A suggested corrective action. Priority 1 is the most urgent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationStep {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub automatable: bool,
}

impl RemediationStep {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            command: None,
            documentation: None,
            priority: default_priority(),
            category: None,
            automatable: false,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// A cross-check correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub title: String,
    pub description: String,
    /// Titles of the verdicts the insight relates.
    #[serde(default)]
    pub related: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Agent name, or `engine` for correlations the engine derives.
    #[serde(default)]
    pub source: String,
}

/// A single check that could not be evaluated by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFailure {
    pub check: String,
    pub error: String,
    /// Caused by missing or unreadable collected data rather than by the
    /// check definition.
    #[serde(default)]
    pub data_error: bool,
}

/// Output of one agent's analysis call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    #[serde(default)]
    pub verdicts: Vec<Verdict>,
    #[serde(default)]
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub errors: Vec<CheckFailure>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AgentResult {
    pub fn new(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts,
            ..Self::default()
        }
    }
}

/// Options recognized by [`crate::engine::Engine::analyze`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOptions {
    /// Explicit agent subset. Names that are not registered are recorded as
    /// failed agents.
    #[serde(default)]
    pub agents: Vec<String>,
    /// Soft subset, filtered against the registry; falls back to all agents.
    #[serde(default)]
    pub preferred_agents: Vec<String>,
    #[serde(default)]
    pub include_remediation: bool,
    #[serde(default)]
    pub generate_insights: bool,
    /// Verdicts declaring a lower confidence are dropped. `0.0` keeps all.
    #[serde(default)]
    pub confidence_threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_processing_time: Option<Duration>,
    /// Checks requested from every agent. Empty means all they know.
    #[serde(default)]
    pub checks: Vec<String>,
}

impl AnalysisOptions {
    pub fn with_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agents = agents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_preferred_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_processing_time(mut self, budget: Duration) -> Self {
        self.max_processing_time = Some(budget);
        self
    }
}

/// Overall health classification of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
}

impl fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallHealth::Healthy => write!(f, "HEALTHY"),
            OverallHealth::Degraded => write!(f, "DEGRADED"),
            OverallHealth::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Summary statistics of a merged report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_checks: usize,
    pub passed_checks: usize,
    pub warning_checks: usize,
    pub failed_checks: usize,
    pub error_count: usize,
    pub overall_health: OverallHealth,
    /// Mean confidence over verdicts that declare one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub top_issues: Vec<String>,
    pub agents_used: Vec<String>,
}

/// How an agent's part of an analysis call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
    Unavailable,
    NotRegistered,
}

impl AgentRunStatus {
    pub fn is_success(&self) -> bool {
        *self == AgentRunStatus::Succeeded
    }
}

impl fmt::Display for AgentRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AgentRunStatus::Succeeded => "succeeded",
            AgentRunStatus::Failed => "failed",
            AgentRunStatus::TimedOut => "timed out",
            AgentRunStatus::Cancelled => "cancelled",
            AgentRunStatus::Unavailable => "unavailable",
            AgentRunStatus::NotRegistered => "not registered",
        };
        f.write_str(text)
    }
}

/// Per-agent run metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRun {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    pub capabilities: Vec<String>,
    pub status: AgentRunStatus,
    pub duration_ms: u64,
    pub verdict_count: usize,
    pub error_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The agent returned an error.
    Agent,
    Timeout,
    Cancelled,
    Unavailable,
    NotRegistered,
    /// A check could not read its data.
    Data,
    /// A check definition is wrong.
    Definition,
}

/// A recovered error recorded in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisError {
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    pub error: String,
    pub category: ErrorCategory,
    pub timestamp: DateTime<Utc>,
    pub recoverable: bool,
}

/// Run metadata of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub engine_version: String,
    pub options: AnalysisOptions,
    pub agents: Vec<AgentRun>,
    /// Verdicts dropped by the confidence threshold.
    pub filtered_verdicts: usize,
}

/// The merged output of one analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    /// Verdicts in agent selection order.
    pub verdicts: Vec<Verdict>,
    pub summary: Summary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediation: Vec<RemediationStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<Insight>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<AnalysisError>,
    pub metadata: AnalysisMetadata,
}

impl AnalysisReport {
    /// Whether any verdict is at or above `kind`.
    pub fn has_at_least(&self, kind: VerdictKind) -> bool {
        self.verdicts.iter().any(|v| v.kind >= kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_check: DateTime<Utc>,
}

/// Result of an engine-wide health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub status: HealthStatus,
    pub agents: Vec<AgentHealth>,
    pub last_checked: DateTime<Utc>,
}
