//! Local agent running declarative checks.

use crate::agent::Agent;
use crate::bundle::{Bundle, BundleAccessor};
use crate::checks::{Check, CheckSpec};
use crate::engine::AnalysisContext;
use crate::error::{AgentError, CheckError};
use crate::models::{AgentResult, CheckFailure};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Name the local agent registers under.
pub const LOCAL_AGENT_NAME: &str = "local";

/// Confidence attached to verdicts of deterministic checks.
const RULE_CONFIDENCE: f64 = 1.0;

/// Runs a fixed set of [`CheckSpec`]s against the bundle in-process.
#[derive(Debug, Clone)]
pub struct RuleAgent {
    name: String,
    checks: Vec<CheckSpec>,
}

impl RuleAgent {
    /// Build an agent from validated check definitions. Any invalid
    /// definition rejects the whole set.
    pub fn new(checks: Vec<CheckSpec>) -> Result<Self, CheckError> {
        for check in &checks {
            check.validate()?;
        }
        Ok(Self {
            name: LOCAL_AGENT_NAME.to_string(),
            checks,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn checks(&self) -> &[CheckSpec] {
        &self.checks
    }

    /// Run the requested checks (all when `requested` is empty) in
    /// declaration order.
    pub fn run_checks(
        &self,
        ctx: &AnalysisContext,
        bundle: &dyn BundleAccessor,
        requested: &[String],
    ) -> Result<AgentResult, AgentError> {
        let start = Instant::now();
        let mut result = AgentResult::default();

        for name in requested {
            if !self.checks.iter().any(|c| c.name() == name) {
                result.errors.push(CheckFailure {
                    check: name.clone(),
                    error: format!("unknown check {}", name),
                    data_error: false,
                });
            }
        }

        let selected = self
            .checks
            .iter()
            .filter(|c| requested.is_empty() || requested.iter().any(|r| r == c.name()));

        let mut checks_run = 0usize;
        for check in selected {
            if ctx.is_cancelled() {
                return Err(AgentError::Other("analysis cancelled".to_string()));
            }
            checks_run += 1;
            match check.run(bundle) {
                Ok(verdicts) => {
                    debug!(check = check.name(), verdicts = verdicts.len(), "check evaluated");
                    result.verdicts.extend(
                        verdicts
                            .into_iter()
                            .map(|v| v.with_confidence(RULE_CONFIDENCE)),
                    );
                }
                Err(e) => {
                    warn!(check = check.name(), error = %e, "check failed");
                    result.errors.push(CheckFailure {
                        check: check.name().to_string(),
                        data_error: e.is_data_error(),
                        error: e.to_string(),
                    });
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
            .metadata
            .insert("checksRun".to_string(), serde_json::json!(checks_run));
        info!(
            agent = %self.name,
            checks = checks_run,
            verdicts = result.verdicts.len(),
            "rule agent finished"
        );
        Ok(result)
    }
}

#[async_trait]
impl Agent for RuleAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    /// `rules` plus every check category.
    fn capabilities(&self) -> Vec<String> {
        let categories: BTreeSet<&str> = self.checks.iter().filter_map(|c| c.category()).collect();
        std::iter::once("rules")
            .chain(categories)
            .map(str::to_string)
            .collect()
    }

    async fn health_check(&self, _ctx: &AnalysisContext) -> Result<(), AgentError> {
        Ok(())
    }

    async fn analyze(
        &self,
        ctx: &AnalysisContext,
        bundle: Arc<Bundle>,
        checks: &[String],
    ) -> Result<AgentResult, AgentError> {
        self.run_checks(ctx, bundle.as_ref(), checks)
    }
}
