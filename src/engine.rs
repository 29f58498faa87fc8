//! Analysis orchestration.
//!
//! The [`Engine`] keeps a name-keyed registry of [`Agent`]s and fans an
//! analysis call out to a selected subset of them. Every agent runs in its own
//! task under one shared [`AnalysisContext`]; a failing, slow or cancelled
//! agent is recorded in the report and never aborts its siblings. The call
//! itself fails only when nothing could be selected or every selected agent
//! failed.

use crate::agent::Agent;
use crate::analysis;
use crate::bundle::Bundle;
use crate::error::{AgentError, EngineError, RegistryError};
use crate::models::{
    AgentHealth, AgentResult, AgentRun, AgentRunStatus, AnalysisError, AnalysisMetadata,
    AnalysisOptions, AnalysisReport, EngineHealth, ErrorCategory, HealthStatus, Insight, Verdict,
};
use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Version stamped into report metadata.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cancellation context shared by every agent of one call.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    cancel_rx: watch::Receiver<bool>,
}

/// Cancels the [`AnalysisContext`] it was created with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl AnalysisContext {
    /// A cancellable context and its handle.
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self { cancel_rx: rx },
            CancelHandle {
                cancel_tx: Arc::new(tx),
            },
        )
    }

    /// A context that is never cancelled.
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { cancel_rx: rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolves once the context is cancelled. Pends forever when the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for AnalysisContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }
}

#[derive(Default)]
struct Registry {
    agents: HashMap<String, Arc<dyn Agent>>,
    order: Vec<String>,
    default_agent: Option<String>,
}

impl Registry {
    /// Default agent first, then registration order.
    fn ordered_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.order.len());
        if let Some(default) = &self.default_agent {
            names.push(default.clone());
        }
        names.extend(
            self.order
                .iter()
                .filter(|name| Some(*name) != self.default_agent.as_ref())
                .cloned(),
        );
        names
    }
}

/// One selected agent. `agent` is `None` for explicitly requested names that
/// are not registered.
struct Selection {
    name: String,
    agent: Option<Arc<dyn Agent>>,
}

enum Launch {
    Skipped {
        name: String,
        agent: Option<Arc<dyn Agent>>,
        status: AgentRunStatus,
        reason: String,
    },
    Running {
        name: String,
        agent: Arc<dyn Agent>,
        handle: JoinHandle<(Result<AgentResult, AgentError>, Duration)>,
    },
}

enum Waited<T> {
    Finished(Result<T, tokio::task::JoinError>),
    Cancelled,
    TimedOut,
}

/// Waits for `handle` until it finishes, the context is cancelled, or the
/// deadline passes. Abandoned tasks are detached, not aborted.
async fn wait_for<T>(
    handle: JoinHandle<T>,
    ctx: &AnalysisContext,
    deadline: Option<tokio::time::Instant>,
) -> Waited<T> {
    let budget = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        joined = handle => Waited::Finished(joined),
        _ = ctx.cancelled() => Waited::Cancelled,
        _ = budget => Waited::TimedOut,
    }
}

/// Accumulates per-agent outcomes in selection order.
struct Merger<'a> {
    options: &'a AnalysisOptions,
    verdicts: Vec<Verdict>,
    insights: Vec<Insight>,
    errors: Vec<AnalysisError>,
    runs: Vec<AgentRun>,
    agents_used: Vec<String>,
    filtered: usize,
}

impl<'a> Merger<'a> {
    fn new(options: &'a AnalysisOptions) -> Self {
        Self {
            options,
            verdicts: Vec::new(),
            insights: Vec::new(),
            errors: Vec::new(),
            runs: Vec::new(),
            agents_used: Vec::new(),
            filtered: 0,
        }
    }

    fn succeeded(&mut self, name: String, agent: &dyn Agent, result: AgentResult, elapsed: Duration) {
        let threshold = self.options.confidence_threshold;
        let mut verdict_count = 0;
        for mut verdict in result.verdicts {
            if verdict.confidence.is_some_and(|c| c < threshold) {
                self.filtered += 1;
                continue;
            }
            verdict.agent = name.clone();
            self.verdicts.push(verdict);
            verdict_count += 1;
        }

        let error_count = result.errors.len();
        for failure in result.errors {
            warn!(agent = %name, check = %failure.check, error = %failure.error, "check failed");
            let category = if failure.data_error {
                ErrorCategory::Data
            } else {
                ErrorCategory::Definition
            };
            self.errors.push(AnalysisError {
                agent: name.clone(),
                check: Some(failure.check),
                error: failure.error,
                category,
                timestamp: Utc::now(),
                recoverable: failure.data_error,
            });
        }

        if self.options.generate_insights {
            for mut insight in result.insights {
                if insight.source.is_empty() {
                    insight.source = name.clone();
                }
                self.insights.push(insight);
            }
        }

        debug!(agent = %name, verdicts = verdict_count, "agent finished");
        self.runs.push(AgentRun {
            name: name.clone(),
            version: agent.version().to_string(),
            capabilities: agent.capabilities(),
            status: AgentRunStatus::Succeeded,
            duration_ms: elapsed.as_millis() as u64,
            verdict_count,
            error_count,
        });
        self.agents_used.push(name);
    }

    fn failed(
        &mut self,
        name: String,
        agent: Option<&dyn Agent>,
        status: AgentRunStatus,
        reason: String,
        elapsed: Duration,
    ) {
        warn!(agent = %name, status = %status, error = %reason, "agent did not complete");
        let category = match status {
            AgentRunStatus::TimedOut => ErrorCategory::Timeout,
            AgentRunStatus::Cancelled => ErrorCategory::Cancelled,
            AgentRunStatus::Unavailable => ErrorCategory::Unavailable,
            AgentRunStatus::NotRegistered => ErrorCategory::NotRegistered,
            AgentRunStatus::Failed | AgentRunStatus::Succeeded => ErrorCategory::Agent,
        };
        self.errors.push(AnalysisError {
            agent: name.clone(),
            check: None,
            error: reason,
            category,
            timestamp: Utc::now(),
            recoverable: matches!(
                status,
                AgentRunStatus::TimedOut | AgentRunStatus::Cancelled | AgentRunStatus::Unavailable
            ),
        });
        self.runs.push(AgentRun {
            name,
            version: agent.map(|a| a.version().to_string()).unwrap_or_default(),
            capabilities: agent.map(|a| a.capabilities()).unwrap_or_default(),
            status,
            duration_ms: elapsed.as_millis() as u64,
            verdict_count: 0,
            error_count: 1,
        });
    }

    fn failure_summary(&self) -> String {
        self.errors
            .iter()
            .filter(|e| e.check.is_none())
            .map(|e| format!("{}: {}", e.agent, e.error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Registry of analysis agents and the entry point for analysis calls.
#[derive(Default)]
pub struct Engine {
    registry: RwLock<Registry>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `agent` under `name`.
    pub fn register_agent(
        &self,
        name: &str,
        agent: Option<Arc<dyn Agent>>,
    ) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let agent = agent.ok_or_else(|| RegistryError::MissingAgent(name.to_string()))?;

        let mut registry = self.write();
        if registry.agents.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        registry.agents.insert(name.to_string(), agent);
        registry.order.push(name.to_string());
        info!(agent = name, "registered agent");
        Ok(())
    }

    /// Register `agent` under its own name.
    pub fn register(&self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        let name = agent.name().to_string();
        self.register_agent(&name, Some(agent))
    }

    pub fn unregister_agent(&self, name: &str) -> Result<(), RegistryError> {
        let mut registry = self.write();
        if registry.agents.remove(name).is_none() {
            return Err(RegistryError::NotRegistered(name.to_string()));
        }
        registry.order.retain(|n| n != name);
        if registry.default_agent.as_deref() == Some(name) {
            registry.default_agent = None;
        }
        info!(agent = name, "unregistered agent");
        Ok(())
    }

    pub fn set_default_agent(&self, name: &str) -> Result<(), RegistryError> {
        let mut registry = self.write();
        if !registry.agents.contains_key(name) {
            return Err(RegistryError::NotRegistered(name.to_string()));
        }
        registry.default_agent = Some(name.to_string());
        Ok(())
    }

    pub fn default_agent(&self) -> Option<String> {
        self.read().default_agent.clone()
    }

    pub fn get_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.read().agents.get(name).cloned()
    }

    /// Registered names, default agent first.
    pub fn list_agents(&self) -> Vec<String> {
        self.read().ordered_names()
    }

    /// Resolve the working agent set: explicit list, else preferred names
    /// that are registered, else every registered agent.
    fn select(&self, options: &AnalysisOptions) -> Result<Vec<Selection>, EngineError> {
        let registry = self.read();
        if registry.agents.is_empty() {
            return Err(EngineError::NoAgentsRegistered);
        }

        let names = if !options.agents.is_empty() {
            distinct(&options.agents)
        } else {
            let preferred: Vec<String> = distinct(&options.preferred_agents)
                .into_iter()
                .filter(|name| registry.agents.contains_key(name))
                .collect();
            if preferred.is_empty() {
                registry.ordered_names()
            } else {
                preferred
            }
        };

        if names.is_empty() {
            return Err(EngineError::NoAgentsSelected);
        }

        Ok(names
            .into_iter()
            .map(|name| {
                let agent = registry.agents.get(&name).cloned();
                Selection { name, agent }
            })
            .collect())
    }

    /// Run the selected agents over `bundle` and merge their results.
    #[instrument(skip_all)]
    pub async fn analyze(
        &self,
        ctx: &AnalysisContext,
        bundle: Option<Arc<Bundle>>,
        options: AnalysisOptions,
    ) -> Result<AnalysisReport, EngineError> {
        let bundle = bundle.ok_or(EngineError::MissingBundle)?;
        let started_at = Utc::now();
        let start = Instant::now();

        let selected = self.select(&options)?;
        info!(
            agents = ?selected.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "starting analysis"
        );

        let deadline = options
            .max_processing_time
            .map(|budget| tokio::time::Instant::now() + budget);
        let checks = Arc::new(options.checks.clone());

        let launched: Vec<Launch> = selected
            .into_iter()
            .map(|Selection { name, agent }| match agent {
                None => Launch::Skipped {
                    reason: format!("agent {} is not registered", name),
                    name,
                    agent: None,
                    status: AgentRunStatus::NotRegistered,
                },
                Some(agent) if !agent.is_available() => Launch::Skipped {
                    reason: AgentError::Unavailable(name.clone()).to_string(),
                    name,
                    agent: Some(agent),
                    status: AgentRunStatus::Unavailable,
                },
                Some(agent) => {
                    let task_agent = Arc::clone(&agent);
                    let ctx = ctx.clone();
                    let bundle = Arc::clone(&bundle);
                    let checks = Arc::clone(&checks);
                    let handle = tokio::spawn(async move {
                        let started = Instant::now();
                        let result = task_agent.analyze(&ctx, bundle, &checks).await;
                        (result, started.elapsed())
                    });
                    Launch::Running {
                        name,
                        agent,
                        handle,
                    }
                }
            })
            .collect();

        let mut merger = Merger::new(&options);
        for launch in launched {
            match launch {
                Launch::Skipped {
                    name,
                    agent,
                    status,
                    reason,
                } => merger.failed(name, agent.as_deref(), status, reason, Duration::ZERO),
                Launch::Running {
                    name,
                    agent,
                    handle,
                } => match wait_for(handle, ctx, deadline).await {
                    Waited::Finished(Ok((Ok(result), elapsed))) => {
                        merger.succeeded(name, agent.as_ref(), result, elapsed)
                    }
                    Waited::Finished(Ok((Err(e), elapsed))) => merger.failed(
                        name,
                        Some(agent.as_ref()),
                        AgentRunStatus::Failed,
                        e.to_string(),
                        elapsed,
                    ),
                    Waited::Finished(Err(e)) => merger.failed(
                        name,
                        Some(agent.as_ref()),
                        AgentRunStatus::Failed,
                        format!("agent task failed: {}", e),
                        start.elapsed(),
                    ),
                    Waited::Cancelled => merger.failed(
                        name,
                        Some(agent.as_ref()),
                        AgentRunStatus::Cancelled,
                        "analysis cancelled".to_string(),
                        start.elapsed(),
                    ),
                    Waited::TimedOut => merger.failed(
                        name,
                        Some(agent.as_ref()),
                        AgentRunStatus::TimedOut,
                        format!(
                            "exceeded processing budget of {:?}",
                            options.max_processing_time.unwrap_or_default()
                        ),
                        start.elapsed(),
                    ),
                },
            }
        }

        if merger.agents_used.is_empty() {
            return Err(EngineError::AllAgentsFailed {
                attempted: merger.runs.len(),
                summary: merger.failure_summary(),
            });
        }

        let Merger {
            verdicts,
            mut insights,
            errors,
            runs,
            agents_used,
            filtered,
            ..
        } = merger;

        let summary = analysis::build_summary(&verdicts, errors.len(), agents_used);
        let remediation = if options.include_remediation {
            analysis::collect_remediation(&verdicts)
        } else {
            Vec::new()
        };
        if options.generate_insights {
            insights.extend(analysis::correlate_by_category(&verdicts));
        }

        info!(
            verdicts = verdicts.len(),
            errors = errors.len(),
            health = %summary.overall_health,
            "analysis complete"
        );

        Ok(AnalysisReport {
            verdicts,
            summary,
            remediation,
            insights,
            errors,
            metadata: AnalysisMetadata {
                started_at,
                duration_ms: start.elapsed().as_millis() as u64,
                engine_version: ENGINE_VERSION.to_string(),
                options,
                agents: runs,
                filtered_verdicts: filtered,
            },
        })
    }

    /// Probe every registered agent concurrently.
    #[instrument(skip_all)]
    pub async fn health_check(&self, ctx: &AnalysisContext) -> EngineHealth {
        let agents: Vec<(String, Arc<dyn Agent>)> = {
            let registry = self.read();
            registry
                .ordered_names()
                .into_iter()
                .filter_map(|name| {
                    let agent = registry.agents.get(&name).cloned()?;
                    Some((name, agent))
                })
                .collect()
        };

        let probes = agents.into_iter().map(|(name, agent)| async move {
            let available = agent.is_available();
            let result = if available {
                tokio::select! {
                    biased;
                    result = agent.health_check(ctx) => result,
                    _ = ctx.cancelled() => Err(AgentError::Other("health check cancelled".to_string())),
                }
            } else {
                Err(AgentError::Unavailable(name.clone()))
            };

            let (status, error) = match result {
                Ok(()) => (HealthStatus::Healthy, None),
                Err(e) => {
                    warn!(agent = %name, error = %e, "health check failed");
                    (HealthStatus::Unhealthy, Some(e.to_string()))
                }
            };
            AgentHealth {
                name,
                status,
                available,
                error,
                last_check: Utc::now(),
            }
        });

        let agents = join_all(probes).await;
        let failed = agents
            .iter()
            .filter(|a| a.status != HealthStatus::Healthy)
            .count();
        let status = if failed == 0 {
            HealthStatus::Healthy
        } else if failed == agents.len() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        EngineHealth {
            status,
            agents,
            last_checked: Utc::now(),
        }
    }
}

/// Non-empty names in first-seen order.
fn distinct(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty() && seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}
