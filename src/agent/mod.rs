//! Pluggable analysis backends.
//!
//! Any type implementing [`Agent`] can be registered with the engine. Two
//! backends ship with the crate: [`RuleAgent`] runs declarative checks
//! locally, and [`RemoteAgent`] delegates to an HTTP analysis service.

pub mod remote;
pub mod rules;

pub use remote::{RemoteAgent, RemoteConfig};
pub use rules::RuleAgent;

use crate::bundle::Bundle;
use crate::engine::AnalysisContext;
use crate::error::AgentError;
use crate::models::AgentResult;
use async_trait::async_trait;
use std::sync::Arc;

/// An analysis backend.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        ""
    }

    fn capabilities(&self) -> Vec<String>;

    /// Cheap local readiness test. Unavailable agents are skipped by the
    /// engine without being called.
    fn is_available(&self) -> bool {
        true
    }

    async fn health_check(&self, ctx: &AnalysisContext) -> Result<(), AgentError>;

    /// Analyze `bundle`, restricted to `checks` when non-empty.
    async fn analyze(
        &self,
        ctx: &AnalysisContext,
        bundle: Arc<Bundle>,
        checks: &[String],
    ) -> Result<AgentResult, AgentError>;
}
