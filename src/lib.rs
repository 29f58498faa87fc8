//! bundlecheck evaluates collected diagnostic bundles against declarative
//! checks.
//!
//! The core is a pure evaluation pipeline: typed [`condition`] values and
//! expressions, [`aggregate`] functions over filtered entity collections and
//! the [`outcome`] resolution policy that turns them into verdicts. The
//! [`engine`] fans analysis out to pluggable [`agent`]s and merges their
//! results into one [`models::AnalysisReport`].

pub mod agent;
pub mod aggregate;
pub mod analysis;
pub mod bundle;
pub mod checks;
pub mod cli;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod outcome;
pub mod report;
pub mod scanner;

pub use agent::Agent;
pub use bundle::{Bundle, BundleAccessor};
pub use engine::{AnalysisContext, CancelHandle, Engine};
pub use error::{AgentError, ConditionError, EngineError, RegistryError};
pub use models::{AnalysisOptions, AnalysisReport, Verdict, VerdictKind};
