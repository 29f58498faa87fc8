//! Error types for bundlecheck.
//!
//! Errors are split along the lines operators care about: a broken check
//! definition ([`ConditionError`] definition variants), missing or unreadable
//! collected data (data variants and [`BundleError`]), misuse of the agent
//! registry ([`RegistryError`]) and failures of whole analysis runs
//! ([`EngineError`], [`AgentError`]).

use thiserror::Error;

/// Failure to parse a literal under a specific operand kind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("empty literal")]
    Empty,

    #[error("invalid integer {0:?}")]
    Integer(String),

    #[error("invalid quantity {0:?}")]
    Quantity(String),

    #[error("quantity {0:?} is not a whole, non-negative number of bytes")]
    FractionalBytes(String),

    #[error("invalid percentage {0:?}")]
    Percentage(String),

    #[error("invalid duration {0:?}")]
    Duration(String),

    #[error("invalid version {0:?}")]
    Version(String),

    #[error("invalid boolean {0:?}")]
    Bool(String),

    #[error("{value:?} is not a level of {order} (expected one of {levels:?})")]
    UnknownLevel {
        value: String,
        order: String,
        levels: Vec<String>,
    },
}

/// Errors raised while parsing or evaluating a conditional expression.
///
/// Definition errors mean the check itself is wrong and must never be read as
/// "no match". Data errors mean the collected input could not provide a
/// value; see [`ConditionError::is_data_error`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("empty condition")]
    Empty,

    #[error("malformed condition {condition:?}: {reason}")]
    Malformed { condition: String, reason: String },

    #[error("unknown operator {0:?}")]
    UnknownOperator(String),

    #[error("unknown subject {0:?}")]
    UnknownSubject(String),

    #[error("unknown aggregate function {0:?}")]
    UnknownFunction(String),

    #[error("condition has no subject and the check declares no default subject")]
    NoDefaultSubject,

    #[error("cannot parse {literal:?} as {kind}: {source}")]
    InvalidLiteral {
        literal: String,
        kind: String,
        #[source]
        source: ValueError,
    },

    #[error("operator {operator} is not supported for {kind} values")]
    UnsupportedOperator { operator: String, kind: String },

    #[error("cannot compare {left} with {right}")]
    KindMismatch { left: String, right: String },

    #[error("field {field:?} is unavailable: {reason}")]
    FieldUnavailable { field: String, reason: String },

    #[error("{function}({field}) has no value over an empty collection")]
    EmptyAggregate { function: String, field: String },
}

impl ConditionError {
    /// Whether this error comes from missing or unusable collected data
    /// rather than from a mistake in the check definition.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            ConditionError::FieldUnavailable { .. } | ConditionError::EmptyAggregate { .. }
        )
    }
}

/// Errors produced by bundle accessors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BundleError {
    #[error("file not found in bundle: {0}")]
    NotFound(String),

    #[error("invalid glob pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Failure of a single check invocation.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("check {check}: {source}")]
    Condition {
        check: String,
        #[source]
        source: ConditionError,
    },

    #[error("check {check}: {source}")]
    Bundle {
        check: String,
        #[source]
        source: BundleError,
    },

    #[error("check {check}: failed to decode {path}: {reason}")]
    Decode {
        check: String,
        path: String,
        reason: String,
    },

    #[error("check {check}: {reason}")]
    Definition { check: String, reason: String },
}

impl CheckError {
    /// Whether the failure is caused by the collected data rather than by the
    /// check definition.
    pub fn is_data_error(&self) -> bool {
        match self {
            CheckError::Condition { source, .. } => source.is_data_error(),
            CheckError::Bundle { .. } | CheckError::Decode { .. } => true,
            CheckError::Definition { .. } => false,
        }
    }
}

/// Errors from agent registration. Always fatal to the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("agent name cannot be empty")]
    EmptyName,

    #[error("agent {0} cannot be registered without an implementation")]
    MissingAgent(String),

    #[error("agent {0} already registered")]
    Duplicate(String),

    #[error("agent {0} is not registered")]
    NotRegistered(String),
}

/// Errors returned by an agent backend.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent {0} is not available")]
    Unavailable(String),

    #[error("request to {endpoint} failed: {reason}")]
    Http { endpoint: String, reason: String },

    #[error("failed to decode agent response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

/// Errors that abort a whole analysis call.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("bundle cannot be absent")]
    MissingBundle,

    #[error("no agents registered")]
    NoAgentsRegistered,

    #[error("no agents selected for analysis")]
    NoAgentsSelected,

    #[error("all {attempted} selected agents failed: {summary}")]
    AllAgentsFailed { attempted: usize, summary: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_messages() {
        let failed = EngineError::AllAgentsFailed {
            attempted: 2,
            summary: "a: boom; b: timed out".to_string(),
        };
        assert_eq!(
            failed.to_string(),
            "all 2 selected agents failed: a: boom; b: timed out"
        );
        assert_eq!(EngineError::MissingBundle.to_string(), "bundle cannot be absent");
    }

    #[test]
    fn test_data_error_classification() {
        let missing = ConditionError::FieldUnavailable {
            field: "used".to_string(),
            reason: "not collected".to_string(),
        };
        assert!(missing.is_data_error());
        assert!(!ConditionError::UnknownOperator("~=".to_string()).is_data_error());

        let check = CheckError::Condition {
            check: "disk".to_string(),
            source: missing,
        };
        assert!(check.is_data_error());

        let definition = CheckError::Definition {
            check: "disk".to_string(),
            reason: "no outcomes".to_string(),
        };
        assert!(!definition.is_data_error());
    }

    #[test]
    fn test_invalid_literal_message() {
        let err = ConditionError::InvalidLiteral {
            literal: "12Qi".to_string(),
            kind: "byte size".to_string(),
            source: ValueError::Quantity("12Qi".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "cannot parse \"12Qi\" as byte size: invalid quantity \"12Qi\""
        );
    }
}
