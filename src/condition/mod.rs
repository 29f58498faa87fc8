//! Conditional expression evaluator.
//!
//! A condition compares one subject against one or more literals:
//!
//! ```text
//! SUBJECT OPERATOR VALUE[,VALUE...]     memoryCapacity >= 8Gi
//! OPERATOR VALUE                        < 2          (default subject)
//! VALUE                                 HEALTH_OK    (default subject, ==)
//! ```
//!
//! A subject is a field name, a ratio `field/field`, or an aggregate call
//! `fn(field)`. Fields are resolved through a caller-supplied
//! [`FieldAccessor`] and every literal is parsed under the resolved field's
//! [`OperandKind`]. Anything that does not fit this shape is an error, never
//! a silent "no match".

mod value;

pub use value::{
    parse_bool, parse_byte_size, parse_duration, parse_integer, parse_percentage, EnumOrder,
    EnumValue, OperandKind, Quantity, Value, Version,
};

use crate::aggregate::AggregateFn;
use crate::error::ConditionError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

static FUNCTION_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+)\(\s*([^()]*?)\s*\)$").expect("function call pattern"));

static FIELD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][\w.\-]*$").expect("field name pattern"));

const OPERATOR_CHARS: &[char] = &['=', '!', '<', '>'];

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Operator {
    pub fn parse(token: &str) -> Result<Self, ConditionError> {
        match token {
            "=" | "==" | "===" => Ok(Operator::Eq),
            "!=" | "!==" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            ">" => Ok(Operator::Gt),
            "<=" => Ok(Operator::Le),
            ">=" => Ok(Operator::Ge),
            other => Err(ConditionError::UnknownOperator(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
        }
    }

    pub fn is_ordered(&self) -> bool {
        !matches!(self, Operator::Eq | Operator::Ne)
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
        }
    }

    fn looks_like(token: &str) -> bool {
        !token.is_empty() && token.chars().all(|c| OPERATOR_CHARS.contains(&c))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The left-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// Whatever the accessor declares as its default subject.
    Default,
    Field(String),
    Ratio {
        numerator: String,
        denominator: String,
    },
    Aggregate {
        function: AggregateFn,
        field: Option<String>,
    },
}

impl Subject {
    pub fn parse(token: &str) -> Result<Self, ConditionError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(Subject::Default);
        }

        if let Some(captures) = FUNCTION_CALL.captures(token) {
            let name = &captures[1];
            let function = AggregateFn::parse(name)
                .ok_or_else(|| ConditionError::UnknownFunction(name.to_string()))?;
            let field = Some(captures[2].to_string()).filter(|f| !f.is_empty());
            if let Some(field) = &field {
                check_field_name(token, field)?;
            } else if function.needs_field() {
                return Err(ConditionError::Malformed {
                    condition: token.to_string(),
                    reason: format!("{}() needs a field", function),
                });
            }
            return Ok(Subject::Aggregate { function, field });
        }

        if let Some((numerator, denominator)) = token.split_once('/') {
            check_field_name(token, numerator)?;
            check_field_name(token, denominator)?;
            return Ok(Subject::Ratio {
                numerator: numerator.to_string(),
                denominator: denominator.to_string(),
            });
        }

        check_field_name(token, token)?;
        Ok(Subject::Field(token.to_string()))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Default => write!(f, "<default>"),
            Subject::Field(name) => write!(f, "{}", name),
            Subject::Ratio {
                numerator,
                denominator,
            } => write!(f, "{}/{}", numerator, denominator),
            Subject::Aggregate { function, field } => {
                write!(f, "{}({})", function, field.as_deref().unwrap_or(""))
            }
        }
    }
}

fn check_field_name(condition: &str, field: &str) -> Result<(), ConditionError> {
    if FIELD_NAME.is_match(field) {
        Ok(())
    } else {
        Err(ConditionError::Malformed {
            condition: condition.to_string(),
            reason: format!("{:?} is not a valid field name", field),
        })
    }
}

/// Read-only lookup from a check's parsed data into typed values.
pub trait FieldAccessor {
    /// Resolve a named field. Unknown names are [`ConditionError::UnknownSubject`];
    /// known fields without collected data are [`ConditionError::FieldUnavailable`].
    fn resolve(&self, field: &str) -> Result<Value, ConditionError>;

    /// Subject used by conditions that name none (`< 2`, `HEALTH_OK`).
    fn default_subject(&self) -> Option<&str> {
        None
    }

    /// Evaluate an aggregate function. Plain accessors have none.
    fn aggregate(&self, function: AggregateFn, field: Option<&str>) -> Result<Value, ConditionError> {
        let _ = field;
        Err(ConditionError::UnknownSubject(format!("{}()", function)))
    }
}

/// A pre-resolved operand is its own accessor: its default subject is `value`.
impl FieldAccessor for Value {
    fn resolve(&self, field: &str) -> Result<Value, ConditionError> {
        if field == "value" {
            Ok(self.clone())
        } else {
            Err(ConditionError::UnknownSubject(field.to_string()))
        }
    }

    fn default_subject(&self) -> Option<&str> {
        Some("value")
    }
}

/// A map of named field values, the accessor most checks build.
#[derive(Debug, Clone, Default)]
pub struct Fields {
    values: BTreeMap<String, Result<Value, String>>,
    default_subject: Option<String>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    pub fn with_default_subject(mut self, name: impl Into<String>) -> Self {
        self.default_subject = Some(name.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), Ok(value));
    }

    /// Declare a field the check knows about but could not read.
    pub fn mark_unavailable(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.values.insert(name.into(), Err(reason.into()));
    }

    /// Available values, for rendering message templates.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values
            .iter()
            .filter_map(|(name, value)| value.as_ref().ok().map(|v| (name.as_str(), v)))
    }
}

impl FieldAccessor for Fields {
    fn resolve(&self, field: &str) -> Result<Value, ConditionError> {
        match self.values.get(field) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(reason)) => Err(ConditionError::FieldUnavailable {
                field: field.to_string(),
                reason: reason.clone(),
            }),
            None => Err(ConditionError::UnknownSubject(field.to_string())),
        }
    }

    fn default_subject(&self) -> Option<&str> {
        self.default_subject.as_deref()
    }
}

/// A parsed condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    subject: Subject,
    operator: Operator,
    literals: Vec<String>,
}

impl Condition {
    pub fn parse(text: &str) -> Result<Self, ConditionError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let malformed = |reason: &str| ConditionError::Malformed {
            condition: text.trim().to_string(),
            reason: reason.to_string(),
        };

        let (subject, operator, rest) = match tokens.as_slice() {
            [] => return Err(ConditionError::Empty),
            [only] if Operator::looks_like(only) => {
                Operator::parse(only)?;
                return Err(malformed("missing value"));
            }
            [only] if only.contains(OPERATOR_CHARS) => {
                return Err(malformed("operator must be separated by spaces"));
            }
            [_] => (Subject::Default, Operator::Eq, &tokens[..1]),
            [first, ..] if Operator::looks_like(first) => {
                (Subject::Default, Operator::parse(first)?, &tokens[1..])
            }
            [_, second] if !Operator::looks_like(second) => {
                return Err(malformed("expected SUBJECT OPERATOR VALUE"));
            }
            [_, second] => {
                Operator::parse(second)?;
                return Err(malformed("missing value"));
            }
            [first, second, ..] => {
                if !Operator::looks_like(second) {
                    return Err(malformed("expected SUBJECT OPERATOR VALUE"));
                }
                (Subject::parse(first)?, Operator::parse(second)?, &tokens[2..])
            }
        };

        let joined = rest.join(" ");
        let literals: Vec<String> = joined.split(',').map(|l| l.trim().to_string()).collect();
        if literals.iter().any(|l| l.is_empty()) {
            return Err(malformed("empty value in list"));
        }

        Ok(Self {
            subject,
            operator,
            literals,
        })
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn literals(&self) -> &[String] {
        &self.literals
    }

    /// Evaluate against an accessor. A value list matches when any literal
    /// matches; with `!=` it matches when none is equal.
    pub fn evaluate(&self, accessor: &dyn FieldAccessor) -> Result<bool, ConditionError> {
        let actual = resolve_subject(&self.subject, accessor)?;
        let kind = actual.kind();
        if self.operator.is_ordered() && !kind.is_ordered() {
            return Err(ConditionError::UnsupportedOperator {
                operator: self.operator.to_string(),
                kind: kind.to_string(),
            });
        }

        let expected = self
            .literals
            .iter()
            .map(|literal| {
                kind.parse(literal)
                    .map_err(|source| ConditionError::InvalidLiteral {
                        literal: literal.clone(),
                        kind: kind.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if self.operator == Operator::Ne {
            for value in &expected {
                if matches(Operator::Eq, &actual, value)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }

        for value in &expected {
            if matches(self.operator, &actual, value)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.operator, self.literals.join(","))
    }
}

/// Parse and evaluate a condition in one step.
pub fn evaluate(condition: &str, accessor: &dyn FieldAccessor) -> Result<bool, ConditionError> {
    Condition::parse(condition)?.evaluate(accessor)
}

fn resolve_subject(subject: &Subject, accessor: &dyn FieldAccessor) -> Result<Value, ConditionError> {
    match subject {
        Subject::Default => {
            let name = accessor
                .default_subject()
                .ok_or(ConditionError::NoDefaultSubject)?;
            match Subject::parse(name)? {
                Subject::Default => Err(ConditionError::NoDefaultSubject),
                resolved => resolve_subject(&resolved, accessor),
            }
        }
        Subject::Field(name) => accessor.resolve(name),
        Subject::Aggregate { function, field } => accessor.aggregate(*function, field.as_deref()),
        Subject::Ratio {
            numerator,
            denominator,
        } => {
            let top = accessor.resolve(numerator)?;
            let bottom = accessor.resolve(denominator)?;
            let (Some(top_value), Some(bottom_value)) = (as_number(&top), as_number(&bottom)) else {
                return Err(ConditionError::KindMismatch {
                    left: top.kind().to_string(),
                    right: bottom.kind().to_string(),
                });
            };
            if top.kind() != bottom.kind()
                && !matches!(
                    (&top, &bottom),
                    (Value::Integer(_), Value::Quantity(_)) | (Value::Quantity(_), Value::Integer(_))
                )
            {
                return Err(ConditionError::KindMismatch {
                    left: top.kind().to_string(),
                    right: bottom.kind().to_string(),
                });
            }
            if bottom_value == 0.0 {
                return Err(ConditionError::FieldUnavailable {
                    field: denominator.clone(),
                    reason: "denominator is zero".to_string(),
                });
            }
            Ok(Value::Percentage(top_value / bottom_value))
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => Some(*n as f64),
        Value::Quantity(q) => Some(q.millis() as f64 / 1000.0),
        Value::Percentage(p) => Some(*p),
        Value::Duration(d) => Some(d.as_secs_f64()),
        _ => None,
    }
}

fn matches(operator: Operator, actual: &Value, expected: &Value) -> Result<bool, ConditionError> {
    let ordering = actual
        .compare(expected)
        .ok_or_else(|| ConditionError::KindMismatch {
            left: actual.kind().to_string(),
            right: expected.kind().to_string(),
        })?;
    Ok(operator.holds(ordering))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn disk() -> Fields {
        Fields::new()
            .with("used", Value::Quantity(Quantity::parse("85Gi").unwrap()))
            .with("total", Value::Quantity(Quantity::parse("100Gi").unwrap()))
            .with("version", Value::Version(Version::parse("14.0.0").unwrap()))
            .with("connected", Value::Bool(true))
    }

    #[test]
    fn test_ratio_against_percentage() {
        let fields = disk();
        assert!(evaluate("used/total >= 80%", &fields).unwrap());
        assert!(evaluate("used/total > 0.84", &fields).unwrap());
        assert!(!evaluate("used/total >= 90%", &fields).unwrap());
    }

    #[test]
    fn test_versions_against_wildcards() {
        let fields = disk();
        assert!(evaluate("version < 15.x", &fields).unwrap());
        assert!(!evaluate("version == 15.x", &fields).unwrap());
        assert!(evaluate("version == 14.x", &fields).unwrap());
        assert!(evaluate("version <= 14.x", &fields).unwrap());
        assert!(!evaluate("version > 14.x", &fields).unwrap());

        let newer = Value::Version(Version::parse("15.0.2001.0").unwrap());
        assert!(evaluate("> 15.0.2000.x", &newer).unwrap());
        assert!(evaluate(">= 15.0.2000.x", &newer).unwrap());

        // Wildcards compare as zero, not as a range.
        let patched = Value::Version(Version::parse("15.0.2000.5").unwrap());
        assert!(evaluate("> 15.0.2000.x", &patched).unwrap());
        let minor = Value::Version(Version::parse("15.5.0").unwrap());
        assert!(evaluate("> 15.x", &minor).unwrap());
        assert!(!evaluate("<= 15.x", &minor).unwrap());
        let later = Value::Version(Version::parse("15.9.3").unwrap());
        assert!(!evaluate("== 15.x", &later).unwrap());
        assert!(evaluate("!= 15.x", &later).unwrap());
        assert!(evaluate("== 15.0.0", &Value::Version(Version::parse("15.0").unwrap())).unwrap());
    }

    #[test]
    fn test_enum_default_subject() {
        let order = Arc::new(EnumOrder::new(
            "ceph health",
            ["HEALTH_ERR", "HEALTH_WARN", "HEALTH_OK"],
        ));
        let ok = Value::Enum(EnumValue::parse(&order, "HEALTH_OK").unwrap());
        assert!(evaluate("HEALTH_OK", &ok).unwrap());
        assert!(!evaluate("<= HEALTH_WARN", &ok).unwrap());
        assert!(evaluate(">= HEALTH_WARN", &ok).unwrap());
        assert!(evaluate("== HEALTH_ERR, HEALTH_OK", &ok).unwrap());
        assert!(!evaluate("!= HEALTH_ERR,HEALTH_OK", &ok).unwrap());
        assert!(evaluate("!= HEALTH_ERR", &ok).unwrap());
    }

    #[test]
    fn test_durations_and_integers() {
        let latency = Value::Duration(Duration::from_millis(12));
        assert!(evaluate("< 10ms", &latency) == Ok(false));
        assert!(evaluate("value >= 1ms", &latency).unwrap());

        let replicas = Value::Integer(1);
        assert!(evaluate("< 2", &replicas).unwrap());
        assert!(evaluate("=== 1", &replicas).unwrap());
    }

    #[test]
    fn test_authoring_errors_are_hard_errors() {
        let fields = disk();
        assert_eq!(evaluate("", &fields), Err(ConditionError::Empty));
        assert!(matches!(
            evaluate("used ~= 5Gi", &fields),
            Err(ConditionError::UnknownOperator(_))
        ));
        assert!(matches!(
            evaluate("used 5Gi", &fields),
            Err(ConditionError::Malformed { .. })
        ));
        assert!(matches!(
            evaluate("used >=", &fields),
            Err(ConditionError::Malformed { .. })
        ));
        assert!(matches!(
            evaluate("used > 5Qi", &fields),
            Err(ConditionError::InvalidLiteral { .. })
        ));
        assert!(matches!(
            evaluate("missing > 5", &fields),
            Err(ConditionError::UnknownSubject(_))
        ));
        assert!(matches!(
            evaluate("connected > true", &fields),
            Err(ConditionError::UnsupportedOperator { .. })
        ));
        assert!(matches!(
            evaluate("avg(used) > 5", &fields),
            Err(ConditionError::UnknownFunction(_))
        ));
        assert!(matches!(
            evaluate("> 5", &fields),
            Err(ConditionError::NoDefaultSubject)
        ));
        assert!(matches!(
            evaluate("used == 1Gi,", &fields),
            Err(ConditionError::Malformed { .. })
        ));

        let arch = Value::Text("amd64".to_string());
        assert!(matches!(
            evaluate("arch==amd64", &arch),
            Err(ConditionError::Malformed { .. })
        ));
        assert!(matches!(
            evaluate("<5", &arch),
            Err(ConditionError::Malformed { .. })
        ));
        assert!(evaluate("amd64", &arch).unwrap());
    }

    #[test]
    fn test_unavailable_field_is_data_error() {
        let mut fields = disk();
        fields.mark_unavailable("free", "not collected");
        let err = evaluate("free < 1Gi", &fields).unwrap_err();
        assert!(err.is_data_error());

        let zero = Fields::new()
            .with("used", Value::Integer(1))
            .with("total", Value::Integer(0));
        assert!(evaluate("used/total > 50%", &zero).unwrap_err().is_data_error());
    }

    #[test]
    fn test_condition_parse_shapes() {
        let parsed = Condition::parse("sum(cpuCapacity) > 32").unwrap();
        assert_eq!(
            parsed.subject(),
            &Subject::Aggregate {
                function: AggregateFn::Sum,
                field: Some("cpuCapacity".to_string())
            }
        );
        assert_eq!(parsed.operator(), Operator::Gt);
        assert_eq!(parsed.literals(), ["32".to_string()]);

        let count = Condition::parse("count() < 3").unwrap();
        assert_eq!(
            count.subject(),
            &Subject::Aggregate {
                function: AggregateFn::Count,
                field: None
            }
        );
        assert!(matches!(
            Condition::parse("min() > 3"),
            Err(ConditionError::Malformed { .. })
        ));
        assert_eq!(
            Condition::parse("connected == true").unwrap().to_string(),
            "connected == true"
        );
    }
}
