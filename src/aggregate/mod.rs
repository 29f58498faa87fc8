//! Aggregate functions over filtered collections.
//!
//! `count` and `sum` fold from zero; `min` and `max` have no identity and
//! fail over an empty collection.

mod filter;

pub use filter::{
    field_location, Filter, FilterSpec, LabelExpression, LabelOperator, Predicate,
    ResourceEntity, Scoped, Table, Taint,
};

use crate::condition::{FieldAccessor, Quantity, Value};
use crate::error::ConditionError;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFn {
    Count,
    Min,
    Max,
    Sum,
}

impl AggregateFn {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "count" => Some(AggregateFn::Count),
            "min" => Some(AggregateFn::Min),
            "max" => Some(AggregateFn::Max),
            "sum" => Some(AggregateFn::Sum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Count => "count",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
            AggregateFn::Sum => "sum",
        }
    }

    pub fn needs_field(&self) -> bool {
        !matches!(self, AggregateFn::Count)
    }
}

impl fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can report a typed value for a named field.
pub trait Measured {
    fn measure(&self, field: &str) -> Result<Value, ConditionError>;
}

/// Fold `function` over `items`.
pub fn fold<'a, T, I>(function: AggregateFn, field: Option<&str>, items: I) -> Result<Value, ConditionError>
where
    T: Measured + 'a,
    I: IntoIterator<Item = &'a T>,
{
    if function == AggregateFn::Count {
        let count = items.into_iter().count();
        return Ok(Value::Integer(count as i64));
    }

    let field = field.ok_or_else(|| ConditionError::Malformed {
        condition: format!("{}()", function),
        reason: "missing field".to_string(),
    })?;

    let mut acc: Option<Value> = None;
    for item in items {
        let value = item.measure(field)?;
        acc = Some(match acc {
            None => value,
            Some(current) => combine(function, current, value)?,
        });
    }

    match (function, acc) {
        (_, Some(value)) => Ok(value),
        (AggregateFn::Sum, None) => Ok(Value::Quantity(Quantity::default())),
        (_, None) => Err(ConditionError::EmptyAggregate {
            function: function.to_string(),
            field: field.to_string(),
        }),
    }
}

fn combine(function: AggregateFn, current: Value, next: Value) -> Result<Value, ConditionError> {
    let mismatch = |a: &Value, b: &Value| ConditionError::KindMismatch {
        left: a.kind().to_string(),
        right: b.kind().to_string(),
    };

    match function {
        AggregateFn::Sum => match (&current, &next) {
            (Value::Integer(a), Value::Integer(b)) => a
                .checked_add(*b)
                .map(Value::Integer)
                .ok_or_else(|| overflow(function)),
            (Value::Quantity(a), Value::Quantity(b)) => {
                a.checked_add(*b).map(Value::Quantity).ok_or_else(|| overflow(function))
            }
            _ => Err(mismatch(&current, &next)),
        },
        AggregateFn::Min | AggregateFn::Max => {
            let ordering = current
                .compare(&next)
                .ok_or_else(|| mismatch(&current, &next))?;
            let keep_current = match function {
                AggregateFn::Min => ordering != Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(if keep_current { current } else { next })
        }
        AggregateFn::Count => Ok(current),
    }
}

fn overflow(function: AggregateFn) -> ConditionError {
    ConditionError::FieldUnavailable {
        field: format!("{}()", function),
        reason: "result overflows".to_string(),
    }
}

/// The filtered members of a collection, exposed as a field accessor whose
/// default subject is `count()`.
#[derive(Debug, Clone)]
pub struct Collection<'a> {
    members: Vec<Scoped<'a>>,
    resource_name: Option<&'a str>,
}

impl<'a> Collection<'a> {
    /// Keep the entities `filter` matches.
    pub fn filtered(entities: &'a [ResourceEntity], filter: &'a Filter) -> Result<Self, ConditionError> {
        let resource_name = filter.resource_name();
        let mut members = Vec::new();
        for entity in entities {
            if filter.matches(entity)? {
                members.push(Scoped {
                    entity,
                    resource_name,
                });
            }
        }
        Ok(Self {
            members,
            resource_name,
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Scoped<'a>] {
        &self.members
    }

    pub fn resource_name(&self) -> Option<&'a str> {
        self.resource_name
    }
}

impl FieldAccessor for Collection<'_> {
    fn resolve(&self, field: &str) -> Result<Value, ConditionError> {
        Err(ConditionError::Malformed {
            condition: field.to_string(),
            reason: "collection fields need an aggregate function such as min(field)".to_string(),
        })
    }

    fn default_subject(&self) -> Option<&str> {
        Some("count()")
    }

    fn aggregate(&self, function: AggregateFn, field: Option<&str>) -> Result<Value, ConditionError> {
        fold(function, field, self.members.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::evaluate;

    fn nodes() -> Vec<ResourceEntity> {
        vec![
            ResourceEntity::new("small")
                .with_capacity("cpu", "2")
                .with_capacity("memory", "3999Ki")
                .with_capacity("pods", "110"),
            ResourceEntity::new("large")
                .with_capacity("cpu", "32")
                .with_capacity("memory", "7951376Ki")
                .with_capacity("pods", "110")
                .with_capacity("nvidia.com/gpu", "1")
                .with_allocatable("nvidia.com/gpu", "1"),
        ]
    }

    #[test]
    fn test_min_memory_capacity() {
        let nodes = nodes();
        let filter = Filter::new();
        let all = Collection::filtered(&nodes, &filter).unwrap();
        assert_eq!(
            all.aggregate(AggregateFn::Min, Some("memoryCapacity")).unwrap(),
            Value::Quantity(Quantity::parse("3999Ki").unwrap())
        );
        assert_eq!(
            all.aggregate(AggregateFn::Max, Some("memoryCapacity")).unwrap(),
            Value::Quantity(Quantity::parse("7951376Ki").unwrap())
        );
        assert!(evaluate("sum(cpuCapacity) > 32", &all).unwrap());
        assert!(evaluate("min(memoryCapacity) < 4Mi", &all).unwrap());
    }

    #[test]
    fn test_count_with_extended_resource_filter() {
        let nodes = nodes();
        let filter = FilterSpec {
            resource_name: Some("nvidia.com/gpu".to_string()),
            resource_allocatable: Some("1".to_string()),
            ..FilterSpec::default()
        }
        .build()
        .unwrap();
        let gpus = Collection::filtered(&nodes, &filter).unwrap();
        assert_eq!(gpus.aggregate(AggregateFn::Count, None).unwrap(), Value::Integer(1));
        assert!(evaluate("== 1", &gpus).unwrap());
        assert!(evaluate("sum(resourceAllocatable) >= 1", &gpus).unwrap());
    }

    #[test]
    fn test_empty_collection_identities() {
        let nodes = nodes();
        let filter = Filter::new().and(Predicate::Architecture("s390x".to_string()));
        let none = Collection::filtered(&nodes, &filter).unwrap();
        assert!(none.is_empty());
        assert_eq!(none.aggregate(AggregateFn::Count, None).unwrap(), Value::Integer(0));
        assert_eq!(
            none.aggregate(AggregateFn::Sum, Some("cpuCapacity")).unwrap(),
            Value::Quantity(Quantity::default())
        );
        let err = none.aggregate(AggregateFn::Min, Some("cpuCapacity")).unwrap_err();
        assert!(matches!(err, ConditionError::EmptyAggregate { .. }));
        assert!(err.is_data_error());
    }

    #[test]
    fn test_missing_field_is_data_error() {
        let nodes = vec![ResourceEntity::new("bare")];
        let filter = Filter::new();
        let all = Collection::filtered(&nodes, &filter).unwrap();
        let err = all.aggregate(AggregateFn::Max, Some("cpuCapacity")).unwrap_err();
        assert!(err.is_data_error());
        assert!(matches!(
            all.aggregate(AggregateFn::Max, Some("diskCapacity")),
            Err(ConditionError::UnknownSubject(_))
        ));
    }
}
