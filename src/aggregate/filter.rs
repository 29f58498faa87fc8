//! Entity model and filter predicates for collection checks.

use crate::condition::{FieldAccessor, Quantity, Value};
use crate::error::ConditionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Measured;

/// One member of a homogeneous collection, e.g. a cluster node.
///
/// Quantities are kept as collected strings (`"4"`, `"3999Ki"`) and parsed
/// when a field is measured, so one malformed value only affects the checks
/// that read it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceEntity {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
    pub architecture: Option<String>,
    pub capacity: BTreeMap<String, String>,
    pub allocatable: BTreeMap<String, String>,
}

impl ResourceEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_capacity(mut self, resource: impl Into<String>, quantity: impl Into<String>) -> Self {
        self.capacity.insert(resource.into(), quantity.into());
        self
    }

    pub fn with_allocatable(mut self, resource: impl Into<String>, quantity: impl Into<String>) -> Self {
        self.allocatable.insert(resource.into(), quantity.into());
        self
    }

    pub fn with_taint(mut self, taint: Taint) -> Self {
        self.taints.push(taint);
        self
    }

    pub fn with_architecture(mut self, architecture: impl Into<String>) -> Self {
        self.architecture = Some(architecture.into());
        self
    }

    /// Parsed quantity of `resource`, `None` when the entity does not report it.
    pub fn quantity(&self, table: Table, resource: &str) -> Result<Option<Quantity>, ConditionError> {
        let raw = match table {
            Table::Capacity => self.capacity.get(resource),
            Table::Allocatable => self.allocatable.get(resource),
        };
        raw.map(|raw| {
            Quantity::parse(raw).map_err(|e| ConditionError::FieldUnavailable {
                field: format!("{}.{}", table.as_str(), resource),
                reason: format!("entity {}: {}", self.name, e),
            })
        })
        .transpose()
    }
}

/// Which resource table of an entity a field reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Capacity,
    Allocatable,
}

impl Table {
    fn as_str(&self) -> &'static str {
        match self {
            Table::Capacity => "capacity",
            Table::Allocatable => "allocatable",
        }
    }
}

/// Map a measurable field name onto a resource table and key.
///
/// `resourceCapacity` and `resourceAllocatable` read the extended resource
/// named by the collection's filter.
pub fn field_location<'a>(
    field: &str,
    resource_name: Option<&'a str>,
) -> Result<(Table, &'a str), ConditionError> {
    let location = match field {
        "cpuCapacity" => (Table::Capacity, "cpu"),
        "cpuAllocatable" => (Table::Allocatable, "cpu"),
        "memoryCapacity" => (Table::Capacity, "memory"),
        "memoryAllocatable" => (Table::Allocatable, "memory"),
        "podCapacity" => (Table::Capacity, "pods"),
        "podAllocatable" => (Table::Allocatable, "pods"),
        "ephemeralStorageCapacity" => (Table::Capacity, "ephemeral-storage"),
        "ephemeralStorageAllocatable" => (Table::Allocatable, "ephemeral-storage"),
        "resourceCapacity" | "resourceAllocatable" => {
            let name = resource_name.ok_or_else(|| ConditionError::Malformed {
                condition: field.to_string(),
                reason: "the filter names no extended resource".to_string(),
            })?;
            let table = if field == "resourceCapacity" {
                Table::Capacity
            } else {
                Table::Allocatable
            };
            (table, name)
        }
        other => return Err(ConditionError::UnknownSubject(other.to_string())),
    };
    Ok(location)
}

/// An entity viewed through a collection's extended-resource scope.
#[derive(Debug, Clone, Copy)]
pub struct Scoped<'a> {
    pub entity: &'a ResourceEntity,
    pub resource_name: Option<&'a str>,
}

impl Measured for Scoped<'_> {
    fn measure(&self, field: &str) -> Result<Value, ConditionError> {
        let (table, resource) = field_location(field, self.resource_name)?;
        self.entity
            .quantity(table, resource)?
            .map(Value::Quantity)
            .ok_or_else(|| ConditionError::FieldUnavailable {
                field: field.to_string(),
                reason: format!("entity {} reports no {} {}", self.entity.name, resource, table.as_str()),
            })
    }
}

/// A single entity is an accessor too, for per-entity verdicts.
impl FieldAccessor for Scoped<'_> {
    fn resolve(&self, field: &str) -> Result<Value, ConditionError> {
        match field {
            "name" => Ok(Value::Text(self.entity.name.clone())),
            "architecture" => self
                .entity
                .architecture
                .clone()
                .map(Value::Text)
                .ok_or_else(|| ConditionError::FieldUnavailable {
                    field: field.to_string(),
                    reason: format!("entity {} reports no architecture", self.entity.name),
                }),
            _ => self.measure(field),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: String,
}

impl Taint {
    pub fn new(key: impl Into<String>, value: Option<&str>, effect: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.map(str::to_string),
            effect: effect.into(),
        }
    }

    /// Key and effect must match; values are compared only when both
    /// sides carry one.
    pub fn matches(&self, other: &Taint) -> bool {
        if self.key != other.key || self.effect != other.effect {
            return false;
        }
        match (&self.value, &other.value) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelExpression {
    pub key: String,
    pub operator: LabelOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

impl LabelExpression {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let current = labels.get(&self.key);
        match self.operator {
            LabelOperator::In => current.is_some_and(|v| self.values.contains(v)),
            LabelOperator::NotIn => current.map_or(true, |v| !self.values.contains(v)),
            LabelOperator::Exists => current.is_some(),
            LabelOperator::DoesNotExist => current.is_none(),
        }
    }
}

/// One boolean test over an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    LabelEquals { key: String, value: String },
    Label(LabelExpression),
    Taint(Taint),
    Architecture(String),
    /// The entity reports the named resource at or above the given
    /// thresholds. Entities without the resource never match.
    Resource {
        name: String,
        capacity: Option<Quantity>,
        allocatable: Option<Quantity>,
    },
    /// A measurable field is at least `minimum`.
    AtLeast { field: String, minimum: Quantity },
}

impl Predicate {
    pub fn matches(&self, entity: &ResourceEntity) -> Result<bool, ConditionError> {
        let matched = match self {
            Predicate::LabelEquals { key, value } => entity.labels.get(key) == Some(value),
            Predicate::Label(expression) => expression.matches(&entity.labels),
            Predicate::Taint(taint) => entity.taints.iter().any(|t| taint.matches(t)),
            Predicate::Architecture(arch) => entity
                .architecture
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(arch)),
            Predicate::Resource {
                name,
                capacity,
                allocatable,
            } => {
                let have_capacity = entity.quantity(Table::Capacity, name)?;
                let have_allocatable = entity.quantity(Table::Allocatable, name)?;
                if have_capacity.is_none() && have_allocatable.is_none() {
                    return Ok(false);
                }
                at_least(have_capacity, *capacity) && at_least(have_allocatable, *allocatable)
            }
            Predicate::AtLeast { field, minimum } => {
                let (table, resource) = field_location(field, None)?;
                entity
                    .quantity(table, resource)?
                    .is_some_and(|have| have >= *minimum)
            }
        };
        Ok(matched)
    }
}

fn at_least(have: Option<Quantity>, threshold: Option<Quantity>) -> bool {
    match threshold {
        None => true,
        Some(min) => have.is_some_and(|h| h >= min),
    }
}

/// A conjunction of predicates. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// The extended resource named by this filter, if any.
    pub fn resource_name(&self) -> Option<&str> {
        self.predicates.iter().find_map(|p| match p {
            Predicate::Resource { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn matches(&self, entity: &ResourceEntity) -> Result<bool, ConditionError> {
        for predicate in &self.predicates {
            if !predicate.matches(entity)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Declarative form of a [`Filter`], as written in check definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSpec {
    pub match_labels: BTreeMap<String, String>,
    pub match_expressions: Vec<LabelExpression>,
    pub taint: Option<Taint>,
    pub architecture: Option<String>,
    pub resource_name: Option<String>,
    pub resource_capacity: Option<String>,
    pub resource_allocatable: Option<String>,
    /// Minimums keyed by measurable field, e.g. `memoryCapacity = "8Gi"`.
    pub minimums: BTreeMap<String, String>,
}

impl FilterSpec {
    pub fn build(&self) -> Result<Filter, ConditionError> {
        let mut filter = Filter::new();

        if let Some(name) = &self.resource_name {
            filter = filter.and(Predicate::Resource {
                name: name.clone(),
                capacity: parse_threshold(self.resource_capacity.as_deref())?,
                allocatable: parse_threshold(self.resource_allocatable.as_deref())?,
            });
        } else if self.resource_capacity.is_some() || self.resource_allocatable.is_some() {
            return Err(ConditionError::Malformed {
                condition: "filters".to_string(),
                reason: "resource thresholds need a resourceName".to_string(),
            });
        }

        for (key, value) in &self.match_labels {
            filter = filter.and(Predicate::LabelEquals {
                key: key.clone(),
                value: value.clone(),
            });
        }
        for expression in &self.match_expressions {
            filter = filter.and(Predicate::Label(expression.clone()));
        }
        if let Some(taint) = &self.taint {
            filter = filter.and(Predicate::Taint(taint.clone()));
        }
        if let Some(arch) = &self.architecture {
            filter = filter.and(Predicate::Architecture(arch.clone()));
        }
        for (field, minimum) in &self.minimums {
            field_location(field, None)?;
            let minimum = parse_threshold(Some(minimum))?.unwrap_or_default();
            filter = filter.and(Predicate::AtLeast {
                field: field.clone(),
                minimum,
            });
        }

        Ok(filter)
    }
}

fn parse_threshold(raw: Option<&str>) -> Result<Option<Quantity>, ConditionError> {
    raw.map(|raw| {
        Quantity::parse(raw).map_err(|source| ConditionError::InvalidLiteral {
            literal: raw.to_string(),
            kind: "quantity".to_string(),
            source,
        })
    })
    .transpose()
}
