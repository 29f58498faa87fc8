//! Generic declarative checks.
//!
//! A check reads decoded data from a bundle, exposes named typed fields and
//! hands them with its outcome rules to the resolution policy. Two shapes
//! cover most checks: a [`FieldCheck`] over values at JSON pointers, and an
//! [`AggregateCheck`] over a collection of resource entities.

use crate::aggregate::{Collection, FilterSpec, ResourceEntity};
use crate::bundle::BundleAccessor;
use crate::condition::{parse_bool, EnumOrder, EnumValue, Fields, OperandKind, Value};
use crate::error::CheckError;
use crate::models::{OutcomeRule, RemediationStep, Verdict};
use crate::outcome::{self, ResultCollector, TemplateValues};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One check invocation: read, evaluate, return zero or more verdicts.
pub trait Check: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, bundle: &dyn BundleAccessor) -> Result<Vec<Verdict>, CheckError>;
}

/// Declarative check definition, as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckSpec {
    Field(FieldCheck),
    Aggregate(AggregateCheck),
}

impl CheckSpec {
    pub fn category(&self) -> Option<&str> {
        match self {
            CheckSpec::Field(c) => c.category.as_deref(),
            CheckSpec::Aggregate(c) => c.category.as_deref(),
        }
    }

    fn parts(&self) -> (&str, &[OutcomeRule]) {
        match self {
            CheckSpec::Field(c) => (&c.name, &c.outcomes),
            CheckSpec::Aggregate(c) => (&c.name, &c.outcomes),
        }
    }

    /// Reject definitions that can never evaluate.
    pub fn validate(&self) -> Result<(), CheckError> {
        let (name, outcomes) = self.parts();
        if name.trim().is_empty() {
            return Err(CheckError::Definition {
                check: "<unnamed>".to_string(),
                reason: "check name cannot be empty".to_string(),
            });
        }
        if outcomes.is_empty() {
            return Err(CheckError::Definition {
                check: name.to_string(),
                reason: "no outcomes declared".to_string(),
            });
        }
        outcome::validate(outcomes).map_err(|source| CheckError::Condition {
            check: name.to_string(),
            source,
        })?;

        if let CheckSpec::Field(check) = self {
            for (field, spec) in &check.fields {
                if spec.kind == FieldKind::Enum && spec.levels.is_empty() {
                    return Err(CheckError::Definition {
                        check: name.to_string(),
                        reason: format!("enum field {} declares no levels", field),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Check for CheckSpec {
    fn name(&self) -> &str {
        self.parts().0
    }

    fn run(&self, bundle: &dyn BundleAccessor) -> Result<Vec<Verdict>, CheckError> {
        match self {
            CheckSpec::Field(check) => check.run(bundle),
            CheckSpec::Aggregate(check) => check.run(bundle),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Integer,
    Quantity,
    Percentage,
    Duration,
    Version,
    Enum,
    Bool,
    Text,
}

/// Where a field lives in the decoded document and how to type it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// JSON pointer (`/status/health`) or dotted path (`status.health`).
    pub path: String,
    pub kind: FieldKind,
    /// Ordered levels, lowest first, for enum fields.
    #[serde(default)]
    pub levels: Vec<String>,
}

impl FieldSpec {
    fn operand_kind(&self, field: &str) -> OperandKind {
        match self.kind {
            FieldKind::Integer => OperandKind::Integer,
            FieldKind::Quantity => OperandKind::Quantity,
            FieldKind::Percentage => OperandKind::Percentage,
            FieldKind::Duration => OperandKind::Duration,
            FieldKind::Version => OperandKind::Version,
            FieldKind::Enum => {
                OperandKind::Enum(Arc::new(EnumOrder::new(field, self.levels.iter().cloned())))
            }
            FieldKind::Bool => OperandKind::Bool,
            FieldKind::Text => OperandKind::Text,
        }
    }

    /// Read and type the field from `document`.
    fn read(&self, field: &str, document: &Json) -> Result<Value, String> {
        let raw = document
            .pointer(&to_pointer(&self.path))
            .ok_or_else(|| format!("{} not present", self.path))?;
        let kind = self.operand_kind(field);
        let value = match (raw, &kind) {
            (Json::Bool(b), OperandKind::Bool) => Value::Bool(*b),
            (Json::String(s), OperandKind::Bool) => Value::Bool(parse_bool(s).map_err(|e| e.to_string())?),
            (Json::Number(n), OperandKind::Integer) => Value::Integer(
                n.as_i64()
                    .ok_or_else(|| format!("{} is not an integer: {}", self.path, n))?,
            ),
            (Json::Number(n), OperandKind::Percentage) => Value::Percentage(
                n.as_f64()
                    .ok_or_else(|| format!("{} is not a number: {}", self.path, n))?,
            ),
            (Json::Number(n), _) => kind.parse(&n.to_string()).map_err(|e| e.to_string())?,
            (Json::String(s), OperandKind::Enum(order)) => {
                Value::Enum(EnumValue::parse(order, s).map_err(|e| e.to_string())?)
            }
            (Json::String(s), _) => kind.parse(s).map_err(|e| e.to_string())?,
            (other, _) => return Err(format!("{} has unsupported value {}", self.path, other)),
        };
        Ok(value)
    }
}

fn to_pointer(path: &str) -> String {
    if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path.replace('.', "/"))
    }
}

/// A check over typed fields of one JSON document, or of every item of a
/// list inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldCheck {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Bundle path of the JSON document.
    pub file: String,
    /// Path to a list; when set, outcomes are evaluated once per item.
    #[serde(default)]
    pub collection: Option<String>,
    /// Path inside an item naming it, for per-item titles.
    #[serde(default)]
    pub item_name: Option<String>,
    pub fields: BTreeMap<String, FieldSpec>,
    /// Subject for conditions that name none.
    #[serde(default)]
    pub default_field: Option<String>,
    pub outcomes: Vec<OutcomeRule>,
    #[serde(default)]
    pub remediation: Option<RemediationStep>,
}

impl FieldCheck {
    fn title(&self) -> &str {
        if self.title.is_empty() {
            &self.name
        } else {
            &self.title
        }
    }

    fn fields_of(&self, document: &Json) -> Fields {
        let mut fields = Fields::new();
        if let Some(default) = &self.default_field {
            fields = fields.with_default_subject(default.clone());
        }
        for (name, spec) in &self.fields {
            match spec.read(name, document) {
                Ok(value) => fields.insert(name.clone(), value),
                Err(reason) => fields.mark_unavailable(name.clone(), reason),
            }
        }
        fields
    }

    fn run(&self, bundle: &dyn BundleAccessor) -> Result<Vec<Verdict>, CheckError> {
        let document = read_json(&self.name, &self.file, bundle)?;
        let condition_error = |source| CheckError::Condition {
            check: self.name.clone(),
            source,
        };

        let mut collector = ResultCollector::new();
        match &self.collection {
            None => {
                let fields = self.fields_of(&document);
                let values = outcome::template_values(&fields);
                if let Some(verdict) =
                    outcome::evaluate_outcomes(self.title(), &self.outcomes, &fields, &values)
                        .map_err(condition_error)?
                {
                    collector.push(verdict);
                }
            }
            Some(path) => {
                let items = document
                    .pointer(&to_pointer(path))
                    .and_then(Json::as_array)
                    .ok_or_else(|| CheckError::Decode {
                        check: self.name.clone(),
                        path: self.file.clone(),
                        reason: format!("{} is not a list", path),
                    })?;
                for (index, item) in items.iter().enumerate() {
                    let entity = self
                        .item_name
                        .as_deref()
                        .and_then(|p| item.pointer(&to_pointer(p)))
                        .and_then(Json::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("#{}", index));
                    let fields = self.fields_of(item);
                    let values = outcome::template_values(&fields);
                    collector
                        .evaluate_entity(self.title(), &entity, &self.outcomes, &fields, &values)
                        .map_err(condition_error)?;
                }
            }
        }

        Ok(decorate(
            collector.into_verdicts(),
            self.category.as_deref(),
            self.remediation.as_ref(),
        ))
    }
}

/// A check over a filtered collection of resource entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateCheck {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Bundle path of a JSON list of entities, or an object with `items`.
    pub file: String,
    #[serde(default)]
    pub filters: FilterSpec,
    pub outcomes: Vec<OutcomeRule>,
    #[serde(default)]
    pub remediation: Option<RemediationStep>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EntityList {
    Bare(Vec<ResourceEntity>),
    Wrapped { items: Vec<ResourceEntity> },
}

impl AggregateCheck {
    fn run(&self, bundle: &dyn BundleAccessor) -> Result<Vec<Verdict>, CheckError> {
        let condition_error = |source| CheckError::Condition {
            check: self.name.clone(),
            source,
        };
        let filter = self.filters.build().map_err(condition_error)?;

        let contents = bundle
            .get_file_contents(&self.file)
            .map_err(|source| CheckError::Bundle {
                check: self.name.clone(),
                source,
            })?;
        let entities = match serde_json::from_slice::<EntityList>(&contents) {
            Ok(EntityList::Bare(items)) | Ok(EntityList::Wrapped { items }) => items,
            Err(e) => {
                return Err(CheckError::Decode {
                    check: self.name.clone(),
                    path: self.file.clone(),
                    reason: e.to_string(),
                })
            }
        };

        let collection = Collection::filtered(&entities, &filter).map_err(condition_error)?;
        let mut values = TemplateValues::new();
        values.insert("count".to_string(), collection.len().to_string());
        if let Some(resource) = collection.resource_name() {
            values.insert("resourceName".to_string(), resource.to_string());
        }

        let title = if self.title.is_empty() {
            &self.name
        } else {
            &self.title
        };
        let verdicts = outcome::evaluate_outcomes(title, &self.outcomes, &collection, &values)
            .map_err(condition_error)?
            .into_iter()
            .collect();

        Ok(decorate(
            verdicts,
            self.category.as_deref(),
            self.remediation.as_ref(),
        ))
    }
}

fn read_json(check: &str, path: &str, bundle: &dyn BundleAccessor) -> Result<Json, CheckError> {
    let contents = bundle
        .get_file_contents(path)
        .map_err(|source| CheckError::Bundle {
            check: check.to_string(),
            source,
        })?;
    serde_json::from_slice(&contents).map_err(|e| CheckError::Decode {
        check: check.to_string(),
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Attach the check's category, and its remediation to non-passing verdicts.
fn decorate(
    verdicts: Vec<Verdict>,
    category: Option<&str>,
    remediation: Option<&RemediationStep>,
) -> Vec<Verdict> {
    verdicts
        .into_iter()
        .map(|mut verdict| {
            if let Some(category) = category {
                verdict.category = Some(category.to_string());
            }
            if !verdict.is_pass() {
                verdict.remediation = remediation.cloned();
            }
            verdict
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Bundle;
    use crate::models::VerdictKind;

    fn disk_check() -> CheckSpec {
        let json = r#"{
            "type": "field",
            "name": "disk-usage",
            "title": "Disk Usage",
            "category": "storage",
            "file": "host/disk.json",
            "fields": {
                "used": {"path": "used", "kind": "quantity"},
                "total": {"path": "/total", "kind": "quantity"}
            },
            "outcomes": [
                {"fail": {"when": "used/total >= 90%", "message": "{{ .used }} of {{ .total }} used"}},
                {"warn": {"when": "used/total >= 80%", "message": "disk filling up"}},
                {"pass": {"message": "disk ok"}}
            ],
            "remediation": {"id": "free-disk", "description": "Free disk space", "priority": 1}
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_field_check_ratio() {
        let check = disk_check();
        check.validate().unwrap();
        let bundle = Bundle::new().with_file("host/disk.json", r#"{"used": "95Gi", "total": "100Gi"}"#);
        let verdicts = check.run(&bundle).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].kind, VerdictKind::Fail);
        assert_eq!(verdicts[0].message, "102005473280 of 107374182400 used");
        assert_eq!(verdicts[0].category.as_deref(), Some("storage"));
        assert_eq!(verdicts[0].remediation.as_ref().map(|r| r.priority), Some(1));

        let healthy = Bundle::new().with_file("host/disk.json", r#"{"used": 10, "total": 100}"#);
        let verdicts = check.run(&healthy).unwrap();
        assert!(verdicts[0].is_pass());
        assert!(verdicts[0].remediation.is_none());
    }

    #[test]
    fn test_field_check_data_errors() {
        let check = disk_check();
        let missing_file = check.run(&Bundle::new()).unwrap_err();
        assert!(missing_file.is_data_error());

        let missing_field = Bundle::new().with_file("host/disk.json", r#"{"used": "1Gi"}"#);
        assert!(check.run(&missing_field).unwrap_err().is_data_error());

        let garbage = Bundle::new().with_file("host/disk.json", "not json");
        assert!(matches!(
            check.run(&garbage),
            Err(CheckError::Decode { .. })
        ));
    }

    #[test]
    fn test_per_item_verdicts() {
        let json = r#"{
            "type": "field",
            "name": "ceph",
            "title": "Ceph Pools",
            "file": "ceph/status.json",
            "collection": "pools",
            "itemName": "name",
            "defaultField": "health",
            "fields": {
                "health": {"path": "health", "kind": "enum", "levels": ["HEALTH_ERR", "HEALTH_WARN", "HEALTH_OK"]}
            },
            "outcomes": [
                {"fail": {"when": "== HEALTH_ERR", "message": "pool broken"}},
                {"warn": {"when": "<= HEALTH_WARN", "message": "pool degraded"}},
                {"pass": {"message": "pool {{ .health }}"}}
            ]
        }"#;
        let check: CheckSpec = serde_json::from_str(json).unwrap();
        check.validate().unwrap();
        let bundle = Bundle::new().with_file(
            "ceph/status.json",
            r#"{"pools": [{"name": "rbd", "health": "HEALTH_OK"}, {"name": "data", "health": "HEALTH_WARN"}]}"#,
        );
        let verdicts = check.run(&bundle).unwrap();
        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].title, "Ceph Pools - rbd");
        assert_eq!(verdicts[0].message, "pool HEALTH_OK");
        assert!(verdicts[1].is_warn());
    }

    #[test]
    fn test_check_keys_are_camel_case() {
        let json = r#"{
            "type": "aggregate",
            "name": "arm-nodes",
            "file": "nodes.json",
            "filters": {"matchLabels": {"role": "worker"}, "resourceCapacity": "1"},
            "outcomes": [{"fail": {"when": "count() < 1", "message": "none"}}]
        }"#;
        let check: CheckSpec = serde_json::from_str(json).unwrap();
        let CheckSpec::Aggregate(aggregate) = &check else {
            panic!("expected an aggregate check");
        };
        assert_eq!(aggregate.filters.match_labels["role"], "worker");
        assert_eq!(aggregate.filters.resource_capacity.as_deref(), Some("1"));

        let value = serde_json::to_value(&check).unwrap();
        assert!(value["filters"].get("matchLabels").is_some());
        assert!(value["filters"].get("match_labels").is_none());
    }

    #[test]
    fn test_aggregate_check() {
        let json = r#"{
            "type": "aggregate",
            "name": "gpu-nodes",
            "title": "GPU Nodes",
            "file": "cluster-resources/nodes.json",
            "filters": {"resourceName": "nvidia.com/gpu", "resourceAllocatable": "1"},
            "outcomes": [
                {"fail": {"when": "count() < 1", "message": "no GPU nodes"}},
                {"pass": {"message": "{{ .count }} node(s) with {{ .resourceName }}"}}
            ]
        }"#;
        let check: CheckSpec = serde_json::from_str(json).unwrap();
        let nodes = r#"{"items": [
            {"name": "a", "capacity": {"memory": "3999Ki"}},
            {"name": "b", "capacity": {"nvidia.com/gpu": "1"}, "allocatable": {"nvidia.com/gpu": "1"}}
        ]}"#;
        let bundle = Bundle::new().with_file("cluster-resources/nodes.json", nodes);
        let verdicts = check.run(&bundle).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert!(verdicts[0].is_pass());
        assert_eq!(verdicts[0].message, "1 node(s) with nvidia.com/gpu");
    }

    #[test]
    fn test_validate_rejects_bad_definitions() {
        let mut check = disk_check();
        if let CheckSpec::Field(inner) = &mut check {
            inner.outcomes.push(OutcomeRule::fail("used >>> 1", "x"));
        }
        assert!(matches!(
            check.validate(),
            Err(CheckError::Condition { .. })
        ));

        if let CheckSpec::Field(inner) = &mut check {
            inner.outcomes.clear();
        }
        assert!(matches!(
            check.validate(),
            Err(CheckError::Definition { .. })
        ));
    }
}
