//! Outcome resolution: turning an ordered rule list into one verdict.
//!
//! Conditioned rules are tried first, in declared order, and the first true
//! condition wins. When none matches, default rules (no condition) are
//! chosen by severity, Fail before Warn before Pass, regardless of where they
//! were declared. No match and no default means no verdict, which callers
//! must keep distinct from a pass.

use crate::condition::{self, FieldAccessor, Fields};
use crate::error::ConditionError;
use crate::models::{OutcomeRule, Verdict, VerdictKind};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*\.?(\w+)\s*\}\}").expect("placeholder pattern"));

/// Values available to `{{ .Name }}` placeholders in outcome messages.
pub type TemplateValues = BTreeMap<String, String>;

/// Pick the rule that decides the verdict.
///
/// `holds` evaluates a non-empty condition; its errors abort resolution.
pub fn resolve<F>(rules: &[OutcomeRule], mut holds: F) -> Result<Option<&OutcomeRule>, ConditionError>
where
    F: FnMut(&str) -> Result<bool, ConditionError>,
{
    for rule in rules.iter().filter(|r| !r.is_default()) {
        if holds(&rule.outcome().when)? {
            return Ok(Some(rule));
        }
    }

    for kind in [VerdictKind::Fail, VerdictKind::Warn, VerdictKind::Pass] {
        if let Some(rule) = rules.iter().find(|r| r.is_default() && r.kind() == kind) {
            return Ok(Some(rule));
        }
    }

    Ok(None)
}

/// [`resolve`] with conditions evaluated against `accessor`.
pub fn resolve_with<'r>(
    rules: &'r [OutcomeRule],
    accessor: &dyn FieldAccessor,
) -> Result<Option<&'r OutcomeRule>, ConditionError> {
    resolve(rules, |when| condition::evaluate(when, accessor))
}

/// Parse every condition up front so authoring mistakes surface even when an
/// earlier rule would have matched.
pub fn validate(rules: &[OutcomeRule]) -> Result<(), ConditionError> {
    for rule in rules.iter().filter(|r| !r.is_default()) {
        condition::Condition::parse(&rule.outcome().when)?;
    }
    Ok(())
}

/// Render `{{ .Name }}` placeholders. Unknown names are left as written.
pub fn render(template: &str, values: &TemplateValues) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            values
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Template values for every available field of `fields`.
pub fn template_values(fields: &Fields) -> TemplateValues {
    fields
        .values()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Build the verdict a rule describes.
pub fn verdict_for(rule: &OutcomeRule, title: &str, values: &TemplateValues) -> Verdict {
    let outcome = rule.outcome();
    Verdict::new(rule.kind(), title, render(&outcome.message, values)).with_uri(outcome.uri.clone())
}

/// Resolve `rules` against `accessor` and build the verdict, if any.
pub fn evaluate_outcomes(
    title: &str,
    rules: &[OutcomeRule],
    accessor: &dyn FieldAccessor,
    values: &TemplateValues,
) -> Result<Option<Verdict>, ConditionError> {
    Ok(resolve_with(rules, accessor)?.map(|rule| verdict_for(rule, title, values)))
}

/// Accumulates the verdicts of one check invocation.
#[derive(Debug, Default)]
pub struct ResultCollector {
    verdicts: Vec<Verdict>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, verdict: Verdict) {
        self.verdicts.push(verdict);
    }

    pub fn extend(&mut self, verdicts: impl IntoIterator<Item = Verdict>) {
        self.verdicts.extend(verdicts);
    }

    /// Evaluate `rules` for one entity of a collection, titling the verdict
    /// `"<title> - <entity>"`. Returns whether a verdict was produced.
    pub fn evaluate_entity(
        &mut self,
        title: &str,
        entity: &str,
        rules: &[OutcomeRule],
        accessor: &dyn FieldAccessor,
        values: &TemplateValues,
    ) -> Result<bool, ConditionError> {
        let entity_title = format!("{} - {}", title, entity);
        match evaluate_outcomes(&entity_title, rules, accessor, values)? {
            Some(verdict) => {
                self.push(verdict);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    pub fn into_verdicts(self) -> Vec<Verdict> {
        self.verdicts
    }
}
