//! Verdict aggregation and report statistics.
//!
//! This module folds merged verdicts into a [`Summary`], picks the top
//! issues, deduplicates remediation steps and derives category
//! correlations.

use crate::models::{Insight, OverallHealth, RemediationStep, Summary, Verdict, VerdictKind};
use std::collections::{BTreeMap, HashSet};

/// Failure rates above zero and up to this value are `DEGRADED`; above it,
/// `CRITICAL`.
pub const DEGRADED_FAILURE_RATE: f64 = 0.2;

/// Maximum number of titles listed in [`Summary::top_issues`].
pub const MAX_TOP_ISSUES: usize = 10;

/// Classify a report by the share of failed verdicts.
pub fn overall_health(failed: usize, total: usize) -> OverallHealth {
    if total == 0 || failed == 0 {
        return OverallHealth::Healthy;
    }
    let rate = failed as f64 / total as f64;
    if rate <= DEGRADED_FAILURE_RATE {
        OverallHealth::Degraded
    } else {
        OverallHealth::Critical
    }
}

/// Sort verdicts by severity (fail first), keeping relative order otherwise.
pub fn sort_by_severity(verdicts: &mut [Verdict]) {
    verdicts.sort_by(|a, b| b.kind.cmp(&a.kind));
}

/// Titles of failed verdicts, highest confidence first, at most `n`.
///
/// Verdicts without a declared confidence rank last; ties keep report order.
pub fn top_issues(verdicts: &[Verdict], n: usize) -> Vec<String> {
    let mut failed: Vec<&Verdict> = verdicts.iter().filter(|v| v.is_fail()).collect();
    failed.sort_by(|a, b| {
        let a = a.confidence.unwrap_or(f64::MIN);
        let b = b.confidence.unwrap_or(f64::MIN);
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });
    failed.into_iter().take(n).map(|v| v.title.clone()).collect()
}

/// Mean confidence over the verdicts that declare one.
pub fn mean_confidence(verdicts: &[Verdict]) -> Option<f64> {
    let declared: Vec<f64> = verdicts.iter().filter_map(|v| v.confidence).collect();
    if declared.is_empty() {
        None
    } else {
        Some(declared.iter().sum::<f64>() / declared.len() as f64)
    }
}

/// Fold merged verdicts into a summary.
pub fn build_summary(verdicts: &[Verdict], error_count: usize, agents_used: Vec<String>) -> Summary {
    let count = |kind: VerdictKind| verdicts.iter().filter(|v| v.kind == kind).count();
    let failed = count(VerdictKind::Fail);

    Summary {
        total_checks: verdicts.len(),
        passed_checks: count(VerdictKind::Pass),
        warning_checks: count(VerdictKind::Warn),
        failed_checks: failed,
        error_count,
        overall_health: overall_health(failed, verdicts.len()),
        confidence: mean_confidence(verdicts),
        top_issues: top_issues(verdicts, MAX_TOP_ISSUES),
        agents_used,
    }
}

/// Remediation steps of non-passing verdicts, deduplicated by id (first
/// occurrence wins) and ordered by ascending priority.
pub fn collect_remediation(verdicts: &[Verdict]) -> Vec<RemediationStep> {
    let mut seen = HashSet::new();
    let mut steps: Vec<RemediationStep> = verdicts
        .iter()
        .filter(|v| !v.is_pass())
        .filter_map(|v| v.remediation.as_ref())
        .filter(|step| seen.insert(step.id.clone()))
        .cloned()
        .collect();
    steps.sort_by_key(|step| step.priority);
    steps
}

/// Group verdicts by category. Uncategorized verdicts are left out.
pub fn group_by_category(verdicts: &[Verdict]) -> BTreeMap<String, Vec<&Verdict>> {
    let mut grouped: BTreeMap<String, Vec<&Verdict>> = BTreeMap::new();
    for verdict in verdicts {
        if let Some(category) = &verdict.category {
            grouped.entry(category.clone()).or_default().push(verdict);
        }
    }
    grouped
}

/// One insight per category with two or more failing or warning verdicts.
pub fn correlate_by_category(verdicts: &[Verdict]) -> Vec<Insight> {
    group_by_category(verdicts)
        .into_iter()
        .filter_map(|(category, members)| {
            let problems: Vec<&Verdict> = members.into_iter().filter(|v| !v.is_pass()).collect();
            if problems.len() < 2 {
                return None;
            }
            let failed = problems.iter().filter(|v| v.is_fail()).count();
            Some(Insight {
                title: format!("Multiple {} problems", category),
                description: format!(
                    "{} checks in category {} did not pass ({} failed)",
                    problems.len(),
                    category,
                    failed
                ),
                related: problems.iter().map(|v| v.title.clone()).collect(),
                confidence: mean_confidence(
                    &problems.iter().map(|v| (*v).clone()).collect::<Vec<_>>(),
                ),
                source: "engine".to_string(),
            })
        })
        .collect()
}

/// Generate a text summary of verdict statistics.
pub fn generate_summary_text(summary: &Summary) -> String {
    let mut lines = Vec::new();

    lines.push(format!(
        "Overall Health: {} ({} checks)",
        summary.overall_health, summary.total_checks
    ));
    lines.push(format!(
        "- {} Fail: {}",
        VerdictKind::Fail.emoji(),
        summary.failed_checks
    ));
    lines.push(format!(
        "- {} Warn: {}",
        VerdictKind::Warn.emoji(),
        summary.warning_checks
    ));
    lines.push(format!(
        "- {} Pass: {}",
        VerdictKind::Pass.emoji(),
        summary.passed_checks
    ));
    if summary.error_count > 0 {
        lines.push(format!("- Errors: {}", summary.error_count));
    }
    if let Some(confidence) = summary.confidence {
        lines.push(format!("- Confidence: {:.0}%", confidence * 100.0));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(kind: VerdictKind, title: &str, category: Option<&str>) -> Verdict {
        let verdict = Verdict::new(kind, title, "message");
        match category {
            Some(c) => verdict.with_category(c),
            None => verdict,
        }
    }

    #[test]
    fn test_overall_health_thresholds() {
        assert_eq!(overall_health(0, 5), OverallHealth::Healthy);
        assert_eq!(overall_health(0, 0), OverallHealth::Healthy);
        assert_eq!(overall_health(1, 5), OverallHealth::Degraded);
        assert_eq!(overall_health(1, 4), OverallHealth::Critical);
        assert_eq!(overall_health(1, 2), OverallHealth::Critical);
    }

    #[test]
    fn test_build_summary() {
        let verdicts = vec![
            verdict(VerdictKind::Fail, "disk", None).with_confidence(0.8),
            verdict(VerdictKind::Pass, "cpu", None).with_confidence(0.6),
            verdict(VerdictKind::Pass, "memory", None),
            verdict(VerdictKind::Pass, "pods", None),
            verdict(VerdictKind::Pass, "nodes", None),
        ];
        let summary = build_summary(&verdicts, 2, vec!["local".to_string()]);
        assert_eq!(summary.total_checks, 5);
        assert_eq!(summary.failed_checks, 1);
        assert_eq!(summary.passed_checks, 4);
        assert_eq!(summary.error_count, 2);
        assert_eq!(summary.overall_health, OverallHealth::Degraded);
        assert!((summary.confidence.unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(summary.top_issues, vec!["disk".to_string()]);
    }

    #[test]
    fn test_top_issues_by_confidence() {
        let verdicts = vec![
            verdict(VerdictKind::Fail, "unscored", None),
            verdict(VerdictKind::Fail, "low", None).with_confidence(0.2),
            verdict(VerdictKind::Warn, "warn", None).with_confidence(1.0),
            verdict(VerdictKind::Fail, "high", None).with_confidence(0.9),
        ];
        assert_eq!(top_issues(&verdicts, 10), vec!["high", "low", "unscored"]);
        assert_eq!(top_issues(&verdicts, 1), vec!["high"]);
    }

    #[test]
    fn test_collect_remediation_dedup_and_priority() {
        let step = |id: &str, priority| RemediationStep::new(id, id).with_priority(priority);
        let verdicts = vec![
            verdict(VerdictKind::Fail, "a", None).with_remediation(step("clean", 2)),
            verdict(VerdictKind::Warn, "b", None).with_remediation(step("clean", 1)),
            verdict(VerdictKind::Fail, "c", None).with_remediation(step("restart", 1)),
            verdict(VerdictKind::Pass, "d", None).with_remediation(step("ignored", 1)),
        ];
        let steps = collect_remediation(&verdicts);
        let ids: Vec<(&str, u32)> = steps.iter().map(|s| (s.id.as_str(), s.priority)).collect();
        assert_eq!(ids, vec![("restart", 1), ("clean", 2)]);
    }

    #[test]
    fn test_correlate_by_category() {
        let verdicts = vec![
            verdict(VerdictKind::Fail, "disk", Some("storage")),
            verdict(VerdictKind::Warn, "inodes", Some("storage")),
            verdict(VerdictKind::Fail, "cpu", Some("compute")),
            verdict(VerdictKind::Pass, "memory", Some("compute")),
        ];
        let insights = correlate_by_category(&verdicts);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].related, vec!["disk", "inodes"]);
        assert_eq!(insights[0].source, "engine");
    }

    #[test]
    fn test_sort_by_severity() {
        let mut verdicts = vec![
            verdict(VerdictKind::Pass, "a", None),
            verdict(VerdictKind::Fail, "b", None),
            verdict(VerdictKind::Warn, "c", None),
        ];
        sort_by_severity(&mut verdicts);
        let kinds: Vec<VerdictKind> = verdicts.iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![VerdictKind::Fail, VerdictKind::Warn, VerdictKind::Pass]);
    }
}
