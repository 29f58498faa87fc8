//! Report rendering.
//!
//! JSON is the interchange format; Markdown is a human-readable rendering
//! of the same report.

use crate::analysis::{generate_summary_text, group_by_category};
use crate::models::{AnalysisError, AnalysisMetadata, AnalysisReport, Insight, RemediationStep, Verdict, VerdictKind};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

/// Output format of a rendered report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Json,
    Markdown,
}

impl ReportFormat {
    /// File extension for reports in this format.
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Markdown => "md",
        }
    }
}

/// Render `report` in `format`.
pub fn render_report(report: &AnalysisReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => generate_json_report(report),
        ReportFormat::Markdown => Ok(generate_markdown_report(report)),
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &AnalysisReport) -> String {
    let mut output = String::new();

    output.push_str("# Bundle Analysis Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str("## Summary\n\n");
    output.push_str(&generate_summary_text(&report.summary));
    output.push_str("\n\n");

    if !report.summary.top_issues.is_empty() {
        output.push_str("### Top Issues\n\n");
        for title in &report.summary.top_issues {
            output.push_str(&format!("- {}\n", title));
        }
        output.push('\n');
    }

    output.push_str(&generate_verdicts_section(&report.verdicts));
    output.push_str(&generate_remediation_section(&report.remediation));
    output.push_str(&generate_insights_section(&report.insights));
    output.push_str(&generate_errors_section(&report.errors));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &AnalysisMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Engine Version:** {}\n", metadata.engine_version));
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n",
        metadata.duration_ms as f64 / 1000.0
    ));
    for run in &metadata.agents {
        section.push_str(&format!(
            "- **Agent `{}`:** {} ({} verdicts, {}ms)\n",
            run.name, run.status, run.verdict_count, run.duration_ms
        ));
    }
    if metadata.filtered_verdicts > 0 {
        section.push_str(&format!(
            "- **Filtered (low confidence):** {}\n",
            metadata.filtered_verdicts
        ));
    }
    section.push('\n');

    section
}

/// Generate the verdicts section, grouped by category.
fn generate_verdicts_section(verdicts: &[Verdict]) -> String {
    let mut section = String::new();

    section.push_str("## Verdicts\n\n");
    if verdicts.is_empty() {
        section.push_str("No checks produced a verdict.\n\n");
        return section;
    }

    let mut sorted = verdicts.to_vec();
    crate::analysis::sort_by_severity(&mut sorted);

    let grouped = group_by_category(&sorted);
    for (category, members) in &grouped {
        section.push_str(&format!("### {}\n\n", category));
        for verdict in members {
            section.push_str(&generate_verdict_line(verdict));
        }
        section.push('\n');
    }

    let uncategorized: Vec<&Verdict> = sorted.iter().filter(|v| v.category.is_none()).collect();
    if !uncategorized.is_empty() {
        if !grouped.is_empty() {
            section.push_str("### Other\n\n");
        }
        for verdict in uncategorized {
            section.push_str(&generate_verdict_line(verdict));
        }
        section.push('\n');
    }

    section
}

/// Generate a single verdict line.
fn generate_verdict_line(verdict: &Verdict) -> String {
    let badge = match verdict.kind {
        VerdictKind::Fail => "**FAIL**",
        VerdictKind::Warn => "**WARN**",
        VerdictKind::Pass => "PASS",
    };
    let mut line = format!(
        "- {} {} {}: {}",
        verdict.kind.emoji(),
        badge,
        verdict.title,
        verdict.message
    );
    if let Some(uri) = &verdict.uri {
        line.push_str(&format!(" ([docs]({}))", uri));
    }
    if !verdict.agent.is_empty() {
        line.push_str(&format!(" *({})*", verdict.agent));
    }
    line.push('\n');
    line
}

/// Generate the remediation section.
fn generate_remediation_section(steps: &[RemediationStep]) -> String {
    if steps.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Remediation\n\n");
    for (i, step) in steps.iter().enumerate() {
        section.push_str(&format!(
            "{}. **[P{}]** {}\n",
            i + 1,
            step.priority,
            step.description
        ));
        if let Some(command) = &step.command {
            section.push_str(&format!("   `{}`\n", command));
        }
        if let Some(docs) = &step.documentation {
            section.push_str(&format!("   See: {}\n", docs));
        }
    }
    section.push('\n');

    section
}

/// Generate the insights section.
fn generate_insights_section(insights: &[Insight]) -> String {
    if insights.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Insights\n\n");
    for insight in insights {
        section.push_str(&format!("### {}\n\n{}\n\n", insight.title, insight.description));
        if !insight.related.is_empty() {
            section.push_str(&format!("*Related: {}*\n\n", insight.related.join(", ")));
        }
    }

    section
}

/// Generate the errors section.
fn generate_errors_section(errors: &[AnalysisError]) -> String {
    if errors.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Errors\n\n");
    section.push_str("| Agent | Check | Category | Error |\n");
    section.push_str("|:---|:---|:---|:---|\n");
    for error in errors {
        section.push_str(&format!(
            "| {} | {} | {:?} | {} |\n",
            error.agent,
            error.check.as_deref().unwrap_or("-"),
            error.category,
            error.error.replace('|', "\\|")
        ));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    "---\n\n*Report generated by bundlecheck*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &AnalysisReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report")
}

/// Render and write the report to a file.
pub fn write_report(report: &AnalysisReport, format: ReportFormat, path: &Path) -> Result<()> {
    let content = render_report(report, format)?;

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::build_summary;
    use crate::models::{AgentRun, AgentRunStatus, AnalysisOptions, ErrorCategory};
    use chrono::Utc;

    fn create_test_report() -> AnalysisReport {
        let verdicts = vec![
            Verdict::fail("Disk Usage", "95% used")
                .with_category("storage")
                .with_remediation(RemediationStep::new("free-disk", "Free disk space")),
            Verdict::pass("Kernel", "kernel ok"),
        ];
        let summary = build_summary(&verdicts, 1, vec!["local".to_string()]);
        AnalysisReport {
            remediation: crate::analysis::collect_remediation(&verdicts),
            verdicts,
            summary,
            insights: vec![],
            errors: vec![AnalysisError {
                agent: "remote".to_string(),
                check: None,
                error: "Cannot connect".to_string(),
                category: ErrorCategory::Agent,
                timestamp: Utc::now(),
                recoverable: false,
            }],
            metadata: AnalysisMetadata {
                started_at: Utc::now(),
                duration_ms: 1500,
                engine_version: "1.0.0".to_string(),
                options: AnalysisOptions::default(),
                agents: vec![AgentRun {
                    name: "local".to_string(),
                    version: String::new(),
                    capabilities: vec!["rules".to_string()],
                    status: AgentRunStatus::Succeeded,
                    duration_ms: 3,
                    verdict_count: 2,
                    error_count: 0,
                }],
                filtered_verdicts: 0,
            },
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# Bundle Analysis Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("Overall Health: CRITICAL"));
        assert!(markdown.contains("### storage"));
        assert!(markdown.contains("**FAIL** Disk Usage: 95% used"));
        assert!(markdown.contains("### Other"));
        assert!(markdown.contains("## Remediation"));
        assert!(markdown.contains("| remote | - | Agent | Cannot connect |"));
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"overallHealth\": \"CRITICAL\""));
        assert!(json.contains("\"failedChecks\": 1"));
        assert!(json.contains("\"verdicts\""));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.md");
        write_report(&create_test_report(), ReportFormat::Markdown, &path).unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.starts_with("# Bundle Analysis Report"));
    }
}
