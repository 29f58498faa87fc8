//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.bundlecheck.toml` files, and loading standalone check files.

use crate::agent::RemoteConfig;
use crate::checks::CheckSpec;
use crate::models::{AnalysisOptions, OutcomeRule, RemediationStep};
use crate::report::ReportFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".bundlecheck.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Scanner settings.
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Remote agent settings.
    #[serde(default)]
    pub remote: RemoteSection,

    /// Checks run by the local rules agent.
    #[serde(default)]
    pub checks: Vec<CheckSpec>,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

const DEFAULT_REPORT_STEM: &str = "bundlecheck_report";

fn default_output() -> String {
    format!("{}.{}", DEFAULT_REPORT_STEM, ReportFormat::Markdown.extension())
}

/// Analysis engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Explicit agent subset.
    #[serde(default)]
    pub agents: Vec<String>,

    /// Agents to prefer when available.
    #[serde(default)]
    pub preferred_agents: Vec<String>,

    /// Agent listed first when running all agents.
    #[serde(default)]
    pub default_agent: Option<String>,

    #[serde(default = "default_true")]
    pub include_remediation: bool,

    #[serde(default)]
    pub generate_insights: bool,

    /// Verdicts declaring a lower confidence are dropped.
    #[serde(default)]
    pub confidence_threshold: f64,

    /// Processing budget in seconds (0 = unbounded).
    #[serde(default)]
    pub max_processing_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            preferred_agents: Vec::new(),
            default_agent: None,
            include_remediation: true,
            generate_insights: false,
            confidence_threshold: 0.0,
            max_processing_seconds: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

impl EngineConfig {
    /// Analysis options for one engine call.
    pub fn analysis_options(&self) -> AnalysisOptions {
        AnalysisOptions {
            agents: self.agents.clone(),
            preferred_agents: self.preferred_agents.clone(),
            include_remediation: self.include_remediation,
            generate_insights: self.generate_insights,
            confidence_threshold: self.confidence_threshold,
            max_processing_time: (self.max_processing_seconds > 0)
                .then(|| Duration::from_secs(self.max_processing_seconds)),
            checks: Vec::new(),
        }
    }
}

/// Bundle scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Directory names or glob patterns to skip.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    /// Maximum file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum files to load (0 = unlimited).
    #[serde(default)]
    pub max_files: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            excludes: default_excludes(),
            max_file_size: default_max_file_size(),
            max_files: 0,
        }
    }
}

fn default_excludes() -> Vec<String> {
    vec![".git", "**/*.tar.gz", "**/*.tgz"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

/// Remote analysis service settings. The remote agent is registered only
/// when a URL is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSection {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_remote_name")]
    pub name: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            url: None,
            name: default_remote_name(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_remote_name() -> String {
    "remote".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl RemoteSection {
    pub fn agent_config(&self) -> Option<RemoteConfig> {
        let url = self.url.as_deref().filter(|u| !u.trim().is_empty())?;
        Some(RemoteConfig {
            name: self.name.clone(),
            url: url.to_string(),
            timeout_seconds: self.timeout_seconds,
        })
    }
}

/// Standalone check file in TOML form.
#[derive(Debug, Deserialize)]
struct ChecksFile {
    #[serde(default)]
    checks: Vec<CheckSpec>,
}

/// Load check definitions from a `.json` list or a TOML file with
/// `[[checks]]` tables.
pub fn load_checks(path: &Path) -> Result<Vec<CheckSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read checks file: {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse checks file: {}", path.display()))
    } else {
        let file: ChecksFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse checks file: {}", path.display()))?;
        Ok(file.checks)
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.to_string_lossy().to_string();
        } else if self.general.output == default_output() {
            // Default report name follows the chosen format
            self.general.output = format!("{}.{}", DEFAULT_REPORT_STEM, args.format.extension());
        }

        if let Some(ref agents) = args.agents {
            self.engine.agents = agents.clone();
        }
        if let Some(timeout) = args.timeout {
            self.engine.max_processing_seconds = timeout;
        }
        if let Some(threshold) = args.confidence_threshold {
            self.engine.confidence_threshold = threshold;
        }

        if let Some(ref url) = args.remote_url {
            self.remote.url = Some(url.clone());
        }

        // Flags always override
        if args.remediation {
            self.engine.include_remediation = true;
        }
        if args.no_remediation {
            self.engine.include_remediation = false;
        }
        if args.insights {
            self.engine.generate_insights = true;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content, with one example check.
    pub fn default_toml() -> String {
        let mut config = Config::default();
        config.checks.push(example_check());
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

fn example_check() -> CheckSpec {
    use crate::checks::{FieldCheck, FieldKind, FieldSpec};

    let field = |path: &str| FieldSpec {
        path: path.to_string(),
        kind: FieldKind::Quantity,
        levels: Vec::new(),
    };
    CheckSpec::Field(FieldCheck {
        name: "disk-usage".to_string(),
        title: "Disk Usage".to_string(),
        category: Some("storage".to_string()),
        file: "host-collectors/system/disk.json".to_string(),
        collection: None,
        item_name: None,
        fields: [
            ("used".to_string(), field("used")),
            ("total".to_string(), field("total")),
        ]
        .into_iter()
        .collect(),
        default_field: None,
        outcomes: vec![
            OutcomeRule::fail("used/total >= 90%", "Disk is {{ .used }} of {{ .total }} bytes"),
            OutcomeRule::warn("used/total >= 80%", "Disk usage is above 80%"),
            OutcomeRule::pass("", "Disk usage is fine"),
        ],
        remediation: Some(
            RemediationStep::new("free-disk", "Free disk space on the host").with_priority(1),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::Check;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.output, "bundlecheck_report.md");
        assert!(config.engine.include_remediation);
        assert!(config.scanner.excludes.contains(&".git".to_string()));
        assert!(config.remote.agent_config().is_none());
        assert!(config.engine.analysis_options().max_processing_time.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "custom_report.json"
verbose = true

[engine]
preferred_agents = ["remote"]
confidence_threshold = 0.5
max_processing_seconds = 30

[remote]
url = "http://analyzer:8080"

[[checks]]
type = "field"
name = "memory"
file = "host/memory.json"
defaultField = "available"

[checks.fields.available]
path = "available"
kind = "quantity"

[[checks.outcomes]]
[checks.outcomes.fail]
when = "< 1Gi"
message = "low memory"

[[checks.outcomes]]
[checks.outcomes.pass]
message = "memory ok"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "custom_report.json");
        assert!(config.general.verbose);

        let options = config.engine.analysis_options();
        assert_eq!(options.preferred_agents, vec!["remote"]);
        assert_eq!(options.confidence_threshold, 0.5);
        assert_eq!(options.max_processing_time, Some(Duration::from_secs(30)));

        let remote = config.remote.agent_config().unwrap();
        assert_eq!(remote.url, "http://analyzer:8080");
        assert_eq!(remote.timeout_seconds, 120);

        assert_eq!(config.checks.len(), 1);
        assert_eq!(config.checks[0].name(), "memory");
        config.checks[0].validate().unwrap();
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[scanner]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.checks.len(), 1);
        assert_eq!(parsed.checks[0], example_check());
    }

    #[test]
    fn test_merge_with_args() {
        use crate::cli::Args;
        use clap::Parser;

        let args = Args::try_parse_from([
            "bundlecheck",
            "--bundle",
            "b",
            "--format",
            "json",
            "--no-remediation",
        ])
        .unwrap();
        let mut config = Config::default();
        config.merge_with_args(&args);
        assert_eq!(config.general.output, "bundlecheck_report.json");
        assert!(!config.engine.include_remediation);

        let args = Args::try_parse_from([
            "bundlecheck",
            "--bundle",
            "b",
            "--format",
            "json",
            "-o",
            "out.txt",
        ])
        .unwrap();
        let mut config = Config::default();
        config.merge_with_args(&args);
        assert_eq!(config.general.output, "out.txt");
        assert!(config.engine.include_remediation);
    }

    #[test]
    fn test_load_checks_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"[{{"type": "aggregate", "name": "nodes", "file": "nodes.json",
                "outcomes": [{{"fail": {{"when": "count() < 3", "message": "too few"}}}}]}}]"#
        )
        .unwrap();
        let checks = load_checks(file.path()).unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].name(), "nodes");
    }
}
