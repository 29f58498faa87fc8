//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::VerdictKind;
use crate::report::ReportFormat;
use clap::Parser;
use std::path::PathBuf;

/// bundlecheck - evaluate diagnostic bundles against declarative checks
///
/// Loads an extracted support bundle, runs the configured checks through
/// the local rules agent (and an optional remote analysis service) and
/// writes a Markdown or JSON report.
///
/// Examples:
///   bundlecheck --bundle ./support-bundle --checks checks.toml
///   bundlecheck --bundle ./support-bundle --format json --output report.json
///   bundlecheck --bundle ./support-bundle --remote-url http://analyzer:8080
///   bundlecheck --bundle ./support-bundle --fail-on warn
///   bundlecheck --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Extracted bundle directory to analyze
    #[arg(short, long, value_name = "DIR", required_unless_present = "init_config")]
    pub bundle: Option<PathBuf>,

    /// File with additional check definitions (TOML `[[checks]]` or JSON list)
    #[arg(long, value_name = "FILE")]
    pub checks: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .bundlecheck.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Agents to run (comma-separated); unknown names are reported as errors
    ///
    /// Example: --agents local,remote
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub agents: Option<Vec<String>>,

    /// Remote analysis service URL; registers the remote agent
    #[arg(long, value_name = "URL", env = "BUNDLECHECK_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: ReportFormat,

    /// Processing budget for the whole analysis in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Drop verdicts that declare a confidence below this value (0.0 - 1.0)
    #[arg(long, value_name = "VALUE")]
    pub confidence_threshold: Option<f64>,

    /// Include deduplicated remediation steps in the report
    #[arg(long)]
    pub remediation: bool,

    /// Leave remediation steps out of the report
    #[arg(long, conflicts_with = "remediation")]
    pub no_remediation: bool,

    /// Include agent insights and category correlations in the report
    #[arg(long)]
    pub insights: bool,

    /// Fail if verdicts at or above this level are found
    ///
    /// Useful for CI pipelines. Exit code 2 when threshold is reached.
    /// Values: warn, fail
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,

    /// Dry run: load the bundle and checks, list what would run, and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .bundlecheck.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Verdict level for --fail-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Warn,
    Fail,
}

impl FailOnLevel {
    pub fn kind(&self) -> VerdictKind {
        match self {
            FailOnLevel::Warn => VerdictKind::Warn,
            FailOnLevel::Fail => VerdictKind::Fail,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(threshold) = self.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err("Confidence threshold must be between 0.0 and 1.0".to_string());
            }
        }

        if let Some(url) = &self.remote_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Remote URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref bundle) = self.bundle {
            if !bundle.exists() {
                return Err(format!("Bundle directory does not exist: {}", bundle.display()));
            }
            if !bundle.is_dir() {
                return Err(format!("Bundle path is not a directory: {}", bundle.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            bundle: Some(std::env::temp_dir()),
            checks: None,
            config: None,
            agents: None,
            remote_url: None,
            output: None,
            format: ReportFormat::Markdown,
            timeout: None,
            confidence_threshold: None,
            remediation: false,
            no_remediation: false,
            insights: false,
            fail_on: None,
            dry_run: false,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "bundlecheck",
            "--bundle",
            "bundle",
            "--agents",
            "local,remote",
            "--format",
            "json",
            "--fail-on",
            "warn",
        ])
        .unwrap();
        assert_eq!(
            args.agents,
            Some(vec!["local".to_string(), "remote".to_string()])
        );
        assert_eq!(args.format, ReportFormat::Json);
        assert_eq!(args.fail_on.map(|l| l.kind()), Some(VerdictKind::Warn));
    }

    #[test]
    fn test_remediation_flags_conflict() {
        let args =
            Args::try_parse_from(["bundlecheck", "--bundle", "b", "--no-remediation"]).unwrap();
        assert!(args.no_remediation);
        assert!(Args::try_parse_from([
            "bundlecheck",
            "--bundle",
            "b",
            "--remediation",
            "--no-remediation",
        ])
        .is_err());
    }

    #[test]
    fn test_bundle_required_unless_init() {
        assert!(Args::try_parse_from(["bundlecheck"]).is_err());
        assert!(Args::try_parse_from(["bundlecheck", "--init-config"]).is_ok());
    }

    #[test]
    fn test_validation_missing_bundle() {
        let mut args = make_args();
        args.bundle = Some(PathBuf::from("/definitely/not/here"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_ranges() {
        let mut args = make_args();
        assert!(args.validate().is_ok());

        args.confidence_threshold = Some(1.5);
        assert!(args.validate().is_err());

        args.confidence_threshold = None;
        args.remote_url = Some("ftp://analyzer".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
