//! bundlecheck - declarative checks over collected support bundles
//!
//! Loads an extracted bundle directory, runs the configured checks through
//! the analysis engine and writes a Markdown or JSON report.
//!
//! Exit codes:
//!   0 - Success (no verdicts at the --fail-on level, or no --fail-on set)
//!   1 - Runtime error (bundle, config, every agent failed, etc.)
//!   2 - Verdicts found at or above the --fail-on level

use anyhow::{Context, Result};
use bundlecheck::agent::{RemoteAgent, RuleAgent};
use bundlecheck::bundle::Bundle;
use bundlecheck::checks::{Check, CheckSpec};
use bundlecheck::cli::Args;
use bundlecheck::config::{self, Config, CONFIG_FILE};
use bundlecheck::engine::{AnalysisContext, Engine};
use bundlecheck::models::{AnalysisReport, VerdictKind};
use bundlecheck::report;
use bundlecheck::scanner::{BundleScanner, ScanConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("bundlecheck v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .bundlecheck.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to add checks, agents, excludes, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete analysis workflow. Returns exit code (0 or 2).
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let checks = collect_checks(&config, args.checks.as_deref())?;
    let bundle_dir = args
        .bundle
        .clone()
        .context("--bundle is required")?;

    // Step 1: Load the bundle
    println!("📥 Loading bundle: {}", bundle_dir.display());
    let scan_config = ScanConfig::from(&config.scanner);
    let bundle = BundleScanner::new(bundle_dir, scan_config).load()?;
    println!("   {} files loaded", bundle.len());

    if args.dry_run {
        return handle_dry_run(&bundle, &checks);
    }

    // Step 2: Register agents
    let engine = build_engine(&config, checks)?;
    println!("🤖 Agents: {}", engine.list_agents().join(", "));

    // Step 3: Run the analysis, cancelling on Ctrl-C
    let (ctx, cancel) = AnalysisContext::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling analysis");
            cancel.cancel();
        }
    });

    let spinner = create_spinner(args.quiet);
    let options = config.engine.analysis_options();
    let result = engine.analyze(&ctx, Some(Arc::new(bundle)), options).await;
    spinner.finish_and_clear();
    let report = result?;

    // Step 4: Write the report
    let output = PathBuf::from(&config.general.output);
    report::write_report(&report, args.format, &output)
        .with_context(|| format!("Failed to write report to {}", output.display()))?;

    print_summary(&report);
    println!("\n✅ Analysis complete! Report saved to: {}", output.display());

    // Check --fail-on threshold
    if let Some(level) = args.fail_on {
        if report.has_at_least(level.kind()) {
            eprintln!(
                "\n⛔ Verdicts found at or above {} level. Failing (exit code 2).",
                level.kind()
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Checks from the config file plus the optional --checks file.
fn collect_checks(config: &Config, checks_file: Option<&Path>) -> Result<Vec<CheckSpec>> {
    let mut checks = config.checks.clone();
    if let Some(path) = checks_file {
        let extra = config::load_checks(path)?;
        info!("Loaded {} checks from {}", extra.len(), path.display());
        checks.extend(extra);
    }
    if checks.is_empty() {
        warn!("No checks configured; the local agent will produce no verdicts");
    }
    Ok(checks)
}

/// Register the local rules agent and, when configured, the remote agent.
fn build_engine(config: &Config, checks: Vec<CheckSpec>) -> Result<Engine> {
    let engine = Engine::new();

    let rules = RuleAgent::new(checks).context("Invalid check definition")?;
    engine.register(Arc::new(rules))?;

    if let Some(remote_config) = config.remote.agent_config() {
        info!("Remote analysis service at {}", remote_config.url);
        let remote = RemoteAgent::new(remote_config)?;
        engine.register(Arc::new(remote))?;
    }

    if let Some(ref name) = config.engine.default_agent {
        engine.set_default_agent(name)?;
    }

    Ok(engine)
}

fn create_spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Running analysis...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Handle --dry-run: list bundle files and checks, then exit.
fn handle_dry_run(bundle: &Bundle, checks: &[CheckSpec]) -> Result<i32> {
    println!("\n🔍 Dry run: no agents will be called.\n");

    println!("   Bundle files ({}):", bundle.len());
    for path in bundle.paths() {
        println!("     📄 {}", path);
    }

    println!("\n   Checks ({}):", checks.len());
    for check in checks {
        match check.validate() {
            Ok(()) => println!("     ✔ {}", check.name()),
            Err(e) => println!("     ✘ {} ({})", check.name(), e),
        }
    }

    println!("\n✅ Dry run complete.");
    Ok(0)
}

fn print_summary(report: &AnalysisReport) {
    let summary = &report.summary;
    println!("\n📊 Analysis Summary:");
    println!("   Overall health: {}", summary.overall_health);
    println!(
        "   - {} Fail: {} | {} Warn: {} | {} Pass: {}",
        VerdictKind::Fail.emoji(),
        summary.failed_checks,
        VerdictKind::Warn.emoji(),
        summary.warning_checks,
        VerdictKind::Pass.emoji(),
        summary.passed_checks
    );
    if !report.errors.is_empty() {
        println!("   Errors: {}", report.errors.len());
    }
    println!("   Duration: {:.1}s", report.metadata.duration_ms as f64 / 1000.0);
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
