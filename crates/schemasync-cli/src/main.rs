use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use schemasync_catalog::{CatalogAdapter, PostgresCatalog};
use schemasync_core::{
    load_registry, Config, MigrationSource, OperationOutcome, ReconciliationReport, RegistrySnapshot,
    SafetyLabel, SyncMode,
};
use schemasync_engine::{
    run_on_startup, LegacyBridge, ReconcileError, ReconcileOptions, Reconciler, StartupOutcome,
    Verification, Verifier,
};

/// SchemaSync - Declarative schema reconciliation for PostgreSQL
#[derive(Parser)]
#[command(name = "schemasync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: schemasync.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding feature-module manifests (overrides models_dir)
    #[arg(short, long, global = true)]
    models: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the database with the declared models
    Sync {
        /// Override the configured mode (safe or full)
        #[arg(long)]
        mode: Option<SyncMode>,
    },

    /// Check for drift without changing anything
    Verify {
        /// Output file for report.json
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also output markdown report
        #[arg(long)]
        markdown: Option<PathBuf>,
    },

    /// Show what a sync would do
    Plan {
        /// Mode to plan for (default: the configured mode)
        #[arg(long)]
        mode: Option<SyncMode>,
    },

    /// Apply outstanding legacy migration files
    InitLegacy {
        /// Migrations directory (overrides legacy.migrations_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.models, cli.verbose)?;

    if cli.verbose {
        eprintln!(
            "{} environment: {}, mode: {}",
            "Using".cyan(),
            config.sync.environment,
            config.sync.mode()
        );
    }

    match cli.command {
        Commands::Sync { mode } => sync_command(config, mode).await,
        Commands::Verify { output, markdown } => {
            verify_command(&config, output.as_deref(), markdown.as_deref()).await
        }
        Commands::Plan { mode } => plan_command(&config, mode).await,
        Commands::InitLegacy { dir } => init_legacy_command(&config, dir, cli.verbose).await,
    }
}

/// Log to stderr, honouring RUST_LOG
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Read the config file if present, then apply environment overrides
fn load_config(path: Option<&Path>, models: Option<PathBuf>, verbose: bool) -> Result<Config> {
    let mut config = if let Some(config_path) = path {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else if Path::new("schemasync.toml").exists() {
        Config::from_file(Path::new("schemasync.toml"))?
    } else {
        if verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    config.apply_env()?;

    if let Some(models) = models {
        config.models_dir = models;
    }

    Ok(config)
}

fn load_snapshot(config: &Config) -> Result<RegistrySnapshot> {
    let models = config.models_path();
    let registry = load_registry(&models)
        .with_context(|| format!("Failed to load models from {}", models.display()))?;
    Ok(registry.snapshot())
}

fn connect(config: &Config) -> Result<PostgresCatalog> {
    let catalog = PostgresCatalog::from_config(&config.database)?
        .with_history_table(config.legacy.history_table.clone());
    Ok(catalog)
}

/// Sync command - the startup hook as a standalone step
async fn sync_command(mut config: Config, mode: Option<SyncMode>) -> Result<()> {
    if let Some(mode) = mode {
        config.sync.safe_mode = Some(mode == SyncMode::Safe);
    }

    let registry = load_snapshot(&config)?;
    let adapter: Arc<dyn CatalogAdapter> = Arc::new(connect(&config)?);
    let options = ReconcileOptions::from_config(&config);

    match run_on_startup(&config.sync, adapter, registry, options).await {
        Ok(StartupOutcome::Disabled) => {
            println!("{}", "Schema sync is disabled".yellow());
            Ok(())
        }
        Ok(StartupOutcome::Completed(report)) => {
            print_report_summary("Schema Sync Report", &report, false);
            Ok(())
        }
        Ok(StartupOutcome::Degraded(error)) => {
            if let Some(report) = error.report() {
                print_report_summary("Schema Sync Report", report, false);
            }
            eprintln!("{} {}", "Sync failed, continuing (development):".yellow().bold(), error);
            Ok(())
        }
        Err(error) => {
            if let Some(report) = error.report() {
                print_report_summary("Schema Sync Report", report, false);
            }
            eprintln!("{} {}", "Sync failed:".red().bold(), error);
            std::process::exit(1);
        }
    }
}

/// Verify command - drift gate for CI and deployment pipelines
async fn verify_command(config: &Config, output: Option<&Path>, markdown: Option<&Path>) -> Result<()> {
    let verification = match (load_snapshot(config), connect(config)) {
        (Ok(registry), Ok(catalog)) => {
            let verifier = Verifier::new(Arc::new(catalog), registry, ReconcileOptions::from_config(config));
            verifier.verify().await
        }
        (Err(e), _) | (_, Err(e)) => Verification {
            drift_found: false,
            report: None,
            failure: Some(format!("{:#}", e)),
        },
    };

    if let Some(report) = &verification.report {
        if let Some(path) = output {
            report.save_to_file(path)?;
            eprintln!("{} {}", "Report saved to:".green(), path.display());
        }

        if let Some(md_path) = markdown {
            std::fs::write(md_path, generate_markdown_report(report))?;
            eprintln!("{} {}", "Markdown report saved to:".green(), md_path.display());
        }

        print_report_summary("Schema Drift Verification", report, true);
    }

    if let Some(failure) = &verification.failure {
        eprintln!("{} {}", "Verification failed:".red().bold(), failure);
    } else if verification.drift_found {
        println!("{}", "✗ Drift detected".red().bold());
    }

    let code = verification.exit_code();
    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

/// Plan command - print the would-be report and its SQL
async fn plan_command(config: &Config, mode: Option<SyncMode>) -> Result<()> {
    let mode = mode.unwrap_or_else(|| config.sync.mode());
    let registry = load_snapshot(config)?;
    let reconciler = Reconciler::new(
        Arc::new(connect(config)?),
        registry,
        ReconcileOptions::from_config(config),
    );

    let report = reconciler.plan(mode).await?;
    print_report_summary("Schema Sync Plan", &report, true);

    if mode == SyncMode::Safe && report.has_destructive() {
        println!(
            "{}",
            "Destructive operations are not applied in safe mode; run `schemasync sync --mode full` to apply them."
                .yellow()
        );
    }

    Ok(())
}

/// Init-legacy command - one-time handoff from migration files
async fn init_legacy_command(config: &Config, dir: Option<PathBuf>, verbose: bool) -> Result<()> {
    let dir = dir
        .map(|d| config.resolve(&d))
        .unwrap_or_else(|| config.migrations_path());

    if verbose {
        eprintln!("{} {}", "Loading migrations from:".cyan(), dir.display());
    }

    let source = MigrationSource::from_dir(&dir)
        .with_context(|| format!("Failed to load legacy migrations from {}", dir.display()))?;
    let bridge = LegacyBridge::new(Arc::new(connect(config)?), source, ReconcileOptions::from_config(config));

    let status = bridge.status().await?;
    println!("{}", "Legacy migrations".bold());
    println!("  Found:           {}", bridge.source().len());
    println!("  Already applied: {}", status.applied.len() + status.modified.len());
    println!("  Pending:         {}", status.pending.len());
    for migration in &status.pending {
        println!("    - {}", migration.label().yellow());
    }
    for (_, migration) in &status.modified {
        println!("  {} {} changed since it was applied", "⚠".yellow(), migration.label());
    }
    println!();

    match bridge.run().await {
        Ok(report) if report.is_noop() => {
            println!("{}", "✓ No pending legacy migrations".green());
            Ok(())
        }
        Ok(report) => {
            println!(
                "{} applied {} migrations in {}ms",
                "✓".green(),
                report.applied.len(),
                report.duration_ms
            );
            for label in &report.applied {
                println!("    {}", label.green());
            }
            Ok(())
        }
        Err(ReconcileError::LegacyBridge {
            migration,
            applied,
            reason,
        }) => {
            eprintln!("{} {}: {}", "Legacy migration failed:".red().bold(), migration, reason);
            eprintln!();
            eprintln!("{}", manual_intervention(&migration, &applied, &config.legacy.history_table));
            std::process::exit(1);
        }
        Err(error) => Err(error.into()),
    }
}

/// Recovery steps printed after a failed legacy migration
fn manual_intervention(migration: &str, applied: &[String], history_table: &str) -> String {
    let mut text = String::from("Manual intervention required:\n");
    if applied.is_empty() {
        text.push_str("  No migrations were applied by this run.\n");
    } else {
        text.push_str(&format!("  Applied before the failure: {}\n", applied.join(", ")));
    }
    text.push_str(&format!("  1. Inspect and fix migration {} (it was rolled back).\n", migration));
    text.push_str(&format!(
        "  2. If the change is already in place, record it in {} by hand.\n",
        history_table
    ));
    text.push_str("  3. Re-run `schemasync init-legacy`; recorded migrations are skipped.\n");
    text
}

/// Print report summary to stdout
fn print_report_summary(title: &str, report: &ReconciliationReport, show_sql: bool) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", title.bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Version: {}", report.version);
    println!("Timestamp: {}", report.timestamp);
    println!("Mode: {}", report.mode);
    if !report.provenance.database.is_empty() {
        println!(
            "Database: {} ({})",
            report.provenance.database, report.provenance.adapter
        );
    }
    println!();

    let summary = report.summary();
    println!("{}", "Summary:".bold());
    println!("  Total operations: {}", summary.total);
    println!("  Additive:    {}", summary.additive.to_string().green());
    if summary.destructive > 0 {
        println!("  Destructive: {}", summary.destructive.to_string().red().bold());
    } else {
        println!("  Destructive: {}", summary.destructive.to_string().green());
    }
    println!("  Applied: {}  Skipped: {}  Failed: {}", summary.applied, summary.skipped, summary.failed);
    println!();

    if report.in_sync {
        println!("{}", "✓ Schema is in sync!".green().bold());
    } else {
        println!("{}", "Operations:".bold());
        for entry in &report.operations {
            let label = match entry.label {
                SafetyLabel::Additive => "ADDITIVE".green(),
                SafetyLabel::Destructive => "DESTRUCTIVE".red().bold(),
            };
            let outcome = match entry.outcome {
                OperationOutcome::Applied => "applied".green(),
                OperationOutcome::Skipped => "skipped".yellow(),
                OperationOutcome::Failed => "failed".red().bold(),
                OperationOutcome::Pending => "pending".normal(),
            };

            println!("  [{}] {} ({})", label, entry.operation, outcome);
            println!("    {}", entry.reason.dimmed());
            if show_sql {
                for statement in &entry.statements {
                    println!("    {}", statement.cyan());
                }
            }
        }
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}

/// Generate markdown report
fn generate_markdown_report(report: &ReconciliationReport) -> String {
    let mut md = String::new();

    md.push_str("# Schema Drift Report\n\n");
    md.push_str(&format!("**Version:** {}\n\n", report.version));
    md.push_str(&format!("**Timestamp:** {}\n\n", report.timestamp));
    md.push_str(&format!("**Mode:** {}\n\n", report.mode));

    let summary = report.summary();
    md.push_str("## Summary\n\n");
    md.push_str(&format!("- Total operations: {}\n", summary.total));
    md.push_str(&format!("- Additive: {}\n", summary.additive));
    md.push_str(&format!("- Destructive: {}\n", summary.destructive));
    md.push('\n');

    if report.in_sync {
        md.push_str("✅ **Schema is in sync!**\n");
        return md;
    }

    md.push_str("## Operations\n\n");
    for entry in &report.operations {
        let emoji = match entry.label {
            SafetyLabel::Additive => "➕",
            SafetyLabel::Destructive => "⚠️",
        };

        md.push_str(&format!("### {} {} - {}\n\n", emoji, entry.label, entry.operation));
        md.push_str(&format!("{}\n\n", entry.reason));

        if !entry.statements.is_empty() {
            md.push_str("```sql\n");
            for statement in &entry.statements {
                md.push_str(statement);
                md.push_str(";\n");
            }
            md.push_str("```\n\n");
        }
    }

    md
}
