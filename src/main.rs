mod config;
mod destinations;
mod managers;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use managers::backup::BackupOrchestrator;
use managers::report::RunReport;
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(name = "backhaul")]
#[command(about = "Backs up folders and databases to remote storage destinations", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the JSON settings file
    #[arg(long, env = "BACKHAUL_SETTINGS", default_value = "/etc/backhaul/settings.json")]
    settings: PathBuf,

    /// Path to the target list file
    #[arg(long, env = "BACKHAUL_TARGETS", default_value = "/etc/backhaul/targets.list")]
    targets: PathBuf,

    /// Local staging directory for archives (overrides settings)
    #[arg(long, env = "BACKHAUL_BACKUP_DIR")]
    backup_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit_code = match run(cli).await {
        Ok(report) => {
            println!("{}", report.summary());
            if report.is_success() {
                println!("✓ Backup run completed");
                0
            } else {
                eprintln!("✗ Backup run completed with upload failures");
                1
            }
        }
        Err(e) => {
            error!("Fatal: {:#}", e);
            eprintln!("✗ Backup run aborted: {:#}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<RunReport> {
    // Load and validate configuration before touching anything remote
    let mut settings = config::load_settings(&cli.settings)
        .with_context(|| format!("Failed to load settings from {}", cli.settings.display()))?;
    let targets = config::load_targets(&cli.targets)
        .with_context(|| format!("Failed to load targets from {}", cli.targets.display()))?;

    if let Some(backup_dir) = cli.backup_dir {
        settings.backup_dir = backup_dir;
    }
    settings.backup_dir = config::expand_tilde(&settings.backup_dir);

    // Setup logging with file rotation (must keep guard alive)
    let logging_config = managers::logging::LoggingConfig::from_settings(&settings);
    let _log_guard = managers::logging::init_logging(&logging_config)?;

    tracing::info!(
        "Starting backup run: {} target(s), {} uploader entr(ies)",
        targets.len(),
        settings.uploaders.len()
    );

    // Construction failures abort before any destructive or billable work
    let destinations = destinations::build_destinations(&settings.uploaders)?;

    let mut orchestrator = BackupOrchestrator::new(settings, targets, destinations);
    orchestrator.run().await
}
