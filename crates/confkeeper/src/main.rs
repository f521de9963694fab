//! confkeeper CLI
//!
//! Inspect and drive a configuration directory from the command line. Every
//! invocation is one boot cycle: commands that write seed the history first,
//! exactly as a server would on startup.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use confkeeper::persistence::{FilePersistenceResource, PersistenceResource};
use confkeeper::{ConfigurationFile, InteractionPolicy, Settings, delete_scheduled_files};

#[derive(Parser)]
#[command(name = "confkeeper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Boot file selection, atomic commits and versioned history for configuration files")]
#[command(long_about = "Boot file selection, atomic commits and versioned history for configuration files.\n\n\
    Every invocation is one boot cycle. `boot`, `commit` and `snapshot` select the boot file\n\
    and seed the history first, so the previous `current/` directory is archived and version\n\
    numbering restarts: each `commit` invocation produces `current/{name}.v1.xml`.")]
struct Cli {
    /// Settings file (YAML). Missing file means defaults.
    #[arg(long, default_value = "confkeeper.yaml", value_name = "FILE")]
    config: PathBuf,

    /// Configuration directory
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Raw configuration file name
    #[arg(long, value_name = "NAME")]
    file: Option<String>,

    /// Alias or file to boot from (last, initial, boot, vN, snapshot prefix, file name)
    #[arg(long, value_name = "ALIAS")]
    name: Option<String>,

    /// Interaction policy (standard, discard, new, read-only)
    #[arg(long, value_name = "POLICY")]
    policy: Option<InteractionPolicy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved files and history settings
    Info,

    /// Select the boot file and seed the history
    Boot,

    /// Replace the configuration with the contents of SOURCE
    ///
    /// Boots first; the replaced configuration becomes version 1 of a fresh
    /// `current/` history. Read-only configurations write the history `last`
    /// file instead of the main file.
    Commit {
        /// File whose bytes become the new configuration
        source: PathBuf,
    },

    /// Take a snapshot of the current configuration
    ///
    /// Boots first. Read-only configurations snapshot the history `last` file.
    Snapshot,

    /// List snapshots as JSON
    Snapshots,

    /// Delete the snapshot starting with PREFIX, or every snapshot for `all`
    DeleteSnapshot {
        prefix: String,
    },
}

#[derive(Serialize)]
struct FileInfo<'a> {
    configuration_dir: &'a std::path::Path,
    main_file: &'a std::path::Path,
    last_file: &'a std::path::Path,
    history_root: &'a std::path::Path,
    snapshots_dir: &'a std::path::Path,
    policy: InteractionPolicy,
    current_history_length: u32,
    history_days: u32,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let result = run(Cli::parse());

    let leftover = delete_scheduled_files();
    if leftover > 0 {
        warn!(count = leftover, "Temp files left behind");
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(&cli.config)
        .with_context(|| format!("failed to load settings from {}", cli.config.display()))?;
    if let Some(dir) = cli.dir {
        settings.configuration_dir = dir;
    }
    if let Some(file) = cli.file {
        settings.file_name = file;
    }
    if cli.name.is_some() {
        settings.name = cli.name;
    }
    if let Some(policy) = cli.policy {
        settings.policy = policy;
    }

    let file = ConfigurationFile::with_settings(
        &settings.configuration_dir,
        &settings.file_name,
        settings.name.as_deref(),
        settings.policy,
        settings.history.with_env_overrides(),
    )
    .context("failed to resolve configuration file")?;
    let file = Arc::new(file);

    match cli.command {
        Commands::Info => {
            let history = file.history_settings();
            let info = FileInfo {
                configuration_dir: file.configuration_dir(),
                main_file: file.main_file(),
                last_file: file.last_file(),
                history_root: file.history_root(),
                snapshots_dir: file.snapshots_dir(),
                policy: file.interaction_policy(),
                current_history_length: history.current_history_length,
                history_days: history.history_days,
            };
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Boot => {
            let boot_file = boot(&file)?;
            println!("{}", boot_file.display());
        }
        Commands::Commit { source } => {
            let data = std::fs::read(&source)
                .with_context(|| format!("failed to read {}", source.display()))?;
            boot(&file)?;
            let mut resource = FilePersistenceResource::stage(Arc::clone(&file), &data)
                .context("failed to stage configuration")?;
            resource.commit().context("failed to commit configuration")?;
            info!(
                target_file = %file.commit_target().display(),
                version = file.sequence(),
                "Configuration committed"
            );
        }
        Commands::Snapshot => {
            boot(&file)?;
            let snapshot = file.snapshot().context("failed to take snapshot")?;
            println!("{}", snapshot.display());
        }
        Commands::Snapshots => {
            println!("{}", serde_json::to_string_pretty(&file.list_snapshots())?);
        }
        Commands::DeleteSnapshot { prefix } => {
            file.delete_snapshot(&prefix)
                .with_context(|| format!("failed to delete snapshot '{prefix}'"))?;
        }
    }
    Ok(())
}

fn boot(file: &ConfigurationFile) -> Result<PathBuf> {
    let boot_file = file.boot_file().context("failed to select boot file")?;
    file.successful_boot().context("failed to seed configuration history")?;
    Ok(boot_file)
}
