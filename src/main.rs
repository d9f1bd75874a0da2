//! # Caseflow — case workflow & notification dispatch engine
//!
//! Usage:
//!   caseflow run                       # Recover pending notifications and run the scheduler
//!   caseflow run --config ./cf.toml    # Custom config
//!   caseflow init-config               # Write the default config to ~/.caseflow/config.toml
//!   caseflow check-rules               # Compile routing/notification rules and print them

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use caseflow_channels::{ChannelRouter, InAppInbox};
use caseflow_core::CaseflowConfig;
use caseflow_service::CaseService;
use caseflow_store::{MemoryPreferences, SqliteStore};

#[derive(Parser)]
#[command(
    name = "caseflow",
    version,
    about = "🗂️ Caseflow — grievance case workflow and notification dispatch"
)]
struct Cli {
    /// Config file (default: ~/.caseflow/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the database path from the config
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatch scheduler until Ctrl-C
    Run {
        /// Tick interval in seconds (overrides the config)
        #[arg(long)]
        tick: Option<u64>,
    },
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate the config and print the compiled rules
    CheckRules,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(cli: &Cli) -> Result<CaseflowConfig> {
    let config = match &cli.config {
        Some(path) => CaseflowConfig::load_from(path)?,
        None => CaseflowConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "caseflow=debug,caseflow_service=debug,caseflow_workflow=debug,caseflow_scheduler=debug,caseflow_store=debug,caseflow_channels=debug"
    } else {
        "caseflow=info,caseflow_service=info,caseflow_workflow=info,caseflow_scheduler=info,caseflow_store=info,caseflow_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match &cli.command {
        Command::InitConfig { force } => init_config(&cli, *force),
        Command::CheckRules => check_rules(&cli),
        Command::Run { tick } => run(&cli, *tick).await,
    }
}

fn init_config(cli: &Cli, force: bool) -> Result<()> {
    let path = cli.config.clone().unwrap_or_else(CaseflowConfig::default_path);
    if path.exists() && !force {
        println!("⚠️  Config already exists at {} (use --force to overwrite)", path.display());
        return Ok(());
    }
    CaseflowConfig::default().save_to(&path)?;
    println!("✅ Default config written to {}", path.display());
    Ok(())
}

fn check_rules(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let service = CaseService::in_memory(&config, Arc::new(InAppInbox::new()))
        .context("config rejected")?;

    println!("🗂️ Caseflow rule check\n");
    println!("Committees:");
    for committee in service.list_committees() {
        println!(
            "   {:<16} {} ({} member(s))",
            committee.id,
            committee.name,
            committee.member_ids.len()
        );
    }
    println!("\nRouting rules (evaluation order):");
    for rule in service.list_routing_rules() {
        let state = if rule.active { "on " } else { "off" };
        println!(
            "   [{state}] {:>6}  {:<24} → {}",
            if rule.is_default { "-∞".to_string() } else { rule.priority.to_string() },
            rule.name,
            rule.target_committee_id
        );
        println!("          {}", serde_json::to_string(rule.predicate.condition())?);
    }
    println!("\nNotification rules:");
    for rule in service.list_notification_rules() {
        let state = if rule.enabled { "on " } else { "off" };
        println!(
            "   [{state}] {:<24} {:?} → {} for {:?}",
            rule.name, rule.trigger.event, rule.notification_type, rule.audience
        );
    }
    println!("\n✅ Config OK");
    Ok(())
}

async fn run(cli: &Cli, tick: Option<u64>) -> Result<()> {
    let mut config = load_config(cli)?;
    if let Some(secs) = tick {
        config.scheduler.tick_interval_secs = secs;
    }
    let db_path = expand_path(cli.db_path.as_deref().unwrap_or(&config.database_path));

    let store = Arc::new(SqliteStore::open(&db_path)?);
    let preferences = Arc::new(MemoryPreferences::from_list(config.preferences.iter().cloned())?);
    let inbox = Arc::new(InAppInbox::new());
    let channels = ChannelRouter::from_config(&config, inbox);
    tracing::info!("📡 Channels: {:?}", channels.channels());

    let service = CaseService::new(&config, store.clone(), store, preferences, Arc::new(channels))?;
    service.restore_committee_counts().await?;
    let task = service.start_scheduler().await?;

    println!("🗂️ Caseflow running (db: {})", db_path.display());
    println!("   Tick every {}s, Ctrl-C to stop", config.scheduler.tick_interval_secs);

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutdown requested");
    tokio::time::timeout(Duration::from_secs(30), task.stop())
        .await
        .context("scheduler did not stop within 30s")?;

    let metrics = service.dispatch_metrics();
    println!(
        "📊 Sent {}, failed {}, cancelled {}, retried {}",
        metrics.sent, metrics.failed, metrics.cancelled, metrics.retried
    );
    Ok(())
}
