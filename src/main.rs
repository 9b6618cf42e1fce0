//! rec-orchestrator: run certificate lifecycle actions from the command line
//!
//! ```text
//! rec-orchestrator --admin-key <KEY> run '{"type": "TRANSFER_CERTIFICATE", "data": {...}}'
//! rec-orchestrator --admin-key <KEY> run @action.json
//! rec-orchestrator --admin-key <KEY> batch actions.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use rec_orchestrator::{
    ActionDispatcher, ActionReport, Config, ConfigStore, FileConfigStore, InMemoryLedger,
    LogOnboarding,
};

const SEPARATOR: &str = "----------------------------------------------------------------";

#[derive(Parser)]
#[command(name = "rec-orchestrator")]
#[command(about = "Lifecycle orchestration for tokenized renewable energy certificates")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "rec-orchestrator.toml")]
    config: PathBuf,

    /// Administrative private key
    #[arg(long, env = "REC_ADMIN_KEY", hide_env_values = true)]
    admin_key: String,

    /// Ledger state file (overrides config file)
    #[arg(long, env = "REC_STATE_FILE")]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single action (inline JSON or @path)
    Run { action: String },
    /// Run every action in a JSON array file, in order
    Batch { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.logging.filter.parse()?),
        )
        .init();

    if let Some(state_file) = cli.state_file {
        config.ledger.state_file = state_file;
    }

    info!("Starting rec-orchestrator");
    info!("Ledger endpoint: {}", config.ledger.endpoint);
    info!("Ledger state: {}", config.ledger.state_file.display());
    info!("Contract config: {}", config.contracts.path.display());

    let ledger = Arc::new(InMemoryLedger::open(&config.ledger.state_file)?);
    let store = Arc::new(FileConfigStore::open(&config.contracts.path)?);
    let contracts = store.contracts().await?;
    ledger.bind_certificate_contract(&contracts.certificate_logic).await;
    let dispatcher = ActionDispatcher::new(ledger.clone(), store, Arc::new(LogOnboarding))
        .with_payment(config.payment.clone());

    let actions = match cli.command {
        Command::Run { action } => vec![read_action(&action)?],
        Command::Batch { file } => read_batch(&file)?,
    };

    let reports = dispatcher.dispatch_all(&actions, &cli.admin_key).await;
    for report in &reports {
        print_report(report)?;
    }

    ledger
        .save(&config.ledger.state_file)
        .await
        .with_context(|| format!("saving {}", config.ledger.state_file.display()))?;

    let failed = reports.iter().filter(|r| !r.success).count();
    if failed > 0 {
        eprintln!("Error: {} of {} actions failed", failed, reports.len());
        std::process::exit(1);
    }
    Ok(())
}

fn read_action(arg: &str) -> anyhow::Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path)),
        None => Ok(arg.to_string()),
    }
}

fn read_batch(path: &Path) -> anyhow::Result<Vec<String>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let descriptors: Vec<serde_json::Value> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of actions", path.display()))?;
    Ok(descriptors.iter().map(|d| d.to_string()).collect())
}

fn print_report(report: &ActionReport) -> anyhow::Result<()> {
    println!("{}", SEPARATOR);
    println!("{}", serde_json::to_string_pretty(report)?);
    println!("{}", SEPARATOR);
    Ok(())
}
