use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use custody_engine::{EmergencyState, Treasury, TreasuryConfig, TreasuryState};
use custody_types::Category;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "custody", version, about = "Treasury custody core operator tool")]
struct Cli {
    /// Treasury configuration file.
    #[arg(short, long, global = true, default_value = "custody.toml", env = "CUSTODY_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a documented sample configuration
    Init {
        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Show owners, balances, pending operations, timelocks and pause state
    Status,
    /// Check the audit chain, the allocation and fund conservation
    Verify,
    /// Print audit records as JSON lines
    Audit {
        /// Only the most recent N records.
        #[arg(long)]
        tail: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "custody=info".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init { force } => init(&cli.config, force),
        Commands::Status => status(&open(&cli.config)?),
        Commands::Verify => verify(&open(&cli.config)?),
        Commands::Audit { tail } => audit(&open(&cli.config)?, tail),
    }
}

fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    fs::write(path, TreasuryConfig::sample())
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "Sample configuration written");
    println!("wrote {}", path.display());
    Ok(())
}

/// Load the configuration and open (or initialize) the treasury state it points at.
fn open(path: &Path) -> anyhow::Result<Treasury> {
    let config =
        TreasuryConfig::load(path).with_context(|| format!("loading {}", path.display()))?;
    let treasury = Treasury::builder(config)
        .build()
        .context("opening treasury state")?;
    Ok(treasury)
}

fn status(treasury: &Treasury) -> anyhow::Result<()> {
    let state = treasury.snapshot()?;
    let logic = treasury.active_logic()?;

    println!("treasury      {}", state.treasury_account);
    println!("logic         {logic}");
    println!("upgrades by   {}", state.upgrades.authority());
    match state.emergency.state() {
        EmergencyState::Active => println!("state         active"),
        EmergencyState::Paused { since, by, reason } => {
            println!("state         PAUSED since {since} by {by}: {reason}")
        }
    }

    print_owners(&state);
    print_balances(&state);

    let pending = state.auth.pending_operations();
    println!("\npending operations ({})", pending.len());
    for op in pending {
        println!(
            "  {}  {} value={} confirmations={}/{}",
            op.id,
            op.destination,
            op.value,
            state.auth.confirmation_count(op.id)?,
            state.auth.required_for(op),
        );
    }

    let timelocks: Vec<_> = state.spending.timelocks().collect();
    println!("\ntimelocks ({})", timelocks.len());
    for (key, entry) in timelocks {
        println!(
            "  {}  {} {} from {} to {} matures {}",
            &key[..12.min(key.len())],
            entry.amount,
            entry.asset,
            entry.category,
            entry.recipient,
            entry.matures_at,
        );
    }

    println!("\naudit records {}", state.ledger.records().len());
    Ok(())
}

fn print_owners(state: &TreasuryState) {
    let owners: Vec<String> = state.auth.owners().iter().map(ToString::to_string).collect();
    println!(
        "\nowners ({}, default quorum {})  {}",
        owners.len(),
        state.auth.required(),
        owners.join(", ")
    );
    for tier in state.auth.tiers().tiers().iter().rev() {
        println!(
            "  value >= {:<12} requires {}",
            tier.min_value, tier.required_signatures
        );
    }
}

fn print_balances(state: &TreasuryState) {
    println!("\nbalances");
    let balances = state.ledger.balances();
    let mut any = false;
    for asset in balances.assets() {
        any = true;
        let split = balances.balances_for(asset);
        let parts: Vec<String> = Category::ALL
            .iter()
            .map(|category| format!("{category}={}", split.get(*category)))
            .collect();
        println!("  {asset:<8} {}", parts.join(" "));
    }
    if !any {
        println!("  (none)");
    }
}

fn verify(treasury: &Treasury) -> anyhow::Result<()> {
    treasury.verify().context("integrity check failed")?;
    let records = treasury.records()?.len();
    println!("ok: {records} audit records, hash chain intact, category balances conserved");
    Ok(())
}

fn audit(treasury: &Treasury, tail: Option<usize>) -> anyhow::Result<()> {
    let records = treasury.records()?;
    let skip = tail.map_or(0, |n| records.len().saturating_sub(n));
    for record in records.iter().skip(skip) {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(())
}
