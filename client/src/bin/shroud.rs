use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shroud_client::rpc::JsonRpcLedger;
use shroud_client::{
    ActionCoordinator, Address, ClientConfig, Location, PendingAction, ProofPipeline, SecretStore,
    SnarkjsProver, TransactionExecutor,
};
use shroud_crypto::{commit, Salt};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shroud", version, about = "Hidden-unit game client")]
struct Cli {
    /// JSON configuration file; missing file means defaults.
    #[arg(long, env = "SHROUD_CONFIG", default_value = "shroud.json")]
    config: PathBuf,
    #[arg(long, env = "SHROUD_RPC")]
    rpc: Option<String>,
    #[arg(long, env = "SHROUD_ACCOUNT")]
    account: Option<Address>,
    #[arg(long, env = "SHROUD_CONTRACT")]
    contract: Option<Address>,
    #[arg(long, env = "SHROUD_STORE")]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the commitment for a location and salt.
    Commit {
        #[arg(long, allow_hyphen_values = true)]
        row: i64,
        #[arg(long, allow_hyphen_values = true)]
        col: i64,
        #[arg(long)]
        salt: Salt,
    },
    /// List stored openings for the configured account and contract.
    Secrets,
    #[command(name = "create-game")]
    CreateGame,
    Join {
        #[arg(long)]
        game: u64,
    },
    /// Place a hidden unit.
    Place {
        #[arg(long)]
        game: u64,
        #[arg(long)]
        unit: u64,
        #[arg(long)]
        row: i64,
        #[arg(long)]
        col: i64,
    },
    Move {
        #[arg(long)]
        game: u64,
        #[arg(long)]
        unit: u64,
        #[arg(long)]
        row: i64,
        #[arg(long)]
        col: i64,
        /// Move a hidden unit with a zero-knowledge proof.
        #[arg(long)]
        hidden: bool,
    },
    Reveal {
        #[arg(long)]
        game: u64,
        #[arg(long)]
        unit: u64,
    },
    /// Print the reconciled game view as JSON.
    Show {
        #[arg(long)]
        game: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut config = ClientConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(rpc) = cli.rpc {
        config.rpc_endpoint = rpc;
    }
    if cli.account.is_some() {
        config.account = cli.account;
    }
    if cli.contract.is_some() {
        config.contract = cli.contract;
    }
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    config.validate()?;

    match cli.command {
        Commands::Commit { row, col, salt } => {
            let digest = commit(row, col, &salt).context("commitment failed")?;
            println!("{digest}");
            Ok(())
        }
        Commands::Secrets => cmd_secrets(&config),
        command => run_action(&config, command).await,
    }
}

fn cmd_secrets(config: &ClientConfig) -> Result<()> {
    let store = SecretStore::open(&config.store_path)
        .with_context(|| format!("failed to open {}", config.store_path.display()))?;
    let entries = store.list(&config.account()?, &config.contract()?)?;
    if entries.is_empty() {
        println!("no secrets stored");
        return Ok(());
    }
    for (commitment, entry) in entries {
        println!("{commitment} {} salt={}", entry.location, entry.salt);
    }
    Ok(())
}

async fn connect(config: &ClientConfig) -> Result<ActionCoordinator> {
    let ledger = Arc::new(
        JsonRpcLedger::connect_with_config(config.rpc())
            .await
            .context("failed to connect to node")?,
    );
    let store = SecretStore::open(&config.store_path)
        .with_context(|| format!("failed to open {}", config.store_path.display()))?;
    let executor = TransactionExecutor::spawn(ledger.clone(), config.executor()?);
    let pipeline = ProofPipeline::new(
        Arc::new(SnarkjsProver::new(config.prover.snarkjs_bin.clone())),
        config.prover.move_artifacts(),
    );
    Ok(ActionCoordinator::new(
        ledger,
        executor,
        pipeline,
        store,
        config.coordinator()?,
    ))
}

async fn run_action(config: &ClientConfig, command: Commands) -> Result<()> {
    let coordinator = connect(config).await?;
    let pending = match command {
        Commands::CreateGame => coordinator.create_game().await?,
        Commands::Join { game } => coordinator.join_game(game).await?,
        Commands::Place {
            game,
            unit,
            row,
            col,
        } => {
            coordinator
                .place_hidden(game, unit, Location::new(row, col))
                .await?
        }
        Commands::Move {
            game,
            unit,
            row,
            col,
            hidden,
        } => {
            let to = Location::new(row, col);
            if hidden {
                coordinator.move_hidden(game, unit, to).await?
            } else {
                coordinator.move_unit(game, unit, to).await?
            }
        }
        Commands::Reveal { game, unit } => coordinator.reveal(game, unit).await?,
        Commands::Show { game } => {
            let view = coordinator.refresh(game).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            return Ok(());
        }
        Commands::Commit { .. } | Commands::Secrets => {
            anyhow::bail!("command does not need a node connection")
        }
    };
    await_confirmation(pending).await
}

async fn await_confirmation(pending: PendingAction) -> Result<()> {
    println!("submitted {} (nonce {})", pending.tx_hash(), pending.nonce);
    let action_id = pending.action_id().clone();
    let receipt = pending.confirmation().await?;
    info!(%action_id, block = receipt.block_number, "confirmed");
    println!("confirmed in block {}", receipt.block_number);
    Ok(())
}
