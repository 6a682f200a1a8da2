//! addrindex CLI: run the indexer and query what it has indexed.
//!
//! Usage:
//! ```bash
//! addrindex run     --config addrindex.json
//! addrindex history --config addrindex.json --address 0xabc... --max 50
//! addrindex history --config addrindex.json --address 0xabc... --token RIF
//! addrindex fee     --config addrindex.json
//! addrindex status  --config addrindex.json
//! addrindex info
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use addrindex_core::{IndexConfig, IndexCoordinator, Network};
use addrindex_evm::{HttpRpcClient, IndexLoop};
use addrindex_storage::SqliteStore;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "addrindex",
    about = "Reorg-safe address history indexer for Ethereum and RSK nodes",
    version
)]
struct Cli {
    /// Default log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Index blocks from the configured node until Ctrl-C
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the transaction history of one or more addresses as JSON
    History {
        #[arg(short, long)]
        config: PathBuf,
        /// Address to look up (repeatable)
        #[arg(short, long = "address", required = true)]
        addresses: Vec<String>,
        #[arg(long, default_value_t = 100)]
        max: usize,
        #[arg(long)]
        oldest_first: bool,
        /// Report transfers of this registered token instead
        #[arg(long)]
        token: Option<String>,
    },

    /// Print the average gas price over the recent fee window
    Fee {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the indexed height and tip
    Status {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show default settings
    Info,
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Run { config } => cmd_run(&config).await,
        Commands::History {
            config,
            addresses,
            max,
            oldest_first,
            token,
        } => cmd_history(&config, &addresses, max, oldest_first, token.as_deref()).await,
        Commands::Fee { config } => cmd_fee(&config).await,
        Commands::Status { config } => cmd_status(&config).await,
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

async fn open_coordinator(path: &Path) -> Result<IndexCoordinator> {
    let config = IndexConfig::from_json_file(path)?;
    let db_path = config.db_path.to_string_lossy().into_owned();
    let store = SqliteStore::open(&db_path)
        .await
        .with_context(|| format!("opening database {db_path}"))?;
    let coordinator = IndexCoordinator::open(config, Arc::new(store))
        .await
        .context("loading index state")?;
    Ok(coordinator)
}

/// Query commands may run next to a live `run` process, so they never write.
async fn open_reader(path: &Path) -> Result<IndexCoordinator> {
    let config = IndexConfig::from_json_file(path)?;
    let db_path = config.db_path.to_string_lossy().into_owned();
    let store = SqliteStore::open_read_only(&db_path)
        .await
        .with_context(|| format!("opening database {db_path} read-only"))?;
    let coordinator = IndexCoordinator::open_read_only(config, Arc::new(store))
        .await
        .context("loading index state")?;
    Ok(coordinator)
}

async fn cmd_run(config_path: &Path) -> Result<()> {
    let coordinator = Arc::new(open_coordinator(config_path).await?);
    let rpc_url = coordinator.config().rpc_url();
    let client = HttpRpcClient::default_for(rpc_url.as_str())?;
    let height = coordinator.indexed_height().await?;
    tracing::info!(
        network = %coordinator.config().network,
        rpc = %rpc_url,
        ?height,
        "Starting indexer"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut index = IndexLoop::new(coordinator, client, stop_rx);
    let mut run = Box::pin(index.run());

    tokio::select! {
        result = &mut run => return result.context("index loop failed"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            tracing::info!("Ctrl-C received, finishing the current block");
            // A dropped receiver only means the loop already ended.
            let _ = stop_tx.send(true);
        }
    }
    run.await.context("index loop failed")
}

async fn cmd_history(
    config_path: &Path,
    addresses: &[String],
    max: usize,
    oldest_first: bool,
    token: Option<&str>,
) -> Result<()> {
    let coordinator = open_reader(config_path).await?;
    let records = match token {
        Some(name) => {
            coordinator
                .token_history(name, addresses, max, oldest_first)
                .await?
        }
        None => coordinator.history(addresses, max, oldest_first).await?,
    };
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

async fn cmd_fee(config_path: &Path) -> Result<()> {
    let coordinator = open_reader(config_path).await?;
    match coordinator.fee_estimate().await? {
        Some(fee) => println!("{fee}"),
        None => println!("no transactions in the last {} blocks", coordinator.config().fee_window),
    }
    Ok(())
}

async fn cmd_status(config_path: &Path) -> Result<()> {
    let coordinator = open_reader(config_path).await?;
    let status = coordinator.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn cmd_info() {
    let defaults = IndexConfig::default();
    println!("addrindex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Networks: ethereum, ropsten (port 8545), rsk, rsk_testnet (port 4444)");
    println!("  RSK heights are reported one above the internal height");
    println!("  Initial sync lag: {} blocks", defaults.initial_sync_lag);
    println!("  Confirmation depth: {} blocks", defaults.confirmation_depth);
    println!("  Batch size: {} transactions", defaults.batch_max_transactions);
    println!("  Fee window: {} blocks", defaults.fee_window);
    println!("  Max gap fill depth: {} blocks", defaults.max_gap_fill_depth);
    println!(
        "  Retry: {} attempts, {}ms doubling to {}ms",
        defaults.retry.max_retries, defaults.retry.initial_backoff_ms, defaults.retry.max_backoff_ms
    );
    println!("  Default RPC: {}", Network::Ethereum.default_rpc_url());
    println!("  Storage: SQLite (WAL), optional append-only input/log blob files");
}
