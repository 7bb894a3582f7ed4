//! chainmirror CLI — run a chain mirror and inspect its store.
//!
//! Usage:
//! ```bash
//! chainmirror run --rpc-url http://127.0.0.1:8545 --ws-url ws://127.0.0.1:8546 --database ./mirror.db
//! chainmirror run --config ./chainmirror.toml
//! chainmirror status --database ./mirror.db
//! chainmirror info
//! ```

mod config;
mod logging;

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chainmirror_core::{
    BackfillSweeper, BalanceSweeper, BlockWriter, ChainClient, DataStore, LiveIngestor,
    MemoryStore, MirrorConfig, MirrorContext,
};
use chainmirror_evm::EvmChainClient;
use chainmirror_storage::SqliteStore;

use crate::config::{AppConfig, RunArgs};
use crate::logging::init_tracing;

#[derive(Parser)]
#[command(name = "chainmirror", version, about = "Reorg-aware blockchain mirror")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mirror the chain until interrupted
    Run(RunArgs),
    /// Print what a mirror database holds
    Status {
        /// SQLite database path
        #[arg(long, env = "CHAINMIRROR_DATABASE")]
        database: String,
    },
    /// Show default settings
    Info,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Status { database } => cmd_status(&database).await,
        Command::Info => {
            cmd_info();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = AppConfig::resolve(&args)?;
    init_tracing(&config.log);

    let client = Arc::new(EvmChainClient::new(config.client_config())?);
    client
        .ensure_connected()
        .await
        .context("startup connectivity check failed")?;
    let head = client
        .latest_block_number()
        .await
        .context("reading chain head")?;
    info!(url = %config.rpc_url, head, chain = %config.mirror.chain, "connected to node");

    let store: Arc<dyn DataStore> = match &config.database {
        Some(path) => Arc::new(
            SqliteStore::open(path)
                .await
                .with_context(|| format!("opening database {path}"))?,
        ),
        None => {
            warn!("no database configured, mirroring into memory");
            Arc::new(MemoryStore::new())
        }
    };

    let ctx = MirrorContext::new(client.clone(), store, config.mirror.clone());
    let cancel = CancellationToken::new();
    let writer = BlockWriter::new(ctx.clone(), cancel.clone());
    let mut loops = JoinSet::new();

    if client.ws_url().is_some() {
        let live = LiveIngestor::new(writer.clone(), cancel.clone());
        loops.spawn(async move { live.run().await });
    } else {
        warn!("no ws_url configured, live ingestion disabled; backfill keeps the mirror current");
    }

    let backfill = BackfillSweeper::new(writer, cancel.clone());
    let (start, end) = (ctx.config.backfill_start, ctx.config.backfill_target());
    loops.spawn(async move { backfill.run(start, end).await });

    loops.spawn(BalanceSweeper::new(ctx, cancel.clone()).run());

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("shutdown requested, waiting for in-flight writes");
    cancel.cancel();

    while let Some(joined) = loops.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "mirror loop panicked");
        }
    }
    info!("chainmirror stopped");
    Ok(())
}

async fn cmd_status(database: &str) -> Result<()> {
    let store = SqliteStore::open(database)
        .await
        .with_context(|| format!("opening database {database}"))?;
    let count = store.block_count().await?;
    let highest = store.highest_block().await?;

    println!("Database: {database}");
    println!("  Blocks stored: {count}");
    match highest {
        Some(n) => {
            println!("  Highest block: {n}");
            println!("  Gaps below head: {}", (n + 1).saturating_sub(count));
            if let Some(block) = store.block(n).await? {
                println!("  Head hash:     {}", block.hash);
                println!("  Head txs:      {}", store.count_transactions(n).await?);
            }
        }
        None => println!("  Highest block: -"),
    }
    Ok(())
}

fn cmd_info() {
    let d = MirrorConfig::default();
    println!("ChainMirror v{}", env!("CARGO_PKG_VERSION"));
    println!("  Retry delay: {}-{} ms (randomized)", d.retry_min_delay_ms, d.retry_max_delay_ms);
    println!("  Balance sweep interval: {} s", d.balance_interval_secs);
    println!("  Max reorg depth: {} blocks", d.max_reorg_depth);
    println!("  Write attempts per block: {}", d.max_write_attempts);
    println!("  Backfill: {}..latest, then 0..latest forever", d.backfill_start);
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
    println!("  Chain client: EVM JSON-RPC (HTTP + newHeads over WebSocket)");
}
