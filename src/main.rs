//! DexTrader: multi-wallet balance sync and trade allocation.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! and runs one workflow per invocation: refresh wallet balances,
//! generate a confirmation sheet, or hand the latest sheet to the
//! external executor.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use dextrader::config::AppConfig;
use dextrader::engine::allocator::{AllocationEngine, AllocationOptions};
use dextrader::engine::executor::ExternalExecutor;
use dextrader::engine::sync::{BalanceSyncEngine, SyncOptions, SyncReport};
use dextrader::rpc::balance::{BalanceSource, RpcBalanceResolver, TokenRetry};
use dextrader::rpc::RpcClient;
use dextrader::storage::{self, LedgerPaths, WalletStore};
use dextrader::types::{LoadMode, TraderError};

#[derive(Debug, Parser)]
#[command(name = "dextrader", version, about = "Multi-wallet balance sync and trade allocation")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Refresh wallet balances and save the working ledger.
    Sync {
        /// Only refresh rows of the working ledger flagged as selected.
        #[arg(long)]
        selected: bool,
        /// Read wallets from this file instead of the configured ledger.
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Split the order table across wallets and write a confirmation sheet.
    Generate {
        #[arg(long)]
        orders: Option<PathBuf>,
    },
    /// Run the external executor against the latest confirmation sheet.
    Execute,
    /// Look up a single balance.
    Balance { address: String, token: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let cfg = AppConfig::load_or_default(&cli.config)?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&cfg)?;

    info!(command = ?cli.command, config = %cli.config, "DexTrader starting");

    let result = match cli.command {
        Command::Sync { selected, ledger } => run_sync(&cfg, selected, ledger.as_deref()).await,
        Command::Generate { orders } => run_generate(&cfg, orders.as_deref()),
        Command::Execute => run_execute(&cfg).await,
        Command::Balance { address, token } => run_balance(&cfg, &address, &token).await,
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        // One message, exit 1. Return instead of exiting so the log guard flushes.
        Err(e) if is_insufficient_balance(&e) => {
            error!("{e}");
            Ok(ExitCode::from(1))
        }
        Err(e) => Err(e),
    }
}

fn is_insufficient_balance(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<TraderError>(),
        Some(TraderError::InsufficientBalance { .. })
    )
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

fn build_resolver(cfg: &AppConfig) -> Result<RpcBalanceResolver> {
    let settings = cfg.rpc_settings()?;
    let rpc = RpcClient::new(settings).context("Failed to build RPC client")?;
    Ok(RpcBalanceResolver::new(
        rpc,
        TokenRetry {
            attempts: cfg.balances.token_retry_attempts,
            delay: Duration::from_secs(cfg.balances.token_retry_delay_secs),
        },
    ))
}

fn sync_engine(cfg: &AppConfig) -> Result<BalanceSyncEngine<RpcBalanceResolver>> {
    Ok(BalanceSyncEngine::new(
        build_resolver(cfg)?,
        SyncOptions {
            concurrency: cfg.balances.concurrency,
            failure_policy: cfg.balances.failure_policy,
        },
    ))
}

async fn run_sync(cfg: &AppConfig, selected: bool, ledger: Option<&Path>) -> Result<()> {
    let engine = sync_engine(cfg)?;
    let store = WalletStore::new(LedgerPaths::from(&cfg.ledger));
    let mode = if selected {
        LoadMode::UpdateSelected
    } else {
        LoadMode::UpdateAll
    };

    let records = match (ledger, mode) {
        (Some(path), LoadMode::UpdateAll) => WalletStore::load_path(path)?,
        (Some(path), LoadMode::UpdateSelected) => WalletStore::load_path(path)?
            .into_iter()
            .filter(|r| r.is_selected())
            .collect(),
        (None, mode) => store.load(mode)?,
    };

    let report = engine.sync(records).await;
    log_sync_report(&report);

    let to_save = match mode {
        LoadMode::UpdateAll => report.records,
        LoadMode::UpdateSelected => {
            let base = match ledger {
                Some(path) => WalletStore::load_path(path)?,
                None => store.load_working()?,
            };
            storage::merge_into(base, report.records)
        }
    };
    store.save_working(&to_save)?;
    Ok(())
}

fn run_generate(cfg: &AppConfig, orders: Option<&Path>) -> Result<()> {
    let store = WalletStore::new(LedgerPaths::from(&cfg.ledger));
    let wallets = store.load_working()?;
    let order_path = orders
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cfg.ledger.order_path());

    let engine = AllocationEngine::new(AllocationOptions::from(&cfg.allocation));
    let sheet = engine.generate_from_table(&order_path, &wallets, &cfg.ledger.confirmation_dir())?;

    info!(
        path = %sheet.path.display(),
        rows = sheet.rows.len(),
        total = %storage::sheet::total_amount(&sheet.rows),
        "Trade confirmation sheet generated"
    );
    Ok(())
}

async fn run_execute(cfg: &AppConfig) -> Result<()> {
    let sheet_dir = cfg.ledger.confirmation_dir();
    let engine = AllocationEngine::new(AllocationOptions::from(&cfg.allocation));
    let Some(sheet) = engine.latest_sheet(&sheet_dir)? else {
        bail!("No confirmation sheet found in {}", sheet_dir.display());
    };

    let rows = storage::sheet::read_sheet(&sheet)?;
    info!(sheet = %sheet.display(), trades = rows.len(), "Executing confirmation sheet");

    let outcome = ExternalExecutor::new(cfg.executor.clone()).run(&sheet).await?;
    if outcome.success() {
        info!(sheet = %outcome.sheet.display(), "Trades executed");
    } else {
        warn!(status = ?outcome.status_code, "Executor exited with failure");
    }

    if cfg.executor.resync_after_execution {
        info!("Refreshing selected wallets after execution");
        run_sync(cfg, true, None).await?;
    }

    if !outcome.success() {
        bail!("Trade executor exited with status {:?}", outcome.status_code);
    }
    Ok(())
}

async fn run_balance(cfg: &AppConfig, address: &str, token: &str) -> Result<()> {
    let resolver = build_resolver(cfg)?;
    let balance = resolver.try_resolve_balance(address, token).await?;
    info!(address, token, %balance, "Balance resolved");
    println!("{balance}");
    Ok(())
}

/// Log a human-readable sync summary.
fn log_sync_report(report: &SyncReport) {
    info!(
        run_id = %report.run_id,
        wallets = report.records.len(),
        refreshed = report.refreshed,
        without_address = report.without_address,
        skipped = report.skipped_count(),
        "Sync summary"
    );
    for skipped in &report.skipped {
        warn!(
            alias = %skipped.alias,
            address = %skipped.address,
            reason = %skipped.reason,
            "Wallet skipped"
        );
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Initialise the `tracing` subscriber.
///
/// Stdout gets human-readable lines (or JSON with `DEXTRADER_LOG_JSON`);
/// `logging.file_dir` adds one JSON log file per run.
fn init_logging(cfg: &AppConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dextrader=info"));

    let json_logging = std::env::var("DEXTRADER_LOG_JSON").is_ok();

    let (file_layer, guard) = match &cfg.logging.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_name = format!(
                "dextrader_{}.log",
                chrono::Local::now().format("%Y%m%d_%H%M%S")
            );
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = if json_logging {
        fmt::layer().json().with_target(true).with_thread_ids(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
