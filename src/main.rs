use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use leaselock::cli::{Cli, Commands};
use leaselock::time::{Clock, SystemClock};
use leaselock::{AcquireOptions, LeaseLock, LeaseStore, LockConfig, RowFilter, SqliteStore};
use tokio::process::Command;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// BSD `EX_TEMPFAIL`: the lock was busy, try again later
const EXIT_LOCK_BUSY: u8 = 75;

/// Conventional exit status after SIGINT
const EXIT_INTERRUPTED: u8 = 130;

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<LockConfig> {
    let config = match &cli.config {
        Some(path) => LockConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LockConfig::default(),
    };
    Ok(config.with_release_on_ctrl_c(true))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbosity);

    let config = load_config(&cli)?;
    let store = SqliteStore::open(&cli.db)
        .await
        .with_context(|| format!("opening lock table {}", cli.db.display()))?;
    let lock = LeaseLock::new(Arc::new(store.clone()), config);

    match cli.command {
        Commands::Run {
            id,
            timeout_ms,
            lease_ms,
            program,
        } => {
            let mut options = AcquireOptions::from_config(lock.config());
            if let Some(ms) = timeout_ms {
                options = options.timeout(Duration::from_millis(ms));
            }
            if let Some(ms) = lease_ms {
                options = options.lease(Duration::from_millis(ms));
            }
            run_locked(&lock, &id, options, &program).await
        }
        Commands::Try { id, lease_ms } => {
            let lease = lease_ms.map_or_else(|| lock.config().lease_duration(), Duration::from_millis);
            if lock.try_acquire(&id, lease).await {
                println!("acquired {id}");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("busy {id}");
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Release { id } => {
            lock.release(&id).await;
            println!("released {id}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let now = SystemClock.now_ms();
            for row in store.rows().await? {
                match row.time_remaining(now) {
                    Some(left) => println!("{}\tlive\t{}ms", row.id, left.as_millis()),
                    None => println!("{}\texpired", row.id),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Gc => {
            let purged = store
                .delete_where(RowFilter::ExpiredAt(SystemClock.now_ms()))
                .await?;
            println!("purged {purged}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_locked(
    lock: &LeaseLock,
    id: &str,
    options: AcquireOptions,
    program: &[String],
) -> Result<ExitCode> {
    let (cmd, args) = program
        .split_first()
        .context("no program given to run")?;

    if !lock.acquire_with(id, options).await {
        warn!(id, "Lock not obtained");
        return Ok(ExitCode::from(EXIT_LOCK_BUSY));
    }
    info!(id, program = %cmd, "Running under lock");

    let mut child = match Command::new(cmd).args(args).spawn() {
        Ok(child) => child,
        Err(err) => {
            lock.release(id).await;
            return Err(err).with_context(|| format!("spawning {cmd}"));
        }
    };

    let interrupted = lock.shutdown_signal();
    let code = tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("waiting for {cmd}"));
            lock.release(id).await;
            let status = status?;
            status
                .code()
                .and_then(|code| u8::try_from(code).ok())
                .map_or(ExitCode::FAILURE, ExitCode::from)
        }
        () = interrupted.cancelled() => {
            if let Err(err) = child.kill().await {
                warn!(%err, "Failed to stop child after interrupt");
            }
            ExitCode::from(EXIT_INTERRUPTED)
        }
    };

    lock.shutdown().await;
    Ok(code)
}
