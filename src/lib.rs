// src/lib.rs

pub mod buffer;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod host;
pub mod job;
pub mod logging;
pub mod registry;
pub mod sink;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::engine::{EVENT_CHANNEL_CAPACITY, Runtime, RuntimeEvent, RuntimeHandle};
use crate::host::TokioReactor;
use crate::sink::PrintSink;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the tokio reactor and the runtime
/// - Ctrl-C handling (graceful first, forced on the second press)
/// - SIGHUP handling (reload the config and reconcile)
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(EVENT_CHANNEL_CAPACITY);
    let reactor = TokioReactor::new(rt_tx.clone());
    let runtime = Runtime::new(&cfg.supervisor, rt_tx, rt_rx, reactor, PrintSink::stdout());
    let handle = runtime.handle();

    spawn_ctrl_c_handler(handle.clone());
    spawn_reload_handler(handle, config_path);

    runtime.run(cfg.jobs).await?;
    Ok(())
}

fn spawn_ctrl_c_handler(handle: RuntimeHandle) {
    tokio::spawn(async move {
        for force in [false, true] {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
                return;
            }
            if force {
                warn!("second interrupt; killing all jobs");
            } else {
                info!("interrupt received; stopping jobs (press Ctrl-C again to force)");
            }
            if handle.shutdown(force).await.is_err() {
                return;
            }
        }
    });
}

#[cfg(unix)]
fn spawn_reload_handler(handle: RuntimeHandle, config_path: PathBuf) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to listen for SIGHUP");
                return;
            }
        };
        while hangups.recv().await.is_some() {
            info!(path = %config_path.display(), "SIGHUP received; reloading config");
            match reload_jobs(&config_path) {
                Ok(cfg) => {
                    if handle.reload(cfg.jobs).await.is_err() {
                        return;
                    }
                }
                Err(e) => error!(error = %e, "reload failed; keeping current jobs"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_handler(_handle: RuntimeHandle, _config_path: PathBuf) {}

#[cfg_attr(not(unix), allow(dead_code))]
fn reload_jobs(path: &Path) -> crate::errors::Result<ConfigFile> {
    let cfg = load_and_validate(path)?;
    // Supervisor options are fixed for the lifetime of the process.
    info!(jobs = cfg.jobs.len(), "config reloaded");
    Ok(cfg)
}

/// Print the validated configuration without starting anything.
fn print_dry_run(cfg: &ConfigFile) {
    let sup = &cfg.supervisor;
    println!("cronvisor dry-run");
    println!("  supervisor.kill_grace = {:?}", sup.kill_grace);
    println!("  supervisor.shutdown_timeout = {:?}", sup.shutdown_timeout);
    println!("  supervisor.max_reads_per_event = {}", sup.max_reads_per_event);
    println!("  supervisor.read_chunk_size = {}", sup.read_chunk_size);
    println!();

    println!("jobs ({}):", cfg.jobs.len());
    for job in &cfg.jobs {
        println!("  - {}", job.name);
        println!("      path: {}", job.path.display());
        if !job.args.is_empty() {
            println!("      args: {:?}", job.args);
        }
        println!("      mode: {} (period {}s)", job.mode, job.period);
        if let Some(ref prefix) = job.prefix {
            println!("      prefix: {prefix:?}");
        }
        if let Some(ref cwd) = job.cwd {
            println!("      cwd: {}", cwd.display());
        }
        for (k, v) in &job.env {
            println!("      env: {k}={v}");
        }
        if job.kill {
            println!("      kill: true");
        }
        if job.reconfig {
            println!("      reconfig: true");
        }
    }
}
