//! tabtime Daemon - Browsing-time tracker
//!
//! This binary runs as a background daemon, accepting tab and focus
//! notifications from the browser shim and serving control requests from
//! the `tabtime` CLI.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! tabtimed start
//!
//! # Start the daemon (background/daemonized)
//! tabtimed start -d
//!
//! # Stop the daemon
//! tabtimed stop
//!
//! # Check daemon status
//! tabtimed status
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tabtime_core::SystemClock;
use tabtimed::config::Config;
use tabtimed::focus::{spawn_focus_poll_task, HostProcessProbe};
use tabtimed::retention::{spawn_retention_task, RetentionSweeper};
use tabtimed::server::DaemonServer;
use tabtimed::store::{FileStore, KvStore, MemoryStore};
use tabtimed::tracker::{spawn_tracker, TrackerHandle};

/// tabtime daemon - per-page browsing time tracker
#[derive(Parser, Debug)]
#[command(name = "tabtimed", version, about)]
struct Args {
    /// Config file (defaults to $XDG_CONFIG_HOME/tabtime/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Keep records in memory only; nothing is written to disk
        #[arg(long)]
        ephemeral: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tabtime")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("tabtimed.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("tabtimed.log")
}

fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let Ok(raw) = i32::try_from(pid) else {
            bail!("Invalid PID {pid}");
        };
        let result = unsafe { libc::kill(raw, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        ephemeral: false,
    });

    match command {
        Command::Start { daemon, ephemeral } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'tabtimed stop' to stop it first.");
                process::exit(1);
            }

            // Validate before forking so errors reach the terminal
            let config = Config::load(args.config.as_deref()).context("Failed to load config")?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(config, ephemeral);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");

                if let Ok(config) = Config::load(args.config.as_deref()) {
                    if config.socket_path.exists() {
                        println!("Socket: {}", config.socket_path.display());
                    }
                    println!("Store: {}", config.data_path.display());
                }

                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: Config, ephemeral: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tabtimed=info".parse()?)
                .add_directive("tabtime_core=info".parse()?)
                .add_directive("tabtime_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "tabtime daemon starting"
    );

    let store: Arc<dyn KvStore> = if ephemeral {
        warn!("Running with an in-memory store; records are lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        let store = FileStore::open(&config.data_path)
            .await
            .with_context(|| format!("Failed to open store at {}", config.data_path.display()))?;
        info!(path = %config.data_path.display(), "Store opened");
        Arc::new(store)
    };

    let cancel_token = CancellationToken::new();
    let clock = Arc::new(SystemClock);

    let tracker = spawn_tracker(
        config.tracker_settings(),
        Arc::clone(&store),
        clock.clone(),
        cancel_token.clone(),
    );
    info!("Tracker started");

    spawn_shutdown_listener(tracker.clone(), cancel_token.clone());

    let sweeper = RetentionSweeper::new(Arc::clone(&store), clock, config.retention_months);
    let _retention_handle =
        spawn_retention_task(sweeper, config.cleanup_interval(), cancel_token.clone());

    if let Some(process_name) = &config.host_process {
        let _focus_handle = spawn_focus_poll_task(
            HostProcessProbe::new(process_name.as_str()),
            tracker.clone(),
            config.focus_poll_interval(),
            cancel_token.clone(),
        );
        info!(process = %process_name, "Focus polling started");
    }

    let server = DaemonServer::new(&config.socket_path, tracker, cancel_token);

    info!(socket = %config.socket_path.display(), "Starting server");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("tabtime daemon stopped");
    Ok(())
}

/// Ends the active session and flushes before cancelling every task.
fn spawn_shutdown_listener(tracker: TrackerHandle, cancel_token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");

        match tracker.shutdown().await {
            Ok(report) => info!(
                days = report.days,
                deltas = report.deltas,
                "Final flush complete"
            ),
            Err(e) => error!(error = %e, "Final flush failed; buffered time is lost"),
        }

        cancel_token.cancel();
    });
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
