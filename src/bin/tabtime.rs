//! tabtime - control CLI for the tabtime daemon
//!
//! # Usage
//!
//! ```text
//! tabtime status                  # tracking flag, auto-resume deadline, active page
//! tabtime disable --resume-after 30
//! tabtime enable
//! tabtime flush
//! tabtime day 2024-05-17          # one day's totals (today when omitted)
//! tabtime watch                   # stream tracking changes
//! tabtime event activated 4 https://example.com/
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tabtime_core::{DayKey, DayRecord, TabId};
use tabtime_protocol::{DaemonMessage, MessageType};
use tabtimed::client::ControlClient;
use tabtimed::config::Config;

// ============================================================================
// CLI Arguments
// ============================================================================

/// tabtime - control the browsing-time tracker
#[derive(Parser, Debug)]
#[command(name = "tabtime", version, about)]
struct Args {
    /// Daemon socket (defaults to the configured socket path)
    #[arg(long, short = 's', global = true)]
    socket: Option<PathBuf>,

    /// Config file used to find the socket
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show whether tracking is on
    Status,
    /// Turn tracking on
    Enable,
    /// Turn tracking off
    Disable {
        /// Turn tracking back on after this many minutes
        #[arg(long, value_name = "MIN")]
        resume_after: Option<u32>,
    },
    /// Write buffered time to the store now
    Flush,
    /// Manage the auto-resume timer
    #[command(subcommand)]
    Resume(ResumeCommand),
    /// Print one day's recorded time
    Day {
        /// Date as YYYY-MM-DD (today when omitted)
        date: Option<DayKey>,
    },
    /// Stream tracking state changes until interrupted
    Watch,
    /// Check that the daemon answers
    Ping,
    /// Send a browser notification by hand
    #[command(subcommand)]
    Event(EventCommand),
}

#[derive(Subcommand, Debug)]
enum ResumeCommand {
    /// Re-enable tracking after MIN minutes
    Start {
        #[arg(value_name = "MIN")]
        minutes: u32,
    },
    /// Disarm the timer
    Cancel,
}

#[derive(Subcommand, Debug)]
enum EventCommand {
    /// A tab became the foreground tab
    Activated { tab_id: i64, url: String },
    /// A tab navigated
    Updated { tab_id: i64, url: String },
    /// A tab was closed
    Closed { tab_id: i64 },
    /// The browser window gained focus
    Focus,
    /// The browser window lost focus
    Blur,
    /// The machine is about to sleep
    Suspend,
}

// ============================================================================
// Output
// ============================================================================

fn print_state(message: &DaemonMessage) -> Result<()> {
    let DaemonMessage::TrackingState {
        is_tracking,
        auto_resume_at,
        active_key,
    } = message
    else {
        bail!("unexpected reply: {message:?}");
    };

    println!("Tracking: {}", if *is_tracking { "on" } else { "off" });
    if let Some(at) = auto_resume_at {
        println!(
            "Resumes at: {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
    if let Some(key) = active_key {
        println!("Active: {key}");
    }
    Ok(())
}

fn print_day(date: &DayKey, record: &DayRecord) {
    if record.is_empty() {
        println!("{date}: nothing recorded");
        return;
    }

    let mut rows: Vec<_> = record.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1));

    println!("{date}  total {}", format_duration(record.total()));
    for (key, ms) in rows {
        println!("{:>10}  {key}", format_duration(*ms));
    }
}

fn format_duration(milliseconds: u64) -> String {
    let secs = milliseconds / 1000;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Turns an acknowledgement into a result.
fn expect_ack(message: DaemonMessage) -> Result<()> {
    match message {
        DaemonMessage::Ack { success: true, .. } => Ok(()),
        DaemonMessage::Ack {
            success: false,
            detail,
        } => bail!("daemon reported failure: {}", detail.unwrap_or_default()),
        DaemonMessage::Error { message, .. } => bail!("daemon error: {message}"),
        other => bail!("unexpected reply: {other:?}"),
    }
}

// ============================================================================
// Main
// ============================================================================

fn socket_path(args: &Args) -> Result<PathBuf> {
    if let Some(socket) = &args.socket {
        return Ok(socket.clone());
    }
    let config = Config::load(args.config.as_deref()).context("Failed to load config")?;
    Ok(config.socket_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let socket = socket_path(&args)?;
    let mut client = ControlClient::connect(&socket).await?;

    match args.command.unwrap_or(Command::Status) {
        Command::Status => {
            let reply = client.request(MessageType::GetTrackingState).await?;
            print_state(&reply)?;
        }
        Command::Enable => {
            expect_ack(client.request(MessageType::EnableTracking).await?)?;
            println!("Tracking enabled.");
        }
        Command::Disable { resume_after } => {
            expect_ack(
                client
                    .request(MessageType::DisableTracking {
                        auto_resume_minutes: resume_after,
                    })
                    .await?,
            )?;
            match resume_after {
                Some(minutes) => println!("Tracking disabled for {minutes} min."),
                None => println!("Tracking disabled."),
            }
        }
        Command::Flush => {
            expect_ack(client.request(MessageType::Flush).await?)?;
            println!("Flushed.");
        }
        Command::Resume(ResumeCommand::Start { minutes }) => {
            expect_ack(client.request(MessageType::StartAutoResume { minutes }).await?)?;
            println!("Auto-resume armed for {minutes} min.");
        }
        Command::Resume(ResumeCommand::Cancel) => {
            expect_ack(client.request(MessageType::CancelAutoResume).await?)?;
            println!("Auto-resume cancelled.");
        }
        Command::Day { date } => match client.request(MessageType::GetDay { date }).await? {
            DaemonMessage::DayRecord { date, record } => print_day(&date, &record),
            other => bail!("unexpected reply: {other:?}"),
        },
        Command::Watch => {
            let reply = client.request(MessageType::Subscribe).await?;
            print_state(&reply)?;
            loop {
                match client.recv().await? {
                    DaemonMessage::TrackingChanged { is_tracking, cause } => {
                        let state = if is_tracking { "on" } else { "off" };
                        println!("{} tracking {state} ({cause})", Local::now().format("%H:%M:%S"));
                    }
                    other => tracing::debug!(message = ?other, "Ignoring message"),
                }
            }
        }
        Command::Ping => {
            let started = std::time::Instant::now();
            match client.request(MessageType::Ping { seq: 1 }).await? {
                DaemonMessage::Pong { seq: 1 } => {
                    println!("pong in {:?}", started.elapsed());
                }
                other => bail!("unexpected reply: {other:?}"),
            }
        }
        Command::Event(event) => {
            let message = match event {
                EventCommand::Activated { tab_id, url } => MessageType::TabActivated {
                    tab_id: TabId::new(tab_id),
                    url,
                },
                EventCommand::Updated { tab_id, url } => MessageType::TabUpdated {
                    tab_id: TabId::new(tab_id),
                    url,
                },
                EventCommand::Closed { tab_id } => MessageType::TabClosed {
                    tab_id: TabId::new(tab_id),
                },
                EventCommand::Focus => MessageType::WindowFocusChanged { focused: true },
                EventCommand::Blur => MessageType::WindowFocusChanged { focused: false },
                EventCommand::Suspend => MessageType::Suspend,
            };
            expect_ack(client.request(message).await?)?;
        }
    }

    // Best effort; the daemon also handles an abrupt close
    let _ = tokio::time::timeout(Duration::from_secs(1), client.disconnect()).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(999), "0s");
        assert_eq!(format_duration(20_000), "20s");
        assert_eq!(format_duration(61_000), "1m01s");
        assert_eq!(format_duration(3_726_000), "1h02m06s");
    }

    #[test]
    fn test_expect_ack() {
        assert!(expect_ack(DaemonMessage::ok()).is_ok());
        let err = expect_ack(DaemonMessage::failed("store unavailable")).unwrap_err();
        assert!(err.to_string().contains("store unavailable"));
        assert!(expect_ack(DaemonMessage::pong(1)).is_err());
    }

    #[test]
    fn test_parse_disable_with_resume() {
        let args = Args::try_parse_from(["tabtime", "disable", "--resume-after", "30"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Command::Disable {
                resume_after: Some(30)
            })
        ));
    }

    #[test]
    fn test_parse_day_rejects_bad_date() {
        assert!(Args::try_parse_from(["tabtime", "day", "2024-13-01"]).is_err());
        assert!(Args::try_parse_from(["tabtime", "day", "2024-05-17"]).is_ok());
    }
}
