//! Host focus monitoring.
//!
//! Focus reports come from two places: `window_focus_changed` events sent by
//! the platform shim, and an optional poll task that asks a [`FocusProbe`].
//! Both feed [`crate::tracker::TrackerHandle::observe_focus`]; the tracker's
//! [`FocusGate`] debounces them so only a change of state is acted on.

use std::ffi::OsStr;
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tracker::TrackerHandle;

/// Debounced focus state.
///
/// Until the first report the host is assumed focused.
#[derive(Debug, Default, Clone, Copy)]
pub struct FocusGate {
    last: Option<bool>,
}

impl FocusGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a report. Returns true if it differs from the previous one.
    pub fn observe(&mut self, focused: bool) -> bool {
        let changed = self.last != Some(focused);
        self.last = Some(focused);
        changed
    }

    pub fn is_focused(&self) -> bool {
        self.last.unwrap_or(true)
    }
}

/// Source of periodic focus reports.
pub trait FocusProbe: Send + 'static {
    /// Returns `Some(focused)` when the probe has an opinion, `None` otherwise.
    fn probe(&mut self) -> Option<bool>;
}

/// Reports "background" while a named host process is not running.
///
/// A running process says nothing about which window has focus, so it yields
/// `None` and leaves the decision to platform events. The one exception is
/// the poll where the process reappears, which reports "focused" once.
pub struct HostProcessProbe {
    system: System,
    process_name: String,
    was_running: Option<bool>,
}

impl HostProcessProbe {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            system: System::new(),
            process_name: process_name.into(),
            was_running: None,
        }
    }

    fn host_running(&mut self) -> bool {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let name = OsStr::new(&self.process_name);
        self.system
            .processes()
            .values()
            .any(|process| process.name() == name)
    }
}

impl FocusProbe for HostProcessProbe {
    fn probe(&mut self) -> Option<bool> {
        let running = self.host_running();
        let previous = self.was_running.replace(running);

        match (previous, running) {
            (_, false) => Some(false),
            (Some(false), true) => Some(true),
            _ => None,
        }
    }
}

/// Spawns the focus poll task.
///
/// Probing runs on the blocking pool. The task stops on cancellation or
/// when the tracker goes away.
pub fn spawn_focus_poll_task<P: FocusProbe>(
    probe: P,
    tracker: TrackerHandle,
    period: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut probe = Some(probe);
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = period.as_secs(), "Focus poll started");

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Focus poll shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let Some(mut current) = probe.take() else {
                        break;
                    };

                    let (returned, report) = match tokio::task::spawn_blocking(move || {
                        let report = current.probe();
                        (current, report)
                    })
                    .await
                    {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(error = %e, "Focus probe panicked, stopping poll");
                            break;
                        }
                    };
                    probe = Some(returned);

                    let Some(focused) = report else {
                        continue;
                    };
                    debug!(focused, "Focus probe report");
                    if tracker.observe_focus(focused).await.is_err() {
                        debug!("Focus poll stopping: tracker closed");
                        break;
                    }
                }
            }
        }
    })
}
