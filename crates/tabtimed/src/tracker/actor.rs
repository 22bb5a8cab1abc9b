//! Tracker actor - owns the session clock and all tracking state.
//!
//! The actor is the single owner of:
//! - the [`SessionClock`] (at most one open session)
//! - the [`AccumulationBuffer`] of not-yet-durable time
//! - the tracking flag and the auto-resume scheduler
//! - the last known foreground tab and host focus
//!
//! Commands are processed one at a time, so platform events, timer firings
//! and UI requests never observe each other half-applied. Store writes of
//! buffered time happen outside the actor in the [`DurableWriter`]; early
//! flushes are tracked in a `JoinSet` and settled before any drain, so a
//! reply to `Drain`, `Suspend` or `Shutdown` never overtakes one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tabtime_core::{Clock, PendingDelta, SessionClock, TabId, TrackingCause, TRACKING_FLAG_KEY};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::commands::{TrackerCommand, TrackerEvent, TrackingSnapshot};
use crate::buffer::AccumulationBuffer;
use crate::focus::FocusGate;
use crate::resume::{AutoResumeScheduler, Restored};
use crate::store::{self, KvStore};
use crate::writer::{DurableWriter, FlushError, FlushReport};

/// The tracker actor.
pub struct TrackerActor {
    receiver: mpsc::Receiver<TrackerCommand>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KvStore>,
    writer: Arc<DurableWriter>,
    /// Early flushes still writing
    in_flight: JoinSet<Result<FlushReport, FlushError>>,
    session: SessionClock,
    buffer: AccumulationBuffer,
    focus: FocusGate,
    foreground: Option<(TabId, String)>,
    is_tracking: bool,
    scheduler: AutoResumeScheduler,
    /// Buffered time older than this is flushed without waiting for the ticker
    opportunistic_flush: Duration,
    event_publisher: broadcast::Sender<TrackerEvent>,
    cancel_token: CancellationToken,
}

impl TrackerActor {
    /// Creates a tracker actor.
    ///
    /// `commands` must be a weak handle to the sender side of `receiver`; the
    /// auto-resume timer posts its firing through it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        receiver: mpsc::Receiver<TrackerCommand>,
        commands: mpsc::WeakSender<TrackerCommand>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KvStore>,
        writer: Arc<DurableWriter>,
        opportunistic_flush: Duration,
        event_publisher: broadcast::Sender<TrackerEvent>,
        cancel_token: CancellationToken,
    ) -> Self {
        let now = clock.now();
        let scheduler = AutoResumeScheduler::new(Arc::clone(&store), commands);

        Self {
            receiver,
            clock,
            store,
            writer,
            in_flight: JoinSet::new(),
            session: SessionClock::new(),
            buffer: AccumulationBuffer::new(now),
            focus: FocusGate::new(),
            foreground: None,
            is_tracking: true,
            scheduler,
            opportunistic_flush,
            event_publisher,
            cancel_token,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Restores persisted state first, then processes commands until the
    /// channel closes or the token is cancelled.
    pub async fn run(mut self) {
        self.restore().await;
        info!(is_tracking = self.is_tracking, "Tracker actor starting");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.finish_flush(joined);
                }
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
            }
        }

        self.settle_flushes().await;
        self.scheduler.disarm();
        if !self.buffer.is_empty() {
            warn!(
                pending_ms = self.buffer.pending_ms(),
                "Tracker stopped with unflushed time"
            );
        }
        info!("Tracker actor stopped");
    }

    /// Loads the tracking flag and auto-resume timer from the store.
    async fn restore(&mut self) {
        match store::load::<bool>(self.store.as_ref(), TRACKING_FLAG_KEY).await {
            Ok(flag) => self.is_tracking = flag.unwrap_or(true),
            Err(e) => warn!(error = %e, "Failed to load tracking flag, assuming enabled"),
        }

        let now = self.clock.now();
        match self.scheduler.restore(now).await {
            Restored::Due => self.set_tracking(true, TrackingCause::AutoResumed).await,
            Restored::Armed(end_time) => debug!(end_time = %end_time, "Pause continues"),
            Restored::Nothing => {}
        }
    }

    /// Dispatches a command to its handler.
    async fn handle_command(&mut self, cmd: TrackerCommand) {
        let now = self.clock.now();

        match cmd {
            TrackerCommand::TabActivated {
                tab_id,
                url,
                respond_to,
            } => {
                self.handle_tab_activated(tab_id, url, now);
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(());
            }
            TrackerCommand::TabUpdated {
                tab_id,
                url,
                respond_to,
            } => {
                self.handle_tab_updated(tab_id, url, now);
                let _ = respond_to.send(());
            }
            TrackerCommand::TabClosed { tab_id, respond_to } => {
                self.handle_tab_closed(tab_id, now);
                let _ = respond_to.send(());
            }
            TrackerCommand::FocusObserved {
                focused,
                respond_to,
            } => {
                self.handle_focus(focused, now);
                let _ = respond_to.send(());
            }
            TrackerCommand::Suspend { respond_to } => {
                info!("Host suspending");
                let _ = respond_to.send(self.end_and_drain(now).await);
            }
            TrackerCommand::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            TrackerCommand::Enable { respond_to } => {
                self.scheduler.cancel().await;
                self.set_tracking(true, TrackingCause::Enabled).await;
                let _ = respond_to.send(());
            }
            TrackerCommand::Disable {
                auto_resume,
                respond_to,
            } => {
                self.handle_disable(auto_resume, now).await;
                let _ = respond_to.send(());
            }
            TrackerCommand::StartAutoResume { after, respond_to } => {
                let end_time = deadline(now, after);
                self.scheduler.start(end_time, now).await;
                let _ = respond_to.send(end_time);
            }
            TrackerCommand::CancelAutoResume { respond_to } => {
                self.scheduler.cancel().await;
                let _ = respond_to.send(());
            }
            TrackerCommand::AutoResumeFired { generation } => {
                if self.scheduler.accept_fired(generation).await {
                    info!("Auto-resume timer fired");
                    self.set_tracking(true, TrackingCause::AutoResumed).await;
                }
            }
            TrackerCommand::Drain { respond_to } => {
                self.settle_flushes().await;
                let _ = respond_to.send(self.buffer.drain(now));
            }
            TrackerCommand::Requeue { deltas } => {
                debug!(count = deltas.len(), "Requeued unflushed deltas");
                self.buffer.requeue(deltas);
            }
            TrackerCommand::Shutdown { respond_to } => {
                let _ = respond_to.send(self.end_and_drain(now).await);
            }
        }
    }

    // ========================================================================
    // Platform events
    // ========================================================================

    fn handle_tab_activated(&mut self, tab_id: TabId, url: String, now: DateTime<Utc>) {
        debug!(tab_id = %tab_id, "Tab activated");
        self.foreground = Some((tab_id, url));
        self.retarget(now);
    }

    fn handle_tab_updated(&mut self, tab_id: TabId, url: String, now: DateTime<Utc>) {
        match &mut self.foreground {
            Some((foreground, current)) if *foreground == tab_id => {
                *current = url;
            }
            _ => {
                debug!(tab_id = %tab_id, "Ignoring update for background tab");
                return;
            }
        }
        self.retarget(now);
    }

    fn handle_tab_closed(&mut self, tab_id: TabId, now: DateTime<Utc>) {
        if matches!(self.foreground, Some((foreground, _)) if foreground == tab_id) {
            self.foreground = None;
        }
        if let Some(delta) = self.session.end_for_tab(tab_id, now) {
            self.accept_delta(delta, now);
        }
    }

    fn handle_focus(&mut self, focused: bool, now: DateTime<Utc>) {
        if !self.focus.observe(focused) {
            return;
        }
        debug!(focused, "Host focus changed");
        self.retarget(now);
    }

    // ========================================================================
    // Tracking state
    // ========================================================================

    async fn handle_disable(&mut self, auto_resume: Option<Duration>, now: DateTime<Utc>) {
        self.set_tracking(false, TrackingCause::Disabled).await;

        match auto_resume {
            Some(after) => self.scheduler.start(deadline(now, after), now).await,
            None => self.scheduler.cancel().await,
        }
    }

    /// Switches tracking on or off, persists the flag, and notifies observers
    /// when the state actually changed.
    async fn set_tracking(&mut self, enabled: bool, cause: TrackingCause) {
        let changed = self.is_tracking != enabled;
        self.is_tracking = enabled;

        let now = self.clock.now();
        self.retarget(now);

        if let Err(e) = store::save(self.store.as_ref(), TRACKING_FLAG_KEY, &enabled).await {
            warn!(error = %e, "Failed to persist tracking flag");
        }

        if changed {
            info!(is_tracking = enabled, cause = %cause, "Tracking state changed");
            // Ignore send error - no subscribers is fine
            let _ = self.event_publisher.send(TrackerEvent::StateChanged {
                is_tracking: enabled,
                cause,
            });
        }
    }

    /// Points the session clock at whatever should be tracked right now.
    ///
    /// Nothing is tracked while tracking is off or the host is in the
    /// background.
    fn retarget(&mut self, now: DateTime<Utc>) {
        let target = self
            .foreground
            .as_ref()
            .filter(|_| self.is_tracking && self.focus.is_focused())
            .map(|(tab_id, url)| (*tab_id, url.as_str()));

        if let Some(delta) = self.session.observe(target, now) {
            self.accept_delta(delta, now);
        }
    }

    // ========================================================================
    // Buffering
    // ========================================================================

    /// Buffers a finished session, flushing early if the buffer is stale.
    fn accept_delta(&mut self, delta: PendingDelta, now: DateTime<Utc>) {
        debug!(
            key = %delta.key,
            day = %delta.day,
            elapsed_ms = delta.milliseconds,
            "Session recorded"
        );
        self.buffer.add(delta);

        if self.buffer.since_last_drain(now) >= self.opportunistic_flush {
            self.spawn_flush(now);
        }
    }

    /// Drains the buffer into an early flush.
    fn spawn_flush(&mut self, now: DateTime<Utc>) {
        let deltas = self.buffer.drain(now);
        if deltas.is_empty() {
            return;
        }

        let writer = Arc::clone(&self.writer);
        self.in_flight.spawn(async move { writer.flush(deltas).await });
    }

    /// Records the outcome of an early flush. Unwritten deltas go back in
    /// the buffer.
    fn finish_flush(&mut self, joined: Result<Result<FlushReport, FlushError>, JoinError>) {
        match joined {
            Ok(Ok(report)) => debug!(
                days = report.days,
                milliseconds = report.milliseconds,
                "Early flush complete"
            ),
            Ok(Err(e)) => {
                warn!(
                    error = %e,
                    requeued = e.unwritten.len(),
                    "Early flush failed, requeueing"
                );
                self.buffer.requeue(e.unwritten);
            }
            Err(e) => warn!(error = %e, "Early flush task did not finish"),
        }
    }

    /// Waits for every early flush to finish.
    async fn settle_flushes(&mut self) {
        while let Some(joined) = self.in_flight.join_next().await {
            self.finish_flush(joined);
        }
    }

    /// Ends the active session and takes everything buffered, including
    /// whatever early flushes failed to write.
    async fn end_and_drain(&mut self, now: DateTime<Utc>) -> Vec<PendingDelta> {
        if let Some(delta) = self.session.end(now) {
            self.buffer.add(delta);
        }
        self.settle_flushes().await;
        self.buffer.drain(now)
    }

    fn snapshot(&self) -> TrackingSnapshot {
        TrackingSnapshot {
            is_tracking: self.is_tracking,
            auto_resume_at: self.scheduler.deadline(),
            active_key: self.session.current().map(|s| s.key.clone()),
            buffered_ms: self.buffer.pending_ms(),
        }
    }
}

/// `now + after`, saturating far in the future.
fn deadline(now: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|after| now.checked_add_signed(after))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tabtime_core::{normalize, ManualClock, AUTO_RESUME_KEY};
    use tokio::sync::oneshot;

    use crate::store::MemoryStore;

    struct Harness {
        actor: TrackerActor,
        clock: ManualClock,
        store: Arc<MemoryStore>,
        events: broadcast::Receiver<TrackerEvent>,
        _commands: mpsc::Sender<TrackerCommand>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 15, 10, 0, 0).unwrap()
    }

    fn create_actor() -> Harness {
        create_actor_with(Arc::new(MemoryStore::new()), Duration::from_secs(3600))
    }

    fn create_actor_with(store: Arc<MemoryStore>, opportunistic_flush: Duration) -> Harness {
        let clock = ManualClock::new(t0());
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, events) = broadcast::channel(16);
        let writer = Arc::new(DurableWriter::new(store.clone()));
        let actor = TrackerActor::new(
            cmd_rx,
            cmd_tx.downgrade(),
            Arc::new(clock.clone()),
            store.clone(),
            writer,
            opportunistic_flush,
            event_tx,
            CancellationToken::new(),
        );
        Harness {
            actor,
            clock,
            store,
            events,
            _commands: cmd_tx,
        }
    }

    impl Harness {
        fn advance(&self, secs: i64) {
            self.clock.advance(chrono::Duration::seconds(secs));
        }

        async fn activate(&mut self, tab: i64, url: &str) {
            let (tx, _rx) = oneshot::channel();
            self.actor
                .handle_command(TrackerCommand::TabActivated {
                    tab_id: TabId::new(tab),
                    url: url.to_string(),
                    respond_to: tx,
                })
                .await;
        }

        async fn update(&mut self, tab: i64, url: &str) {
            let (tx, _rx) = oneshot::channel();
            self.actor
                .handle_command(TrackerCommand::TabUpdated {
                    tab_id: TabId::new(tab),
                    url: url.to_string(),
                    respond_to: tx,
                })
                .await;
        }

        async fn close(&mut self, tab: i64) {
            let (tx, _rx) = oneshot::channel();
            self.actor
                .handle_command(TrackerCommand::TabClosed {
                    tab_id: TabId::new(tab),
                    respond_to: tx,
                })
                .await;
        }

        async fn focus(&mut self, focused: bool) {
            let (tx, _rx) = oneshot::channel();
            self.actor
                .handle_command(TrackerCommand::FocusObserved {
                    focused,
                    respond_to: tx,
                })
                .await;
        }

        async fn disable(&mut self, auto_resume: Option<Duration>) {
            let (tx, _rx) = oneshot::channel();
            self.actor
                .handle_command(TrackerCommand::Disable {
                    auto_resume,
                    respond_to: tx,
                })
                .await;
        }

        async fn enable(&mut self) {
            let (tx, _rx) = oneshot::channel();
            self.actor
                .handle_command(TrackerCommand::Enable { respond_to: tx })
                .await;
        }

        async fn drain(&mut self) -> Vec<PendingDelta> {
            let (tx, rx) = oneshot::channel();
            self.actor
                .handle_command(TrackerCommand::Drain { respond_to: tx })
                .await;
            rx.await.unwrap()
        }

        fn buffered(&self, url: &str) -> u64 {
            let key = normalize(url);
            let today = tabtime_core::DayKey::from_instant(self.clock.now());
            self.actor
                .buffer
                .pending()
                .into_iter()
                .filter(|d| d.key == key && d.day == today)
                .map(|d| d.milliseconds)
                .sum()
        }
    }

    #[tokio::test]
    async fn test_url_change_within_tab_accumulates_same_key() {
        let mut h = create_actor();

        h.activate(1, "https://a.com/page?x=1").await;
        h.advance(10);
        h.update(1, "https://a.com/page#section").await;
        // Same key on the same tab keeps the session open
        assert!(h.actor.session.is_active());
        h.advance(10);
        h.close(1).await;

        assert!(!h.actor.session.is_active());
        assert_eq!(h.buffered("https://a.com/page"), 20_000);
    }

    #[tokio::test]
    async fn test_switch_ends_previous_session_first() {
        let mut h = create_actor();

        h.activate(1, "https://a.com/").await;
        h.advance(5);
        h.activate(2, "https://b.com/").await;
        h.advance(7);
        h.activate(1, "https://a.com/").await;

        assert_eq!(h.buffered("https://a.com/"), 5_000);
        assert_eq!(h.buffered("https://b.com/"), 7_000);
        assert_eq!(
            h.actor.session.current().map(|s| s.key.clone()),
            Some(normalize("https://a.com/"))
        );
    }

    #[tokio::test]
    async fn test_short_visits_are_dropped() {
        let mut h = create_actor();

        h.activate(1, "https://a.com/").await;
        h.advance(2);
        h.activate(2, "https://b.com/").await;

        assert_eq!(h.buffered("https://a.com/"), 0);
        assert!(h.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_for_background_tab_is_ignored() {
        let mut h = create_actor();

        h.activate(1, "https://a.com/").await;
        h.advance(4);
        h.update(2, "https://b.com/").await;
        h.advance(4);
        h.close(1).await;

        assert_eq!(h.buffered("https://a.com/"), 8_000);
        assert_eq!(h.buffered("https://b.com/"), 0);
    }

    #[tokio::test]
    async fn test_closing_background_tab_keeps_session() {
        let mut h = create_actor();

        h.activate(1, "https://a.com/").await;
        h.advance(4);
        h.close(9).await;

        assert!(h.actor.session.is_active());
    }

    #[tokio::test]
    async fn test_invalid_target_ends_session_without_replacement() {
        let mut h = create_actor();

        h.activate(1, "https://a.com/").await;
        h.advance(6);
        h.activate(2, "chrome://settings").await;

        assert!(!h.actor.session.is_active());
        assert_eq!(h.buffered("https://a.com/"), 6_000);
    }

    #[tokio::test]
    async fn test_focus_loss_pauses_and_regain_resumes() {
        let mut h = create_actor();

        h.activate(1, "https://a.com/").await;
        h.advance(5);
        h.focus(false).await;
        assert!(!h.actor.session.is_active());

        h.advance(60);
        h.focus(false).await;
        assert!(!h.actor.session.is_active());

        h.focus(true).await;
        assert!(h.actor.session.is_active());
        h.advance(5);
        h.close(1).await;

        assert_eq!(h.buffered("https://a.com/"), 10_000);
    }

    #[tokio::test]
    async fn test_tab_switch_while_unfocused_is_remembered() {
        let mut h = create_actor();

        h.focus(false).await;
        h.activate(3, "https://c.com/").await;
        assert!(!h.actor.session.is_active());

        h.focus(true).await;
        assert_eq!(
            h.actor.session.current().map(|s| s.tab_id),
            Some(TabId::new(3))
        );
    }

    #[tokio::test]
    async fn test_disable_ends_session_and_persists_flag() {
        let mut h = create_actor();

        h.activate(1, "https://a.com/").await;
        h.advance(4);
        h.disable(None).await;

        assert!(!h.actor.is_tracking);
        assert!(!h.actor.session.is_active());
        assert_eq!(h.buffered("https://a.com/"), 4_000);

        let flag: Option<bool> = store::load(h.store.as_ref(), TRACKING_FLAG_KEY)
            .await
            .unwrap();
        assert_eq!(flag, Some(false));

        let event = h.events.try_recv().unwrap();
        assert_eq!(
            event,
            TrackerEvent::StateChanged {
                is_tracking: false,
                cause: TrackingCause::Disabled
            }
        );

        // Navigation while paused records nothing
        h.activate(2, "https://b.com/").await;
        assert!(!h.actor.session.is_active());
    }

    #[tokio::test]
    async fn test_enable_starts_against_current_foreground() {
        let mut h = create_actor();

        h.activate(1, "https://a.com/").await;
        h.disable(None).await;
        h.activate(2, "https://b.com/").await;
        h.enable().await;

        assert_eq!(
            h.actor.session.current().map(|s| s.key.clone()),
            Some(normalize("https://b.com/"))
        );
    }

    #[tokio::test]
    async fn test_disable_with_auto_resume_persists_timer() {
        let mut h = create_actor();

        h.disable(Some(Duration::from_secs(15 * 60))).await;

        let snapshot = h.actor.snapshot();
        assert!(!snapshot.is_tracking);
        assert_eq!(
            snapshot.auto_resume_at,
            Some(t0() + chrono::Duration::minutes(15))
        );
        assert!(h.store.get(AUTO_RESUME_KEY).await.unwrap().is_some());

        h.enable().await;
        assert_eq!(h.actor.snapshot().auto_resume_at, None);
        assert!(h.store.get(AUTO_RESUME_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_reads_flag_and_fires_past_due_timer() {
        let store = Arc::new(MemoryStore::new());
        store::save(store.as_ref(), TRACKING_FLAG_KEY, &false).await.unwrap();
        store::save(
            store.as_ref(),
            AUTO_RESUME_KEY,
            &tabtime_core::AutoResumeTimer::armed(t0() - chrono::Duration::minutes(3)),
        )
        .await
        .unwrap();

        let mut h = create_actor_with(store, Duration::from_secs(3600));
        h.actor.restore().await;

        assert!(h.actor.is_tracking);
        assert_eq!(
            h.events.try_recv().unwrap(),
            TrackerEvent::StateChanged {
                is_tracking: true,
                cause: TrackingCause::AutoResumed
            }
        );
        assert!(h.events.try_recv().is_err());
        assert!(h.store.get(AUTO_RESUME_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_keeps_pause_without_timer() {
        let store = Arc::new(MemoryStore::new());
        store::save(store.as_ref(), TRACKING_FLAG_KEY, &false).await.unwrap();

        let mut h = create_actor_with(store, Duration::from_secs(3600));
        h.actor.restore().await;

        assert!(!h.actor.is_tracking);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_auto_resume_firing_is_ignored() {
        let mut h = create_actor();

        h.disable(None).await;
        h.actor
            .handle_command(TrackerCommand::AutoResumeFired { generation: 42 })
            .await;

        assert!(!h.actor.is_tracking);
    }

    #[tokio::test]
    async fn test_requeue_restores_deltas() {
        let mut h = create_actor();

        h.activate(1, "https://a.com/").await;
        h.advance(5);
        h.close(1).await;

        let drained = h.drain().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(h.buffered("https://a.com/"), 0);

        h.actor
            .handle_command(TrackerCommand::Requeue { deltas: drained })
            .await;
        assert_eq!(h.buffered("https://a.com/"), 5_000);
    }

    #[tokio::test]
    async fn test_shutdown_ends_session_and_drains() {
        let mut h = create_actor();

        h.activate(1, "https://a.com/").await;
        h.advance(9);

        let (tx, rx) = oneshot::channel();
        h.actor
            .handle_command(TrackerCommand::Shutdown { respond_to: tx })
            .await;
        let drained = rx.await.unwrap();

        assert!(!h.actor.session.is_active());
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].milliseconds, 9_000);
        assert!(h.actor.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_suspend_ends_session_and_drains() {
        let mut h = create_actor();

        h.activate(1, "https://b.com/").await;
        h.advance(10);

        let (tx, rx) = oneshot::channel();
        h.actor
            .handle_command(TrackerCommand::Suspend { respond_to: tx })
            .await;
        let drained = rx.await.unwrap();

        assert!(!h.actor.session.is_active());
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].milliseconds, 10_000);
        assert!(h.actor.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_drain_waits_for_early_flush() {
        let mut h = create_actor_with(Arc::new(MemoryStore::new()), Duration::ZERO);

        h.activate(1, "https://a.com/").await;
        h.advance(6);
        h.close(1).await;
        assert_eq!(h.actor.in_flight.len(), 1);

        assert!(h.drain().await.is_empty());
        assert!(h.actor.in_flight.is_empty());

        let day = tabtime_core::DayKey::from_instant(h.clock.now());
        let record: tabtime_core::DayRecord = store::load(h.store.as_ref(), &day.storage_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.get(&normalize("https://a.com/")), 6_000);
    }

    #[test]
    fn test_deadline_saturates() {
        let now = t0();
        assert_eq!(
            deadline(now, Duration::from_secs(60)),
            now + chrono::Duration::minutes(1)
        );
        assert_eq!(deadline(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
