use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::actions::Action;
use crate::config::Config;
use crate::countdown::Clock;
use crate::error::SessionError;
use crate::notify::{completion_body, Notifier, NOTIFICATION_TITLE};
use crate::persistence::{self, Snapshot, SnapshotStore, SNAPSHOT_KEY};
use crate::session::{DisplayFrame, DisplaySink, Progress, SessionKind, SessionState, SyncMode};
use crate::sync::{Command, Connection, Link, Report};
use crate::ticker::TickLoop;

/// Ping bookkeeping for the timekeeper link
#[derive(Debug, Default)]
struct Liveness {
    /// A ping was sent and no pong has arrived since
    outstanding: bool,
    failures: u32,
}

/// The foreground owner of the user-visible session.
///
/// Commands go to the timekeeper when it is reachable and to the local
/// fallback countdown otherwise. Every value that comes back, from either
/// source, is checked against the session epoch before it is shown.
pub struct Controller {
    state: SessionState,
    config: Config,
    clock: Arc<dyn Clock>,
    link: Option<Link>,
    /// Set once liveness checks gave up on the timekeeper
    degraded: bool,
    liveness: Liveness,
    fallback: TickLoop,
    events: mpsc::UnboundedSender<Action>,
    display: Box<dyn DisplaySink>,
    notifier: Box<dyn Notifier>,
    store: Box<dyn SnapshotStore>,
}

/// Assembles a [`Controller`]; every collaborator is required
pub struct ControllerBuilder {
    config: Config,
    clock: Arc<dyn Clock>,
    display: Option<Box<dyn DisplaySink>>,
    notifier: Option<Box<dyn Notifier>>,
    store: Option<Box<dyn SnapshotStore>>,
    events: Option<mpsc::UnboundedSender<Action>>,
}

impl ControllerBuilder {
    pub fn display(mut self, display: impl DisplaySink + 'static) -> Self {
        self.display = Some(Box::new(display));
        self
    }

    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Some(Box::new(notifier));
        self
    }

    pub fn store(mut self, store: impl SnapshotStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn events(mut self, events: mpsc::UnboundedSender<Action>) -> Self {
        self.events = Some(events);
        self
    }

    /// Restore the persisted session (if usable) and publish the first frame
    pub fn build(self) -> Result<Controller, SessionError> {
        let display = self.display.ok_or(SessionError::MissingCollaborator("display"))?;
        let notifier = self
            .notifier
            .ok_or(SessionError::MissingCollaborator("notifier"))?;
        let store = self.store.ok_or(SessionError::MissingCollaborator("store"))?;
        let events = self.events.ok_or(SessionError::MissingCollaborator("events"))?;

        let state = persistence::restore(
            store.as_ref(),
            self.config.durations,
            self.clock.now(),
            self.config.snapshot_staleness(),
        );

        let mut controller = Controller {
            state,
            config: self.config,
            clock: self.clock,
            link: None,
            degraded: false,
            liveness: Liveness::default(),
            fallback: TickLoop::new(),
            events,
            display,
            notifier,
            store,
        };
        controller.render();
        Ok(controller)
    }
}

impl Controller {
    pub fn builder(config: Config, clock: Arc<dyn Clock>) -> ControllerBuilder {
        ControllerBuilder {
            config,
            clock,
            display: None,
            notifier: None,
            store: None,
            events: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn mode(&self) -> SyncMode {
        if self.link.is_some() {
            SyncMode::Timekeeper
        } else if self.degraded {
            SyncMode::Local
        } else {
            SyncMode::Connecting
        }
    }

    pub fn fallback_armed(&self) -> bool {
        self.fallback.is_armed()
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        self.begin()?;
        self.render();
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), SessionError> {
        let progress = self.state.halt(self.clock.now(), self.config.drift_tolerance_secs)?;
        self.fallback.cancel();
        self.dispatch(&Command::Stop);
        match progress {
            Progress::Completed(finished) => self.complete(finished),
            _ => info!(remaining = self.state.remaining(), "Session paused"),
        }
        self.render();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.fallback.cancel();
        let initial_seconds = self.state.rewind();
        self.dispatch(&Command::Reset { initial_seconds });
        info!(remaining = initial_seconds, kind = %self.state.kind(), "Session reset");
        self.render();
    }

    pub fn toggle_kind(&mut self) {
        if let Some(finished) = self.switch_kind() {
            self.complete(finished);
        }
        self.render();
    }

    /// Start or pause, whichever applies
    pub fn toggle_running(&mut self) -> Result<(), SessionError> {
        if self.state.running() {
            self.stop()
        } else {
            self.start()
        }
    }

    /// Take over a freshly established timekeeper connection
    pub fn attach(&mut self, connection: Connection) {
        if self.degraded {
            debug!(client = %connection.client(), "Timekeeper connection refused, staying local");
            return;
        }
        let link = Link::attach(connection, self.events.clone());
        info!(client = %link.client(), "Timekeeper attached");
        self.link = Some(link);
        self.liveness = Liveness::default();

        if self.state.running() {
            // Hand the running countdown over from the fallback, unless
            // completing it already started the next one remotely
            let chained = self.resync_local();
            if !chained && self.state.running() && self.dispatch(&self.start_command()) {
                self.fallback.cancel();
            }
        } else {
            self.dispatch(&Command::Sync);
        }
        self.render();
    }

    pub fn on_report(&mut self, report: Report) {
        if self.link.is_none() {
            debug!(?report, "Ignoring report from a detached timekeeper");
            return;
        }
        match report {
            Report::Pong => {
                self.liveness = Liveness::default();
            }
            Report::Error { message } => warn!(%message, "Timekeeper reported an error"),
            Report::Completed { .. } => self.apply(0),
            Report::Tick {
                remaining_seconds,
                running,
                resync,
            } => match (self.state.running(), running, resync) {
                (true, true, _) => self.apply(remaining_seconds),
                (true, false, true) => {
                    // The timekeeper lost our countdown; rehydrate it
                    info!("Timekeeper idle while session runs, restarting it");
                    if !self.resync_local() && self.state.running() {
                        self.dispatch(&self.start_command());
                    }
                }
                (false, true, true) => {
                    // Restored sessions stay paused
                    info!("Timekeeper running while session is paused, stopping it");
                    self.dispatch(&Command::Stop);
                }
                (false, false, true) => {
                    debug!(remaining_seconds, "Timekeeper idle, keeping paused session")
                }
                _ => debug!(remaining_seconds, running, "Ignoring late tick"),
            },
        }
        self.render();
    }

    pub fn on_fallback_tick(&mut self, generation: u64) {
        if !self.fallback.is_current(generation) {
            debug!(generation, "Ignoring tick from a cancelled fallback loop");
            return;
        }
        let progress = self.state.step(self.clock.now(), self.config.drift_tolerance_secs);
        self.settle(progress);
        self.render();
    }

    /// Reconcile right away, e.g. after the terminal regains focus
    pub fn resync(&mut self) {
        self.resync_local();
        self.dispatch(&Command::Sync);
        self.render();
    }

    pub fn check_liveness(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        let unanswered = self.liveness.outstanding;
        let sent = link.send(&Command::Ping).is_ok();
        self.liveness.outstanding = sent;
        if unanswered || !sent {
            self.liveness.failures += 1;
            warn!(failures = self.liveness.failures, "Timekeeper liveness check failed");
        }
        if self.liveness.failures >= self.config.max_liveness_failures {
            self.degrade();
        }
    }

    /// Persist a paused snapshot; called when losing focus and on teardown
    pub fn suspend(&mut self) {
        let now = self.clock.now();
        let remaining = match self.state.countdown() {
            Some(countdown) => countdown
                .correct(self.state.remaining(), now, self.config.drift_tolerance_secs)
                .min(self.state.remaining()),
            None => self.state.remaining(),
        };
        let snapshot = Snapshot::capture(self.state.kind(), remaining, now);
        match self.store.put(SNAPSHOT_KEY, &snapshot) {
            Ok(()) => debug!(remaining, kind = %snapshot.kind, "Snapshot saved"),
            Err(e) => warn!(error = %e, "Failed to save snapshot"),
        }
    }

    fn begin(&mut self) -> Result<(), SessionError> {
        self.state.begin(self.clock.now())?;
        let command = self.start_command();
        if !self.dispatch(&command) {
            self.arm_fallback();
        }
        info!(
            remaining = self.state.remaining(),
            kind = %self.state.kind(),
            epoch = ?self.state.epoch(),
            mode = self.mode().label(),
            "Session started"
        );
        Ok(())
    }

    /// Stop if running, then flip kinds. When the stop reconciles to zero the
    /// kind is left alone and the finished kind is returned for completion.
    fn switch_kind(&mut self) -> Option<SessionKind> {
        if self.state.running() {
            let progress = self.state.halt(self.clock.now(), self.config.drift_tolerance_secs);
            self.fallback.cancel();
            self.dispatch(&Command::Stop);
            if let Ok(Progress::Completed(finished)) = progress {
                return Some(finished);
            }
        }
        let initial_seconds = self.state.switch_kind();
        self.dispatch(&Command::Reset { initial_seconds });
        info!(kind = %self.state.kind(), remaining = initial_seconds, "Switched session kind");
        None
    }

    /// Completed, then idle in the other kind, then running, with no render
    /// in between.
    fn complete(&mut self, finished: SessionKind) {
        info!(kind = %finished, "Session complete");
        self.fallback.cancel();
        self.notifier
            .notify(NOTIFICATION_TITLE, completion_body(finished));
        self.switch_kind();
        if let Err(e) = self.begin() {
            warn!(error = %e, "Could not chain into the next session");
        }
    }

    fn apply(&mut self, reported: u64) {
        let progress = self
            .state
            .advance(reported, self.clock.now(), self.config.drift_tolerance_secs);
        self.settle(progress);
    }

    /// Reconcile the running countdown against its epoch; true when that completed it
    fn resync_local(&mut self) -> bool {
        let remaining = self.state.remaining();
        let progress = self
            .state
            .advance(remaining, self.clock.now(), self.config.drift_tolerance_secs);
        let completed = matches!(progress, Progress::Completed(_));
        self.settle(progress);
        completed
    }

    fn settle(&mut self, progress: Progress) {
        if let Progress::Completed(finished) = progress {
            self.complete(finished);
        }
    }

    fn start_command(&self) -> Command {
        Command::Start {
            initial_seconds: self.state.remaining(),
            tick_interval_ms: self.config.tick_interval_ms,
        }
    }

    /// Send to the timekeeper; false when there is none or it is unreachable
    fn dispatch(&self, command: &Command) -> bool {
        let Some(link) = &self.link else {
            return false;
        };
        match link.send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, ?command, "Timekeeper unreachable");
                false
            }
        }
    }

    fn arm_fallback(&mut self) {
        let events = self.events.clone();
        let generation = self.fallback.install(self.config.tick_interval(), move |generation| {
            events.send(Action::FallbackTick(generation)).is_ok()
        });
        debug!(generation, "Local fallback countdown armed");
    }

    /// Give up on the timekeeper for the rest of the run
    fn degrade(&mut self) {
        warn!(
            failures = self.liveness.failures,
            "Timekeeper unresponsive, using local countdown from now on"
        );
        self.link = None;
        self.degraded = true;
        if self.state.running() && !self.fallback.is_armed() {
            self.arm_fallback();
        }
        self.render();
    }

    fn render(&mut self) {
        let frame = DisplayFrame::render(&self.state, self.mode());
        self.display.show(&frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::countdown::testing::TestClock;
    use crate::notify::testing::RecordingNotifier;
    use crate::persistence::MemoryStore;
    use crate::session::{Durations, Phase};
    use crate::sync::{protocol, ClientId, Inbound, Timekeeper};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingDisplay {
        frames: Arc<Mutex<Vec<DisplayFrame>>>,
    }

    impl RecordingDisplay {
        fn last(&self) -> DisplayFrame {
            self.frames.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl DisplaySink for RecordingDisplay {
        fn show(&mut self, frame: &DisplayFrame) {
            self.frames.lock().unwrap().push(frame.clone());
        }
    }

    /// Store that shares its contents with the test after being moved in
    #[derive(Clone, Default)]
    struct SharedStore(Arc<Mutex<MemoryStore>>);

    impl SnapshotStore for SharedStore {
        fn put(&mut self, key: &str, snapshot: &Snapshot) -> Result<(), crate::error::SnapshotError> {
            self.0.lock().unwrap().put(key, snapshot)
        }

        fn get(&self, key: &str) -> Result<Option<Snapshot>, crate::error::SnapshotError> {
            self.0.lock().unwrap().get(key)
        }
    }

    struct Harness {
        controller: Controller,
        events: mpsc::UnboundedReceiver<Action>,
        clock: TestClock,
        notifier: RecordingNotifier,
        display: RecordingDisplay,
        store: SharedStore,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_store(SharedStore::default())
        }

        fn with_store(store: SharedStore) -> Self {
            Self::with_store_and_clock(store, TestClock::new())
        }

        fn with_store_and_clock(store: SharedStore, clock: TestClock) -> Self {
            let (tx, events) = mpsc::unbounded_channel();
            let notifier = RecordingNotifier::default();
            let display = RecordingDisplay::default();
            let config = Config {
                durations: Durations {
                    focus_secs: 1500,
                    break_secs: 300,
                },
                ..Config::default()
            };
            let controller = Controller::builder(config, Arc::new(clock.clone()))
                .display(display.clone())
                .notifier(notifier.clone())
                .store(store.clone())
                .events(tx)
                .build()
                .unwrap();
            Self {
                controller,
                events,
                clock,
                notifier,
                display,
                store,
            }
        }

        /// Feed the next queued action into the controller
        async fn pump(&mut self) {
            match self.events.recv().await.expect("event channel closed") {
                Action::Report(report) => self.controller.on_report(report),
                Action::FallbackTick(generation) => self.controller.on_fallback_tick(generation),
                other => panic!("unexpected action {:?}", other),
            }
        }

        async fn pump_report(&mut self) -> Report {
            match self.events.recv().await.expect("event channel closed") {
                Action::Report(report) => {
                    self.controller.on_report(report.clone());
                    report
                }
                other => panic!("expected a report, got {:?}", other),
            }
        }

        async fn attach_timekeeper(&mut self) -> crate::sync::TimekeeperHandle {
            let handle = Timekeeper::spawn(Arc::new(self.clock.clone()), 2);
            let connection = handle.connect().await.unwrap();
            self.controller.attach(connection);
            // Answer to the initial sync
            self.pump_report().await;
            handle
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_requires_every_collaborator() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = Controller::builder(Config::default(), Arc::new(TestClock::new()))
            .notifier(RecordingNotifier::default())
            .store(MemoryStore::new())
            .events(tx)
            .build();
        assert_eq!(
            result.err(),
            Some(SessionError::MissingCollaborator("display"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_before_connection_use_fallback() {
        let mut h = Harness::new();
        assert_eq!(h.controller.mode(), SyncMode::Connecting);

        h.controller.start().unwrap();
        assert!(h.controller.fallback_armed());
        assert_eq!(h.display.last().button, "Pause");

        h.pump().await;
        assert_eq!(h.controller.state().remaining(), 1499);
        h.pump().await;
        assert_eq!(h.controller.state().remaining(), 1498);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_then_immediate_stop_keeps_remaining() {
        let mut h = Harness::new();
        h.controller.start().unwrap();
        h.controller.stop().unwrap();
        assert_eq!(h.controller.state().remaining(), 1500);
        assert!(!h.controller.state().running());
        assert!(!h.controller.fallback_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_transitions_are_rejected() {
        let mut h = Harness::new();
        assert!(h.controller.stop().is_err());
        h.controller.start().unwrap();
        assert!(h.controller.start().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_from_any_state() {
        let mut h = Harness::new();
        h.controller.reset();
        assert_eq!(h.controller.state().remaining(), 1500);

        h.controller.start().unwrap();
        h.clock.jump(100);
        h.controller.resync();
        assert_eq!(h.controller.state().remaining(), 1400);
        h.controller.reset();
        assert_eq!(h.controller.state().remaining(), 1500);
        assert!(!h.controller.state().running());

        h.controller.toggle_kind();
        h.controller.start().unwrap();
        h.controller.stop().unwrap();
        h.controller.reset();
        assert_eq!(h.controller.state().remaining(), 300);
        assert_eq!(h.controller.state().kind(), SessionKind::Break);
        assert!(!h.controller.fallback_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_kind_stops_and_resets() {
        let mut h = Harness::new();
        h.controller.start().unwrap();
        h.controller.toggle_kind();
        assert_eq!(h.controller.state().kind(), SessionKind::Break);
        assert_eq!(h.controller.state().remaining(), 300);
        assert_eq!(h.controller.state().phase(), Phase::Idle);
        assert!(!h.controller.fallback_armed());
        assert_eq!(h.notifier.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_at_full_duration_chains_into_break() {
        let mut h = Harness::new();
        h.controller.start().unwrap();

        h.clock.jump(1500);
        h.controller.resync();

        let state = h.controller.state();
        assert_eq!(state.kind(), SessionKind::Break);
        assert_eq!(state.remaining(), 300);
        assert!(state.running());
        assert_eq!(h.notifier.count(), 1);
        assert_eq!(
            h.notifier.sent.lock().unwrap()[0].1,
            "Focus session complete! Time for a break."
        );
        // No half-toggled frame was ever shown
        assert!(h
            .display
            .frames
            .lock()
            .unwrap()
            .iter()
            .all(|frame| frame.display != "00:00"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_after_stall_completes_with_one_notification() {
        let mut h = Harness::new();
        h.controller.start().unwrap();

        h.clock.jump(1500);
        h.controller.toggle_kind();

        let state = h.controller.state();
        assert_eq!(h.notifier.count(), 1);
        assert_eq!(state.kind(), SessionKind::Break);
        assert_eq!(state.remaining(), 300);
        assert!(state.running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_mid_session_does_not_notify() {
        let mut h = Harness::new();
        h.controller.start().unwrap();

        h.clock.jump(60);
        h.controller.toggle_kind();

        assert_eq!(h.notifier.count(), 0);
        assert_eq!(h.controller.state().kind(), SessionKind::Break);
        assert!(!h.controller.state().running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_zero_reports_complete_once() {
        let mut h = Harness::new();
        let _keeper = h.attach_timekeeper().await;
        h.controller.start().unwrap();

        h.clock.jump(1500);
        h.controller.on_report(Report::completed());
        h.controller.on_report(Report::completed());
        h.controller.on_report(Report::tick(0, true));

        assert_eq!(h.notifier.count(), 1);
        assert_eq!(h.controller.state().kind(), SessionKind::Break);
        assert_eq!(h.controller.state().remaining(), 300);
        assert!(h.controller.state().running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_timekeeper_reconciles_to_zero() {
        let mut h = Harness::new();
        let _keeper = h.attach_timekeeper().await;
        h.controller.toggle_kind();
        // Drain the reset broadcast
        h.pump_report().await;
        h.controller.start().unwrap();

        assert_eq!(h.pump_report().await, Report::tick(299, true));
        assert_eq!(h.controller.state().remaining(), 299);

        h.clock.jump(400);
        // Whatever arrives next, the epoch says the break is over
        h.controller.on_report(Report::tick(298, true));
        assert_eq!(h.notifier.count(), 1);
        assert_eq!(h.controller.state().kind(), SessionKind::Focus);
        assert_eq!(h.controller.state().remaining(), 1500);

        h.controller.on_report(Report::completed());
        assert_eq!(h.notifier.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_stall_completes_exactly_once() {
        let store = SharedStore::default();
        store
            .0
            .lock()
            .unwrap()
            .put(
                SNAPSHOT_KEY,
                &Snapshot::capture(SessionKind::Focus, 100, TestClock::new().now()),
            )
            .unwrap();
        let mut h = Harness::with_store(store);
        assert_eq!(h.controller.state().remaining(), 100);

        h.controller.start().unwrap();
        h.pump().await;
        assert_eq!(h.controller.state().remaining(), 99);

        h.clock.jump(129);
        h.pump().await;
        assert_eq!(h.notifier.count(), 1);
        assert_eq!(h.controller.state().kind(), SessionKind::Break);
        assert_eq!(h.controller.state().remaining(), 300);
        assert!(h.controller.state().running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_tick_after_stop_is_ignored() {
        let mut h = Harness::new();
        let _keeper = h.attach_timekeeper().await;
        h.controller.start().unwrap();
        assert_eq!(h.pump_report().await, Report::tick(1499, true));

        h.controller.stop().unwrap();
        h.controller.on_report(Report::tick(1498, true));
        assert_eq!(h.controller.state().remaining(), 1499);
        assert!(!h.controller.state().running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_echoed_stop_does_not_pause_chained_session() {
        let mut h = Harness::new();
        let _keeper = h.attach_timekeeper().await;
        h.controller.start().unwrap();
        h.clock.jump(1500);
        h.controller.resync();
        assert!(h.controller.state().running());

        // Echo of the reset sent while switching kinds
        h.controller.on_report(Report::tick(300, false));
        assert!(h.controller.state().running());
        assert_eq!(h.controller.state().kind(), SessionKind::Break);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_resync_answer_leaves_paused_session_alone() {
        let mut h = Harness::new();
        let _keeper = h.attach_timekeeper().await;
        h.controller.start().unwrap();
        h.clock.jump(100);
        h.controller.stop().unwrap();
        assert_eq!(h.controller.state().remaining(), 1400);

        h.controller.on_report(Report::Tick {
            remaining_seconds: 1500,
            running: false,
            resync: true,
        });
        assert_eq!(h.controller.state().remaining(), 1400);
        assert!(!h.controller.state().running());
        assert_eq!(h.notifier.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_rehydrates_lost_timekeeper_countdown() {
        let mut h = Harness::new();
        let keeper = h.attach_timekeeper().await;
        h.controller.start().unwrap();
        assert_eq!(h.pump_report().await, Report::tick(1499, true));

        // Simulate the host having recycled the timekeeper's countdown
        h.controller.on_report(Report::Tick {
            remaining_seconds: 0,
            running: false,
            resync: true,
        });
        assert!(h.controller.state().running());

        let mut probe = keeper.connect().await.unwrap();
        let frame = probe.recv_frame().await.unwrap();
        let report: Report = protocol::decode(&frame).unwrap();
        assert!(matches!(report, Report::Tick { running: true, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_controller_stops_running_timekeeper_on_resync() {
        let mut h = Harness::new();
        let keeper = h.attach_timekeeper().await;

        let peer = keeper.connect().await.unwrap();
        peer.send(&Command::Start {
            initial_seconds: 50,
            tick_interval_ms: 1000,
        })
        .unwrap();

        h.controller.resync();
        loop {
            let report = h.pump_report().await;
            if matches!(report, Report::Tick { resync: true, .. }) {
                break;
            }
        }
        // The stop broadcast follows
        assert_eq!(h.pump_report().await, Report::tick(50, false));
        assert!(!h.controller.state().running());
        assert_eq!(h.controller.state().remaining(), 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_failures_degrade_to_local_countdown() {
        let mut h = Harness::new();

        // A timekeeper that accepts frames but never answers
        let (inbox_tx, _inbox_rx) = mpsc::unbounded_channel::<Inbound>();
        let (phantom_tx, reports) = mpsc::unbounded_channel::<String>();
        h.controller
            .attach(Connection::new(ClientId::from_raw(1), inbox_tx, reports));
        assert_eq!(h.controller.mode(), SyncMode::Timekeeper);

        h.controller.start().unwrap();
        assert!(!h.controller.fallback_armed());

        h.controller.check_liveness();
        h.controller.check_liveness();
        h.controller.check_liveness();
        assert_eq!(h.controller.mode(), SyncMode::Timekeeper);
        h.controller.check_liveness();
        assert_eq!(h.controller.mode(), SyncMode::Local);
        assert!(h.controller.fallback_armed());

        // The phantom keeps talking, nobody listens
        let _ = phantom_tx.send(protocol::encode(&Report::tick(10, true)).unwrap());
        h.controller.on_report(Report::tick(10, true));
        assert_eq!(h.controller.state().remaining(), 1500);

        h.pump().await;
        assert_eq!(h.controller.state().remaining(), 1499);
        h.pump().await;
        assert_eq!(h.controller.state().remaining(), 1498);

        // Never reattach after giving up
        let (inbox_tx, _inbox_rx) = mpsc::unbounded_channel::<Inbound>();
        let (_tx, reports) = mpsc::unbounded_channel::<String>();
        h.controller
            .attach(Connection::new(ClientId::from_raw(2), inbox_tx, reports));
        assert_eq!(h.controller.mode(), SyncMode::Local);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_timekeeper_degrades_after_three_checks() {
        let mut h = Harness::new();
        let keeper = h.attach_timekeeper().await;
        keeper.terminate();
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.controller.start().unwrap();
        // The start could not be delivered, so the fallback took it
        assert!(h.controller.fallback_armed());

        for _ in 0..3 {
            h.controller.check_liveness();
        }
        assert_eq!(h.controller.mode(), SyncMode::Local);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_resets_failures() {
        let mut h = Harness::new();
        let _keeper = h.attach_timekeeper().await;
        for _ in 0..10 {
            h.controller.check_liveness();
            assert_eq!(h.pump_report().await, Report::Pong);
        }
        assert_eq!(h.controller.mode(), SyncMode::Timekeeper);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_hands_over_running_fallback() {
        let mut h = Harness::new();
        h.controller.start().unwrap();
        assert!(h.controller.fallback_armed());

        let keeper = Timekeeper::spawn(Arc::new(h.clock.clone()), 2);
        h.controller.attach(keeper.connect().await.unwrap());
        assert!(!h.controller.fallback_armed());

        assert_eq!(h.pump_report().await, Report::tick(1499, true));
        assert_eq!(h.controller.state().remaining(), 1499);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_then_restore_roundtrip() {
        let mut h = Harness::new();
        h.controller.toggle_kind();
        h.controller.start().unwrap();
        h.clock.jump(40);
        h.controller.suspend();

        let restored = Harness::with_store_and_clock(h.store.clone(), h.clock.clone());
        let state = restored.controller.state();
        assert_eq!(state.kind(), SessionKind::Break);
        assert_eq!(state.remaining(), 260);
        assert!(!state.running());
        assert_eq!(restored.display.last().label, "Paused");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_snapshot_gives_fresh_defaults() {
        let store = SharedStore::default();
        let saved_at = TestClock::new().now() - chrono::Duration::hours(2);
        store
            .0
            .lock()
            .unwrap()
            .put(SNAPSHOT_KEY, &Snapshot::capture(SessionKind::Break, 42, saved_at))
            .unwrap();

        let h = Harness::with_store(store);
        assert_eq!(h.controller.state().kind(), SessionKind::Focus);
        assert_eq!(h.controller.state().remaining(), 1500);
    }
}
