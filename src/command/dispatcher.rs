//! Drive Command Dispatcher
//!
//! Turns a continuously-updating drive intent into a bounded rate of
//! outbound commands. All mutable state lives in one actor task consuming a
//! single event queue, so cancellation is atomic and ordering between "new
//! input arrived" and "dispatch in progress" is explicit.
//!
//! Invariants:
//! - at most one drive command is in flight at any time (sends are awaited
//!   inline by the actor)
//! - newer input overwrites the pending slot; intermediate vectors may be
//!   dropped but the last one before disengagement is always sent
//! - a stop is never dropped: the dispatch loop re-absorbs queued input
//!   after every send before re-checking the slot

use crate::api::{ApiError, CommandSink};
use crate::config::ConsoleConfig;
use crate::input::DriveIntent;
use crate::protocol::{CommandRequest, DriveCommandPayload, DriveReason, DriveVector};
use crate::session::{LockState, SessionContext};
use crate::status::StatusSender;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// At most one outstanding drive request; newer input overwrites it
#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingDriveRequest {
    vector: DriveVector,
    reason: DriveReason,
    duration_ms: u64,
}

/// Operator-side requests that do not come from the joystick watch
#[derive(Debug)]
enum DispatchEvent {
    SpeedLimit(f32),
    Stop,
    Emergency,
    Blade { action: String, reason: String },
}

/// Cloneable handle for pushing operator actions into the dispatcher
#[derive(Clone)]
pub struct DriveHandle {
    tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl DriveHandle {
    /// Change the speed limit; takes effect immediately while driving
    pub fn set_speed_limit(&self, limit: f32) {
        let _ = self.tx.send(DispatchEvent::SpeedLimit(limit));
    }

    /// Explicit stop button
    pub fn stop(&self) {
        let _ = self.tx.send(DispatchEvent::Stop);
    }

    /// Emergency stop command, sent even while locked
    pub fn emergency(&self) {
        let _ = self.tx.send(DispatchEvent::Emergency);
    }

    /// Blade/implement control command
    pub fn blade(&self, action: impl Into<String>, reason: impl Into<String>) {
        let _ = self.tx.send(DispatchEvent::Blade {
            action: action.into(),
            reason: reason.into(),
        });
    }
}

/// Spawns the dispatcher actor
pub struct DriveDispatcher;

impl DriveDispatcher {
    /// Start the dispatch actor. Returns the operator handle, a watch of the
    /// last successfully sent vector (for the movement readout), and the
    /// actor's join handle.
    pub fn spawn(
        sink: Arc<dyn CommandSink>,
        session: SessionContext,
        intent_rx: watch::Receiver<DriveIntent>,
        status: StatusSender,
        config: &ConsoleConfig,
    ) -> (DriveHandle, watch::Receiver<DriveVector>, JoinHandle<()>) {
        let (tx, events_rx) = mpsc::unbounded_channel();
        let (movement_tx, movement_rx) = watch::channel(DriveVector::zero());

        let mut ticker = interval(config.reissue_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let locked = !session.is_unlocked();
        let actor = DispatcherActor {
            sink,
            lock_rx: session.lock_watch(),
            session,
            intent_rx,
            events_rx,
            movement_tx,
            status,
            ticker,
            pending: None,
            aux: VecDeque::new(),
            engaged: false,
            locked,
            speed_limit: config.default_speed_limit,
            drive_duration_ms: config.drive_duration_ms,
            stop_duration_ms: config.stop_duration_ms,
        };

        let task = tokio::spawn(actor.run());
        (DriveHandle { tx }, movement_rx, task)
    }
}

enum Wake {
    Intent,
    Event(Option<DispatchEvent>),
    Reissue,
    LockChanged,
    InputClosed,
}

struct DispatcherActor {
    sink: Arc<dyn CommandSink>,
    session: SessionContext,
    intent_rx: watch::Receiver<DriveIntent>,
    events_rx: mpsc::UnboundedReceiver<DispatchEvent>,
    lock_rx: watch::Receiver<LockState>,
    movement_tx: watch::Sender<DriveVector>,
    status: StatusSender,
    ticker: Interval,
    /// The coalescing slot
    pending: Option<PendingDriveRequest>,
    /// Emergency/blade sends, dispatched ahead of the pending drive
    aux: VecDeque<CommandRequest>,
    engaged: bool,
    locked: bool,
    speed_limit: f32,
    drive_duration_ms: u64,
    stop_duration_ms: u64,
}

impl DispatcherActor {
    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                changed = self.intent_rx.changed() => {
                    if changed.is_err() { Wake::InputClosed } else { Wake::Intent }
                }
                event = self.events_rx.recv() => Wake::Event(event),
                _ = self.ticker.tick(), if self.engaged && !self.locked => Wake::Reissue,
                changed = self.lock_rx.changed() => {
                    if changed.is_err() { Wake::InputClosed } else { Wake::LockChanged }
                }
            };

            match wake {
                Wake::Intent => {
                    let intent = *self.intent_rx.borrow_and_update();
                    self.apply_intent(intent);
                }
                Wake::Event(Some(event)) => self.apply_event(event),
                Wake::Event(None) | Wake::InputClosed => break,
                Wake::Reissue => self.apply_reissue(),
                Wake::LockChanged => self.apply_lock(),
            }

            // Dispatch loop: sends run inline, so single-flight holds by
            // construction. Re-absorbing queued input after every send is
            // what keeps a stop queued behind an in-flight drive alive.
            while !self.aux.is_empty() || self.pending.is_some() {
                if let Some(request) = self.aux.pop_front() {
                    self.send_request(&request).await;
                } else if let Some(pending) = self.pending.take() {
                    self.send_drive(pending).await;
                }
                self.absorb_updates();
            }
        }

        debug!("Drive dispatcher stopped");
    }

    /// Apply updates that arrived while a send was in flight
    fn absorb_updates(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event);
        }
        if self.intent_rx.has_changed().unwrap_or(false) {
            let intent = *self.intent_rx.borrow_and_update();
            self.apply_intent(intent);
        }
        if self.lock_rx.has_changed().unwrap_or(false) {
            self.apply_lock();
        }
    }

    fn apply_intent(&mut self, intent: DriveIntent) {
        if self.locked {
            return;
        }

        if intent.engaged {
            if !self.engaged {
                self.engaged = true;
                self.ticker.reset();
            }
            self.pending = Some(self.drive_request(intent.vector));
        } else if self.engaged {
            self.engaged = false;
            self.pending = Some(self.stop_request());
        }
    }

    fn apply_reissue(&mut self) {
        if self.locked || !self.engaged {
            return;
        }
        // Re-read the current intent, not a cached payload, so speed and
        // vector changes land without waiting for new pointer movement
        let intent = *self.intent_rx.borrow();
        if intent.engaged {
            self.pending = Some(self.drive_request(intent.vector));
        }
    }

    fn apply_event(&mut self, event: DispatchEvent) {
        match event {
            DispatchEvent::SpeedLimit(limit) => {
                self.speed_limit = limit.clamp(0.0, 1.0);
                if self.engaged && !self.locked {
                    let intent = *self.intent_rx.borrow();
                    if intent.engaged {
                        self.pending = Some(self.drive_request(intent.vector));
                    }
                }
            }
            DispatchEvent::Stop => {
                self.engaged = false;
                self.pending = Some(self.stop_request());
            }
            DispatchEvent::Emergency => {
                self.aux.push_back(CommandRequest::Emergency {
                    session_id: String::new(), // filled at send time
                });
            }
            DispatchEvent::Blade { action, reason } => {
                self.aux.push_back(CommandRequest::Blade {
                    session_id: String::new(),
                    action,
                    reason,
                });
            }
        }
    }

    fn apply_lock(&mut self) {
        let state = self.lock_rx.borrow_and_update().clone();
        match state {
            LockState::Locked if !self.locked => {
                self.locked = true;
                self.engaged = false;
                // Pending drive is discarded unsent; the mandatory stop
                // replaces it
                self.pending = Some(self.stop_request());
            }
            LockState::Unlocked { .. } => {
                self.locked = false;
            }
            _ => {}
        }
    }

    fn drive_request(&self, vector: DriveVector) -> PendingDriveRequest {
        PendingDriveRequest {
            vector,
            reason: DriveReason::ManualJoystick,
            duration_ms: self.drive_duration_ms,
        }
    }

    fn stop_request(&self) -> PendingDriveRequest {
        PendingDriveRequest {
            vector: DriveVector::zero(),
            reason: DriveReason::ManualStop,
            duration_ms: self.stop_duration_ms,
        }
    }

    async fn send_drive(&mut self, request: PendingDriveRequest) {
        let Some(session_id) = self.session.session_id().await else {
            warn!("No session, dropping {:?} command", request.reason);
            return;
        };

        let payload = match request.reason {
            DriveReason::ManualJoystick => DriveCommandPayload::drive(
                session_id,
                request.vector,
                self.speed_limit,
                request.duration_ms,
            ),
            DriveReason::ManualStop => {
                DriveCommandPayload::stop(session_id, self.speed_limit, request.duration_ms)
            }
        };

        let sent_vector = payload.vector;
        match self.sink.send_command(&CommandRequest::Drive(payload)).await {
            Ok(_) => {
                let _ = self.movement_tx.send(sent_vector);
            }
            Err(ApiError::Blocked { reason }) => {
                warn!("Drive command blocked: {}", reason);
                self.status.warn(format!("Command blocked: {}", reason));
            }
            Err(e) => {
                // Transport errors are non-fatal; the next input or re-issue
                // tick carries the latest intent anyway
                warn!("Drive command send failed: {}", e);
                self.status.warn("Drive command failed");
            }
        }
    }

    async fn send_request(&mut self, request: &CommandRequest) {
        let Some(session_id) = self.session.session_id().await else {
            warn!("No session, dropping command");
            return;
        };

        let request = match request {
            CommandRequest::Emergency { .. } => CommandRequest::Emergency { session_id },
            CommandRequest::Blade { action, reason, .. } => CommandRequest::Blade {
                session_id,
                action: action.clone(),
                reason: reason.clone(),
            },
            CommandRequest::Drive(payload) => CommandRequest::Drive(payload.clone()),
        };

        match self.sink.send_command(&request).await {
            Ok(_) => {
                if matches!(request, CommandRequest::Emergency { .. }) {
                    self.status.warn("Emergency stop sent");
                }
            }
            Err(e) => {
                warn!("Command send failed: {}", e);
                self.status.warn(format!("Command failed: {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandOutcome, CommandResult};
    use crate::session::test_support::unlocked_context;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock transport that records calls and asserts serialization
    struct MockSink {
        calls: Mutex<Vec<CommandRequest>>,
        in_flight: AtomicBool,
        overlapped: AtomicBool,
        fail_next: AtomicBool,
        delay: Duration,
    }

    impl MockSink {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicBool::new(false),
                overlapped: AtomicBool::new(false),
                fail_next: AtomicBool::new(false),
                delay,
            })
        }

        fn calls(&self) -> Vec<CommandRequest> {
            self.calls.lock().unwrap().clone()
        }

        fn drive_calls(&self) -> Vec<DriveCommandPayload> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    CommandRequest::Drive(p) => Some(p),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl CommandSink for MockSink {
        async fn send_command(&self, request: &CommandRequest) -> Result<CommandOutcome, ApiError> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.store(false, Ordering::SeqCst);
            self.calls.lock().unwrap().push(request.clone());

            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ApiError::InvalidResponse("mock failure".into()));
            }
            Ok(CommandOutcome {
                result: CommandResult::Ok,
                status_reason: None,
            })
        }
    }

    struct Rig {
        sink: Arc<MockSink>,
        handle: DriveHandle,
        intent_tx: watch::Sender<DriveIntent>,
        lock_tx: Arc<watch::Sender<LockState>>,
        movement_rx: watch::Receiver<DriveVector>,
        _task: JoinHandle<()>,
    }

    fn rig(delay: Duration) -> Rig {
        let sink = MockSink::new(delay);
        let (ctx, lock_tx) = unlocked_context("sess-test");
        let (intent_tx, intent_rx) = watch::channel(DriveIntent::default());
        let (status, _status_rx) = StatusSender::new(Duration::from_secs(1));
        let (handle, movement_rx, task) = DriveDispatcher::spawn(
            sink.clone(),
            ctx,
            intent_rx,
            status,
            &ConsoleConfig::default(),
        );
        Rig {
            sink,
            handle,
            intent_tx,
            lock_tx,
            movement_rx,
            _task: task,
        }
    }

    fn engaged(linear: f32, angular: f32) -> DriveIntent {
        DriveIntent {
            vector: DriveVector::clamped(linear, angular),
            engaged: true,
        }
    }

    fn released() -> DriveIntent {
        DriveIntent::default()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_then_stop_scenario() {
        let rig = rig(Duration::ZERO);
        rig.handle.set_speed_limit(0.5);
        settle().await;

        // x=0.5 y=0.8 at 50% speed, then immediate release
        rig.intent_tx.send(engaged(0.8, 0.5)).unwrap();
        settle().await;
        rig.intent_tx.send(released()).unwrap();
        settle().await;

        let drives = rig.sink.drive_calls();
        assert_eq!(drives.len(), 2);
        assert!((drives[0].vector.linear - 0.4).abs() < 1e-6);
        assert!((drives[0].vector.angular - 0.25).abs() < 1e-6);
        assert_eq!(drives[0].reason, DriveReason::ManualJoystick);
        assert_eq!(drives[0].duration_ms, 160);

        assert!(drives[1].vector.is_zero());
        assert_eq!(drives[1].reason, DriveReason::ManualStop);
        assert_eq!(drives[1].duration_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalescing_last_vector_wins() {
        let rig = rig(Duration::from_millis(50));

        rig.intent_tx.send(engaged(0.2, 0.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // These land while the first send is in flight; the watch channel
        // keeps only the newest
        rig.intent_tx.send(engaged(0.4, 0.0)).unwrap();
        rig.intent_tx.send(engaged(0.6, 0.0)).unwrap();
        rig.intent_tx.send(engaged(0.9, 0.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let drives = rig.sink.drive_calls();
        assert_eq!(drives[0].vector.linear, 0.2);
        assert_eq!(drives[1].vector.linear, 0.9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_not_dropped_while_drive_in_flight() {
        let rig = rig(Duration::from_millis(100));

        rig.intent_tx.send(engaged(0.5, 0.5)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Disengage while the drive send is still pending
        rig.intent_tx.send(released()).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let drives = rig.sink.drive_calls();
        let last = drives.last().unwrap();
        assert_eq!(last.reason, DriveReason::ManualStop);
        assert!(last.vector.is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_under_load() {
        let rig = rig(Duration::from_millis(30));

        rig.intent_tx.send(engaged(0.3, 0.1)).unwrap();
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            rig.intent_tx.send(engaged(0.3, 0.2)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!rig.sink.overlapped.load(Ordering::SeqCst));
        assert!(rig.sink.drive_calls().len() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reissue_cadence_while_engaged() {
        let rig = rig(Duration::ZERO);

        rig.intent_tx.send(engaged(0.5, 0.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        // One initial push plus one per 120 ms tick
        let drives = rig.sink.drive_calls();
        assert!(
            (7..=10).contains(&drives.len()),
            "expected ~9 sends, got {}",
            drives.len()
        );
        assert!(drives.iter().all(|p| p.vector.linear == 0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reissue_after_disengage() {
        let rig = rig(Duration::ZERO);

        rig.intent_tx.send(engaged(0.5, 0.0)).unwrap();
        settle().await;
        rig.intent_tx.send(released()).unwrap();
        settle().await;

        let count = rig.sink.drive_calls().len();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(rig.sink.drive_calls().len(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_change_reflected_immediately() {
        let rig = rig(Duration::ZERO);

        rig.intent_tx.send(engaged(1.0, 0.0)).unwrap();
        settle().await;
        assert_eq!(rig.sink.drive_calls()[0].vector.linear, 1.0);

        rig.handle.set_speed_limit(0.5);
        settle().await;

        let drives = rig.sink.drive_calls();
        let last = drives.last().unwrap();
        assert_eq!(last.vector.linear, 0.5);
        assert_eq!(last.max_speed_limit, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lockout_sends_final_stop_and_halts() {
        let rig = rig(Duration::ZERO);

        rig.intent_tx.send(engaged(0.7, 0.2)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        rig.lock_tx.send(LockState::Locked).unwrap();
        settle().await;

        let drives = rig.sink.drive_calls();
        let last = drives.last().unwrap();
        assert_eq!(last.reason, DriveReason::ManualStop);
        assert!(last.vector.is_zero());
        assert_eq!(last.session_id, "sess-test");

        // No further sends once locked, re-issue ticker included
        let count = rig.sink.drive_calls().len();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(rig.sink.drive_calls().len(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_non_fatal() {
        let rig = rig(Duration::ZERO);
        rig.sink.fail_next.store(true, Ordering::SeqCst);

        rig.intent_tx.send(engaged(0.5, 0.0)).unwrap();
        settle().await;
        rig.intent_tx.send(released()).unwrap();
        settle().await;

        // First send failed, but the stop still went out
        let drives = rig.sink.drive_calls();
        assert_eq!(drives.len(), 2);
        assert_eq!(drives.last().unwrap().reason, DriveReason::ManualStop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_carries_session_id() {
        let rig = rig(Duration::ZERO);
        rig.handle.emergency();
        settle().await;

        let calls = rig.sink.calls();
        assert!(calls.iter().any(|c| matches!(
            c,
            CommandRequest::Emergency { session_id } if session_id == "sess-test"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_movement_readout_tracks_sent_vector() {
        let mut rig = rig(Duration::ZERO);

        rig.intent_tx.send(engaged(0.6, -0.4)).unwrap();
        settle().await;
        assert_eq!(*rig.movement_rx.borrow_and_update(), DriveVector::clamped(0.6, -0.4));

        rig.intent_tx.send(released()).unwrap();
        settle().await;
        assert!(rig.movement_rx.borrow_and_update().is_zero());
    }
}
