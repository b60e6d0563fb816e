//! Camera Stream Resilience Manager
//!
//! Owns the feed state machine and every feed timer. One actor task consumes
//! a single event queue fed by the stream supervisor, snapshot fetches, and
//! recovery probes; network calls run in spawned tasks guarded by explicit
//! in-flight flags, since a timer tick can fire before the previous call
//! resolves.

use super::state::{CameraFeedState, FeedAction, FeedEvent, FeedMode, FeedSnapshot};
use super::stream::{run_stream, StreamTransport};
use crate::api::{ApiError, CameraApi};
use crate::config::ConsoleConfig;
use crate::protocol::now_ms;
use crate::session::{LockState, SessionContext};
use crate::status::StatusSender;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Internal event queue entries for the manager actor
#[derive(Debug)]
pub(crate) enum CameraEvent {
    /// From a stream supervisor; stale generations are ignored
    FromStream { generation: u64, event: FeedEvent },
    InitResult(FeedEvent),
    SnapshotResult(FeedEvent),
    ProbeResult(FeedEvent),
}

/// Spawns the feed manager actor
pub struct CameraManager;

impl CameraManager {
    /// Start the manager. Returns the camera badge watch, the decoded frame
    /// channel, and the actor's join handle.
    pub fn spawn(
        api: Arc<dyn CameraApi>,
        transport: Arc<dyn StreamTransport>,
        session: SessionContext,
        status: StatusSender,
        config: &ConsoleConfig,
    ) -> (
        watch::Receiver<FeedSnapshot>,
        mpsc::Receiver<Bytes>,
        JoinHandle<()>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::channel(16);

        let state = CameraFeedState::new(
            config.stream_failure_threshold,
            config.snapshot_failure_threshold,
        );
        let (badge_tx, badge_rx) = watch::channel(state.snapshot());

        let mut poll_ticker = interval(config.snapshot_interval);
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut probe_ticker = interval(config.recovery_cooldown);
        probe_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let locked = !session.is_unlocked();
        let actor = ManagerActor {
            api,
            transport,
            lock_rx: session.lock_watch(),
            session,
            events_tx,
            events_rx,
            poll_ticker,
            probe_ticker,
            state,
            badge_tx,
            frames_tx,
            status,
            stream_generation: 0,
            stream_task: None,
            fetch_in_flight: false,
            probe_in_flight: false,
            locked,
            client_id: config.client_id.clone(),
        };

        let task = tokio::spawn(actor.run());
        (badge_rx, frames_rx, task)
    }
}

enum Wake {
    LockChanged,
    Event(CameraEvent),
    PollTick,
    ProbeTick,
    Closed,
}

struct ManagerActor {
    api: Arc<dyn CameraApi>,
    transport: Arc<dyn StreamTransport>,
    session: SessionContext,
    lock_rx: watch::Receiver<LockState>,
    events_tx: mpsc::UnboundedSender<CameraEvent>,
    events_rx: mpsc::UnboundedReceiver<CameraEvent>,
    poll_ticker: Interval,
    probe_ticker: Interval,
    state: CameraFeedState,
    badge_tx: watch::Sender<FeedSnapshot>,
    frames_tx: mpsc::Sender<Bytes>,
    status: StatusSender,
    /// Bumped on every attach so a superseded supervisor's tail is ignored
    stream_generation: u64,
    stream_task: Option<JoinHandle<()>>,
    /// Guards against overlapping snapshot fetches
    fetch_in_flight: bool,
    /// Guards against overlapping recovery probes
    probe_in_flight: bool,
    locked: bool,
    client_id: String,
}

impl ManagerActor {
    async fn run(mut self) {
        if !self.locked {
            self.begin_init();
        }

        loop {
            let fallen = !self.locked && self.state.is_fallen_back();

            let wake = tokio::select! {
                changed = self.lock_rx.changed() => {
                    if changed.is_err() { Wake::Closed } else { Wake::LockChanged }
                }
                event = self.events_rx.recv() => match event {
                    Some(event) => Wake::Event(event),
                    None => Wake::Closed,
                },
                _ = self.poll_ticker.tick(), if fallen => Wake::PollTick,
                _ = self.probe_ticker.tick(), if fallen => Wake::ProbeTick,
            };

            match wake {
                Wake::LockChanged => self.apply_lock().await,
                Wake::Event(event) => self.handle_event(event).await,
                Wake::PollTick => self.begin_snapshot_fetch(),
                Wake::ProbeTick => self.begin_probe(),
                Wake::Closed => break,
            }
        }

        self.detach_stream();
        debug!("Camera manager stopped");
    }

    async fn apply_lock(&mut self) {
        let lock = self.lock_rx.borrow_and_update().clone();
        match lock {
            LockState::Locked if !self.locked => {
                self.locked = true;
                self.apply(FeedEvent::Teardown).await;
                info!("Camera feed stopped");
            }
            LockState::Unlocked { .. } if self.locked => {
                self.locked = false;
                self.begin_init();
            }
            _ => {}
        }
    }

    async fn handle_event(&mut self, event: CameraEvent) {
        let feed_event = match event {
            CameraEvent::FromStream { generation, event } => {
                if generation != self.stream_generation {
                    return;
                }
                event
            }
            CameraEvent::InitResult(event) => event,
            CameraEvent::SnapshotResult(event) => {
                self.fetch_in_flight = false;
                event
            }
            CameraEvent::ProbeResult(event) => {
                self.probe_in_flight = false;
                event
            }
        };

        if self.locked {
            // Stragglers from calls that resolved after teardown
            return;
        }
        self.apply(feed_event).await;
    }

    async fn apply(&mut self, event: FeedEvent) {
        let was_fallen = self.state.is_fallen_back();
        let was_mode = self.state.mode();
        let throttled = matches!(event, FeedEvent::Throttled);

        let action = self.state.apply(event);
        match action {
            FeedAction::AttachStream => {
                if was_mode == FeedMode::Initializing {
                    self.status.advise("Connecting to camera stream…");
                } else if was_fallen {
                    info!("Camera stream recovered");
                    self.status.advise("Camera stream restored");
                }
                self.attach_stream().await;
            }
            FeedAction::RetryStream => {
                debug!("Stream error, retrying with a fresh URL");
                self.attach_stream().await;
            }
            FeedAction::StartPolling => {
                warn!("Falling back to snapshot polling");
                self.status.warn("Camera stream unavailable – using snapshots…");
                self.detach_stream();
                self.poll_ticker.reset();
                self.probe_ticker.reset();
            }
            FeedAction::ClearStream => {
                self.detach_stream();
                self.fetch_in_flight = false;
                self.probe_in_flight = false;
            }
            FeedAction::None => {}
        }

        if throttled {
            self.status.warn("Camera requests throttled");
        }
        if self.state.mode() == FeedMode::Unavailable && was_mode != FeedMode::Unavailable {
            self.status.warn("Camera feed unavailable – retrying…");
        }

        let _ = self.badge_tx.send(self.state.snapshot());
    }

    /// Query feed status and attach or fall back accordingly
    fn begin_init(&mut self) {
        self.status.advise("Connecting to camera…");
        let api = self.api.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let event = if activate_feed(api.as_ref()).await {
                FeedEvent::StatusActive
            } else {
                FeedEvent::StatusInactive
            };
            let _ = tx.send(CameraEvent::InitResult(event));
        });
    }

    async fn attach_stream(&mut self) {
        self.detach_stream();

        let Some(session_id) = self.session.session_id().await else {
            warn!("No session for camera stream");
            return;
        };

        self.stream_generation += 1;
        let url = self.api.stream_url(&self.client_id, &session_id, now_ms());
        self.stream_task = Some(tokio::spawn(run_stream(
            self.transport.clone(),
            url,
            self.stream_generation,
            self.events_tx.clone(),
            self.frames_tx.clone(),
        )));
    }

    fn detach_stream(&mut self) {
        self.stream_generation += 1;
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
    }

    fn begin_snapshot_fetch(&mut self) {
        if self.fetch_in_flight {
            // Previous fetch still pending; skip this tick entirely
            return;
        }
        self.fetch_in_flight = true;

        let api = self.api.clone();
        let tx = self.events_tx.clone();
        let frames = self.frames_tx.clone();
        tokio::spawn(async move {
            let event = match api.fetch_frame().await {
                Ok(frame) => {
                    let ts = frame.metadata.timestamp;
                    match frame.decode() {
                        Ok(bytes) => {
                            let _ = frames.try_send(bytes);
                            FeedEvent::SnapshotOk(ts)
                        }
                        Err(e) => {
                            debug!("Snapshot decode failed: {}", e);
                            FeedEvent::SnapshotError
                        }
                    }
                }
                Err(ApiError::Throttled) => FeedEvent::Throttled,
                Err(e) => {
                    debug!("Snapshot fetch failed: {}", e);
                    FeedEvent::SnapshotError
                }
            };
            let _ = tx.send(CameraEvent::SnapshotResult(event));
        });
    }

    fn begin_probe(&mut self) {
        if self.probe_in_flight {
            return;
        }
        self.probe_in_flight = true;

        let api = self.api.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let event = match api.status().await {
                Ok(status) if status.is_active => FeedEvent::ProbeOk,
                Ok(_) => match api.start().await {
                    Ok(response) if response.is_success() => FeedEvent::ProbeOk,
                    Ok(_) => FeedEvent::ProbeFailed,
                    Err(ApiError::Throttled) => FeedEvent::Throttled,
                    Err(_) => FeedEvent::ProbeFailed,
                },
                Err(ApiError::Throttled) => FeedEvent::Throttled,
                Err(_) => FeedEvent::ProbeFailed,
            };
            let _ = tx.send(CameraEvent::ProbeResult(event));
        });
    }
}

/// Check feed status, requesting a start if it is not already running
async fn activate_feed(api: &dyn CameraApi) -> bool {
    match api.status().await {
        Ok(status) if status.is_active => true,
        Ok(_) => matches!(api.start().await, Ok(response) if response.is_success()),
        Err(e) => {
            debug!("Camera status query failed: {}", e);
            false
        }
    }
}
