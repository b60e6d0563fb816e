//! Camera Feed State Machine
//!
//! Pure transition logic for the feed resilience manager: no I/O, no timers.
//! The manager feeds events in and executes the returned actions; tests can
//! drive every transition without a runtime.

/// Feed transport mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    /// Feed status not yet known (startup, or after a teardown)
    Initializing,
    /// Continuous stream transport attached
    Streaming,
    /// Polling the single-frame endpoint on a fixed cadence
    Snapshot,
    /// Snapshots failing too; a recovery probe is always scheduled here
    Unavailable,
}

/// Events that drive feed transitions
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Controller reports the feed active (initial query or after start)
    StatusActive,
    /// Feed inactive and a start request did not bring it up
    StatusInactive,
    /// Stream transport connected
    StreamOpened,
    /// Stream transport failed or dropped
    StreamError,
    /// A frame arrived on the stream transport
    FrameReceived(u64),
    /// A snapshot poll returned a frame
    SnapshotOk(u64),
    /// A snapshot poll failed
    SnapshotError,
    /// Recovery probe re-activated the stream transport
    ProbeOk,
    /// Recovery probe failed; another will run after the cooldown
    ProbeFailed,
    /// 429 from a camera endpoint; advisory only
    Throttled,
    /// Lockout or disengage: drop everything
    Teardown,
}

/// What the manager must do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedAction {
    /// Build a stream URL with a fresh cache-busting token and attach it
    AttachStream,
    /// Rebuild the URL in place and retry the stream transport
    RetryStream,
    /// Begin snapshot polling and schedule recovery probes
    StartPolling,
    /// Drop URLs and cancel all feed timers
    ClearStream,
    None,
}

/// Snapshot of the feed state for the camera badge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedSnapshot {
    pub mode: FeedMode,
    pub failure_count: u32,
    pub last_frame_at: Option<u64>,
}

/// The single mutable record owned by the stream resilience manager
#[derive(Debug)]
pub struct CameraFeedState {
    mode: FeedMode,
    /// Consecutive stream transport failures
    failure_count: u32,
    /// Consecutive snapshot poll failures while fallen back
    snapshot_failures: u32,
    last_frame_at: Option<u64>,
    stream_failure_threshold: u32,
    snapshot_failure_threshold: u32,
}

impl CameraFeedState {
    pub fn new(stream_failure_threshold: u32, snapshot_failure_threshold: u32) -> Self {
        Self {
            mode: FeedMode::Initializing,
            failure_count: 0,
            snapshot_failures: 0,
            last_frame_at: None,
            stream_failure_threshold,
            snapshot_failure_threshold,
        }
    }

    pub fn mode(&self) -> FeedMode {
        self.mode
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn last_frame_at(&self) -> Option<u64> {
        self.last_frame_at
    }

    /// Whether the feed is in the snapshot-fallback regime (polling active)
    pub fn is_fallen_back(&self) -> bool {
        matches!(self.mode, FeedMode::Snapshot | FeedMode::Unavailable)
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            mode: self.mode,
            failure_count: self.failure_count,
            last_frame_at: self.last_frame_at,
        }
    }

    /// Apply one event and return the action the manager must execute
    pub fn apply(&mut self, event: FeedEvent) -> FeedAction {
        use FeedEvent::*;
        use FeedMode::*;

        match (self.mode, event) {
            // Teardown overrides everything
            (_, Teardown) => {
                self.mode = Initializing;
                self.failure_count = 0;
                self.snapshot_failures = 0;
                self.last_frame_at = None;
                FeedAction::ClearStream
            }

            // Rate limiting is advisory only, never a strike
            (_, Throttled) => FeedAction::None,

            (Initializing, StatusActive) => {
                self.mode = Streaming;
                FeedAction::AttachStream
            }
            (Initializing, StatusInactive) => {
                self.mode = Snapshot;
                FeedAction::StartPolling
            }

            (Streaming, StreamOpened) => {
                self.failure_count = 0;
                FeedAction::None
            }
            (Streaming, FrameReceived(ts)) => {
                self.failure_count = 0;
                self.last_frame_at = Some(ts);
                FeedAction::None
            }
            (Streaming, StreamError) => {
                self.failure_count += 1;
                if self.failure_count < self.stream_failure_threshold {
                    // Transient reconnect: retry in place with a fresh URL
                    FeedAction::RetryStream
                } else {
                    self.mode = Snapshot;
                    self.snapshot_failures = 0;
                    FeedAction::StartPolling
                }
            }

            (Snapshot, SnapshotOk(ts)) | (Unavailable, SnapshotOk(ts)) => {
                self.mode = Snapshot;
                self.snapshot_failures = 0;
                self.last_frame_at = Some(ts);
                FeedAction::None
            }
            (Snapshot, SnapshotError) | (Unavailable, SnapshotError) => {
                self.snapshot_failures += 1;
                if self.snapshot_failures >= self.snapshot_failure_threshold {
                    self.mode = Unavailable;
                }
                FeedAction::None
            }
            (Snapshot, ProbeOk) | (Unavailable, ProbeOk) => {
                self.mode = Streaming;
                self.failure_count = 0;
                self.snapshot_failures = 0;
                FeedAction::AttachStream
            }
            // Probe failed: stay put, the cooldown timer reschedules it
            (Snapshot, ProbeFailed) | (Unavailable, ProbeFailed) => FeedAction::None,

            // Stale events from a detached transport
            _ => FeedAction::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> CameraFeedState {
        CameraFeedState::new(2, 3)
    }

    #[test]
    fn test_initial_state() {
        let state = state();
        assert_eq!(state.mode(), FeedMode::Initializing);
        assert_eq!(state.failure_count(), 0);
        assert_eq!(state.last_frame_at(), None);
    }

    #[test]
    fn test_activates_stream_on_status() {
        let mut state = state();
        assert_eq!(state.apply(FeedEvent::StatusActive), FeedAction::AttachStream);
        assert_eq!(state.mode(), FeedMode::Streaming);
    }

    #[test]
    fn test_inactive_feed_falls_back_to_polling() {
        let mut state = state();
        assert_eq!(state.apply(FeedEvent::StatusInactive), FeedAction::StartPolling);
        assert_eq!(state.mode(), FeedMode::Snapshot);
    }

    #[test]
    fn test_single_error_retries_in_place() {
        let mut state = state();
        state.apply(FeedEvent::StatusActive);

        assert_eq!(state.apply(FeedEvent::StreamError), FeedAction::RetryStream);
        assert_eq!(state.mode(), FeedMode::Streaming);
        assert_eq!(state.failure_count(), 1);
    }

    #[test]
    fn test_two_consecutive_errors_fall_back() {
        let mut state = state();
        state.apply(FeedEvent::StatusActive);

        state.apply(FeedEvent::StreamError);
        assert_eq!(state.apply(FeedEvent::StreamError), FeedAction::StartPolling);
        assert_eq!(state.mode(), FeedMode::Snapshot);
    }

    #[test]
    fn test_successful_frame_resets_strike_count() {
        let mut state = state();
        state.apply(FeedEvent::StatusActive);

        state.apply(FeedEvent::StreamError);
        state.apply(FeedEvent::FrameReceived(100));
        assert_eq!(state.failure_count(), 0);
        assert_eq!(state.last_frame_at(), Some(100));

        // The next error is a first strike again
        assert_eq!(state.apply(FeedEvent::StreamError), FeedAction::RetryStream);
        assert_eq!(state.mode(), FeedMode::Streaming);
    }

    #[test]
    fn test_probe_recovery_reattaches_stream() {
        let mut state = state();
        state.apply(FeedEvent::StatusActive);
        state.apply(FeedEvent::StreamError);
        state.apply(FeedEvent::StreamError);
        assert_eq!(state.mode(), FeedMode::Snapshot);

        assert_eq!(state.apply(FeedEvent::ProbeFailed), FeedAction::None);
        assert_eq!(state.mode(), FeedMode::Snapshot);

        assert_eq!(state.apply(FeedEvent::ProbeOk), FeedAction::AttachStream);
        assert_eq!(state.mode(), FeedMode::Streaming);
        assert_eq!(state.failure_count(), 0);
    }

    #[test]
    fn test_snapshot_exhaustion_reads_unavailable_but_not_terminal() {
        let mut state = state();
        state.apply(FeedEvent::StatusActive);
        state.apply(FeedEvent::StreamError);
        state.apply(FeedEvent::StreamError);

        state.apply(FeedEvent::SnapshotError);
        state.apply(FeedEvent::SnapshotError);
        assert_eq!(state.mode(), FeedMode::Snapshot);
        state.apply(FeedEvent::SnapshotError);
        assert_eq!(state.mode(), FeedMode::Unavailable);

        // Frames flowing again pulls it back to Snapshot
        state.apply(FeedEvent::SnapshotOk(200));
        assert_eq!(state.mode(), FeedMode::Snapshot);
        assert_eq!(state.last_frame_at(), Some(200));

        // And a probe can still fully recover from Unavailable
        state.apply(FeedEvent::SnapshotError);
        state.apply(FeedEvent::SnapshotError);
        state.apply(FeedEvent::SnapshotError);
        assert_eq!(state.mode(), FeedMode::Unavailable);
        assert_eq!(state.apply(FeedEvent::ProbeOk), FeedAction::AttachStream);
        assert_eq!(state.mode(), FeedMode::Streaming);
    }

    #[test]
    fn test_throttling_is_not_a_strike() {
        let mut state = state();
        state.apply(FeedEvent::StatusActive);
        state.apply(FeedEvent::StreamError);

        assert_eq!(state.apply(FeedEvent::Throttled), FeedAction::None);
        assert_eq!(state.failure_count(), 1);
        assert_eq!(state.mode(), FeedMode::Streaming);

        // Still takes a real second strike to fall back
        assert_eq!(state.apply(FeedEvent::StreamError), FeedAction::StartPolling);
    }

    #[test]
    fn test_teardown_from_any_state() {
        for setup in [
            vec![],
            vec![FeedEvent::StatusActive],
            vec![FeedEvent::StatusActive, FeedEvent::StreamError, FeedEvent::StreamError],
            vec![
                FeedEvent::StatusActive,
                FeedEvent::StreamError,
                FeedEvent::StreamError,
                FeedEvent::SnapshotError,
                FeedEvent::SnapshotError,
                FeedEvent::SnapshotError,
            ],
        ] {
            let mut state = state();
            for event in setup {
                state.apply(event);
            }
            assert_eq!(state.apply(FeedEvent::Teardown), FeedAction::ClearStream);
            assert_eq!(state.mode(), FeedMode::Initializing);
            assert_eq!(state.failure_count(), 0);
            assert_eq!(state.last_frame_at(), None);
        }
    }
}
