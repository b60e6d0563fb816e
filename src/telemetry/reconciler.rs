//! Telemetry Reconciler
//!
//! Merges state pushed by the controller (safety state, echoed commands)
//! into the local UI snapshot, and turns a pushed lockout into the Session
//! Monitor's lockout, which cascades the full teardown.

use crate::protocol::{DriveReason, DriveVector};
use crate::session::SessionMonitor;
use crate::status::StatusSender;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// State pushed by the controller over the telemetry channel
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// Controller-side safety state label
    SafetyState(String),
    /// A command the controller acknowledged executing
    EchoedCommand {
        reason: DriveReason,
        vector: DriveVector,
    },
    /// Explicit lockout pushed by the controller
    Lockout { reason: String },
}

/// Last echoed command, kept for the movement audit readout
#[derive(Debug, Clone, PartialEq)]
pub struct EchoedCommand {
    pub reason: DriveReason,
    pub vector: DriveVector,
}

/// Local UI snapshot assembled from pushed telemetry
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub safety_state: String,
    pub last_echoed: Option<EchoedCommand>,
}

/// Safety states that force a local lockout
fn is_lockout_state(state: &str) -> bool {
    matches!(state, "locked" | "lockout" | "emergency" | "emergency_stop")
}

pub struct TelemetryReconciler {
    state: Arc<RwLock<TelemetrySnapshot>>,
    monitor: Arc<SessionMonitor>,
    status: StatusSender,
}

impl TelemetryReconciler {
    pub fn new(monitor: Arc<SessionMonitor>, status: StatusSender) -> Self {
        Self {
            state: Arc::new(RwLock::new(TelemetrySnapshot::default())),
            monitor,
            status,
        }
    }

    /// Current merged snapshot
    pub async fn snapshot(&self) -> TelemetrySnapshot {
        self.state.read().await.clone()
    }

    /// Merge one pushed event
    pub async fn process_event(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::SafetyState(state) => {
                debug!("Safety state: {}", state);
                let force_lockout = is_lockout_state(&state);
                self.state.write().await.safety_state = state.clone();
                if force_lockout {
                    self.monitor
                        .lockout(&format!("controller safety state: {}", state))
                        .await;
                }
            }
            TelemetryEvent::EchoedCommand { reason, vector } => {
                self.state.write().await.last_echoed = Some(EchoedCommand { reason, vector });
            }
            TelemetryEvent::Lockout { reason } => {
                warn!("Controller pushed lockout: {}", reason);
                self.status.warn(format!("Locked by controller: {}", reason));
                self.monitor.lockout(&reason).await;
            }
        }
    }

    /// Consume the push channel until it closes
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::Receiver<TelemetryEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.process_event(event).await;
            }
            debug!("Telemetry channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, UnlockApi};
    use crate::protocol::{UnlockGrant, UnlockRequest, UnlockStatus};
    use async_trait::async_trait;
    use std::time::Duration;

    struct AlwaysUnlock;

    #[async_trait]
    impl UnlockApi for AlwaysUnlock {
        async fn unlock(&self, _request: &UnlockRequest) -> Result<UnlockGrant, ApiError> {
            Ok(UnlockGrant {
                session_id: "sess-telemetry".into(),
                expires_at: None,
            })
        }

        async fn unlock_status(&self) -> Result<UnlockStatus, ApiError> {
            Ok(UnlockStatus {
                authorized: false,
                session_id: None,
                expires_at: None,
            })
        }
    }

    async fn unlocked_monitor() -> (Arc<SessionMonitor>, StatusSender) {
        let (status, _) = StatusSender::new(Duration::from_secs(1));
        let monitor = Arc::new(SessionMonitor::new(Arc::new(AlwaysUnlock), status.clone()));
        monitor.unlock(&UnlockRequest::password("pw")).await.unwrap();
        (monitor, status)
    }

    #[tokio::test]
    async fn test_safety_state_merged() {
        let (monitor, status) = unlocked_monitor().await;
        let reconciler = TelemetryReconciler::new(monitor.clone(), status);

        reconciler
            .process_event(TelemetryEvent::SafetyState("mowing".into()))
            .await;
        assert_eq!(reconciler.snapshot().await.safety_state, "mowing");
        assert!(monitor.context().is_unlocked());
    }

    #[tokio::test]
    async fn test_emergency_state_forces_lockout() {
        let (monitor, status) = unlocked_monitor().await;
        let reconciler = TelemetryReconciler::new(monitor.clone(), status);

        reconciler
            .process_event(TelemetryEvent::SafetyState("emergency".into()))
            .await;
        assert!(!monitor.context().is_unlocked());
    }

    #[tokio::test]
    async fn test_pushed_lockout_cascades() {
        let (monitor, status) = unlocked_monitor().await;
        let reconciler = TelemetryReconciler::new(monitor.clone(), status);

        reconciler
            .process_event(TelemetryEvent::Lockout {
                reason: "remote operator override".into(),
            })
            .await;
        assert!(!monitor.context().is_unlocked());
    }

    #[tokio::test]
    async fn test_echoed_command_merged() {
        let (monitor, status) = unlocked_monitor().await;
        let reconciler = TelemetryReconciler::new(monitor, status);

        reconciler
            .process_event(TelemetryEvent::EchoedCommand {
                reason: DriveReason::ManualJoystick,
                vector: DriveVector::clamped(0.3, 0.1),
            })
            .await;
        let snapshot = reconciler.snapshot().await;
        assert_eq!(
            snapshot.last_echoed,
            Some(EchoedCommand {
                reason: DriveReason::ManualJoystick,
                vector: DriveVector::clamped(0.3, 0.1),
            })
        );
    }
}
