//! Session Monitor
//!
//! Owns the authorization lease and is the single cancellation authority:
//! lockout flips the lock watch first, which the dispatcher and camera
//! manager observe to tear down, and only then does the UI read "locked".

use crate::api::{ApiError, UnlockApi};
use crate::protocol::{now_ms, UnlockRequest};
use crate::status::StatusSender;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

/// The authorization lease granted by a successful unlock
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    /// Unix millis; `None` for offline sessions without a lease window
    pub expires_at: Option<u64>,
}

/// Broadcast lock state, `Locked` until an unlock succeeds
#[derive(Debug, Clone, PartialEq)]
pub enum LockState {
    Locked,
    Unlocked { expires_at: Option<u64> },
}

/// Read-only session accessor handed to the dispatcher and camera manager
///
/// Components call `session_id()` per use instead of caching the id, so a
/// re-unlock with a fresh lease is picked up on the very next command.
#[derive(Clone)]
pub struct SessionContext {
    session: Arc<RwLock<Option<Session>>>,
    lock_rx: watch::Receiver<LockState>,
}

impl SessionContext {
    pub async fn session_id(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.session_id.clone())
    }

    pub fn is_unlocked(&self) -> bool {
        matches!(*self.lock_rx.borrow(), LockState::Unlocked { .. })
    }

    /// Subscribe to lock state changes
    pub fn lock_watch(&self) -> watch::Receiver<LockState> {
        self.lock_rx.clone()
    }
}

/// Tracks the authorization lease with an expiry countdown
pub struct SessionMonitor {
    api: Arc<dyn UnlockApi>,
    session: Arc<RwLock<Option<Session>>>,
    lock_tx: Arc<watch::Sender<LockState>>,
    status: StatusSender,
    /// Bumped on every install/lockout so stale countdown tasks stand down
    countdown_generation: Arc<AtomicU64>,
}

impl SessionMonitor {
    pub fn new(api: Arc<dyn UnlockApi>, status: StatusSender) -> Self {
        let (lock_tx, _) = watch::channel(LockState::Locked);
        Self {
            api,
            session: Arc::new(RwLock::new(None)),
            lock_tx: Arc::new(lock_tx),
            status,
            countdown_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get a read accessor for other components
    pub fn context(&self) -> SessionContext {
        SessionContext {
            session: self.session.clone(),
            lock_rx: self.lock_tx.subscribe(),
        }
    }

    /// Request a manual unlock from the controller
    ///
    /// A controller without the unlock endpoint degrades to an offline
    /// session rather than failing closed.
    pub async fn unlock(&self, request: &UnlockRequest) -> Result<(), ApiError> {
        match self.api.unlock(request).await {
            Ok(grant) => {
                self.install(Session {
                    session_id: grant.session_id,
                    expires_at: grant.expires_at,
                })
                .await;
                self.status.advise("Controls unlocked");
                Ok(())
            }
            Err(ApiError::Missing) => {
                let session = Session {
                    session_id: uuid::Uuid::new_v4().to_string(),
                    expires_at: None,
                };
                warn!("Unlock endpoint missing, issuing offline session {}", session.session_id);
                self.status.warn("Controller has no unlock endpoint – offline session");
                self.install(session).await;
                Ok(())
            }
            Err(ApiError::Unauthorized) => {
                self.status.warn("Unlock rejected – check credentials");
                Err(ApiError::Unauthorized)
            }
            Err(e) => {
                self.status.warn(format!("Unlock failed: {}", e));
                Err(e)
            }
        }
    }

    /// Resume an existing authorization on startup, if the controller has one
    pub async fn resume(&self) -> bool {
        match self.api.unlock_status().await {
            Ok(status) if status.authorized => {
                if let Some(session_id) = status.session_id {
                    info!("Resuming session {}", session_id);
                    self.install(Session {
                        session_id,
                        expires_at: status.expires_at,
                    })
                    .await;
                    return true;
                }
                false
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Unlock status check failed: {}", e);
                false
            }
        }
    }

    /// Force the locked state; components tear down before the UI sees it
    ///
    /// The session record is retained read-only so the dispatcher's mandatory
    /// final stop still carries a session id. It is replaced on next unlock.
    pub async fn lockout(&self, reason: &str) {
        self.countdown_generation.fetch_add(1, Ordering::SeqCst);
        warn!("Lockout: {}", reason);
        self.lock_tx.send_replace(LockState::Locked);
        self.status.warn(format!("Controls locked: {}", reason));
    }

    /// Remaining lease time for the UI countdown, if a lease is active
    pub async fn remaining_ms(&self) -> Option<u64> {
        let session = self.session.read().await;
        let expires_at = session.as_ref()?.expires_at?;
        Some(expires_at.saturating_sub(now_ms()))
    }

    async fn install(&self, session: Session) {
        let expires_at = session.expires_at;
        *self.session.write().await = Some(session);
        self.lock_tx.send_replace(LockState::Unlocked { expires_at });

        let generation = self.countdown_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(deadline) = expires_at {
            let remaining = Duration::from_millis(deadline.saturating_sub(now_ms()));
            let lock_tx = self.lock_tx.clone();
            let status = self.status.clone();
            let gen_counter = self.countdown_generation.clone();
            tokio::spawn(async move {
                tokio::time::sleep(remaining).await;
                if gen_counter.load(Ordering::SeqCst) != generation {
                    return; // superseded by a newer lease or an explicit lockout
                }
                warn!("Session lease expired");
                lock_tx.send_replace(LockState::Locked);
                status.warn("Session expired – controls locked");
            });
        }
    }
}
