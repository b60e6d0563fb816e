//! Transport trait seams for the command and camera endpoints
//!
//! The dispatcher and camera manager talk to these traits, not to reqwest,
//! so tests can drive them with mock transports.

use super::ApiError;
use crate::protocol::{
    CameraFrame, CameraStartResponse, CameraStatus, CommandOutcome, CommandRequest, UnlockGrant,
    UnlockRequest, UnlockStatus,
};
use async_trait::async_trait;

/// Outbound motion/blade/emergency command channel
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Send one command and wait for the controller's verdict
    async fn send_command(&self, request: &CommandRequest) -> Result<CommandOutcome, ApiError>;
}

/// Camera feed endpoints: status, start, snapshot, stream URL
#[async_trait]
pub trait CameraApi: Send + Sync {
    async fn status(&self) -> Result<CameraStatus, ApiError>;

    async fn start(&self) -> Result<CameraStartResponse, ApiError>;

    /// Fetch a single snapshot frame (polling fallback transport)
    async fn fetch_frame(&self) -> Result<CameraFrame, ApiError>;

    /// Build the continuous stream URL with a fresh cache-busting token
    fn stream_url(&self, client_id: &str, session_id: &str, cachebust: u64) -> String;
}

/// Session unlock endpoints
#[async_trait]
pub trait UnlockApi: Send + Sync {
    async fn unlock(&self, request: &UnlockRequest) -> Result<UnlockGrant, ApiError>;

    async fn unlock_status(&self) -> Result<UnlockStatus, ApiError>;
}
