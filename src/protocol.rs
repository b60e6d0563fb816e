//! Wire types for the remote controller REST API
//!
//! JSON request/response bodies shared by the command and camera endpoints,
//! plus small builder helpers for the payloads the dispatcher constructs.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Normalized motion intent, both components in [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DriveVector {
    pub linear: f32,
    pub angular: f32,
}

impl DriveVector {
    /// Create a vector with both components clamped to [-1, 1]
    pub fn clamped(linear: f32, angular: f32) -> Self {
        Self {
            linear: linear.clamp(-1.0, 1.0),
            angular: angular.clamp(-1.0, 1.0),
        }
    }

    /// The zero vector (full stop)
    pub fn zero() -> Self {
        Self::default()
    }

    /// Scale both components by a factor in [0, 1], clamping the result
    pub fn scaled(&self, factor: f32) -> Self {
        Self::clamped(self.linear * factor, self.angular * factor)
    }

    /// Whether this vector commands any motion at all
    pub fn is_zero(&self) -> bool {
        self.linear == 0.0 && self.angular == 0.0
    }
}

/// Audit tag for the source of a drive command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveReason {
    #[serde(rename = "manual-joystick")]
    ManualJoystick,
    #[serde(rename = "manual-stop")]
    ManualStop,
}

/// Immutable drive command value sent over the wire
///
/// `duration_ms` is the server-side validity window; the remote controller
/// fails safe to stop once it elapses, so the dispatcher never needs an
/// explicit keepalive beyond its re-issue cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveCommandPayload {
    pub session_id: String,
    pub vector: DriveVector,
    pub duration_ms: u64,
    pub reason: DriveReason,
    pub max_speed_limit: f32,
}

impl DriveCommandPayload {
    /// Build a drive payload, scaling the intent vector by the speed limit
    pub fn drive(
        session_id: impl Into<String>,
        intent: DriveVector,
        speed_limit: f32,
        duration_ms: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            vector: intent.scaled(speed_limit),
            duration_ms,
            reason: DriveReason::ManualJoystick,
            max_speed_limit: speed_limit.clamp(0.0, 1.0),
        }
    }

    /// Build a zero-vector stop payload
    pub fn stop(session_id: impl Into<String>, speed_limit: f32, duration_ms: u64) -> Self {
        Self {
            session_id: session_id.into(),
            vector: DriveVector::zero(),
            duration_ms,
            reason: DriveReason::ManualStop,
            max_speed_limit: speed_limit.clamp(0.0, 1.0),
        }
    }

    /// Whether this payload is a stop command
    pub fn is_stop(&self) -> bool {
        self.reason == DriveReason::ManualStop
    }
}

/// Body of `POST /control/command`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandRequest {
    Drive(DriveCommandPayload),
    Emergency { session_id: String },
    Blade {
        session_id: String,
        action: String,
        reason: String,
    },
}

/// Result field of a command response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandResult {
    Ok,
    Blocked,
    Error,
}

/// Response body of `POST /control/command`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub result: CommandResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
}

/// Body of `POST /control/manual-unlock`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockRequest {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totp_code: Option<String>,
}

impl UnlockRequest {
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            method: "password".into(),
            password: Some(password.into()),
            totp_code: None,
        }
    }

    pub fn totp(code: impl Into<String>) -> Self {
        Self {
            method: "totp".into(),
            password: None,
            totp_code: Some(code.into()),
        }
    }
}

/// Successful unlock response: the authorization lease
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockGrant {
    pub session_id: String,
    #[serde(default)]
    pub expires_at: Option<u64>,
}

/// Response of `GET /control/manual-unlock/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockStatus {
    pub authorized: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<u64>,
}

/// Response of `GET /camera/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStatus {
    pub is_active: bool,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub statistics: CameraStatistics,
    #[serde(default)]
    pub client_count: u32,
    #[serde(default)]
    pub last_frame_time: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraStatistics {
    #[serde(default)]
    pub current_fps: f32,
}

/// Response of `POST /camera/start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStartResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl CameraStartResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Single-frame snapshot from `GET /camera/frame`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraFrame {
    /// Base64-encoded image data
    pub data: String,
    pub metadata: FrameMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub format: String,
    pub timestamp: u64,
}

impl CameraFrame {
    /// Decode the base64 payload into raw image bytes
    pub fn decode(&self) -> Result<Bytes, base64::DecodeError> {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map(Bytes::from)
    }
}
