//! Console configuration

use std::time::Duration;

/// Configuration for the operator console
///
/// Fallback thresholds and retry cooldowns vary by deployment network, so
/// everything the dispatcher and camera manager treat as a cadence or a
/// strike limit lives here rather than in the components.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Base URL of the remote controller REST API
    pub base_url: String,
    /// Per-client id appended to the stream URL
    pub client_id: String,
    /// Re-issue cadence while the joystick is engaged
    pub reissue_interval: Duration,
    /// Validity window for joystick drive commands
    pub drive_duration_ms: u64,
    /// Validity window sent with stop commands
    pub stop_duration_ms: u64,
    /// Input magnitude below which the stick reads as released
    pub dead_zone: f32,
    /// Speed limit applied until the operator changes it
    pub default_speed_limit: f32,
    /// Consecutive stream errors before falling back to snapshots
    pub stream_failure_threshold: u32,
    /// Snapshot polling cadence while fallen back
    pub snapshot_interval: Duration,
    /// Cooldown between stream recovery probes
    pub recovery_cooldown: Duration,
    /// Consecutive snapshot errors before the feed reads unavailable
    pub snapshot_failure_threshold: u32,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// How long transient status messages stay on the banner
    pub status_ttl: Duration,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            client_id: uuid::Uuid::new_v4().to_string(),
            reissue_interval: Duration::from_millis(120),
            drive_duration_ms: 160,
            stop_duration_ms: 0,
            dead_zone: 0.1,
            default_speed_limit: 1.0,
            stream_failure_threshold: 2,
            snapshot_interval: Duration::from_millis(2000),
            recovery_cooldown: Duration::from_millis(5000),
            snapshot_failure_threshold: 3,
            request_timeout: Duration::from_secs(5),
            status_ttl: Duration::from_secs(4),
        }
    }
}

impl ConsoleConfig {
    /// Build a config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("CONSOLE_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(limit) = std::env::var("CONSOLE_SPEED_LIMIT") {
            if let Ok(value) = limit.parse::<f32>() {
                config.default_speed_limit = value.clamp(0.0, 1.0);
            }
        }
        config
    }
}
