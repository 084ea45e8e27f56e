//! User-configurable sync settings
//!
//! Read at call time by the scheduler and the drift corrector, so a settings
//! edit takes effect on the next correction without re-enabling the session.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Below this speed a rate-nudge would be jarring; the nudge duration is
/// stretched instead.
pub const SPEED_TO_SYNC_MIN_SPEED: f64 = 0.2;

/// Persisted coordinator settings with their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    /// Open direct peer links for clock sampling.
    #[serde(rename = "enableWebRTC")]
    pub enable_webrtc: bool,
    /// Master switch for drift correction.
    pub enable_sync_correction: bool,
    /// Allow the playback-rate correction strategy.
    pub use_speed_to_sync: bool,
    /// Allow the seek correction strategy.
    pub use_skip_to_sync: bool,
    /// Drift below this is left to rate-nudging's lower bound (ms).
    pub min_delay_speed_to_sync: f64,
    /// Drift at or above this is too large for rate-nudging (ms).
    pub max_delay_speed_to_sync: f64,
    /// Nominal duration of a rate-nudge (ms).
    pub speed_to_sync_duration: f64,
    /// Minimum drift before a seek-nudge is worth it (ms).
    pub min_delay_skip_to_sync: f64,
    /// User-tuned additive correction on top of the measured offset (ms).
    pub extra_time_offset: f64,
    /// Selected clock source: `"server"` or a peer id.
    pub time_sync_device: String,
    /// Tracker URL handed to the peer transport.
    pub p2p_tracker: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enable_webrtc: false,
            enable_sync_correction: true,
            use_speed_to_sync: true,
            use_skip_to_sync: true,
            min_delay_speed_to_sync: 60.0,
            max_delay_speed_to_sync: 3000.0,
            speed_to_sync_duration: 1000.0,
            min_delay_skip_to_sync: 400.0,
            extra_time_offset: 0.0,
            time_sync_device: "server".to_string(),
            p2p_tracker: String::new(),
        }
    }
}

/// Settings shared across components; writers are the settings UI only.
pub type SharedSettings = Arc<RwLock<SyncSettings>>;

/// Build a shared settings handle.
pub fn shared(settings: SyncSettings) -> SharedSettings {
    Arc::new(RwLock::new(settings))
}

/// Persistence seam implemented by the embedding application.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Option<SyncSettings>;
    fn save(&self, settings: &SyncSettings);
}
