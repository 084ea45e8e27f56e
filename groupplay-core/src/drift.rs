//! Continuous drift correction
//!
//! While the group is unpaused, every player time update is compared against
//! the estimated server position. Small drift is absorbed by briefly changing
//! the playback rate; larger drift is corrected with a seek. Both strategies
//! disable themselves while settling so corrections never overlap.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::messages::{CommandKind, PlaybackCommand};
use crate::player::{PlayerAdapter, PlayerEvent};
use crate::scheduler::SyncControl;
use crate::settings::{SharedSettings, SyncSettings, SPEED_TO_SYNC_MIN_SPEED};
use crate::timesync::TimeSyncRegistry;
use crate::TICKS_PER_MS;

/// Which correction is currently in flight, for the UI indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionKind {
    Rate,
    Seek,
}

/// Live sync figures published for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncStats {
    /// Estimated server position minus local position (ms); positive means
    /// the player is behind.
    pub delta_ms: f64,
    pub attempts: u32,
    pub correction: Option<CorrectionKind>,
}

impl Default for SyncStats {
    fn default() -> Self {
        Self {
            delta_ms: 0.0,
            attempts: 0,
            correction: None,
        }
    }
}

/// Chosen correction for one drift measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CorrectionPlan {
    Rate { speed: f64, duration_ms: f64 },
    Seek { target_ticks: i64 },
    InSync,
}

/// Strategy selection. Rate-nudging handles drift inside its window when the
/// player supports it; seeking covers the rest. A large negative delta would
/// push the rate under the floor, so the duration is stretched instead.
pub(crate) fn plan_correction(
    delta_ms: f64,
    expected_ticks: i64,
    supports_rate: bool,
    settings: &SyncSettings,
) -> CorrectionPlan {
    let magnitude = delta_ms.abs();

    if supports_rate
        && settings.use_speed_to_sync
        && magnitude >= settings.min_delay_speed_to_sync
        && magnitude < settings.max_delay_speed_to_sync
    {
        let mut duration_ms = settings.speed_to_sync_duration;
        if delta_ms <= -duration_ms * SPEED_TO_SYNC_MIN_SPEED {
            duration_ms = magnitude / (1.0 - SPEED_TO_SYNC_MIN_SPEED);
        }
        let speed = 1.0 + delta_ms / duration_ms;
        debug_assert!(speed > 0.0, "corrective speed must stay positive");
        CorrectionPlan::Rate { speed, duration_ms }
    } else if settings.use_skip_to_sync && magnitude >= settings.min_delay_skip_to_sync {
        CorrectionPlan::Seek {
            target_ticks: expected_ticks,
        }
    } else {
        CorrectionPlan::InSync
    }
}

/// Watches the player's time updates and keeps it on the group's position.
pub struct DriftCorrector {
    player: Arc<PlayerAdapter>,
    registry: Arc<TimeSyncRegistry>,
    settings: SharedSettings,
    control: Arc<SyncControl>,
    last_command: Arc<RwLock<Option<PlaybackCommand>>>,
    stats: watch::Sender<SyncStats>,
}

impl DriftCorrector {
    pub fn new(
        player: Arc<PlayerAdapter>,
        registry: Arc<TimeSyncRegistry>,
        settings: SharedSettings,
        control: Arc<SyncControl>,
        last_command: Arc<RwLock<Option<PlaybackCommand>>>,
    ) -> Arc<Self> {
        let (stats, _) = watch::channel(SyncStats::default());
        Arc::new(Self {
            player,
            registry,
            settings,
            control,
            last_command,
            stats,
        })
    }

    /// Live stats for the UI.
    pub fn subscribe_stats(&self) -> watch::Receiver<SyncStats> {
        self.stats.subscribe()
    }

    /// Consume the player's event stream until the player handle closes.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut events = self.player.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(PlayerEvent::TimeUpdate {
                        now_local_ms,
                        position_ms,
                    }) => this.on_time_update(now_local_ms, position_ms),
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// One drift measurement against the estimated server position.
    pub fn on_time_update(self: &Arc<Self>, now_local_ms: i64, position_ms: f64) {
        let settings = self.settings.read().unwrap().clone();
        if !settings.enable_sync_correction {
            return;
        }

        let last = self.last_command.read().unwrap().clone();
        let Some(last) = last else { return };
        if last.command != CommandKind::Unpause {
            return;
        }
        if self.player.is_buffering()
            || !self.control.sync_enabled()
            || !self.player.is_playback_active()
        {
            return;
        }

        let server_now = self.registry.local_to_remote(now_local_ms);
        let expected_ticks = last.target_ticks() + (server_now - last.when) * TICKS_PER_MS;
        let current_ticks = (position_ms * TICKS_PER_MS as f64).round() as i64;
        let delta_ms = (expected_ticks - current_ticks) as f64 / TICKS_PER_MS as f64;

        self.stats.send_replace(SyncStats {
            delta_ms,
            attempts: self.control.attempts(),
            correction: None,
        });

        // One correction per settle window at most.
        let min_interval_ms = (settings.max_delay_speed_to_sync / 2.0) as i64;
        if self.control.should_rate_limit(now_local_ms, min_interval_ms) {
            return;
        }

        match plan_correction(
            delta_ms,
            expected_ticks,
            self.player.has_playback_rate(),
            &settings,
        ) {
            CorrectionPlan::Rate { speed, duration_ms } => {
                let attempts = self.control.record_attempt();
                info!(
                    "rate-nudge #{}: delta {:+.0} ms, speed {:.2} for {:.0} ms",
                    attempts, delta_ms, speed, duration_ms
                );
                self.player.set_playback_rate(speed);
                self.control.set_sync_enabled(false);
                self.stats.send_replace(SyncStats {
                    delta_ms,
                    attempts,
                    correction: Some(CorrectionKind::Rate),
                });

                let this = Arc::clone(self);
                let restore = tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(duration_ms as u64)).await;
                    this.player.set_playback_rate(1.0);
                    this.control.set_sync_enabled(true);
                    this.stats.send_replace(SyncStats {
                        delta_ms: 0.0,
                        attempts: this.control.attempts(),
                        correction: None,
                    });
                });
                self.control.set_rate_restore(restore);
            }
            CorrectionPlan::Seek { target_ticks } => {
                let attempts = self.control.record_attempt();
                info!(
                    "seek-nudge #{}: delta {:+.0} ms, jumping to {} ticks",
                    attempts, delta_ms, target_ticks
                );
                self.player.local_seek(target_ticks);
                self.stats.send_replace(SyncStats {
                    delta_ms,
                    attempts,
                    correction: Some(CorrectionKind::Seek),
                });
                self.control
                    .arm_guard(Duration::from_millis(min_interval_ms.max(0) as u64));
            }
            CorrectionPlan::InSync => {
                if self.control.attempts() > 0 {
                    debug!("back in sync after {} attempts", self.control.attempts());
                }
                self.control.reset_attempts();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ServerApi;
    use crate::player::{PlayerBackend, PlayerKind};
    use crate::settings;
    use crate::test_support::{FakeBackend, RecordingApi};

    // --- strategy selection ---

    #[test]
    fn small_positive_drift_becomes_a_rate_nudge() {
        let s = SyncSettings::default();
        match plan_correction(200.0, 0, true, &s) {
            CorrectionPlan::Rate { speed, duration_ms } => {
                assert!((speed - 1.2).abs() < 1e-9);
                assert_eq!(duration_ms, 1000.0);
            }
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[test]
    fn large_negative_drift_stretches_the_nudge() {
        let s = SyncSettings::default();
        match plan_correction(-300.0, 0, true, &s) {
            CorrectionPlan::Rate { speed, duration_ms } => {
                assert!((duration_ms - 375.0).abs() < 1e-9);
                assert!((speed - 0.2).abs() < 1e-9);
                assert!(speed > 0.0);
            }
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[test]
    fn drift_beyond_the_rate_window_seeks() {
        let s = SyncSettings::default();
        assert_eq!(
            plan_correction(3000.0, 42, true, &s),
            CorrectionPlan::Seek { target_ticks: 42 }
        );
    }

    #[test]
    fn no_rate_support_falls_back_to_seeking() {
        let s = SyncSettings::default();
        assert_eq!(
            plan_correction(500.0, 42, false, &s),
            CorrectionPlan::Seek { target_ticks: 42 }
        );
        // Under the skip threshold nothing happens.
        assert_eq!(plan_correction(200.0, 42, false, &s), CorrectionPlan::InSync);
    }

    #[test]
    fn tiny_drift_is_in_sync() {
        let s = SyncSettings::default();
        assert_eq!(plan_correction(30.0, 0, true, &s), CorrectionPlan::InSync);
        assert_eq!(plan_correction(-59.9, 0, true, &s), CorrectionPlan::InSync);
    }

    #[test]
    fn disabled_strategies_leave_drift_alone() {
        let mut s = SyncSettings::default();
        s.use_speed_to_sync = false;
        s.use_skip_to_sync = false;
        assert_eq!(plan_correction(2000.0, 0, true, &s), CorrectionPlan::InSync);
    }

    // --- corrector behavior against a fake player ---

    struct Fixture {
        corrector: Arc<DriftCorrector>,
        backend: Arc<FakeBackend>,
        control: Arc<SyncControl>,
    }

    fn fixture(settings: SyncSettings, last: Option<PlaybackCommand>) -> Fixture {
        let api = RecordingApi::new();
        let backend = FakeBackend::new();
        let player = Arc::new(PlayerAdapter::new());
        player.set_player(PlayerKind::Local(backend.clone()));
        let shared = settings::shared(settings);
        let registry = Arc::new(TimeSyncRegistry::new(
            api as Arc<dyn ServerApi>,
            Arc::clone(&shared),
        ));
        let control = SyncControl::new();
        let corrector = DriftCorrector::new(
            player,
            registry,
            shared,
            Arc::clone(&control),
            Arc::new(RwLock::new(last)),
        );
        Fixture {
            corrector,
            backend,
            control,
        }
    }

    fn unpause_at(when: i64, position_ticks: i64) -> PlaybackCommand {
        PlaybackCommand {
            command: CommandKind::Unpause,
            when,
            emitted_at: when,
            position_ticks: Some(position_ticks),
            playlist_item_id: "A".to_string(),
        }
    }

    #[tokio::test]
    async fn disabled_sync_produces_no_side_effects() {
        let now = crate::now_local_ms();
        let f = fixture(SyncSettings::default(), Some(unpause_at(now, 0)));
        f.control.set_sync_enabled(false);

        f.corrector.on_time_update(now, 0.0);
        // 5 seconds of drift, but the gate is closed.
        f.corrector.on_time_update(now, 5000.0);

        assert!(f.backend.calls().is_empty());
        assert_eq!(f.backend.playback_rate(), 1.0);
    }

    #[tokio::test]
    async fn non_unpause_commands_are_left_alone() {
        let now = crate::now_local_ms();
        let mut cmd = unpause_at(now, 0);
        cmd.command = CommandKind::Seek;
        let f = fixture(SyncSettings::default(), Some(cmd));
        f.control.set_sync_enabled(true);

        f.corrector.on_time_update(now, 5000.0);
        assert!(f.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn behind_player_gets_a_rate_nudge_and_recovers() {
        let mut s = SyncSettings::default();
        s.speed_to_sync_duration = 200.0;
        let now = crate::now_local_ms();
        // Command started just now at 10s; player reports 9.8s: 200ms behind.
        let f = fixture(s, Some(unpause_at(now, 100_000_000)));
        f.control.set_sync_enabled(true);

        f.corrector.on_time_update(now, 9_800.0);

        let rate = f.backend.playback_rate();
        assert!((rate - 2.0).abs() < 0.1, "unexpected rate {}", rate);
        assert!(!f.control.sync_enabled());
        assert_eq!(
            f.corrector.subscribe_stats().borrow().correction,
            Some(CorrectionKind::Rate)
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.backend.playback_rate(), 1.0);
        assert!(f.control.sync_enabled());
        assert_eq!(f.corrector.subscribe_stats().borrow().correction, None);
    }

    #[tokio::test]
    async fn large_drift_seeks_to_the_expected_position() {
        let mut s = SyncSettings::default();
        s.max_delay_speed_to_sync = 100.0;
        s.min_delay_skip_to_sync = 400.0;
        let now = crate::now_local_ms();
        let f = fixture(s, Some(unpause_at(now, 100_000_000)));
        f.control.set_sync_enabled(true);

        // 2 seconds behind: outside the (shrunken) rate window.
        f.corrector.on_time_update(now, 8_000.0);

        let calls = f.backend.calls();
        assert_eq!(calls.len(), 1);
        let target: i64 = calls[0].strip_prefix("seek:").unwrap().parse().unwrap();
        assert!(
            (100_000_000..101_000_000).contains(&target),
            "unexpected seek target {}",
            target
        );
        assert!(!f.control.sync_enabled());

        // Re-enabled after max_delay_speed_to_sync / 2 = 50ms.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(f.control.sync_enabled());
    }

    #[tokio::test]
    async fn corrections_are_rate_limited() {
        let mut s = SyncSettings::default();
        s.speed_to_sync_duration = 5_000.0;
        let now = crate::now_local_ms();
        let f = fixture(s, Some(unpause_at(now, 100_000_000)));
        f.control.set_sync_enabled(true);

        f.corrector.on_time_update(now, 9_800.0);
        let first_rate = f.backend.playback_rate();
        assert!(first_rate > 1.0);

        // Second measurement arrives immediately; the settle window rejects
        // it even though the gate reopened.
        f.control.set_sync_enabled(true);
        f.corrector.on_time_update(now + 10, 9_700.0);
        assert_eq!(f.backend.playback_rate(), first_rate);
        assert_eq!(f.control.attempts(), 1);
    }

    #[tokio::test]
    async fn in_sync_resets_the_attempt_counter() {
        let now = crate::now_local_ms();
        let f = fixture(SyncSettings::default(), Some(unpause_at(now, 100_000_000)));
        f.control.set_sync_enabled(true);
        f.control.record_attempt();

        f.corrector.on_time_update(now, 10_000.0);
        assert_eq!(f.control.attempts(), 0);
        assert!(f.backend.calls().is_empty());
    }
}
