//! Command scheduling and execution
//!
//! Converts time-stamped server commands into precisely timed local player
//! actions. At most one scheduled-command timer is ever armed: arming a new
//! one clears the previous timer, any rate-nudge in flight, and resets the
//! playback rate.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{BufferingRequest, ServerApi};
use crate::messages::{CommandKind, PlaybackCommand};
use crate::now_local_ms;
use crate::player::{PlayerAdapter, PlayerEventKind, COMMAND_EVENT_TIMEOUT, STATE_EVENT_TIMEOUT};
use crate::queue::QueueController;
use crate::settings::SharedSettings;
use crate::timesync::TimeSyncRegistry;
use crate::TICKS_PER_MS;

/// The server accepts ready reports within ±50 ms of the target, so a
/// re-asserted seek is shifted inside that window; the changed target keeps
/// the player from short-circuiting the seek.
const FORCED_SEEK_JITTER_MS: i64 = 50;

/// Sync gate shared between the scheduler and the drift corrector. While a
/// command or a nudge is settling, `sync_enabled` stays false and the
/// corrector holds off.
pub struct SyncControl {
    sync_enabled: AtomicBool,
    last_sync_ms: AtomicI64,
    attempts: AtomicU32,
    rate_restore: Mutex<Option<JoinHandle<()>>>,
    guard_timer: Mutex<Option<JoinHandle<()>>>,
}

impl SyncControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sync_enabled: AtomicBool::new(false),
            last_sync_ms: AtomicI64::new(0),
            attempts: AtomicU32::new(0),
            rate_restore: Mutex::new(None),
            guard_timer: Mutex::new(None),
        })
    }

    pub fn sync_enabled(&self) -> bool {
        self.sync_enabled.load(Ordering::SeqCst)
    }

    pub fn set_sync_enabled(&self, enabled: bool) {
        self.sync_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn record_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Returns true when a correction happened too recently; otherwise
    /// stamps `now` as the last correction instant.
    pub fn should_rate_limit(&self, now_ms: i64, min_interval_ms: i64) -> bool {
        let last = self.last_sync_ms.load(Ordering::SeqCst);
        if now_ms - last < min_interval_ms {
            return true;
        }
        self.last_sync_ms.store(now_ms, Ordering::SeqCst);
        false
    }

    /// Disable sync and re-enable it after `delay`.
    pub fn arm_guard(self: &Arc<Self>, delay: Duration) {
        self.set_sync_enabled(false);
        let this = Arc::clone(self);
        let mut guard = self.guard_timer.lock().unwrap();
        if let Some(previous) = guard.take() {
            previous.abort();
        }
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.set_sync_enabled(true);
        }));
    }

    pub fn clear_guard(&self) {
        if let Some(handle) = self.guard_timer.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Store the task that will restore rate 1.0 after a rate-nudge.
    pub fn set_rate_restore(&self, handle: JoinHandle<()>) {
        let mut guard = self.rate_restore.lock().unwrap();
        if let Some(previous) = guard.take() {
            previous.abort();
        }
        *guard = Some(handle);
    }

    pub fn clear_rate_restore(&self) {
        if let Some(handle) = self.rate_restore.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Player state relevant to duplicate reconciliation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlayerSnapshot {
    pub is_playing: bool,
    pub position_ticks: i64,
}

/// Outcome of comparing a re-asserted command with the observed player state.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reconcile {
    /// Not a reassertion; schedule normally.
    NotDuplicate,
    /// Already scheduled or already satisfied; no side effects.
    Ignore,
    /// The player diverged; run this corrective command.
    Reschedule(PlaybackCommand),
    /// Seek post-state already holds; acknowledge instead of seeking.
    ReportReady,
}

/// Duplicate-reassertion policy. `jitter_ms` is only used when a seek must
/// be forced.
pub(crate) fn reconcile_duplicate(
    last: Option<&PlaybackCommand>,
    incoming: &PlaybackCommand,
    player: PlayerSnapshot,
    now_remote_ms: i64,
    jitter_ms: i64,
) -> Reconcile {
    let Some(last) = last else {
        return Reconcile::NotDuplicate;
    };
    if !last.is_duplicate_of(incoming) {
        return Reconcile::NotDuplicate;
    }

    // The original is still pending; its timer will fire.
    if incoming.when > now_remote_ms {
        return Reconcile::Ignore;
    }

    match incoming.command {
        CommandKind::Unpause => {
            if !player.is_playing {
                Reconcile::Reschedule(incoming.clone())
            } else {
                Reconcile::Ignore
            }
        }
        CommandKind::Pause => {
            if player.is_playing || player.position_ticks != incoming.target_ticks() {
                Reconcile::Reschedule(incoming.clone())
            } else {
                Reconcile::Ignore
            }
        }
        CommandKind::Stop => {
            if player.is_playing {
                Reconcile::Reschedule(incoming.clone())
            } else {
                Reconcile::Ignore
            }
        }
        CommandKind::Seek => {
            if player.is_playing || player.position_ticks != incoming.target_ticks() {
                let mut forced = incoming.clone();
                forced.position_ticks =
                    Some(incoming.target_ticks() + jitter_ms * TICKS_PER_MS);
                Reconcile::Reschedule(forced)
            } else {
                Reconcile::ReportReady
            }
        }
    }
}

/// Schedules authoritative commands against the local player.
pub struct CommandScheduler {
    player: Arc<PlayerAdapter>,
    registry: Arc<TimeSyncRegistry>,
    api: Arc<dyn ServerApi>,
    settings: SharedSettings,
    queue: Arc<QueueController>,
    control: Arc<SyncControl>,
    last_command: Arc<RwLock<Option<PlaybackCommand>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl CommandScheduler {
    pub fn new(
        player: Arc<PlayerAdapter>,
        registry: Arc<TimeSyncRegistry>,
        api: Arc<dyn ServerApi>,
        settings: SharedSettings,
        queue: Arc<QueueController>,
    ) -> Arc<Self> {
        Arc::new(Self {
            player,
            registry,
            api,
            settings,
            queue,
            control: SyncControl::new(),
            last_command: Arc::new(RwLock::new(None)),
            timer: Mutex::new(None),
        })
    }

    pub fn control(&self) -> &Arc<SyncControl> {
        &self.control
    }

    /// Shared handle used by the drift corrector.
    pub fn shared_last_command(&self) -> Arc<RwLock<Option<PlaybackCommand>>> {
        Arc::clone(&self.last_command)
    }

    pub fn last_command(&self) -> Option<PlaybackCommand> {
        self.last_command.read().unwrap().clone()
    }

    /// Accept an authoritative command. `enabled_at_remote` is the server
    /// instant the session was enabled; older commands are stale.
    pub fn apply(self: &Arc<Self>, command: PlaybackCommand, enabled_at_remote: Option<i64>) {
        if let Some(enabled_at) = enabled_at_remote {
            if command.emitted_at < enabled_at {
                debug!(
                    "stale command dropped: emitted {} before enable {}",
                    command.emitted_at, enabled_at
                );
                return;
            }
        }

        match self.queue.current_playlist_item_id() {
            Some(current) if current == command.playlist_item_id => {}
            current => {
                warn!(
                    "command for item {} does not match queue current {:?}, dropped",
                    command.playlist_item_id, current
                );
                return;
            }
        }

        let snapshot = PlayerSnapshot {
            is_playing: self.player.is_playing(),
            position_ticks: self.player.current_position_ticks(),
        };
        let now_remote = self.registry.local_to_remote(now_local_ms());
        let jitter_ms =
            rand::thread_rng().gen_range(-FORCED_SEEK_JITTER_MS..=FORCED_SEEK_JITTER_MS);

        let decision = reconcile_duplicate(
            self.last_command.read().unwrap().as_ref(),
            &command,
            snapshot,
            now_remote,
            jitter_ms,
        );

        *self.last_command.write().unwrap() = Some(command.clone());

        match decision {
            Reconcile::NotDuplicate => self.schedule(command),
            Reconcile::Ignore => debug!("duplicate command already in effect"),
            Reconcile::Reschedule(corrective) => {
                info!("player diverged from {:?}, re-applying", corrective.command);
                self.schedule(corrective);
            }
            Reconcile::ReportReady => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.report_buffering_done(&command).await;
                });
            }
        }
    }

    /// Cancel whatever is pending; called on disable and on playback stop.
    pub fn reset(&self) {
        self.clear_timer();
        self.cancel_rate_nudge();
        self.control.clear_guard();
        self.control.set_sync_enabled(false);
        self.control.reset_attempts();
        *self.last_command.write().unwrap() = None;
    }

    /// Cancel a pending timer without forgetting the last command.
    pub fn cancel_pending(&self) {
        self.clear_timer();
        self.cancel_rate_nudge();
    }

    fn schedule(self: &Arc<Self>, command: PlaybackCommand) {
        self.clear_timer();
        self.cancel_rate_nudge();

        let t_local = self.registry.remote_to_local(command.when);
        let delay_ms = t_local - now_local_ms();
        let in_future = delay_ms > 0;

        if in_future && command.command == CommandKind::Unpause {
            // Being ahead of the start point would otherwise surface as a big
            // skip right after the unpause.
            let min_skip_ticks = {
                let s = self.settings.read().unwrap();
                (s.min_delay_skip_to_sync * TICKS_PER_MS as f64) as i64
            };
            let ahead_ticks = self.player.current_position_ticks() - command.target_ticks();
            if ahead_ticks > min_skip_ticks {
                debug!("pre-seeking {} ticks back before unpause", ahead_ticks);
                self.player.local_seek(command.target_ticks());
            }
        }

        debug!(
            "scheduling {:?} in {} ms (item {})",
            command.command, delay_ms, command.playlist_item_id
        );

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if in_future {
                tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
            }
            this.execute(command, !in_future).await;
        });
        *self.timer.lock().unwrap() = Some(handle);
    }

    async fn execute(self: Arc<Self>, command: PlaybackCommand, was_past: bool) {
        match command.command {
            CommandKind::Unpause => self.execute_unpause(&command, was_past).await,
            CommandKind::Pause => self.execute_pause(&command).await,
            CommandKind::Stop => {
                info!("stopping playback");
                self.player.local_stop();
            }
            CommandKind::Seek => self.execute_seek(&command).await,
        }
    }

    async fn execute_unpause(&self, command: &PlaybackCommand, was_past: bool) {
        let guard_delay = {
            let s = self.settings.read().unwrap();
            Duration::from_millis((s.max_delay_speed_to_sync / 2.0) as u64)
        };

        if was_past {
            // The group has been playing since `when`; catch up to where it
            // is now, not where it started.
            let now_remote = self.registry.local_to_remote(now_local_ms());
            let server_ticks =
                command.target_ticks() + (now_remote - command.when) * TICKS_PER_MS;
            info!(
                "late unpause, catching up to {} ticks ({} ms past)",
                server_ticks,
                now_remote - command.when
            );

            self.player.local_unpause();
            if self
                .player
                .wait_for(PlayerEventKind::Unpause, STATE_EVENT_TIMEOUT)
                .await
                .is_err()
            {
                debug!("no unpause event, seeking anyway");
            }
            self.player.local_seek(server_ticks);
        } else {
            self.player.local_unpause();
        }

        self.control.arm_guard(guard_delay);
    }

    async fn execute_pause(&self, command: &PlaybackCommand) {
        self.player.local_pause();
        if self
            .player
            .wait_for(PlayerEventKind::Pause, STATE_EVENT_TIMEOUT)
            .await
            .is_err()
        {
            debug!("no pause event, seeking anyway");
        }
        self.player.local_seek(command.target_ticks());
    }

    async fn execute_seek(&self, command: &PlaybackCommand) {
        let target = command.target_ticks();
        self.player.local_unpause();
        self.player.local_seek(target);

        match self
            .player
            .wait_for(PlayerEventKind::Ready, COMMAND_EVENT_TIMEOUT)
            .await
        {
            Ok(_) => {
                self.player.local_pause();
                self.report_buffering_done(command).await;
            }
            Err(_) => {
                warn!("seek did not settle, retrying");
                self.player.local_seek(target);
            }
        }
    }

    async fn report_buffering_done(&self, command: &PlaybackCommand) {
        let report = BufferingRequest {
            when: self.registry.local_to_remote(now_local_ms()),
            position_ticks: self.player.current_position_ticks(),
            is_playing: self.player.is_playing(),
            playlist_item_id: command.playlist_item_id.clone(),
            buffering_done: true,
        };
        if let Err(e) = self.api.report_buffering(report).await {
            warn!("buffering report failed: {}", e);
        }
    }

    fn clear_timer(&self) {
        if let Some(handle) = self.timer.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn cancel_rate_nudge(&self) {
        self.control.clear_rate_restore();
        self.player.set_playback_rate(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{BackendEvent, PlayerKind};
    use crate::settings::{self, SyncSettings};
    use crate::test_support::{grouped_queue, FakeBackend, RecordingApi};

    fn command(kind: CommandKind, when: i64, ticks: Option<i64>, item: &str) -> PlaybackCommand {
        PlaybackCommand {
            command: kind,
            when,
            emitted_at: when,
            position_ticks: ticks,
            playlist_item_id: item.to_string(),
        }
    }

    // --- duplicate reconciliation ---

    fn snapshot(is_playing: bool, position_ticks: i64) -> PlayerSnapshot {
        PlayerSnapshot {
            is_playing,
            position_ticks,
        }
    }

    #[test]
    fn fresh_command_is_not_a_duplicate() {
        let last = command(CommandKind::Seek, 1000, Some(1), "B");
        let incoming = command(CommandKind::Seek, 2000, Some(1), "B");
        assert_eq!(
            reconcile_duplicate(Some(&last), &incoming, snapshot(false, 1), 1500, 0),
            Reconcile::NotDuplicate
        );
        assert_eq!(
            reconcile_duplicate(None, &incoming, snapshot(false, 1), 1500, 0),
            Reconcile::NotDuplicate
        );
    }

    #[test]
    fn duplicate_before_its_time_is_ignored() {
        let cmd = command(CommandKind::Pause, 5000, Some(1), "B");
        assert_eq!(
            reconcile_duplicate(Some(&cmd), &cmd.clone(), snapshot(true, 99), 4000, 0),
            Reconcile::Ignore
        );
    }

    #[test]
    fn satisfied_seek_duplicate_reports_ready() {
        // Player paused exactly at the target: no seek, acknowledge instead.
        let cmd = command(CommandKind::Seek, 1000, Some(50_000_000), "B");
        assert_eq!(
            reconcile_duplicate(
                Some(&cmd),
                &cmd.clone(),
                snapshot(false, 50_000_000),
                1200,
                37
            ),
            Reconcile::ReportReady
        );
    }

    #[test]
    fn diverged_seek_duplicate_is_forced_with_jitter() {
        let cmd = command(CommandKind::Seek, 1000, Some(50_000_000), "B");
        let result = reconcile_duplicate(
            Some(&cmd),
            &cmd.clone(),
            snapshot(true, 50_000_000),
            1200,
            -20,
        );
        match result {
            Reconcile::Reschedule(forced) => {
                assert_eq!(forced.position_ticks, Some(50_000_000 - 20 * TICKS_PER_MS));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn unpause_duplicate_reschedules_only_when_paused() {
        let cmd = command(CommandKind::Unpause, 1000, Some(0), "B");
        assert_eq!(
            reconcile_duplicate(Some(&cmd), &cmd.clone(), snapshot(true, 123), 2000, 0),
            Reconcile::Ignore
        );
        assert!(matches!(
            reconcile_duplicate(Some(&cmd), &cmd.clone(), snapshot(false, 123), 2000, 0),
            Reconcile::Reschedule(_)
        ));
    }

    #[test]
    fn stop_duplicate_reschedules_only_when_playing() {
        let cmd = command(CommandKind::Stop, 1000, None, "B");
        assert!(matches!(
            reconcile_duplicate(Some(&cmd), &cmd.clone(), snapshot(true, 0), 2000, 0),
            Reconcile::Reschedule(_)
        ));
        assert_eq!(
            reconcile_duplicate(Some(&cmd), &cmd.clone(), snapshot(false, 0), 2000, 0),
            Reconcile::Ignore
        );
    }

    // --- end-to-end scheduling against a fake player ---

    struct Fixture {
        scheduler: Arc<CommandScheduler>,
        backend: Arc<FakeBackend>,
        api: Arc<RecordingApi>,
        player: Arc<PlayerAdapter>,
    }

    async fn fixture(settings: SyncSettings) -> Fixture {
        let api = RecordingApi::new();
        let backend = FakeBackend::new();
        let player = Arc::new(PlayerAdapter::new());
        player.set_player(PlayerKind::Local(backend.clone()));
        let shared = settings::shared(settings);
        let registry = Arc::new(TimeSyncRegistry::new(
            api.clone() as Arc<dyn ServerApi>,
            Arc::clone(&shared),
        ));
        let queue = grouped_queue(
            api.clone() as Arc<dyn ServerApi>,
            Arc::clone(&player),
            Arc::clone(&registry),
            "A",
        )
        .await;
        let scheduler = CommandScheduler::new(
            Arc::clone(&player),
            registry,
            api.clone() as Arc<dyn ServerApi>,
            shared,
            queue,
        );
        Fixture {
            scheduler,
            backend,
            api,
            player,
        }
    }

    fn fast_settings() -> SyncSettings {
        let mut s = SyncSettings::default();
        // Keep the sync-guard short so tests observe it settling.
        s.max_delay_speed_to_sync = 100.0;
        s
    }

    #[tokio::test]
    async fn future_unpause_fires_at_its_instant() {
        let f = fixture(fast_settings()).await;
        // Player 10ms behind the start point: under the skip threshold, so
        // no pre-seek happens.
        *f.backend.position_ms.write().unwrap() = 990.0;

        let cmd = command(
            CommandKind::Unpause,
            now_local_ms() + 150,
            Some(10_000_000),
            "A",
        );
        f.scheduler.apply(cmd, None);

        assert!(f.backend.calls().is_empty());
        assert!(!f.scheduler.control().sync_enabled());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(f.backend.calls(), vec!["unpause"]);

        // Guard delay is max_delay_speed_to_sync / 2 = 50ms.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.scheduler.control().sync_enabled());
    }

    #[tokio::test]
    async fn future_unpause_preseeks_when_far_ahead() {
        let f = fixture(fast_settings()).await;
        // 600ms ahead of the start point, past the 400ms skip threshold.
        *f.backend.position_ms.write().unwrap() = 1600.0;

        let cmd = command(
            CommandKind::Unpause,
            now_local_ms() + 150,
            Some(10_000_000),
            "A",
        );
        f.scheduler.apply(cmd, None);

        assert_eq!(f.backend.calls(), vec!["seek:10000000"]);
    }

    #[tokio::test]
    async fn past_unpause_catches_up() {
        let f = fixture(fast_settings()).await;

        let cmd = command(
            CommandKind::Unpause,
            now_local_ms() - 500,
            Some(10_000_000),
            "A",
        );
        f.scheduler.apply(cmd, None);

        tokio::task::yield_now().await;
        f.player.notify(BackendEvent::Playing);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = f.backend.calls();
        assert_eq!(calls[0], "unpause");
        let seek_ticks: i64 = calls[1].strip_prefix("seek:").unwrap().parse().unwrap();
        // Catch-up target is start + elapsed; allow scheduling slack.
        assert!(
            (15_000_000..18_000_000).contains(&seek_ticks),
            "unexpected catch-up target {}",
            seek_ticks
        );
    }

    #[tokio::test]
    async fn pause_seeks_after_the_pause_event() {
        let f = fixture(fast_settings()).await;
        f.backend.playing.store(true, std::sync::atomic::Ordering::SeqCst);

        let cmd = command(
            CommandKind::Pause,
            now_local_ms() - 1,
            Some(20_000_000),
            "A",
        );
        f.scheduler.apply(cmd, None);

        tokio::task::yield_now().await;
        f.player.notify(BackendEvent::Paused);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(f.backend.calls(), vec!["pause", "seek:20000000"]);
    }

    #[tokio::test]
    async fn seek_pauses_and_acknowledges_once_ready() {
        let f = fixture(fast_settings()).await;

        let cmd = command(
            CommandKind::Seek,
            now_local_ms() - 1,
            Some(30_000_000),
            "A",
        );
        f.scheduler.apply(cmd, None);

        tokio::task::yield_now().await;
        f.player.notify(BackendEvent::CanPlay);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(f.backend.calls(), vec!["unpause", "seek:30000000", "pause"]);
        assert!(f
            .api
            .calls()
            .iter()
            .any(|c| c.starts_with("buffering:done=true")));
    }

    #[tokio::test]
    async fn duplicate_before_when_schedules_once() {
        let f = fixture(fast_settings()).await;
        let cmd = command(
            CommandKind::Unpause,
            now_local_ms() + 120,
            Some(10_000_000),
            "A",
        );
        f.scheduler.apply(cmd.clone(), None);
        f.scheduler.apply(cmd, None);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(f.backend.calls(), vec!["unpause"]);
    }

    #[tokio::test]
    async fn stale_and_mismatched_commands_are_dropped() {
        let f = fixture(fast_settings()).await;

        // Emitted before the session was enabled.
        let stale = command(CommandKind::Unpause, now_local_ms(), Some(0), "A");
        f.scheduler.apply(stale, Some(now_local_ms() + 10_000));

        // For an item the queue is not on.
        let wrong_item = command(CommandKind::Unpause, now_local_ms(), Some(0), "other");
        f.scheduler.apply(wrong_item, None);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.backend.calls().is_empty());
        assert!(f.scheduler.last_command().is_none());
    }

    #[tokio::test]
    async fn reset_disarms_the_pending_timer() {
        let f = fixture(fast_settings()).await;
        let cmd = command(
            CommandKind::Unpause,
            now_local_ms() + 100,
            Some(10_000_000),
            "A",
        );
        f.scheduler.apply(cmd, None);
        f.scheduler.reset();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(f.backend.calls().is_empty());
        assert!(f.scheduler.last_command().is_none());
        assert!(!f.scheduler.control().sync_enabled());
    }

    #[tokio::test]
    async fn new_command_replaces_the_armed_timer() {
        let f = fixture(fast_settings()).await;
        let first = command(
            CommandKind::Unpause,
            now_local_ms() + 100,
            Some(10_000_000),
            "A",
        );
        let second = command(
            CommandKind::Pause,
            now_local_ms() + 120,
            Some(20_000_000),
            "A",
        );
        f.scheduler.apply(first, None);
        f.scheduler.apply(second, None);

        tokio::time::sleep(Duration::from_millis(800)).await;
        // Only the pause ran: its pause primitive plus the timeout seek.
        assert_eq!(f.backend.calls(), vec!["pause", "seek:20000000"]);
    }
}
