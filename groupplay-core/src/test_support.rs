//! Shared fakes for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use crate::api::{
    ApiError, BufferingRequest, PlayRequest, QueueRequestMode, ServerApi, ServerTimePayload,
    SignalingRequest,
};
use crate::player::PlayerBackend;
use crate::queue::{RepeatMode, ShuffleMode};
use crate::timesync::{PingSample, Pinger, TimeSyncError};

/// Server API fake that records every call as a short descriptor.
#[derive(Default)]
pub struct RecordingApi {
    pub calls: Mutex<Vec<String>>,
    pub server_time: Mutex<Option<ServerTimePayload>>,
    pub signals: Mutex<Vec<SignalingRequest>>,
}

impl RecordingApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl ServerApi for RecordingApi {
    async fn server_time(&self) -> Result<ServerTimePayload, ApiError> {
        self.record("serverTime");
        self.server_time
            .lock()
            .unwrap()
            .ok_or_else(|| ApiError::Transport("no server time configured".to_string()))
    }

    async fn report_ping(&self, ping_ms: i64) -> Result<(), ApiError> {
        self.record(format!("ping:{}", ping_ms));
        Ok(())
    }

    async fn request_play(&self, request: PlayRequest) -> Result<(), ApiError> {
        self.record(format!(
            "play:{}@{}",
            request.playing_queue.join(","),
            request.playing_item_position
        ));
        Ok(())
    }

    async fn request_pause(&self) -> Result<(), ApiError> {
        self.record("pause");
        Ok(())
    }

    async fn request_unpause(&self) -> Result<(), ApiError> {
        self.record("unpause");
        Ok(())
    }

    async fn request_seek(&self, position_ticks: i64) -> Result<(), ApiError> {
        self.record(format!("seek:{}", position_ticks));
        Ok(())
    }

    async fn report_buffering(&self, request: BufferingRequest) -> Result<(), ApiError> {
        self.record(format!(
            "buffering:done={}:playing={}:item={}",
            request.buffering_done, request.is_playing, request.playlist_item_id
        ));
        Ok(())
    }

    async fn set_playlist_item(&self, playlist_item_id: &str) -> Result<(), ApiError> {
        self.record(format!("setPlaylistItem:{}", playlist_item_id));
        Ok(())
    }

    async fn remove_from_playlist(&self, playlist_item_ids: &[String]) -> Result<(), ApiError> {
        self.record(format!("removeFromPlaylist:{}", playlist_item_ids.join(",")));
        Ok(())
    }

    async fn move_playlist_item(
        &self,
        playlist_item_id: &str,
        new_index: usize,
    ) -> Result<(), ApiError> {
        self.record(format!("movePlaylistItem:{}:{}", playlist_item_id, new_index));
        Ok(())
    }

    async fn queue(&self, item_ids: &[String], mode: QueueRequestMode) -> Result<(), ApiError> {
        self.record(format!("queue:{:?}:{}", mode, item_ids.join(",")));
        Ok(())
    }

    async fn next_track(&self, playlist_item_id: &str) -> Result<(), ApiError> {
        self.record(format!("nextTrack:{}", playlist_item_id));
        Ok(())
    }

    async fn previous_track(&self, playlist_item_id: &str) -> Result<(), ApiError> {
        self.record(format!("previousTrack:{}", playlist_item_id));
        Ok(())
    }

    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), ApiError> {
        self.record(format!("setRepeatMode:{:?}", mode));
        Ok(())
    }

    async fn set_shuffle_mode(&self, mode: ShuffleMode) -> Result<(), ApiError> {
        self.record(format!("setShuffleMode:{:?}", mode));
        Ok(())
    }

    async fn set_ignore_wait(&self, ignore_wait: bool) -> Result<(), ApiError> {
        self.record(format!("setIgnoreWait:{}", ignore_wait));
        Ok(())
    }

    async fn send_webrtc_signal(&self, signal: SignalingRequest) -> Result<(), ApiError> {
        self.record("webrtc");
        self.signals.lock().unwrap().push(signal);
        Ok(())
    }
}

/// Player backend fake with scriptable position and playing state.
#[derive(Default)]
pub struct FakeBackend {
    pub position_ms: RwLock<f64>,
    pub playing: AtomicBool,
    pub rate: RwLock<f64>,
    pub supports_rate: AtomicBool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self::default();
        *backend.rate.write().unwrap() = 1.0;
        backend.supports_rate.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl PlayerBackend for FakeBackend {
    fn unpause(&self) {
        self.record("unpause");
        self.playing.store(true, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.record("pause");
        self.playing.store(false, Ordering::SeqCst);
    }

    fn seek(&self, position_ticks: i64) {
        self.record(format!("seek:{}", position_ticks));
        *self.position_ms.write().unwrap() =
            position_ticks as f64 / crate::TICKS_PER_MS as f64;
    }

    fn stop(&self) {
        self.record("stop");
        self.playing.store(false, Ordering::SeqCst);
    }

    fn set_playback_rate(&self, rate: f64) {
        self.record(format!("rate:{:.2}", rate));
        *self.rate.write().unwrap() = rate;
    }

    fn playback_rate(&self) -> f64 {
        *self.rate.read().unwrap()
    }

    fn has_playback_rate(&self) -> bool {
        self.supports_rate.load(Ordering::SeqCst)
    }

    fn current_time_ms(&self) -> f64 {
        *self.position_ms.read().unwrap()
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

/// Pinger that never completes a sample.
pub struct NoopPinger;

#[async_trait]
impl Pinger for NoopPinger {
    async fn ping(&self) -> Result<PingSample, TimeSyncError> {
        Err(TimeSyncError::Timeout)
    }
}

/// Local queue fake that records every call.
#[derive(Default)]
pub struct FakeLocalQueue {
    pub calls: Mutex<Vec<String>>,
    pub current: Mutex<Option<String>>,
}

impl FakeLocalQueue {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl crate::queue::LocalQueue for FakeLocalQueue {
    fn play(&self, item_ids: &[String], start_index: usize, start_position_ticks: i64) {
        self.record(format!(
            "play:{}@{}+{}",
            item_ids.join(","),
            start_index,
            start_position_ticks
        ));
    }
    fn set_current(&self, playlist_item_id: &str) {
        self.record(format!("setCurrent:{}", playlist_item_id));
        *self.current.lock().unwrap() = Some(playlist_item_id.to_string());
    }
    fn remove(&self, playlist_item_ids: &[String]) {
        self.record(format!("remove:{}", playlist_item_ids.join(",")));
    }
    fn move_item(&self, playlist_item_id: &str, new_index: usize) {
        self.record(format!("move:{}:{}", playlist_item_id, new_index));
    }
    fn queue(&self, item_ids: &[String]) {
        self.record(format!("queue:{}", item_ids.join(",")));
    }
    fn queue_next(&self, item_ids: &[String]) {
        self.record(format!("queueNext:{}", item_ids.join(",")));
    }
    fn next(&self) {
        self.record("next");
    }
    fn previous(&self) {
        self.record("previous");
    }
    fn set_repeat_mode(&self, mode: RepeatMode) {
        self.record(format!("repeat:{:?}", mode));
    }
    fn set_shuffle_mode(&self, mode: ShuffleMode) {
        self.record(format!("shuffle:{:?}", mode));
    }
    fn refresh_view(&self) {
        self.record("refresh");
    }
    fn current_playlist_item_id(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }
}

/// Lookup fake that resolves every id.
pub struct FakeLookup;

#[async_trait]
impl crate::queue::ItemLookup for FakeLookup {
    async fn resolve(
        &self,
        item_ids: &[String],
    ) -> Result<Vec<crate::queue::MediaItem>, crate::queue::QueueError> {
        Ok(item_ids
            .iter()
            .map(|id| crate::queue::MediaItem {
                id: id.clone(),
                name: format!("Item {}", id),
                runtime_ticks: None,
            })
            .collect())
    }
}

/// A grouped queue controller whose current item is `playlist_item_id`.
pub async fn grouped_queue(
    api: Arc<dyn ServerApi>,
    player: Arc<crate::player::PlayerAdapter>,
    registry: Arc<crate::timesync::TimeSyncRegistry>,
    playlist_item_id: &str,
) -> Arc<crate::queue::QueueController> {
    use crate::messages::{PlayQueueUpdate, PlaylistEntry};
    use crate::queue::{QueueController, QueueReason};

    let controller = Arc::new(QueueController::new(
        Arc::new(FakeLocalQueue::default()),
        Arc::new(FakeLookup),
        api,
        player,
        registry,
    ));
    controller.enable();
    controller
        .apply_update(PlayQueueUpdate {
            last_update: 1,
            playlist: vec![PlaylistEntry {
                item_id: format!("media-{}", playlist_item_id),
                playlist_item_id: playlist_item_id.to_string(),
            }],
            playing_item_index: 0,
            start_position_ticks: 0,
            shuffle_mode: ShuffleMode::Sorted,
            repeat_mode: RepeatMode::RepeatNone,
            reason: QueueReason::SetCurrentItem,
        })
        .await
        .expect("seed queue snapshot");
    controller
}
