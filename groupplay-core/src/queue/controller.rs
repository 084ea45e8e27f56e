//! Queue interception layer
//!
//! The application calls these methods for every queue action. Outside a
//! group they delegate straight to the local implementation; inside a group
//! they become server requests, and the local structures only change when the
//! server broadcasts the resulting snapshot back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{BufferingRequest, PlayRequest, QueueRequestMode, ServerApi};
use crate::messages::PlayQueueUpdate;
use crate::now_local_ms;
use crate::player::{PlayerAdapter, PlayerEventKind, COMMAND_EVENT_TIMEOUT};
use crate::timesync::TimeSyncRegistry;

use super::view::{MediaItem, QueueItem, QueueReason, QueueView, RepeatMode, ShuffleMode};

/// Queue mirroring failures.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("trying to apply old update: incoming {incoming} <= stored {stored}")]
    StaleUpdate { incoming: i64, stored: i64 },

    #[error("item lookup failed: {0}")]
    Lookup(String),

    #[error("server request failed: {0}")]
    Api(#[from] crate::api::ApiError),
}

/// The application's own queue implementation, used while ungrouped and
/// nudged after grouped updates.
pub trait LocalQueue: Send + Sync {
    fn play(&self, item_ids: &[String], start_index: usize, start_position_ticks: i64);
    fn set_current(&self, playlist_item_id: &str);
    fn remove(&self, playlist_item_ids: &[String]);
    fn move_item(&self, playlist_item_id: &str, new_index: usize);
    fn queue(&self, item_ids: &[String]);
    fn queue_next(&self, item_ids: &[String]);
    fn next(&self);
    fn previous(&self);
    fn set_repeat_mode(&self, mode: RepeatMode);
    fn set_shuffle_mode(&self, mode: ShuffleMode);
    /// Re-render the playlist view after an order change.
    fn refresh_view(&self);
    /// The item the player is actually on right now.
    fn current_playlist_item_id(&self) -> Option<String>;
}

/// Resolves server item ids into displayable media items.
#[async_trait]
pub trait ItemLookup: Send + Sync {
    async fn resolve(&self, item_ids: &[String]) -> Result<Vec<MediaItem>, QueueError>;
}

/// The queue controller the application talks to.
pub struct QueueController {
    grouped: AtomicBool,
    following: AtomicBool,
    local: Arc<dyn LocalQueue>,
    lookup: Arc<dyn ItemLookup>,
    api: Arc<dyn ServerApi>,
    player: Arc<PlayerAdapter>,
    registry: Arc<TimeSyncRegistry>,
    view: RwLock<QueueView>,
}

impl QueueController {
    pub fn new(
        local: Arc<dyn LocalQueue>,
        lookup: Arc<dyn ItemLookup>,
        api: Arc<dyn ServerApi>,
        player: Arc<PlayerAdapter>,
        registry: Arc<TimeSyncRegistry>,
    ) -> Self {
        Self {
            grouped: AtomicBool::new(false),
            following: AtomicBool::new(false),
            local,
            lookup,
            api,
            player,
            registry,
            view: RwLock::new(QueueView::default()),
        }
    }

    /// Route user actions to the server from now on.
    pub fn enable(&self) {
        self.grouped.store(true, Ordering::SeqCst);
        self.following.store(false, Ordering::SeqCst);
    }

    /// Restore direct local handling and drop the mirrored state.
    pub fn disable(&self) {
        self.grouped.store(false, Ordering::SeqCst);
        self.following.store(false, Ordering::SeqCst);
        *self.view.write().unwrap() = QueueView::default();
    }

    pub fn is_grouped(&self) -> bool {
        self.grouped.load(Ordering::SeqCst)
    }

    pub fn is_following(&self) -> bool {
        self.following.load(Ordering::SeqCst)
    }

    /// Snapshot of the mirrored queue.
    pub fn view(&self) -> QueueView {
        self.view.read().unwrap().clone()
    }

    pub fn current_playlist_item_id(&self) -> Option<String> {
        self.view
            .read()
            .unwrap()
            .current_playlist_item_id()
            .map(str::to_string)
    }

    // --- user actions ---

    pub async fn play(
        &self,
        item_ids: &[String],
        start_index: usize,
        start_position_ticks: i64,
    ) -> Result<(), QueueError> {
        if self.is_grouped() {
            self.api
                .request_play(PlayRequest {
                    playing_queue: item_ids.to_vec(),
                    playing_item_position: start_index,
                    start_position_ticks,
                })
                .await?;
        } else {
            self.local.play(item_ids, start_index, start_position_ticks);
        }
        Ok(())
    }

    pub async fn set_current_playlist_item(
        &self,
        playlist_item_id: &str,
    ) -> Result<(), QueueError> {
        if self.is_grouped() {
            self.api.set_playlist_item(playlist_item_id).await?;
        } else {
            self.local.set_current(playlist_item_id);
        }
        Ok(())
    }

    pub async fn remove_from_playlist(
        &self,
        playlist_item_ids: &[String],
    ) -> Result<(), QueueError> {
        if self.is_grouped() {
            self.api.remove_from_playlist(playlist_item_ids).await?;
        } else {
            self.local.remove(playlist_item_ids);
        }
        Ok(())
    }

    pub async fn move_playlist_item(
        &self,
        playlist_item_id: &str,
        new_index: usize,
    ) -> Result<(), QueueError> {
        if self.is_grouped() {
            self.api
                .move_playlist_item(playlist_item_id, new_index)
                .await?;
        } else {
            self.local.move_item(playlist_item_id, new_index);
        }
        Ok(())
    }

    pub async fn queue(&self, item_ids: &[String]) -> Result<(), QueueError> {
        if self.is_grouped() {
            self.api.queue(item_ids, QueueRequestMode::Default).await?;
        } else {
            self.local.queue(item_ids);
        }
        Ok(())
    }

    pub async fn queue_next(&self, item_ids: &[String]) -> Result<(), QueueError> {
        if self.is_grouped() {
            self.api.queue(item_ids, QueueRequestMode::Next).await?;
        } else {
            self.local.queue_next(item_ids);
        }
        Ok(())
    }

    pub async fn next_track(&self) -> Result<(), QueueError> {
        if self.is_grouped() {
            if let Some(current) = self.current_playlist_item_id() {
                self.api.next_track(&current).await?;
            }
        } else {
            self.local.next();
        }
        Ok(())
    }

    pub async fn previous_track(&self) -> Result<(), QueueError> {
        if self.is_grouped() {
            if let Some(current) = self.current_playlist_item_id() {
                self.api.previous_track(&current).await?;
            }
        } else {
            self.local.previous();
        }
        Ok(())
    }

    pub async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), QueueError> {
        if self.is_grouped() {
            self.api.set_repeat_mode(mode).await?;
        } else {
            self.local.set_repeat_mode(mode);
        }
        Ok(())
    }

    pub async fn set_shuffle_mode(&self, mode: ShuffleMode) -> Result<(), QueueError> {
        if self.is_grouped() {
            self.api.set_shuffle_mode(mode).await?;
        } else {
            self.local.set_shuffle_mode(mode);
        }
        Ok(())
    }

    pub async fn toggle_shuffle_mode(&self) -> Result<(), QueueError> {
        let toggled = self.view.read().unwrap().shuffle_mode.toggled();
        self.set_shuffle_mode(toggled).await
    }

    // --- server snapshots ---

    /// Apply an authoritative queue snapshot.
    pub async fn apply_update(self: &Arc<Self>, update: PlayQueueUpdate) -> Result<(), QueueError> {
        {
            let view = self.view.read().unwrap();
            if !view.accepts_update(update.last_update) {
                debug!(
                    "trying to apply old update ({} <= {})",
                    update.last_update, view.last_update_ms
                );
                return Err(QueueError::StaleUpdate {
                    incoming: update.last_update,
                    stored: view.last_update_ms,
                });
            }
        }

        let item_ids: Vec<String> = update.playlist.iter().map(|e| e.item_id.clone()).collect();
        let resolved = self.lookup.resolve(&item_ids).await?;

        let mut items = Vec::with_capacity(update.playlist.len());
        for entry in &update.playlist {
            match resolved.iter().find(|item| item.id == entry.item_id) {
                Some(item) => items.push(QueueItem {
                    playlist_item_id: entry.playlist_item_id.clone(),
                    item: item.clone(),
                }),
                None => warn!("item {} missing from lookup, skipped", entry.item_id),
            }
        }

        {
            let mut view = self.view.write().unwrap();
            view.items = items;
            view.current_index = view.clamp_index(update.playing_item_index);
            view.start_position_ticks = update.start_position_ticks;
            view.shuffle_mode = update.shuffle_mode;
            view.repeat_mode = update.repeat_mode;
            view.last_update_ms = update.last_update;
            view.reason = Some(update.reason);
        }

        match update.reason {
            QueueReason::NewPlaylist => {
                if !self.following.swap(true, Ordering::SeqCst) {
                    info!("joining the group barrier");
                    self.api.set_ignore_wait(false).await?;
                }
                self.start_playback().await;
            }
            QueueReason::SetCurrentItem | QueueReason::NextTrack | QueueReason::PreviousTrack => {
                if let Some(current) = self.current_playlist_item_id() {
                    self.local.set_current(&current);
                }
            }
            QueueReason::RemoveItems => {
                self.local.refresh_view();
                let mirrored = self.current_playlist_item_id();
                if self.local.current_playlist_item_id() != mirrored {
                    if let Some(current) = mirrored {
                        self.local.set_current(&current);
                    }
                }
            }
            QueueReason::MoveItem | QueueReason::Queue | QueueReason::QueueNext => {
                self.local.refresh_view();
            }
            QueueReason::RepeatMode => self.local.set_repeat_mode(update.repeat_mode),
            QueueReason::ShuffleMode => self.local.set_shuffle_mode(update.shuffle_mode),
        }
        Ok(())
    }

    /// Begin playing where the group is estimated to be now, and report
    /// "buffering done, paused" once the media has started.
    async fn start_playback(self: &Arc<Self>) {
        let (item_ids, index, playlist_item_id, estimated_ticks) = {
            let view = self.view.read().unwrap();
            let now_remote = self.registry.local_to_remote(now_local_ms());
            (
                view.item_ids(),
                view.current_index.max(0) as usize,
                view.current_playlist_item_id().map(str::to_string),
                view.estimate_current_ticks(now_remote),
            )
        };

        if item_ids.is_empty() {
            debug!("queue snapshot without items, nothing to start");
            return;
        }

        self.local.play(&item_ids, index, estimated_ticks);

        let Some(playlist_item_id) = playlist_item_id else {
            return;
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if this
                .player
                .wait_for(PlayerEventKind::Ready, COMMAND_EVENT_TIMEOUT)
                .await
                .is_err()
            {
                warn!("media did not start in time, reporting ready anyway");
            }
            let report = BufferingRequest {
                when: this.registry.local_to_remote(now_local_ms()),
                position_ticks: this.player.current_position_ticks(),
                is_playing: false,
                playlist_item_id,
                buffering_done: true,
            };
            if let Err(e) = this.api.report_buffering(report).await {
                warn!("buffering report failed: {}", e);
            }
        });
    }
}
