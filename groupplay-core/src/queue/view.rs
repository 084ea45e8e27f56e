//! Local mirror of the server's play queue.

use serde::{Deserialize, Serialize};

use crate::TICKS_PER_MS;

/// Playlist order mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShuffleMode {
    Sorted,
    Shuffle,
}

impl ShuffleMode {
    pub fn toggled(self) -> Self {
        match self {
            ShuffleMode::Sorted => ShuffleMode::Shuffle,
            ShuffleMode::Shuffle => ShuffleMode::Sorted,
        }
    }
}

/// Repeat behavior at the end of item/queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatMode {
    RepeatNone,
    RepeatOne,
    RepeatAll,
}

/// Why the server issued a queue snapshot; drives how it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueReason {
    NewPlaylist,
    SetCurrentItem,
    NextTrack,
    PreviousTrack,
    RemoveItems,
    MoveItem,
    Queue,
    QueueNext,
    RepeatMode,
    ShuffleMode,
}

/// A resolved media item, as much of it as the coordinator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaItem {
    pub id: String,
    pub name: String,
    pub runtime_ticks: Option<i64>,
}

/// One queue slot: a resolved item bound to its server playlist position id.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub playlist_item_id: String,
    pub item: MediaItem,
}

/// The mirrored queue. `current_index` is -1 when nothing is selected;
/// `last_update_ms` never moves backwards.
#[derive(Debug, Clone)]
pub struct QueueView {
    pub items: Vec<QueueItem>,
    pub current_index: isize,
    pub start_position_ticks: i64,
    pub shuffle_mode: ShuffleMode,
    pub repeat_mode: RepeatMode,
    pub last_update_ms: i64,
    pub reason: Option<QueueReason>,
}

impl Default for QueueView {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            current_index: -1,
            start_position_ticks: 0,
            shuffle_mode: ShuffleMode::Sorted,
            repeat_mode: RepeatMode::RepeatNone,
            last_update_ms: 0,
            reason: None,
        }
    }
}

impl QueueView {
    /// Whether a snapshot stamped `last_update_ms` may replace this view.
    pub fn accepts_update(&self, last_update_ms: i64) -> bool {
        last_update_ms > self.last_update_ms
    }

    /// Clamp an incoming index into the valid range `[-1, len)`.
    pub fn clamp_index(&self, index: i64) -> isize {
        let len = self.items.len() as i64;
        index.clamp(-1, (len - 1).max(-1)) as isize
    }

    pub fn current_item(&self) -> Option<&QueueItem> {
        usize::try_from(self.current_index)
            .ok()
            .and_then(|i| self.items.get(i))
    }

    pub fn current_playlist_item_id(&self) -> Option<&str> {
        self.current_item().map(|item| item.playlist_item_id.as_str())
    }

    pub fn item_ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.item.id.clone()).collect()
    }

    /// Where the group is now, assuming it has been playing since the
    /// snapshot was taken.
    pub fn estimate_current_ticks(&self, now_remote_ms: i64) -> i64 {
        let elapsed_ms = (now_remote_ms - self.last_update_ms).max(0);
        self.start_position_ticks + elapsed_ms * TICKS_PER_MS
    }
}
