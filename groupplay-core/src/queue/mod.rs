//! Queue mirroring: the server owns playlist order, current item, shuffle
//! and repeat; user edits become requests and server snapshots become local
//! state.

mod controller;
mod view;

pub use controller::{ItemLookup, LocalQueue, QueueController, QueueError};
pub use view::{MediaItem, QueueItem, QueueReason, QueueView, RepeatMode, ShuffleMode};
