//! Uniform contract over the local media player
//!
//! The embedding application owns the real player; the coordinator drives it
//! through this adapter. With no media loaded, or with playback rendering on
//! another device, every local primitive is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{now_local_ms, TICKS_PER_MS};

/// Default wait for command-path events (seek completion and the like).
pub const COMMAND_EVENT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default wait for plain state transitions (pause, unpause).
pub const STATE_EVENT_TIMEOUT: Duration = Duration::from_millis(500);

/// A stall shorter than this is not worth reporting as buffering.
const BUFFERING_DEBOUNCE: Duration = Duration::from_millis(3000);

/// Primitives and observations the application's player must provide.
pub trait PlayerBackend: Send + Sync {
    fn unpause(&self);
    fn pause(&self);
    fn seek(&self, position_ticks: i64);
    fn stop(&self);

    fn set_playback_rate(&self, rate: f64);
    fn playback_rate(&self) -> f64;
    fn has_playback_rate(&self) -> bool;

    /// Current playback position in milliseconds.
    fn current_time_ms(&self) -> f64;
    fn is_playing(&self) -> bool;
}

/// Events the coordinator consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    PlaybackStart,
    PlaybackStop,
    Unpause,
    Pause,
    TimeUpdate { now_local_ms: i64, position_ms: f64 },
    Ready,
    Buffering,
}

/// Payload-free discriminant, for event waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEventKind {
    PlaybackStart,
    PlaybackStop,
    Unpause,
    Pause,
    TimeUpdate,
    Ready,
    Buffering,
}

impl PlayerEvent {
    pub fn kind(&self) -> PlayerEventKind {
        match self {
            PlayerEvent::PlaybackStart => PlayerEventKind::PlaybackStart,
            PlayerEvent::PlaybackStop => PlayerEventKind::PlaybackStop,
            PlayerEvent::Unpause => PlayerEventKind::Unpause,
            PlayerEvent::Pause => PlayerEventKind::Pause,
            PlayerEvent::TimeUpdate { .. } => PlayerEventKind::TimeUpdate,
            PlayerEvent::Ready => PlayerEventKind::Ready,
            PlayerEvent::Buffering => PlayerEventKind::Buffering,
        }
    }
}

/// Raw notifications fed in by the embedding application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackendEvent {
    /// Media loaded and presentation began.
    Started,
    /// Media unloaded.
    Stopped,
    /// Transport left the paused state.
    Playing,
    Paused,
    /// Stalled waiting for data.
    Waiting,
    /// Enough data buffered to present.
    CanPlay,
    TimeUpdate { position_ms: f64 },
}

/// What kind of player currently backs the adapter.
pub enum PlayerKind {
    /// No media loaded.
    NoActive,
    /// A real local player.
    Local(Arc<dyn PlayerBackend>),
    /// Playback renders on another device; its own coordinator drives it.
    Remote,
}

/// An awaited player event did not arrive in time.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("timed out waiting for player event {0:?}")]
pub struct EventTimeout(pub PlayerEventKind);

/// The adapter the coordinator talks to.
pub struct PlayerAdapter {
    kind: RwLock<PlayerKind>,
    events: broadcast::Sender<PlayerEvent>,
    buffering: Arc<AtomicBool>,
    waiting_debounce: Mutex<Option<JoinHandle<()>>>,
}

impl PlayerAdapter {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            kind: RwLock::new(PlayerKind::NoActive),
            events,
            buffering: Arc::new(AtomicBool::new(false)),
            waiting_debounce: Mutex::new(None),
        }
    }

    /// Swap the backing player (media load, cast target change, unload).
    pub fn set_player(&self, kind: PlayerKind) {
        *self.kind.write().unwrap() = kind;
        self.buffering.store(false, Ordering::SeqCst);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    // --- primitives ---

    pub fn local_unpause(&self) {
        match &*self.kind.read().unwrap() {
            PlayerKind::Local(backend) => backend.unpause(),
            _ => debug!("unpause ignored, no local player"),
        }
    }

    pub fn local_pause(&self) {
        match &*self.kind.read().unwrap() {
            PlayerKind::Local(backend) => backend.pause(),
            _ => debug!("pause ignored, no local player"),
        }
    }

    pub fn local_seek(&self, position_ticks: i64) {
        match &*self.kind.read().unwrap() {
            PlayerKind::Local(backend) => backend.seek(position_ticks),
            _ => debug!("seek ignored, no local player"),
        }
    }

    pub fn local_stop(&self) {
        match &*self.kind.read().unwrap() {
            PlayerKind::Local(backend) => backend.stop(),
            _ => debug!("stop ignored, no local player"),
        }
    }

    pub fn set_playback_rate(&self, rate: f64) {
        match &*self.kind.read().unwrap() {
            PlayerKind::Local(backend) => backend.set_playback_rate(rate),
            _ => debug!("rate change ignored, no local player"),
        }
    }

    pub fn playback_rate(&self) -> f64 {
        match &*self.kind.read().unwrap() {
            PlayerKind::Local(backend) => backend.playback_rate(),
            _ => 1.0,
        }
    }

    pub fn has_playback_rate(&self) -> bool {
        match &*self.kind.read().unwrap() {
            PlayerKind::Local(backend) => backend.has_playback_rate(),
            _ => false,
        }
    }

    // --- observations ---

    pub fn current_time_ms(&self) -> f64 {
        match &*self.kind.read().unwrap() {
            PlayerKind::Local(backend) => backend.current_time_ms(),
            _ => 0.0,
        }
    }

    pub fn current_position_ticks(&self) -> i64 {
        (self.current_time_ms() * TICKS_PER_MS as f64).round() as i64
    }

    pub fn is_playing(&self) -> bool {
        match &*self.kind.read().unwrap() {
            PlayerKind::Local(backend) => backend.is_playing(),
            _ => false,
        }
    }

    /// Whether a local player is available to drive.
    pub fn is_playback_active(&self) -> bool {
        matches!(&*self.kind.read().unwrap(), PlayerKind::Local(_))
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering.load(Ordering::SeqCst)
    }

    // --- event translation ---

    /// Translate a raw player notification into coordinator events. A stall
    /// only becomes `Buffering` after persisting for the debounce window.
    pub fn notify(&self, event: BackendEvent) {
        match event {
            BackendEvent::Started => self.emit(PlayerEvent::PlaybackStart),
            BackendEvent::Stopped => {
                self.cancel_debounce();
                self.buffering.store(false, Ordering::SeqCst);
                self.emit(PlayerEvent::PlaybackStop);
            }
            BackendEvent::Playing => {
                self.cancel_debounce();
                let was_buffering = self.buffering.swap(false, Ordering::SeqCst);
                self.emit(PlayerEvent::Unpause);
                if was_buffering {
                    self.emit(PlayerEvent::Ready);
                }
            }
            BackendEvent::Paused => self.emit(PlayerEvent::Pause),
            BackendEvent::Waiting => {
                let mut guard = self.waiting_debounce.lock().unwrap();
                if guard.is_none() {
                    let buffering = Arc::clone(&self.buffering);
                    let events = self.events.clone();
                    *guard = Some(tokio::spawn(async move {
                        tokio::time::sleep(BUFFERING_DEBOUNCE).await;
                        buffering.store(true, Ordering::SeqCst);
                        let _ = events.send(PlayerEvent::Buffering);
                    }));
                }
            }
            BackendEvent::CanPlay => {
                self.cancel_debounce();
                self.buffering.store(false, Ordering::SeqCst);
                self.emit(PlayerEvent::Ready);
            }
            BackendEvent::TimeUpdate { position_ms } => {
                self.emit(PlayerEvent::TimeUpdate {
                    now_local_ms: now_local_ms(),
                    position_ms,
                });
            }
        }
    }

    /// Wait for the next event of `kind`, up to `timeout`. A timeout is a
    /// soft failure; callers fall back (seek anyway, report anyway).
    pub async fn wait_for(
        &self,
        kind: PlayerEventKind,
        timeout: Duration,
    ) -> Result<PlayerEvent, EventTimeout> {
        let mut rx = self.events.subscribe();
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.kind() == kind => return Some(event),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(Some(event)) => Ok(event),
            _ => Err(EventTimeout(kind)),
        }
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn cancel_debounce(&self) {
        if let Some(handle) = self.waiting_debounce.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Default for PlayerAdapter {
    fn default() -> Self {
        Self::new()
    }
}
