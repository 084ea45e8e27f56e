//! Group Playback Core
//!
//! This library keeps a set of media clients rendering the same position at
//! the same wall-clock instant. A central server issues authoritative
//! playback commands; this crate estimates the server clock (directly or
//! through a peer), schedules the commands against the local player, corrects
//! drift while playing, and mirrors every user queue action back to the
//! server as a request.

pub mod api;
pub mod drift;
pub mod messages;
pub mod peer;
pub mod player;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod timesync;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use api::ServerApi;
pub use messages::{GroupUpdate, PlaybackCommand, ServerMessage};
pub use player::{PlayerAdapter, PlayerBackend};
pub use session::SessionController;
pub use settings::SyncSettings;

use std::sync::Once;

/// Media position unit: 1 tick = 100 microseconds.
pub const TICKS_PER_MS: i64 = 10_000;

static TRACING_INIT: Once = Once::new();

/// Install a default tracing subscriber reading `RUST_LOG`. Idempotent; the
/// embedding application may install its own subscriber instead.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("groupplay_core=debug".parse().unwrap())
                    .add_directive("webrtc=warn".parse().unwrap()),
            )
            .with_writer(std::io::stderr)
            .init();
    });
}

/// Current local wall-clock time in milliseconds since UNIX epoch.
pub fn now_local_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
