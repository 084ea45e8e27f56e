//! Clock synchronization against the server and against peers.

mod registry;
mod source;

pub use registry::{DeviceEntry, TimeSyncRegistry};
pub use source::{PingSample, Pinger, SyncUpdate, TimeSyncError, TimeSyncSource, SERVER_SOURCE_ID};
