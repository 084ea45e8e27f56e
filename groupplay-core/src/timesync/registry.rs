//! Source registry and active-source selection
//!
//! Owns the server source plus one source per connected peer. The effective
//! offset used by the coordinator is either the direct server offset or, when
//! a peer is selected, the transitive path local→peer→server.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::ServerApi;
use crate::peer::PeerMesh;
use crate::settings::SharedSettings;

use super::source::{Pinger, ServerPinger, TimeSyncSource, SERVER_SOURCE_ID};

/// One selectable clock source, for display in the settings UI.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEntry {
    pub id: String,
    /// Effective local→server offset through this source (ms).
    pub offset_ms: f64,
    /// Round trip to the sampled endpoint (ms).
    pub ping_ms: f64,
}

struct PeerClock {
    source: Arc<TimeSyncSource>,
    /// The peer's own server offset, from its `time-sync-server-update`.
    reported_server_offset_ms: f64,
    reported_server_ping_ms: f64,
}

/// Registry of clock sources with a user-selectable active one.
pub struct TimeSyncRegistry {
    server: Arc<TimeSyncSource>,
    peers: RwLock<HashMap<String, PeerClock>>,
    settings: SharedSettings,
    api: Arc<dyn ServerApi>,
}

impl TimeSyncRegistry {
    pub fn new(api: Arc<dyn ServerApi>, settings: SharedSettings) -> Self {
        let pinger = Arc::new(ServerPinger::new(Arc::clone(&api)));
        Self {
            server: Arc::new(TimeSyncSource::new(SERVER_SOURCE_ID, pinger)),
            peers: RwLock::new(HashMap::new()),
            settings,
            api,
        }
    }

    pub fn server_source(&self) -> &Arc<TimeSyncSource> {
        &self.server
    }

    /// Begin sampling the server.
    pub fn start(&self) {
        self.server.start();
    }

    /// Stop every source and drop all peer sources.
    pub fn shutdown(&self) {
        self.server.stop();
        self.clear_peers();
    }

    /// A peer became reachable: sample its clock from now on.
    pub fn add_peer(&self, peer_id: &str, pinger: Arc<dyn Pinger>) {
        let source = Arc::new(TimeSyncSource::new(peer_id, pinger));
        source.start();
        info!("tracking clock of peer {}", peer_id);

        let mut peers = self.peers.write().unwrap();
        peers.insert(
            peer_id.to_string(),
            PeerClock {
                source,
                reported_server_offset_ms: 0.0,
                reported_server_ping_ms: 0.0,
            },
        );
    }

    /// A peer left: forget its clock. Sources stop on drop.
    pub fn remove_peer(&self, peer_id: &str) {
        if self.peers.write().unwrap().remove(peer_id).is_some() {
            info!("dropped clock of peer {}", peer_id);
        }
    }

    pub fn clear_peers(&self) {
        self.peers.write().unwrap().clear();
    }

    pub fn has_peer(&self, peer_id: &str) -> bool {
        self.peers.read().unwrap().contains_key(peer_id)
    }

    /// Store the server offset a peer reported for itself; this is the second
    /// leg of the transitive path through that peer.
    pub fn note_peer_server_state(&self, peer_id: &str, offset_ms: f64, ping_ms: f64) {
        let mut peers = self.peers.write().unwrap();
        match peers.get_mut(peer_id) {
            Some(clock) => {
                clock.reported_server_offset_ms = offset_ms;
                clock.reported_server_ping_ms = ping_ms;
            }
            None => debug!("server-state report from unknown peer {}", peer_id),
        }
    }

    /// Effective local→server offset (ms), honoring the selected source.
    ///
    /// A stale peer selection falls back to the server for this call; the
    /// fallback is a single step, never a retry loop.
    pub fn effective_offset_ms(&self) -> f64 {
        let (device, extra) = {
            let s = self.settings.read().unwrap();
            (s.time_sync_device.clone(), s.extra_time_offset)
        };

        let base = if device == SERVER_SOURCE_ID {
            self.server.offset_ms()
        } else {
            let peers = self.peers.read().unwrap();
            match peers.get(&device) {
                Some(clock) => clock.source.offset_ms() + clock.reported_server_offset_ms,
                None => {
                    debug!("selected sync device {} is gone, using server", device);
                    self.server.offset_ms()
                }
            }
        };

        base + extra
    }

    /// Effective offset rounded to whole milliseconds.
    pub fn time_offset_ms(&self) -> i64 {
        self.effective_offset_ms().round() as i64
    }

    pub fn local_to_remote(&self, local_ms: i64) -> i64 {
        local_ms + self.time_offset_ms()
    }

    pub fn remote_to_local(&self, remote_ms: i64) -> i64 {
        remote_ms - self.time_offset_ms()
    }

    /// Selectable sources for the settings UI, server first.
    pub fn devices(&self) -> Vec<DeviceEntry> {
        let mut list = vec![DeviceEntry {
            id: SERVER_SOURCE_ID.to_string(),
            offset_ms: self.server.offset_ms(),
            ping_ms: self.server.ping_ms(),
        }];

        let peers = self.peers.read().unwrap();
        let mut peer_ids: Vec<&String> = peers.keys().collect();
        peer_ids.sort();
        for id in peer_ids {
            let clock = &peers[id];
            list.push(DeviceEntry {
                id: id.clone(),
                offset_ms: clock.source.offset_ms() + clock.reported_server_offset_ms,
                ping_ms: clock.source.ping_ms(),
            });
        }
        list
    }

    /// Forward server estimate updates to the mesh (so peers can derive a
    /// transitive offset through us) and report the measured ping upstream.
    pub fn spawn_update_forwarder(self: &Arc<Self>, mesh: Arc<PeerMesh>) -> JoinHandle<()> {
        let mut updates = self.server.subscribe();
        let api = Arc::clone(&self.api);

        tokio::spawn(async move {
            while let Ok(update) = updates.recv().await {
                let (Some(offset_ms), Some(ping_ms)) = (update.offset_ms, update.ping_ms) else {
                    continue;
                };
                mesh.broadcast_server_state(offset_ms, ping_ms).await;
                if let Err(e) = api.report_ping(ping_ms.round() as i64).await {
                    debug!("ping report failed: {}", e);
                }
            }
        })
    }
}
