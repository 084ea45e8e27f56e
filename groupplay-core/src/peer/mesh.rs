//! Link lifecycle and message routing
//!
//! The mesh owns every `PeerLink`, creates and tears them down in response to
//! relayed signaling, answers internal ping frames, and surfaces external
//! frames to the rest of the coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ServerApi, SignalingRequest};
use crate::messages::SignalingEnvelope;
use crate::now_local_ms;
use crate::settings::SharedSettings;
use crate::timesync::{PingSample, Pinger, TimeSyncError};

use super::link::{LinkEvent, PeerError, PeerLink, PeerRole};
use super::wire::{decode_frame, ChannelFrame, ChannelKind};

/// Address that multicasts to every live link.
pub const BROADCAST_TARGET: &str = "*";

/// How long a peer gets to answer a ping.
const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Events the mesh reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    PeerConnected {
        peer_id: String,
    },
    PeerDisconnected {
        peer_id: String,
    },
    /// A peer told us its own offset to the server.
    PeerServerState {
        peer_id: String,
        offset_ms: f64,
        ping_ms: f64,
    },
}

type PingWaiter = (i64, oneshot::Sender<Result<PingSample, TimeSyncError>>);

struct PeerEntry {
    link: Arc<PeerLink>,
    ping_waiter: Option<PingWaiter>,
}

/// Owner of all peer links.
pub struct PeerMesh {
    api: Arc<dyn ServerApi>,
    settings: SharedSettings,
    peers: tokio::sync::Mutex<HashMap<String, PeerEntry>>,
    mesh_events: mpsc::UnboundedSender<MeshEvent>,
    link_events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    router: Mutex<Option<JoinHandle<()>>>,
    enabled: AtomicBool,
}

impl PeerMesh {
    /// Build the mesh; the returned receiver carries [`MeshEvent`]s for the
    /// session controller.
    pub fn new(
        api: Arc<dyn ServerApi>,
        settings: SharedSettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MeshEvent>) {
        let (mesh_tx, mesh_rx) = mpsc::unbounded_channel();
        let mesh = Arc::new(Self {
            api,
            settings,
            peers: tokio::sync::Mutex::new(HashMap::new()),
            mesh_events: mesh_tx,
            link_events: Mutex::new(None),
            router: Mutex::new(None),
            enabled: AtomicBool::new(false),
        });
        (mesh, mesh_rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Announce ourselves and get ready for inbound signaling.
    pub async fn enable(self: &Arc<Self>) -> Result<(), PeerError> {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (link_tx, link_rx) = mpsc::unbounded_channel();
        *self.link_events.lock().unwrap() = Some(link_tx);
        *self.router.lock().unwrap() = Some(tokio::spawn(Self::route_events(
            Arc::clone(self),
            link_rx,
        )));

        info!("peer mesh enabled");
        self.api
            .send_webrtc_signal(SignalingRequest::new_session())
            .await
            .map_err(|e| PeerError::Signaling(e.to_string()))
    }

    /// Close every link; optionally tell the group we are leaving.
    pub async fn disable(&self, notify_server: bool) {
        let was_enabled = self.enabled.swap(false, Ordering::SeqCst);

        let entries: Vec<PeerEntry> = {
            let mut peers = self.peers.lock().await;
            peers.drain().map(|(_, entry)| entry).collect()
        };
        for mut entry in entries {
            if let Some((_, waiter)) = entry.ping_waiter.take() {
                let _ = waiter.send(Err(TimeSyncError::PeerDisconnected));
            }
            entry.link.close().await;
        }

        if let Some(router) = self.router.lock().unwrap().take() {
            router.abort();
        }
        *self.link_events.lock().unwrap() = None;

        if notify_server && was_enabled {
            if let Err(e) = self
                .api
                .send_webrtc_signal(SignalingRequest::session_leaving())
                .await
            {
                debug!("leave announcement failed: {}", e);
            }
        }
        if was_enabled {
            info!("peer mesh disabled");
        }
    }

    /// Dispatch one relayed signaling message.
    pub async fn handle_signaling(self: &Arc<Self>, envelope: SignalingEnvelope) {
        if !self.is_enabled() {
            debug!("signaling from {} while disabled, dropped", envelope.from);
            return;
        }

        let from = envelope.from.clone();
        if envelope.new_session {
            // A newcomer announced itself: we host a link towards it.
            match self.create_link(&from, PeerRole::Host).await {
                Ok(link) => {
                    if let Err(e) = link.open().await {
                        warn!("opening link to {} failed: {}", from, e);
                        self.remove_peer(&from).await;
                    }
                }
                Err(e) => warn!("creating link to {} failed: {}", from, e),
            }
        } else if envelope.session_leaving {
            self.remove_peer(&from).await;
        } else {
            let link = {
                let peers = self.peers.lock().await;
                peers.get(&from).map(|entry| Arc::clone(&entry.link))
            };
            let link = match link {
                Some(link) => link,
                // First contact from an offering peer: we answer.
                None => match self.create_link(&from, PeerRole::Guest).await {
                    Ok(link) => link,
                    Err(e) => {
                        warn!("creating link for {} failed: {}", from, e);
                        return;
                    }
                },
            };
            if let Err(e) = link.on_signaling(&envelope).await {
                warn!("signaling from {} rejected: {}", from, e);
            }
        }
    }

    /// Send a frame to one peer, or to all with [`BROADCAST_TARGET`].
    pub async fn send_frame(&self, to: &str, frame: ChannelFrame) {
        let links: Vec<Arc<PeerLink>> = {
            let peers = self.peers.lock().await;
            if to == BROADCAST_TARGET {
                peers.values().map(|entry| Arc::clone(&entry.link)).collect()
            } else {
                match peers.get(to) {
                    Some(entry) => vec![Arc::clone(&entry.link)],
                    None => {
                        warn!("no link for peer {}, frame dropped", to);
                        return;
                    }
                }
            }
        };

        let envelope = frame.into_envelope();
        for link in links {
            link.send(&envelope).await;
        }
    }

    /// Tell every peer our current server offset so they can route their
    /// clock through us.
    pub async fn broadcast_server_state(&self, offset_ms: f64, ping_ms: f64) {
        if self.peers.lock().await.is_empty() {
            return;
        }
        self.send_frame(
            BROADCAST_TARGET,
            ChannelFrame::TimeSyncServerUpdate {
                time_offset: offset_ms,
                ping: ping_ms,
            },
        )
        .await;
    }

    /// Round-trip one ping over a peer's data channel. At most one ping per
    /// peer is in flight; a newer ping supersedes a stale waiter, and a link
    /// closing rejects it with a peer-disconnected error.
    pub async fn ping_peer(&self, peer_id: &str) -> Result<PingSample, TimeSyncError> {
        let request_sent = now_local_ms();
        let (tx, rx) = oneshot::channel();

        {
            let mut peers = self.peers.lock().await;
            let entry = peers
                .get_mut(peer_id)
                .ok_or(TimeSyncError::PeerDisconnected)?;
            entry.ping_waiter = Some((request_sent, tx));
        }

        self.send_frame(peer_id, ChannelFrame::PingRequest { request_sent })
            .await;

        match tokio::time::timeout(PING_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TimeSyncError::PeerDisconnected),
            Err(_) => Err(TimeSyncError::Timeout),
        }
    }

    async fn create_link(
        self: &Arc<Self>,
        peer_id: &str,
        role: PeerRole,
    ) -> Result<Arc<PeerLink>, PeerError> {
        let link_tx = self
            .link_events
            .lock()
            .unwrap()
            .clone()
            .ok_or(PeerError::ChannelClosed)?;

        let ice_server = {
            let s = self.settings.read().unwrap();
            (!s.p2p_tracker.is_empty()).then(|| s.p2p_tracker.clone())
        };
        let link = Arc::new(
            PeerLink::new(peer_id, role, ice_server, Arc::clone(&self.api), link_tx).await?,
        );

        let mut peers = self.peers.lock().await;
        if let Some(previous) = peers.insert(
            peer_id.to_string(),
            PeerEntry {
                link: Arc::clone(&link),
                ping_waiter: None,
            },
        ) {
            debug!("replacing existing link to {}", peer_id);
            previous.link.close().await;
        }
        Ok(link)
    }

    async fn remove_peer(&self, peer_id: &str) {
        let entry = self.peers.lock().await.remove(peer_id);
        if let Some(mut entry) = entry {
            if let Some((_, waiter)) = entry.ping_waiter.take() {
                let _ = waiter.send(Err(TimeSyncError::PeerDisconnected));
            }
            entry.link.close().await;
            let _ = self.mesh_events.send(MeshEvent::PeerDisconnected {
                peer_id: peer_id.to_string(),
            });
        } else {
            debug!("remove for unknown peer {}", peer_id);
        }
    }

    async fn route_events(mesh: Arc<PeerMesh>, mut rx: mpsc::UnboundedReceiver<LinkEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                LinkEvent::Connected { peer_id } => {
                    let _ = mesh.mesh_events.send(MeshEvent::PeerConnected { peer_id });
                }
                LinkEvent::Disconnected { peer_id } => {
                    mesh.remove_peer(&peer_id).await;
                }
                LinkEvent::Frame {
                    peer_id,
                    envelope,
                    received_at,
                } => {
                    mesh.route_frame(&peer_id, envelope.channel, &envelope.data, received_at)
                        .await;
                }
            }
        }
    }

    async fn route_frame(
        &self,
        peer_id: &str,
        channel: ChannelKind,
        data: &serde_json::Value,
        received_at: i64,
    ) {
        let frame = match decode_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("frame from {} dropped: {}", peer_id, e);
                return;
            }
        };

        match (channel, frame) {
            (ChannelKind::Internal, ChannelFrame::PingRequest { request_sent }) => {
                self.send_frame(
                    peer_id,
                    ChannelFrame::PingResponse {
                        request_sent,
                        request_received: received_at,
                        response_sent: now_local_ms(),
                    },
                )
                .await;
            }
            (
                ChannelKind::Internal,
                ChannelFrame::PingResponse {
                    request_sent,
                    request_received,
                    response_sent,
                },
            ) => {
                let waiter = {
                    let mut peers = self.peers.lock().await;
                    peers.get_mut(peer_id).and_then(|entry| {
                        match &entry.ping_waiter {
                            Some((expected, _)) if *expected == request_sent => {
                                entry.ping_waiter.take()
                            }
                            _ => None,
                        }
                    })
                };
                match waiter {
                    Some((_, tx)) => {
                        let _ = tx.send(Ok(PingSample {
                            request_sent,
                            request_received,
                            response_sent,
                            response_received: received_at,
                        }));
                    }
                    // Cancelled or superseded in flight.
                    None => debug!("late ping response from {} dropped", peer_id),
                }
            }
            (ChannelKind::External, ChannelFrame::TimeSyncServerUpdate { time_offset, ping }) => {
                let _ = self.mesh_events.send(MeshEvent::PeerServerState {
                    peer_id: peer_id.to_string(),
                    offset_ms: time_offset,
                    ping_ms: ping,
                });
            }
            (channel, frame) => {
                warn!(
                    "frame {:?} from {} not valid on {:?} channel, dropped",
                    frame, peer_id, channel
                );
            }
        }
    }
}

/// Clock-sampling capability backed by a peer's data channel.
pub struct PeerPinger {
    mesh: Arc<PeerMesh>,
    peer_id: String,
}

impl PeerPinger {
    pub fn new(mesh: Arc<PeerMesh>, peer_id: impl Into<String>) -> Self {
        Self {
            mesh,
            peer_id: peer_id.into(),
        }
    }
}

#[async_trait]
impl Pinger for PeerPinger {
    async fn ping(&self) -> Result<PingSample, TimeSyncError> {
        self.mesh.ping_peer(&self.peer_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings;
    use crate::test_support::RecordingApi;

    fn mesh_with(
        api: Arc<RecordingApi>,
    ) -> (Arc<PeerMesh>, mpsc::UnboundedReceiver<MeshEvent>) {
        PeerMesh::new(api, settings::shared(Default::default()))
    }

    #[tokio::test]
    async fn signaling_while_disabled_is_dropped() {
        let api = RecordingApi::new();
        let (mesh, mut events) = mesh_with(api.clone());

        mesh.handle_signaling(SignalingEnvelope {
            from: "peer-1".to_string(),
            new_session: true,
            session_leaving: false,
            offer: None,
            answer: None,
            ice_candidate: None,
        })
        .await;

        assert!(events.try_recv().is_err());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn enable_announces_and_disable_notifies() {
        let api = RecordingApi::new();
        let (mesh, _events) = mesh_with(api.clone());

        mesh.enable().await.unwrap();
        assert!(mesh.is_enabled());
        // Re-enabling is a no-op.
        mesh.enable().await.unwrap();

        mesh.disable(true).await;
        assert!(!mesh.is_enabled());

        let signals = api.signals.lock().unwrap();
        assert_eq!(signals.len(), 2);
        assert!(signals[0].new_session);
        assert!(signals[1].session_leaving);
    }

    #[tokio::test]
    async fn send_to_unknown_peer_is_dropped() {
        let api = RecordingApi::new();
        let (mesh, _events) = mesh_with(api);
        mesh.send_frame("nobody", ChannelFrame::PingRequest { request_sent: 1 })
            .await;
    }

    #[tokio::test]
    async fn ping_to_unknown_peer_fails_as_disconnected() {
        let api = RecordingApi::new();
        let (mesh, _events) = mesh_with(api);
        let err = mesh.ping_peer("nobody").await.unwrap_err();
        assert_eq!(err, TimeSyncError::PeerDisconnected);
    }

    #[tokio::test]
    async fn removing_unknown_peer_emits_nothing() {
        let api = RecordingApi::new();
        let (mesh, mut events) = mesh_with(api);
        mesh.remove_peer("ghost").await;
        assert!(events.try_recv().is_err());
    }
}
