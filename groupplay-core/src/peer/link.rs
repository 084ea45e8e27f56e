//! One connection to one remote peer
//!
//! The host side (the peer that initiates) opens the data channel before
//! producing its SDP offer; the guest side answers and waits for the channel
//! announcement. Offers, answers and ICE candidates are relayed opaquely
//! through the server signaling interface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::api::{ServerApi, SignalingRequest};
use crate::messages::SignalingEnvelope;
use crate::now_local_ms;

use super::wire::{decode_envelope, ChannelEnvelope};

/// Public STUN used when the application does not supply its own servers.
const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Label of the single multiplexed data channel.
const CHANNEL_LABEL: &str = "sync";

/// Peer link failures.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("webrtc error: {0}")]
    WebRtc(String),

    #[error("sdp error: {0}")]
    Sdp(String),

    #[error("ice candidate error: {0}")]
    IceCandidate(String),

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("data channel not open")]
    ChannelClosed,
}

impl From<webrtc::Error> for PeerError {
    fn from(e: webrtc::Error) -> Self {
        PeerError::WebRtc(e.to_string())
    }
}

/// Which side of the link this client is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// We initiate: open the channel, send the offer.
    Host,
    /// The remote initiated: we answer and wait for its channel.
    Guest,
}

/// Link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Init,
    Offering,
    Answering,
    Connected,
    Closed,
}

/// Events a link reports to the mesh.
#[derive(Debug)]
pub enum LinkEvent {
    Connected {
        peer_id: String,
    },
    Disconnected {
        peer_id: String,
    },
    Frame {
        peer_id: String,
        envelope: ChannelEnvelope,
        received_at: i64,
    },
}

/// A bidirectional JSON-framed channel to one remote peer.
pub struct PeerLink {
    peer_id: String,
    role: PeerRole,
    pc: Arc<RTCPeerConnection>,
    channel: Arc<tokio::sync::RwLock<Option<Arc<RTCDataChannel>>>>,
    state: Arc<Mutex<LinkState>>,
    /// Candidates that arrived before the remote description; drained FIFO
    /// once it is applied.
    pending_candidates: tokio::sync::Mutex<Vec<RTCIceCandidateInit>>,
    remote_description_set: AtomicBool,
    api: Arc<dyn ServerApi>,
}

impl PeerLink {
    /// Build the connection and, for the host role, the data channel. The
    /// host must call [`PeerLink::open`] afterwards to start negotiation.
    /// `ice_server` overrides the default STUN server when configured.
    pub async fn new(
        peer_id: &str,
        role: PeerRole,
        ice_server: Option<String>,
        api: Arc<dyn ServerApi>,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Self, PeerError> {
        let webrtc_api = APIBuilder::new().build();
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![ice_server.unwrap_or_else(|| DEFAULT_STUN_SERVER.to_string())],
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(webrtc_api.new_peer_connection(config).await?);

        let state = Arc::new(Mutex::new(LinkState::Init));
        let channel = Arc::new(tokio::sync::RwLock::new(None));
        let disconnect_emitted = Arc::new(AtomicBool::new(false));

        // Trickle our candidates out as they are gathered.
        {
            let api = Arc::clone(&api);
            let peer_id = peer_id.to_string();
            pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let api = Arc::clone(&api);
                let peer_id = peer_id.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else { return };
                    let init = match candidate.to_json() {
                        Ok(init) => init,
                        Err(e) => {
                            warn!("failed to serialize ice candidate: {}", e);
                            return;
                        }
                    };
                    let payload = match serde_json::to_value(&init) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("failed to encode ice candidate: {}", e);
                            return;
                        }
                    };
                    if let Err(e) = api
                        .send_webrtc_signal(SignalingRequest::ice_candidate(&peer_id, payload))
                        .await
                    {
                        warn!("ice candidate relay to {} failed: {}", peer_id, e);
                    }
                })
            }));
        }

        // A failed connection counts as a disconnect even if the channel
        // never opened.
        {
            let peer_id = peer_id.to_string();
            let state = Arc::clone(&state);
            let events = events.clone();
            let disconnect_emitted = Arc::clone(&disconnect_emitted);
            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let peer_id = peer_id.clone();
                let state = Arc::clone(&state);
                let events = events.clone();
                let disconnect_emitted = Arc::clone(&disconnect_emitted);
                Box::pin(async move {
                    debug!("peer connection {} state: {}", peer_id, s);
                    if matches!(
                        s,
                        RTCPeerConnectionState::Failed
                            | RTCPeerConnectionState::Disconnected
                            | RTCPeerConnectionState::Closed
                    ) {
                        *state.lock().unwrap() = LinkState::Closed;
                        if !disconnect_emitted.swap(true, Ordering::SeqCst) {
                            let _ = events.send(LinkEvent::Disconnected { peer_id });
                        }
                    }
                })
            }));
        }

        match role {
            PeerRole::Host => {
                // The channel must exist before the offer so negotiation
                // carries it.
                let init = RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                };
                let dc = pc.create_data_channel(CHANNEL_LABEL, Some(init)).await?;
                wire_channel(
                    &dc,
                    peer_id,
                    &channel,
                    &state,
                    &events,
                    &disconnect_emitted,
                )
                .await;
            }
            PeerRole::Guest => {
                let peer_id = peer_id.to_string();
                let channel = Arc::clone(&channel);
                let state = Arc::clone(&state);
                let events = events.clone();
                let disconnect_emitted = Arc::clone(&disconnect_emitted);
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let peer_id = peer_id.clone();
                    let channel = Arc::clone(&channel);
                    let state = Arc::clone(&state);
                    let events = events.clone();
                    let disconnect_emitted = Arc::clone(&disconnect_emitted);
                    Box::pin(async move {
                        debug!("peer {} announced channel {}", peer_id, dc.label());
                        wire_channel(&dc, &peer_id, &channel, &state, &events, &disconnect_emitted)
                            .await;
                    })
                }));
            }
        }

        Ok(Self {
            peer_id: peer_id.to_string(),
            role,
            pc,
            channel,
            state,
            pending_candidates: tokio::sync::Mutex::new(Vec::new()),
            remote_description_set: AtomicBool::new(false),
            api,
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock().unwrap()
    }

    /// Host side: produce the offer and relay it.
    pub async fn open(&self) -> Result<(), PeerError> {
        *self.state.lock().unwrap() = LinkState::Offering;

        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| PeerError::Sdp("no local description after offer".to_string()))?;

        info!("sending offer to {}", self.peer_id);
        self.api
            .send_webrtc_signal(SignalingRequest::offer(
                &self.peer_id,
                serde_json::json!({ "type": "offer", "sdp": local.sdp }),
            ))
            .await
            .map_err(|e| PeerError::Signaling(e.to_string()))?;
        Ok(())
    }

    /// Apply a relayed signaling artifact from this link's remote peer.
    pub async fn on_signaling(&self, envelope: &SignalingEnvelope) -> Result<(), PeerError> {
        if let Some(offer) = &envelope.offer {
            let sdp = offer
                .get("sdp")
                .and_then(|v| v.as_str())
                .ok_or_else(|| PeerError::Sdp("offer without sdp".to_string()))?;

            *self.state.lock().unwrap() = LinkState::Answering;
            let desc = RTCSessionDescription::offer(sdp.to_string())
                .map_err(|e| PeerError::Sdp(e.to_string()))?;
            self.pc.set_remote_description(desc).await?;
            self.remote_description_set.store(true, Ordering::SeqCst);
            self.drain_pending_candidates().await;

            let answer = self.pc.create_answer(None).await?;
            self.pc.set_local_description(answer).await?;
            let local = self
                .pc
                .local_description()
                .await
                .ok_or_else(|| PeerError::Sdp("no local description after answer".to_string()))?;

            info!("sending answer to {}", self.peer_id);
            self.api
                .send_webrtc_signal(SignalingRequest::answer(
                    &self.peer_id,
                    serde_json::json!({ "type": "answer", "sdp": local.sdp }),
                ))
                .await
                .map_err(|e| PeerError::Signaling(e.to_string()))?;
        } else if let Some(answer) = &envelope.answer {
            let sdp = answer
                .get("sdp")
                .and_then(|v| v.as_str())
                .ok_or_else(|| PeerError::Sdp("answer without sdp".to_string()))?;

            let desc = RTCSessionDescription::answer(sdp.to_string())
                .map_err(|e| PeerError::Sdp(e.to_string()))?;
            self.pc.set_remote_description(desc).await?;
            self.remote_description_set.store(true, Ordering::SeqCst);
            self.drain_pending_candidates().await;
        } else if let Some(candidate) = &envelope.ice_candidate {
            let init: RTCIceCandidateInit = serde_json::from_value(candidate.clone())
                .map_err(|e| PeerError::IceCandidate(e.to_string()))?;

            if self.remote_description_set.load(Ordering::SeqCst) {
                self.pc
                    .add_ice_candidate(init)
                    .await
                    .map_err(|e| PeerError::IceCandidate(e.to_string()))?;
            } else {
                self.pending_candidates.lock().await.push(init);
            }
        } else {
            debug!("empty signaling payload from {}", envelope.from);
        }
        Ok(())
    }

    /// Send one framed message; failures are logged, not raised, per the
    /// drop-and-continue wire policy.
    pub async fn send(&self, envelope: &ChannelEnvelope) {
        let guard = self.channel.read().await;
        let Some(dc) = guard.as_ref() else {
            debug!("dropping frame to {}: channel not open", self.peer_id);
            return;
        };

        let text = match serde_json::to_string(envelope) {
            Ok(text) => text,
            Err(e) => {
                error!("dropping unserializable frame to {}: {}", self.peer_id, e);
                return;
            }
        };

        if let Err(e) = dc.send_text(text).await {
            warn!("send to {} failed: {}", self.peer_id, e);
        }
    }

    /// Tear the connection down; the close event fires the disconnect.
    pub async fn close(&self) {
        *self.state.lock().unwrap() = LinkState::Closed;
        if let Err(e) = self.pc.close().await {
            debug!("closing link to {}: {}", self.peer_id, e);
        }
    }

    async fn drain_pending_candidates(&self) {
        let pending: Vec<RTCIceCandidateInit> =
            self.pending_candidates.lock().await.drain(..).collect();
        for init in pending {
            if let Err(e) = self.pc.add_ice_candidate(init).await {
                warn!("queued ice candidate for {} rejected: {}", self.peer_id, e);
            }
        }
    }
}

/// Attach channel callbacks: open → connected, frames → parsed messages,
/// close → disconnected.
async fn wire_channel(
    dc: &Arc<RTCDataChannel>,
    peer_id: &str,
    channel: &Arc<tokio::sync::RwLock<Option<Arc<RTCDataChannel>>>>,
    state: &Arc<Mutex<LinkState>>,
    events: &mpsc::UnboundedSender<LinkEvent>,
    disconnect_emitted: &Arc<AtomicBool>,
) {
    *channel.write().await = Some(Arc::clone(dc));

    {
        let peer_id = peer_id.to_string();
        let state = Arc::clone(state);
        let events = events.clone();
        dc.on_open(Box::new(move || {
            let peer_id = peer_id.clone();
            let state = Arc::clone(&state);
            let events = events.clone();
            Box::pin(async move {
                info!("channel to {} open", peer_id);
                *state.lock().unwrap() = LinkState::Connected;
                let _ = events.send(LinkEvent::Connected { peer_id });
            })
        }));
    }

    {
        let peer_id = peer_id.to_string();
        let events = events.clone();
        dc.on_message(Box::new(move |msg| {
            let peer_id = peer_id.clone();
            let events = events.clone();
            Box::pin(async move {
                let received_at = now_local_ms();
                let text = match std::str::from_utf8(&msg.data) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("non-utf8 frame from {} dropped", peer_id);
                        return;
                    }
                };
                match decode_envelope(text) {
                    Ok(envelope) => {
                        let _ = events.send(LinkEvent::Frame {
                            peer_id,
                            envelope,
                            received_at,
                        });
                    }
                    Err(e) => warn!("malformed frame from {} dropped: {}", peer_id, e),
                }
            })
        }));
    }

    {
        let peer_id = peer_id.to_string();
        let state = Arc::clone(state);
        let events = events.clone();
        let disconnect_emitted = Arc::clone(disconnect_emitted);
        dc.on_close(Box::new(move || {
            let peer_id = peer_id.clone();
            let state = Arc::clone(&state);
            let events = events.clone();
            let disconnect_emitted = Arc::clone(&disconnect_emitted);
            Box::pin(async move {
                info!("channel to {} closed", peer_id);
                *state.lock().unwrap() = LinkState::Closed;
                if !disconnect_emitted.swap(true, Ordering::SeqCst) {
                    let _ = events.send(LinkEvent::Disconnected { peer_id });
                }
            })
        }));
    }
}
