//! Typed server RPC surface
//!
//! The transport (HTTP, websocket, whatever the application uses) lives
//! outside the core; the coordinator only ever talks through this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::queue::{RepeatMode, ShuffleMode};

/// Errors surfaced by the server transport.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server rejected request: {0}")]
    Rejected(String),
}

/// Response of the server-time RPC. Field names are the server's own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerTimePayload {
    /// Server instant the request was received (ms).
    pub request_reception_time: i64,
    /// Server instant the response was sent (ms).
    pub response_transmission_time: i64,
}

/// Start-playback request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequest {
    pub playing_queue: Vec<String>,
    pub playing_item_position: usize,
    pub start_position_ticks: i64,
}

/// Buffering progress report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferingRequest {
    /// Local instant of the report, converted to server time (ms).
    pub when: i64,
    pub position_ticks: i64,
    pub is_playing: bool,
    pub playlist_item_id: String,
    pub buffering_done: bool,
}

/// Queueing position for new items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueRequestMode {
    Default,
    Next,
}

/// Peer signaling relayed through the server, outbound direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub new_session: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub session_leaving: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ice_candidate: Option<Value>,
}

impl SignalingRequest {
    pub fn new_session() -> Self {
        Self {
            new_session: true,
            ..Default::default()
        }
    }

    pub fn session_leaving() -> Self {
        Self {
            session_leaving: true,
            ..Default::default()
        }
    }

    pub fn offer(to: &str, offer: Value) -> Self {
        Self {
            to: Some(to.to_string()),
            offer: Some(offer),
            ..Default::default()
        }
    }

    pub fn answer(to: &str, answer: Value) -> Self {
        Self {
            to: Some(to.to_string()),
            answer: Some(answer),
            ..Default::default()
        }
    }

    pub fn ice_candidate(to: &str, candidate: Value) -> Self {
        Self {
            to: Some(to.to_string()),
            ice_candidate: Some(candidate),
            ..Default::default()
        }
    }
}

/// Typed calls the coordinator issues against the server. The transport is
/// assumed to serialize its own requests.
#[async_trait]
pub trait ServerApi: Send + Sync {
    async fn server_time(&self) -> Result<ServerTimePayload, ApiError>;

    /// Report the measured round-trip time so the group barrier can size its
    /// tolerance for this client.
    async fn report_ping(&self, ping_ms: i64) -> Result<(), ApiError>;

    async fn request_play(&self, request: PlayRequest) -> Result<(), ApiError>;
    async fn request_pause(&self) -> Result<(), ApiError>;
    async fn request_unpause(&self) -> Result<(), ApiError>;
    async fn request_seek(&self, position_ticks: i64) -> Result<(), ApiError>;
    async fn report_buffering(&self, request: BufferingRequest) -> Result<(), ApiError>;

    async fn set_playlist_item(&self, playlist_item_id: &str) -> Result<(), ApiError>;
    async fn remove_from_playlist(&self, playlist_item_ids: &[String]) -> Result<(), ApiError>;
    async fn move_playlist_item(
        &self,
        playlist_item_id: &str,
        new_index: usize,
    ) -> Result<(), ApiError>;
    async fn queue(&self, item_ids: &[String], mode: QueueRequestMode) -> Result<(), ApiError>;
    async fn next_track(&self, playlist_item_id: &str) -> Result<(), ApiError>;
    async fn previous_track(&self, playlist_item_id: &str) -> Result<(), ApiError>;
    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), ApiError>;
    async fn set_shuffle_mode(&self, mode: ShuffleMode) -> Result<(), ApiError>;

    /// Opt in or out of the group's wait-for-ready barrier.
    async fn set_ignore_wait(&self, ignore_wait: bool) -> Result<(), ApiError>;

    /// Relay a signaling artifact to another client.
    async fn send_webrtc_signal(&self, signal: SignalingRequest) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signaling_request_serializes_sparsely() {
        let req = SignalingRequest::new_session();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, serde_json::json!({"newSession": true}));

        let req = SignalingRequest::offer("peer-1", serde_json::json!({"sdp": "v=0"}));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["to"], "peer-1");
        assert!(json.get("newSession").is_none());
        assert!(json.get("iceCandidate").is_none());
    }

    #[test]
    fn server_time_payload_uses_server_field_names() {
        let json = r#"{"RequestReceptionTime": 1050, "ResponseTransmissionTime": 1060}"#;
        let payload: ServerTimePayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.request_reception_time, 1050);
        assert_eq!(payload.response_transmission_time, 1060);
    }
}
