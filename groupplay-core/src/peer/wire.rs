//! Data-channel wire format
//!
//! Every frame is a JSON envelope `{type: internal|external, data: {type,
//! data}}`. Internal frames belong to the mesh (clock sampling); external
//! frames carry application payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Logical channel multiplexed over the single data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Internal,
    External,
}

/// Outer envelope as carried on the wire. The inner payload stays raw until
/// the mesh routes it, so an unknown inner type can be reported as such.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEnvelope {
    #[serde(rename = "type")]
    pub channel: ChannelKind,
    pub data: Value,
}

/// Recognized inner frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ChannelFrame {
    #[serde(rename_all = "camelCase")]
    PingRequest { request_sent: i64 },
    #[serde(rename_all = "camelCase")]
    PingResponse {
        request_sent: i64,
        request_received: i64,
        response_sent: i64,
    },
    #[serde(rename_all = "camelCase")]
    TimeSyncServerUpdate { time_offset: f64, ping: f64 },
}

impl ChannelFrame {
    /// Which logical channel this frame travels on.
    pub fn channel(&self) -> ChannelKind {
        match self {
            ChannelFrame::PingRequest { .. } | ChannelFrame::PingResponse { .. } => {
                ChannelKind::Internal
            }
            ChannelFrame::TimeSyncServerUpdate { .. } => ChannelKind::External,
        }
    }

    /// Wrap for sending.
    pub fn into_envelope(self) -> ChannelEnvelope {
        let channel = self.channel();
        ChannelEnvelope {
            channel,
            data: serde_json::to_value(&self).unwrap_or(Value::Null),
        }
    }
}

/// Frame decoding failures; both kinds are logged and dropped by the mesh.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown message type {0:?}")]
    UnknownType(String),
}

/// Parse the outer envelope from channel text.
pub fn decode_envelope(text: &str) -> Result<ChannelEnvelope, WireError> {
    Ok(serde_json::from_str(text)?)
}

/// Parse an inner frame, distinguishing unknown types from malformed data.
pub fn decode_frame(data: &Value) -> Result<ChannelFrame, WireError> {
    let frame_type = data
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| WireError::UnknownType("<missing>".to_string()))?;

    match frame_type {
        "ping-request" | "ping-response" | "time-sync-server-update" => {
            Ok(serde_json::from_value(data.clone())?)
        }
        other => Err(WireError::UnknownType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip_through_the_envelope() {
        let frame = ChannelFrame::PingResponse {
            request_sent: 1000,
            request_received: 1050,
            response_sent: 1060,
        };
        let envelope = frame.clone().into_envelope();
        assert_eq!(envelope.channel, ChannelKind::Internal);

        let text = serde_json::to_string(&envelope).unwrap();
        assert!(text.contains("\"internal\""));
        assert!(text.contains("\"ping-response\""));
        assert!(text.contains("\"requestSent\":1000"));

        let back = decode_envelope(&text).unwrap();
        assert_eq!(decode_frame(&back.data).unwrap(), frame);
    }

    #[test]
    fn server_update_travels_externally() {
        let frame = ChannelFrame::TimeSyncServerUpdate {
            time_offset: -5.0,
            ping: 100.0,
        };
        assert_eq!(frame.channel(), ChannelKind::External);

        let envelope = frame.into_envelope();
        assert_eq!(envelope.data["type"], "time-sync-server-update");
        assert_eq!(envelope.data["data"]["timeOffset"], -5.0);
    }

    #[test]
    fn unknown_inner_type_is_distinguished_from_garbage() {
        let unknown = serde_json::json!({"type": "chat-message", "data": {}});
        assert!(matches!(
            decode_frame(&unknown),
            Err(WireError::UnknownType(t)) if t == "chat-message"
        ));

        let garbage = serde_json::json!({"type": "ping-request", "data": {"requestSent": "not-a-number"}});
        assert!(matches!(decode_frame(&garbage), Err(WireError::Malformed(_))));

        assert!(decode_envelope("{not json").is_err());
    }

    #[test]
    fn missing_type_field_is_unknown() {
        let data = serde_json::json!({"data": {}});
        assert!(matches!(
            decode_frame(&data),
            Err(WireError::UnknownType(t)) if t == "<missing>"
        ));
    }
}
