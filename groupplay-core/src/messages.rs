//! Server wire messages
//!
//! Every inbound message is a tagged variant; anything that fails to parse is
//! rejected before it reaches a component.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::queue::{QueueReason, RepeatMode, ShuffleMode};

/// Playback command verbs the server may schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Unpause,
    Pause,
    Seek,
    Stop,
}

/// A server-authored directive: execute `command` at server instant `when`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackCommand {
    pub command: CommandKind,
    /// Server wall-clock instant at which the command takes effect (ms).
    pub when: i64,
    /// Server wall-clock instant at which the command was emitted (ms).
    pub emitted_at: i64,
    #[serde(default)]
    pub position_ticks: Option<i64>,
    pub playlist_item_id: String,
}

impl PlaybackCommand {
    /// Position the command targets; commands without one aim at the start.
    pub fn target_ticks(&self) -> i64 {
        self.position_ticks.unwrap_or(0)
    }

    /// Whether `other` reasserts exactly this command.
    pub fn is_duplicate_of(&self, other: &PlaybackCommand) -> bool {
        self.command == other.command
            && self.when == other.when
            && self.position_ticks == other.position_ticks
            && self.playlist_item_id == other.playlist_item_id
    }
}

/// Group metadata. Opaque to the core except for the fields read here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    /// Server instant the group state last changed (ms).
    #[serde(default)]
    pub last_updated_at: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Authoritative queue snapshot broadcast by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayQueueUpdate {
    /// Server instant of this snapshot (ms); older snapshots are rejected.
    pub last_update: i64,
    pub playlist: Vec<PlaylistEntry>,
    pub playing_item_index: i64,
    pub start_position_ticks: i64,
    pub shuffle_mode: ShuffleMode,
    pub repeat_mode: RepeatMode,
    pub reason: QueueReason,
}

/// One slot of the server playlist: a media item id bound to its unique
/// playlist position id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistEntry {
    pub item_id: String,
    pub playlist_item_id: String,
}

/// Group state transitions reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStateUpdate {
    pub state: String,
    pub reason: Option<String>,
}

/// Peer signaling relayed through the server, inbound direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingEnvelope {
    pub from: String,
    #[serde(default)]
    pub new_session: bool,
    #[serde(default)]
    pub session_leaving: bool,
    #[serde(default)]
    pub offer: Option<Value>,
    #[serde(default)]
    pub answer: Option<Value>,
    #[serde(default)]
    pub ice_candidate: Option<Value>,
}

/// Group-scoped updates pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GroupUpdate {
    PlayQueue(PlayQueueUpdate),
    UserJoined(Value),
    UserLeft(Value),
    GroupJoined(GroupInfo),
    NotInGroup,
    GroupLeft,
    #[serde(rename = "GroupUpdate")]
    GroupInfoChanged(GroupInfo),
    StateUpdate(GroupStateUpdate),
    GroupDoesNotExist,
    CreateGroupDenied,
    JoinGroupDenied,
    LibraryAccessDenied,
    #[serde(rename = "WebRTC")]
    WebRtc(SignalingEnvelope),
    SyncPlayIsDisabled,
}

/// Everything the server pushes at the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum ServerMessage {
    GroupUpdate(GroupUpdate),
    PlaybackCommand(PlaybackCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_command_parses_wire_names() {
        let json = r#"{
            "command": "Unpause",
            "when": 2000,
            "emittedAt": 1990,
            "positionTicks": 10000000,
            "playlistItemId": "A"
        }"#;
        let cmd: PlaybackCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.command, CommandKind::Unpause);
        assert_eq!(cmd.when, 2000);
        assert_eq!(cmd.position_ticks, Some(10_000_000));
    }

    #[test]
    fn duplicate_ignores_emitted_at() {
        let a = PlaybackCommand {
            command: CommandKind::Seek,
            when: 1000,
            emitted_at: 900,
            position_ticks: Some(50_000_000),
            playlist_item_id: "B".to_string(),
        };
        let mut b = a.clone();
        b.emitted_at = 950;
        assert!(a.is_duplicate_of(&b));

        b.position_ticks = Some(50_000_001);
        assert!(!a.is_duplicate_of(&b));
    }

    #[test]
    fn unknown_group_update_variant_is_rejected() {
        let json = r#"{"type": "SomethingNew", "data": {}}"#;
        assert!(serde_json::from_str::<GroupUpdate>(json).is_err());
    }

    #[test]
    fn webrtc_envelope_defaults_optional_fields() {
        let json = r#"{"type": "WebRTC", "data": {"from": "peer-1", "newSession": true}}"#;
        let update: GroupUpdate = serde_json::from_str(json).unwrap();
        match update {
            GroupUpdate::WebRtc(env) => {
                assert_eq!(env.from, "peer-1");
                assert!(env.new_session);
                assert!(!env.session_leaving);
                assert!(env.offer.is_none());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn group_info_keeps_unknown_fields_opaque() {
        let json = r#"{"groupId": "g1", "lastUpdatedAt": 1234, "Visibility": "Private"}"#;
        let info: GroupInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.group_id.as_deref(), Some("g1"));
        assert_eq!(info.last_updated_at, Some(1234));
        assert!(info.extra.contains_key("Visibility"));
    }
}
