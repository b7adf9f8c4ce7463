//! Presence channel message definitions
//! These are the wire types exchanged between world sessions and the relay

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::world::geometry::Vec3;
use crate::world::player::{AvatarDescriptor, Role};
use crate::world::rooms::Room;

/// Longest chat line accepted on the channel (characters)
pub const MAX_CHAT_LEN: usize = 200;
/// Longest emoji payload (characters; covers ZWJ sequences)
pub const MAX_EMOJI_LEN: usize = 16;

/// Full periodic state report for one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_id: Uuid,
    pub display_name: String,
    pub position: Vec3,
    /// Heading in radians, (-π, π]
    pub rotation: f32,
    pub room: Room,
    #[serde(default)]
    pub avatar: AvatarDescriptor,
    #[serde(default)]
    pub role: Role,
    /// Sender clock, Unix millis
    pub timestamp: u64,
}

impl PlayerSnapshot {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.position.is_finite() || !self.rotation.is_finite() {
            return Err(ProtocolError::NonFiniteTransform);
        }
        Ok(())
    }
}

/// Latest snapshot of every live player. Replaces the previous roster wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterSync {
    pub players: HashMap<Uuid, PlayerSnapshot>,
    /// Relay clock when the set was assembled
    pub timestamp: u64,
}

/// Broadcast event as it travels on the wire: `{player_id, kind, payload?, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    pub player_id: Uuid,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub timestamp: u64,
}

/// Ephemeral action, never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Jump,
    Emoji { emoji: String },
    Chat { text: String },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Jump => "jump",
            Action::Emoji { .. } => "emoji",
            Action::Chat { .. } => "chat",
        }
    }
}

/// Validated broadcast event addressed by player id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEvent {
    pub player_id: Uuid,
    pub action: Action,
    pub timestamp: u64,
}

impl ActionEvent {
    pub fn new(player_id: Uuid, action: Action, timestamp: u64) -> Result<Self, ProtocolError> {
        BroadcastEnvelope::from(&ActionEvent {
            player_id,
            action,
            timestamp,
        })
        .try_into()
    }
}

impl TryFrom<BroadcastEnvelope> for ActionEvent {
    type Error = ProtocolError;

    fn try_from(envelope: BroadcastEnvelope) -> Result<Self, Self::Error> {
        let action = match envelope.kind.as_str() {
            "jump" => Action::Jump,
            "emoji" => {
                let emoji = required_payload(envelope.payload, MAX_EMOJI_LEN)?;
                Action::Emoji { emoji }
            }
            "chat" => {
                let text = required_payload(envelope.payload, MAX_CHAT_LEN)?;
                Action::Chat { text }
            }
            other => return Err(ProtocolError::UnknownActionKind(other.to_string())),
        };

        Ok(ActionEvent {
            player_id: envelope.player_id,
            action,
            timestamp: envelope.timestamp,
        })
    }
}

impl From<&ActionEvent> for BroadcastEnvelope {
    fn from(event: &ActionEvent) -> Self {
        let payload = match &event.action {
            Action::Jump => None,
            Action::Emoji { emoji } => Some(emoji.clone()),
            Action::Chat { text } => Some(text.clone()),
        };
        BroadcastEnvelope {
            player_id: event.player_id,
            kind: event.action.kind().to_string(),
            payload,
            timestamp: event.timestamp,
        }
    }
}

fn required_payload(payload: Option<String>, max_chars: usize) -> Result<String, ProtocolError> {
    let text = payload.map(|p| p.trim().to_string()).unwrap_or_default();
    if text.is_empty() {
        return Err(ProtocolError::MissingPayload);
    }
    let len = text.chars().count();
    if len > max_chars {
        return Err(ProtocolError::PayloadTooLong { len, max: max_chars });
    }
    Ok(text)
}

/// Messages sent from a session to the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Local player state (already throttled by the sender)
    Publish { snapshot: PlayerSnapshot },

    /// Jump / emoji / chat
    Action { event: BroadcastEnvelope },

    /// Refresh last-seen without moving
    Heartbeat { player_id: Uuid },

    /// Courtesy goodbye; liveness does not depend on it
    Leave { player_id: Uuid },
}

/// Messages sent from the relay to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { server_time: u64 },

    /// Live roster
    RosterSync { sync: RosterSync },

    /// Ephemeral action from another player
    Action { event: BroadcastEnvelope },

    /// Error message
    Error { code: String, message: String },
}

/// Rejections at the channel boundary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unknown action kind: {0}")]
    UnknownActionKind(String),

    #[error("Action payload is missing")]
    MissingPayload,

    #[error("Action payload too long ({len} > {max} characters)")]
    PayloadTooLong { len: usize, max: usize },

    #[error("Snapshot carries a non-finite position or rotation")]
    NonFiniteTransform,
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::UnknownActionKind(_) => "unknown_action",
            ProtocolError::MissingPayload => "missing_payload",
            ProtocolError::PayloadTooLong { .. } => "payload_too_long",
            ProtocolError::NonFiniteTransform => "invalid_snapshot",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(kind: &str, payload: Option<&str>) -> BroadcastEnvelope {
        BroadcastEnvelope {
            player_id: Uuid::nil(),
            kind: kind.to_string(),
            payload: payload.map(str::to_string),
            timestamp: 7,
        }
    }

    #[test]
    fn envelopes_decode_into_typed_actions() {
        let jump = ActionEvent::try_from(envelope("jump", None)).unwrap();
        assert_eq!(jump.action, Action::Jump);

        let chat = ActionEvent::try_from(envelope("chat", Some("  hello  "))).unwrap();
        assert_eq!(
            chat.action,
            Action::Chat {
                text: "hello".into()
            }
        );
        assert_eq!(chat.timestamp, 7);
    }

    #[test]
    fn invalid_envelopes_are_rejected() {
        assert_eq!(
            ActionEvent::try_from(envelope("dance", None)),
            Err(ProtocolError::UnknownActionKind("dance".into()))
        );
        assert_eq!(
            ActionEvent::try_from(envelope("chat", Some("   "))),
            Err(ProtocolError::MissingPayload)
        );
        assert_eq!(
            ActionEvent::try_from(envelope("emoji", None)),
            Err(ProtocolError::MissingPayload)
        );
        let long = "x".repeat(MAX_CHAT_LEN + 1);
        assert!(matches!(
            ActionEvent::try_from(envelope("chat", Some(&long))),
            Err(ProtocolError::PayloadTooLong { .. })
        ));
    }

    #[test]
    fn client_messages_use_snake_case_tags() {
        let msg = ClientMsg::Heartbeat {
            player_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "heartbeat");

        let raw = r#"{"type":"action","event":{"player_id":"00000000-0000-0000-0000-000000000000","kind":"emoji","payload":"🎉","timestamp":1}}"#;
        let parsed: ClientMsg = serde_json::from_str(raw).unwrap();
        let ClientMsg::Action { event } = parsed else {
            panic!("expected action");
        };
        assert_eq!(event.payload.as_deref(), Some("🎉"));
    }

    #[test]
    fn snapshot_room_serializes_as_tagged_enum() {
        let snapshot = PlayerSnapshot {
            player_id: Uuid::nil(),
            display_name: "ana".into(),
            position: Vec3::new(1.0, 0.0, 2.0),
            rotation: 0.5,
            room: Room::Cinema {
                instance_id: "m1".into(),
            },
            avatar: AvatarDescriptor::default(),
            role: Role::VipPlus,
            timestamp: 10,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["room"]["kind"], "cinema");
        assert_eq!(json["room"]["instance_id"], "m1");
        assert_eq!(json["role"], "vip_plus");
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn non_finite_snapshot_fails_validation() {
        let snapshot = PlayerSnapshot {
            player_id: Uuid::nil(),
            display_name: "ana".into(),
            position: Vec3::new(f32::NAN, 0.0, 0.0),
            rotation: 0.0,
            room: Room::World,
            avatar: AvatarDescriptor::default(),
            role: Role::Member,
            timestamp: 0,
        };
        assert_eq!(snapshot.validate(), Err(ProtocolError::NonFiniteTransform));
    }
}
