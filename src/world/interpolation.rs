//! Remote player smoothing
//!
//! Snapshots arrive every few hundred milliseconds, out of order or not at
//! all. Each remote player keeps the newest snapshot as its target and closes
//! a fixed fraction of the gap on every render frame. Gaps larger than normal
//! walking can produce between two snapshots are teleports and snap instead.

use serde::Serialize;
use std::f32::consts::PI;
use uuid::Uuid;

use crate::presence::protocol::{Action, PlayerSnapshot};

use super::geometry::{normalize_angle, shortest_angle_delta, Vec3};
use super::player::PlayerState;
use super::rooms::Room;

/// Fraction of the remaining gap closed per render frame
pub const LERP_FACTOR: f32 = 0.1;
/// Gap (units) beyond which the avatar snaps to the target
pub const TELEPORT_THRESHOLD: f32 = 3.0;
/// Remaining gap below which the avatar counts as standing still
pub const MOVING_EPSILON: f32 = 0.05;

pub const JUMP_DURATION_MS: u64 = 500;
pub const JUMP_HEIGHT: f32 = 0.8;

pub const JUMP_TTL_MS: u64 = 500;
pub const EMOJI_TTL_MS: u64 = 3_000;
pub const CHAT_TTL_MS: u64 = 5_000;

/// Speech bubble above an avatar
#[derive(Debug, Clone, PartialEq)]
pub struct ChatBubble {
    pub player_id: Uuid,
    pub text: String,
    pub created_at: u64,
}

impl ChatBubble {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at) > CHAT_TTL_MS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Jump,
    Emoji,
}

/// Short-lived jump or emoji effect
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOverlay {
    pub player_id: Uuid,
    pub kind: OverlayKind,
    pub payload: Option<String>,
    pub created_at: u64,
    /// Last time the same effect was re-triggered; the TTL counts from here
    pub refreshed_at: u64,
}

impl ActionOverlay {
    pub fn ttl_ms(&self) -> u64 {
        match self.kind {
            OverlayKind::Jump => JUMP_TTL_MS,
            OverlayKind::Emoji => EMOJI_TTL_MS,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.refreshed_at) > self.ttl_ms()
    }

    /// Vertical offset of a jump: one sine arc over the jump duration.
    /// A jump flag that keeps being re-sent holds the avatar at the apex.
    pub fn jump_offset(&self, now_ms: u64) -> f32 {
        if self.kind != OverlayKind::Jump {
            return 0.0;
        }
        let elapsed = now_ms.saturating_sub(self.created_at) as f32;
        let progress = (elapsed / JUMP_DURATION_MS as f32).min(1.0);
        let held = self.refreshed_at > self.created_at;
        if held && progress >= 0.5 {
            JUMP_HEIGHT
        } else {
            JUMP_HEIGHT * (progress * PI).sin().max(0.0)
        }
    }
}

/// Every overlay one avatar can carry at a time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlays {
    pub chat: Option<ChatBubble>,
    pub jump: Option<ActionOverlay>,
    pub emoji: Option<ActionOverlay>,
}

impl Overlays {
    pub fn attach(&mut self, player_id: Uuid, action: &Action, now_ms: u64) {
        match action {
            Action::Chat { text } => {
                self.chat = Some(ChatBubble {
                    player_id,
                    text: text.clone(),
                    created_at: now_ms,
                });
            }
            Action::Jump => match self.jump.as_mut() {
                Some(jump) if !jump.is_expired(now_ms) => jump.refreshed_at = now_ms,
                _ => {
                    self.jump = Some(ActionOverlay {
                        player_id,
                        kind: OverlayKind::Jump,
                        payload: None,
                        created_at: now_ms,
                        refreshed_at: now_ms,
                    });
                }
            },
            Action::Emoji { emoji } => {
                self.emoji = Some(ActionOverlay {
                    player_id,
                    kind: OverlayKind::Emoji,
                    payload: Some(emoji.clone()),
                    created_at: now_ms,
                    refreshed_at: now_ms,
                });
            }
        }
    }

    /// Drop expired overlays
    pub fn sweep(&mut self, now_ms: u64) {
        if self.chat.as_ref().is_some_and(|c| c.is_expired(now_ms)) {
            self.chat = None;
        }
        if self.jump.as_ref().is_some_and(|j| j.is_expired(now_ms)) {
            self.jump = None;
        }
        if self.emoji.as_ref().is_some_and(|e| e.is_expired(now_ms)) {
            self.emoji = None;
        }
    }

    pub fn jump_offset(&self, now_ms: u64) -> f32 {
        self.jump
            .as_ref()
            .map(|jump| jump.jump_offset(now_ms))
            .unwrap_or(0.0)
    }
}

/// What the renderer needs for one remote avatar this frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteView {
    pub player_id: Uuid,
    pub display_name: String,
    pub room: Room,
    /// Interpolated position with the jump offset applied
    pub position: Vec3,
    pub rotation: f32,
    pub moving: bool,
    pub chat: Option<String>,
    pub emoji: Option<String>,
}

/// Interpolated view of one remote player
#[derive(Debug, Clone)]
pub struct RemotePlayer {
    /// Current (rendered) transform lives in `state.position` / `state.rotation`
    state: PlayerState,
    target_position: Vec3,
    target_rotation: f32,
    last_snapshot_at: u64,
    overlays: Overlays,
}

impl RemotePlayer {
    /// The first snapshot places the avatar directly
    pub fn new(snapshot: &PlayerSnapshot) -> Self {
        let state = PlayerState::from_snapshot(snapshot);
        Self {
            target_position: state.position,
            target_rotation: state.rotation,
            last_snapshot_at: snapshot.timestamp,
            state,
            overlays: Overlays::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.state.id
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn target(&self) -> Vec3 {
        self.target_position
    }

    pub fn overlays(&self) -> &Overlays {
        &self.overlays
    }

    /// Record a new target. Snapshots older than the newest one seen are
    /// ignored. Returns whether the snapshot was applied.
    pub fn apply_snapshot(&mut self, snapshot: &PlayerSnapshot) -> bool {
        if snapshot.timestamp < self.last_snapshot_at {
            return false;
        }
        self.last_snapshot_at = snapshot.timestamp;
        self.target_position = snapshot.position;
        self.target_rotation = normalize_angle(snapshot.rotation);

        self.state.display_name.clone_from(&snapshot.display_name);
        self.state.room = snapshot.room.clone();
        self.state.avatar = snapshot.avatar.clone();
        self.state.role = snapshot.role;
        self.state.last_seen = snapshot.timestamp;
        true
    }

    pub fn apply_action(&mut self, action: &Action, now_ms: u64) {
        self.overlays.attach(self.state.id, action, now_ms);
    }

    /// True while the avatar still has ground to cover
    pub fn is_moving(&self) -> bool {
        self.state.position.distance(&self.target_position) > MOVING_EPSILON
    }

    /// Advance one render frame
    pub fn step(&mut self, now_ms: u64) -> RemoteView {
        let gap = self.state.position.distance(&self.target_position);
        if gap > TELEPORT_THRESHOLD {
            self.state.position = self.target_position;
            self.state.rotation = self.target_rotation;
        } else {
            self.state.position = self.state.position.lerp(&self.target_position, LERP_FACTOR);
            let delta = shortest_angle_delta(self.state.rotation, self.target_rotation);
            self.state.set_rotation(self.state.rotation + delta * LERP_FACTOR);
        }

        self.overlays.sweep(now_ms);

        let mut position = self.state.position;
        position.y += self.overlays.jump_offset(now_ms);

        RemoteView {
            player_id: self.state.id,
            display_name: self.state.display_name.clone(),
            room: self.state.room.clone(),
            position,
            rotation: self.state.rotation,
            moving: self.is_moving(),
            chat: self.overlays.chat.as_ref().map(|c| c.text.clone()),
            emoji: self
                .overlays
                .emoji
                .as_ref()
                .and_then(|e| e.payload.clone()),
        }
    }
}
