//! Player records and the per-session player store

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::presence::protocol::{ActionEvent, PlayerSnapshot, RosterSync};
use crate::store::PlayerRow;

use super::geometry::{normalize_angle, Vec3};
use super::interpolation::{RemotePlayer, RemoteView};
use super::rooms::{Room, RoomError};

/// Membership tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Member,
    Vip,
    VipPlus,
    Admin,
}

/// Avatar customization, passed through untouched
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AvatarDescriptor(pub serde_json::Value);

/// A held seat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatRef {
    pub venue_instance_id: String,
    pub seat_index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub id: Uuid,
    pub display_name: String,
    pub position: Vec3,
    /// Always normalized to (-π, π]
    pub rotation: f32,
    pub room: Room,
    pub seat: Option<SeatRef>,
    pub is_online: bool,
    /// Unix millis
    pub last_seen: u64,
    pub avatar: AvatarDescriptor,
    pub role: Role,
}

impl PlayerState {
    pub fn new(id: Uuid, display_name: String, position: Vec3, now_ms: u64) -> Self {
        Self {
            id,
            display_name,
            position,
            rotation: 0.0,
            room: Room::World,
            seat: None,
            is_online: true,
            last_seen: now_ms,
            avatar: AvatarDescriptor::default(),
            role: Role::Member,
        }
    }

    /// Rebuild from a persisted row. Position sanity is the room machine's job.
    pub fn from_row(row: &PlayerRow, display_name: String) -> Result<Self, RoomError> {
        let room = Room::from_row_tag(row.current_room.as_deref())?;
        Ok(Self {
            id: row.id,
            display_name,
            position: Vec3::new(row.position_x, row.position_y, row.position_z),
            rotation: normalize_angle(row.rotation),
            room,
            seat: None,
            is_online: true,
            last_seen: row.last_seen.timestamp_millis().max(0) as u64,
            avatar: AvatarDescriptor::default(),
            role: Role::Member,
        })
    }

    pub fn to_row(&self) -> PlayerRow {
        PlayerRow {
            id: self.id,
            position_x: self.position.x,
            position_y: self.position.y,
            position_z: self.position.z,
            rotation: self.rotation,
            current_room: self.room.to_row_tag(),
            is_online: self.is_online,
            last_seen: Utc
                .timestamp_millis_opt(self.last_seen as i64)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }

    pub fn to_snapshot(&self, now_ms: u64) -> PlayerSnapshot {
        PlayerSnapshot {
            player_id: self.id,
            display_name: self.display_name.clone(),
            position: self.position,
            rotation: self.rotation,
            room: self.room.clone(),
            avatar: self.avatar.clone(),
            role: self.role,
            timestamp: now_ms,
        }
    }

    /// Remote copy built from a snapshot
    pub fn from_snapshot(snapshot: &PlayerSnapshot) -> Self {
        Self {
            id: snapshot.player_id,
            display_name: snapshot.display_name.clone(),
            position: snapshot.position,
            rotation: normalize_angle(snapshot.rotation),
            room: snapshot.room.clone(),
            seat: None,
            is_online: true,
            last_seen: snapshot.timestamp,
            avatar: snapshot.avatar.clone(),
            role: snapshot.role,
        }
    }

    pub fn set_rotation(&mut self, rotation: f32) {
        self.rotation = normalize_angle(rotation);
    }

    /// Instant relocation (venue spawn, seat, return position)
    pub fn teleport(&mut self, position: Vec3, rotation: Option<f32>) {
        self.position = position;
        if let Some(rotation) = rotation {
            self.set_rotation(rotation);
        }
    }

    pub fn is_seated(&self) -> bool {
        self.seat.is_some()
    }
}

/// The local player plus every known remote player of one session
#[derive(Debug)]
pub struct PlayerStore {
    local: PlayerState,
    remotes: HashMap<Uuid, RemotePlayer>,
}

impl PlayerStore {
    pub fn new(local: PlayerState) -> Self {
        Self {
            local,
            remotes: HashMap::new(),
        }
    }

    pub fn local(&self) -> &PlayerState {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut PlayerState {
        &mut self.local
    }

    pub fn remote(&self, id: &Uuid) -> Option<&RemotePlayer> {
        self.remotes.get(id)
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    /// Replace the remote roster with `sync`: new ids get an interpolator,
    /// known ids get a new target, missing ids are dropped.
    pub fn apply_roster(&mut self, sync: &RosterSync) {
        let local_id = self.local.id;
        self.remotes
            .retain(|id, _| *id != local_id && sync.players.contains_key(id));

        for (id, snapshot) in &sync.players {
            if *id == local_id {
                continue;
            }
            match self.remotes.get_mut(id) {
                Some(remote) => {
                    remote.apply_snapshot(snapshot);
                }
                None => {
                    self.remotes.insert(*id, RemotePlayer::new(snapshot));
                }
            }
        }
    }

    /// Attach an overlay to its player; unknown ids are dropped
    pub fn apply_action(&mut self, event: &ActionEvent, now_ms: u64) -> bool {
        match self.remotes.get_mut(&event.player_id) {
            Some(remote) => {
                remote.apply_action(&event.action, now_ms);
                true
            }
            None => false,
        }
    }

    /// Advance every interpolator by one render frame
    pub fn render_step(&mut self, now_ms: u64) -> Vec<RemoteView> {
        let mut views: Vec<RemoteView> = self
            .remotes
            .values_mut()
            .map(|remote| remote.step(now_ms))
            .collect();
        views.sort_by_key(|view| view.player_id);
        views
    }

    /// Remote players currently inside `room`
    pub fn occupancy(&self, room: &Room) -> usize {
        self.remotes
            .values()
            .filter(|remote| &remote.state().room == room)
            .count()
    }
}
