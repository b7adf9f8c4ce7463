//! Room/venue state machine
//!
//! A session is always in exactly one room. The open world is the initial
//! state; venues are entered from it and always lead back to it. The position
//! the player had in the world when entering a venue is stashed and handed
//! back verbatim on leave.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::geometry::Vec3;
use super::layout::WorldLayout;

/// Instance used when a cinema is entered without an explicit screening id
pub const DEFAULT_CINEMA_INSTANCE: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    World,
    Cinema,
    Arcade,
    Stadium,
    Disco,
}

impl RoomKind {
    pub const ALL: [RoomKind; 5] = [
        RoomKind::World,
        RoomKind::Cinema,
        RoomKind::Arcade,
        RoomKind::Stadium,
        RoomKind::Disco,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::World => "world",
            RoomKind::Cinema => "cinema",
            RoomKind::Arcade => "arcade",
            RoomKind::Stadium => "stadium",
            RoomKind::Disco => "disco",
        }
    }
}

/// The active room. Only the cinema runs several instances (one per screening).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Room {
    #[default]
    World,
    Cinema {
        instance_id: String,
    },
    Arcade,
    Stadium,
    Disco,
}

impl Room {
    /// Build the venue state for `kind`
    pub fn venue(kind: RoomKind, instance_id: Option<String>) -> Result<Room, RoomError> {
        match kind {
            RoomKind::World => Err(RoomError::NotAVenue),
            RoomKind::Cinema => Ok(Room::Cinema {
                instance_id: instance_id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_CINEMA_INSTANCE.to_string()),
            }),
            RoomKind::Arcade => Ok(Room::Arcade),
            RoomKind::Stadium => Ok(Room::Stadium),
            RoomKind::Disco => Ok(Room::Disco),
        }
    }

    pub fn kind(&self) -> RoomKind {
        match self {
            Room::World => RoomKind::World,
            Room::Cinema { .. } => RoomKind::Cinema,
            Room::Arcade => RoomKind::Arcade,
            Room::Stadium => RoomKind::Stadium,
            Room::Disco => RoomKind::Disco,
        }
    }

    pub fn is_world(&self) -> bool {
        matches!(self, Room::World)
    }

    /// Key that scopes seats and occupancy. None for the open world.
    pub fn venue_instance_id(&self) -> Option<String> {
        match self {
            Room::World => None,
            Room::Cinema { instance_id } => Some(format!("cinema:{instance_id}")),
            other => Some(other.kind().as_str().to_string()),
        }
    }

    /// Persisted form: None while in the world
    pub fn to_row_tag(&self) -> Option<String> {
        if self.is_world() {
            None
        } else {
            Some(self.to_string())
        }
    }

    pub fn from_row_tag(tag: Option<&str>) -> Result<Room, RoomError> {
        match tag {
            None => Ok(Room::World),
            Some(tag) => tag.parse(),
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Cinema { instance_id } => write!(f, "cinema:{instance_id}"),
            other => f.write_str(other.kind().as_str()),
        }
    }
}

impl FromStr for Room {
    type Err = RoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, instance) = match s.split_once(':') {
            Some((kind, instance)) => (kind, Some(instance)),
            None => (s, None),
        };
        match (kind, instance) {
            ("" | "world", None) => Ok(Room::World),
            ("cinema", instance) => Room::venue(RoomKind::Cinema, instance.map(str::to_string)),
            ("arcade", None) => Ok(Room::Arcade),
            ("stadium", None) => Ok(Room::Stadium),
            ("disco", None) => Ok(Room::Disco),
            _ => Err(RoomError::UnknownRoomTag(s.to_string())),
        }
    }
}

/// Non-fatal rejections of a room transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("The open world is not a venue")]
    NotAVenue,

    #[error("Already inside {0}")]
    AlreadyInside(Room),

    #[error("{venue} is full ({capacity} players)")]
    VenueFull { venue: Room, capacity: usize },

    #[error("Unknown room tag: {0}")]
    UnknownRoomTag(String),
}

/// Result of a successful transition, applied by the session
#[derive(Debug, Clone, PartialEq)]
pub struct RoomTransition {
    pub from: Room,
    pub to: Room,
    /// Where the local player must be placed (a teleport)
    pub position: Vec3,
    /// Facing after the teleport, if the destination defines one
    pub rotation: Option<f32>,
    /// Venue whose seat the player must give up
    pub vacated_venue: Option<String>,
}

/// Owns the single active room of a session
#[derive(Debug, Clone)]
pub struct RoomMachine {
    layout: Arc<WorldLayout>,
    room: Room,
    return_position: Option<Vec3>,
}

impl RoomMachine {
    pub fn new(layout: Arc<WorldLayout>) -> Self {
        Self {
            layout,
            room: Room::World,
            return_position: None,
        }
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn kind(&self) -> RoomKind {
        self.room.kind()
    }

    pub fn return_position(&self) -> Option<Vec3> {
        self.return_position
    }

    pub fn layout(&self) -> &Arc<WorldLayout> {
        &self.layout
    }

    /// Rebuild state from a persisted room tag and position after a reload.
    /// Returns the position clamped into the restored room. The original
    /// world position is gone, so leaving later falls back to the world spawn.
    pub fn restore(&mut self, room: Room, position: Vec3) -> Vec3 {
        let bounds = self.layout.bounds(room.kind());
        self.room = room;
        self.return_position = None;
        bounds.clamp(position)
    }

    /// Enter a venue, leaving the current one first if needed.
    /// `occupancy` is the number of other live players already inside.
    pub fn enter_venue(
        &mut self,
        kind: RoomKind,
        instance_id: Option<String>,
        current_position: Vec3,
        occupancy: usize,
    ) -> Result<RoomTransition, RoomError> {
        let target = Room::venue(kind, instance_id)?;
        if target == self.room {
            return Err(RoomError::AlreadyInside(target));
        }

        let venue = self.layout.venue(kind);
        if let Some(capacity) = venue.capacity {
            if occupancy >= capacity {
                return Err(RoomError::VenueFull {
                    venue: target,
                    capacity,
                });
            }
        }
        let spawn = venue.spawn;
        let spawn_rotation = venue.spawn_rotation;

        let from = self.room.clone();
        let (world_position, vacated_venue) = match self.leave_venue() {
            Some(left) => (left.position, left.vacated_venue),
            None => (current_position, None),
        };

        self.return_position = Some(world_position);
        self.room = target.clone();

        Ok(RoomTransition {
            from,
            to: target,
            position: spawn,
            rotation: Some(spawn_rotation),
            vacated_venue,
        })
    }

    /// Go back to the world. None when already there.
    pub fn leave_venue(&mut self) -> Option<RoomTransition> {
        if self.room.is_world() {
            return None;
        }

        let from = std::mem::take(&mut self.room);
        let position = self
            .return_position
            .take()
            .unwrap_or_else(|| self.layout.venue(RoomKind::World).spawn);

        Some(RoomTransition {
            vacated_venue: from.venue_instance_id(),
            from,
            to: Room::World,
            position,
            rotation: None,
        })
    }
}
