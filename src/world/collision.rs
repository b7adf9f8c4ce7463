//! Static collision zones
//!
//! Obstacles are axis-aligned rectangles on the XZ plane, scoped to one room
//! kind and a minimum render quality tier (low-quality clients do not spawn
//! decorative props, so those props must not block them either). The test is
//! a discrete containment check on the candidate position, not a swept test:
//! an actor moving further than a zone's thickness in one tick can pass
//! through it. At 0.3 units per sprinting tick no shipped zone is that thin.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::geometry::Vec3;
use super::rooms::RoomKind;

/// Client render quality. Higher tiers place more props in the scene.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    High,
}

impl std::str::FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

/// A rectangular obstacle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionZone {
    pub name: String,
    pub center_x: f32,
    pub center_z: f32,
    pub width: f32,
    pub depth: f32,
    pub room: RoomKind,
    /// Lowest quality tier at which this obstacle exists
    #[serde(default = "lowest_tier")]
    pub min_tier: QualityTier,
}

fn lowest_tier() -> QualityTier {
    QualityTier::Low
}

impl CollisionZone {
    pub fn new(
        name: &str,
        room: RoomKind,
        center_x: f32,
        center_z: f32,
        width: f32,
        depth: f32,
    ) -> Self {
        Self {
            name: name.to_string(),
            center_x,
            center_z,
            width,
            depth,
            room,
            min_tier: QualityTier::Low,
        }
    }

    pub fn with_min_tier(mut self, tier: QualityTier) -> Self {
        self.min_tier = tier;
        self
    }

    /// Edge-inclusive containment on the XZ plane
    pub fn contains(&self, x: f32, z: f32) -> bool {
        (x - self.center_x).abs() <= self.width / 2.0
            && (z - self.center_z).abs() <= self.depth / 2.0
    }

    pub fn applies_to(&self, room: RoomKind, tier: QualityTier) -> bool {
        self.room == room && tier >= self.min_tier
    }
}

/// Read-only catalog of every zone, indexed by room kind.
/// Shared between sessions behind an `Arc` without locking.
#[derive(Debug, Clone, Default)]
pub struct CollisionCatalog {
    by_room: HashMap<RoomKind, Vec<CollisionZone>>,
}

impl CollisionCatalog {
    pub fn new(zones: Vec<CollisionZone>) -> Self {
        let mut by_room: HashMap<RoomKind, Vec<CollisionZone>> = HashMap::new();
        for zone in zones {
            by_room.entry(zone.room).or_default().push(zone);
        }
        Self { by_room }
    }

    /// Zones active in `room` at `tier`
    pub fn zones_for(
        &self,
        room: RoomKind,
        tier: QualityTier,
    ) -> impl Iterator<Item = &CollisionZone> + '_ {
        self.by_room
            .get(&room)
            .into_iter()
            .flatten()
            .filter(move |zone| zone.applies_to(room, tier))
    }

    /// First zone that contains `pos`, if any
    pub fn blocking_zone(
        &self,
        room: RoomKind,
        tier: QualityTier,
        pos: &Vec3,
    ) -> Option<&CollisionZone> {
        self.zones_for(room, tier).find(|zone| zone.contains(pos.x, pos.z))
    }

    pub fn is_blocked(&self, room: RoomKind, tier: QualityTier, pos: &Vec3) -> bool {
        self.blocking_zone(room, tier, pos).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_room.values().map(Vec::len).sum()
    }

    pub fn all(&self) -> impl Iterator<Item = &CollisionZone> + '_ {
        self.by_room.values().flatten()
    }
}
