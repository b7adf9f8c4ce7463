//! Static room/venue table: bounds, spawn points, seating and collision zones.
//! Loaded once at startup, either the built-in plaza or a JSON file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f32::consts::PI;
use std::path::Path;

use super::collision::{CollisionCatalog, CollisionZone, QualityTier};
use super::geometry::{normalize_angle, Bounds, Vec3};
use super::rooms::RoomKind;

/// Where a seated avatar is placed and which way it faces
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeatPose {
    pub position: Vec3,
    pub rotation: f32,
}

/// A rectangular block of seats. Index 0 is the front-left seat; indices run
/// along a row first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatGrid {
    pub rows: u32,
    pub cols: u32,
    /// Position of seat 0
    pub origin: Vec3,
    pub spacing_x: f32,
    pub spacing_z: f32,
    /// Height gained per row (raked seating)
    #[serde(default)]
    pub rise_y: f32,
    /// Facing of every seat
    pub facing: f32,
}

impl SeatGrid {
    /// Validated layouts never saturate here
    pub fn seat_count(&self) -> u32 {
        self.rows.saturating_mul(self.cols)
    }

    pub fn pose(&self, seat_index: u32) -> Option<SeatPose> {
        if seat_index >= self.seat_count() {
            return None;
        }
        let row = seat_index / self.cols;
        let col = seat_index % self.cols;
        Some(SeatPose {
            position: Vec3 {
                x: self.origin.x + col as f32 * self.spacing_x,
                y: self.origin.y + row as f32 * self.rise_y,
                z: self.origin.z + row as f32 * self.spacing_z,
            },
            rotation: normalize_angle(self.facing),
        })
    }
}

/// One room's static description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueLayout {
    pub kind: RoomKind,
    pub bounds: Bounds,
    pub spawn: Vec3,
    #[serde(default)]
    pub spawn_rotation: f32,
    /// Maximum live occupants, if the venue is capped
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub seating: Option<SeatGrid>,
    #[serde(default)]
    pub zones: Vec<CollisionZone>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LayoutFile {
    venues: Vec<VenueLayout>,
}

/// Errors while loading a layout file
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("Failed to read layout file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse layout file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Layout is missing room kind {0:?}")]
    MissingRoom(RoomKind),

    #[error("Spawn point of {0:?} lies outside its bounds")]
    SpawnOutOfBounds(RoomKind),

    #[error("Seat grid of {kind:?} is too large ({rows} x {cols})")]
    SeatGridTooLarge { kind: RoomKind, rows: u32, cols: u32 },

    #[error("Zone {zone} is declared under {declared:?} but scoped to {scoped:?}")]
    ZoneScopeMismatch {
        zone: String,
        declared: RoomKind,
        scoped: RoomKind,
    },
}

/// Every room of the plaza plus the derived collision catalog
#[derive(Debug, Clone)]
pub struct WorldLayout {
    venues: HashMap<RoomKind, VenueLayout>,
    catalog: CollisionCatalog,
}

impl WorldLayout {
    pub fn new(venues: Vec<VenueLayout>) -> Result<Self, LayoutError> {
        for venue in &venues {
            if !venue.bounds.contains(&venue.spawn) {
                return Err(LayoutError::SpawnOutOfBounds(venue.kind));
            }
            if let Some(grid) = &venue.seating {
                if grid.rows.checked_mul(grid.cols).is_none() {
                    return Err(LayoutError::SeatGridTooLarge {
                        kind: venue.kind,
                        rows: grid.rows,
                        cols: grid.cols,
                    });
                }
            }
            for zone in &venue.zones {
                if zone.room != venue.kind {
                    return Err(LayoutError::ZoneScopeMismatch {
                        zone: zone.name.clone(),
                        declared: venue.kind,
                        scoped: zone.room,
                    });
                }
            }
        }

        for kind in RoomKind::ALL {
            if !venues.iter().any(|v| v.kind == kind) {
                return Err(LayoutError::MissingRoom(kind));
            }
        }

        Ok(Self::assemble(venues))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let raw = std::fs::read_to_string(path)?;
        let file: LayoutFile = serde_json::from_str(&raw)?;
        Self::new(file.venues)
    }

    pub fn venue(&self, kind: RoomKind) -> &VenueLayout {
        // Presence of every kind is checked in `new`
        &self.venues[&kind]
    }

    pub fn bounds(&self, kind: RoomKind) -> Bounds {
        self.venue(kind).bounds
    }

    pub fn catalog(&self) -> &CollisionCatalog {
        &self.catalog
    }

    pub fn seat_pose(&self, kind: RoomKind, seat_index: u32) -> Option<SeatPose> {
        self.venue(kind)
            .seating
            .as_ref()
            .and_then(|grid| grid.pose(seat_index))
    }

    pub fn seat_count(&self, kind: RoomKind) -> u32 {
        self.venue(kind)
            .seating
            .as_ref()
            .map(SeatGrid::seat_count)
            .unwrap_or(0)
    }

    /// The built-in plaza
    pub fn standard() -> Self {
        use RoomKind::*;

        let venues = vec![
            VenueLayout {
                kind: World,
                bounds: Bounds::new(-60.0, 60.0, -60.0, 60.0),
                spawn: Vec3::new(0.0, 0.0, 15.0),
                spawn_rotation: 0.0,
                capacity: None,
                seating: None,
                zones: vec![
                    CollisionZone::new("fountain", World, 0.0, 0.0, 6.0, 6.0),
                    CollisionZone::new("cinema_facade", World, -30.0, -40.0, 20.0, 8.0),
                    CollisionZone::new("arcade_facade", World, 30.0, -40.0, 16.0, 8.0),
                    CollisionZone::new("stadium_wall", World, 0.0, -55.0, 40.0, 4.0),
                    CollisionZone::new("disco_facade", World, 40.0, 20.0, 8.0, 12.0),
                    CollisionZone::new("kiosk", World, -20.0, 10.0, 3.0, 3.0),
                    CollisionZone::new("bench_row", World, 12.0, 30.0, 8.0, 1.0)
                        .with_min_tier(QualityTier::Medium),
                    CollisionZone::new("planter_west", World, -45.0, 30.0, 2.0, 2.0)
                        .with_min_tier(QualityTier::High),
                    CollisionZone::new("planter_east", World, 45.0, 30.0, 2.0, 2.0)
                        .with_min_tier(QualityTier::High),
                ],
            },
            VenueLayout {
                kind: Cinema,
                bounds: Bounds::new(-14.0, 14.0, -18.0, 18.0),
                spawn: Vec3::new(0.0, 0.0, 15.0),
                spawn_rotation: PI,
                capacity: Some(40),
                seating: Some(SeatGrid {
                    rows: 5,
                    cols: 8,
                    origin: Vec3::new(-7.0, 0.5, -8.0),
                    spacing_x: 2.0,
                    spacing_z: 2.5,
                    rise_y: 0.4,
                    facing: PI,
                }),
                zones: vec![
                    CollisionZone::new("screen_stage", Cinema, 0.0, -17.0, 28.0, 2.0),
                    CollisionZone::new("projector_booth", Cinema, 0.0, 17.5, 6.0, 1.0),
                ],
            },
            VenueLayout {
                kind: Arcade,
                bounds: Bounds::new(-15.0, 15.0, -12.0, 12.0),
                spawn: Vec3::new(0.0, 0.0, 10.0),
                spawn_rotation: PI,
                capacity: Some(24),
                seating: None,
                zones: vec![
                    CollisionZone::new("cabinets_west", Arcade, -10.0, 0.0, 2.0, 16.0),
                    CollisionZone::new("cabinets_east", Arcade, 10.0, 0.0, 2.0, 16.0),
                    CollisionZone::new("prize_counter", Arcade, 0.0, -10.5, 10.0, 1.5),
                    CollisionZone::new("air_hockey", Arcade, 0.0, 0.0, 3.0, 5.0)
                        .with_min_tier(QualityTier::Medium),
                ],
            },
            VenueLayout {
                kind: Stadium,
                bounds: Bounds::new(-40.0, 40.0, -30.0, 30.0),
                spawn: Vec3::new(0.0, 0.0, 18.0),
                spawn_rotation: PI,
                capacity: Some(60),
                seating: Some(SeatGrid {
                    rows: 4,
                    cols: 10,
                    origin: Vec3::new(-18.0, 1.0, 22.0),
                    spacing_x: 4.0,
                    spacing_z: 2.0,
                    rise_y: 0.8,
                    facing: PI,
                }),
                zones: vec![
                    CollisionZone::new("goal_north", Stadium, 0.0, -20.0, 8.0, 1.0),
                    CollisionZone::new("goal_south", Stadium, 0.0, 12.0, 8.0, 1.0),
                    CollisionZone::new("commentary_box", Stadium, 35.0, 25.0, 6.0, 4.0),
                ],
            },
            VenueLayout {
                kind: Disco,
                bounds: Bounds::new(-12.0, 12.0, -12.0, 12.0),
                spawn: Vec3::new(0.0, 0.0, 9.0),
                spawn_rotation: PI,
                capacity: Some(50),
                seating: None,
                zones: vec![
                    CollisionZone::new("dj_booth", Disco, 0.0, -10.0, 6.0, 3.0),
                    CollisionZone::new("bar", Disco, -10.0, 4.0, 3.0, 8.0),
                    CollisionZone::new("speaker_stack", Disco, 10.0, -10.0, 2.0, 2.0)
                        .with_min_tier(QualityTier::Medium),
                ],
            },
        ];

        // The built-in table is covered by the validation tests below
        Self::assemble(venues)
    }

    fn assemble(venues: Vec<VenueLayout>) -> Self {
        let catalog = CollisionCatalog::new(
            venues.iter().flat_map(|v| v.zones.iter().cloned()).collect(),
        );
        Self {
            venues: venues.into_iter().map(|v| (v.kind, v)).collect(),
            catalog,
        }
    }
}

impl Default for WorldLayout {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_layout_spawns_are_clear_of_zones() {
        let layout = WorldLayout::standard();
        for kind in RoomKind::ALL {
            let venue = layout.venue(kind);
            for tier in [QualityTier::Low, QualityTier::Medium, QualityTier::High] {
                assert!(
                    !layout.catalog().is_blocked(kind, tier, &venue.spawn),
                    "{kind:?} spawn is blocked at {tier:?}"
                );
            }
        }
    }

    #[test]
    fn seats_lie_inside_bounds_and_outside_zones() {
        let layout = WorldLayout::standard();
        for kind in [RoomKind::Cinema, RoomKind::Stadium] {
            let bounds = layout.bounds(kind);
            for index in 0..layout.seat_count(kind) {
                let pose = layout.seat_pose(kind, index).expect("seat exists");
                assert!(bounds.contains(&pose.position), "{kind:?} seat {index}");
                assert!(!layout
                    .catalog()
                    .is_blocked(kind, QualityTier::High, &pose.position));
            }
        }
    }

    #[test]
    fn seat_grid_indexes_row_major() {
        let layout = WorldLayout::standard();
        assert_eq!(layout.seat_count(RoomKind::Cinema), 40);
        let first = layout.seat_pose(RoomKind::Cinema, 0).unwrap();
        let second_row = layout.seat_pose(RoomKind::Cinema, 8).unwrap();
        assert_eq!(first.position, Vec3::new(-7.0, 0.5, -8.0));
        assert_eq!(second_row.position.x, -7.0);
        assert!((second_row.position.z - (-5.5)).abs() < 1e-5);
        assert!(layout.seat_pose(RoomKind::Cinema, 40).is_none());
        assert!(layout.seat_pose(RoomKind::Arcade, 0).is_none());
    }

    #[test]
    fn standard_layout_passes_validation() {
        let layout = WorldLayout::standard();
        let venues = RoomKind::ALL
            .iter()
            .map(|kind| layout.venue(*kind).clone())
            .collect();
        assert!(WorldLayout::new(venues).is_ok());
    }

    #[test]
    fn oversized_seat_grid_is_rejected() {
        let layout = WorldLayout::standard();
        let mut venues: Vec<VenueLayout> = RoomKind::ALL
            .iter()
            .map(|kind| layout.venue(*kind).clone())
            .collect();
        let cinema = venues
            .iter_mut()
            .find(|v| v.kind == RoomKind::Cinema)
            .unwrap();
        if let Some(grid) = cinema.seating.as_mut() {
            grid.rows = 70_000;
            grid.cols = 70_000;
        }

        assert!(matches!(
            WorldLayout::new(venues),
            Err(LayoutError::SeatGridTooLarge {
                kind: RoomKind::Cinema,
                ..
            })
        ));
    }

    #[test]
    fn layout_without_every_room_is_rejected() {
        let venues = vec![WorldLayout::standard().venue(RoomKind::World).clone()];
        assert!(matches!(
            WorldLayout::new(venues),
            Err(LayoutError::MissingRoom(_))
        ));
    }

    #[test]
    fn layout_round_trips_through_json_file() {
        let layout = WorldLayout::standard();
        let file = LayoutFile {
            venues: RoomKind::ALL
                .iter()
                .map(|kind| layout.venue(*kind).clone())
                .collect(),
        };
        let path = std::env::temp_dir().join(format!("plaza-layout-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let loaded = WorldLayout::from_json_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.venue(RoomKind::Disco), layout.venue(RoomKind::Disco));
        assert_eq!(loaded.catalog().len(), layout.catalog().len());
    }
}
