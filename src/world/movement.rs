//! Local player movement
//!
//! One call to [`MovementController::step`] per 50 ms movement tick. Input is
//! camera-relative: "forward" is away from an orbiting camera, or along the
//! look yaw in first person. The candidate position is clamped to the room and
//! rejected outright if it lands inside a collision zone.

use std::sync::Arc;

use crate::util::time::{Throttle, PUBLISH_INTERVAL_MS};

use super::collision::QualityTier;
use super::geometry::{heading_of, Vec3};
use super::layout::WorldLayout;
use super::player::PlayerState;
use super::rooms::RoomKind;

/// Units per movement tick
pub const BASE_SPEED: f32 = 0.15;
pub const SPRINT_MULTIPLIER: f32 = 2.0;

/// Digital movement keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeySet {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
}

/// Movement intent for one tick, relative to the camera
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MovementInput {
    /// -1 (back) ..= 1 (forward)
    pub forward: f32,
    /// -1 (left) ..= 1 (right)
    pub right: f32,
    pub sprint: bool,
}

impl MovementInput {
    pub fn from_keys(keys: KeySet, sprint: bool) -> Self {
        let axis = |pos: bool, neg: bool| (pos as i8 - neg as i8) as f32;
        Self {
            forward: axis(keys.forward, keys.back),
            right: axis(keys.right, keys.left),
            sprint,
        }
    }

    pub fn joystick(forward: f32, right: f32, sprint: bool) -> Self {
        let sanitize = |v: f32| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        Self {
            forward: sanitize(forward),
            right: sanitize(right),
            sprint,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.forward == 0.0 && self.right == 0.0
    }

    /// Input vector with its length capped at 1, so diagonals are not faster
    fn capped(&self) -> (f32, f32) {
        let len = (self.forward * self.forward + self.right * self.right).sqrt();
        if len > 1.0 {
            (self.forward / len, self.right / len)
        } else {
            (self.forward, self.right)
        }
    }
}

/// How the local view is currently framed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraView {
    /// Third person; forward points from the camera to the player
    Orbit { camera: Vec3 },
    /// Forward is the look yaw
    FirstPerson { yaw: f32 },
    /// Scripted shot; input does nothing
    Fixed,
}

impl CameraView {
    fn heading(&self, player: &Vec3) -> Option<f32> {
        match self {
            CameraView::Orbit { camera } => {
                let dx = player.x - camera.x;
                let dz = player.z - camera.z;
                if dx == 0.0 && dz == 0.0 {
                    // Camera on top of the player: keep the world frame
                    Some(0.0)
                } else {
                    Some(heading_of(dx, dz))
                }
            }
            CameraView::FirstPerson { yaw } => Some(*yaw),
            CameraView::Fixed => None,
        }
    }
}

/// Result of one movement tick
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// Position and rotation changed. `publish` is set when the publish
    /// throttle allows a snapshot for this tick.
    Moved {
        position: Vec3,
        rotation: f32,
        publish: bool,
    },
    /// Candidate fell inside a zone; the player stays put
    Blocked { zone: String },
    /// Seated or on a fixed camera; input dropped
    Ignored,
    /// No input, or pushing against the room edge
    Idle,
}

/// Drives the local player. Owned by the session.
#[derive(Debug, Clone)]
pub struct MovementController {
    layout: Arc<WorldLayout>,
    tier: QualityTier,
    publish_throttle: Throttle,
    /// Moved since the last snapshot went out
    unpublished: bool,
}

impl MovementController {
    pub fn new(layout: Arc<WorldLayout>, tier: QualityTier) -> Self {
        Self {
            layout,
            tier,
            publish_throttle: Throttle::new(PUBLISH_INTERVAL_MS),
            unpublished: false,
        }
    }

    /// Let the next tick publish immediately (after a teleport, say)
    pub fn force_publish(&mut self) {
        self.publish_throttle.reset();
    }

    /// The session published the current state by other means
    pub fn mark_published(&mut self) {
        self.unpublished = false;
    }

    /// True when steps were taken after the last snapshot and the throttle
    /// now allows one. Covers the tail of a walk that stopped mid-window.
    pub fn flush_pending(&mut self, now_ms: u64) -> bool {
        if self.unpublished && self.publish_throttle.try_fire(now_ms) {
            self.unpublished = false;
            true
        } else {
            false
        }
    }

    /// Run one tick of movement for `player` inside `room`
    pub fn step(
        &mut self,
        player: &mut PlayerState,
        room: RoomKind,
        input: &MovementInput,
        camera: &CameraView,
        now_ms: u64,
    ) -> MoveOutcome {
        if player.is_seated() {
            return MoveOutcome::Ignored;
        }
        let Some(heading) = camera.heading(&player.position) else {
            return MoveOutcome::Ignored;
        };
        if input.is_idle() {
            return MoveOutcome::Idle;
        }

        let speed = if input.sprint {
            BASE_SPEED * SPRINT_MULTIPLIER
        } else {
            BASE_SPEED
        };
        let (forward, right) = input.capped();
        let (sin, cos) = heading.sin_cos();
        let dx = (forward * sin - right * cos) * speed;
        let dz = (forward * cos + right * sin) * speed;

        let previous = player.position;
        let candidate = self.layout.bounds(room).clamp(Vec3 {
            x: previous.x + dx,
            y: previous.y,
            z: previous.z + dz,
        });

        if let Some(zone) = self
            .layout
            .catalog()
            .blocking_zone(room, self.tier, &candidate)
        {
            return MoveOutcome::Blocked {
                zone: zone.name.clone(),
            };
        }

        let moved_x = candidate.x - previous.x;
        let moved_z = candidate.z - previous.z;
        if moved_x == 0.0 && moved_z == 0.0 {
            return MoveOutcome::Idle;
        }

        player.position = candidate;
        player.set_rotation(heading_of(moved_x, moved_z));

        let publish = self.publish_throttle.try_fire(now_ms);
        self.unpublished = !publish;
        MoveOutcome::Moved {
            position: candidate,
            rotation: player.rotation,
            publish,
        }
    }
}
