//! Positions, room bounds and angle helpers

use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

/// World-space position. Y is up; avatars walk on the XZ plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Move `factor` of the way towards `target`
    pub fn lerp(&self, target: &Vec3, factor: f32) -> Vec3 {
        Vec3 {
            x: self.x + (target.x - self.x) * factor,
            y: self.y + (target.y - self.y) * factor,
            z: self.z + (target.z - self.z) * factor,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Axis-aligned walkable area of a room on the XZ plane
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_z: f32,
    pub max_z: f32,
}

impl Bounds {
    pub const fn new(min_x: f32, max_x: f32, min_z: f32, max_z: f32) -> Self {
        Self {
            min_x,
            max_x,
            min_z,
            max_z,
        }
    }

    pub fn contains(&self, pos: &Vec3) -> bool {
        pos.x >= self.min_x && pos.x <= self.max_x && pos.z >= self.min_z && pos.z <= self.max_z
    }

    /// Clamp a position to the nearest point inside the bounds.
    /// Non-finite coordinates collapse to the room's centre line.
    pub fn clamp(&self, pos: Vec3) -> Vec3 {
        let center_x = (self.min_x + self.max_x) * 0.5;
        let center_z = (self.min_z + self.max_z) * 0.5;
        let x = if pos.x.is_finite() { pos.x } else { center_x };
        let z = if pos.z.is_finite() { pos.z } else { center_z };
        let y = if pos.y.is_finite() { pos.y } else { 0.0 };
        Vec3 {
            x: x.clamp(self.min_x, self.max_x),
            y,
            z: z.clamp(self.min_z, self.max_z),
        }
    }
}

/// Normalize an angle into (-π, π]
pub fn normalize_angle(angle: f32) -> f32 {
    if !angle.is_finite() {
        return 0.0;
    }
    if angle > -PI && angle <= PI {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    // rem_euclid maps π to -π; the range is half-open on the other side
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Signed shortest rotation that takes `from` to `to`, in (-π, π]
pub fn shortest_angle_delta(from: f32, to: f32) -> f32 {
    normalize_angle(to - from)
}

/// Heading of a displacement on the XZ plane. Zero faces +Z.
pub fn heading_of(dx: f32, dz: f32) -> f32 {
    normalize_angle(dx.atan2(dz))
}
