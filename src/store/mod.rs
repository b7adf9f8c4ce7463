//! Persistent rows: player positions and venue seats
//!
//! Seats are the only rows several clients race on. Every backend must make
//! `claim_seat` a compare-and-set on the seat's occupant so that concurrent
//! claims of one empty seat produce exactly one winner.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::InMemoryWorldStore;
pub use supabase::{SupabaseClient, SupabaseError, SupabaseWorldStore};

/// Persisted player row (read on join, written on room/seat/position change)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRow {
    pub id: Uuid,
    pub position_x: f32,
    pub position_y: f32,
    pub position_z: f32,
    pub rotation: f32,
    /// Room tag, null while in the open world
    pub current_room: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Persisted seat row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatRow {
    pub venue_instance_id: String,
    pub seat_index: u32,
    pub occupant_id: Option<Uuid>,
    pub occupied_at: Option<DateTime<Utc>>,
}

impl SeatRow {
    pub fn empty(venue_instance_id: &str, seat_index: u32) -> Self {
        Self {
            venue_instance_id: venue_instance_id.to_string(),
            seat_index,
            occupant_id: None,
            occupied_at: None,
        }
    }
}

/// Outcome of a conditional seat write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatClaim {
    /// Won; `released` is the seat the occupant held before in this venue
    Claimed { released: Option<u32> },
    /// Lost: the seat already has an occupant
    Taken { by: Option<Uuid> },
    NoSuchSeat,
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Supabase error: {0}")]
    Supabase(#[from] SupabaseError),
}

#[async_trait]
pub trait WorldStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    async fn load_player(&self, id: Uuid) -> Result<Option<PlayerRow>, StoreError>;

    async fn save_player(&self, row: &PlayerRow) -> Result<(), StoreError>;

    async fn touch_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn mark_offline(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Create empty seat rows for a venue instance. Existing rows are kept.
    async fn open_venue_seats(&self, venue_instance_id: &str, seat_count: u32)
        -> Result<(), StoreError>;

    /// Drop every seat row of a venue instance
    async fn close_venue_seats(&self, venue_instance_id: &str) -> Result<(), StoreError>;

    async fn seats(&self, venue_instance_id: &str) -> Result<Vec<SeatRow>, StoreError>;

    async fn seat_of(
        &self,
        venue_instance_id: &str,
        occupant_id: Uuid,
    ) -> Result<Option<u32>, StoreError>;

    /// Set the occupant only if the seat is empty; on success vacate any
    /// other seat the occupant held in the same venue instance.
    async fn claim_seat(
        &self,
        venue_instance_id: &str,
        seat_index: u32,
        occupant_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<SeatClaim, StoreError>;

    /// Vacate whatever seat the occupant holds; returns its index
    async fn release_seat(
        &self,
        venue_instance_id: &str,
        occupant_id: Uuid,
    ) -> Result<Option<u32>, StoreError>;
}
