//! In-process store used when no Supabase project is configured

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{PlayerRow, SeatClaim, SeatRow, StoreError, WorldStore};

/// Player rows live in a concurrent map. Seat rows of a venue are mutated
/// under one write lock so a claim and the release of the occupant's previous
/// seat happen together.
#[derive(Default)]
pub struct InMemoryWorldStore {
    players: DashMap<Uuid, PlayerRow>,
    seats: RwLock<HashMap<String, Vec<SeatRow>>>,
}

impl InMemoryWorldStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorldStore for InMemoryWorldStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn load_player(&self, id: Uuid) -> Result<Option<PlayerRow>, StoreError> {
        Ok(self.players.get(&id).map(|row| row.value().clone()))
    }

    async fn save_player(&self, row: &PlayerRow) -> Result<(), StoreError> {
        self.players.insert(row.id, row.clone());
        Ok(())
    }

    async fn touch_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut row) = self.players.get_mut(&id) {
            row.last_seen = at;
        }
        Ok(())
    }

    async fn mark_offline(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut row) = self.players.get_mut(&id) {
            row.is_online = false;
            row.last_seen = at;
        }
        Ok(())
    }

    async fn open_venue_seats(
        &self,
        venue_instance_id: &str,
        seat_count: u32,
    ) -> Result<(), StoreError> {
        let mut seats = self.seats.write();
        let rows = seats.entry(venue_instance_id.to_string()).or_default();
        for seat_index in rows.len() as u32..seat_count {
            rows.push(SeatRow::empty(venue_instance_id, seat_index));
        }
        Ok(())
    }

    async fn close_venue_seats(&self, venue_instance_id: &str) -> Result<(), StoreError> {
        self.seats.write().remove(venue_instance_id);
        Ok(())
    }

    async fn seats(&self, venue_instance_id: &str) -> Result<Vec<SeatRow>, StoreError> {
        Ok(self
            .seats
            .read()
            .get(venue_instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn seat_of(
        &self,
        venue_instance_id: &str,
        occupant_id: Uuid,
    ) -> Result<Option<u32>, StoreError> {
        Ok(self.seats.read().get(venue_instance_id).and_then(|rows| {
            rows.iter()
                .find(|row| row.occupant_id == Some(occupant_id))
                .map(|row| row.seat_index)
        }))
    }

    async fn claim_seat(
        &self,
        venue_instance_id: &str,
        seat_index: u32,
        occupant_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<SeatClaim, StoreError> {
        let mut seats = self.seats.write();
        let Some(rows) = seats.get_mut(venue_instance_id) else {
            return Ok(SeatClaim::NoSuchSeat);
        };

        match rows.get(seat_index as usize).map(|row| row.occupant_id) {
            None => return Ok(SeatClaim::NoSuchSeat),
            Some(Some(by)) => return Ok(SeatClaim::Taken { by: Some(by) }),
            Some(None) => {}
        }

        let mut released = None;
        for row in rows.iter_mut() {
            if row.occupant_id == Some(occupant_id) {
                row.occupant_id = None;
                row.occupied_at = None;
                released = Some(row.seat_index);
            }
        }

        let row = &mut rows[seat_index as usize];
        row.occupant_id = Some(occupant_id);
        row.occupied_at = Some(at);

        Ok(SeatClaim::Claimed { released })
    }

    async fn release_seat(
        &self,
        venue_instance_id: &str,
        occupant_id: Uuid,
    ) -> Result<Option<u32>, StoreError> {
        let mut seats = self.seats.write();
        let mut released = None;
        if let Some(rows) = seats.get_mut(venue_instance_id) {
            for row in rows.iter_mut().filter(|row| row.occupant_id == Some(occupant_id)) {
                row.occupant_id = None;
                row.occupied_at = None;
                released = Some(row.seat_index);
            }
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    fn row(id: Uuid) -> PlayerRow {
        PlayerRow {
            id,
            position_x: 1.0,
            position_y: 0.0,
            position_z: 2.0,
            rotation: 0.0,
            current_room: None,
            is_online: true,
            last_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn player_rows_round_trip_and_go_offline() {
        let store = InMemoryWorldStore::new();
        let id = Uuid::new_v4();
        assert_ok!(store.save_player(&row(id)).await);

        let later = Utc::now();
        assert_ok!(store.mark_offline(id, later).await);

        let loaded = store.load_player(id).await.unwrap().unwrap();
        assert!(!loaded.is_online);
        assert_eq!(loaded.last_seen, later);
        assert!(store.load_player(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_moves_occupant_between_seats() {
        let store = InMemoryWorldStore::new();
        let alice = Uuid::new_v4();
        store.open_venue_seats("cinema:main", 4).await.unwrap();

        let first = store.claim_seat("cinema:main", 1, alice, Utc::now()).await.unwrap();
        assert_eq!(first, SeatClaim::Claimed { released: None });

        let second = store.claim_seat("cinema:main", 3, alice, Utc::now()).await.unwrap();
        assert_eq!(second, SeatClaim::Claimed { released: Some(1) });

        let rows = store.seats("cinema:main").await.unwrap();
        assert_eq!(rows.iter().filter(|r| r.occupant_id == Some(alice)).count(), 1);
        assert_eq!(store.seat_of("cinema:main", alice).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn unknown_seats_and_venues_are_reported() {
        let store = InMemoryWorldStore::new();
        let alice = Uuid::new_v4();
        assert_eq!(
            store.claim_seat("arcade", 0, alice, Utc::now()).await.unwrap(),
            SeatClaim::NoSuchSeat
        );
        store.open_venue_seats("stadium", 2).await.unwrap();
        assert_eq!(
            store.claim_seat("stadium", 2, alice, Utc::now()).await.unwrap(),
            SeatClaim::NoSuchSeat
        );
    }

    #[tokio::test]
    async fn reopening_seats_keeps_occupants() {
        let store = InMemoryWorldStore::new();
        let alice = Uuid::new_v4();
        store.open_venue_seats("stadium", 2).await.unwrap();
        store.claim_seat("stadium", 0, alice, Utc::now()).await.unwrap();
        store.open_venue_seats("stadium", 4).await.unwrap();

        let rows = store.seats("stadium").await.unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].occupant_id, Some(alice));

        store.close_venue_seats("stadium").await.unwrap();
        assert!(store.seats("stadium").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_of_one_seat_have_one_winner() {
        let store = Arc::new(InMemoryWorldStore::new());
        store.open_venue_seats("cinema:main", 8).await.unwrap();

        let contenders: Vec<Uuid> = (0..16).map(|_| Uuid::new_v4()).collect();
        let handles: Vec<_> = contenders
            .iter()
            .map(|id| {
                let store = store.clone();
                let id = *id;
                tokio::spawn(async move { store.claim_seat("cinema:main", 5, id, Utc::now()).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                SeatClaim::Claimed { .. } => winners += 1,
                SeatClaim::Taken { by } => assert!(by.is_some()),
                SeatClaim::NoSuchSeat => panic!("seat 5 exists"),
            }
        }
        assert_eq!(winners, 1);

        let rows = store.seats("cinema:main").await.unwrap();
        let occupant = rows[5].occupant_id.expect("seat is occupied");
        assert!(contenders.contains(&occupant));
    }
}
