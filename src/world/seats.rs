//! Seat reservations for venues with seating
//!
//! Seat rows are the one resource several sessions race on. All arbitration
//! happens in the store's conditional write; this layer maps seat indices to
//! fixed poses and turns a repeated claim of one's own seat into standing up.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::store::{SeatClaim, StoreError, WorldStore};

use super::layout::{SeatPose, WorldLayout};
use super::player::SeatRef;
use super::rooms::Room;

/// What a claim did
#[derive(Debug, Clone, PartialEq)]
pub enum SeatOutcome {
    /// Sat down; the occupant must be teleported to `pose`
    Claimed {
        seat: SeatRef,
        pose: SeatPose,
        /// Seat given up in the same venue, if any
        released: Option<u32>,
    },
    /// The seat was already ours, so we stood up
    Released { seat: SeatRef },
    /// Someone else sits there
    Taken { by: Option<Uuid> },
    NoSuchSeat,
}

#[derive(Debug, thiserror::Error)]
pub enum SeatError {
    #[error("{0} has no seating")]
    NoSeating(Room),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct SeatReservationManager {
    store: Arc<dyn WorldStore>,
    layout: Arc<WorldLayout>,
}

impl SeatReservationManager {
    pub fn new(store: Arc<dyn WorldStore>, layout: Arc<WorldLayout>) -> Self {
        Self { store, layout }
    }

    fn venue_id(&self, room: &Room) -> Result<String, SeatError> {
        match room.venue_instance_id() {
            Some(id) if self.layout.seat_count(room.kind()) > 0 => Ok(id),
            _ => Err(SeatError::NoSeating(room.clone())),
        }
    }

    /// Make sure seat rows exist for a seated venue. Returns the seat count,
    /// zero for rooms without seating.
    pub async fn open(&self, room: &Room) -> Result<u32, StoreError> {
        let count = self.layout.seat_count(room.kind());
        match room.venue_instance_id() {
            Some(venue) if count > 0 => {
                self.store.open_venue_seats(&venue, count).await?;
                Ok(count)
            }
            _ => Ok(0),
        }
    }

    /// Drop the seat rows of a venue instance (a screening ended)
    pub async fn close(&self, room: &Room) -> Result<(), StoreError> {
        if let Some(venue) = room.venue_instance_id() {
            self.store.close_venue_seats(&venue).await?;
        }
        Ok(())
    }

    /// Claim `seat_index` in `room` for `occupant`, or stand up if it is
    /// already theirs.
    pub async fn claim(
        &self,
        room: &Room,
        seat_index: u32,
        occupant: Uuid,
    ) -> Result<SeatOutcome, SeatError> {
        let venue = self.venue_id(room)?;
        let Some(pose) = self.layout.seat_pose(room.kind(), seat_index) else {
            return Ok(SeatOutcome::NoSuchSeat);
        };

        if self.store.seat_of(&venue, occupant).await? == Some(seat_index) {
            self.store.release_seat(&venue, occupant).await?;
            tracing::debug!(%occupant, venue = %venue, seat_index, "Stood up");
            return Ok(SeatOutcome::Released {
                seat: SeatRef {
                    venue_instance_id: venue,
                    seat_index,
                },
            });
        }

        let outcome = match self
            .store
            .claim_seat(&venue, seat_index, occupant, Utc::now())
            .await?
        {
            SeatClaim::Claimed { released } => {
                tracing::debug!(%occupant, venue = %venue, seat_index, ?released, "Seat claimed");
                SeatOutcome::Claimed {
                    seat: SeatRef {
                        venue_instance_id: venue,
                        seat_index,
                    },
                    pose,
                    released,
                }
            }
            SeatClaim::Taken { by } => SeatOutcome::Taken { by },
            SeatClaim::NoSuchSeat => SeatOutcome::NoSuchSeat,
        };
        Ok(outcome)
    }

    /// Give up whatever seat `occupant` holds in `venue_instance_id`
    pub async fn release(
        &self,
        venue_instance_id: &str,
        occupant: Uuid,
    ) -> Result<Option<u32>, StoreError> {
        self.store.release_seat(venue_instance_id, occupant).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryWorldStore;
    use tokio_test::assert_ok;

    fn cinema() -> Room {
        Room::Cinema {
            instance_id: "late-show".into(),
        }
    }

    async fn manager() -> SeatReservationManager {
        let store: Arc<dyn WorldStore> = Arc::new(InMemoryWorldStore::new());
        let seats = SeatReservationManager::new(store, Arc::new(WorldLayout::standard()));
        assert_eq!(assert_ok!(seats.open(&cinema()).await), 40);
        seats
    }

    #[tokio::test]
    async fn claim_returns_the_seat_pose() {
        let seats = manager().await;
        let alice = Uuid::new_v4();

        let outcome = seats.claim(&cinema(), 9, alice).await.unwrap();
        let SeatOutcome::Claimed { seat, pose, released } = outcome else {
            panic!("expected a claim, got {outcome:?}");
        };
        assert_eq!(seat.venue_instance_id, "cinema:late-show");
        assert_eq!(seat.seat_index, 9);
        assert_eq!(released, None);

        let expected = WorldLayout::standard()
            .seat_pose(crate::world::rooms::RoomKind::Cinema, 9)
            .unwrap();
        assert_eq!(pose, expected);
    }

    #[tokio::test]
    async fn claiming_own_seat_stands_up() {
        let seats = manager().await;
        let alice = Uuid::new_v4();

        seats.claim(&cinema(), 3, alice).await.unwrap();
        let outcome = seats.claim(&cinema(), 3, alice).await.unwrap();
        assert!(matches!(outcome, SeatOutcome::Released { ref seat } if seat.seat_index == 3));

        // Free again for anyone
        let bob = Uuid::new_v4();
        assert!(matches!(
            seats.claim(&cinema(), 3, bob).await.unwrap(),
            SeatOutcome::Claimed { .. }
        ));
    }

    #[tokio::test]
    async fn moving_seats_releases_the_old_one() {
        let seats = manager().await;
        let alice = Uuid::new_v4();

        seats.claim(&cinema(), 0, alice).await.unwrap();
        let outcome = seats.claim(&cinema(), 1, alice).await.unwrap();
        assert!(matches!(outcome, SeatOutcome::Claimed { released: Some(0), .. }));
    }

    #[tokio::test]
    async fn occupied_and_missing_seats_are_rejected() {
        let seats = manager().await;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        seats.claim(&cinema(), 5, alice).await.unwrap();
        assert_eq!(
            seats.claim(&cinema(), 5, bob).await.unwrap(),
            SeatOutcome::Taken { by: Some(alice) }
        );
        assert_eq!(
            seats.claim(&cinema(), 40, bob).await.unwrap(),
            SeatOutcome::NoSuchSeat
        );
        assert!(matches!(
            seats.claim(&Room::Arcade, 0, bob).await,
            Err(SeatError::NoSeating(Room::Arcade))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_concurrent_claims_have_one_winner() {
        let seats = manager().await;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (a, b) = tokio::join!(
            {
                let seats = seats.clone();
                tokio::spawn(async move { seats.claim(&cinema(), 12, alice).await })
            },
            {
                let seats = seats.clone();
                tokio::spawn(async move { seats.claim(&cinema(), 12, bob).await })
            }
        );
        let outcomes = [a.unwrap().unwrap(), b.unwrap().unwrap()];

        let won = outcomes
            .iter()
            .filter(|o| matches!(o, SeatOutcome::Claimed { .. }))
            .count();
        let lost = outcomes
            .iter()
            .filter(|o| matches!(o, SeatOutcome::Taken { .. }))
            .count();
        assert_eq!((won, lost), (1, 1));
    }

    #[tokio::test]
    async fn release_and_close() {
        let seats = manager().await;
        let alice = Uuid::new_v4();

        seats.claim(&cinema(), 7, alice).await.unwrap();
        assert_eq!(
            seats.release("cinema:late-show", alice).await.unwrap(),
            Some(7)
        );
        assert_eq!(seats.release("cinema:late-show", alice).await.unwrap(), None);

        assert_ok!(seats.close(&cinema()).await);
        assert_eq!(
            seats.claim(&cinema(), 7, alice).await.unwrap(),
            SeatOutcome::NoSuchSeat
        );
        assert_eq!(seats.open(&Room::Disco).await.unwrap(), 0);
    }
}
