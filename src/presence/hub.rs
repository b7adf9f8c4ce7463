//! In-process presence relay
//!
//! Holds the latest snapshot of every player and fans roster syncs and
//! ephemeral actions out to subscribers. Nothing here is persisted. A player
//! stays on the roster while its last update is inside the liveness window;
//! disconnects are never signalled reliably, so expiry is the only removal
//! that matters.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::util::time::{
    is_fresh, unix_millis, ONLINE_NOW_WINDOW_MS, ROSTER_LIVENESS_MS, ROSTER_REFRESH_MS,
};

use super::protocol::{ActionEvent, PlayerSnapshot, RosterSync};

/// Coalescing period for pushed roster syncs
pub const PUSH_INTERVAL_MS: u64 = 100;

/// What a session talks to. Every call is fire-and-forget; delivery is best
/// effort and the next periodic publish supersedes anything lost.
pub trait PresenceChannel: Send + Sync {
    /// Replace this player's entry with a newer snapshot
    fn publish(&self, snapshot: PlayerSnapshot);

    /// Fan out a jump/emoji/chat event
    fn send_action(&self, event: ActionEvent);

    /// Refresh last-seen without a new snapshot
    fn heartbeat(&self, player_id: Uuid, now_ms: u64);

    /// Courtesy removal on clean exit
    fn leave(&self, player_id: Uuid);

    /// Live roster as of `now_ms` (used by the periodic refresh)
    fn roster(&self, now_ms: u64) -> RosterSync;

    /// Roster syncs pushed on state change
    fn subscribe(&self) -> broadcast::Receiver<RosterSync>;

    /// Ephemeral actions
    fn subscribe_broadcast(&self) -> broadcast::Receiver<ActionEvent>;
}

#[derive(Debug, Clone)]
struct PresenceEntry {
    snapshot: PlayerSnapshot,
    last_seen: u64,
}

pub struct PresenceHub {
    entries: DashMap<Uuid, PresenceEntry>,
    roster_tx: broadcast::Sender<RosterSync>,
    action_tx: broadcast::Sender<ActionEvent>,
    dirty: AtomicBool,
}

impl PresenceHub {
    pub fn new() -> Self {
        let (roster_tx, _) = broadcast::channel(64);
        let (action_tx, _) = broadcast::channel(256);
        Self {
            entries: DashMap::new(),
            roster_tx,
            action_tx,
            dirty: AtomicBool::new(false),
        }
    }

    fn collect(&self, now_ms: u64, window_ms: u64) -> RosterSync {
        let players = self
            .entries
            .iter()
            .filter(|entry| is_fresh(entry.last_seen, now_ms, window_ms))
            .map(|entry| (*entry.key(), entry.snapshot.clone()))
            .collect();
        RosterSync {
            players,
            timestamp: now_ms,
        }
    }

    /// Players heard from within the tight admin window
    pub fn online_now(&self, now_ms: u64) -> Vec<PlayerSnapshot> {
        let mut players: Vec<PlayerSnapshot> = self
            .collect(now_ms, ONLINE_NOW_WINDOW_MS)
            .players
            .into_values()
            .collect();
        players.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        players
    }

    pub fn live_count(&self, now_ms: u64) -> usize {
        self.entries
            .iter()
            .filter(|entry| is_fresh(entry.last_seen, now_ms, ROSTER_LIVENESS_MS))
            .count()
    }

    /// Drop entries outside the roster window. Returns how many went.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| is_fresh(entry.last_seen, now_ms, ROSTER_LIVENESS_MS));
        let dropped = before.saturating_sub(self.entries.len());
        if dropped > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        dropped
    }

    /// Push a roster sync if anything changed since the last push
    pub fn flush(&self, now_ms: u64) -> Option<RosterSync> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return None;
        }
        let sync = self.roster(now_ms);
        // No subscribers is fine
        let _ = self.roster_tx.send(sync.clone());
        Some(sync)
    }

    /// Push coalesced roster syncs and expire stale players until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Presence hub started");

        let mut push = interval(Duration::from_millis(PUSH_INTERVAL_MS));
        push.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep = interval(Duration::from_millis(ROSTER_REFRESH_MS));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = push.tick() => {
                    self.flush(unix_millis());
                }
                _ = sweep.tick() => {
                    let dropped = self.sweep(unix_millis());
                    if dropped > 0 {
                        debug!(dropped, "Expired stale players");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Presence hub stopped");
    }
}

impl Default for PresenceHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceChannel for PresenceHub {
    fn publish(&self, snapshot: PlayerSnapshot) {
        let id = snapshot.player_id;
        let seen = snapshot.timestamp;
        match self.entries.get_mut(&id) {
            Some(mut entry) => {
                // Out-of-order delivery: keep the newest
                if snapshot.timestamp < entry.snapshot.timestamp {
                    return;
                }
                entry.last_seen = entry.last_seen.max(seen);
                entry.snapshot = snapshot;
            }
            None => {
                debug!(player_id = %id, name = %snapshot.display_name, "Player appeared");
                self.entries.insert(
                    id,
                    PresenceEntry {
                        snapshot,
                        last_seen: seen,
                    },
                );
            }
        }
        self.dirty.store(true, Ordering::Release);
    }

    fn send_action(&self, event: ActionEvent) {
        let _ = self.action_tx.send(event);
    }

    fn heartbeat(&self, player_id: Uuid, now_ms: u64) {
        if let Some(mut entry) = self.entries.get_mut(&player_id) {
            entry.last_seen = entry.last_seen.max(now_ms);
        }
    }

    fn leave(&self, player_id: Uuid) {
        if self.entries.remove(&player_id).is_some() {
            debug!(player_id = %player_id, "Player left");
            self.dirty.store(true, Ordering::Release);
        }
    }

    fn roster(&self, now_ms: u64) -> RosterSync {
        self.collect(now_ms, ROSTER_LIVENESS_MS)
    }

    fn subscribe(&self) -> broadcast::Receiver<RosterSync> {
        self.roster_tx.subscribe()
    }

    fn subscribe_broadcast(&self) -> broadcast::Receiver<ActionEvent> {
        self.action_tx.subscribe()
    }
}
