//! One player's world session
//!
//! A session is a single task that owns all per-player state: the local
//! player, the interpolated remote roster, the room machine and the movement
//! controller. Four fixed timers drive it (movement, render, roster refresh,
//! heartbeat); commands and channel traffic arrive as messages. Nothing in the
//! loop waits on I/O. Persistence writes and seat claims run as spawned tasks
//! and seat results come back in as events. Row writes are chained so they
//! land in the order they were made.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::presence::protocol::{Action, ActionEvent, ProtocolError};
use crate::presence::PresenceChannel;
use crate::store::WorldStore;
use crate::util::time::{
    unix_millis, HEARTBEAT_MS, MOVEMENT_TICK_MS, RENDER_FRAME_MS, ROSTER_REFRESH_MS,
};

use super::collision::QualityTier;
use super::geometry::Vec3;
use super::interpolation::{Overlays, RemoteView};
use super::layout::WorldLayout;
use super::movement::{CameraView, MoveOutcome, MovementController, MovementInput};
use super::player::{AvatarDescriptor, PlayerState, PlayerStore, Role, SeatRef};
use super::rooms::{Room, RoomError, RoomKind, RoomMachine, RoomTransition};
use super::seats::{SeatError, SeatOutcome, SeatReservationManager};

/// Who the session plays as
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub player_id: Uuid,
    pub display_name: String,
    pub tier: QualityTier,
    pub avatar: AvatarDescriptor,
    pub role: Role,
}

/// Shared services a session runs against
#[derive(Clone)]
pub struct SessionDeps {
    pub channel: Arc<dyn PresenceChannel>,
    pub store: Arc<dyn WorldStore>,
    pub layout: Arc<WorldLayout>,
}

/// Player intent
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Held until replaced; the movement tick reads the latest
    Move(MovementInput),
    Camera(CameraView),
    Jump,
    Emote(String),
    Chat(String),
    EnterVenue {
        kind: RoomKind,
        instance_id: Option<String>,
    },
    LeaveVenue,
    /// Claim a seat in the current venue; claiming one's own seat stands up
    ClaimSeat { seat_index: u32 },
    StandUp,
    Disconnect,
}

/// Non-fatal outcomes worth showing the player
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    EnteredVenue(Room),
    LeftVenue,
    VenueRejected(RoomError),
    Seated(SeatRef),
    StoodUp,
    SeatTaken { seat_index: u32 },
    SeatUnavailable { seat_index: u32, reason: String },
    ActionRejected(ProtocolError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalView {
    pub player_id: Uuid,
    pub position: Vec3,
    pub rotation: f32,
    pub room: Room,
    pub seat: Option<SeatRef>,
    pub chat: Option<String>,
    pub emoji: Option<String>,
}

/// Everything a renderer needs for one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneView {
    pub frame_at: u64,
    pub local: LocalView,
    /// Remote players in the same room, sorted by id
    pub remotes: Vec<RemoteView>,
}

/// Completions of work spawned off the loop
#[derive(Debug)]
enum TaskEvent {
    SeatResult {
        room: Room,
        seat_index: u32,
        result: Result<SeatOutcome, SeatError>,
    },
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub player_id: Uuid,
    commands: mpsc::Sender<SessionCommand>,
    scene: watch::Receiver<SceneView>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionHandle {
    /// Queue a command. False once the session has ended.
    pub async fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Latest rendered frame
    pub fn scene(&self) -> SceneView {
        self.scene.borrow().clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Registry of sessions hosted by this process
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.player_id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WorldSession {
    id: Uuid,
    channel: Arc<dyn PresenceChannel>,
    store: Arc<dyn WorldStore>,
    seats: SeatReservationManager,
    layout: Arc<WorldLayout>,

    players: PlayerStore,
    rooms: RoomMachine,
    movement: MovementController,
    input: MovementInput,
    camera: CameraView,
    local_overlays: Overlays,
    seat_claim_pending: bool,
    /// Tail of the row write chain
    last_write: Option<JoinHandle<()>>,

    commands: mpsc::Receiver<SessionCommand>,
    tasks_tx: mpsc::UnboundedSender<TaskEvent>,
    tasks_rx: mpsc::UnboundedReceiver<TaskEvent>,
    scene_tx: watch::Sender<SceneView>,
    notice_tx: broadcast::Sender<SessionNotice>,
}

impl WorldSession {
    pub fn new(config: SessionConfig, deps: SessionDeps) -> (Self, SessionHandle) {
        let now = unix_millis();
        let world = deps.layout.venue(RoomKind::World);

        let mut local = PlayerState::new(config.player_id, config.display_name, world.spawn, now);
        local.set_rotation(world.spawn_rotation);
        local.avatar = config.avatar;
        local.role = config.role;

        let (command_tx, commands) = mpsc::channel(64);
        let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();
        let (notice_tx, _) = broadcast::channel(32);

        let camera = CameraView::Orbit {
            camera: Vec3::new(world.spawn.x, world.spawn.y + 4.0, world.spawn.z + 6.0),
        };
        let initial = SceneView {
            frame_at: now,
            local: LocalView {
                player_id: local.id,
                position: local.position,
                rotation: local.rotation,
                room: local.room.clone(),
                seat: None,
                chat: None,
                emoji: None,
            },
            remotes: Vec::new(),
        };
        let (scene_tx, scene_rx) = watch::channel(initial);

        let handle = SessionHandle {
            player_id: config.player_id,
            commands: command_tx,
            scene: scene_rx,
            notices: notice_tx.clone(),
        };

        let session = Self {
            id: config.player_id,
            seats: SeatReservationManager::new(deps.store.clone(), deps.layout.clone()),
            rooms: RoomMachine::new(deps.layout.clone()),
            movement: MovementController::new(deps.layout.clone(), config.tier),
            channel: deps.channel,
            store: deps.store,
            layout: deps.layout,
            players: PlayerStore::new(local),
            input: MovementInput::default(),
            camera,
            local_overlays: Overlays::default(),
            seat_claim_pending: false,
            last_write: None,
            commands,
            tasks_tx,
            tasks_rx,
            scene_tx,
            notice_tx,
        };

        (session, handle)
    }

    /// Create a session and run it on its own task
    pub fn spawn(config: SessionConfig, deps: SessionDeps) -> (SessionHandle, JoinHandle<()>) {
        let (session, handle) = Self::new(config, deps);
        (handle, tokio::spawn(session.run()))
    }

    pub fn local(&self) -> &PlayerState {
        self.players.local()
    }

    /// Run until disconnected or the channel goes away
    pub async fn run(mut self) {
        info!(player_id = %self.id, name = %self.local().display_name, "Session started");

        self.restore(unix_millis()).await;

        let mut roster_rx = self.channel.subscribe();
        let mut action_rx = self.channel.subscribe_broadcast();

        let mut movement_tick = fixed_interval(MOVEMENT_TICK_MS);
        let mut render_tick = fixed_interval(RENDER_FRAME_MS);
        let mut roster_tick = fixed_interval(ROSTER_REFRESH_MS);
        let mut heartbeat_tick = fixed_interval(HEARTBEAT_MS);

        loop {
            tokio::select! {
                _ = movement_tick.tick() => self.movement_tick(unix_millis()),
                _ = render_tick.tick() => self.render_frame(unix_millis()),
                _ = roster_tick.tick() => self.refresh_roster(unix_millis()),
                _ = heartbeat_tick.tick() => self.heartbeat(unix_millis()),
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Disconnect) | None => break,
                    Some(command) => self.handle_command(command, unix_millis()),
                },
                sync = roster_rx.recv() => match sync {
                    Ok(sync) => self.players.apply_roster(&sync),
                    // Syncs are complete sets; the next one catches up
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = action_rx.recv() => match event {
                    Ok(event) => {
                        self.players.apply_action(&event, unix_millis());
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(player_id = %self.id, lagged = n, "Missed actions");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(event) = self.tasks_rx.recv() => self.handle_task_event(event, unix_millis()),
            }
        }

        self.shutdown().await;
    }

    /// Pick up where a previous session left off
    async fn restore(&mut self, now_ms: u64) {
        match self.store.load_player(self.id).await {
            Ok(Some(row)) => {
                let name = self.local().display_name.clone();
                match PlayerState::from_row(&row, name) {
                    Ok(saved) => {
                        let position = self.rooms.restore(saved.room.clone(), saved.position);
                        let local = self.players.local_mut();
                        local.room = saved.room.clone();
                        local.teleport(position, Some(saved.rotation));
                        if let Some(venue) = saved.room.venue_instance_id() {
                            // Seats do not survive a reload
                            self.release_in_background(venue);
                            self.open_seating(&saved.room);
                        }
                        info!(player_id = %self.id, room = %saved.room, "Restored session");
                    }
                    Err(e) => {
                        warn!(player_id = %self.id, error = %e, "Ignoring unreadable saved room");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(player_id = %self.id, error = %e, "Could not load saved state");
            }
        }

        let local = self.players.local_mut();
        local.is_online = true;
        local.last_seen = now_ms;
        self.publish(now_ms);
        self.persist();
    }

    fn handle_command(&mut self, command: SessionCommand, now_ms: u64) {
        match command {
            SessionCommand::Move(input) => self.input = input,
            SessionCommand::Camera(camera) => self.camera = camera,
            SessionCommand::Jump => self.send_action(Action::Jump, now_ms),
            SessionCommand::Emote(emoji) => self.send_action(Action::Emoji { emoji }, now_ms),
            SessionCommand::Chat(text) => self.send_action(Action::Chat { text }, now_ms),
            SessionCommand::EnterVenue { kind, instance_id } => {
                self.enter_venue(kind, instance_id, now_ms)
            }
            SessionCommand::LeaveVenue => self.leave_venue(now_ms),
            SessionCommand::ClaimSeat { seat_index } => self.claim_seat(seat_index),
            SessionCommand::StandUp => self.stand_up(now_ms),
            // Handled by the run loop
            SessionCommand::Disconnect => {}
        }
    }

    fn movement_tick(&mut self, now_ms: u64) {
        let room = self.rooms.kind();
        let outcome = self.movement.step(
            self.players.local_mut(),
            room,
            &self.input,
            &self.camera,
            now_ms,
        );
        let publish = match outcome {
            MoveOutcome::Moved { publish, .. } => publish,
            // Stopped between windows: send the last step once allowed
            _ => self.movement.flush_pending(now_ms),
        };
        if publish {
            self.publish(now_ms);
            self.persist();
        }
    }

    fn render_frame(&mut self, now_ms: u64) {
        let room = self.local().room.clone();
        let remotes = self
            .players
            .render_step(now_ms)
            .into_iter()
            .filter(|view| view.room == room)
            .collect();

        self.local_overlays.sweep(now_ms);
        let local = self.players.local();
        let mut position = local.position;
        position.y += self.local_overlays.jump_offset(now_ms);

        self.scene_tx.send_replace(SceneView {
            frame_at: now_ms,
            local: LocalView {
                player_id: local.id,
                position,
                rotation: local.rotation,
                room,
                seat: local.seat.clone(),
                chat: self.local_overlays.chat.as_ref().map(|c| c.text.clone()),
                emoji: self
                    .local_overlays
                    .emoji
                    .as_ref()
                    .and_then(|e| e.payload.clone()),
            },
            remotes,
        });
    }

    fn refresh_roster(&mut self, now_ms: u64) {
        let sync = self.channel.roster(now_ms);
        self.players.apply_roster(&sync);
    }

    fn heartbeat(&mut self, now_ms: u64) {
        self.players.local_mut().last_seen = now_ms;
        self.channel.heartbeat(self.id, now_ms);

        let store = self.store.clone();
        let id = self.id;
        tokio::spawn(async move {
            if let Err(e) = store.touch_last_seen(id, Utc::now()).await {
                debug!(player_id = %id, error = %e, "Heartbeat write skipped");
            }
        });
    }

    fn send_action(&mut self, action: Action, now_ms: u64) {
        match ActionEvent::new(self.id, action, now_ms) {
            Ok(event) => {
                self.local_overlays.attach(self.id, &event.action, now_ms);
                self.channel.send_action(event);
            }
            Err(e) => self.notify(SessionNotice::ActionRejected(e)),
        }
    }

    fn enter_venue(&mut self, kind: RoomKind, instance_id: Option<String>, now_ms: u64) {
        let occupancy = match Room::venue(kind, instance_id.clone()) {
            Ok(target) => self.players.occupancy(&target),
            Err(e) => return self.notify(SessionNotice::VenueRejected(e)),
        };

        let position = self.local().position;
        match self.rooms.enter_venue(kind, instance_id, position, occupancy) {
            Ok(transition) => {
                let room = transition.to.clone();
                self.apply_transition(transition, now_ms);
                self.open_seating(&room);
                info!(player_id = %self.id, room = %room, "Entered venue");
                self.notify(SessionNotice::EnteredVenue(room));
            }
            Err(e) => {
                debug!(player_id = %self.id, error = %e, "Venue entry rejected");
                self.notify(SessionNotice::VenueRejected(e));
            }
        }
    }

    fn leave_venue(&mut self, now_ms: u64) {
        if let Some(transition) = self.rooms.leave_venue() {
            info!(player_id = %self.id, room = %transition.from, "Left venue");
            self.apply_transition(transition, now_ms);
            self.notify(SessionNotice::LeftVenue);
        }
    }

    fn apply_transition(&mut self, transition: RoomTransition, now_ms: u64) {
        if let Some(venue) = transition.vacated_venue {
            self.players.local_mut().seat = None;
            self.release_in_background(venue);
        }

        let local = self.players.local_mut();
        local.room = transition.to;
        local.teleport(transition.position, transition.rotation);

        self.movement.force_publish();
        self.publish(now_ms);
        self.persist();
    }

    fn claim_seat(&mut self, seat_index: u32) {
        if self.seat_claim_pending {
            debug!(player_id = %self.id, seat_index, "Seat claim already in flight");
            return;
        }
        self.seat_claim_pending = true;

        let room = self.local().room.clone();
        let seats = self.seats.clone();
        let tasks = self.tasks_tx.clone();
        let id = self.id;
        tokio::spawn(async move {
            let result = seats.claim(&room, seat_index, id).await;
            let _ = tasks.send(TaskEvent::SeatResult {
                room,
                seat_index,
                result,
            });
        });
    }

    fn handle_task_event(&mut self, event: TaskEvent, now_ms: u64) {
        match event {
            TaskEvent::SeatResult {
                room,
                seat_index,
                result,
            } => {
                self.seat_claim_pending = false;
                match result {
                    Ok(SeatOutcome::Claimed { seat, pose, .. }) => {
                        if self.local().room != room {
                            // Left the venue while the claim was in flight
                            self.release_in_background(seat.venue_instance_id);
                            return;
                        }
                        let local = self.players.local_mut();
                        local.seat = Some(seat.clone());
                        local.teleport(pose.position, Some(pose.rotation));
                        self.movement.force_publish();
                        self.publish(now_ms);
                        self.persist();
                        self.notify(SessionNotice::Seated(seat));
                    }
                    Ok(SeatOutcome::Released { .. }) => {
                        self.stand(now_ms);
                        self.notify(SessionNotice::StoodUp);
                    }
                    Ok(SeatOutcome::Taken { .. }) => {
                        self.notify(SessionNotice::SeatTaken { seat_index });
                    }
                    Ok(SeatOutcome::NoSuchSeat) => {
                        self.notify(SessionNotice::SeatUnavailable {
                            seat_index,
                            reason: "no such seat".to_string(),
                        });
                    }
                    Err(e) => {
                        warn!(player_id = %self.id, seat_index, error = %e, "Seat claim failed");
                        self.notify(SessionNotice::SeatUnavailable {
                            seat_index,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    fn stand_up(&mut self, now_ms: u64) {
        if let Some(seat) = self.local().seat.clone() {
            self.release_in_background(seat.venue_instance_id);
            self.stand(now_ms);
            self.notify(SessionNotice::StoodUp);
        }
    }

    /// Back on the floor of the current room
    fn stand(&mut self, now_ms: u64) {
        let floor = self.layout.venue(self.rooms.kind()).spawn.y;
        let local = self.players.local_mut();
        local.seat = None;
        local.position.y = floor;
        self.publish(now_ms);
        self.persist();
    }

    fn open_seating(&self, room: &Room) {
        let seats = self.seats.clone();
        let room = room.clone();
        tokio::spawn(async move {
            if let Err(e) = seats.open(&room).await {
                warn!(room = %room, error = %e, "Could not open seating");
            }
        });
    }

    fn release_in_background(&self, venue_instance_id: String) {
        let seats = self.seats.clone();
        let id = self.id;
        tokio::spawn(async move {
            if let Err(e) = seats.release(&venue_instance_id, id).await {
                debug!(player_id = %id, error = %e, "Seat release skipped");
            }
        });
    }

    fn publish(&mut self, now_ms: u64) {
        let local = self.players.local_mut();
        local.last_seen = now_ms;
        self.channel.publish(local.to_snapshot(now_ms));
        self.movement.mark_published();
    }

    /// Background row write queued behind the previous one; a failure is
    /// superseded by the next write
    fn persist(&mut self) {
        let store = self.store.clone();
        let row = self.local().to_row();
        let previous = self.last_write.take();
        self.last_write = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Err(e) = store.save_player(&row).await {
                debug!(player_id = %row.id, error = %e, "Position write skipped");
            }
        }));
    }

    fn notify(&self, notice: SessionNotice) {
        // Nobody listening is fine
        let _ = self.notice_tx.send(notice);
    }

    /// Leaving, disconnecting and timing out all end here
    async fn shutdown(&mut self) {
        let id = self.id;
        self.channel.leave(id);
        self.players.local_mut().is_online = false;

        if let Some(seat) = self.players.local_mut().seat.take() {
            if let Err(e) = self.seats.release(&seat.venue_instance_id, id).await {
                warn!(player_id = %id, error = %e, "Could not release seat on exit");
            }
        }
        // An online row still in flight must not land after the offline one
        if let Some(write) = self.last_write.take() {
            let _ = write.await;
        }
        if let Err(e) = self.store.save_player(&self.local().to_row()).await {
            warn!(player_id = %id, error = %e, "Could not save final position");
        }
        if let Err(e) = self.store.mark_offline(id, Utc::now()).await {
            warn!(player_id = %id, error = %e, "Could not mark player offline");
        }

        info!(player_id = %id, "Session ended");
    }
}

fn fixed_interval(period_ms: u64) -> tokio::time::Interval {
    let mut timer = interval(Duration::from_millis(period_ms));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceHub;
    use crate::store::{InMemoryWorldStore, PlayerRow};
    use crate::world::movement::KeySet;
    use tokio_test::assert_ok;

    struct Harness {
        hub: Arc<PresenceHub>,
        store: Arc<InMemoryWorldStore>,
        deps: SessionDeps,
    }

    fn harness() -> Harness {
        let hub = Arc::new(PresenceHub::new());
        let store = Arc::new(InMemoryWorldStore::new());
        let deps = SessionDeps {
            channel: hub.clone(),
            store: store.clone(),
            layout: Arc::new(WorldLayout::standard()),
        };
        Harness { hub, store, deps }
    }

    fn config(name: &str) -> SessionConfig {
        SessionConfig {
            player_id: Uuid::new_v4(),
            display_name: name.to_string(),
            tier: QualityTier::Medium,
            avatar: AvatarDescriptor::default(),
            role: Role::Member,
        }
    }

    /// Let spawned persistence tasks run
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    /// Wait for every queued row write, then for other spawned work
    async fn flush_writes(session: &mut WorldSession) {
        if let Some(write) = session.last_write.take() {
            write.await.unwrap();
        }
        settle().await;
    }

    async fn claim(session: &mut WorldSession, seat_index: u32, now_ms: u64) {
        session.claim_seat(seat_index);
        let event = session.tasks_rx.recv().await.unwrap();
        session.handle_task_event(event, now_ms);
    }

    #[tokio::test]
    async fn venue_round_trip_restores_world_position_and_persists_room() {
        let h = harness();
        let (mut session, handle) = WorldSession::new(config("ana"), h.deps.clone());
        let mut notices = handle.subscribe_notices();

        let entry = Vec3::new(-20.5, 0.0, 33.25);
        session.players.local_mut().position = entry;

        session.enter_venue(RoomKind::Cinema, Some("matinee".into()), 1_000);
        assert_eq!(
            notices.recv().await.unwrap(),
            SessionNotice::EnteredVenue(Room::Cinema {
                instance_id: "matinee".into()
            })
        );
        let spawn = h.deps.layout.venue(RoomKind::Cinema).spawn;
        assert_eq!(session.local().position, spawn);

        flush_writes(&mut session).await;
        let row = h.store.load_player(session.id).await.unwrap().unwrap();
        assert_eq!(row.current_room.as_deref(), Some("cinema:matinee"));
        // Seating was opened for the screening
        assert_eq!(h.store.seats("cinema:matinee").await.unwrap().len(), 40);

        session.input = MovementInput::joystick(1.0, 0.3, true);
        for tick in 0..20 {
            session.movement_tick(1_000 + tick * 50);
        }

        session.leave_venue(3_000);
        assert_eq!(session.local().position, entry);
        assert!(session.local().room.is_world());

        flush_writes(&mut session).await;
        let row = h.store.load_player(session.id).await.unwrap().unwrap();
        assert_eq!(row.current_room, None);
    }

    #[tokio::test]
    async fn seat_claim_teleports_and_toggles() {
        let h = harness();
        let (mut session, _handle) = WorldSession::new(config("ana"), h.deps.clone());
        session.enter_venue(RoomKind::Stadium, None, 0);
        assert_ok!(session.seats.open(&Room::Stadium).await);

        claim(&mut session, 4, 100).await;
        let pose = h.deps.layout.seat_pose(RoomKind::Stadium, 4).unwrap();
        assert_eq!(session.local().position, pose.position);
        assert_eq!(session.local().rotation, pose.rotation);
        assert!(session.local().is_seated());

        // Seated players ignore movement input
        session.input = MovementInput::from_keys(
            KeySet {
                forward: true,
                ..KeySet::default()
            },
            false,
        );
        session.movement_tick(150);
        assert_eq!(session.local().position, pose.position);

        // Claiming the same seat again stands up
        claim(&mut session, 4, 200).await;
        assert!(!session.local().is_seated());
        assert_eq!(session.local().position.y, 0.0);
        assert_eq!(h.store.seat_of("stadium", session.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn contested_seat_is_reported_as_taken() {
        let h = harness();
        let (mut ana, _a) = WorldSession::new(config("ana"), h.deps.clone());
        let (mut bo, bo_handle) = WorldSession::new(config("bo"), h.deps.clone());
        let mut bo_notices = bo_handle.subscribe_notices();

        ana.enter_venue(RoomKind::Cinema, None, 0);
        bo.enter_venue(RoomKind::Cinema, None, 0);
        assert_ok!(ana.seats.open(&ana.local().room.clone()).await);

        claim(&mut ana, 0, 10).await;
        // Drain bo's own "entered" notice
        assert!(matches!(
            bo_notices.recv().await.unwrap(),
            SessionNotice::EnteredVenue(_)
        ));
        claim(&mut bo, 0, 20).await;

        assert!(ana.local().is_seated());
        assert!(!bo.local().is_seated());
        assert_eq!(
            bo_notices.recv().await.unwrap(),
            SessionNotice::SeatTaken { seat_index: 0 }
        );
    }

    #[tokio::test]
    async fn leaving_mid_claim_gives_the_seat_back() {
        let h = harness();
        let (mut session, _handle) = WorldSession::new(config("ana"), h.deps.clone());
        session.enter_venue(RoomKind::Cinema, None, 0);
        assert_ok!(session.seats.open(&session.local().room.clone()).await);

        session.claim_seat(2);
        let event = session.tasks_rx.recv().await.unwrap();
        session.leave_venue(50);
        session.handle_task_event(event, 60);
        settle().await;

        assert!(!session.local().is_seated());
        assert_eq!(h.store.seat_of("cinema:main", session.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn movement_publishes_to_the_channel() {
        let h = harness();
        let (mut session, _handle) = WorldSession::new(config("ana"), h.deps.clone());
        session.camera = CameraView::FirstPerson { yaw: 0.0 };
        session.input = MovementInput::joystick(1.0, 0.0, false);

        let start = session.local().position;
        session.movement_tick(10_000);

        let roster = h.hub.roster(10_000);
        let published = &roster.players[&session.id];
        assert!((published.position.z - (start.z + 0.15)).abs() < 1e-5);
        assert_eq!(published.timestamp, 10_000);
    }

    #[tokio::test]
    async fn stopped_player_publishes_its_final_position() {
        let h = harness();
        let (mut session, _handle) = WorldSession::new(config("ana"), h.deps.clone());
        session.camera = CameraView::FirstPerson { yaw: 0.0 };
        session.input = MovementInput::joystick(1.0, 0.0, false);

        for tick in 0..5 {
            session.movement_tick(10_000 + tick * 50);
        }
        session.input = MovementInput::default();
        for tick in 5..205 {
            session.movement_tick(10_000 + tick * 50);
        }

        let local = session.local().position;
        let roster = h.hub.roster(20_000);
        let published = &roster.players[&session.id];
        assert_eq!(published.position, local);

        flush_writes(&mut session).await;
        let row = h.store.load_player(session.id).await.unwrap().unwrap();
        assert_eq!(row.position_z, local.z);
    }

    #[tokio::test]
    async fn shutdown_waits_for_queued_position_writes() {
        use async_trait::async_trait;
        use chrono::DateTime;
        use crate::store::{SeatClaim, SeatRow, StoreError};
        use tokio::sync::Semaphore;

        /// Holds online row writes until the test lets them through
        struct GatedStore {
            inner: InMemoryWorldStore,
            gate: Semaphore,
        }

        #[async_trait]
        impl WorldStore for GatedStore {
            fn backend(&self) -> &'static str {
                "gated"
            }
            async fn load_player(&self, id: Uuid) -> Result<Option<PlayerRow>, StoreError> {
                self.inner.load_player(id).await
            }
            async fn save_player(&self, row: &PlayerRow) -> Result<(), StoreError> {
                if row.is_online {
                    self.gate.acquire().await.unwrap().forget();
                }
                self.inner.save_player(row).await
            }
            async fn touch_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
                self.inner.touch_last_seen(id, at).await
            }
            async fn mark_offline(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
                self.inner.mark_offline(id, at).await
            }
            async fn open_venue_seats(&self, venue: &str, count: u32) -> Result<(), StoreError> {
                self.inner.open_venue_seats(venue, count).await
            }
            async fn close_venue_seats(&self, venue: &str) -> Result<(), StoreError> {
                self.inner.close_venue_seats(venue).await
            }
            async fn seats(&self, venue: &str) -> Result<Vec<SeatRow>, StoreError> {
                self.inner.seats(venue).await
            }
            async fn seat_of(&self, venue: &str, id: Uuid) -> Result<Option<u32>, StoreError> {
                self.inner.seat_of(venue, id).await
            }
            async fn claim_seat(
                &self,
                venue: &str,
                seat_index: u32,
                id: Uuid,
                at: DateTime<Utc>,
            ) -> Result<SeatClaim, StoreError> {
                self.inner.claim_seat(venue, seat_index, id, at).await
            }
            async fn release_seat(&self, venue: &str, id: Uuid) -> Result<Option<u32>, StoreError> {
                self.inner.release_seat(venue, id).await
            }
        }

        let store = Arc::new(GatedStore {
            inner: InMemoryWorldStore::new(),
            gate: Semaphore::new(0),
        });
        let deps = SessionDeps {
            channel: Arc::new(PresenceHub::new()),
            store: store.clone(),
            layout: Arc::new(WorldLayout::standard()),
        };
        let (mut session, _handle) = WorldSession::new(config("ana"), deps);
        let id = session.id;

        session.players.local_mut().is_online = true;
        session.persist();

        let task = tokio::spawn(async move { session.shutdown().await });
        settle().await;
        assert!(!task.is_finished());

        store.gate.add_permits(1);
        assert_ok!(task.await);

        let row = store.load_player(id).await.unwrap().unwrap();
        assert!(!row.is_online);
    }

    #[tokio::test]
    async fn restore_clamps_into_the_saved_room() {
        let h = harness();
        let cfg = config("ana");
        h.store
            .save_player(&PlayerRow {
                id: cfg.player_id,
                position_x: 99.0,
                position_y: 0.0,
                position_z: 2.0,
                rotation: 0.0,
                current_room: Some("disco".into()),
                is_online: false,
                last_seen: Utc::now(),
            })
            .await
            .unwrap();

        let (mut session, _handle) = WorldSession::new(cfg, h.deps.clone());
        session.restore(5_000).await;

        assert_eq!(session.local().room, Room::Disco);
        assert_eq!(session.local().position, Vec3::new(12.0, 0.0, 2.0));
        assert!(h.hub.roster(5_000).players.contains_key(&session.id));

        // No stashed world position: leaving lands on the world spawn
        session.leave_venue(6_000);
        assert_eq!(
            session.local().position,
            h.deps.layout.venue(RoomKind::World).spawn
        );
    }

    #[tokio::test]
    async fn render_shows_remotes_in_the_same_room_only() {
        let h = harness();
        let (mut ana, handle) = WorldSession::new(config("ana"), h.deps.clone());
        let (mut bo, _b) = WorldSession::new(config("bo"), h.deps.clone());
        let (mut cy, _c) = WorldSession::new(config("cy"), h.deps.clone());

        bo.publish(1_000);
        cy.enter_venue(RoomKind::Disco, None, 1_000);

        ana.refresh_roster(1_000);
        ana.render_frame(1_016);

        let scene = handle.scene();
        assert_eq!(scene.frame_at, 1_016);
        let ids: Vec<Uuid> = scene.remotes.iter().map(|r| r.player_id).collect();
        assert_eq!(ids, vec![bo.id]);
    }

    #[tokio::test]
    async fn full_venue_is_rejected_without_moving() {
        let h = harness();
        let (mut ana, handle) = WorldSession::new(config("ana"), h.deps.clone());
        let mut notices = handle.subscribe_notices();

        for i in 0..24 {
            let (mut other, _) = WorldSession::new(config(&format!("p{i}")), h.deps.clone());
            other.enter_venue(RoomKind::Arcade, None, 1_000);
        }
        ana.refresh_roster(1_000);

        let before = ana.local().position;
        ana.enter_venue(RoomKind::Arcade, None, 1_000);
        assert!(matches!(
            notices.recv().await.unwrap(),
            SessionNotice::VenueRejected(RoomError::VenueFull { capacity: 24, .. })
        ));
        assert_eq!(ana.local().position, before);
        assert!(ana.local().room.is_world());
    }

    #[tokio::test]
    async fn invalid_chat_is_rejected_locally() {
        let h = harness();
        let (mut session, handle) = WorldSession::new(config("ana"), h.deps.clone());
        let mut notices = handle.subscribe_notices();

        session.handle_command(SessionCommand::Chat("   ".into()), 0);
        assert_eq!(
            notices.recv().await.unwrap(),
            SessionNotice::ActionRejected(ProtocolError::MissingPayload)
        );

        session.handle_command(SessionCommand::Chat("hello".into()), 0);
        session.render_frame(10);
        assert_eq!(handle.scene().local.chat.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn disconnect_releases_seat_and_marks_offline() {
        let h = harness();
        let cfg = config("ana");
        let id = cfg.player_id;
        let (handle, task) = WorldSession::spawn(cfg, h.deps.clone());
        let mut notices = handle.subscribe_notices();

        assert!(
            handle
                .send(SessionCommand::EnterVenue {
                    kind: RoomKind::Cinema,
                    instance_id: None,
                })
                .await
        );
        assert!(matches!(
            notices.recv().await.unwrap(),
            SessionNotice::EnteredVenue(_)
        ));
        assert_ok!(h.store.open_venue_seats("cinema:main", 40).await);

        handle.send(SessionCommand::ClaimSeat { seat_index: 7 }).await;
        assert!(matches!(
            notices.recv().await.unwrap(),
            SessionNotice::Seated(SeatRef { seat_index: 7, .. })
        ));

        handle.send(SessionCommand::Disconnect).await;
        assert_ok!(task.await);

        assert!(handle.is_closed());
        assert_eq!(h.store.seat_of("cinema:main", id).await.unwrap(), None);
        let row = h.store.load_player(id).await.unwrap().unwrap();
        assert!(!row.is_online);
        assert!(!h.hub.roster(unix_millis()).players.contains_key(&id));
    }
}
