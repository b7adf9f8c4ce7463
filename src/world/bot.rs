//! Headless demo players
//!
//! Each bot is an ordinary [`WorldSession`] driven by a seeded brain instead
//! of a keyboard. They keep the plaza populated and put the whole client
//! engine (movement, venues, seats, actions, interpolation) under load.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::collision::QualityTier;
use super::layout::WorldLayout;
use super::movement::{CameraView, MovementInput};
use super::player::{AvatarDescriptor, Role};
use super::rooms::RoomKind;
use super::session::{
    SceneView, SessionCommand, SessionConfig, SessionDeps, SessionRegistry, WorldSession,
};

/// Random pause between decisions
const THINK_DELAY_MIN_MS: u64 = 1_500;
const THINK_DELAY_MAX_MS: u64 = 6_000;

const EMOTES: [&str; 6] = ["👋", "😂", "🎉", "❤️", "👍", "🔥"];
const CHATTER: [&str; 6] = [
    "hey all",
    "anyone seen the new film?",
    "race you to the fountain",
    "nice fit",
    "brb",
    "this place is packed",
];
const VENUES: [RoomKind; 4] = [
    RoomKind::Cinema,
    RoomKind::Arcade,
    RoomKind::Stadium,
    RoomKind::Disco,
];

/// Picks what a bot does next from what its session last rendered
pub struct BotBrain {
    rng: ChaCha8Rng,
    layout: Arc<WorldLayout>,
}

impl BotBrain {
    pub fn new(seed: u64, layout: Arc<WorldLayout>) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            layout,
        }
    }

    pub fn next_delay_ms(&mut self) -> u64 {
        self.rng.gen_range(THINK_DELAY_MIN_MS..=THINK_DELAY_MAX_MS)
    }

    pub fn decide(&mut self, scene: &SceneView) -> Vec<SessionCommand> {
        let local = &scene.local;
        let roll = self.rng.gen_range(0..100);

        if local.seat.is_some() {
            // Mostly sit through the show
            return if roll < 25 {
                vec![SessionCommand::StandUp]
            } else if roll < 35 {
                vec![self.emote()]
            } else {
                Vec::new()
            };
        }

        match roll {
            0..=44 => self.wander(),
            45..=54 => vec![SessionCommand::Move(MovementInput::default())],
            55..=62 => vec![SessionCommand::Jump],
            63..=69 => vec![self.emote()],
            70..=74 => {
                let line = CHATTER[self.rng.gen_range(0..CHATTER.len())];
                vec![SessionCommand::Chat(line.to_string())]
            }
            75..=84 if local.room.is_world() => {
                let kind = VENUES[self.rng.gen_range(0..VENUES.len())];
                vec![
                    SessionCommand::Move(MovementInput::default()),
                    SessionCommand::EnterVenue {
                        kind,
                        instance_id: None,
                    },
                ]
            }
            75..=84 => vec![SessionCommand::LeaveVenue],
            _ => {
                let seats = self.layout.seat_count(local.room.kind());
                if seats > 0 {
                    vec![
                        SessionCommand::Move(MovementInput::default()),
                        SessionCommand::ClaimSeat {
                            seat_index: self.rng.gen_range(0..seats),
                        },
                    ]
                } else {
                    self.wander()
                }
            }
        }
    }

    fn wander(&mut self) -> Vec<SessionCommand> {
        let input = MovementInput::joystick(
            self.rng.gen_range(0.3..=1.0),
            self.rng.gen_range(-0.5..=0.5),
            self.rng.gen_bool(0.2),
        );
        let yaw = self.rng.gen_range(-PI..PI);
        vec![
            SessionCommand::Camera(CameraView::FirstPerson { yaw }),
            SessionCommand::Move(input),
        ]
    }

    fn emote(&mut self) -> SessionCommand {
        SessionCommand::Emote(EMOTES[self.rng.gen_range(0..EMOTES.len())].to_string())
    }
}

/// Start `count` bot sessions. Each task ends (after its session has cleaned
/// up) once `shutdown` flips.
pub fn spawn_bots(
    count: usize,
    seed: u64,
    tier: QualityTier,
    deps: SessionDeps,
    registry: Arc<SessionRegistry>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut ids = ChaCha8Rng::seed_from_u64(seed);

    (0..count)
        .map(|i| {
            let player_id = uuid::Builder::from_random_bytes(ids.gen()).into_uuid();
            let config = SessionConfig {
                player_id,
                display_name: format!("Bot {:02}", i + 1),
                tier,
                avatar: AvatarDescriptor::default(),
                role: Role::Member,
            };
            let brain = BotBrain::new(seed.wrapping_add(i as u64 + 1), deps.layout.clone());
            tokio::spawn(run_bot(
                config,
                deps.clone(),
                brain,
                registry.clone(),
                shutdown.clone(),
            ))
        })
        .collect()
}

async fn run_bot(
    config: SessionConfig,
    deps: SessionDeps,
    mut brain: BotBrain,
    registry: Arc<SessionRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = config.display_name.clone();
    let (handle, session) = WorldSession::spawn(config, deps);
    let player_id: Uuid = handle.player_id;
    registry.insert(handle.clone());
    info!(player_id = %player_id, name = %name, "Bot joined");

    'think: loop {
        let delay = Duration::from_millis(brain.next_delay_ms());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }

        for command in brain.decide(&handle.scene()) {
            debug!(player_id = %player_id, ?command, "Bot command");
            if !handle.send(command).await {
                break 'think;
            }
        }
    }

    handle.send(SessionCommand::Disconnect).await;
    let _ = session.await;
    registry.remove(&player_id);
    info!(player_id = %player_id, name = %name, "Bot left");
}
