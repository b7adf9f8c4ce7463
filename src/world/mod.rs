//! World simulation: layout, movement, rooms, seats and the per-player session

pub mod bot;
pub mod collision;
pub mod geometry;
pub mod interpolation;
pub mod layout;
pub mod movement;
pub mod player;
pub mod rooms;
pub mod seats;
pub mod session;

pub use collision::QualityTier;
pub use layout::WorldLayout;
pub use session::{SessionDeps, SessionRegistry};
