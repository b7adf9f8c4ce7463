//! Presence: wire protocol, in-process relay hub and its WebSocket bridge

pub mod handler;
pub mod hub;
pub mod protocol;

pub use hub::{PresenceChannel, PresenceHub};
pub use protocol::{PlayerSnapshot, RosterSync};
