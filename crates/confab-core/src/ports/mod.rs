//! Capability port traits.
//!
//! The session runtime depends on these traits, never on concrete
//! transports or audio backends. Implementations live in sibling crates
//! (`confab-transport`) or in the embedding application (players).

mod player;
mod transport;

pub use player::Player;
pub use transport::{TransportConnector, TransportSession};
