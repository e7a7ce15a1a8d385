//! Peer side of the protocol.
//!
//! A [`PeerAgent`] owns the peer's [`LogicalClock`](crate::clock::LogicalClock)
//! and reacts to the authority:
//!
//! | Event          | Reaction                                    |
//! |----------------|---------------------------------------------|
//! | `ping request` | echo the ping                               |
//! | `restart clock`| reset, set time, start, adopt frame rate    |
//! | `request time` | reply with local time, or -1 if not started |
//! | `update time`  | queue the drift on the clock                |
//! | `heartbeat`    | remember time and frame                     |
//!
//! Between heartbeats the frame is extrapolated from the local clock:
//! `frame = last_frame + floor((time - last_time) * framerate / 1000)`.

mod agent;
mod client;
mod config;
mod events;

#[cfg(test)]
mod tests;

pub use agent::{DEFAULT_FRAMERATE, PeerAgent};
pub use client::PeerClient;
pub use config::{PeerConfig, PeerConfigBuilder};
pub use events::{EventBus, PeerEvent};
