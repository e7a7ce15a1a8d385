//! Transport traits

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use super::channel::{Delivery, PeerChannel};
use crate::error::Result;
use crate::protocol::Event;

/// Authority-side handle to one connected peer.
pub trait PeerLink: Send + Sync + fmt::Debug {
    /// Emit `event` with `payload` to the peer.
    ///
    /// # Errors
    ///
    /// Returns a transport error if a [`Delivery::Reliable`] frame cannot be
    /// queued. Volatile frames are dropped silently instead.
    fn emit(&self, event: Event, payload: Value, delivery: Delivery) -> Result<()>;
}

/// Peer-side factory for channels to an authority.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel to the authority at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the authority cannot be reached.
    async fn connect(&self, host: &str, port: u16) -> Result<PeerChannel>;
}
