//! # screensync
//!
//! Logical clocks and frame counters kept in step across networked peers.
//!
//! ## Features
//!
//! - Drift-correctable logical clock that never reads backwards
//! - RTT estimation with timeout-based eviction
//! - Batch clock sampling and averaged drift correction
//! - Frame heartbeats with local extrapolation between them
//! - In-memory and TCP transports
//!
//! ## Example
//!
//! ```rust,no_run
//! use screensync::authority::{AuthorityConfig, SyncAuthority};
//! use screensync::peer::{PeerClient, PeerConfig};
//! use screensync::transport::tcp::TcpConnector;
//!
//! # async fn example() -> screensync::Result<()> {
//! let config = AuthorityConfig::builder().port(9000).build()?;
//! let authority = SyncAuthority::new(config).listen().await?;
//! authority.start().await?;
//!
//! let peer = PeerClient::connect(PeerConfig::builder("wall-1").port(9000).build(), &TcpConnector)
//!     .await?;
//! peer.register().await?;
//! let frame = peer.frame().await;
//! # let _ = frame;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Authority**: [`SyncAuthority`] runs a [`SyncEngine`](authority::SyncEngine)
//!   on a tokio task
//! - **Peer**: [`PeerClient`] drives a [`PeerAgent`] over a [`Connector`](transport::Connector)
//! - **Low-level**: [`LogicalClock`], protocol messages and transports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod authority;
pub mod clock;
/// Error types
pub mod error;
pub mod ids;
pub mod peer;
pub mod protocol;
pub mod transport;

/// Testing utilities
pub mod testing;

// Re-exports
pub use authority::{AuthorityConfig, AuthorityHandle, AuthorityState, Driver, SyncAuthority};
pub use clock::{LogicalClock, ManualTimeSource, TimeSource};
pub use error::{Result, SyncError};
pub use ids::PeerId;
pub use peer::{PeerAgent, PeerClient, PeerConfig, PeerEvent};
pub use protocol::{Event, Message};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
///
/// Convenient re-exports
pub mod prelude {
    pub use crate::{
        AuthorityConfig, AuthorityHandle, Driver, LogicalClock, PeerClient, PeerConfig, PeerEvent,
        PeerId, SyncAuthority, SyncError,
    };
}
