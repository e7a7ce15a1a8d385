//! The synchronization authority.
//!
//! One authority coordinates every peer:
//!
//! 1. **Registration**: a peer registers, is pinged, and has its clock
//!    restarted at the authority time plus half its RTT.
//! 2. **RTT estimation**: every peer is pinged periodically; the estimate
//!    is smoothed as `w * old + (1 - w) * rtt`. Consecutive timeouts past
//!    the budget evict the peer.
//! 3. **Sampling**: each peer reports its clock; the authority averages
//!    the RTT-compensated samples with its own and pushes each peer the
//!    difference as a drift.
//! 4. **Heartbeat**: time and frame are broadcast periodically.
//!
//! [`SyncEngine`] holds the logic; [`SyncAuthority`] runs it on a tokio
//! task driven by an [`AuthorityHandle`].

mod config;
mod engine;
mod registry;
mod server;


pub use config::{AuthorityConfig, AuthorityConfigBuilder};
pub use engine::{ArmedTimeout, AuthorityState, BatchSummary, Deadline, SyncEngine};
pub use registry::{Completion, PeerRecord, PeerRegistry, PingRequest, SampleBatch, SampleState};
pub use server::{AuthorityHandle, Driver, SyncAuthority};
