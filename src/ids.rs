//! Peer and request identifiers

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

/// Unique identifier of a peer, supplied by the peer itself
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Create from string
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Source of collision-free identifiers for ping requests and sample batches
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Produce a fresh identifier
    fn generate_id(&self) -> String;
}

/// Random 128-bit identifiers rendered as hex
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate_id(&self) -> String {
        let id: u128 = rand::thread_rng().r#gen();
        format!("{id:032x}")
    }
}

/// Deterministic `prefix-N` identifiers, handy in tests and logs
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdGenerator {
    /// Create a generator whose first id is `prefix-1`
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }
}
