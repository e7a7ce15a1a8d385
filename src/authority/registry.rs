//! Authority-side bookkeeping: peers, outstanding pings and sample batches.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::oneshot;

use crate::ids::PeerId;
use crate::transport::{ConnectionId, PeerLink};

/// One registered peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Peer identity, unique within the registry
    pub peer_id: PeerId,
    /// Connection the peer registered on
    pub connection: ConnectionId,
    /// Position in registration order
    pub registration_index: u64,
    /// Smoothed round-trip time in milliseconds
    pub rtt_estimate: f64,
    /// Ping timeouts since the last answer
    pub consecutive_timeouts: u32,
    /// Missed its latest ping
    pub timed_out: bool,
    /// Exceeded the timeout budget
    pub non_responsive: bool,
    link: Option<Arc<dyn PeerLink>>,
}

impl PeerRecord {
    pub(crate) fn new(
        peer_id: PeerId,
        connection: ConnectionId,
        link: Option<Arc<dyn PeerLink>>,
        registration_index: u64,
    ) -> Self {
        Self {
            peer_id,
            connection,
            registration_index,
            rtt_estimate: 0.0,
            consecutive_timeouts: 0,
            timed_out: false,
            non_responsive: false,
            link,
        }
    }

    /// Link used to reach the peer, `None` once its connection closed.
    #[must_use]
    pub fn link(&self) -> Option<&Arc<dyn PeerLink>> {
        self.link.as_ref()
    }

    /// Whether the peer's connection is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub(crate) fn detach(&mut self) {
        self.link = None;
    }

    /// Half the smoothed RTT, the assumed one-way latency.
    #[must_use]
    pub fn one_way_latency(&self) -> f64 {
        self.rtt_estimate / 2.0
    }

    /// Answered a ping: the peer is responsive again.
    pub(crate) fn mark_responsive(&mut self) {
        self.consecutive_timeouts = 0;
        self.timed_out = false;
        self.non_responsive = false;
    }
}

/// A ping awaiting its response.
#[derive(Debug)]
pub struct PingRequest {
    /// Peer pinged
    pub peer_id: PeerId,
    /// Wall time the ping was issued, in milliseconds
    pub issued_at: i64,
    /// Restart the peer's clock once this ping resolves
    pub restart_on_completion: bool,
    done: Signal,
}

impl PingRequest {
    pub(crate) fn new(peer_id: PeerId, issued_at: i64, restart_on_completion: bool) -> (Self, Completion) {
        let (done, completion) = Signal::new();
        (
            Self {
                peer_id,
                issued_at,
                restart_on_completion,
                done,
            },
            completion,
        )
    }

    pub(crate) fn resolve(self) {
        self.done.fire();
    }
}

/// State of one peer inside a sample batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleState {
    /// `RequestTime` sent, no answer yet
    Pending,
    /// Peer answered with its clock
    Reported(i64),
}

#[derive(Debug)]
pub(crate) struct SampleEntry {
    pub(crate) state: SampleState,
    done: Signal,
}

impl SampleEntry {
    pub(crate) fn pending() -> (Self, Completion) {
        let (done, completion) = Signal::new();
        (
            Self {
                state: SampleState::Pending,
                done,
            },
            completion,
        )
    }

    /// Record a reading and release the waiter.
    pub(crate) fn report(&mut self, time: i64) {
        self.state = SampleState::Reported(time);
        self.done.fire_ref();
    }

    pub(crate) fn resolve(self) {
        self.done.fire();
    }
}

/// One round of time sampling.
#[derive(Debug)]
pub struct SampleBatch {
    /// Authority clock when the batch was issued
    pub server_time: i64,
    pub(crate) entries: BTreeMap<PeerId, SampleEntry>,
}

impl SampleBatch {
    pub(crate) fn new(server_time: i64) -> Self {
        Self {
            server_time,
            entries: BTreeMap::new(),
        }
    }

    /// Every remaining entry has reported.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.entries
            .values()
            .all(|entry| entry.state != SampleState::Pending)
    }

    /// Peers still expected to answer.
    #[must_use]
    pub fn pending_peers(&self) -> Vec<&PeerId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.state == SampleState::Pending)
            .map(|(peer_id, _)| peer_id)
            .collect()
    }

    /// Peers that reported, with their readings.
    pub fn reports(&self) -> impl Iterator<Item = (&PeerId, i64)> {
        self.entries.iter().filter_map(|(peer_id, entry)| match entry.state {
            SampleState::Reported(time) => Some((peer_id, time)),
            SampleState::Pending => None,
        })
    }

    /// Drop a peer's entry, releasing its waiter.
    pub(crate) fn purge(&mut self, peer_id: &PeerId) -> bool {
        match self.entries.remove(peer_id) {
            Some(entry) => {
                entry.resolve();
                true
            }
            None => false,
        }
    }
}

/// All coordination state owned by the authority.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    pub(crate) peers: HashMap<PeerId, PeerRecord>,
    pub(crate) pings: HashMap<String, PingRequest>,
    pub(crate) batches: HashMap<String, SampleBatch>,
    next_index: u64,
}

impl PeerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_registration_index(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    /// Look up a peer.
    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    /// Whether `peer_id` is registered.
    #[must_use]
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Peers in registration order, optionally without timed-out ones.
    #[must_use]
    pub fn ordered(&self, exclude_timed_out: bool) -> Vec<&PeerRecord> {
        let mut peers: Vec<_> = self
            .peers
            .values()
            .filter(|record| !(exclude_timed_out && record.timed_out))
            .collect();
        peers.sort_by_key(|record| record.registration_index);
        peers
    }

    /// Number of registered peers.
    #[must_use]
    pub fn peer_count(&self, exclude_timed_out: bool) -> usize {
        self.peers
            .values()
            .filter(|record| !(exclude_timed_out && record.timed_out))
            .count()
    }

    /// 0-based position of `peer_id` in registration order.
    #[must_use]
    pub fn peer_rank(&self, peer_id: &PeerId, exclude_timed_out: bool) -> Option<usize> {
        self.ordered(exclude_timed_out)
            .iter()
            .position(|record| &record.peer_id == peer_id)
    }

    /// Outstanding pings.
    #[must_use]
    pub fn pending_pings(&self) -> usize {
        self.pings.len()
    }

    /// Look up a sample batch.
    #[must_use]
    pub fn batch(&self, batch_id: &str) -> Option<&SampleBatch> {
        self.batches.get(batch_id)
    }

    /// Sample batches in flight.
    #[must_use]
    pub fn open_batches(&self) -> usize {
        self.batches.len()
    }

    /// Remove a peer and its sample entries. Returns the batches touched.
    pub(crate) fn purge_peer(&mut self, peer_id: &PeerId) -> (Option<PeerRecord>, Vec<String>) {
        let record = self.peers.remove(peer_id);
        let touched = self
            .batches
            .iter_mut()
            .filter_map(|(batch_id, batch)| batch.purge(peer_id).then(|| batch_id.clone()))
            .collect();
        (record, touched)
    }
}

/// One-shot resolution signal backing a [`Completion`].
#[derive(Debug)]
struct Signal(Option<oneshot::Sender<()>>);

impl Signal {
    fn new() -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), Completion { waiters: vec![rx] })
    }

    fn fire(mut self) {
        self.fire_ref();
    }

    fn fire_ref(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// Resolves once every member ping or sample has been answered or timed out.
///
/// Never fails: an entry purged before it resolves counts as resolved.
#[derive(Debug, Default)]
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion {
    waiters: Vec<oneshot::Receiver<()>>,
}

impl Completion {
    /// A completion that is already resolved.
    pub fn resolved() -> Self {
        Self::default()
    }

    /// Join several completions into one.
    pub fn all(parts: impl IntoIterator<Item = Completion>) -> Self {
        Self {
            waiters: parts.into_iter().flat_map(|c| c.waiters).collect(),
        }
    }

    /// Number of member entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Whether the completion has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Wait for every member.
    pub async fn wait(self) {
        join_all(self.waiters).await;
    }
}
