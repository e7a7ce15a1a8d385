//! Synchronization state machine.
//!
//! [`SyncEngine`] owns the authority clock and the [`PeerRegistry`] and is
//! driven entirely by method calls: message handlers, timeout callbacks
//! and the periodic operations. It never sleeps. Timeouts it needs are
//! queued as [`ArmedTimeout`]s for the runner to schedule, which keeps
//! the engine deterministic under a [`ManualTimeSource`](crate::clock::ManualTimeSource).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::config::AuthorityConfig;
use super::registry::{
    Completion, PeerRecord, PeerRegistry, PingRequest, SampleBatch, SampleEntry, SampleState,
};
use crate::clock::{LogicalClock, SharedTimeSource};
use crate::error::{Result, SyncError};
use crate::ids::{IdGenerator, PeerId};
use crate::protocol::{
    ACK_NOT_REGISTERED, ACK_REGISTERED, ACK_REGISTRATION_FAILED, ACK_REMOVED, Event, Heartbeat,
    Ping, RegisterPeer, RemovePeer, RequestTime, ResponseTime, RestartClock, UpdateTime,
    WireMessage,
};
use crate::transport::{ConnectionId, Delivery, PeerLink};

/// Authority lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityState {
    /// Not synchronizing; settings may change
    Inactive,
    /// Clock running and peers being synchronized
    Syncing,
}

/// A response the engine is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deadline {
    /// Ping awaiting `ping response`
    Ping {
        /// Outstanding ping
        ping_request_id: String,
    },
    /// Sample awaiting `response time`
    Sample {
        /// Sampling batch
        batch_id: String,
        /// Peer sampled
        peer_id: PeerId,
    },
}

/// Timeout the runner must deliver back through [`SyncEngine::handle_deadline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedTimeout {
    /// What timed out
    pub deadline: Deadline,
    /// Delay from now
    pub after: Duration,
}

/// Result of a completed sampling batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    /// Batch that completed
    pub batch_id: String,
    /// Consensus time
    pub average: i64,
    /// Correction sent to each reporting peer
    pub drifts: Vec<(PeerId, i64)>,
}

/// Authority-side synchronization logic.
pub struct SyncEngine {
    config: AuthorityConfig,
    state: AuthorityState,
    clock: LogicalClock,
    source: SharedTimeSource,
    ids: Arc<dyn IdGenerator>,
    registry: PeerRegistry,
    connections: HashMap<ConnectionId, Arc<dyn PeerLink>>,
    timers: Vec<ArmedTimeout>,
}

impl SyncEngine {
    /// Create an inactive engine.
    #[must_use]
    pub fn new(config: AuthorityConfig, source: SharedTimeSource, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            config,
            state: AuthorityState::Inactive,
            clock: LogicalClock::new(source.clone()),
            source,
            ids,
            registry: PeerRegistry::new(),
            connections: HashMap::new(),
            timers: Vec::new(),
        }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> AuthorityState {
        self.state
    }

    /// Peer bookkeeping.
    #[must_use]
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Current authority time.
    pub fn time(&mut self) -> i64 {
        self.clock.get_time()
    }

    /// Reset the authority clock and begin synchronizing.
    pub fn start(&mut self) {
        self.clock.restart();
        self.state = AuthorityState::Syncing;
        tracing::info!(fps = self.config.frames_per_second, "sync authority started");
    }

    /// Stop synchronizing. Peers stay registered.
    pub fn stop(&mut self) {
        self.clock.stop();
        self.state = AuthorityState::Inactive;
        tracing::info!("sync authority stopped");
    }

    /// Change the frame rate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMisuse` while syncing or for a negative rate.
    pub fn set_frames_per_second(&mut self, fps: f64) -> Result<()> {
        if self.state != AuthorityState::Inactive {
            return Err(SyncError::misuse(
                "frames per second can only change while the authority is inactive",
            ));
        }
        if !fps.is_finite() || fps < 0.0 {
            return Err(SyncError::misuse(format!(
                "frames per second must be a non-negative number, got {fps}"
            )));
        }
        self.config.frames_per_second = fps;
        Ok(())
    }

    /// Timeouts armed since the last call.
    pub fn take_timers(&mut self) -> Vec<ArmedTimeout> {
        std::mem::take(&mut self.timers)
    }

    fn arm(&mut self, deadline: Deadline) {
        self.timers.push(ArmedTimeout {
            deadline,
            after: self.config.response_timeout,
        });
    }

    // ===== Transport =====

    /// A connection opened.
    pub fn connect(&mut self, connection: ConnectionId, link: Arc<dyn PeerLink>) {
        self.connections.insert(connection, link);
    }

    /// A connection closed. Peers registered on it keep their records
    /// and fall out through the ping budget.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        self.connections.remove(&connection);
        for record in self.registry.peers.values_mut() {
            if record.connection == connection {
                record.detach();
                tracing::debug!(peer_id = %record.peer_id, %connection, "peer connection closed");
            }
        }
    }

    /// Handle an inbound frame, returning the acknowledgement text, if any.
    pub fn handle_frame(&mut self, connection: ConnectionId, event: Event, payload: &Value) -> Option<&'static str> {
        match event {
            Event::RegisterClient => {
                let result = RegisterPeer::decode(payload)
                    .and_then(|msg| self.register(msg.peer_id, connection).map(drop));
                Some(match result {
                    Ok(()) => ACK_REGISTERED,
                    Err(e) => {
                        tracing::warn!(%connection, error = %e, "registration rejected");
                        ACK_REGISTRATION_FAILED
                    }
                })
            }
            Event::RemoveClient => {
                let result = RemovePeer::decode(payload).and_then(|msg| self.remove(&msg.peer_id));
                Some(match result {
                    Ok(()) => ACK_REMOVED,
                    Err(e) => {
                        tracing::warn!(%connection, error = %e, "removal rejected");
                        ACK_NOT_REGISTERED
                    }
                })
            }
            Event::PingResponse => {
                match Ping::decode(payload) {
                    Ok(ping) => self.handle_ping_response(&ping),
                    Err(e) => tracing::warn!(%connection, error = %e, "undecodable ping response"),
                }
                None
            }
            Event::ResponseTime => {
                match ResponseTime::decode(payload) {
                    Ok(response) => {
                        self.handle_time_response(&response);
                    }
                    Err(e) => tracing::warn!(%connection, error = %e, "undecodable time response"),
                }
                None
            }
            other => {
                tracing::warn!(%connection, event = %other, "ignoring authority-bound event from a peer");
                None
            }
        }
    }

    fn emit(record: &PeerRecord, event: Event, message: &impl WireMessage, delivery: Delivery) {
        let Some(link) = record.link() else {
            tracing::trace!(peer_id = %record.peer_id, %event, "peer has no open connection");
            return;
        };
        if let Err(e) = link.emit(event, message.encode(), delivery) {
            tracing::warn!(peer_id = %record.peer_id, %event, error = %e, "emit failed");
        }
    }

    // ===== Registration =====

    /// Register a peer reachable through `connection`.
    ///
    /// Pings the peer at once; its clock is restarted when that ping
    /// resolves. The returned completion tracks the ping.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRegistration` if `peer_id` is already registered.
    pub fn register(&mut self, peer_id: PeerId, connection: ConnectionId) -> Result<Completion> {
        if self.registry.contains(&peer_id) {
            return Err(SyncError::DuplicateRegistration { peer_id });
        }
        let link = self.connections.get(&connection).cloned();
        let index = self.registry.next_registration_index();
        self.registry.peers.insert(
            peer_id.clone(),
            PeerRecord::new(peer_id.clone(), connection, link, index),
        );
        tracing::info!(%peer_id, %connection, index, "peer registered");
        self.send_ping(&peer_id, true)
    }

    /// Forget a peer and its in-flight samples.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeer` if `peer_id` is not registered.
    pub fn remove(&mut self, peer_id: &PeerId) -> Result<()> {
        if !self.registry.contains(peer_id) {
            return Err(SyncError::UnknownPeer {
                peer_id: peer_id.clone(),
            });
        }
        self.drop_peer(peer_id);
        tracing::info!(%peer_id, "peer removed");
        Ok(())
    }

    fn drop_peer(&mut self, peer_id: &PeerId) {
        let (_, touched) = self.registry.purge_peer(peer_id);
        for batch_id in touched {
            self.try_finalize(&batch_id);
        }
    }

    // ===== Round-trip estimation =====

    /// Ping every peer that has not been evicted.
    pub fn ping_all(&mut self) -> Completion {
        let targets: Vec<PeerId> = self
            .registry
            .ordered(false)
            .into_iter()
            .filter(|record| !record.non_responsive)
            .map(|record| record.peer_id.clone())
            .collect();
        Completion::all(
            targets
                .iter()
                .filter_map(|peer_id| self.send_ping(peer_id, false).ok()),
        )
    }

    /// Ping one peer.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeer` if `peer_id` is not registered.
    pub fn ping_peer(&mut self, peer_id: &PeerId) -> Result<Completion> {
        self.send_ping(peer_id, false)
    }

    fn send_ping(&mut self, peer_id: &PeerId, restart_on_completion: bool) -> Result<Completion> {
        let record = self
            .registry
            .get(peer_id)
            .ok_or_else(|| SyncError::UnknownPeer {
                peer_id: peer_id.clone(),
            })?;
        let ping_request_id = self.ids.generate_id();
        let message = Ping {
            peer_id: peer_id.clone(),
            ping_request_id: ping_request_id.clone(),
        };
        Self::emit(record, Event::PingRequest, &message, Delivery::Volatile);

        let (request, completion) =
            PingRequest::new(peer_id.clone(), self.source.now_millis(), restart_on_completion);
        self.registry.pings.insert(ping_request_id.clone(), request);
        self.arm(Deadline::Ping { ping_request_id });
        Ok(completion)
    }

    /// A peer echoed a ping.
    pub fn handle_ping_response(&mut self, ping: &Ping) {
        let Some(request) = self.registry.pings.remove(&ping.ping_request_id) else {
            // Entry already expired: the peer is back, but the RTT is stale.
            if let Some(record) = self.registry.peers.get_mut(&ping.peer_id) {
                record.mark_responsive();
                tracing::debug!(peer_id = %ping.peer_id, "late ping response");
            }
            return;
        };
        if request.peer_id != ping.peer_id {
            tracing::warn!(
                expected = %request.peer_id,
                got = %ping.peer_id,
                "ping response from the wrong peer"
            );
            self.registry
                .pings
                .insert(ping.ping_request_id.clone(), request);
            return;
        }

        let now = self.source.now_millis();
        let weight = self.config.rtt_weight;
        match self.registry.peers.get_mut(&ping.peer_id) {
            Some(record) => {
                #[allow(clippy::cast_precision_loss)]
                let rtt = (now - request.issued_at) as f64;
                record.rtt_estimate = weight * record.rtt_estimate + (1.0 - weight) * rtt;
                record.mark_responsive();
                tracing::debug!(peer_id = %ping.peer_id, rtt_ms = rtt, estimate_ms = record.rtt_estimate, "rtt updated");
            }
            None => {
                tracing::warn!(peer_id = %ping.peer_id, "ping response from unregistered peer");
            }
        }
        self.complete_ping(request);
    }

    /// A ping went unanswered.
    pub fn handle_ping_timeout(&mut self, ping_request_id: &str) {
        let Some(request) = self.registry.pings.remove(ping_request_id) else {
            return;
        };
        let threshold = self.config.eviction_threshold();
        let evict = match self.registry.peers.get_mut(&request.peer_id) {
            Some(record) => {
                record.consecutive_timeouts += 1;
                record.timed_out = true;
                tracing::debug!(
                    peer_id = %record.peer_id,
                    timeouts = record.consecutive_timeouts,
                    "ping timed out"
                );
                if threshold.is_some_and(|limit| record.consecutive_timeouts >= limit) {
                    record.non_responsive = true;
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if evict {
            tracing::warn!(peer_id = %request.peer_id, "peer non-responsive, evicting");
            self.drop_peer(&request.peer_id);
        }
        self.complete_ping(request);
    }

    fn complete_ping(&mut self, request: PingRequest) {
        let peer_id = request.peer_id.clone();
        let restart = request.restart_on_completion;
        request.resolve();
        if restart && self.registry.contains(&peer_id) {
            let _ = self.restart_peer_clock(&peer_id);
        }
    }

    // ===== Clock restarts =====

    /// Tell a peer to restart its clock at the authority time plus its
    /// one-way latency. Skipped for a timed-out peer.
    ///
    /// Returns whether the restart was sent.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeer` if `peer_id` is not registered.
    pub fn restart_peer_clock(&mut self, peer_id: &PeerId) -> Result<bool> {
        let now = self.clock.get_time();
        let record = self
            .registry
            .get(peer_id)
            .ok_or_else(|| SyncError::UnknownPeer {
                peer_id: peer_id.clone(),
            })?;
        if record.timed_out {
            tracing::debug!(%peer_id, "skipping restart of timed-out peer");
            return Ok(false);
        }
        #[allow(clippy::cast_possible_truncation)]
        let time = now + record.one_way_latency().round() as i64;
        let message = RestartClock {
            peer_id: peer_id.clone(),
            time,
            framerate: self.config.frames_per_second,
        };
        Self::emit(record, Event::RestartClock, &message, Delivery::Volatile);
        tracing::debug!(%peer_id, time, "peer clock restarted");
        Ok(true)
    }

    /// Restart every peer's clock. Returns how many restarts were sent.
    pub fn restart_all_peer_clocks(&mut self) -> usize {
        let targets: Vec<PeerId> = self
            .registry
            .ordered(true)
            .into_iter()
            .map(|record| record.peer_id.clone())
            .collect();
        targets
            .iter()
            .filter(|peer_id| matches!(self.restart_peer_clock(peer_id), Ok(true)))
            .count()
    }

    // ===== Time sampling =====

    /// Start a sampling batch over every peer that is not timed out.
    ///
    /// Returns the batch id (if any peer was sampled) and its completion.
    pub fn sample_all_times(&mut self) -> (Option<String>, Completion) {
        let targets: Vec<PeerId> = self
            .registry
            .ordered(true)
            .into_iter()
            .filter(|record| !record.non_responsive)
            .map(|record| record.peer_id.clone())
            .collect();
        if targets.is_empty() {
            return (None, Completion::resolved());
        }

        let batch_id = self.ids.generate_id();
        let mut batch = SampleBatch::new(self.clock.get_time());
        let mut parts = Vec::with_capacity(targets.len());
        for peer_id in targets {
            if let Some(record) = self.registry.get(&peer_id) {
                let message = RequestTime {
                    peer_id: peer_id.clone(),
                    request_batch_id: batch_id.clone(),
                };
                Self::emit(record, Event::RequestTime, &message, Delivery::Volatile);
            }
            let (entry, completion) = SampleEntry::pending();
            batch.entries.insert(peer_id.clone(), entry);
            parts.push(completion);
            self.arm(Deadline::Sample {
                batch_id: batch_id.clone(),
                peer_id,
            });
        }
        tracing::debug!(%batch_id, server_time = batch.server_time, peers = parts.len(), "sampling batch issued");
        self.registry.batches.insert(batch_id.clone(), batch);
        (Some(batch_id), Completion::all(parts))
    }

    /// A peer reported its clock. Returns the batch summary if this
    /// completed the batch.
    ///
    /// A not-started report restarts the peer's clock even when the batch
    /// has already closed.
    pub fn handle_time_response(&mut self, response: &ResponseTime) -> Option<BatchSummary> {
        let batch_id = &response.request_batch_id;
        let peer_id = &response.peer_id;

        if !response.is_clock_started() {
            tracing::debug!(%batch_id, %peer_id, "peer clock not started");
            let purged = self
                .registry
                .batches
                .get_mut(batch_id)
                .is_some_and(|batch| batch.purge(peer_id));
            if let Err(e) = self.restart_peer_clock(peer_id) {
                tracing::debug!(%peer_id, error = %e, "cannot restart unregistered peer");
            }
            return if purged { self.try_finalize(batch_id) } else { None };
        }

        let Some(batch) = self.registry.batches.get_mut(batch_id) else {
            tracing::debug!(%batch_id, %peer_id, "response for a closed batch");
            return None;
        };
        let Some(entry) = batch.entries.get_mut(peer_id) else {
            tracing::debug!(%batch_id, %peer_id, "response from a peer outside the batch");
            return None;
        };
        entry.report(response.time);
        self.try_finalize(batch_id)
    }

    /// A sample went unanswered. The peer is only left out of this batch.
    pub fn handle_sample_timeout(&mut self, batch_id: &str, peer_id: &PeerId) -> Option<BatchSummary> {
        let batch = self.registry.batches.get_mut(batch_id)?;
        let pending = batch
            .entries
            .get(peer_id)
            .is_some_and(|entry| entry.state == SampleState::Pending);
        if !pending {
            return None;
        }
        batch.purge(peer_id);
        tracing::debug!(%batch_id, %peer_id, "time sample timed out");
        self.try_finalize(batch_id)
    }

    fn try_finalize(&mut self, batch_id: &str) -> Option<BatchSummary> {
        if !self.registry.batch(batch_id)?.is_complete() {
            return None;
        }
        let batch = self.registry.batches.remove(batch_id)?;

        let samples: Vec<(PeerId, f64)> = batch
            .reports()
            .filter_map(|(peer_id, time)| {
                let record = self.registry.get(peer_id)?;
                #[allow(clippy::cast_precision_loss)]
                let compensated = time as f64 - record.one_way_latency();
                Some((peer_id.clone(), compensated))
            })
            .collect();
        if samples.is_empty() {
            tracing::debug!(%batch_id, "sampling batch closed without reports");
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let total = batch.server_time as f64 + samples.iter().map(|(_, t)| t).sum::<f64>();
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let average = (total / (samples.len() + 1) as f64).round() as i64;

        let mut drifts = Vec::with_capacity(samples.len());
        for (peer_id, compensated) in samples {
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            let drift = (average as f64 - compensated).round() as i64;
            if let Some(record) = self.registry.get(&peer_id) {
                let message = UpdateTime {
                    peer_id: peer_id.clone(),
                    drift,
                };
                Self::emit(record, Event::UpdateTime, &message, Delivery::Volatile);
            }
            drifts.push((peer_id, drift));
        }
        self.clock.adjust(average - batch.server_time);
        tracing::debug!(%batch_id, average, peers = drifts.len(), "sampling batch complete");

        Some(BatchSummary {
            batch_id: batch_id.to_string(),
            average,
            drifts,
        })
    }

    // ===== Heartbeat =====

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn frame_at(&self, time: i64) -> i64 {
        (time as f64 * self.config.frames_per_second / 1000.0).floor() as i64
    }

    /// Send time and frame to every peer that has not been evicted.
    /// Returns the `(time, frame)` broadcast.
    pub fn broadcast_heartbeat(&mut self) -> (i64, i64) {
        let time = self.clock.get_time();
        let frame = self.frame_at(time);
        for record in self.registry.peers.values().filter(|r| !r.non_responsive) {
            let message = Heartbeat {
                peer_id: record.peer_id.clone(),
                time,
                frame,
            };
            Self::emit(record, Event::Heartbeat, &message, Delivery::Volatile);
        }
        (time, frame)
    }

    /// Send time and frame to one peer.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeer` if `peer_id` is not registered.
    pub fn heartbeat_peer(&mut self, peer_id: &PeerId) -> Result<(i64, i64)> {
        let time = self.clock.get_time();
        let frame = self.frame_at(time);
        let record = self
            .registry
            .get(peer_id)
            .ok_or_else(|| SyncError::UnknownPeer {
                peer_id: peer_id.clone(),
            })?;
        let message = Heartbeat {
            peer_id: peer_id.clone(),
            time,
            frame,
        };
        Self::emit(record, Event::Heartbeat, &message, Delivery::Volatile);
        Ok((time, frame))
    }

    // ===== Timers =====

    /// Deliver an expired deadline.
    pub fn handle_deadline(&mut self, deadline: &Deadline) {
        match deadline {
            Deadline::Ping { ping_request_id } => self.handle_ping_timeout(ping_request_id),
            Deadline::Sample { batch_id, peer_id } => {
                self.handle_sample_timeout(batch_id, peer_id);
            }
        }
    }

    // ===== Queries =====

    /// Number of registered peers.
    #[must_use]
    pub fn peer_count(&self, exclude_timed_out: bool) -> usize {
        self.registry.peer_count(exclude_timed_out)
    }

    /// 0-based registration-order position of `peer_id`.
    #[must_use]
    pub fn peer_rank(&self, peer_id: &PeerId, exclude_timed_out: bool) -> Option<usize> {
        self.registry.peer_rank(peer_id, exclude_timed_out)
    }

    /// Snapshot of every peer in registration order.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.registry.ordered(false).into_iter().cloned().collect()
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state)
            .field("clock", &self.clock)
            .field("peers", &self.registry.peers.len())
            .field("pings", &self.registry.pings.len())
            .field("batches", &self.registry.batches.len())
            .finish_non_exhaustive()
    }
}
