//! Authority runner task and its control handle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::time::DelayQueue;

use super::config::AuthorityConfig;
use super::engine::{AuthorityState, Deadline, SyncEngine};
use super::registry::{Completion, PeerRecord};
use crate::clock::{SharedTimeSource, TokioTimeSource};
use crate::error::{Result, SyncError};
use crate::ids::{IdGenerator, PeerId, RandomIdGenerator};
use crate::transport::TransportEvent;

/// The three periodic loops of the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Driver {
    /// RTT estimation (`ping_all`)
    Ping,
    /// Time sampling (`sample_all_times`)
    Sampling,
    /// Heartbeat broadcast
    Heartbeat,
}

impl Driver {
    /// Every driver.
    pub const ALL: [Driver; 3] = [Driver::Ping, Driver::Sampling, Driver::Heartbeat];
}

type Reply<T> = oneshot::Sender<T>;

/// Commands sent from an [`AuthorityHandle`] to the runner task
#[derive(Debug)]
enum Command {
    Start(Reply<Result<()>>),
    Stop(Reply<()>),
    StartDriver(Driver, Reply<Result<()>>),
    StopDriver(Driver, Reply<()>),
    SetDriverInterval(Driver, Duration, Reply<Result<()>>),
    IsDriverRunning(Driver, Reply<bool>),
    SetFramesPerSecond(f64, Reply<Result<()>>),
    State(Reply<AuthorityState>),
    Time(Reply<i64>),
    PingAll(Reply<Completion>),
    PingPeer(PeerId, Reply<Result<Completion>>),
    SampleAllTimes(Reply<Completion>),
    BroadcastHeartbeat(Reply<(i64, i64)>),
    HeartbeatPeer(PeerId, Reply<Result<(i64, i64)>>),
    RestartPeerClock(PeerId, Reply<Result<bool>>),
    RestartAllPeerClocks(Reply<usize>),
    Remove(PeerId, Reply<Result<()>>),
    PeerCount(bool, Reply<usize>),
    PeerRank(PeerId, bool, Reply<Option<usize>>),
    Peers(Reply<Vec<PeerRecord>>),
    Shutdown,
}

/// Factory for the authority task.
///
/// ```no_run
/// # async fn run() -> screensync::Result<()> {
/// use screensync::authority::{AuthorityConfig, SyncAuthority};
///
/// let handle = SyncAuthority::new(AuthorityConfig::default()).listen().await?;
/// handle.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SyncAuthority {
    config: AuthorityConfig,
    source: Option<SharedTimeSource>,
    ids: Arc<dyn IdGenerator>,
}

impl SyncAuthority {
    /// Create an authority with the tokio clock and random ids.
    #[must_use]
    pub fn new(config: AuthorityConfig) -> Self {
        Self {
            config,
            source: None,
            ids: Arc::new(RandomIdGenerator),
        }
    }

    /// Use `source` as the authority's wall clock.
    #[must_use]
    pub fn with_time_source(mut self, source: SharedTimeSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Use `ids` for ping and batch identifiers.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Spawn the authority task on an existing transport.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMisuse` if the configuration is invalid.
    pub fn spawn(self, transport: mpsc::Receiver<TransportEvent>) -> Result<AuthorityHandle> {
        self.spawn_inner(transport, None)
    }

    /// Listen for TCP peers on the configured port and spawn the authority.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMisuse` for an invalid configuration or an I/O
    /// error if the port cannot be bound.
    #[cfg(feature = "tcp")]
    pub async fn listen(self) -> Result<AuthorityHandle> {
        self.config.validate()?;
        let server = crate::transport::tcp::TcpServer::bind("0.0.0.0", self.config.port).await?;
        let local_addr = server.local_addr();
        self.spawn_inner(server.into_events(), Some(local_addr))
    }

    fn spawn_inner(
        self,
        transport: mpsc::Receiver<TransportEvent>,
        local_addr: Option<SocketAddr>,
    ) -> Result<AuthorityHandle> {
        self.config.validate()?;
        let source = self.source.unwrap_or_else(TokioTimeSource::shared);
        let periods = Periods::from(&self.config);
        let engine = SyncEngine::new(self.config, source, self.ids);

        let (commands, command_rx) = mpsc::channel(32);
        let runner = Runner {
            engine,
            periods,
            ping: None,
            sampling: None,
            heartbeat: None,
            deadlines: DelayQueue::new(),
        };
        tokio::spawn(runner.run(command_rx, transport));

        Ok(AuthorityHandle {
            commands,
            local_addr,
        })
    }
}

/// Cloneable control handle to a running authority.
#[derive(Debug, Clone)]
pub struct AuthorityHandle {
    commands: mpsc::Sender<Command>,
    local_addr: Option<SocketAddr>,
}

impl AuthorityHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SyncError::AuthorityStopped)?;
        rx.await.map_err(|_| SyncError::AuthorityStopped)
    }

    /// Address the TCP listener is bound to, if the authority listens.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Reset the authority clock and start every periodic driver.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMisuse` if already syncing, or
    /// `AuthorityStopped` if the task is gone.
    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await?
    }

    /// Stop every driver and return to inactive.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityStopped` if the task is gone.
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Start one periodic driver.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMisuse` if it is already running.
    pub async fn start_driver(&self, driver: Driver) -> Result<()> {
        self.request(|tx| Command::StartDriver(driver, tx)).await?
    }

    /// Stop one periodic driver. In-flight timeouts still fire.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityStopped` if the task is gone.
    pub async fn stop_driver(&self, driver: Driver) -> Result<()> {
        self.request(|tx| Command::StopDriver(driver, tx)).await
    }

    /// Change a driver's period.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMisuse` while the driver runs or for a zero period.
    pub async fn set_driver_interval(&self, driver: Driver, period: Duration) -> Result<()> {
        self.request(|tx| Command::SetDriverInterval(driver, period, tx))
            .await?
    }

    /// Whether a driver is running.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityStopped` if the task is gone.
    pub async fn is_driver_running(&self, driver: Driver) -> Result<bool> {
        self.request(|tx| Command::IsDriverRunning(driver, tx)).await
    }

    /// Change the frame rate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMisuse` unless the authority is inactive.
    pub async fn set_frames_per_second(&self, fps: f64) -> Result<()> {
        self.request(|tx| Command::SetFramesPerSecond(fps, tx))
            .await?
    }

    /// Lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityStopped` if the task is gone.
    pub async fn state(&self) -> Result<AuthorityState> {
        self.request(Command::State).await
    }

    /// Current authority time in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityStopped` if the task is gone.
    pub async fn time(&self) -> Result<i64> {
        self.request(Command::Time).await
    }

    /// Ping every peer and wait until each ping is answered or timed out.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityStopped` if the task is gone.
    pub async fn ping_all(&self) -> Result<()> {
        self.request(Command::PingAll).await?.wait().await;
        Ok(())
    }

    /// Ping one peer and wait for the answer or the timeout.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeer` if the peer is not registered.
    pub async fn ping_peer(&self, peer_id: impl Into<PeerId>) -> Result<()> {
        let peer_id = peer_id.into();
        self.request(|tx| Command::PingPeer(peer_id, tx))
            .await??
            .wait()
            .await;
        Ok(())
    }

    /// Run one sampling batch and wait until every peer answered or timed out.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityStopped` if the task is gone.
    pub async fn sample_all_times(&self) -> Result<()> {
        self.request(Command::SampleAllTimes).await?.wait().await;
        Ok(())
    }

    /// Broadcast a heartbeat; returns the `(time, frame)` sent.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityStopped` if the task is gone.
    pub async fn broadcast_heartbeat(&self) -> Result<(i64, i64)> {
        self.request(Command::BroadcastHeartbeat).await
    }

    /// Send a heartbeat to one peer.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeer` if the peer is not registered.
    pub async fn heartbeat_peer(&self, peer_id: impl Into<PeerId>) -> Result<(i64, i64)> {
        let peer_id = peer_id.into();
        self.request(|tx| Command::HeartbeatPeer(peer_id, tx))
            .await?
    }

    /// Restart one peer's clock; `false` if skipped because it timed out.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeer` if the peer is not registered.
    pub async fn restart_peer_clock(&self, peer_id: impl Into<PeerId>) -> Result<bool> {
        let peer_id = peer_id.into();
        self.request(|tx| Command::RestartPeerClock(peer_id, tx))
            .await?
    }

    /// Restart every responsive peer's clock.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityStopped` if the task is gone.
    pub async fn restart_all_peer_clocks(&self) -> Result<usize> {
        self.request(Command::RestartAllPeerClocks).await
    }

    /// Remove a peer on behalf of the application.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeer` if the peer is not registered.
    pub async fn remove(&self, peer_id: impl Into<PeerId>) -> Result<()> {
        let peer_id = peer_id.into();
        self.request(|tx| Command::Remove(peer_id, tx)).await?
    }

    /// Number of registered peers.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityStopped` if the task is gone.
    pub async fn peer_count(&self, exclude_timed_out: bool) -> Result<usize> {
        self.request(|tx| Command::PeerCount(exclude_timed_out, tx))
            .await
    }

    /// 0-based registration-order position of a peer.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityStopped` if the task is gone.
    pub async fn peer_rank(
        &self,
        peer_id: impl Into<PeerId>,
        exclude_timed_out: bool,
    ) -> Result<Option<usize>> {
        let peer_id = peer_id.into();
        self.request(|tx| Command::PeerRank(peer_id, exclude_timed_out, tx))
            .await
    }

    /// Snapshot of every registered peer.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityStopped` if the task is gone.
    pub async fn peers(&self) -> Result<Vec<PeerRecord>> {
        self.request(Command::Peers).await
    }

    /// Stop the authority task.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

#[derive(Debug, Clone, Copy)]
struct Periods {
    ping: Duration,
    sampling: Duration,
    heartbeat: Duration,
}

impl From<&AuthorityConfig> for Periods {
    fn from(config: &AuthorityConfig) -> Self {
        Self {
            ping: config.ping_interval,
            sampling: config.sample_interval,
            heartbeat: config.heartbeat_interval,
        }
    }
}

struct Runner {
    engine: SyncEngine,
    periods: Periods,
    ping: Option<Interval>,
    sampling: Option<Interval>,
    heartbeat: Option<Interval>,
    deadlines: DelayQueue<Deadline>,
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl Runner {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut transport: mpsc::Receiver<TransportEvent>,
    ) {
        let mut transport_open = true;
        loop {
            for armed in self.engine.take_timers() {
                self.deadlines.insert(armed.deadline, armed.after);
            }

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                event = transport.recv(), if transport_open => match event {
                    Some(event) => self.handle_transport(event),
                    None => {
                        tracing::debug!("transport closed");
                        transport_open = false;
                    }
                },
                Some(expired) = self.deadlines.next(), if !self.deadlines.is_empty() => {
                    self.engine.handle_deadline(expired.get_ref());
                }
                () = tick(&mut self.ping) => {
                    let _ = self.engine.ping_all();
                }
                () = tick(&mut self.sampling) => {
                    let _ = self.engine.sample_all_times();
                }
                () = tick(&mut self.heartbeat) => {
                    self.engine.broadcast_heartbeat();
                }
            }
        }
        tracing::info!("sync authority task exiting");
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { connection, link } => {
                tracing::debug!(%connection, "peer connection opened");
                self.engine.connect(connection, link);
            }
            TransportEvent::Received {
                connection,
                event,
                payload,
                ack,
            } => {
                let reply = self.engine.handle_frame(connection, event, &payload);
                if let (Some(ack), Some(text)) = (ack, reply) {
                    ack.reply(text);
                }
            }
            TransportEvent::Disconnected { connection } => {
                self.engine.disconnect(connection);
            }
        }
    }

    fn timer(&mut self, driver: Driver) -> &mut Option<Interval> {
        match driver {
            Driver::Ping => &mut self.ping,
            Driver::Sampling => &mut self.sampling,
            Driver::Heartbeat => &mut self.heartbeat,
        }
    }

    fn period(&mut self, driver: Driver) -> &mut Duration {
        match driver {
            Driver::Ping => &mut self.periods.ping,
            Driver::Sampling => &mut self.periods.sampling,
            Driver::Heartbeat => &mut self.periods.heartbeat,
        }
    }

    fn start_driver(&mut self, driver: Driver) -> Result<()> {
        if self.timer(driver).is_some() {
            return Err(SyncError::misuse(format!("{driver:?} driver is already running")));
        }
        let period = *self.period(driver);
        *self.timer(driver) = Some(interval(period));
        tracing::debug!(?driver, period_ms = period.as_millis(), "driver started");
        Ok(())
    }

    fn stop_driver(&mut self, driver: Driver) {
        if self.timer(driver).take().is_some() {
            tracing::debug!(?driver, "driver stopped");
        }
    }

    fn set_driver_interval(&mut self, driver: Driver, period: Duration) -> Result<()> {
        if self.timer(driver).is_some() {
            return Err(SyncError::misuse(format!(
                "{driver:?} interval cannot change while the driver runs"
            )));
        }
        if period.is_zero() {
            return Err(SyncError::misuse("driver interval must be non-zero"));
        }
        *self.period(driver) = period;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.engine.state() == AuthorityState::Syncing {
            return Err(SyncError::misuse("authority is already running"));
        }
        self.engine.start();
        for driver in Driver::ALL {
            if self.timer(driver).is_none() {
                self.start_driver(driver)?;
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        for driver in Driver::ALL {
            self.stop_driver(driver);
        }
        self.engine.stop();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(tx) => {
                let _ = tx.send(self.start());
            }
            Command::Stop(tx) => {
                self.stop();
                let _ = tx.send(());
            }
            Command::StartDriver(driver, tx) => {
                let _ = tx.send(self.start_driver(driver));
            }
            Command::StopDriver(driver, tx) => {
                self.stop_driver(driver);
                let _ = tx.send(());
            }
            Command::SetDriverInterval(driver, period, tx) => {
                let _ = tx.send(self.set_driver_interval(driver, period));
            }
            Command::IsDriverRunning(driver, tx) => {
                let _ = tx.send(self.timer(driver).is_some());
            }
            Command::SetFramesPerSecond(fps, tx) => {
                let _ = tx.send(self.engine.set_frames_per_second(fps));
            }
            Command::State(tx) => {
                let _ = tx.send(self.engine.state());
            }
            Command::Time(tx) => {
                let _ = tx.send(self.engine.time());
            }
            Command::PingAll(tx) => {
                let _ = tx.send(self.engine.ping_all());
            }
            Command::PingPeer(peer_id, tx) => {
                let _ = tx.send(self.engine.ping_peer(&peer_id));
            }
            Command::SampleAllTimes(tx) => {
                let (_, completion) = self.engine.sample_all_times();
                let _ = tx.send(completion);
            }
            Command::BroadcastHeartbeat(tx) => {
                let _ = tx.send(self.engine.broadcast_heartbeat());
            }
            Command::HeartbeatPeer(peer_id, tx) => {
                let _ = tx.send(self.engine.heartbeat_peer(&peer_id));
            }
            Command::RestartPeerClock(peer_id, tx) => {
                let _ = tx.send(self.engine.restart_peer_clock(&peer_id));
            }
            Command::RestartAllPeerClocks(tx) => {
                let _ = tx.send(self.engine.restart_all_peer_clocks());
            }
            Command::Remove(peer_id, tx) => {
                let _ = tx.send(self.engine.remove(&peer_id));
            }
            Command::PeerCount(exclude_timed_out, tx) => {
                let _ = tx.send(self.engine.peer_count(exclude_timed_out));
            }
            Command::PeerRank(peer_id, exclude_timed_out, tx) => {
                let _ = tx.send(self.engine.peer_rank(&peer_id, exclude_timed_out));
            }
            Command::Peers(tx) => {
                let _ = tx.send(self.engine.peers());
            }
            Command::Shutdown => {}
        }
    }
}
