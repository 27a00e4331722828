//! Transport selection and connection lifecycle.
//!
//! A single actor task owns every room connection. Callers talk to it
//! through [`CommsHandle`]; room callbacks feed it through an internal
//! channel, so state changes are applied in one place and in order.
//!
//! Lifecycle:
//! - `connect` supersedes any pending attempt, builds the room and spawns
//!   its `connect()` under the configured timeout.
//! - On success the new room is published before the previous one is
//!   disconnected (exactly once). Mesh transports are the exception: an
//!   older mesh connection is released before the new one connects.
//! - On failure the orchestrator ends in `Idle` with no current room and
//!   the failure recorded in [`CommsStatus::last_failure`].
//! - A disconnection of the current room clears it and records the
//!   classified reason.

pub mod gossip;
pub mod heartbeat;
pub mod state;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use commlink_core::error::{CommsError, Result};
use commlink_core::protocol::{Position, Profile};

use crate::config::CommsSection;
use crate::context::{CommsIdentity, PositionReader};
use crate::dispatch::{BusEvent, CommsEvent, CommsEventKind, DisconnectReason, DisconnectedEvent};
use crate::mesh::TopologySnapshot;
use crate::obs::CommsMetrics;
use crate::transport::{
    split_connection_string, TransportConnectors, TransportKind, TransportParams,
    TransportRegistry,
};

use gossip::{Gossip, RoomRequest};

pub use state::{CommsStatus, ConnectionPhase, CurrentRoom, Failure, FailureReason};

/// Timing knobs of the orchestrator and its duty tasks.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub heartbeat: Duration,
    pub position_min_interval: Duration,
    pub profile_announce: Duration,
    pub profile_response_min: Duration,
    pub connect_timeout: Duration,
    pub comm_radius: i32,
    pub command_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&CommsSection::default())
    }
}

impl From<&CommsSection> for OrchestratorConfig {
    fn from(s: &CommsSection) -> Self {
        Self {
            heartbeat: Duration::from_millis(s.position_heartbeat_ms),
            position_min_interval: Duration::from_millis(s.position_min_interval_ms),
            profile_announce: Duration::from_millis(s.profile_announce_ms),
            profile_response_min: Duration::from_millis(s.profile_response_min_ms),
            connect_timeout: Duration::from_millis(s.connect_timeout_ms),
            comm_radius: s.comm_radius,
            command_capacity: s.event_channel_capacity,
        }
    }
}

pub struct OrchestratorSetup {
    pub config: OrchestratorConfig,
    pub identity: CommsIdentity,
    pub registry: Arc<TransportRegistry>,
    pub connectors: TransportConnectors,
    pub metrics: Arc<CommsMetrics>,
    pub initial_position: Position,
}

/// Profile answered to peers, with the content server it refers to.
#[derive(Debug, Clone)]
pub struct LocalProfile {
    pub profile: Profile,
    pub base_url: String,
}

enum Command {
    Connect {
        connection_string: String,
        island_id: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Internal {
    ConnectFinished { id: u64, result: Result<()> },
    RoomDisconnected { id: u64, event: DisconnectedEvent },
}

/// Cloneable handle to the orchestrator actor.
#[derive(Clone)]
pub struct CommsHandle {
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<CommsStatus>,
    room_rx: watch::Receiver<Option<CurrentRoom>>,
    position_tx: Arc<watch::Sender<Position>>,
    profile_tx: Arc<watch::Sender<Option<LocalProfile>>>,
    island_tx: Arc<watch::Sender<Option<String>>>,
}

fn stopped() -> CommsError {
    CommsError::Internal("orchestrator stopped".into())
}

impl CommsHandle {
    /// Resolves once the attempt is connected, has failed, or was superseded.
    pub async fn connect(
        &self,
        connection_string: impl Into<String>,
        island_id: Option<String>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect {
                connection_string: connection_string.into(),
                island_id,
                reply,
            })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn disconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Disconnect { reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Disconnects and stops the actor.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    pub fn report_position(&self, position: Position) {
        self.position_tx.send_replace(position);
    }

    pub fn position(&self) -> Position {
        *self.position_tx.borrow()
    }

    pub fn set_profile(&self, profile: Profile, base_url: impl Into<String>) {
        self.profile_tx.send_replace(Some(LocalProfile {
            profile,
            base_url: base_url.into(),
        }));
    }

    pub fn set_island(&self, island_id: Option<String>) {
        self.island_tx.send_replace(island_id);
    }

    pub fn island(&self) -> Option<String> {
        self.island_tx.borrow().clone()
    }

    /// Latest status with the live peer count of the current room.
    pub fn status(&self) -> CommsStatus {
        let mut status = self.status_rx.borrow().clone();
        if let Some(room) = self.room_rx.borrow().as_ref() {
            status.connected_peers = room.connected_peers();
        }
        status
    }

    pub fn watch_status(&self) -> watch::Receiver<CommsStatus> {
        self.status_rx.clone()
    }

    pub fn current_room(&self) -> Option<CurrentRoom> {
        self.room_rx.borrow().clone()
    }

    pub fn watch_room(&self) -> watch::Receiver<Option<CurrentRoom>> {
        self.room_rx.clone()
    }

    pub fn debug_topology(&self) -> Option<TopologySnapshot> {
        self.current_room().map(|r| r.room.debug_topology())
    }
}

pub struct Orchestrator;

impl Orchestrator {
    /// Start the actor and its heartbeat and gossip duties.
    pub fn spawn(setup: OrchestratorSetup) -> (CommsHandle, JoinHandle<()>) {
        let OrchestratorSetup {
            config,
            identity,
            registry,
            connectors,
            metrics,
            initial_position,
        } = setup;

        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity.max(1));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(CommsStatus::default());
        let (room_tx, room_rx) = watch::channel(None);
        let (position_tx, position_rx) = watch::channel(initial_position);
        let (profile_tx, profile_rx) = watch::channel(None);
        let (island_tx, island_rx) = watch::channel(None);
        let island_tx = Arc::new(island_tx);

        let duties = vec![
            tokio::spawn(heartbeat::run(
                room_rx.clone(),
                position_rx.clone(),
                config.heartbeat,
                config.position_min_interval,
            )),
            tokio::spawn(gossip::run(
                Gossip {
                    identity: identity.clone(),
                    announce_every: config.profile_announce,
                    response_min: config.profile_response_min,
                    metrics: Arc::clone(&metrics),
                },
                room_rx.clone(),
                profile_rx,
                island_rx,
                requests_rx,
            )),
        ];

        let reader_rx = position_rx;
        let position_reader: PositionReader = Arc::new(move || *reader_rx.borrow());

        let actor = Actor {
            config,
            identity,
            registry,
            connectors,
            metrics,
            position_reader,
            island_tx: Arc::clone(&island_tx),
            status_tx,
            room_tx,
            internal_tx,
            requests_tx,
            next_id: 0,
            pending: None,
            current: None,
            mesh_owner: None,
        };
        let task = tokio::spawn(actor.run(cmd_rx, internal_rx, duties));

        let handle = CommsHandle {
            cmd_tx,
            status_rx,
            room_rx,
            position_tx: Arc::new(position_tx),
            profile_tx: Arc::new(profile_tx),
            island_tx,
        };
        (handle, task)
    }
}

struct Pending {
    room: CurrentRoom,
    reply: Option<oneshot::Sender<Result<()>>>,
    started: Instant,
    lost: Option<DisconnectReason>,
}

struct Actor {
    config: OrchestratorConfig,
    identity: CommsIdentity,
    registry: Arc<TransportRegistry>,
    connectors: TransportConnectors,
    metrics: Arc<CommsMetrics>,
    position_reader: PositionReader,
    island_tx: Arc<watch::Sender<Option<String>>>,
    status_tx: watch::Sender<CommsStatus>,
    room_tx: watch::Sender<Option<CurrentRoom>>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    requests_tx: mpsc::UnboundedSender<RoomRequest>,
    next_id: u64,
    pending: Option<Pending>,
    current: Option<CurrentRoom>,
    /// Mesh transports are exclusive; this one is live or connecting.
    mesh_owner: Option<CurrentRoom>,
}

impl Actor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
        duties: Vec<JoinHandle<()>>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Connect { connection_string, island_id, reply }) => {
                        self.start_connect(connection_string, island_id, reply).await;
                    }
                    Some(Command::Disconnect { reply }) => {
                        self.disconnect_all().await;
                        let _ = reply.send(());
                    }
                    Some(Command::Shutdown { reply }) => {
                        self.disconnect_all().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.disconnect_all().await;
                        break;
                    }
                },
                Some(internal) = internal_rx.recv() => match internal {
                    Internal::ConnectFinished { id, result } => self.finish_connect(id, result).await,
                    Internal::RoomDisconnected { id, event } => self.room_disconnected(id, event).await,
                },
            }
        }

        for duty in duties {
            duty.abort();
        }
        tracing::info!("comms orchestrator stopped");
    }

    fn set_phase(&self, phase: ConnectionPhase, protocol: Option<String>) {
        self.status_tx.send_modify(|s| {
            if s.phase != phase && !s.phase.can_transition_to(phase) {
                tracing::warn!(from = s.phase.as_str(), to = phase.as_str(), "unexpected comms transition");
            }
            tracing::debug!(from = s.phase.as_str(), to = phase.as_str(), "comms phase");
            s.phase = phase;
            s.protocol = protocol;
        });
    }

    /// Passes through `Error` and settles in `Idle`.
    fn set_failed(&self, failure: Failure) {
        tracing::warn!(
            reason = failure.reason.as_str(),
            detail = %failure.detail,
            "{}",
            failure.message
        );
        let protocol = self.status_tx.borrow().protocol.clone();
        self.set_phase(ConnectionPhase::Error, protocol);
        self.status_tx.send_modify(|s| {
            s.phase = ConnectionPhase::Idle;
            s.protocol = None;
            s.connected_peers = 0;
            s.last_failure = Some(failure);
        });
    }

    async fn start_connect(
        &mut self,
        connection_string: String,
        island_id: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    ) {
        self.next_id += 1;
        let id = self.next_id;
        self.cancel_pending().await;

        if island_id.is_some() {
            self.island_tx.send_replace(island_id.clone());
        }

        let (protocol, url) = split_connection_string(&connection_string);
        tracing::info!(protocol, attempt = id, "connecting comms");
        self.set_phase(ConnectionPhase::Establishing, Some(protocol.to_string()));

        let built = self.registry.get(protocol).and_then(|ctor| {
            let params = TransportParams {
                url: url.to_string(),
                identity: self.identity.clone(),
                position_reader: Arc::clone(&self.position_reader),
                island_id: island_id.clone().or_else(|| self.island_tx.borrow().clone()),
                comm_radius: self.config.comm_radius,
                connect_timeout: self.config.connect_timeout,
                connectors: self.connectors.clone(),
                metrics: Arc::clone(&self.metrics),
            };
            let room = ctor.build(&params)?;
            Ok(CurrentRoom {
                id,
                protocol: protocol.to_string(),
                kind: ctor.kind(),
                room,
                peers: Default::default(),
            })
        });
        let candidate = match built {
            Ok(c) => c,
            Err(e) => {
                self.metrics
                    .connect_attempts
                    .inc(&[("protocol", protocol), ("outcome", e.code().as_str())]);
                self.release_current().await;
                self.set_failed(Failure::new(FailureReason::from_error(&e), e.to_string()));
                let _ = reply.send(Err(e));
                return;
            }
        };

        self.wire_room(&candidate);

        let previous_mesh = match candidate.kind {
            TransportKind::Mesh => self.mesh_owner.replace(candidate.clone()),
            _ => None,
        };
        if let Some(old) = &previous_mesh {
            if self.current.as_ref().is_some_and(|c| c.id == old.id) {
                self.current = None;
                self.room_tx.send_replace(None);
            }
        }

        let internal = self.internal_tx.clone();
        let room = Arc::clone(&candidate.room);
        let timeout = self.config.connect_timeout;
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            if let Some(old) = previous_mesh {
                tracing::info!(protocol = %old.protocol, "releasing previous mesh connection");
                release(&old).await;
                forget_peers(&old, &metrics);
            }
            let result = match tokio::time::timeout(timeout, room.connect()).await {
                Ok(r) => r,
                Err(_) => Err(CommsError::Timeout(timeout)),
            };
            let _ = internal.send(Internal::ConnectFinished { id, result });
        });

        self.pending = Some(Pending {
            room: candidate,
            reply: Some(reply),
            started: Instant::now(),
            lost: None,
        });
    }

    /// Route the room's callbacks into the actor, the gossip duty and metrics.
    fn wire_room(&self, current: &CurrentRoom) {
        let id = current.id;
        let events = current.room.events();

        let internal = self.internal_tx.clone();
        events.subscribe(CommsEventKind::Disconnection, move |ev| {
            if let CommsEvent::Disconnection(event) = ev {
                let _ = internal.send(Internal::RoomDisconnected {
                    id,
                    event: event.clone(),
                });
            }
        });

        let requests = self.requests_tx.clone();
        events.subscribe(CommsEventKind::ProfileRequest, move |ev| {
            if let CommsEvent::ProfileRequest(request) = ev {
                let _ = requests.send((id, request.clone()));
            }
        });

        let metrics = Arc::clone(&self.metrics);
        let peers = Arc::clone(&current.peers);
        let protocol = current.protocol.clone();
        events.subscribe_all(move |ev| {
            let kind = ev.kind();
            metrics.events_received.inc(&[("event", kind.as_str())]);
            match kind {
                CommsEventKind::PeerConnected => {
                    peers.fetch_add(1, Ordering::Relaxed);
                    metrics.connected_peers.inc(&[("protocol", &protocol)]);
                }
                CommsEventKind::PeerDisconnected => {
                    let dropped = peers
                        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                        .is_ok();
                    if dropped {
                        metrics.connected_peers.dec(&[("protocol", &protocol)]);
                    }
                }
                _ => {}
            }
        });
    }

    async fn finish_connect(&mut self, id: u64, result: Result<()>) {
        if self.pending.as_ref().map(|p| p.room.id) != Some(id) {
            tracing::debug!(attempt = id, ok = result.is_ok(), "stale connection attempt finished");
            return;
        }
        let Some(mut pending) = self.pending.take() else {
            return;
        };
        let protocol = pending.room.protocol.clone();
        self.metrics
            .connect_duration
            .observe(&[("protocol", &protocol)], pending.started.elapsed());

        // the room may have dropped while connect() was still resolving
        let result = match (result, pending.lost.take()) {
            (Ok(()), Some(reason)) => Err(CommsError::transport(reason.as_str(), reason.message())),
            (result, _) => result,
        };

        match result {
            Ok(()) => {
                self.metrics
                    .connect_attempts
                    .inc(&[("protocol", &protocol), ("outcome", "ok")]);
                let previous = self.current.replace(pending.room.clone());
                self.room_tx.send_replace(Some(pending.room.clone()));
                self.set_phase(ConnectionPhase::Connected, Some(protocol.clone()));
                tracing::info!(protocol = %protocol, attempt = id, "comms connected");

                if let Some(old) = previous {
                    self.release_room(&old).await;
                }
                if let Some(reply) = pending.reply.take() {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(e) => {
                self.metrics
                    .connect_attempts
                    .inc(&[("protocol", &protocol), ("outcome", e.code().as_str())]);
                self.release_room(&pending.room).await;
                self.release_current().await;
                self.set_failed(Failure::new(FailureReason::from_error(&e), e.to_string()));
                if let Some(reply) = pending.reply.take() {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }

    async fn room_disconnected(&mut self, id: u64, event: DisconnectedEvent) {
        let reason = event.reason.unwrap_or(DisconnectReason::Requested);

        if let Some(pending) = self.pending.as_mut().filter(|p| p.room.id == id) {
            if reason != DisconnectReason::Requested {
                pending.lost = Some(reason);
            }
            return;
        }

        if self.current.as_ref().map(|c| c.id) != Some(id) {
            tracing::trace!(room = id, "disconnection of a released room");
            return;
        }
        let Some(room) = self.current.take() else {
            return;
        };
        self.room_tx.send_replace(None);
        self.metrics
            .disconnections
            .inc(&[("reason", reason.as_str())]);
        self.release_room(&room).await;

        match FailureReason::from_disconnect(&reason) {
            Some(failure) => {
                if event.kicked {
                    tracing::warn!(protocol = %room.protocol, "kicked from the comms server");
                }
                self.set_failed(Failure::new(failure, reason.message()));
            }
            None => {
                tracing::info!(protocol = %room.protocol, "comms connection closed");
                self.set_phase(ConnectionPhase::Disconnecting, Some(room.protocol.clone()));
                self.set_phase(ConnectionPhase::Idle, None);
            }
        }
    }

    async fn cancel_pending(&mut self) {
        let Some(mut pending) = self.pending.take() else {
            return;
        };
        tracing::info!(
            protocol = %pending.room.protocol,
            attempt = pending.room.id,
            "connection attempt cancelled"
        );
        self.release_room(&pending.room).await;
        if let Some(reply) = pending.reply.take() {
            let _ = reply.send(Err(CommsError::Disposed));
        }
    }

    async fn disconnect_all(&mut self) {
        let had_pending = self.pending.is_some();
        let protocol = self
            .current
            .as_ref()
            .map(|c| c.protocol.clone())
            .or_else(|| self.status_tx.borrow().protocol.clone());
        if had_pending || self.current.is_some() {
            self.set_phase(ConnectionPhase::Disconnecting, protocol);
        }
        self.cancel_pending().await;
        self.release_current().await;
        if let Some(mesh) = self.mesh_owner.take() {
            release(&mesh).await;
        }
        self.set_phase(ConnectionPhase::Idle, None);
    }

    async fn release_current(&mut self) {
        if let Some(room) = self.current.take() {
            self.room_tx.send_replace(None);
            self.release_room(&room).await;
        }
    }

    async fn release_room(&mut self, room: &CurrentRoom) {
        if self.mesh_owner.as_ref().is_some_and(|m| m.id == room.id) {
            self.mesh_owner = None;
        }
        release(room).await;
        forget_peers(room, &self.metrics);
    }
}

/// Drops a released room's peers from the gauge.
fn forget_peers(room: &CurrentRoom, metrics: &CommsMetrics) {
    let left = room.peers.swap(0, Ordering::Relaxed);
    if left > 0 {
        metrics
            .connected_peers
            .add(&[("protocol", &room.protocol)], -(left as i64));
    }
}

async fn release(room: &CurrentRoom) {
    if let Err(e) = room.room.disconnect().await {
        tracing::warn!(protocol = %room.protocol, error = %e, "disconnect failed");
    }
}
