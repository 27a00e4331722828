//! Synthetic room: fabricates moving peers for load tests, no network.
//!
//! Connection string: `simulator:?peers=N&random=R&speed=S&distance=D&position=x,z`.
//! Peers orbit the local position (or the given parcel), emitting a position
//! every tick and, now and then, a profile announcement.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use commlink_core::error::{CommsError, Result};
use commlink_core::protocol::{
    AnnounceProfileVersion, Chat, Position, Profile, ProfileRequest, ProfileResponse, Scene, Voice,
};

use super::{PacketRoomConnection, RoomConnection};
use crate::context::PositionReader;
use crate::dispatch::{CommsEvent, EventBus, Package};
use crate::mesh::{TopologySnapshot, PARCEL_SIZE};
use crate::obs::CommsMetrics;
use crate::transport::OfflineAdapter;
use crate::voice::VoiceHandler;

const PROFILE_BASE_URL: &str = "https://peer.decentraland.org";
const EYE_HEIGHT: f32 = 1.6;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorParams {
    pub peers: usize,
    /// Jitter added to each step, in meters.
    pub random: f32,
    /// Orbit angular speed per elapsed millisecond.
    pub speed: f32,
    /// Orbit radius growth per peer.
    pub distance: f32,
    /// Orbit around this parcel instead of the local position.
    pub center: Option<(f32, f32)>,
    pub tick: Duration,
    /// Chance per tick that a peer re-announces its profile.
    pub announce_probability: f64,
}

impl Default for SimulatorParams {
    fn default() -> Self {
        Self {
            peers: 100,
            random: 1.0,
            speed: 0.0001,
            distance: 0.03,
            center: None,
            tick: Duration::from_millis(60),
            announce_probability: 0.2,
        }
    }
}

impl SimulatorParams {
    /// Parse the part after `simulator:`; a leading `?` is optional.
    pub fn from_query(query: &str) -> Result<Self> {
        let query = query.trim_start_matches('?');
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "peers" => params.peers = parse_param(&key, &value)?,
                "random" => params.random = parse_param(&key, &value)?,
                "speed" => params.speed = parse_param(&key, &value)?,
                "distance" => params.distance = parse_param(&key, &value)?,
                "position" => {
                    let (x, z) = value.split_once(',').ok_or_else(|| {
                        CommsError::Construction(format!("simulator position must be x,z: {value}"))
                    })?;
                    params.center = Some((parse_param(&key, x)?, parse_param(&key, z)?));
                }
                other => tracing::debug!(param = other, "unknown simulator parameter ignored"),
            }
        }
        Ok(params)
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CommsError::Construction(format!("invalid simulator {key}: {value}")))
}

struct SimPeer {
    address: String,
    position: [f32; 3],
    profile: Profile,
    epoch: u32,
}

pub struct SimulationRoom {
    inner: Arc<SimInner>,
    /// Outbound sends go through a real packet room over the offline adapter.
    room: PacketRoomConnection,
}

struct SimInner {
    params: SimulatorParams,
    self_address: String,
    position: PositionReader,
    events: EventBus<CommsEvent>,
    peers: Mutex<Vec<SimPeer>>,
    started: Instant,
    disposed: AtomicBool,
    tick: Mutex<Option<JoinHandle<()>>>,
}

impl SimulationRoom {
    pub fn new(
        params: SimulatorParams,
        self_address: impl Into<String>,
        position: PositionReader,
        metrics: Arc<CommsMetrics>,
    ) -> Self {
        let self_address = self_address.into();
        Self {
            room: PacketRoomConnection::new(
                Arc::new(OfflineAdapter::new()),
                self_address.clone(),
                metrics,
            ),
            inner: Arc::new(SimInner {
                params,
                self_address,
                position,
                events: EventBus::new(),
                peers: Mutex::new(Vec::new()),
                started: Instant::now(),
                disposed: AtomicBool::new(false),
                tick: Mutex::new(None),
            }),
        }
    }

    pub fn params(&self) -> &SimulatorParams {
        &self.inner.params
    }

    pub fn peer_addresses(&self) -> Vec<String> {
        self.inner
            .peers
            .lock()
            .map(|p| p.iter().map(|peer| peer.address.clone()).collect())
            .unwrap_or_default()
    }

    /// Advance every peer one step. Called by the tick task.
    pub fn update(&self) {
        self.inner.update();
    }
}

fn random_address(rng: &mut impl Rng) -> String {
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for _ in 0..20 {
        out.push_str(&format!("{:02x}", rng.gen::<u8>()));
    }
    out
}

impl SimInner {
    fn spawn_peers(&self) {
        let start = (self.position)();
        let mut rng = rand::thread_rng();
        let spawned: Vec<SimPeer> = (0..self.params.peers)
            .map(|_| {
                let address = random_address(&mut rng);
                SimPeer {
                    profile: Profile::guest(&address),
                    address,
                    position: [start.position_x, start.position_y, start.position_z],
                    epoch: 0,
                }
            })
            .collect();
        let addresses: Vec<String> = spawned.iter().map(|p| p.address.clone()).collect();
        if let Ok(mut peers) = self.peers.lock() {
            peers.extend(spawned);
        }

        for address in addresses {
            self.events.emit(CommsEvent::ProfileMessage(Package {
                address,
                data: AnnounceProfileVersion { profile_version: 0 },
            }));
        }
    }

    fn center(&self) -> [f32; 3] {
        match self.params.center {
            Some((x, z)) => [x * PARCEL_SIZE, EYE_HEIGHT, z * PARCEL_SIZE],
            None => {
                let p = (self.position)();
                [p.position_x, p.position_y, p.position_z]
            }
        }
    }

    fn update(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let center = self.center();
        let elapsed_ms = self.started.elapsed().as_secs_f32() * 1000.0;
        let mut rng = rand::thread_rng();
        let mut out: Vec<CommsEvent> = Vec::new();

        if let Ok(mut peers) = self.peers.lock() {
            let n = peers.len() as f32;
            for (i, peer) in peers.iter_mut().enumerate() {
                let i = (i + 1) as f32;
                let angle = PI * 4.0 * (i / n) + elapsed_ms * self.params.speed;
                let radius = i * self.params.distance + 3.0;
                let target = [
                    center[0] + angle.sin() * radius,
                    center[1] - EYE_HEIGHT,
                    center[2] + angle.cos() * radius,
                ];

                let delta = [
                    target[0] - peer.position[0],
                    target[1] - peer.position[1],
                    target[2] - peer.position[2],
                ];
                let distance = (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();
                if distance > f32::EPSILON {
                    let step = distance.min(5.0 + rng.gen::<f32>() * self.params.random);
                    for axis in 0..3 {
                        peer.position[axis] += delta[axis] / distance * step;
                    }
                }

                out.push(CommsEvent::Position(Package {
                    address: peer.address.clone(),
                    data: Position {
                        index: peer.epoch,
                        ..Position::at(peer.position[0], peer.position[1], peer.position[2])
                    },
                }));
                peer.epoch = peer.epoch.wrapping_add(1);

                if rng.gen_bool(self.params.announce_probability.clamp(0.0, 1.0)) {
                    out.push(CommsEvent::ProfileMessage(Package {
                        address: peer.address.clone(),
                        data: AnnounceProfileVersion {
                            profile_version: peer.epoch,
                        },
                    }));
                }
            }
        }

        for ev in out {
            self.events.emit(ev);
        }
    }

    fn profile_of(&self, address: &str) -> Option<Profile> {
        self.peers.lock().ok().and_then(|peers| {
            peers
                .iter()
                .find(|p| p.address.eq_ignore_ascii_case(address))
                .map(|p| p.profile.clone())
        })
    }
}

#[async_trait]
impl RoomConnection for SimulationRoom {
    fn events(&self) -> &EventBus<CommsEvent> {
        &self.inner.events
    }

    async fn connect(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(CommsError::Disposed);
        }
        self.room.connect().await?;
        self.inner.spawn_peers();

        let inner = Arc::clone(&self.inner);
        let every = self.inner.params.tick;
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if inner.disposed.load(Ordering::Acquire) {
                    break;
                }
                inner.update();
            }
        });
        if let Ok(mut slot) = self.inner.tick.lock() {
            if let Some(prev) = slot.replace(task) {
                prev.abort();
            }
        }

        tracing::info!(peers = self.inner.params.peers, "simulation started");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let task = self.inner.tick.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            task.abort();
        }
        self.room.disconnect().await?;
        self.inner.events.clear();
        tracing::info!("simulation stopped");
        Ok(())
    }

    async fn send_position(&self, position: Position) -> Result<()> {
        self.room.send_position(position).await
    }

    async fn send_profile_message(&self, message: AnnounceProfileVersion) -> Result<()> {
        self.room.send_profile_message(message).await
    }

    async fn send_profile_request(&self, request: ProfileRequest) -> Result<()> {
        self.room.send_profile_request(request.clone()).await?;

        let Some(profile) = self.inner.profile_of(&request.address) else {
            return Ok(());
        };
        let serialized_profile = profile.to_json()?;
        let delay = Duration::from_millis(rand::thread_rng().gen_range(0..100));
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.disposed.load(Ordering::Acquire) {
                return;
            }
            inner.events.emit(CommsEvent::ProfileResponse(Package {
                address: request.address,
                data: ProfileResponse {
                    serialized_profile,
                    base_url: PROFILE_BASE_URL.into(),
                },
            }));
        });
        Ok(())
    }

    async fn send_profile_response(&self, response: ProfileResponse) -> Result<()> {
        self.room.send_profile_response(response).await
    }

    async fn send_chat(&self, chat: Chat) -> Result<()> {
        self.room.send_chat(chat).await
    }

    async fn send_parcel_scene_message(&self, scene: Scene) -> Result<()> {
        self.room.send_parcel_scene_message(scene).await
    }

    async fn send_voice(&self, voice: Voice) -> Result<()> {
        self.room.send_voice(voice).await
    }

    async fn voice_handler(&self) -> Result<Arc<dyn VoiceHandler>> {
        self.room.voice_handler().await
    }

    fn debug_topology(&self) -> TopologySnapshot {
        let mut snapshot = TopologySnapshot::self_only(self.inner.self_address.clone());
        for address in self.peer_addresses() {
            snapshot.add_edge(&self.inner.self_address, &address, 0);
        }
        snapshot
    }
}
