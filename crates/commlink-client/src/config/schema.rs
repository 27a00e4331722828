use serde::Deserialize;
use commlink_core::error::{CommsError, Result};
use commlink_core::protocol::profile::Snapshots;
use commlink_core::protocol::{Position, Profile};

use crate::context::CommsIdentity;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommsConfig {
    pub version: u32,

    #[serde(default)]
    pub comms: CommsSection,

    pub identity: IdentitySection,

    #[serde(default)]
    pub profile: ProfileSection,

    #[serde(default)]
    pub client: ClientSection,

    #[serde(default)]
    pub ops: OpsSection,
}

impl CommsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(CommsError::Construction(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.comms.validate()?;
        self.identity.validate()?;
        self.ops.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommsSection {
    #[serde(default = "default_connection_string")]
    pub connection_string: String,

    #[serde(default)]
    pub island_id: Option<String>,

    #[serde(default = "default_comm_radius")]
    pub comm_radius: i32,

    #[serde(default = "default_position_heartbeat_ms")]
    pub position_heartbeat_ms: u64,

    #[serde(default = "default_position_min_interval_ms")]
    pub position_min_interval_ms: u64,

    #[serde(default = "default_profile_announce_ms")]
    pub profile_announce_ms: u64,

    #[serde(default = "default_profile_response_min_ms")]
    pub profile_response_min_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for CommsSection {
    fn default() -> Self {
        Self {
            connection_string: default_connection_string(),
            island_id: None,
            comm_radius: default_comm_radius(),
            position_heartbeat_ms: default_position_heartbeat_ms(),
            position_min_interval_ms: default_position_min_interval_ms(),
            profile_announce_ms: default_profile_announce_ms(),
            profile_response_min_ms: default_profile_response_min_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl CommsSection {
    pub fn validate(&self) -> Result<()> {
        if !self.connection_string.contains(':') {
            return Err(CommsError::Construction(
                "comms.connection_string must look like protocol:url".into(),
            ));
        }
        if !(1..=16).contains(&self.comm_radius) {
            return Err(CommsError::Construction(
                "comms.comm_radius must be between 1 and 16".into(),
            ));
        }
        for (name, v) in [
            ("position_heartbeat_ms", self.position_heartbeat_ms),
            ("position_min_interval_ms", self.position_min_interval_ms),
            ("profile_announce_ms", self.profile_announce_ms),
            ("profile_response_min_ms", self.profile_response_min_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ] {
            if v == 0 {
                return Err(CommsError::Construction(format!(
                    "comms.{name} must be greater than zero"
                )));
            }
        }
        if self.position_min_interval_ms >= self.position_heartbeat_ms {
            return Err(CommsError::Construction(
                "comms.position_min_interval_ms must be less than position_heartbeat_ms".into(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(CommsError::Construction(
                "comms.event_channel_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_connection_string() -> String {
    "offline:offline".into()
}
fn default_comm_radius() -> i32 {
    5
}
fn default_position_heartbeat_ms() -> u64 {
    1000
}
fn default_position_min_interval_ms() -> u64 {
    100
}
fn default_profile_announce_ms() -> u64 {
    1000
}
fn default_profile_response_min_ms() -> u64 {
    1000
}
fn default_connect_timeout_ms() -> u64 {
    60000
}
fn default_event_channel_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentitySection {
    pub address: String,

    #[serde(default)]
    pub credential: Option<String>,

    #[serde(default)]
    pub has_connected_web3: bool,
}

impl IdentitySection {
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(CommsError::Construction(
                "identity.address must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn to_identity(&self) -> CommsIdentity {
        CommsIdentity {
            address: self.address.clone(),
            credential: self.credential.clone(),
            has_connected_web3: self.has_connected_web3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileSection {
    #[serde(default = "default_profile_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_profile_version")]
    pub version: i64,

    #[serde(default)]
    pub face256: Option<String>,

    #[serde(default)]
    pub body: Option<String>,
}

impl Default for ProfileSection {
    fn default() -> Self {
        Self {
            base_url: default_profile_base_url(),
            name: None,
            version: default_profile_version(),
            face256: None,
            body: None,
        }
    }
}

impl ProfileSection {
    /// Guest profile for `address` with the configured overrides.
    pub fn to_profile(&self, address: &str) -> Profile {
        let mut profile = Profile::guest(address);
        profile.version = self.version;
        if let Some(name) = &self.name {
            profile.name = name.clone();
        }
        if self.face256.is_some() || self.body.is_some() {
            profile.avatar.snapshots = Snapshots {
                face256: self.face256.clone(),
                body: self.body.clone(),
            };
        }
        profile
    }
}

fn default_profile_base_url() -> String {
    "https://peer.decentraland.org/content".into()
}
fn default_profile_version() -> i64 {
    -1
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    /// Initial local position `[x, y, z]` in meters.
    #[serde(default)]
    pub start_position: [f32; 3],

    /// Walk in a circle of this radius (meters) to exercise position gossip.
    #[serde(default)]
    pub walk_radius: Option<f32>,
}

impl ClientSection {
    pub fn start(&self) -> Position {
        let [x, y, z] = self.start_position;
        Position::at(x, y, z)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpsSection {
    #[serde(default = "default_ops_enabled")]
    pub enabled: bool,

    #[serde(default = "default_ops_listen")]
    pub listen: String,
}

impl Default for OpsSection {
    fn default() -> Self {
        Self {
            enabled: default_ops_enabled(),
            listen: default_ops_listen(),
        }
    }
}

impl OpsSection {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(CommsError::Construction(format!(
                "ops.listen must be a socket address: {}",
                self.listen
            )));
        }
        Ok(())
    }
}

fn default_ops_enabled() -> bool {
    true
}
fn default_ops_listen() -> String {
    "127.0.0.1:7070".into()
}
