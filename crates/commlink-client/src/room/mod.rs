//! Room connections: typed messaging over one transport.
//!
//! [`PacketRoomConnection`] speaks the packet codec over any
//! [`CommsAdapter`](crate::transport::CommsAdapter); [`SimulationRoom`]
//! fabricates peers locally for load tests.

pub mod packet_room;
pub mod simulator;

use std::sync::Arc;

use async_trait::async_trait;

use commlink_core::error::Result;
use commlink_core::protocol::{
    AnnounceProfileVersion, Chat, Position, ProfileRequest, ProfileResponse, Scene, Voice,
};

use crate::dispatch::{CommsEvent, EventBus};
use crate::mesh::TopologySnapshot;
use crate::voice::VoiceHandler;

pub use packet_room::PacketRoomConnection;
pub use simulator::{SimulationRoom, SimulatorParams};

/// Active transport binding as seen by the orchestrator and callers.
///
/// Sends after `disconnect` are silently ignored; `disconnect` is idempotent.
#[async_trait]
pub trait RoomConnection: Send + Sync {
    fn events(&self) -> &EventBus<CommsEvent>;

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;

    /// Stamps the next position index (unreliable).
    async fn send_position(&self, position: Position) -> Result<()>;
    async fn send_profile_message(&self, message: AnnounceProfileVersion) -> Result<()>;
    async fn send_profile_request(&self, request: ProfileRequest) -> Result<()>;
    async fn send_profile_response(&self, response: ProfileResponse) -> Result<()>;
    async fn send_chat(&self, chat: Chat) -> Result<()>;
    async fn send_parcel_scene_message(&self, scene: Scene) -> Result<()>;
    async fn send_voice(&self, voice: Voice) -> Result<()>;

    /// Frames recorded by the handler are sent as voice packets.
    async fn voice_handler(&self) -> Result<Arc<dyn VoiceHandler>>;

    /// Self-only unless the transport knows its mesh.
    fn debug_topology(&self) -> TopologySnapshot;
}
