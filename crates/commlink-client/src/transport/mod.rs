//! Transport adapters and the protocol registry.
//!
//! Every concrete transport implements [`CommsAdapter`]: connect, send raw
//! bytes with a reliability hint, disconnect, hand out a voice handler and
//! publish [`AdapterEvent`]s. Physical links (socket, SFU client, WebRTC
//! mesh) are injected through connector traits and never created here.

pub mod link;
pub mod offline;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use commlink_core::error::Result;

use crate::dispatch::{AdapterEvent, DisconnectReason, EventBus};
use crate::mesh::TopologySnapshot;
use crate::voice::{VoiceFrameSink, VoiceHandler};

pub use link::{LinkAdapter, LinkConnector, LinkEndpoint, LinkEvent, LinkSender, LinkSession};
pub use offline::OfflineAdapter;
pub use registry::{
    split_connection_string, TransportConnectors, TransportConstructor, TransportKind,
    TransportParams, TransportRegistry,
};

/// Delivery guarantee requested for one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendHints {
    pub reliable: bool,
}

impl SendHints {
    pub const RELIABLE: SendHints = SendHints { reliable: true };
    pub const UNRELIABLE: SendHints = SendHints { reliable: false };
}

#[async_trait]
pub trait CommsAdapter: Send + Sync {
    fn events(&self) -> &EventBus<AdapterEvent>;

    async fn connect(&self) -> Result<()>;

    /// No-op once disposed.
    async fn send(&self, data: Bytes, hints: SendHints);

    /// Idempotent. The first call emits `Disconnection` and clears subscribers.
    async fn disconnect(&self, reason: Option<DisconnectReason>) -> Result<()>;

    async fn voice_handler(&self, sink: VoiceFrameSink) -> Result<Arc<dyn VoiceHandler>>;

    /// Only mesh adapters know more than "self".
    fn debug_topology(&self) -> Option<TopologySnapshot> {
        None
    }
}
