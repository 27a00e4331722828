use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use commlink_core::error::Result;

use super::{CommsAdapter, SendHints};
use crate::dispatch::{AdapterEvent, DisconnectReason, EventBus};
use crate::voice::{BasicVoiceHandler, VoiceFrameSink, VoiceHandler};

/// Accepts everything, delivers nothing, never emits.
#[derive(Default)]
pub struct OfflineAdapter {
    events: EventBus<AdapterEvent>,
}

impl OfflineAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommsAdapter for OfflineAdapter {
    fn events(&self) -> &EventBus<AdapterEvent> {
        &self.events
    }

    async fn connect(&self) -> Result<()> {
        tracing::debug!("offline adapter connected");
        Ok(())
    }

    async fn send(&self, _data: Bytes, _hints: SendHints) {}

    async fn disconnect(&self, _reason: Option<DisconnectReason>) -> Result<()> {
        self.events.clear();
        Ok(())
    }

    async fn voice_handler(&self, sink: VoiceFrameSink) -> Result<Arc<dyn VoiceHandler>> {
        Ok(Arc::new(BasicVoiceHandler::new(sink)))
    }
}
