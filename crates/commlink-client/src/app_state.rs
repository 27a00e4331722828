//! Shared state behind the ops endpoints.

use std::sync::Arc;

use tokio::time::Instant;

use crate::obs::CommsMetrics;
use crate::orchestrator::{CommsHandle, ConnectionPhase};

#[derive(Clone)]
pub struct AppState {
    comms: CommsHandle,
    metrics: Arc<CommsMetrics>,
    started: Instant,
}

impl AppState {
    pub fn new(comms: CommsHandle, metrics: Arc<CommsMetrics>) -> Self {
        Self {
            comms,
            metrics,
            started: Instant::now(),
        }
    }

    pub fn comms(&self) -> &CommsHandle {
        &self.comms
    }

    pub fn metrics(&self) -> Arc<CommsMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn is_connected(&self) -> bool {
        self.comms.status().phase == ConnectionPhase::Connected
    }

    /// Gauges computed at scrape time.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("commlink_connected", u64::from(self.is_connected())),
            ("commlink_uptime_seconds", self.started.elapsed().as_secs()),
        ]
    }
}
