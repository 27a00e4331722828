//! Desired vs. joined topic reconciliation.
//!
//! Each topic has its own async lock. A settle step re-reads both the
//! desired set and the transport's joined set under that lock, so overlapping
//! `reconcile` calls never issue the same join or leave twice.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures_util::future::join_all;

use super::MeshTransport;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub joined: Vec<String>,
    pub left: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

enum Settled {
    Joined(String),
    Left(String),
}

#[derive(Default)]
pub struct RoomReconciler {
    desired: Mutex<BTreeSet<String>>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl RoomReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn desired(&self) -> Vec<String> {
        self.desired
            .lock()
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Join every desired topic not joined, leave every joined topic not
    /// desired. Joins and leaves run concurrently.
    pub async fn reconcile(
        &self,
        transport: &dyn MeshTransport,
        desired: Vec<String>,
    ) -> ReconcileReport {
        let desired: BTreeSet<String> = desired.into_iter().collect();
        if let Ok(mut d) = self.desired.lock() {
            *d = desired.clone();
        }

        let mut candidates = desired;
        candidates.extend(transport.current_rooms());

        let results = join_all(candidates.iter().map(|t| self.settle(transport, t))).await;

        let mut report = ReconcileReport::default();
        for settled in results.into_iter().flatten() {
            match settled {
                Settled::Joined(t) => report.joined.push(t),
                Settled::Left(t) => report.left.push(t),
            }
        }

        let desired = self.desired();
        self.locks
            .retain(|topic, lock| desired.contains(topic) || Arc::strong_count(lock) > 1);

        if !report.is_noop() {
            tracing::debug!(joined = ?report.joined, left = ?report.left, "mesh topics reconciled");
        }
        report
    }

    async fn settle(&self, transport: &dyn MeshTransport, topic: &str) -> Option<Settled> {
        let lock = self
            .locks
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let want = self
            .desired
            .lock()
            .map(|d| d.contains(topic))
            .unwrap_or(false);
        let have = transport.current_rooms().iter().any(|r| r == topic);

        match (want, have) {
            (true, false) => match transport.join_room(topic).await {
                Ok(()) => Some(Settled::Joined(topic.to_string())),
                Err(e) => {
                    tracing::warn!(topic, error = %e, "join failed");
                    None
                }
            },
            (false, true) => match transport.leave_room(topic).await {
                Ok(()) => Some(Settled::Left(topic.to_string())),
                Err(e) => {
                    tracing::warn!(topic, error = %e, "leave failed");
                    None
                }
            },
            _ => None,
        }
    }
}
