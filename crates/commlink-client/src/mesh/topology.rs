//! Connectivity snapshot for diagnostics.
//!
//! Relay chains come from what remote peers report about themselves and are
//! not verified; hop counts are a best-effort signal only.

use std::collections::BTreeMap;

use serde::Serialize;

use super::peers::PeerIdentityMap;
use super::KnownPeer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TopologyParams {
    pub hops: u32,
}

/// `source -> target -> params`, always keyed by self.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologySnapshot {
    pub self_address: String,
    pub edges: BTreeMap<String, BTreeMap<String, TopologyParams>>,
}

impl TopologySnapshot {
    /// Snapshot containing only self, with no edges.
    pub fn self_only(self_address: impl Into<String>) -> Self {
        let self_address = self_address.into();
        let mut edges = BTreeMap::new();
        edges.insert(self_address.clone(), BTreeMap::new());
        Self {
            self_address,
            edges,
        }
    }

    /// Insert or overwrite one edge.
    pub fn add_edge(&mut self, source: &str, target: &str, hops: u32) {
        self.edges
            .entry(source.to_string())
            .or_default()
            .insert(target.to_string(), TopologyParams { hops });
    }

    pub fn hops(&self, source: &str, target: &str) -> Option<u32> {
        self.edges.get(source)?.get(target).map(|p| p.hops)
    }

    /// Targets reachable from self.
    pub fn direct(&self) -> Vec<&str> {
        self.edges
            .get(&self.self_address)
            .map(|t| t.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }
}

/// Combine direct links (hop 0) with each known peer's relay chain.
///
/// Transport ids are translated to addresses when the identity is known.
pub fn build_topology(
    self_address: &str,
    direct_ids: &[String],
    known_peers: &[KnownPeer],
    identities: &PeerIdentityMap,
) -> TopologySnapshot {
    let mut snapshot = TopologySnapshot::self_only(self_address);

    for id in direct_ids {
        snapshot.add_edge(self_address, &identities.resolve(id), 0);
    }

    for peer in known_peers {
        let target = identities.resolve(&peer.id);
        for relay in &peer.reachable_through {
            snapshot.add_edge(&identities.resolve(&relay.id), &target, relay.hops);
        }
    }

    snapshot
}
