use dashmap::DashMap;

/// Transport-local peer ids to participant addresses.
///
/// Mesh transports hand out ids before the peer's identity is known; the
/// address is learned from the first frame the peer sends.
#[derive(Default)]
pub struct PeerIdentityMap {
    by_id: DashMap<String, String>,
}

impl PeerIdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `id` was not identified before.
    pub fn identify(&self, id: &str, address: &str) -> bool {
        self.by_id
            .insert(id.to_string(), address.to_string())
            .is_none()
    }

    pub fn address_of(&self, id: &str) -> Option<String> {
        self.by_id.get(id).map(|a| a.value().clone())
    }

    /// Address when known, otherwise the transport id.
    pub fn resolve(&self, id: &str) -> String {
        self.address_of(id).unwrap_or_else(|| id.to_string())
    }

    /// Forget one peer, returning its address.
    pub fn forget(&self, id: &str) -> Option<String> {
        self.by_id.remove(id).map(|(_, address)| address)
    }

    /// Keep only `ids`; returns the addresses of removed peers.
    pub fn remove_all_but(&self, ids: &[String]) -> Vec<String> {
        let stale: Vec<String> = self
            .by_id
            .iter()
            .filter(|e| !ids.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();
        stale.iter().filter_map(|id| self.forget(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
