use std::fmt;
use std::sync::Arc;

use commlink_core::protocol::Position;

/// Local participant identity handed to transports.
///
/// `credential` is opaque here: it is produced by the signing layer and only
/// forwarded to connectors that need it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CommsIdentity {
    pub address: String,
    pub credential: Option<String>,
    pub has_connected_web3: bool,
}

impl CommsIdentity {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credential: None,
            has_connected_web3: false,
        }
    }

    /// Addresses are compared case-insensitively.
    pub fn is(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

impl fmt::Debug for CommsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommsIdentity")
            .field("address", &self.address)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("has_connected_web3", &self.has_connected_web3)
            .finish()
    }
}

/// Reads the latest local position.
pub type PositionReader = Arc<dyn Fn() -> Position + Send + Sync>;

/// Reader that always returns `position`.
pub fn fixed_position(position: Position) -> PositionReader {
    Arc::new(move || position)
}
