use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use commlink_core::error::{CommsError, ErrorKind};

use crate::dispatch::DisconnectReason;
use crate::room::RoomConnection;
use crate::transport::TransportKind;

/// Lifecycle phase of the comms session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Idle,
    Establishing,
    Connected,
    Disconnecting,
    Error,
}

impl ConnectionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionPhase::Idle => "idle",
            ConnectionPhase::Establishing => "establishing",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Disconnecting => "disconnecting",
            ConnectionPhase::Error => "error",
        }
    }

    pub fn can_transition_to(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        matches!(
            (self, next),
            (Idle, Establishing)
                | (Establishing, Establishing)
                | (Establishing, Connected)
                | (Establishing, Disconnecting)
                | (Establishing, Error)
                | (Connected, Establishing)
                | (Connected, Disconnecting)
                | (Connected, Error)
                | (Disconnecting, Idle)
                | (Error, Idle)
        )
    }
}

/// Operator-visible classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    UnsupportedProtocol,
    Construction,
    CouldNotConnect,
    Timeout,
    RealmFull,
    ReconnectionError,
    IdTaken,
    ServerError,
    ConnectionLost,
}

impl FailureReason {
    pub fn from_error(e: &CommsError) -> Self {
        match (e.kind(), e) {
            (_, CommsError::UnsupportedProtocol(_)) => FailureReason::UnsupportedProtocol,
            (_, CommsError::Timeout(_)) => FailureReason::Timeout,
            (ErrorKind::Construction, _) => FailureReason::Construction,
            (ErrorKind::Capacity, _) => FailureReason::RealmFull,
            (ErrorKind::IdentityConflict, _) => FailureReason::IdTaken,
            (ErrorKind::Transport | ErrorKind::Protocol | ErrorKind::Internal, _) => {
                FailureReason::CouldNotConnect
            }
        }
    }

    /// `None` for local teardown.
    pub fn from_disconnect(reason: &DisconnectReason) -> Option<Self> {
        match reason {
            DisconnectReason::Requested => None,
            DisconnectReason::RealmFull => Some(FailureReason::RealmFull),
            DisconnectReason::ReconnectionError => Some(FailureReason::ReconnectionError),
            DisconnectReason::IdTaken => Some(FailureReason::IdTaken),
            DisconnectReason::ServerError => Some(FailureReason::ServerError),
            DisconnectReason::Transport(_) => Some(FailureReason::ConnectionLost),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::UnsupportedProtocol => "unsupported-protocol",
            FailureReason::Construction => "construction",
            FailureReason::CouldNotConnect => "could-not-connect",
            FailureReason::Timeout => "timeout",
            FailureReason::RealmFull => "realm-full",
            FailureReason::ReconnectionError => "reconnection-error",
            FailureReason::IdTaken => "id-taken",
            FailureReason::ServerError => "error",
            FailureReason::ConnectionLost => "connection-lost",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            FailureReason::UnsupportedProtocol => "Unrecognized comms protocol",
            FailureReason::Construction => "Invalid comms configuration",
            FailureReason::CouldNotConnect => "Could not connect to the comms server",
            FailureReason::Timeout => "Timed out connecting to the comms server",
            FailureReason::RealmFull => "The realm is full, reconnecting",
            FailureReason::ReconnectionError => "Reconnection comms error",
            FailureReason::IdTaken => {
                "A previous connection to the connection server is still active"
            }
            FailureReason::ServerError => {
                "An error has ocurred in the communications server, reconnecting."
            }
            FailureReason::ConnectionLost => "Connection to the comms server was lost",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub reason: FailureReason,
    pub message: &'static str,
    pub detail: String,
}

impl Failure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            message: reason.message(),
            detail: detail.into(),
        }
    }
}

/// Snapshot published by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommsStatus {
    pub phase: ConnectionPhase,
    /// Protocol of the attempt or connection the phase refers to.
    pub protocol: Option<String>,
    pub last_failure: Option<Failure>,
    pub connected_peers: usize,
}

impl Default for CommsStatus {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            protocol: None,
            last_failure: None,
            connected_peers: 0,
        }
    }
}

/// A room connection owned by the orchestrator.
#[derive(Clone)]
pub struct CurrentRoom {
    pub id: u64,
    pub protocol: String,
    pub kind: TransportKind,
    pub room: Arc<dyn RoomConnection>,
    pub(crate) peers: Arc<AtomicUsize>,
}

impl CurrentRoom {
    pub fn connected_peers(&self) -> usize {
        self.peers.load(Ordering::Relaxed)
    }
}
