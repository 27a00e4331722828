//! Shared error type across commlink crates.

use std::time::Duration;

use thiserror::Error;

/// Stable error codes surfaced to operators and UI (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Packet with zero populated cases.
    InvalidMessage,
    /// Bytes that are not a valid packet.
    Malformed,
    /// Packet written by a newer protocol version.
    UnsupportedVersion,
    /// Connection string names an unregistered protocol.
    UnsupportedProtocol,
    /// Bad connection string, missing credential or connector.
    Construction,
    /// Network unreachable.
    Unreachable,
    /// Credential refused by the remote side.
    AuthRejected,
    /// Transport reported a failure status.
    Transport,
    /// Establishment did not finish in time.
    Timeout,
    /// Realm has no capacity left.
    RealmFull,
    /// Another session holds the same identity.
    IdTaken,
    /// Connection was torn down while the operation was in flight.
    Disposed,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs, status JSON and metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::Malformed => "MALFORMED",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::UnsupportedProtocol => "UNSUPPORTED_PROTOCOL",
            ErrorCode::Construction => "CONSTRUCTION",
            ErrorCode::Unreachable => "UNREACHABLE",
            ErrorCode::AuthRejected => "AUTH_REJECTED",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::RealmFull => "REALM_FULL",
            ErrorCode::IdTaken => "ID_TAKEN",
            ErrorCode::Disposed => "DISPOSED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Error families. Each family has its own recovery policy in the
/// orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal to a single connect attempt, never retried here.
    Construction,
    /// Torn down and reported as "could not connect".
    Transport,
    /// The offending message is dropped, the connection survives.
    Protocol,
    /// Realm full.
    Capacity,
    /// Identity already connected elsewhere.
    IdentityConflict,
    Internal,
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, CommsError>;

/// Unified error type used by core and client.
#[derive(Debug, Error)]
pub enum CommsError {
    #[error("invalid message: packet has no populated case")]
    InvalidMessage,
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("unsupported packet version {0}")]
    UnsupportedVersion(u8),
    #[error("unsupported comms protocol: {0}")]
    UnsupportedProtocol(String),
    #[error("cannot build connection: {0}")]
    Construction(String),
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("credential rejected")]
    AuthRejected,
    #[error("transport error ({status}): {msg}")]
    Transport { status: String, msg: String },
    #[error("connection not established after {0:?}")]
    Timeout(Duration),
    #[error("the realm is full")]
    RealmFull,
    #[error("identity already connected")]
    IdTaken,
    #[error("connection disposed")]
    Disposed,
    #[error("internal: {0}")]
    Internal(String),
}

impl CommsError {
    /// Shorthand for a transport failure with a status tag.
    pub fn transport(status: impl Into<String>, msg: impl Into<String>) -> Self {
        CommsError::Transport {
            status: status.into(),
            msg: msg.into(),
        }
    }

    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            CommsError::InvalidMessage => ErrorCode::InvalidMessage,
            CommsError::Malformed(_) => ErrorCode::Malformed,
            CommsError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            CommsError::UnsupportedProtocol(_) => ErrorCode::UnsupportedProtocol,
            CommsError::Construction(_) => ErrorCode::Construction,
            CommsError::Unreachable(_) => ErrorCode::Unreachable,
            CommsError::AuthRejected => ErrorCode::AuthRejected,
            CommsError::Transport { .. } => ErrorCode::Transport,
            CommsError::Timeout(_) => ErrorCode::Timeout,
            CommsError::RealmFull => ErrorCode::RealmFull,
            CommsError::IdTaken => ErrorCode::IdTaken,
            CommsError::Disposed => ErrorCode::Disposed,
            CommsError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Map to the error family that decides the recovery policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommsError::InvalidMessage
            | CommsError::Malformed(_)
            | CommsError::UnsupportedVersion(_) => ErrorKind::Protocol,
            CommsError::UnsupportedProtocol(_) | CommsError::Construction(_) => {
                ErrorKind::Construction
            }
            CommsError::Unreachable(_)
            | CommsError::AuthRejected
            | CommsError::Transport { .. }
            | CommsError::Timeout(_)
            | CommsError::Disposed => ErrorKind::Transport,
            CommsError::RealmFull => ErrorKind::Capacity,
            CommsError::IdTaken => ErrorKind::IdentityConflict,
            CommsError::Internal(_) => ErrorKind::Internal,
        }
    }
}
