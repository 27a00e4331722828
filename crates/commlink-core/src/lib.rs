//! commlink core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the packet model, its compact binary codec and the
//! error surface shared by the client runtime and tooling. It intentionally
//! carries no transport or runtime dependencies so it can be reused in
//! multiple contexts.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `CommsError`/`Result` so a client does
//! not crash on malformed traffic from peers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{CommsError, ErrorCode, ErrorKind, Result};
