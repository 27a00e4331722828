//! Top-level facade crate for commlink.
//!
//! Re-exports the protocol primitives and the client runtime so users can
//! depend on a single crate.

pub mod core {
    pub use commlink_core::*;
}

pub mod client {
    pub use commlink_client::*;
}
