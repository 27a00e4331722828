//! commlink client runtime.
//!
//! Wires transports, room connections, the spatial mesh layer and the
//! lifecycle orchestrator into one comms stack. Consumed by the `commlink`
//! binary and by integration tests; embedding applications supply the
//! physical connectors through [`transport::TransportConnectors`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod app_state;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod mesh;
pub mod obs;
pub mod ops;
pub mod orchestrator;
pub mod policy;
pub mod room;
pub mod router;
pub mod transport;
pub mod voice;
