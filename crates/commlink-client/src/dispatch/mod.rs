//! Event fan-out.
//!
//! Adapters and room connections publish through an [`EventBus`]; subscribers
//! (orchestrator duties, metrics, voice, callers) register per event kind or
//! with a wildcard.

pub mod bus;
pub mod events;

pub use bus::{BusEvent, EventBus, Handler, Subscription};
pub use events::{
    AdapterEvent, AdapterEventKind, AdapterMessage, CommsEvent, CommsEventKind, DisconnectReason,
    DisconnectedEvent, Package, PeerEvent,
};
