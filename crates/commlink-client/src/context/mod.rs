//! Local session context shared by transports and the orchestrator.

pub mod identity;

pub use identity::{fixed_position, CommsIdentity, PositionReader};
