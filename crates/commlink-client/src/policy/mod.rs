//! Throttling policy for outgoing gossip.

pub mod throttle;

pub use throttle::{PositionThrottle, ResponseThrottle};
