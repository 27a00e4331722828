//! Position heartbeat duty.
//!
//! Sends the local position on every tick and whenever the current room
//! changes; local movement in between is forwarded through
//! [`PositionThrottle`], whose last refused pose is flushed once the
//! window closes.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use commlink_core::protocol::Position;

use super::state::CurrentRoom;
use crate::policy::PositionThrottle;

pub(crate) async fn run(
    mut room_rx: watch::Receiver<Option<CurrentRoom>>,
    mut position_rx: watch::Receiver<Position>,
    heartbeat: Duration,
    min_interval: Duration,
) {
    let mut throttle = PositionThrottle::new(min_interval, heartbeat);
    let mut tick = tokio::time::interval(heartbeat);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let flush_at = throttle.flush_at();
        let deadline = flush_at.unwrap_or_else(Instant::now);
        tokio::select! {
            _ = tick.tick() => send(&room_rx, &position_rx, &mut throttle, true).await,
            _ = tokio::time::sleep_until(deadline), if flush_at.is_some() => {
                flush(&room_rx, &mut throttle).await;
            }
            changed = room_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                send(&room_rx, &position_rx, &mut throttle, true).await;
            }
            changed = position_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                send(&room_rx, &position_rx, &mut throttle, false).await;
            }
        }
    }
}

async fn flush(room_rx: &watch::Receiver<Option<CurrentRoom>>, throttle: &mut PositionThrottle) {
    let Some(position) = throttle.take_pending(Instant::now()) else {
        return;
    };
    let room = room_rx.borrow().clone();
    let Some(room) = room else {
        return;
    };
    if let Err(e) = room.room.send_position(position).await {
        tracing::debug!(protocol = %room.protocol, error = %e, "pending position send failed");
    }
}

async fn send(
    room_rx: &watch::Receiver<Option<CurrentRoom>>,
    position_rx: &watch::Receiver<Position>,
    throttle: &mut PositionThrottle,
    forced: bool,
) {
    let room = room_rx.borrow().clone();
    let Some(room) = room else {
        return;
    };
    let position = *position_rx.borrow();
    let now = Instant::now();

    if forced {
        throttle.record(&position, now);
    } else if !throttle.should_send(&position, now) {
        return;
    }

    if let Err(e) = room.room.send_position(position).await {
        tracing::debug!(protocol = %room.protocol, error = %e, "position send failed");
    }
}
