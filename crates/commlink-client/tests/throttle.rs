#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use tokio::time::Instant;

use commlink_client::policy::{PositionThrottle, ResponseThrottle};
use commlink_core::protocol::Position;

const MIN: Duration = Duration::from_millis(100);
const KEEPALIVE: Duration = Duration::from_secs(1);

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test]
fn first_position_is_always_sent() {
    let mut t = PositionThrottle::new(MIN, KEEPALIVE);
    assert!(t.should_send(&Position::default(), Instant::now()));
}

#[test]
fn movement_waits_for_min_interval() {
    let mut t = PositionThrottle::new(MIN, KEEPALIVE);
    let t0 = Instant::now();
    assert!(t.should_send(&Position::at(0.0, 0.0, 0.0), t0));

    assert!(!t.should_send(&Position::at(1.0, 0.0, 0.0), t0 + ms(50)));
    assert!(!t.should_send(&Position::at(2.0, 0.0, 0.0), t0 + MIN));
    assert!(t.should_send(&Position::at(3.0, 0.0, 0.0), t0 + ms(101)));
}

#[test]
fn unchanged_pose_waits_for_keepalive() {
    let mut t = PositionThrottle::new(MIN, KEEPALIVE);
    let p = Position::at(4.0, 0.0, 4.0);
    let t0 = Instant::now();
    assert!(t.should_send(&p, t0));

    assert!(!t.should_send(&p, t0 + ms(500)));
    assert!(t.should_send(&p, t0 + KEEPALIVE));
}

#[test]
fn forced_send_restarts_the_window() {
    let mut t = PositionThrottle::new(MIN, KEEPALIVE);
    let t0 = Instant::now();
    assert!(t.should_send(&Position::at(0.0, 0.0, 0.0), t0));

    t.record(&Position::at(5.0, 0.0, 0.0), t0 + ms(200));
    assert!(!t.should_send(&Position::at(6.0, 0.0, 0.0), t0 + ms(250)));
    assert!(t.should_send(&Position::at(6.0, 0.0, 0.0), t0 + ms(301)));
}

#[test]
fn last_refused_pose_is_held_until_the_window_closes() {
    let mut t = PositionThrottle::new(MIN, KEEPALIVE);
    let t0 = Instant::now();
    assert!(t.should_send(&Position::at(5.0, 0.0, 0.0), t0));
    assert_eq!(t.flush_at(), None);

    assert!(!t.should_send(&Position::at(6.0, 0.0, 0.0), t0));
    assert_eq!(t.flush_at(), Some(t0 + MIN));

    let flushed = t.take_pending(t0 + MIN).unwrap();
    assert_eq!(flushed.position_x, 6.0);
    assert_eq!(t.flush_at(), None);
    assert!(t.take_pending(t0 + MIN).is_none());
    // the flush opened a new window
    assert!(!t.should_send(&Position::at(7.0, 0.0, 0.0), t0 + ms(150)));
}

#[test]
fn returning_to_the_sent_pose_drops_the_pending_one() {
    let mut t = PositionThrottle::new(MIN, KEEPALIVE);
    let t0 = Instant::now();
    let home = Position::at(1.0, 0.0, 1.0);
    assert!(t.should_send(&home, t0));

    assert!(!t.should_send(&Position::at(2.0, 0.0, 1.0), t0 + ms(20)));
    assert!(!t.should_send(&home, t0 + ms(40)));
    assert_eq!(t.flush_at(), None);
}

#[test]
fn forced_send_clears_the_pending_pose() {
    let mut t = PositionThrottle::new(MIN, KEEPALIVE);
    let t0 = Instant::now();
    assert!(t.should_send(&Position::at(0.0, 0.0, 0.0), t0));
    assert!(!t.should_send(&Position::at(1.0, 0.0, 0.0), t0 + ms(10)));

    t.record(&Position::at(1.0, 0.0, 0.0), t0 + ms(20));
    assert_eq!(t.flush_at(), None);
}

#[test]
fn one_response_per_window() {
    let mut t = ResponseThrottle::new(ms(1000));
    let t0 = Instant::now();
    assert!(t.try_acquire(t0));
    assert!(!t.try_acquire(t0 + ms(10)));
    assert!(!t.try_acquire(t0 + ms(999)));
    assert!(t.try_acquire(t0 + ms(1000)));
    assert!(!t.try_acquire(t0 + ms(1500)));
}
