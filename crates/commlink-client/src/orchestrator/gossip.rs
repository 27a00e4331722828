//! Profile gossip duty: periodic announcements and throttled responses.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use commlink_core::protocol::{AnnounceProfileVersion, ProfileRequest, ProfileResponse};

use super::state::CurrentRoom;
use super::LocalProfile;
use crate::context::CommsIdentity;
use crate::dispatch::Package;
use crate::obs::CommsMetrics;
use crate::policy::ResponseThrottle;

/// Profile request tagged with the id of the room it arrived on.
pub(crate) type RoomRequest = (u64, Package<ProfileRequest>);

pub(crate) struct Gossip {
    pub identity: CommsIdentity,
    pub announce_every: Duration,
    pub response_min: Duration,
    pub metrics: Arc<CommsMetrics>,
}

pub(crate) async fn run(
    gossip: Gossip,
    mut room_rx: watch::Receiver<Option<CurrentRoom>>,
    mut profile_rx: watch::Receiver<Option<LocalProfile>>,
    mut island_rx: watch::Receiver<Option<String>>,
    mut requests: mpsc::UnboundedReceiver<RoomRequest>,
) {
    let mut throttle = ResponseThrottle::new(gossip.response_min);
    let mut tick = tokio::time::interval(gossip.announce_every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => announce(&room_rx, &profile_rx).await,
            changed = room_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                announce(&room_rx, &profile_rx).await;
            }
            changed = profile_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                announce(&room_rx, &profile_rx).await;
            }
            changed = island_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                announce(&room_rx, &profile_rx).await;
            }
            request = requests.recv() => {
                let Some((room_id, request)) = request else {
                    break;
                };
                gossip
                    .respond(&mut throttle, &room_rx, &profile_rx, room_id, request)
                    .await;
            }
        }
    }
}

async fn announce(
    room_rx: &watch::Receiver<Option<CurrentRoom>>,
    profile_rx: &watch::Receiver<Option<LocalProfile>>,
) {
    let room = room_rx.borrow().clone();
    let version = profile_rx
        .borrow()
        .as_ref()
        .map(|p| p.profile.announced_version());
    let (Some(room), Some(profile_version)) = (room, version) else {
        return;
    };
    if let Err(e) = room
        .room
        .send_profile_message(AnnounceProfileVersion { profile_version })
        .await
    {
        tracing::debug!(protocol = %room.protocol, error = %e, "profile announcement failed");
    }
}

impl Gossip {
    async fn respond(
        &self,
        throttle: &mut ResponseThrottle,
        room_rx: &watch::Receiver<Option<CurrentRoom>>,
        profile_rx: &watch::Receiver<Option<LocalProfile>>,
        room_id: u64,
        request: Package<ProfileRequest>,
    ) {
        let room = room_rx.borrow().clone();
        let Some(room) = room.filter(|r| r.id == room_id) else {
            tracing::trace!(room = room_id, "profile request from a replaced room ignored");
            return;
        };
        if !self.identity.is(&request.data.address) {
            return;
        }
        let local = profile_rx.borrow().clone();
        let Some(local) = local else {
            return;
        };
        if !throttle.try_acquire(Instant::now()) {
            tracing::trace!(from = %request.address, "profile response throttled");
            return;
        }

        let mut profile = local.profile.with_sanitized_snapshots();
        profile.has_connected_web3 |= self.identity.has_connected_web3;
        let serialized_profile = match profile.to_json() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "profile serialization failed");
                return;
            }
        };

        match room
            .room
            .send_profile_response(ProfileResponse {
                serialized_profile,
                base_url: local.base_url,
            })
            .await
        {
            Ok(()) => self.metrics.profile_responses.inc(&[]),
            Err(e) => {
                tracing::debug!(protocol = %room.protocol, error = %e, "profile response failed")
            }
        }
    }
}
