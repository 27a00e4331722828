#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use commlink_client::context::fixed_position;
use commlink_client::dispatch::{CommsEvent, CommsEventKind};
use commlink_client::obs::CommsMetrics;
use commlink_client::room::{RoomConnection, SimulationRoom, SimulatorParams};
use commlink_core::protocol::{Position, Profile, ProfileRequest};

use support::{settle, SELF};

fn sim(peers: usize) -> SimulationRoom {
    let params = SimulatorParams {
        peers,
        tick: Duration::from_secs(3600),
        announce_probability: 0.0,
        ..SimulatorParams::default()
    };
    SimulationRoom::new(
        params,
        SELF,
        fixed_position(Position::at(8.0, 1.6, 8.0)),
        Arc::new(CommsMetrics::default()),
    )
}

fn collect(room: &SimulationRoom, kind: CommsEventKind) -> Arc<Mutex<Vec<CommsEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    room.events().subscribe(kind, move |ev| sink.lock().unwrap().push(ev.clone()));
    seen
}

#[test]
fn query_overrides_defaults() {
    let p = SimulatorParams::from_query("?peers=3&speed=0.5&position=10,-2").unwrap();
    assert_eq!(p.peers, 3);
    assert_eq!(p.speed, 0.5);
    assert_eq!(p.center, Some((10.0, -2.0)));
    assert_eq!(p.distance, SimulatorParams::default().distance);

    let p = SimulatorParams::from_query("peers=7&unknown=1").unwrap();
    assert_eq!(p.peers, 7);
}

#[test]
fn bad_query_is_a_construction_error() {
    for q in ["peers=abc", "position=1", "random=x"] {
        let err = SimulatorParams::from_query(q).unwrap_err();
        assert_eq!(err.code().as_str(), "CONSTRUCTION", "{q}");
    }
}

#[tokio::test(start_paused = true)]
async fn connect_spawns_announcing_peers() {
    let room = sim(3);
    let announced = collect(&room, CommsEventKind::ProfileMessage);
    room.connect().await.unwrap();

    let peers = room.peer_addresses();
    assert_eq!(peers.len(), 3);
    assert!(peers.iter().all(|a| a.starts_with("0x") && a.len() == 42));

    let announced = announced.lock().unwrap();
    assert_eq!(announced.len(), 3);
    for ev in announced.iter() {
        match ev {
            CommsEvent::ProfileMessage(p) => assert_eq!(p.data.profile_version, 0),
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn update_moves_every_peer() {
    let room = sim(4);
    room.connect().await.unwrap();
    settle().await;

    let positions = collect(&room, CommsEventKind::Position);
    room.update();

    let positions = positions.lock().unwrap();
    assert_eq!(positions.len(), 4);
    for ev in positions.iter() {
        let CommsEvent::Position(p) = ev else {
            panic!("unexpected {ev:?}");
        };
        assert_eq!(p.data.index, 1);
        // peers approach their orbit, at most 5 m plus jitter per step
        let dx = p.data.position_x - 8.0;
        let dz = p.data.position_z - 8.0;
        assert!((dx * dx + dz * dz).sqrt() <= 2.0 * (5.0 + 1.0));
    }
}

#[tokio::test(start_paused = true)]
async fn profile_request_gets_a_response() {
    let room = sim(2);
    let responses = collect(&room, CommsEventKind::ProfileResponse);
    room.connect().await.unwrap();
    let peer = room.peer_addresses()[0].clone();

    room.send_profile_request(ProfileRequest {
        address: peer.clone(),
        profile_version: 0,
    })
    .await
    .unwrap();
    room.send_profile_request(ProfileRequest {
        address: "0xnobody".into(),
        profile_version: 0,
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let responses = responses.lock().unwrap();
    assert_eq!(responses.len(), 1);
    let CommsEvent::ProfileResponse(r) = &responses[0] else {
        panic!("unexpected {:?}", responses[0]);
    };
    assert_eq!(r.address, peer);
    let profile = Profile::from_json(&r.data.serialized_profile).unwrap();
    assert_eq!(profile.user_id, peer);
}

#[tokio::test(start_paused = true)]
async fn topology_lists_simulated_peers() {
    let room = sim(3);
    room.connect().await.unwrap();

    let topo = room.debug_topology();
    assert_eq!(topo.self_address, SELF);
    for peer in room.peer_addresses() {
        assert_eq!(topo.hops(SELF, &peer), Some(0));
    }
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_final() {
    let room = sim(2);
    room.connect().await.unwrap();
    room.disconnect().await.unwrap();
    room.disconnect().await.unwrap();

    let positions = collect(&room, CommsEventKind::Position);
    room.update();
    assert!(positions.lock().unwrap().is_empty());

    let err = room.connect().await.unwrap_err();
    assert_eq!(err.code().as_str(), "DISPOSED");
}
