#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use commlink_client::context::{fixed_position, CommsIdentity};
use commlink_client::obs::CommsMetrics;
use commlink_client::transport::registry::{livekit_endpoint, normalize_ws_url};
use commlink_client::transport::{
    split_connection_string, TransportConnectors, TransportKind, TransportParams,
    TransportRegistry,
};
use commlink_core::protocol::Position;

use support::{CountingLinkConnector, FakeMeshConnector, SELF};

fn params(connection_string: &str, connectors: TransportConnectors) -> TransportParams {
    let (_, url) = split_connection_string(connection_string);
    TransportParams {
        url: url.into(),
        identity: CommsIdentity::new(SELF),
        position_reader: fixed_position(Position::default()),
        island_id: Some("I4".into()),
        comm_radius: 4,
        connect_timeout: Duration::from_secs(1),
        connectors,
        metrics: Arc::new(CommsMetrics::default()),
    }
}

#[test]
fn connection_strings_split_at_first_colon() {
    assert_eq!(
        split_connection_string("ws-room:wss://host/room?x=1"),
        ("ws-room", "wss://host/room?x=1")
    );
    assert_eq!(split_connection_string("offline:offline"), ("offline", "offline"));
    assert_eq!(split_connection_string("noprotocol"), ("", "noprotocol"));
}

#[test]
fn ws_urls_default_to_secure() {
    assert_eq!(normalize_ws_url("rooms.example/r1"), "wss://rooms.example/r1");
    assert_eq!(normalize_ws_url("ws://localhost:5000/r"), "ws://localhost:5000/r");
    assert_eq!(normalize_ws_url("wss://a/b"), "wss://a/b");
}

#[test]
fn livekit_token_is_split_from_url() {
    let (url, token) = livekit_endpoint("wss://sfu.example/rtc?access_token=abc&x=1").unwrap();
    assert_eq!(url, "wss://sfu.example/rtc");
    assert_eq!(token, "abc");
}

#[test]
fn livekit_without_token_fails_before_connector() {
    let connector = Arc::new(CountingLinkConnector::default());
    let registry = TransportRegistry::with_defaults();
    let ctor = registry.get("livekit").unwrap();
    let connectors = TransportConnectors {
        livekit: Some(connector.clone()),
        ..TransportConnectors::default()
    };

    let err = ctor
        .build(&params("livekit:wss://sfu.example/rtc", connectors))
        .err()
        .unwrap();
    assert_eq!(err.code().as_str(), "CONSTRUCTION");
    assert!(err.to_string().contains("No access token"));
    assert_eq!(connector.opens.load(Ordering::SeqCst), 0);
}

#[test]
fn unknown_protocol_is_unsupported() {
    let registry = TransportRegistry::with_defaults();
    let err = registry.get("bogus").err().unwrap();
    assert_eq!(err.code().as_str(), "UNSUPPORTED_PROTOCOL");
}

#[test]
fn defaults_cover_every_builtin() {
    let registry = TransportRegistry::with_defaults();
    assert_eq!(
        registry.protocols(),
        vec!["lighthouse", "livekit", "offline", "p2p", "simulator", "ws-room"]
    );
    assert_eq!(registry.get("p2p").unwrap().kind(), TransportKind::Mesh);
    assert_eq!(registry.get("simulator").unwrap().kind(), TransportKind::Synthetic);
    assert_eq!(registry.get("ws-room").unwrap().kind(), TransportKind::Direct);
}

#[test]
fn missing_connector_is_a_construction_error() {
    let registry = TransportRegistry::with_defaults();
    for cs in ["ws-room:host/r", "p2p:", "lighthouse:https://dir.example"] {
        let (protocol, _) = split_connection_string(cs);
        let err = registry
            .get(protocol)
            .unwrap()
            .build(&params(cs, TransportConnectors::default()))
            .err()
            .unwrap();
        assert_eq!(err.code().as_str(), "CONSTRUCTION", "{cs}");
    }
}

#[tokio::test]
async fn ws_room_connects_through_its_connector() {
    let connector = Arc::new(CountingLinkConnector::default());
    let registry = TransportRegistry::with_defaults();
    let room = registry
        .get("ws-room")
        .unwrap()
        .build(&params(
            "ws-room:rooms.example/r1",
            TransportConnectors {
                ws_room: Some(connector.clone()),
                ..TransportConnectors::default()
            },
        ))
        .unwrap();

    // construction stays off the network
    assert_eq!(connector.opens.load(Ordering::SeqCst), 0);
    room.connect().await.unwrap();
    let endpoint = connector.endpoints.lock().unwrap()[0].clone();
    assert_eq!(endpoint.url, "wss://rooms.example/r1");
    assert_eq!(endpoint.identity.address, SELF);
}

#[test]
fn lighthouse_passes_directory_and_island_preference() {
    let connector = Arc::new(FakeMeshConnector::default());
    let registry = TransportRegistry::with_defaults();
    registry
        .get("lighthouse")
        .unwrap()
        .build(&params(
            "lighthouse:https://dir.example",
            TransportConnectors {
                lighthouse: Some(connector.clone()),
                ..TransportConnectors::default()
            },
        ))
        .unwrap();

    let config = connector.configs.lock().unwrap()[0].clone();
    assert_eq!(config.peer_id, SELF);
    assert_eq!(config.directory_url.as_deref(), Some("https://dir.example"));
    assert_eq!(config.preferred_island.as_deref(), Some("I4"));
    assert_eq!(config.target_connections, 4);
    assert_eq!(config.max_connections, 6);
}

#[test]
fn bad_simulator_parameters_fail_construction() {
    let registry = TransportRegistry::with_defaults();
    let err = registry
        .get("simulator")
        .unwrap()
        .build(&params("simulator:peers=many", TransportConnectors::default()))
        .err()
        .unwrap();
    assert_eq!(err.code().as_str(), "CONSTRUCTION");
}
