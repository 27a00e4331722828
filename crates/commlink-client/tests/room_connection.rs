#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod support;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use commlink_client::dispatch::{CommsEvent, CommsEventKind, DisconnectReason, PeerEvent};
use commlink_client::dispatch::AdapterEvent;
use commlink_client::obs::CommsMetrics;
use commlink_client::room::{PacketRoomConnection, RoomConnection};
use commlink_client::transport::OfflineAdapter;
use commlink_core::protocol::{
    encode_message, AnnounceProfileVersion, Chat, Message, Packet, Position, Scene, Voice,
    VoiceCodec,
};

use support::{RecordingAdapter, SELF};

fn room() -> (Arc<RecordingAdapter>, PacketRoomConnection, Arc<CommsMetrics>) {
    let adapter = RecordingAdapter::new();
    let metrics = Arc::new(CommsMetrics::default());
    let room = PacketRoomConnection::new(adapter.clone(), SELF, metrics.clone());
    (adapter, room, metrics)
}

fn collect(room: &PacketRoomConnection) -> Arc<Mutex<Vec<CommsEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    room.events().subscribe_all(move |ev| s.lock().unwrap().push(ev.clone()));
    seen
}

#[tokio::test]
async fn position_index_increases_per_send() {
    let (adapter, room, _) = room();
    for _ in 0..3 {
        room.send_position(Position::at(1.0, 0.0, 1.0)).await.unwrap();
    }

    let indexes: Vec<u32> = adapter
        .sent_messages()
        .into_iter()
        .map(|(m, hints)| {
            assert!(!hints.reliable);
            match m {
                Message::Position(p) => p.index,
                other => panic!("unexpected {other:?}"),
            }
        })
        .collect();
    assert_eq!(indexes, vec![0, 1, 2]);
}

#[tokio::test]
async fn reliability_follows_packet_case() {
    let (adapter, room, metrics) = room();
    room.send_chat(Chat {
        message: "hi".into(),
        timestamp: 1.0,
    })
    .await
    .unwrap();
    room.send_parcel_scene_message(Scene {
        scene_id: "s".into(),
        data: Bytes::from_static(b"x"),
    })
    .await
    .unwrap();
    room.send_voice(Voice {
        encoded_samples: Bytes::from_static(b"op"),
        index: 0,
        codec: VoiceCodec::Opus,
    })
    .await
    .unwrap();
    room.send_profile_message(AnnounceProfileVersion { profile_version: 2 })
        .await
        .unwrap();

    let reliable: Vec<bool> = adapter
        .sent_messages()
        .into_iter()
        .map(|(_, h)| h.reliable)
        .collect();
    assert_eq!(reliable, vec![true, true, false, true]);
    assert_eq!(metrics.messages_out.get(&[("case", "chat")]), 1);
}

#[tokio::test]
async fn empty_packet_is_rejected() {
    let (adapter, room, _) = room();
    let err = room.send_packet(&Packet::empty()).await.unwrap_err();
    assert_eq!(err.code().as_str(), "INVALID_MESSAGE");
    assert!(adapter.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn oversized_scene_message_never_reaches_the_wire() {
    let (adapter, room, metrics) = room();
    let err = room
        .send_parcel_scene_message(Scene {
            scene_id: "s".into(),
            data: Bytes::from(vec![0u8; commlink_core::protocol::wire::MAX_FIELD_LEN + 1]),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "MALFORMED");
    assert!(adapter.sent.lock().unwrap().is_empty());
    assert_eq!(metrics.messages_out.get(&[("case", "scene")]), 0);
}

#[tokio::test]
async fn inbound_messages_become_typed_events() {
    let (adapter, room, _) = room();
    let seen = collect(&room);

    let chat = Message::Chat(Chat {
        message: "hello".into(),
        timestamp: 7.0,
    });
    adapter.inject("0xpeer", encode_message(&chat).unwrap());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    match &seen[0] {
        CommsEvent::ChatMessage(p) => {
            assert_eq!(p.address, "0xpeer");
            assert_eq!(p.data.message, "hello");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn malformed_inbound_is_dropped_and_counted() {
    let (adapter, room, metrics) = room();
    let seen = collect(&room);

    adapter.inject("0xpeer", Bytes::from_static(&[0xff, 0x01, 0x02]));
    adapter.inject("0xpeer", Bytes::new());

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(metrics.decode_errors.get(&[("code", "UNSUPPORTED_VERSION")]), 1);
    assert_eq!(metrics.decode_errors.get(&[("code", "MALFORMED")]), 1);

    // the room survives
    adapter.inject(
        "0xpeer",
        encode_message(&Message::ProfileVersion(AnnounceProfileVersion {
            profile_version: 3,
        }))
        .unwrap(),
    );
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn peer_events_pass_through() {
    let (adapter, room, _) = room();
    let seen = collect(&room);
    adapter
        .events
        .emit(AdapterEvent::PeerConnected(PeerEvent::new("0xp")));
    assert!(matches!(
        seen.lock().unwrap().as_slice(),
        [CommsEvent::PeerConnected(p)] if p.address == "0xp"
    ));
}

#[tokio::test]
async fn disconnect_is_idempotent_and_silences_sends() {
    let (adapter, room, _) = room();
    let disconnections = Arc::new(Mutex::new(Vec::new()));
    let d = disconnections.clone();
    room.events()
        .subscribe(CommsEventKind::Disconnection, move |ev| {
            if let CommsEvent::Disconnection(e) = ev {
                d.lock().unwrap().push(e.clone());
            }
        });

    room.connect().await.unwrap();
    room.disconnect().await.unwrap();
    room.disconnect().await.unwrap();

    assert_eq!(adapter.disconnects.load(Ordering::SeqCst), 1);
    let d = disconnections.lock().unwrap();
    assert_eq!(d.len(), 1);
    assert_eq!(d[0].reason, Some(DisconnectReason::Requested));
    assert!(!d[0].kicked);

    room.send_position(Position::default()).await.unwrap();
    assert!(adapter.sent.lock().unwrap().is_empty());
    assert!(room.connect().await.is_err());
}

#[tokio::test]
async fn voice_handler_frames_become_voice_packets() {
    let (adapter, room, _) = room();
    let handler = room.voice_handler().await.unwrap();
    let again = room.voice_handler().await.unwrap();
    assert!(Arc::ptr_eq(&handler, &again));

    let (tx, rx) = tokio::sync::mpsc::channel(4);
    handler.set_input_stream(rx).await.unwrap();
    handler.set_recording(true);
    tx.send(Bytes::from_static(b"frame")).await.unwrap();
    support::settle().await;

    let voices: Vec<Voice> = adapter
        .sent_messages()
        .into_iter()
        .filter_map(|(m, _)| match m {
            Message::Voice(v) => Some(v),
            _ => None,
        })
        .collect();
    assert_eq!(voices.len(), 1);
    assert_eq!(voices[0].encoded_samples, Bytes::from_static(b"frame"));
}

#[tokio::test]
async fn topology_without_mesh_is_self_only() {
    let (_, room, _) = room();
    let topology = room.debug_topology();
    assert_eq!(topology.self_address, SELF);
    assert_eq!(topology.edge_count(), 0);
    assert!(topology.edges.contains_key(SELF));
}

#[tokio::test]
async fn offline_room_accepts_sends_and_stays_silent() {
    let room = PacketRoomConnection::new(
        Arc::new(OfflineAdapter::new()),
        SELF,
        Arc::new(CommsMetrics::default()),
    );
    let seen = collect(&room);

    room.connect().await.unwrap();
    room.send_position(Position::at(1.0, 0.0, 1.0)).await.unwrap();
    room.send_chat(Chat {
        message: "hello".into(),
        timestamp: 1.0,
    })
    .await
    .unwrap();
    room.disconnect().await.unwrap();

    assert!(seen.lock().unwrap().is_empty());
}
