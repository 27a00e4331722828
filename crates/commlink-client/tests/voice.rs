#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod support;

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use commlink_client::voice::{BasicVoiceHandler, VoiceHandler};
use commlink_core::protocol::{Position, Voice, VoiceCodec};

use support::settle;

fn frame(samples: &'static [u8]) -> Voice {
    Voice {
        encoded_samples: Bytes::from_static(samples),
        index: 0,
        codec: VoiceCodec::Opus,
    }
}

#[tokio::test]
async fn frames_flow_only_while_recording() {
    let (sink, mut out) = mpsc::unbounded_channel();
    let handler = BasicVoiceHandler::new(sink);
    let (input, rx) = mpsc::channel(8);
    handler.set_input_stream(rx).await.unwrap();
    assert!(handler.has_input());

    input.send(Bytes::from_static(b"muted")).await.unwrap();
    settle().await;
    assert!(out.try_recv().is_err());

    handler.set_recording(true);
    input.send(Bytes::from_static(b"one")).await.unwrap();
    input.send(Bytes::from_static(b"two")).await.unwrap();
    settle().await;

    let first = out.try_recv().unwrap();
    let second = out.try_recv().unwrap();
    assert_eq!(first.encoded_samples, Bytes::from_static(b"one"));
    assert_eq!((first.index, second.index), (1, 2));
    assert_eq!(first.codec, VoiceCodec::Opus);
}

#[tokio::test]
async fn recording_listener_fires_on_change_only() {
    let (sink, _out) = mpsc::unbounded_channel();
    let handler = BasicVoiceHandler::new(sink);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    handler.on_recording(Box::new(move |r| s.lock().unwrap().push(r)));

    handler.set_recording(true);
    handler.set_recording(true);
    handler.set_recording(false);

    assert_eq!(*seen.lock().unwrap(), vec![true, false]);
}

#[tokio::test]
async fn talking_follows_frames_and_empty_frame_ends_burst() {
    let (sink, _out) = mpsc::unbounded_channel();
    let handler = BasicVoiceHandler::new(sink);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    handler.on_user_talking(Box::new(move |a, t| s.lock().unwrap().push((a.to_string(), t))));

    let rel = Position::default();
    handler.play_encoded_audio("0xa", rel, frame(b"x")).await.unwrap();
    handler.play_encoded_audio("0xa", rel, frame(b"y")).await.unwrap();
    assert!(handler.is_talking("0xa"));
    handler.play_encoded_audio("0xa", rel, frame(b"")).await.unwrap();

    assert!(!handler.is_talking("0xa"));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("0xa".to_string(), true), ("0xa".to_string(), false)]
    );
}

#[tokio::test]
async fn listeners_may_register_listeners_from_a_callback() {
    let (sink, _out) = mpsc::unbounded_channel();
    let handler = Arc::new(BasicVoiceHandler::new(sink));
    let late = Arc::new(Mutex::new(Vec::new()));

    let weak = Arc::downgrade(&handler);
    let l = late.clone();
    handler.on_user_talking(Box::new(move |_, talking| {
        if talking {
            if let Some(h) = weak.upgrade() {
                let l = l.clone();
                h.on_user_talking(Box::new(move |a, t| l.lock().unwrap().push((a.to_string(), t))));
            }
        }
    }));

    let rel = Position::default();
    handler.play_encoded_audio("0xa", rel, frame(b"x")).await.unwrap();
    // registered during the first notification, so it only sees the next one
    assert!(late.lock().unwrap().is_empty());
    handler.play_encoded_audio("0xa", rel, frame(b"")).await.unwrap();

    assert_eq!(*late.lock().unwrap(), vec![("0xa".to_string(), false)]);
}

#[tokio::test]
async fn muted_handler_ignores_inbound() {
    let (sink, _out) = mpsc::unbounded_channel();
    let handler = BasicVoiceHandler::new(sink);
    handler.set_mute(true);
    handler
        .play_encoded_audio("0xa", Position::default(), frame(b"x"))
        .await
        .unwrap();
    assert!(handler.is_muted());
    assert!(!handler.is_talking("0xa"));
}

#[tokio::test]
async fn positions_and_volume_are_tracked() {
    let (sink, _out) = mpsc::unbounded_channel();
    let handler = BasicVoiceHandler::new(sink);
    handler.report_position(Position::at(1.0, 0.0, 1.0));
    handler.report_peer_position("0xa", Position::at(2.0, 0.0, 2.0));
    handler.set_volume(3.0);

    assert_eq!(handler.local_position().unwrap().position_x, 1.0);
    assert_eq!(handler.peer_position("0xa").unwrap().position_z, 2.0);
    assert_eq!(handler.volume(), 1.0);
}

#[tokio::test]
async fn destroy_stops_everything() {
    let (sink, _out) = mpsc::unbounded_channel();
    let handler = BasicVoiceHandler::new(sink);
    let (_input, rx) = mpsc::channel(8);
    handler.set_input_stream(rx).await.unwrap();
    handler.set_recording(true);

    handler.destroy().await;
    settle().await;
    assert!(!handler.is_recording());
    assert!(!handler.has_input());

    handler.set_recording(true);
    assert!(!handler.is_recording());

    let (_input, rx) = mpsc::channel(8);
    let err = handler.set_input_stream(rx).await.unwrap_err();
    assert_eq!(err.code().as_str(), "DISPOSED");
}
