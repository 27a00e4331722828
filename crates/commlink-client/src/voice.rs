//! Voice capability.
//!
//! Capture, encoding and spatial rendering live outside this crate; they are
//! reached through [`VoiceHandler`]. Outgoing encoded frames travel through a
//! [`VoiceFrameSink`] that the room connection drains into voice packets.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use commlink_core::error::{CommsError, Result};
use commlink_core::protocol::{Position, Voice, VoiceCodec};

/// Outgoing encoded frames, drained by the room connection.
pub type VoiceFrameSink = mpsc::UnboundedSender<Voice>;

/// Encoded frames produced by the capture pipeline.
pub type AudioInput = mpsc::Receiver<Bytes>;

pub type TalkingListener = Box<dyn Fn(&str, bool) + Send + Sync>;
pub type RecordingListener = Box<dyn Fn(bool) + Send + Sync>;
pub type ErrorListener = Box<dyn Fn(&str) + Send + Sync>;

#[async_trait]
pub trait VoiceHandler: Send + Sync {
    fn set_recording(&self, recording: bool);
    fn on_user_talking(&self, listener: TalkingListener);
    fn on_recording(&self, listener: RecordingListener);
    fn on_error(&self, listener: ErrorListener);
    fn report_position(&self, position: Position);
    fn report_peer_position(&self, address: &str, position: Position);
    fn set_volume(&self, volume: f32);
    fn set_mute(&self, mute: bool);
    async fn set_input_stream(&self, input: AudioInput) -> Result<()>;
    fn has_input(&self) -> bool;

    /// Handlers without a playback path ignore inbound frames.
    async fn play_encoded_audio(
        &self,
        _address: &str,
        _relative_position: Position,
        _frame: Voice,
    ) -> Result<()> {
        Ok(())
    }

    async fn destroy(&self);
}

/// Voice handler with state tracking and frame forwarding but no audio I/O.
///
/// Inbound frames with empty samples end the sender's talk burst.
pub struct BasicVoiceHandler {
    inner: Arc<BasicInner>,
}

struct BasicInner {
    sink: VoiceFrameSink,
    state: Mutex<VoiceState>,
    listeners: Mutex<Listeners>,
}

#[derive(Default)]
struct VoiceState {
    recording: bool,
    muted: bool,
    volume: f32,
    destroyed: bool,
    position: Option<Position>,
    peers: HashMap<String, Position>,
    talking: HashSet<String>,
    input: Option<JoinHandle<()>>,
}

// Shared so callbacks run on a snapshot, outside the lock.
#[derive(Default)]
struct Listeners {
    talking: Vec<Arc<dyn Fn(&str, bool) + Send + Sync>>,
    recording: Vec<Arc<dyn Fn(bool) + Send + Sync>>,
    error: Vec<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl BasicVoiceHandler {
    pub fn new(sink: VoiceFrameSink) -> Self {
        Self {
            inner: Arc::new(BasicInner {
                sink,
                state: Mutex::new(VoiceState {
                    volume: 1.0,
                    ..VoiceState::default()
                }),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.inner.read(|s| s.recording).unwrap_or(false)
    }

    pub fn is_muted(&self) -> bool {
        self.inner.read(|s| s.muted).unwrap_or(false)
    }

    pub fn volume(&self) -> f32 {
        self.inner.read(|s| s.volume).unwrap_or(0.0)
    }

    pub fn peer_position(&self, address: &str) -> Option<Position> {
        self.inner.read(|s| s.peers.get(address).copied()).flatten()
    }

    pub fn local_position(&self) -> Option<Position> {
        self.inner.read(|s| s.position).flatten()
    }

    pub fn is_talking(&self, address: &str) -> bool {
        self.inner.read(|s| s.talking.contains(address)).unwrap_or(false)
    }
}

impl BasicInner {
    // Poisoned lock reads as "no state".
    fn read<T>(&self, f: impl FnOnce(&VoiceState) -> T) -> Option<T> {
        self.state.lock().ok().map(|s| f(&s))
    }

    fn write<T>(&self, f: impl FnOnce(&mut VoiceState) -> T) -> Option<T> {
        self.state.lock().ok().map(|mut s| f(&mut s))
    }

    fn snapshot<T: Clone>(&self, pick: impl FnOnce(&Listeners) -> &Vec<T>) -> Vec<T> {
        self.listeners
            .lock()
            .map(|l| pick(&l).clone())
            .unwrap_or_default()
    }

    fn notify_talking(&self, address: &str, talking: bool) {
        for cb in self.snapshot(|l| &l.talking) {
            cb(address, talking);
        }
    }

    fn notify_recording(&self, recording: bool) {
        for cb in self.snapshot(|l| &l.recording) {
            cb(recording);
        }
    }

    fn notify_error(&self, message: &str) {
        tracing::warn!(error = %message, "voice handler error");
        for cb in self.snapshot(|l| &l.error) {
            cb(message);
        }
    }
}

#[async_trait]
impl VoiceHandler for BasicVoiceHandler {
    fn set_recording(&self, recording: bool) {
        let changed = self
            .inner
            .write(|s| {
                let changed = !s.destroyed && s.recording != recording;
                if changed {
                    s.recording = recording;
                }
                changed
            })
            .unwrap_or(false);
        if changed {
            self.inner.notify_recording(recording);
        }
    }

    fn on_user_talking(&self, listener: TalkingListener) {
        if let Ok(mut l) = self.inner.listeners.lock() {
            l.talking.push(Arc::from(listener));
        }
    }

    fn on_recording(&self, listener: RecordingListener) {
        if let Ok(mut l) = self.inner.listeners.lock() {
            l.recording.push(Arc::from(listener));
        }
    }

    fn on_error(&self, listener: ErrorListener) {
        if let Ok(mut l) = self.inner.listeners.lock() {
            l.error.push(Arc::from(listener));
        }
    }

    fn report_position(&self, position: Position) {
        self.inner.write(|s| s.position = Some(position));
    }

    fn report_peer_position(&self, address: &str, position: Position) {
        self.inner.write(|s| {
            s.peers.insert(address.to_string(), position);
        });
    }

    fn set_volume(&self, volume: f32) {
        self.inner.write(|s| s.volume = volume.clamp(0.0, 1.0));
    }

    fn set_mute(&self, mute: bool) {
        self.inner.write(|s| s.muted = mute);
    }

    async fn set_input_stream(&self, mut input: AudioInput) -> Result<()> {
        if self.inner.read(|s| s.destroyed).unwrap_or(true) {
            return Err(CommsError::Disposed);
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let mut index: u32 = 0;
            while let Some(encoded_samples) = input.recv().await {
                if !inner.read(|s| s.recording).unwrap_or(false) {
                    continue;
                }
                index = index.wrapping_add(1);
                let frame = Voice {
                    encoded_samples,
                    index,
                    codec: VoiceCodec::Opus,
                };
                if inner.sink.send(frame).is_err() {
                    inner.notify_error("voice sink closed");
                    break;
                }
            }
        });

        let previous = self.inner.write(|s| s.input.replace(task)).flatten();
        if let Some(prev) = previous {
            prev.abort();
        }
        Ok(())
    }

    fn has_input(&self) -> bool {
        self.inner
            .read(|s| s.input.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    async fn play_encoded_audio(
        &self,
        address: &str,
        _relative_position: Position,
        frame: Voice,
    ) -> Result<()> {
        let transition = self
            .inner
            .write(|s| {
                if s.destroyed || s.muted {
                    return None;
                }
                if frame.encoded_samples.is_empty() {
                    s.talking.remove(address).then_some(false)
                } else {
                    s.talking.insert(address.to_string()).then_some(true)
                }
            })
            .flatten();
        if let Some(talking) = transition {
            self.inner.notify_talking(address, talking);
        }
        Ok(())
    }

    async fn destroy(&self) {
        let input = self
            .inner
            .write(|s| {
                s.destroyed = true;
                s.recording = false;
                s.talking.clear();
                s.input.take()
            })
            .flatten();
        if let Some(task) = input {
            task.abort();
        }
        if let Ok(mut l) = self.inner.listeners.lock() {
            *l = Listeners::default();
        }
    }
}
