//! Protocol modules (packet model, binary codec, profile payload).
//!
//! All parsers are panic-free: malformed input is reported as `CommsError`
//! (or collapsed to the empty packet by `decode_packet`) instead of panicking
//! or indexing raw buffers, so hostile peers cannot bring a client down.

pub mod codec;
pub mod packet;
pub mod profile;
pub mod wire;

pub use codec::{decode_packet, encode_message, encode_packet, peek_case, try_decode_packet};
pub use packet::{
    AnnounceProfileVersion, Chat, Message, Packet, PacketCase, Position, ProfileRequest,
    ProfileResponse, Scene, Voice, VoiceCodec,
};
pub use profile::Profile;
