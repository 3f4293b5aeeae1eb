//! Runtime-free protocol types shared by every voicelink component.
//!
//! Nothing in this crate performs I/O: it only knows how chat-thread
//! messages look on the wire and how to turn them into typed values.

pub mod signal;
pub mod types;

pub use signal::{
    ChatMessage, DecodeError, Hangup, IceCandidate, IceCandidateInit, MessageKind, Offer, Answer,
    SdpType, SessionDescription, SignalMessage, Typing, decode, encode,
};
pub use types::user::UserId;
