//! Voice-call signaling over a chat thread's message channel.
//!
//! # Architecture
//!
//! - [`CallState`] & [`CallTransition`]: the pure transition table
//! - [`CallSession`]: state machine and owner of the local media / peer link pair
//! - [`MediaSource`], [`PeerLinkFactory`], [`CallUi`]: injected collaborators
//! - [`CallRegistry`]: process-wide guard allowing at most one call at a time
//!
//! # Protocol Overview
//!
//! The caller sends `webrtc_offer`, the callee answers with `webrtc_answer`
//! after the user accepts, and both sides trickle `webrtc_ice_candidate`
//! messages. `webrtc_hangup` ends, declines or refuses a call.

mod error;
mod media;
mod registry;
mod session;
mod state;
mod ui;

pub use error::CallError;
pub use media::{
    LocalMedia, MediaError, MediaSource, MediaTrack, PeerEventSink, PeerLink, PeerLinkError,
    PeerLinkEvent, PeerLinkEventKind, PeerLinkFactory, RemoteAudio,
};
pub use registry::{CallRegistry, CallSlot};
pub use session::{CallCollaborators, CallSession, CallSnapshot, EndCause, IncomingCall};
pub use state::{CallState, CallTransition, InvalidTransition};
pub use ui::{CallDecision, CallUi};
