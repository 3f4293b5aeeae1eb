//! Peer-to-peer voice calls signaled over chat-thread message channels.

pub mod calls;
pub mod channel;
pub mod config;
pub mod loopback;
pub mod thread;

pub use calls::{
    CallCollaborators, CallDecision, CallError, CallRegistry, CallSession, CallSnapshot,
    CallState, CallUi, IncomingCall,
};
pub use config::CallConfig;
pub use thread::{ChatListener, ChatThread, ThreadError, ThreadEvents};
pub use vlcore::UserId;
