//! Call-related error types.

use thiserror::Error;
use voicelink_tokio_transport::ChannelError;

use super::media::{MediaError, PeerLinkError};
use super::state::InvalidTransition;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("another call is already in progress")]
    Busy,

    #[error("local audio unavailable: {0}")]
    Media(#[from] MediaError),

    #[error("peer link error: {0}")]
    PeerLink(#[from] PeerLinkError),

    #[error("signaling send failed: {0}")]
    Signaling(#[from] ChannelError),

    #[error("failed to encode signal: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("call attempt was cancelled")]
    Cancelled,
}
