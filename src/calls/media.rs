//! Local media and peer-link collaborators.
//!
//! The session never touches audio devices or ICE directly. A [`MediaSource`]
//! hands out [`LocalMedia`] and a [`PeerLinkFactory`] builds one [`PeerLink`]
//! per call attempt. Peer links report asynchronous happenings through a
//! [`PeerEventSink`], which stamps every event with the link it came from so
//! late events from a replaced link can be told apart.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use vlcore::{IceCandidateInit, SessionDescription};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("no audio input device")]
    NoDevice,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerLinkError {
    #[error("failed to create peer link: {0}")]
    Create(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("rejected ICE candidate: {0}")]
    Candidate(String),

    #[error("peer link is closed")]
    Closed,
}

/// One captured local track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
}

impl MediaTrack {
    pub fn audio(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Captured microphone input.
pub trait LocalMedia: Send + Sync {
    fn tracks(&self) -> Vec<MediaTrack>;

    /// Stops every track. Idempotent.
    fn stop(&self);
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Requests microphone-only capture.
    async fn request_audio_input(&self) -> Result<Box<dyn LocalMedia>, MediaError>;
}

/// Handle to an inbound remote audio stream.
///
/// The peer link owns the stream. Sessions only keep a weak reference for
/// playback.
#[derive(Debug)]
pub struct RemoteAudio {
    stream_id: String,
}

impl RemoteAudio {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }
}

/// A peer-to-peer media connection for one call attempt.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn add_track(&self, track: &MediaTrack) -> Result<(), PeerLinkError>;

    async fn create_offer(&self) -> Result<SessionDescription, PeerLinkError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerLinkError>;

    async fn set_local_description(&self, desc: SessionDescription)
    -> Result<(), PeerLinkError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), PeerLinkError>;

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), PeerLinkError>;

    /// Closes the link and drops any remote stream. Idempotent.
    fn close(&self);
}

#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create(
        &self,
        stun_servers: &[String],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerLink>, PeerLinkError>;
}

#[derive(Debug, Clone)]
pub enum PeerLinkEventKind {
    /// A local ICE candidate was gathered and should be relayed to the peer.
    IceCandidate(IceCandidateInit),
    /// Remote audio arrived.
    Track(Arc<RemoteAudio>),
    /// The connection failed and will not recover.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PeerLinkEvent {
    pub link_id: u64,
    pub kind: PeerLinkEventKind,
}

/// Sender handed to a peer link for reporting events back to its session.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    link_id: u64,
    tx: mpsc::UnboundedSender<PeerLinkEvent>,
}

impl PeerEventSink {
    pub fn new(link_id: u64, tx: mpsc::UnboundedSender<PeerLinkEvent>) -> Self {
        Self { link_id, tx }
    }

    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Returns false once the session is gone.
    pub fn emit(&self, kind: PeerLinkEventKind) -> bool {
        self.tx
            .send(PeerLinkEvent {
                link_id: self.link_id,
                kind,
            })
            .is_ok()
    }

    pub fn ice_candidate(&self, candidate: IceCandidateInit) -> bool {
        self.emit(PeerLinkEventKind::IceCandidate(candidate))
    }

    pub fn track(&self, audio: Arc<RemoteAudio>) -> bool {
        self.emit(PeerLinkEventKind::Track(audio))
    }

    pub fn failed(&self, reason: impl Into<String>) -> bool {
        self.emit(PeerLinkEventKind::Failed(reason.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_stamps_link_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = PeerEventSink::new(7, tx);

        assert!(sink.ice_candidate(IceCandidateInit::new("candidate:1")));
        assert!(sink.failed("ice failed"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.link_id, 7);
        assert!(matches!(
            first.kind,
            PeerLinkEventKind::IceCandidate(ref c) if c.candidate == "candidate:1"
        ));

        let second = rx.recv().await.unwrap();
        assert!(matches!(second.kind, PeerLinkEventKind::Failed(ref r) if r == "ice failed"));

        drop(rx);
        assert!(!sink.track(Arc::new(RemoteAudio::new("s"))));
    }
}
