//! Per-thread call session.
//!
//! All mutable call state lives in one [`Inner`] behind an async mutex. The
//! lock is never held while awaiting a collaborator: every operation takes a
//! snapshot under the lock, releases it, awaits, and re-checks the attempt
//! counter before committing. Teardown bumps the counter, so continuations of
//! an abandoned attempt find a mismatch and back out on their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use scopeguard::ScopeGuard;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, mpsc};
use vlcore::{
    Answer, Hangup, IceCandidate, IceCandidateInit, Offer, SessionDescription, SignalMessage,
    UserId,
};

use crate::channel::MessageChannel;
use crate::config::CallConfig;

use super::error::CallError;
use super::media::{
    LocalMedia, MediaSource, PeerEventSink, PeerLink, PeerLinkEvent, PeerLinkEventKind,
    PeerLinkFactory, RemoteAudio,
};
use super::registry::CallRegistry;
use super::state::{CallState, CallTransition, InvalidTransition};
use super::ui::{CallDecision, CallUi};

/// Media, peer-link and UI collaborators for a session.
#[derive(Clone)]
pub struct CallCollaborators {
    pub media: Arc<dyn MediaSource>,
    pub links: Arc<dyn PeerLinkFactory>,
    pub ui: Arc<dyn CallUi>,
}

/// An offer that is waiting for the local user's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    /// Attempt the offer opened. Decisions for older attempts are dropped.
    pub attempt: u64,
    pub caller_id: UserId,
    pub caller_name: String,
}

/// Why a call is being torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndCause {
    LocalHangup,
    Declined,
    RemoteHangup,
    PeerLinkFailed(String),
    ChannelClosed,
    /// Media, peer-link or signaling setup failed locally.
    LocalFailure,
}

/// Read-only view of a session, for display and assertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub state: CallState,
    pub attempt: u64,
    pub peer: Option<UserId>,
    pub has_local_media: bool,
    pub has_peer_link: bool,
    pub has_remote_media: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallSnapshot {
    /// Seconds since remote audio started flowing.
    pub fn duration_secs(&self) -> Option<i64> {
        self.connected_at
            .map(|at| Utc::now().signed_duration_since(at).num_seconds())
    }
}

struct PendingOffer {
    sdp: SessionDescription,
    candidates: Vec<IceCandidateInit>,
}

/// Local media and the peer link carrying it. Held and released together.
struct CallResources {
    link_id: u64,
    local_media: Box<dyn LocalMedia>,
    peer_link: Arc<dyn PeerLink>,
}

impl CallResources {
    fn release(self) {
        self.peer_link.close();
        self.local_media.stop();
    }
}

#[derive(Default)]
struct Inner {
    state: CallState,
    attempt: u64,
    peer: Option<UserId>,
    pending_offer: Option<PendingOffer>,
    resources: Option<CallResources>,
    remote_media: Option<Weak<RemoteAudio>>,
    remote_description_applied: bool,
    /// Remote candidates that arrived before the remote description.
    buffered_candidates: Vec<IceCandidateInit>,
    /// Local candidates gathered before our offer or answer went out.
    outbound_candidates: Vec<IceCandidateInit>,
    /// Whether our offer or answer for this attempt has been sent.
    signaled: bool,
    /// An outgoing call is hidden from the UI until its media is in hand.
    outgoing_shown: bool,
    started_at: Option<DateTime<Utc>>,
    connected_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let next = self.state.apply(transition)?;
        debug!("Call state {:?} -> {:?} ({:?})", self.state, next, transition);
        self.state = next;
        Ok(())
    }

    fn begin_attempt(&mut self, peer: UserId) -> u64 {
        self.attempt += 1;
        self.peer = Some(peer);
        self.started_at = Some(Utc::now());
        self.attempt
    }

    /// Forgets everything about the current call, handing back resources
    /// for the caller to release outside the lock.
    fn clear_call(&mut self) -> Option<CallResources> {
        self.peer = None;
        self.pending_offer = None;
        self.remote_media = None;
        self.remote_description_applied = false;
        self.buffered_candidates.clear();
        self.outbound_candidates.clear();
        self.signaled = false;
        self.outgoing_shown = false;
        self.started_at = None;
        self.connected_at = None;
        self.resources.take()
    }

    fn current_link(&self) -> Option<Arc<dyn PeerLink>> {
        self.resources.as_ref().map(|r| r.peer_link.clone())
    }
}

/// Call state machine for one chat thread.
pub struct CallSession {
    thread_id: String,
    config: CallConfig,
    channel: Arc<dyn MessageChannel>,
    media: Arc<dyn MediaSource>,
    links: Arc<dyn PeerLinkFactory>,
    ui: Arc<dyn CallUi>,
    registry: Arc<CallRegistry>,
    peer_events: mpsc::UnboundedSender<PeerLinkEvent>,
    link_ids: AtomicU64,
    inner: Mutex<Inner>,
}

impl CallSession {
    /// Creates an idle session. The returned receiver carries peer-link
    /// events and must be fed back through [`CallSession::handle_peer_event`].
    pub fn new(
        thread_id: impl Into<String>,
        config: CallConfig,
        channel: Arc<dyn MessageChannel>,
        collaborators: CallCollaborators,
        registry: Arc<CallRegistry>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerLinkEvent>) {
        let (peer_events, peer_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            thread_id: thread_id.into(),
            config,
            channel,
            media: collaborators.media,
            links: collaborators.links,
            ui: collaborators.ui,
            registry,
            peer_events,
            link_ids: AtomicU64::new(0),
            inner: Mutex::new(Inner::default()),
        });
        (session, peer_rx)
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn local_user_id(&self) -> &UserId {
        &self.config.local_user_id
    }

    pub async fn state(&self) -> CallState {
        self.inner.lock().await.state
    }

    pub async fn snapshot(&self) -> CallSnapshot {
        let inner = self.inner.lock().await;
        CallSnapshot {
            state: inner.state,
            attempt: inner.attempt,
            peer: inner.peer.clone(),
            has_local_media: inner.resources.is_some(),
            has_peer_link: inner.resources.is_some(),
            has_remote_media: inner
                .remote_media
                .as_ref()
                .is_some_and(|audio| audio.strong_count() > 0),
            started_at: inner.started_at,
            connected_at: inner.connected_at,
        }
    }

    /// Remote audio for playback, while the peer link still carries it.
    pub async fn remote_audio(&self) -> Option<Arc<RemoteAudio>> {
        let inner = self.inner.lock().await;
        inner.remote_media.as_ref().and_then(Weak::upgrade)
    }

    /// Calls `peer` on this thread.
    pub async fn start_call(&self, peer: UserId) -> Result<(), CallError> {
        let attempt = {
            let mut inner = self.inner.lock().await;
            let next = inner.state.apply(CallTransition::StartRequested)?;
            if !self.registry.try_claim(&self.thread_id, &peer) {
                drop(inner);
                warn!(
                    "Not calling {} on thread {}: another call is in progress",
                    peer, self.thread_id
                );
                self.ui.report_error("Another call is already in progress.");
                return Err(CallError::Busy);
            }
            inner.state = next;
            inner.begin_attempt(peer.clone())
        };

        info!("Calling {} on thread {}", peer, self.thread_id);

        let link = self.open_link(attempt).await?;
        {
            // Under the lock, so a concurrent teardown's idle UI comes after.
            let mut inner = self.lock_current(attempt).await?;
            inner.outgoing_shown = true;
            self.ui.show_outgoing_ui();
        }
        let result = self.send_offer(attempt, &link).await;
        self.finish_setup(attempt, result).await
    }

    /// Accepts the pending incoming call.
    pub async fn accept(&self) -> Result<(), CallError> {
        let (attempt, offer) = {
            let mut inner = self.inner.lock().await;
            let next = inner.state.apply(CallTransition::Accepted)?;
            let Some(offer) = inner.pending_offer.take() else {
                return Err(InvalidTransition::new(inner.state, CallTransition::Accepted).into());
            };
            inner.state = next;
            (inner.attempt, offer)
        };

        info!("Accepted incoming call on thread {}", self.thread_id);
        self.ui.show_outgoing_ui();

        let link = self.open_link(attempt).await?;
        let result = self.send_answer(attempt, &link, offer).await;
        self.finish_setup(attempt, result).await
    }

    /// Declines the pending incoming call and tells the caller.
    pub async fn decline(&self) -> Result<(), CallError> {
        let attempt = {
            let inner = self.inner.lock().await;
            if !inner.state.can_accept() {
                return Err(InvalidTransition::new(inner.state, CallTransition::Teardown).into());
            }
            inner.attempt
        };
        info!("Declining incoming call on thread {}", self.thread_id);
        self.teardown(EndCause::Declined, Some(attempt)).await;
        Ok(())
    }

    /// Ends the call in any non-idle state. No-op when idle.
    pub async fn hang_up(&self) {
        if !self.teardown(EndCause::LocalHangup, None).await {
            debug!("Hang up on thread {} with no call", self.thread_id);
        }
    }

    /// Asks the UI about `call`. The session is not locked while waiting.
    pub async fn prompt_incoming(&self, call: &IncomingCall) -> CallDecision {
        self.ui.prompt_incoming_call(&call.caller_name).await
    }

    /// Applies the user's decision, unless the call it was made for is gone.
    pub async fn resolve_incoming(
        &self,
        call: &IncomingCall,
        decision: CallDecision,
    ) -> Result<(), CallError> {
        {
            let inner = self.inner.lock().await;
            if inner.attempt != call.attempt || !inner.state.can_accept() {
                debug!(
                    "Dropping {:?} for call attempt {} from {}: no longer pending",
                    decision, call.attempt, call.caller_id
                );
                return Err(CallError::Cancelled);
            }
        }

        match decision {
            CallDecision::Accept => self.accept().await,
            CallDecision::Decline => self.decline().await,
        }
    }

    /// Prompts for `call` and applies the answer.
    pub async fn answer_incoming(&self, call: IncomingCall) -> Result<(), CallError> {
        let decision = self.prompt_incoming(&call).await;
        self.resolve_incoming(&call, decision).await
    }

    /// Routes one decoded call signal.
    ///
    /// Returns the incoming call when an offer opened one. The caller is
    /// expected to prompt for it without blocking further signal handling.
    pub async fn handle_signal(&self, message: SignalMessage) -> Option<IncomingCall> {
        if message.sender_id() == self.local_user_id() {
            debug!("Ignoring own {} echoed on thread {}", message.kind(), self.thread_id);
            return None;
        }

        match message {
            SignalMessage::Offer(offer) => self.on_offer(offer).await,
            SignalMessage::Answer(answer) => {
                self.on_answer(answer).await;
                None
            }
            SignalMessage::IceCandidate(candidate) => {
                self.on_remote_candidate(candidate).await;
                None
            }
            SignalMessage::Hangup(hangup) => {
                self.on_hangup(hangup).await;
                None
            }
            SignalMessage::ChatMessage(_) | SignalMessage::Typing(_) => None,
        }
    }

    pub async fn handle_peer_event(&self, event: PeerLinkEvent) {
        let attempt = {
            let mut inner = self.inner.lock().await;
            match &inner.resources {
                Some(resources) if resources.link_id == event.link_id => {}
                _ => {
                    debug!("Ignoring event from stale peer link {}", event.link_id);
                    return;
                }
            }
            if let PeerLinkEventKind::IceCandidate(candidate) = &event.kind
                && !inner.signaled
            {
                inner.outbound_candidates.push(candidate.clone());
                return;
            }
            inner.attempt
        };

        match event.kind {
            PeerLinkEventKind::IceCandidate(candidate) => {
                self.send_local_candidate(candidate).await;
            }
            PeerLinkEventKind::Track(audio) => self.on_remote_track(attempt, audio).await,
            PeerLinkEventKind::Failed(reason) => {
                warn!("Peer link on thread {} failed: {}", self.thread_id, reason);
                if self
                    .teardown(EndCause::PeerLinkFailed(reason), Some(attempt))
                    .await
                {
                    self.ui.report_error("Call connection failed.");
                }
            }
        }
    }

    /// Tears down any call after the channel is gone. No hangup is sent.
    pub async fn handle_channel_closed(&self) {
        if self.teardown(EndCause::ChannelClosed, None).await {
            info!("Call on thread {} ended: channel closed", self.thread_id);
        }
    }

    async fn on_offer(&self, offer: Offer) -> Option<IncomingCall> {
        let caller = offer.sender_id;
        let incoming = {
            let mut inner = self.inner.lock().await;
            match inner.state.apply(CallTransition::OfferReceived) {
                Ok(next) if self.registry.try_claim(&self.thread_id, &caller) => {
                    inner.state = next;
                    let attempt = inner.begin_attempt(caller.clone());
                    inner.pending_offer = Some(PendingOffer {
                        sdp: offer.offer_sdp,
                        candidates: Vec::new(),
                    });
                    let caller_name = if offer.sender_first_name.is_empty() {
                        caller.to_string()
                    } else {
                        offer.sender_first_name
                    };
                    Some(IncomingCall {
                        attempt,
                        caller_id: caller.clone(),
                        caller_name,
                    })
                }
                _ => None,
            }
        };

        match incoming {
            Some(call) => {
                info!(
                    "Incoming call from {} ({}) on thread {}",
                    call.caller_name, call.caller_id, self.thread_id
                );
                Some(call)
            }
            None => {
                info!("Busy: refusing offer from {} on thread {}", caller, self.thread_id);
                self.send_hangup(&caller).await;
                None
            }
        }
    }

    async fn on_answer(&self, answer: Answer) {
        let (attempt, link) = {
            let inner = self.inner.lock().await;
            if inner.state.apply(CallTransition::AnswerApplied).is_err() {
                debug!("Ignoring answer in state {:?}", inner.state);
                return;
            }
            if inner.peer.as_ref() != Some(&answer.sender_id) || inner.remote_description_applied
            {
                debug!("Ignoring unexpected answer from {}", answer.sender_id);
                return;
            }
            let Some(link) = inner.current_link() else {
                debug!("Ignoring answer before the peer link exists");
                return;
            };
            (inner.attempt, link)
        };

        if let Err(e) = link.set_remote_description(answer.answer_sdp).await {
            let error = self.abort_attempt(attempt, e.into()).await;
            warn!("Could not apply answer on thread {}: {}", self.thread_id, error);
            return;
        }

        let candidates = {
            let Ok(mut inner) = self.lock_current(attempt).await else {
                return;
            };
            inner.remote_description_applied = true;
            if let Err(e) = inner.transition(CallTransition::AnswerApplied) {
                debug!("{e}");
            }
            std::mem::take(&mut inner.buffered_candidates)
        };
        self.add_remote_candidates(link.as_ref(), candidates).await;
    }

    async fn on_remote_candidate(&self, message: IceCandidate) {
        let link = {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_in_call() {
                debug!(
                    "Dropping ICE candidate from {} in state {:?}",
                    message.sender_id, inner.state
                );
                return;
            }
            if inner.peer.as_ref() != Some(&message.sender_id) {
                debug!("Dropping ICE candidate from non-peer {}", message.sender_id);
                return;
            }
            if let Some(pending) = inner.pending_offer.as_mut() {
                pending.candidates.push(message.candidate);
                return;
            }
            match inner.current_link() {
                Some(link) if inner.remote_description_applied => link,
                _ => {
                    inner.buffered_candidates.push(message.candidate);
                    return;
                }
            }
        };
        self.add_remote_candidates(link.as_ref(), vec![message.candidate])
            .await;
    }

    async fn on_hangup(&self, hangup: Hangup) {
        if !hangup.is_addressed_to(self.local_user_id()) {
            debug!(
                "Ignoring hangup from {} addressed to someone else",
                hangup.sender_id
            );
            return;
        }
        let attempt = {
            let inner = self.inner.lock().await;
            if !inner.state.is_in_call() || inner.peer.as_ref() != Some(&hangup.sender_id) {
                debug!(
                    "Ignoring hangup from {} in state {:?}",
                    hangup.sender_id, inner.state
                );
                return;
            }
            inner.attempt
        };
        info!("{} hung up on thread {}", hangup.sender_id, self.thread_id);
        self.teardown(EndCause::RemoteHangup, Some(attempt)).await;
    }

    async fn on_remote_track(&self, attempt: u64, audio: Arc<RemoteAudio>) {
        {
            let Ok(mut inner) = self.lock_current(attempt).await else {
                return;
            };
            let was_active = inner.state.is_active();
            if let Err(e) = inner.transition(CallTransition::RemoteTrack) {
                debug!("Ignoring remote track: {e}");
                return;
            }
            inner.remote_media = Some(Arc::downgrade(&audio));
            if was_active {
                return;
            }
            inner.connected_at = Some(Utc::now());
        }
        info!(
            "Call on thread {} is active (stream {})",
            self.thread_id,
            audio.stream_id()
        );
        self.ui.show_active_ui();
    }

    /// Acquires local audio and a peer link carrying it, and commits both
    /// to the session. Nothing is left running if the attempt is abandoned.
    async fn open_link(&self, attempt: u64) -> Result<Arc<dyn PeerLink>, CallError> {
        let media = match self.media.request_audio_input().await {
            Ok(media) => media,
            Err(e) => return Err(self.abort_attempt(attempt, e.into()).await),
        };
        let media = scopeguard::guard(media, |media| media.stop());
        self.ensure_current(attempt).await?;

        let link_id = self.link_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let sink = PeerEventSink::new(link_id, self.peer_events.clone());
        let link = match self.links.create(&self.config.stun_servers, sink).await {
            Ok(link) => link,
            Err(e) => return Err(self.abort_attempt(attempt, e.into()).await),
        };
        let link = scopeguard::guard(link, |link| link.close());

        for track in media.tracks() {
            if let Err(e) = link.add_track(&track) {
                return Err(self.abort_attempt(attempt, e.into()).await);
            }
        }

        let mut inner = self.lock_current(attempt).await?;
        let link = ScopeGuard::into_inner(link);
        inner.resources = Some(CallResources {
            link_id,
            local_media: ScopeGuard::into_inner(media),
            peer_link: link.clone(),
        });
        debug!("Peer link {} ready on thread {}", link_id, self.thread_id);
        Ok(link)
    }

    async fn send_offer(&self, attempt: u64, link: &Arc<dyn PeerLink>) -> Result<(), CallError> {
        let offer = link.create_offer().await?;
        link.set_local_description(offer.clone()).await?;
        self.ensure_current(attempt).await?;

        self.send_signal(&SignalMessage::Offer(Offer {
            sender_id: self.local_user_id().clone(),
            sender_first_name: self.config.local_first_name.clone(),
            offer_sdp: offer,
        }))
        .await?;
        self.mark_signaled(attempt).await;
        Ok(())
    }

    async fn send_answer(
        &self,
        attempt: u64,
        link: &Arc<dyn PeerLink>,
        offer: PendingOffer,
    ) -> Result<(), CallError> {
        link.set_remote_description(offer.sdp).await?;
        let candidates = {
            let mut inner = self.lock_current(attempt).await?;
            inner.remote_description_applied = true;
            let mut candidates = offer.candidates;
            candidates.append(&mut inner.buffered_candidates);
            candidates
        };
        self.add_remote_candidates(link.as_ref(), candidates).await;

        let answer = link.create_answer().await?;
        link.set_local_description(answer.clone()).await?;
        self.ensure_current(attempt).await?;

        self.send_signal(&SignalMessage::Answer(Answer {
            sender_id: self.local_user_id().clone(),
            answer_sdp: answer,
        }))
        .await?;
        self.mark_signaled(attempt).await;
        Ok(())
    }

    async fn finish_setup(
        &self,
        attempt: u64,
        result: Result<(), CallError>,
    ) -> Result<(), CallError> {
        match result {
            Ok(()) => Ok(()),
            Err(CallError::Cancelled) => Err(CallError::Cancelled),
            Err(e) => Err(self.abort_attempt(attempt, e).await),
        }
    }

    /// Tears down `attempt` after a local failure and reports it. Returns the
    /// error to propagate, which is [`CallError::Cancelled`] when the attempt
    /// was already gone.
    async fn abort_attempt(&self, attempt: u64, error: CallError) -> CallError {
        if !self.teardown(EndCause::LocalFailure, Some(attempt)).await {
            debug!("Attempt {} already ended: {}", attempt, error);
            return CallError::Cancelled;
        }
        warn!("Call on thread {} failed: {}", self.thread_id, error);
        let message = match &error {
            CallError::Media(e) => format!("Could not access microphone: {e}"),
            other => format!("Call failed: {other}"),
        };
        self.ui.report_error(&message);
        error
    }

    /// Ends the current call. With `Some(attempt)`, only if that attempt is
    /// still the current one. Returns whether a call was torn down.
    async fn teardown(&self, cause: EndCause, attempt: Option<u64>) -> bool {
        let (resources, peer, notify_peer, reset_ui) = {
            let mut inner = self.inner.lock().await;
            if attempt.is_some_and(|a| a != inner.attempt) || !inner.state.is_in_call() {
                return false;
            }
            let reset_ui = inner.state != CallState::Outgoing || inner.outgoing_shown;
            if let Err(e) = inner.transition(CallTransition::Teardown) {
                warn!("{e}");
                return false;
            }
            inner.attempt += 1;
            let notify_peer = match cause {
                EndCause::LocalHangup | EndCause::Declined => true,
                EndCause::LocalFailure => inner.signaled,
                EndCause::RemoteHangup | EndCause::PeerLinkFailed(_) | EndCause::ChannelClosed => {
                    false
                }
            };
            let peer = inner.peer.clone();
            (inner.clear_call(), peer, notify_peer, reset_ui)
        };

        info!("Ending call on thread {} ({:?})", self.thread_id, cause);
        if let Some(resources) = resources {
            resources.release();
        }
        self.registry.release(&self.thread_id);
        if reset_ui {
            self.ui.show_idle_ui();
        }

        if notify_peer && let Some(peer) = &peer {
            self.send_hangup(peer).await;
        }

        let mut inner = self.inner.lock().await;
        if let Err(e) = inner.transition(CallTransition::TeardownComplete) {
            warn!("{e}");
        }
        true
    }

    async fn mark_signaled(&self, attempt: u64) {
        let pending = {
            let Ok(mut inner) = self.lock_current(attempt).await else {
                return;
            };
            inner.signaled = true;
            std::mem::take(&mut inner.outbound_candidates)
        };
        for candidate in pending {
            self.send_local_candidate(candidate).await;
        }
    }

    async fn send_local_candidate(&self, candidate: IceCandidateInit) {
        let message = SignalMessage::IceCandidate(IceCandidate {
            sender_id: self.local_user_id().clone(),
            candidate,
        });
        if let Err(e) = self.send_signal(&message).await {
            warn!("Failed to relay ICE candidate on thread {}: {}", self.thread_id, e);
        }
    }

    async fn add_remote_candidates(&self, link: &dyn PeerLink, candidates: Vec<IceCandidateInit>) {
        for candidate in candidates {
            if let Err(e) = link.add_ice_candidate(candidate).await {
                warn!("Failed to add ICE candidate on thread {}: {}", self.thread_id, e);
            }
        }
    }

    /// Best-effort hangup addressed to `target`.
    async fn send_hangup(&self, target: &UserId) {
        if !self.channel.is_open() {
            debug!("Channel closed, not sending hangup to {}", target);
            return;
        }
        let message = SignalMessage::Hangup(Hangup {
            sender_id: self.local_user_id().clone(),
            target_id: Some(target.clone()),
        });
        if let Err(e) = self.send_signal(&message).await {
            warn!("Failed to send hangup to {}: {}", target, e);
        }
    }

    async fn send_signal(&self, message: &SignalMessage) -> Result<(), CallError> {
        let text = vlcore::encode(message)?;
        debug!("Sending {} on thread {}", message.kind(), self.thread_id);
        self.channel.send(text).await?;
        Ok(())
    }

    async fn lock_current(&self, attempt: u64) -> Result<MutexGuard<'_, Inner>, CallError> {
        let inner = self.inner.lock().await;
        if inner.attempt != attempt {
            debug!("Call attempt {} on thread {} was abandoned", attempt, self.thread_id);
            return Err(CallError::Cancelled);
        }
        Ok(inner)
    }

    async fn ensure_current(&self, attempt: u64) -> Result<(), CallError> {
        self.lock_current(attempt).await.map(drop)
    }
}
