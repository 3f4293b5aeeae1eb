//! In-memory collaborators for the demo binary and tests.
//!
//! [`LoopbackHub`] behaves like the chat server: every frame a member sends
//! is delivered to all members of the hub, the sender included.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{Notify, mpsc};
use vlcore::{IceCandidateInit, MessageKind, SdpType, SessionDescription, SignalMessage};

use crate::calls::{
    CallDecision, CallUi, LocalMedia, MediaError, MediaSource, MediaTrack, PeerEventSink,
    PeerLink, PeerLinkError, PeerLinkFactory, RemoteAudio,
};
use crate::channel::{ChannelError, ChannelEvent, ChannelFactory, MessageChannel};

const EVENT_BUFFER: usize = 256;

struct Member {
    events: mpsc::Sender<ChannelEvent>,
    open: Arc<AtomicBool>,
}

/// A single in-memory chat thread. Clones share the same members.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    members: Arc<Mutex<Vec<Member>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member and returns its channel and inbound events.
    pub fn join(&self) -> (Arc<LoopbackChannel>, mpsc::Receiver<ChannelEvent>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let open = Arc::new(AtomicBool::new(true));
        self.members.lock().unwrap().push(Member {
            events: events.clone(),
            open: open.clone(),
        });
        let channel = Arc::new(LoopbackChannel {
            hub: self.clone(),
            open,
            events,
            sent: Mutex::new(Vec::new()),
        });
        (channel, rx)
    }

    async fn broadcast(&self, text: &str) {
        let targets: Vec<_> = {
            let mut members = self.members.lock().unwrap();
            members.retain(|m| m.open.load(Ordering::Acquire));
            members.iter().map(|m| m.events.clone()).collect()
        };
        for target in targets {
            if target
                .send(ChannelEvent::Message(text.to_string()))
                .await
                .is_err()
            {
                debug!("Loopback member went away");
            }
        }
    }

    /// Closes every member's channel, as if the server went down.
    pub async fn shut_down(&self) {
        let members: Vec<_> = self.members.lock().unwrap().drain(..).collect();
        for member in members {
            if member.open.swap(false, Ordering::AcqRel) {
                let _ = member.events.send(ChannelEvent::Closed).await;
            }
        }
    }
}

#[async_trait]
impl ChannelFactory for LoopbackHub {
    async fn connect(
        &self,
        thread_id: &str,
    ) -> Result<(Arc<dyn MessageChannel>, mpsc::Receiver<ChannelEvent>), anyhow::Error> {
        debug!("Joining loopback thread {thread_id}");
        let (channel, events) = self.join();
        Ok((channel, events))
    }
}

/// One member's connection to a [`LoopbackHub`]. Records what it sends.
pub struct LoopbackChannel {
    hub: LoopbackHub,
    open: Arc<AtomicBool>,
    events: mpsc::Sender<ChannelEvent>,
    sent: Mutex<Vec<String>>,
}

impl LoopbackChannel {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent frames that decode, in order.
    pub fn sent_messages(&self) -> Vec<SignalMessage> {
        self.sent()
            .iter()
            .filter_map(|text| vlcore::decode(text).ok())
            .collect()
    }

    pub fn sent_count(&self, kind: MessageKind) -> usize {
        self.sent_messages()
            .iter()
            .filter(|m| m.kind() == kind)
            .count()
    }

    /// Drops this member's connection and delivers `Closed` to it.
    pub async fn disconnect(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.events.send(ChannelEvent::Closed).await;
        }
    }
}

#[async_trait]
impl MessageChannel for LoopbackChannel {
    async fn send(&self, text: String) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        self.sent.lock().unwrap().push(text.clone());
        self.hub.broadcast(&text).await;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.disconnect().await;
    }
}

/// What a [`SimulatedMediaSource`] does on the next request.
#[derive(Debug, Clone)]
pub enum MediaBehavior {
    Grant,
    Deny(MediaError),
    /// Grants once the gate is notified.
    WaitFor(Arc<Notify>),
}

#[derive(Debug, Default)]
struct MediaCounters {
    acquired: AtomicUsize,
    stopped: AtomicUsize,
}

pub struct SimulatedMediaSource {
    behavior: Mutex<MediaBehavior>,
    counters: Arc<MediaCounters>,
}

impl SimulatedMediaSource {
    pub fn new() -> Arc<Self> {
        Self::with_behavior(MediaBehavior::Grant)
    }

    pub fn with_behavior(behavior: MediaBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            counters: Arc::default(),
        })
    }

    pub fn set_behavior(&self, behavior: MediaBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn acquired(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    /// Captures handed out and not yet stopped.
    pub fn live(&self) -> usize {
        self.acquired() - self.counters.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for SimulatedMediaSource {
    async fn request_audio_input(&self) -> Result<Box<dyn LocalMedia>, MediaError> {
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            MediaBehavior::Grant => {}
            MediaBehavior::Deny(e) => return Err(e),
            MediaBehavior::WaitFor(gate) => gate.notified().await,
        }
        let index = self.counters.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(SimulatedLocalMedia {
            id: format!("mic-{index}"),
            stopped: AtomicBool::new(false),
            counters: self.counters.clone(),
        }))
    }
}

struct SimulatedLocalMedia {
    id: String,
    stopped: AtomicBool,
    counters: Arc<MediaCounters>,
}

impl LocalMedia for SimulatedLocalMedia {
    fn tracks(&self) -> Vec<MediaTrack> {
        vec![MediaTrack::audio(format!("{}-audio", self.id))]
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedLinkOptions {
    /// Emit a remote track once both descriptions are set.
    pub auto_connect: bool,
    /// Local candidates to emit after the local description is set.
    pub local_candidates: usize,
    pub fail_create: bool,
    pub fail_negotiation: bool,
}

/// An operation performed on a [`SimulatedPeerLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOp {
    AddTrack(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    Close,
}

#[derive(Default)]
pub struct SimulatedPeerLinkFactory {
    options: Mutex<SimulatedLinkOptions>,
    links: Mutex<Vec<Arc<SimulatedPeerLink>>>,
}

impl SimulatedPeerLinkFactory {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn with_options(options: SimulatedLinkOptions) -> Arc<Self> {
        let factory = Self::new();
        factory.set_options(options);
        factory
    }

    pub fn set_options(&self, options: SimulatedLinkOptions) {
        *self.options.lock().unwrap() = options;
    }

    pub fn links(&self) -> Vec<Arc<SimulatedPeerLink>> {
        self.links.lock().unwrap().clone()
    }

    pub fn last_link(&self) -> Option<Arc<SimulatedPeerLink>> {
        self.links.lock().unwrap().last().cloned()
    }

    pub fn open_links(&self) -> usize {
        self.links().iter().filter(|l| !l.is_closed()).count()
    }
}

#[async_trait]
impl PeerLinkFactory for SimulatedPeerLinkFactory {
    async fn create(
        &self,
        stun_servers: &[String],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerLink>, PeerLinkError> {
        let options = self.options.lock().unwrap().clone();
        if options.fail_create {
            return Err(PeerLinkError::Create("simulated failure".into()));
        }
        let link = Arc::new(SimulatedPeerLink {
            stun_servers: stun_servers.to_vec(),
            events,
            options,
            ops: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            has_local: AtomicBool::new(false),
            has_remote: AtomicBool::new(false),
            remote_audio: Mutex::new(None),
        });
        self.links.lock().unwrap().push(link.clone());
        Ok(link)
    }
}

pub struct SimulatedPeerLink {
    stun_servers: Vec<String>,
    events: PeerEventSink,
    options: SimulatedLinkOptions,
    ops: Mutex<Vec<LinkOp>>,
    closed: AtomicBool,
    has_local: AtomicBool,
    has_remote: AtomicBool,
    remote_audio: Mutex<Option<Arc<RemoteAudio>>>,
}

impl SimulatedPeerLink {
    pub fn link_id(&self) -> u64 {
        self.events.link_id()
    }

    pub fn stun_servers(&self) -> &[String] {
        &self.stun_servers
    }

    pub fn ops(&self) -> Vec<LinkOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn remote_candidates(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                LinkOp::AddCandidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Starts "receiving" remote audio.
    pub fn emit_track(&self) -> Arc<RemoteAudio> {
        let audio = Arc::new(RemoteAudio::new(format!("remote-{}", self.link_id())));
        *self.remote_audio.lock().unwrap() = Some(audio.clone());
        self.events.track(audio.clone());
        audio
    }

    pub fn emit_local_candidate(&self, candidate: &str) {
        self.events.ice_candidate(IceCandidateInit::new(candidate));
    }

    pub fn emit_failure(&self, reason: &str) {
        self.events.failed(reason);
    }

    fn record(&self, op: LinkOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn check_open(&self) -> Result<(), PeerLinkError> {
        if self.is_closed() {
            Err(PeerLinkError::Closed)
        } else {
            Ok(())
        }
    }

    fn maybe_connect(&self) {
        if self.options.auto_connect
            && self.has_local.load(Ordering::SeqCst)
            && self.has_remote.load(Ordering::SeqCst)
        {
            self.emit_track();
        }
    }
}

#[async_trait]
impl PeerLink for SimulatedPeerLink {
    fn add_track(&self, track: &MediaTrack) -> Result<(), PeerLinkError> {
        self.check_open()?;
        self.record(LinkOp::AddTrack(track.id.clone()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerLinkError> {
        self.check_open()?;
        self.record(LinkOp::CreateOffer);
        if self.options.fail_negotiation {
            return Err(PeerLinkError::Negotiation("simulated failure".into()));
        }
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=- {} 1 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
            self.link_id()
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerLinkError> {
        self.check_open()?;
        self.record(LinkOp::CreateAnswer);
        if self.options.fail_negotiation {
            return Err(PeerLinkError::Negotiation("simulated failure".into()));
        }
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
            self.link_id()
        )))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), PeerLinkError> {
        self.check_open()?;
        self.record(LinkOp::SetLocal(desc.sdp_type));
        self.has_local.store(true, Ordering::SeqCst);
        for i in 0..self.options.local_candidates {
            self.emit_local_candidate(&format!(
                "candidate:{i} 1 udp 2122260223 192.168.1.{} 5{i:04} typ host",
                self.link_id()
            ));
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), PeerLinkError> {
        self.check_open()?;
        self.record(LinkOp::SetRemote(desc.sdp_type));
        self.has_remote.store(true, Ordering::SeqCst);
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), PeerLinkError> {
        self.check_open()?;
        self.record(LinkOp::AddCandidate(candidate.candidate));
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.remote_audio.lock().unwrap().take();
            self.record(LinkOp::Close);
        }
    }
}

/// Something a [`ScriptedUi`] was asked to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Outgoing,
    Active,
    Idle,
    Prompt(String),
    Error(String),
}

/// A [`CallUi`] that answers prompts with a preset decision and logs
/// everything it is asked to show.
pub struct ScriptedUi {
    name: String,
    decision: Mutex<CallDecision>,
    gate: Mutex<Option<Arc<Notify>>>,
    events: Mutex<Vec<UiEvent>>,
}

impl ScriptedUi {
    pub fn new(name: impl Into<String>, decision: CallDecision) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            decision: Mutex::new(decision),
            gate: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn set_decision(&self, decision: CallDecision) {
        *self.decision.lock().unwrap() = decision;
    }

    /// Makes prompts wait until `gate` is notified.
    pub fn hold_prompts(&self, gate: Arc<Notify>) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: UiEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl CallUi for ScriptedUi {
    fn show_outgoing_ui(&self) {
        info!("[{}] calling...", self.name);
        self.push(UiEvent::Outgoing);
    }

    fn show_active_ui(&self) {
        info!("[{}] call connected", self.name);
        self.push(UiEvent::Active);
    }

    fn show_idle_ui(&self) {
        info!("[{}] call ended", self.name);
        self.push(UiEvent::Idle);
    }

    async fn prompt_incoming_call(&self, caller_name: &str) -> CallDecision {
        info!("[{}] incoming call from {}", self.name, caller_name);
        self.push(UiEvent::Prompt(caller_name.to_string()));
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        *self.decision.lock().unwrap()
    }

    fn report_error(&self, message: &str) {
        warn!("[{}] {}", self.name, message);
        self.push(UiEvent::Error(message.to_string()));
    }
}
