use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use vlcore::{
    Hangup, IceCandidate, IceCandidateInit, MessageKind, SdpType, SignalMessage, UserId,
};
use voicelink::calls::{
    CallCollaborators, CallDecision, CallError, CallRegistry, CallSession, CallState,
    IncomingCall, MediaError, PeerLinkError, PeerLinkEvent,
};
use voicelink::channel::ChannelEvent;
use voicelink::config::CallConfig;
use voicelink::loopback::{
    LinkOp, LoopbackChannel, LoopbackHub, MediaBehavior, ScriptedUi, SimulatedLinkOptions,
    SimulatedMediaSource, SimulatedPeerLinkFactory, UiEvent,
};

const THREAD: &str = "12";

/// One participant, driven by hand instead of a thread runner.
struct Party {
    id: UserId,
    session: Arc<CallSession>,
    channel: Arc<LoopbackChannel>,
    inbox: mpsc::Receiver<ChannelEvent>,
    peer_events: mpsc::UnboundedReceiver<PeerLinkEvent>,
    media: Arc<SimulatedMediaSource>,
    links: Arc<SimulatedPeerLinkFactory>,
    ui: Arc<ScriptedUi>,
    registry: Arc<CallRegistry>,
}

impl Party {
    fn join(hub: &LoopbackHub, id: &str, name: &str, decision: CallDecision) -> Self {
        Self::join_thread(hub, THREAD, id, name, decision, Arc::new(CallRegistry::new()))
    }

    fn join_thread(
        hub: &LoopbackHub,
        thread_id: &str,
        id: &str,
        name: &str,
        decision: CallDecision,
        registry: Arc<CallRegistry>,
    ) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let (channel, inbox) = hub.join();
        let media = SimulatedMediaSource::new();
        let links = SimulatedPeerLinkFactory::with_options(SimulatedLinkOptions {
            auto_connect: true,
            local_candidates: 2,
            ..Default::default()
        });
        let ui = ScriptedUi::new(name, decision);
        let config = CallConfig::new(id, name);
        let (session, peer_events) = CallSession::new(
            thread_id,
            config,
            channel.clone(),
            CallCollaborators {
                media: media.clone(),
                links: links.clone(),
                ui: ui.clone(),
            },
            registry.clone(),
        );
        Self {
            id: UserId::from(id),
            session,
            channel,
            inbox,
            peer_events,
            media,
            links,
            ui,
            registry,
        }
    }

    /// Feeds every queued frame to the session, returning any incoming calls.
    async fn pump(&mut self) -> Vec<IncomingCall> {
        let mut calls = Vec::new();
        while let Ok(ChannelEvent::Message(text)) = self.inbox.try_recv() {
            if let Ok(message) = vlcore::decode(&text)
                && let Some(call) = self.session.handle_signal(message).await
            {
                calls.push(call);
            }
        }
        calls
    }

    async fn pump_peer(&mut self) {
        while let Ok(event) = self.peer_events.try_recv() {
            self.session.handle_peer_event(event).await;
        }
    }

    async fn state(&self) -> CallState {
        self.session.state().await
    }

    fn hangups(&self) -> Vec<Hangup> {
        self.channel
            .sent_messages()
            .into_iter()
            .filter_map(|m| match m {
                SignalMessage::Hangup(h) => Some(h),
                _ => None,
            })
            .collect()
    }
}

/// Brings alice and bob into an active call placed by alice.
async fn connect(alice: &mut Party, bob: &mut Party) {
    alice.session.start_call(bob.id.clone()).await.unwrap();
    alice.pump_peer().await;

    let calls = bob.pump().await;
    assert_eq!(calls.len(), 1);
    bob.session
        .answer_incoming(calls.into_iter().next().unwrap())
        .await
        .unwrap();
    bob.pump_peer().await;

    alice.pump().await;
    alice.pump_peer().await;
    bob.pump().await;

    assert_eq!(alice.state().await, CallState::Active);
    assert_eq!(bob.state().await, CallState::Active);
}

#[tokio::test]
async fn test_accept_then_local_hangup() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    let mut bob = Party::join(&hub, "2", "Bob", CallDecision::Accept);

    alice.session.start_call(bob.id.clone()).await.unwrap();
    assert_eq!(alice.state().await, CallState::Outgoing);
    assert_eq!(alice.channel.sent_count(MessageKind::Offer), 1);
    alice.pump_peer().await;

    let calls = bob.pump().await;
    assert_eq!(calls.len(), 1);
    let call = calls[0].clone();
    assert_eq!(call.caller_id, alice.id);
    assert_eq!(call.caller_name, "Alice");
    assert_eq!(bob.state().await, CallState::IncomingPending);

    // The offer echoed back to alice is her own and changes nothing.
    assert!(alice.pump().await.is_empty());
    assert_eq!(alice.state().await, CallState::Outgoing);

    bob.session.answer_incoming(call).await.unwrap();
    assert_eq!(bob.state().await, CallState::Connecting);
    assert_eq!(bob.channel.sent_count(MessageKind::Answer), 1);
    bob.pump_peer().await;
    assert_eq!(bob.state().await, CallState::Active);

    alice.pump().await;
    alice.pump_peer().await;
    assert_eq!(alice.state().await, CallState::Active);
    bob.pump().await;

    let snapshot = alice.session.snapshot().await;
    assert_eq!(snapshot.peer, Some(bob.id.clone()));
    assert!(snapshot.has_local_media && snapshot.has_peer_link && snapshot.has_remote_media);
    assert!(snapshot.connected_at.is_some());
    assert!(alice.session.remote_audio().await.is_some());

    // Both sides trickled their candidates to the other.
    let alice_link = alice.links.last_link().unwrap();
    let bob_link = bob.links.last_link().unwrap();
    assert_eq!(alice_link.remote_candidates().len(), 2);
    assert_eq!(bob_link.remote_candidates().len(), 2);
    assert_eq!(
        alice_link.stun_servers(),
        ["stun:stun.l.google.com:19302".to_string()]
    );

    alice.session.hang_up().await;
    assert_eq!(alice.state().await, CallState::Idle);
    assert_eq!(
        alice.hangups(),
        vec![Hangup {
            sender_id: alice.id.clone(),
            target_id: Some(bob.id.clone()),
        }]
    );
    assert!(alice_link.is_closed());
    assert_eq!(alice.media.live(), 0);
    assert!(!alice.registry.is_busy());
    let snapshot = alice.session.snapshot().await;
    assert!(!snapshot.has_local_media && !snapshot.has_peer_link && !snapshot.has_remote_media);
    assert_eq!(snapshot.peer, None);

    bob.pump().await;
    assert_eq!(bob.state().await, CallState::Idle);
    assert!(bob.hangups().is_empty());
    assert!(bob_link.is_closed());
    assert_eq!(bob.media.live(), 0);

    assert_eq!(
        alice.ui.events(),
        vec![UiEvent::Outgoing, UiEvent::Active, UiEvent::Idle]
    );
    assert_eq!(
        bob.ui.events(),
        vec![
            UiEvent::Prompt("Alice".into()),
            UiEvent::Outgoing,
            UiEvent::Active,
            UiEvent::Idle
        ]
    );
}

#[tokio::test]
async fn test_remote_hangup_ends_call() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    let mut bob = Party::join(&hub, "2", "Bob", CallDecision::Accept);
    connect(&mut alice, &mut bob).await;

    bob.session.hang_up().await;
    alice.pump().await;

    assert_eq!(alice.state().await, CallState::Idle);
    assert_eq!(alice.media.live(), 0);
    assert!(alice.hangups().is_empty());
    assert!(alice.ui.errors().is_empty());
}

#[tokio::test]
async fn test_untargeted_hangup_is_honored() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    let mut bob = Party::join(&hub, "2", "Bob", CallDecision::Accept);
    connect(&mut alice, &mut bob).await;

    let legacy = vlcore::decode(r#"{"type":"webrtc_hangup","sender_id":2}"#).unwrap();
    alice.session.handle_signal(legacy).await;
    assert_eq!(alice.state().await, CallState::Idle);
}

#[tokio::test]
async fn test_decline_sends_targeted_hangup() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    let mut bob = Party::join(&hub, "2", "Bob", CallDecision::Decline);

    alice.session.start_call(bob.id.clone()).await.unwrap();
    let call = bob.pump().await.remove(0);
    bob.session.answer_incoming(call).await.unwrap();

    assert_eq!(bob.state().await, CallState::Idle);
    assert_eq!(bob.media.acquired(), 0);
    assert!(bob.links.links().is_empty());
    assert_eq!(
        bob.hangups(),
        vec![Hangup {
            sender_id: bob.id.clone(),
            target_id: Some(alice.id.clone()),
        }]
    );

    alice.pump().await;
    assert_eq!(alice.state().await, CallState::Idle);
    assert_eq!(alice.media.live(), 0);
    assert!(!alice.registry.is_busy());
}

#[tokio::test]
async fn test_offer_while_in_call_is_refused() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    let mut bob = Party::join(&hub, "2", "Bob", CallDecision::Accept);
    connect(&mut alice, &mut bob).await;

    let mut carol = Party::join(&hub, "3", "Carol", CallDecision::Decline);
    carol.session.start_call(bob.id.clone()).await.unwrap();

    // Everyone in the thread sees the offer. Both busy participants refuse it.
    assert!(alice.pump().await.is_empty());
    assert!(bob.pump().await.is_empty());
    assert_eq!(alice.state().await, CallState::Active);
    assert_eq!(bob.state().await, CallState::Active);

    let carol_id = Some(carol.id.clone());
    assert!(bob.hangups().iter().any(|h| h.target_id == carol_id));
    assert!(alice.hangups().iter().any(|h| h.target_id == carol_id));

    // The refusals are addressed to carol and leave the running call alone.
    alice.pump().await;
    bob.pump().await;
    assert_eq!(alice.state().await, CallState::Active);
    assert_eq!(bob.state().await, CallState::Active);

    carol.pump().await;
    assert_eq!(carol.state().await, CallState::Idle);
    assert_eq!(carol.media.live(), 0);
}

#[tokio::test]
async fn test_offer_while_other_thread_in_call_is_refused() {
    let registry = Arc::new(CallRegistry::new());
    let first = LoopbackHub::new();
    let second = LoopbackHub::new();
    let mut alice = Party::join(&first, "1", "Alice", CallDecision::Decline);
    let mut bob = Party::join_thread(
        &first,
        "12",
        "2",
        "Bob",
        CallDecision::Accept,
        registry.clone(),
    );
    let mut bob_elsewhere =
        Party::join_thread(&second, "13", "2", "Bob", CallDecision::Accept, registry.clone());
    let mut carol = Party::join(&second, "3", "Carol", CallDecision::Decline);

    connect(&mut alice, &mut bob).await;
    assert_eq!(registry.current().map(|slot| slot.peer), Some(alice.id.clone()));

    carol.session.start_call(bob.id.clone()).await.unwrap();
    assert!(bob_elsewhere.pump().await.is_empty());
    assert_eq!(bob_elsewhere.state().await, CallState::Idle);
    assert_eq!(bob_elsewhere.channel.sent_count(MessageKind::Hangup), 1);

    carol.pump().await;
    assert_eq!(carol.state().await, CallState::Idle);

    // Calling out from the second thread is refused locally.
    let err = bob_elsewhere
        .session
        .start_call(carol.id.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Busy));
    assert_eq!(bob_elsewhere.state().await, CallState::Idle);
    assert_eq!(bob_elsewhere.ui.errors().len(), 1);
    assert_eq!(bob_elsewhere.media.acquired(), 0);

    alice.session.hang_up().await;
    bob.pump().await;
    assert!(!registry.is_busy());
}

#[tokio::test]
async fn test_glare_ends_both_attempts() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Accept);
    let mut bob = Party::join(&hub, "2", "Bob", CallDecision::Accept);

    alice.session.start_call(bob.id.clone()).await.unwrap();
    bob.session.start_call(alice.id.clone()).await.unwrap();

    // Each refuses the other's offer as busy, then takes the other's refusal.
    alice.pump().await;
    bob.pump().await;
    alice.pump().await;

    assert_eq!(alice.state().await, CallState::Idle);
    assert_eq!(bob.state().await, CallState::Idle);
    assert_eq!(alice.media.live(), 0);
    assert_eq!(bob.media.live(), 0);
}

#[tokio::test]
async fn test_mic_denied_on_accept() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    let mut bob = Party::join(&hub, "2", "Bob", CallDecision::Accept);
    bob.media
        .set_behavior(MediaBehavior::Deny(MediaError::PermissionDenied));

    alice.session.start_call(bob.id.clone()).await.unwrap();
    let call = bob.pump().await.remove(0);

    let err = bob.session.answer_incoming(call).await.unwrap_err();
    assert!(matches!(err, CallError::Media(MediaError::PermissionDenied)));
    assert_eq!(bob.state().await, CallState::Idle);
    assert!(bob.channel.sent().is_empty());
    assert!(bob.links.links().is_empty());
    assert!(!bob.registry.is_busy());
    assert_eq!(bob.ui.errors().len(), 1);
    assert!(bob.ui.errors()[0].contains("microphone"));
}

#[tokio::test]
async fn test_mic_denied_on_start() {
    let hub = LoopbackHub::new();
    let alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    alice.media.set_behavior(MediaBehavior::Deny(MediaError::NoDevice));

    let err = alice.session.start_call(UserId::from("2")).await.unwrap_err();
    assert!(matches!(err, CallError::Media(MediaError::NoDevice)));
    assert_eq!(alice.state().await, CallState::Idle);
    assert!(alice.channel.sent().is_empty());
    assert!(!alice.registry.is_busy());
    // The call never showed, so the UI only hears about the failure.
    assert_eq!(
        alice.ui.events(),
        vec![UiEvent::Error(
            "Could not access microphone: no audio input device".into()
        )]
    );
}

#[tokio::test]
async fn test_peer_link_creation_failure() {
    let hub = LoopbackHub::new();
    let alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    alice.links.set_options(SimulatedLinkOptions {
        fail_create: true,
        ..Default::default()
    });

    let err = alice.session.start_call(UserId::from("2")).await.unwrap_err();
    assert!(matches!(err, CallError::PeerLink(PeerLinkError::Create(_))));
    assert_eq!(alice.state().await, CallState::Idle);
    assert_eq!(alice.media.acquired(), 1);
    assert_eq!(alice.media.live(), 0);
    assert_eq!(alice.channel.sent_count(MessageKind::Offer), 0);
}

#[tokio::test]
async fn test_negotiation_failure_releases_everything() {
    let hub = LoopbackHub::new();
    let alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    alice.links.set_options(SimulatedLinkOptions {
        fail_negotiation: true,
        ..Default::default()
    });

    let err = alice.session.start_call(UserId::from("2")).await.unwrap_err();
    assert!(matches!(err, CallError::PeerLink(PeerLinkError::Negotiation(_))));
    assert_eq!(alice.state().await, CallState::Idle);
    assert_eq!(alice.media.live(), 0);
    assert_eq!(alice.links.open_links(), 0);
    // Nothing was signaled, so there is nobody to hang up on.
    assert!(alice.channel.sent().is_empty());
}

#[tokio::test]
async fn test_hangup_during_media_acquisition() {
    let hub = LoopbackHub::new();
    let alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    let gate = Arc::new(Notify::new());
    alice
        .media
        .set_behavior(MediaBehavior::WaitFor(gate.clone()));

    let session = alice.session.clone();
    let attempt = tokio::spawn(async move { session.start_call(UserId::from("2")).await });
    while alice.state().await != CallState::Outgoing {
        tokio::task::yield_now().await;
    }

    alice.session.hang_up().await;
    assert_eq!(alice.state().await, CallState::Idle);

    gate.notify_one();
    let result = attempt.await.unwrap();
    assert!(matches!(result, Err(CallError::Cancelled)));

    assert_eq!(alice.state().await, CallState::Idle);
    assert_eq!(alice.media.acquired(), 1);
    assert_eq!(alice.media.live(), 0);
    assert!(alice.links.links().is_empty());
    assert_eq!(alice.channel.sent_count(MessageKind::Offer), 0);
    assert!(alice.ui.events().is_empty());
    assert!(!alice.session.snapshot().await.has_local_media);
}

#[tokio::test]
async fn test_stale_decision_is_dropped() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    let mut bob = Party::join(&hub, "2", "Bob", CallDecision::Accept);

    alice.session.start_call(bob.id.clone()).await.unwrap();
    let call = bob.pump().await.remove(0);

    alice.session.hang_up().await;
    bob.pump().await;
    assert_eq!(bob.state().await, CallState::Idle);

    let err = bob
        .session
        .resolve_incoming(&call, CallDecision::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Cancelled));
    assert_eq!(bob.media.acquired(), 0);
    assert!(bob.channel.sent().is_empty());
}

#[tokio::test]
async fn test_remote_candidates_wait_for_description() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    let mut bob = Party::join(&hub, "2", "Bob", CallDecision::Accept);

    alice.session.start_call(bob.id.clone()).await.unwrap();
    alice.pump_peer().await;

    // A candidate from bob before his answer is held back.
    let early = SignalMessage::IceCandidate(IceCandidate {
        sender_id: bob.id.clone(),
        candidate: IceCandidateInit::new("candidate:early"),
    });
    alice.session.handle_signal(early).await;
    let alice_link = alice.links.last_link().unwrap();
    assert!(alice_link.remote_candidates().is_empty());

    // Bob sees the offer and alice's candidates while the prompt is up.
    let call = bob.pump().await.remove(0);
    assert_eq!(bob.state().await, CallState::IncomingPending);
    bob.session.answer_incoming(call).await.unwrap();

    let bob_ops = bob.links.last_link().unwrap().ops();
    let set_remote = bob_ops
        .iter()
        .position(|op| *op == LinkOp::SetRemote(SdpType::Offer))
        .unwrap();
    let first_candidate = bob_ops
        .iter()
        .position(|op| matches!(op, LinkOp::AddCandidate(_)))
        .unwrap();
    assert!(set_remote < first_candidate);
    assert_eq!(bob.links.last_link().unwrap().remote_candidates().len(), 2);

    bob.pump_peer().await;
    alice.pump().await;
    let candidates = alice_link.remote_candidates();
    assert_eq!(candidates.first().map(String::as_str), Some("candidate:early"));
    assert_eq!(candidates.len(), 3);
}

#[tokio::test]
async fn test_candidates_while_idle_are_dropped() {
    let hub = LoopbackHub::new();
    let bob = Party::join(&hub, "2", "Bob", CallDecision::Accept);

    let stray = SignalMessage::IceCandidate(IceCandidate {
        sender_id: UserId::from("1"),
        candidate: IceCandidateInit::new("candidate:stray"),
    });
    assert!(bob.session.handle_signal(stray).await.is_none());
    assert_eq!(bob.state().await, CallState::Idle);

    // A later call does not pick up the stray candidate.
    let mut bob = bob;
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    connect(&mut alice, &mut bob).await;
    assert!(
        !bob.links
            .last_link()
            .unwrap()
            .remote_candidates()
            .contains(&"candidate:stray".to_string())
    );
}

#[tokio::test]
async fn test_peer_link_failure_tears_down() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    let mut bob = Party::join(&hub, "2", "Bob", CallDecision::Accept);
    connect(&mut alice, &mut bob).await;

    alice.links.last_link().unwrap().emit_failure("ice failed");
    alice.pump_peer().await;

    assert_eq!(alice.state().await, CallState::Idle);
    assert_eq!(alice.media.live(), 0);
    assert!(alice.hangups().is_empty());
    assert_eq!(alice.ui.errors(), vec!["Call connection failed.".to_string()]);
}

#[tokio::test]
async fn test_events_from_old_link_are_ignored() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    alice.links.set_options(SimulatedLinkOptions::default());

    alice.session.start_call(UserId::from("2")).await.unwrap();
    let old_link = alice.links.last_link().unwrap();
    alice.session.hang_up().await;

    alice.session.start_call(UserId::from("2")).await.unwrap();
    let new_link = alice.links.last_link().unwrap();
    assert_ne!(old_link.link_id(), new_link.link_id());

    old_link.emit_track();
    old_link.emit_failure("late");
    alice.pump_peer().await;
    assert_eq!(alice.state().await, CallState::Outgoing);
    assert!(alice.ui.errors().is_empty());

    new_link.emit_track();
    alice.pump_peer().await;
    assert_eq!(alice.state().await, CallState::Active);
}

#[tokio::test]
async fn test_channel_close_tears_down_silently() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    let mut bob = Party::join(&hub, "2", "Bob", CallDecision::Accept);
    connect(&mut alice, &mut bob).await;

    alice.channel.disconnect().await;
    alice.session.handle_channel_closed().await;

    assert_eq!(alice.state().await, CallState::Idle);
    assert_eq!(alice.media.live(), 0);
    assert!(alice.hangups().is_empty());
    assert!(alice.links.last_link().unwrap().is_closed());
}

#[tokio::test]
async fn test_invalid_operations() {
    let hub = LoopbackHub::new();
    let alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);

    assert!(matches!(
        alice.session.accept().await,
        Err(CallError::InvalidTransition(_))
    ));
    assert!(matches!(
        alice.session.decline().await,
        Err(CallError::InvalidTransition(_))
    ));
    alice.session.hang_up().await;
    assert!(alice.channel.sent().is_empty());

    alice.session.start_call(UserId::from("2")).await.unwrap();
    assert!(matches!(
        alice.session.start_call(UserId::from("3")).await,
        Err(CallError::InvalidTransition(_))
    ));
    assert_eq!(alice.links.links().len(), 1);
}

#[tokio::test]
async fn test_start_then_immediate_hangup() {
    let hub = LoopbackHub::new();
    let alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);

    alice.session.start_call(UserId::from("2")).await.unwrap();
    let snapshot = alice.session.snapshot().await;
    assert!(snapshot.has_local_media && snapshot.has_peer_link);

    alice.session.hang_up().await;

    let snapshot = alice.session.snapshot().await;
    assert_eq!(snapshot.state, CallState::Idle);
    assert!(!snapshot.has_local_media && !snapshot.has_peer_link);
    assert_eq!(alice.media.live(), 0);
    assert_eq!(alice.links.open_links(), 0);
    assert_eq!(alice.channel.sent_count(MessageKind::Hangup), 1);
}

#[tokio::test]
async fn test_answer_then_track_goes_active() {
    let hub = LoopbackHub::new();
    let mut alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);
    alice.links.set_options(SimulatedLinkOptions::default());

    alice.session.start_call(UserId::from("2")).await.unwrap();
    let answer = vlcore::decode(
        r#"{"type":"webrtc_answer","sender_id":"2","answer_sdp":{"type":"answer","sdp":"v=0"}}"#,
    )
    .unwrap();
    alice.session.handle_signal(answer).await;
    assert_eq!(alice.state().await, CallState::Connecting);

    alice.links.last_link().unwrap().emit_track();
    alice.pump_peer().await;

    assert_eq!(alice.state().await, CallState::Active);
    assert_eq!(alice.channel.sent_count(MessageKind::Offer), 1);
    assert_eq!(alice.channel.sent_count(MessageKind::Hangup), 0);
}

#[tokio::test]
async fn test_answer_from_stranger_is_ignored() {
    let hub = LoopbackHub::new();
    let alice = Party::join(&hub, "1", "Alice", CallDecision::Decline);

    alice.session.start_call(UserId::from("2")).await.unwrap();
    let answer = vlcore::decode(
        r#"{"type":"webrtc_answer","sender_id":"3","answer_sdp":{"type":"answer","sdp":"v=0"}}"#,
    )
    .unwrap();
    alice.session.handle_signal(answer).await;

    assert_eq!(alice.state().await, CallState::Outgoing);
    assert!(
        !alice
            .links
            .last_link()
            .unwrap()
            .ops()
            .contains(&LinkOp::SetRemote(SdpType::Answer))
    );
}
