//! A connected chat thread: chat traffic plus the thread's call session.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use vlcore::{ChatMessage, SignalMessage, Typing, UserId};

use crate::calls::{
    CallCollaborators, CallDecision, CallRegistry, CallSession, IncomingCall, PeerLinkEvent,
};
use crate::channel::{ChannelError, ChannelEvent, ChannelFactory, MessageChannel};
use crate::config::CallConfig;

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Receives chat traffic for a thread.
pub trait ChatListener: Send + Sync {
    /// `own` is set for the server's echo of our own message.
    fn on_chat_message(&self, message: &ChatMessage, own: bool);

    /// Someone else is typing.
    fn on_typing(&self, sender_id: &UserId, sender_first_name: Option<&str>);
}

/// Inbound event streams for [`ChatThread::run`].
pub struct ThreadEvents {
    pub channel: mpsc::Receiver<ChannelEvent>,
    pub peer: mpsc::UnboundedReceiver<PeerLinkEvent>,
}

type PromptFuture = Pin<Box<dyn Future<Output = (IncomingCall, CallDecision)> + Send>>;

pub struct ChatThread {
    thread_id: String,
    channel: Arc<dyn MessageChannel>,
    session: Arc<CallSession>,
    listener: Arc<dyn ChatListener>,
}

impl ChatThread {
    /// Opens the thread's channel and sets up an idle call session on it.
    pub async fn connect(
        factory: &dyn ChannelFactory,
        thread_id: &str,
        config: CallConfig,
        collaborators: CallCollaborators,
        listener: Arc<dyn ChatListener>,
        registry: Arc<CallRegistry>,
    ) -> Result<(Arc<Self>, ThreadEvents), anyhow::Error> {
        let (channel, channel_events) = factory.connect(thread_id).await?;
        info!("Connected to thread {thread_id}");
        Ok(Self::with_channel(
            thread_id,
            config,
            channel,
            channel_events,
            collaborators,
            listener,
            registry,
        ))
    }

    pub fn with_channel(
        thread_id: &str,
        config: CallConfig,
        channel: Arc<dyn MessageChannel>,
        channel_events: mpsc::Receiver<ChannelEvent>,
        collaborators: CallCollaborators,
        listener: Arc<dyn ChatListener>,
        registry: Arc<CallRegistry>,
    ) -> (Arc<Self>, ThreadEvents) {
        let (session, peer_events) =
            CallSession::new(thread_id, config, channel.clone(), collaborators, registry);
        let thread = Arc::new(Self {
            thread_id: thread_id.to_string(),
            channel,
            session,
            listener,
        });
        let events = ThreadEvents {
            channel: channel_events,
            peer: peer_events,
        };
        (thread, events)
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn session(&self) -> &Arc<CallSession> {
        &self.session
    }

    /// Sends `text` to the thread. Blank text is not sent.
    pub async fn send_chat_message(&self, text: &str) -> Result<(), ThreadError> {
        if text.trim().is_empty() {
            debug!("Not sending blank message on thread {}", self.thread_id);
            return Ok(());
        }
        let config = self.session.config();
        self.send(&SignalMessage::ChatMessage(ChatMessage {
            message: Some(text.to_string()),
            image_url: None,
            sender_id: config.local_user_id.clone(),
            sender_first_name: config.local_first_name.clone(),
        }))
        .await
    }

    pub async fn send_typing(&self) -> Result<(), ThreadError> {
        let config = self.session.config();
        self.send(&SignalMessage::Typing(Typing {
            sender_id: config.local_user_id.clone(),
            sender_first_name: Some(config.local_first_name.clone()),
        }))
        .await
    }

    async fn send(&self, message: &SignalMessage) -> Result<(), ThreadError> {
        let text = vlcore::encode(message)?;
        self.channel.send(text).await?;
        Ok(())
    }

    /// Decodes and routes one inbound text frame.
    pub async fn dispatch(&self, text: &str) -> Option<IncomingCall> {
        let message = match vlcore::decode(text) {
            Ok(message) => message,
            Err(e) if e.is_unknown_type() => {
                debug!("Ignoring message on thread {}: {}", self.thread_id, e);
                return None;
            }
            Err(e) => {
                warn!("Dropping malformed message on thread {}: {}", self.thread_id, e);
                return None;
            }
        };

        let own = message.sender_id() == self.session.local_user_id();
        match message {
            SignalMessage::ChatMessage(chat) => {
                self.listener.on_chat_message(&chat, own);
                None
            }
            SignalMessage::Typing(typing) => {
                if !own {
                    self.listener
                        .on_typing(&typing.sender_id, typing.sender_first_name.as_deref());
                }
                None
            }
            signal => self.session.handle_signal(signal).await,
        }
    }

    /// Processes channel and peer-link events until the channel closes.
    ///
    /// An incoming call prompt is polled alongside the event streams, so
    /// hangups and candidates keep flowing while the user decides and while
    /// an accepted call is being set up.
    pub async fn run(self: Arc<Self>, events: ThreadEvents) {
        let ThreadEvents {
            channel: mut channel_events,
            peer: mut peer_events,
        } = events;
        let mut prompt: Option<PromptFuture> = None;

        loop {
            tokio::select! {
                event = channel_events.recv() => match event {
                    Some(ChannelEvent::Message(text)) => {
                        if let Some(call) = self.dispatch(&text).await {
                            prompt = Some(self.prompt_for(call));
                        }
                    }
                    Some(ChannelEvent::Closed) | None => {
                        info!("Channel for thread {} closed", self.thread_id);
                        self.session.handle_channel_closed().await;
                        break;
                    }
                },
                Some(event) = peer_events.recv() => {
                    self.session.handle_peer_event(event).await;
                }
                (call, decision) = async {
                    match prompt.as_mut() {
                        Some(pending) => pending.await,
                        None => std::future::pending().await,
                    }
                }, if prompt.is_some() => {
                    prompt = None;
                    self.resolve_in_background(call, decision);
                }
            }
        }
    }

    /// Accepting waits on the microphone and the peer link, so it runs off the
    /// loop. A hangup that lands meanwhile cancels it through the session's
    /// attempt check.
    fn resolve_in_background(&self, call: IncomingCall, decision: CallDecision) {
        let session = self.session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.resolve_incoming(&call, decision).await {
                debug!("Incoming call from {} not completed: {}", call.caller_id, e);
            }
        });
    }

    fn prompt_for(&self, call: IncomingCall) -> PromptFuture {
        let session = self.session.clone();
        Box::pin(async move {
            let decision = session.prompt_incoming(&call).await;
            (call, decision)
        })
    }
}
