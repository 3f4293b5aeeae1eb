use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::{Parser, ValueEnum};
use log::{error, info};
use vlcore::{ChatMessage, UserId};
use voicelink::calls::{CallDecision, CallState, MediaError};
use voicelink::channel::{ChannelFactory, WebSocketChannelFactory};
use voicelink::loopback::{
    LoopbackHub, MediaBehavior, ScriptedUi, SimulatedLinkOptions, SimulatedMediaSource,
    SimulatedPeerLinkFactory,
};
use voicelink::{
    CallCollaborators, CallConfig, CallRegistry, CallSession, ChatListener, ChatThread,
};

// Plays a call between two simulated participants on one chat thread.
//
// Usage:
//   cargo run -- --scenario accept
//   cargo run -- --scenario busy
//   cargo run -- --server ws://localhost:8000 --thread 12 --scenario decline

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Bob accepts, they talk, Alice hangs up.
    Accept,
    /// Bob declines.
    Decline,
    /// Bob is already in a call on another thread.
    Busy,
    /// Alice has no microphone permission.
    MicDenied,
    /// Bob accepts and later hangs up.
    RemoteHangup,
}

#[derive(Debug, Parser)]
#[command(about = "Voice call signaling demo")]
struct Args {
    #[arg(short, long, value_enum, default_value = "accept")]
    scenario: Scenario,

    /// Chat server base URL. Uses an in-memory thread when omitted.
    #[arg(long)]
    server: Option<String>,

    #[arg(short, long, default_value = "1")]
    thread: String,

    /// STUN server, may be repeated.
    #[arg(long = "stun")]
    stun_servers: Vec<String>,

    /// Seconds to stay in the call.
    #[arg(long, default_value_t = 1)]
    talk_secs: u64,
}

struct LogListener(&'static str);

impl ChatListener for LogListener {
    fn on_chat_message(&self, message: &ChatMessage, own: bool) {
        let text = message.message.as_deref().unwrap_or("<image>");
        if own {
            info!("[{}] (sent) {}", self.0, text);
        } else {
            info!("[{}] {}: {}", self.0, message.sender_first_name, text);
        }
    }

    fn on_typing(&self, _sender_id: &UserId, sender_first_name: Option<&str>) {
        info!("[{}] {} is typing...", self.0, sender_first_name.unwrap_or("someone"));
    }
}

struct Participant {
    thread: Arc<ChatThread>,
    media: Arc<SimulatedMediaSource>,
    ui: Arc<ScriptedUi>,
    registry: Arc<CallRegistry>,
}

impl Participant {
    async fn join(
        factory: &dyn ChannelFactory,
        args: &Args,
        config: CallConfig,
        name: &'static str,
        decision: CallDecision,
    ) -> anyhow::Result<Self> {
        let media = SimulatedMediaSource::new();
        let links = SimulatedPeerLinkFactory::with_options(SimulatedLinkOptions {
            auto_connect: true,
            local_candidates: 2,
            ..Default::default()
        });
        let ui = ScriptedUi::new(name, decision);
        let registry = Arc::new(CallRegistry::new());
        let collaborators = CallCollaborators {
            media: media.clone(),
            links,
            ui: ui.clone(),
        };

        let (thread, events) = ChatThread::connect(
            factory,
            &args.thread,
            config,
            collaborators,
            Arc::new(LogListener(name)),
            registry.clone(),
        )
        .await?;
        tokio::spawn(thread.clone().run(events));

        Ok(Self {
            thread,
            media,
            ui,
            registry,
        })
    }

    fn session(&self) -> &Arc<CallSession> {
        self.thread.session()
    }
}

async fn wait_for_state(session: &CallSession, want: CallState) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.state().await != want {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .map_err(|_| {
        anyhow::anyhow!(
            "timed out waiting for {want:?} on thread {}",
            session.thread_id()
        )
    })
}

async fn run(args: Args) -> anyhow::Result<()> {
    let factory: Box<dyn ChannelFactory> = match &args.server {
        Some(url) => Box::new(WebSocketChannelFactory::new(url.clone())),
        None => Box::new(LoopbackHub::new()),
    };

    let mut alice_config = CallConfig::new("1", "Alice");
    let mut bob_config = CallConfig::new("2", "Bob");
    if !args.stun_servers.is_empty() {
        alice_config = alice_config.with_stun_servers(args.stun_servers.clone());
        bob_config = bob_config.with_stun_servers(args.stun_servers.clone());
    }
    let bob_id = bob_config.local_user_id.clone();

    let bob_decision = match args.scenario {
        Scenario::Decline => CallDecision::Decline,
        _ => CallDecision::Accept,
    };
    let alice =
        Participant::join(&*factory, &args, alice_config, "alice", CallDecision::Decline).await?;
    let bob = Participant::join(&*factory, &args, bob_config, "bob", bob_decision).await?;

    match args.scenario {
        Scenario::Busy => {
            bob.registry.try_claim("elsewhere", &UserId::from("3"));
        }
        Scenario::MicDenied => {
            alice
                .media
                .set_behavior(MediaBehavior::Deny(MediaError::PermissionDenied));
        }
        _ => {}
    }

    alice.thread.send_typing().await?;
    alice.thread.send_chat_message("Calling you now").await?;

    if let Err(e) = alice.session().start_call(bob_id).await {
        info!("Call did not start: {e}");
    }

    match args.scenario {
        Scenario::Accept | Scenario::RemoteHangup => {
            wait_for_state(alice.session(), CallState::Active).await?;
            wait_for_state(bob.session(), CallState::Active).await?;
            bob.thread.send_chat_message("I can hear you").await?;

            tokio::time::sleep(Duration::from_secs(args.talk_secs)).await;
            let snapshot = alice.session().snapshot().await;
            info!(
                "Call with {:?} active for {}s",
                snapshot.peer.as_ref().map(ToString::to_string),
                snapshot.duration_secs().unwrap_or_default()
            );

            if matches!(args.scenario, Scenario::Accept) {
                alice.session().hang_up().await;
            } else {
                bob.session().hang_up().await;
            }
        }
        Scenario::Decline | Scenario::Busy | Scenario::MicDenied => {}
    }

    wait_for_state(alice.session(), CallState::Idle).await?;
    wait_for_state(bob.session(), CallState::Idle).await?;

    info!("alice ui: {:?}", alice.ui.events());
    info!("bob ui: {:?}", bob.ui.events());
    info!(
        "live microphones: alice={} bob={}",
        alice.media.live(),
        bob.media.live()
    );
    Ok(())
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(args)) {
        error!("{e:#}");
        std::process::exit(1);
    }
}
