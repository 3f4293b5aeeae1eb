use serde::Deserialize;
use vlcore::UserId;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

fn default_stun_servers() -> Vec<String> {
    vec![DEFAULT_STUN_SERVER.to_string()]
}

/// Identity of the local user and ICE settings, shared by every thread.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CallConfig {
    pub local_user_id: UserId,
    #[serde(default)]
    pub local_first_name: String,
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
}

impl CallConfig {
    pub fn new(local_user_id: impl Into<UserId>, local_first_name: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            local_first_name: local_first_name.into(),
            stun_servers: default_stun_servers(),
        }
    }

    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
