use serde::{Deserialize, Serialize};

/// Connection settings for the Lavalink node backing this process.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(default)]
    pub ssl: bool,
    /// The bot account's user id, sent as `User-Id` on the event socket.
    pub user_id: u64,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

fn default_client_name() -> String {
    format!("hanabi/{}", env!("CARGO_PKG_VERSION"))
}

impl EngineConfig {
    pub fn rest_base(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}/v4", scheme, self.host, self.port)
    }

    pub fn websocket_url(&self) -> String {
        let scheme = if self.ssl { "wss" } else { "ws" };
        format!("{}://{}:{}/v4/websocket", scheme, self.host, self.port)
    }
}
