//! Audio-engine collaborator. The engine owns decoding and streaming; the
//! session layer only tells it what to play and listens for its events.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    common::{GuildId, HanabiResult, VoiceId},
    protocol::Track,
};

pub mod lavalink;

pub use lavalink::LavalinkClient;

/// What the engine currently reports for one guild's player.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuildNode {
    pub track: Option<Track>,
    pub paused: bool,
    pub volume: u16,
    pub position: u64,
}

impl GuildNode {
    pub fn idle(volume: u16) -> Self {
        Self {
            volume,
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Direct links are loaded as-is, anything else is searched.
    async fn load_or_search(&self, query: &str) -> HanabiResult<Track>;

    /// Starts `track` at `start_ms`, replacing whatever is playing.
    async fn play(&self, guild: GuildId, track: &Track, start_ms: u64, volume: u16)
    -> HanabiResult<()>;

    async fn stop(&self, guild: GuildId) -> HanabiResult<()>;

    /// Tears down the guild's player on the engine.
    async fn destroy(&self, guild: GuildId) -> HanabiResult<()>;

    async fn set_pause(&self, guild: GuildId, paused: bool) -> HanabiResult<()>;

    async fn set_volume(&self, guild: GuildId, volume: u16) -> HanabiResult<()>;

    async fn guild_node(&self, guild: GuildId) -> HanabiResult<GuildNode>;

    /// Creates or overwrites the guild's player with `node`.
    async fn set_guild_node(&self, guild: GuildId, node: &GuildNode) -> HanabiResult<()>;

    /// Resolves once the engine holds voice connection info for `guild`.
    async fn wait_for_connection(&self, guild: GuildId, timeout: Duration) -> HanabiResult<()>;

    /// Resolves once the engine no longer holds voice connection info for `guild`.
    async fn wait_for_disconnection(&self, guild: GuildId, timeout: Duration)
    -> HanabiResult<()>;

    /// This bot account's voice state in `guild`, relayed from the chat
    /// gateway. `None` means it left voice.
    async fn voice_state_update(&self, guild: GuildId, channel: Option<VoiceId>, session_id: String);

    /// The voice server `guild` was assigned, relayed from the chat gateway.
    async fn voice_server_update(&self, guild: GuildId, token: String, endpoint: String);
}

/// Direct links go straight to the loader, everything else is a search.
pub fn identifier_for(query: &str) -> String {
    let query = query.trim();
    if query.starts_with("http://") || query.starts_with("https://") {
        query.to_string()
    } else {
        format!("ytsearch:{}", query)
    }
}
