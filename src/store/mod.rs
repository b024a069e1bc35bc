//! Persistence collaborator: user preferences, stored playlists, history.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{HanabiResult, UserId};

pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub owner: UserId,
    pub name: String,
    pub private: bool,
    pub entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub title: String,
    /// Direct link or search query handed to the audio engine.
    pub query: String,
    #[serde(default)]
    pub begin_at: u64,
    #[serde(default)]
    pub end_at: Option<u64>,
    #[serde(default)]
    pub failed: bool,
}

impl PlaylistEntry {
    pub fn new(title: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            query: query.into(),
            begin_at: 0,
            end_at: None,
            failed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub requester: Option<UserId>,
    /// Name of the fleet member that played the track.
    pub process: String,
    pub title: String,
    pub uri: Option<String>,
    pub played_at: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn volume_preference(&self, user: UserId) -> HanabiResult<Option<u16>>;
    async fn set_volume_preference(&self, user: UserId, volume: u16) -> HanabiResult<()>;
    async fn playlist(&self, owner: UserId, name: &str) -> HanabiResult<Option<Playlist>>;
    /// Flags a playlist entry the engine could not resolve.
    async fn mark_failed(&self, owner: UserId, name: &str, index: usize) -> HanabiResult<()>;
    async fn record_history(&self, entry: HistoryEntry) -> HanabiResult<()>;
}
