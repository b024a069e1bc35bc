use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::{
    common::{HanabiResult, UserId},
    store::{HistoryEntry, Playlist, Store},
};

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    volumes: DashMap<UserId, u16>,
    playlists: DashMap<(UserId, String), Playlist>,
    history: Mutex<Vec<HistoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_playlist(&self, playlist: Playlist) {
        self.playlists
            .insert((playlist.owner, playlist.name.clone()), playlist);
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn volume_preference(&self, user: UserId) -> HanabiResult<Option<u16>> {
        Ok(self.volumes.get(&user).map(|v| *v))
    }

    async fn set_volume_preference(&self, user: UserId, volume: u16) -> HanabiResult<()> {
        self.volumes.insert(user, volume);
        Ok(())
    }

    async fn playlist(&self, owner: UserId, name: &str) -> HanabiResult<Option<Playlist>> {
        Ok(self
            .playlists
            .get(&(owner, name.to_string()))
            .map(|p| p.clone()))
    }

    async fn mark_failed(&self, owner: UserId, name: &str, index: usize) -> HanabiResult<()> {
        if let Some(mut playlist) = self.playlists.get_mut(&(owner, name.to_string())) {
            if let Some(entry) = playlist.entries.get_mut(index) {
                entry.failed = true;
            }
        }
        Ok(())
    }

    async fn record_history(&self, entry: HistoryEntry) -> HanabiResult<()> {
        self.history.lock().push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PlaylistEntry;

    #[tokio::test]
    async fn failed_entries_are_flagged() {
        let store = MemoryStore::new();
        store.insert_playlist(Playlist {
            owner: UserId(1),
            name: "mix".into(),
            private: false,
            entries: vec![PlaylistEntry::new("a", "a"), PlaylistEntry::new("b", "b")],
        });

        store.mark_failed(UserId(1), "mix", 1).await.unwrap();

        let playlist = store.playlist(UserId(1), "mix").await.unwrap().unwrap();
        assert!(!playlist.entries[0].failed);
        assert!(playlist.entries[1].failed);
    }

    #[tokio::test]
    async fn volume_preferences_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.volume_preference(UserId(2)).await.unwrap(), None);
        store.set_volume_preference(UserId(2), 35).await.unwrap();
        assert_eq!(store.volume_preference(UserId(2)).await.unwrap(), Some(35));
    }
}
