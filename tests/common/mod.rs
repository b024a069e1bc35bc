//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use hanabi::{
    chat::{ChatMessage, Messenger},
    common::{ChannelId, GuildId, HanabiError, HanabiResult, MessageId, UserId, VoiceId},
    configs::{Role, SessionConfig},
    engine::{AudioEngine, GuildNode},
    gateway::VoiceGateway,
    interop::PeerTransport,
    manager::{Peer, SessionManager},
    protocol::{Track, TrackInfo},
    session::SessionContext,
    store::{MemoryStore, Playlist, PlaylistEntry},
};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Play { title: String, volume: u16 },
    Stop,
    Destroy,
    SetPause(bool),
    SetVolume(u16),
    AwaitDisconnect,
    VoiceState(Option<VoiceId>),
    VoiceServer(String),
}

/// Records what it is asked to do. Queries starting with `missing` fail to
/// resolve, prepared queries resolve to their prepared track and everything
/// else becomes a track titled after the query.
#[derive(Default)]
pub struct MockEngine {
    calls: Mutex<Vec<(GuildId, EngineCall)>>,
    nodes: Mutex<HashMap<GuildId, GuildNode>>,
    prepared: Mutex<HashMap<String, Track>>,
}

impl MockEngine {
    /// Makes a query for `track`'s title resolve to `track` itself.
    pub fn prepare(&self, track: Track) {
        self.prepared.lock().insert(track.title().to_string(), track);
    }

    pub fn calls(&self, guild: GuildId) -> Vec<EngineCall> {
        self.calls
            .lock()
            .iter()
            .filter(|(g, _)| *g == guild)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn plays(&self, guild: GuildId) -> Vec<(String, u16)> {
        self.calls(guild)
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Play { title, volume } => Some((title, volume)),
                _ => None,
            })
            .collect()
    }

    pub fn node(&self, guild: GuildId) -> GuildNode {
        self.nodes.lock().get(&guild).cloned().unwrap_or_default()
    }

    fn record(&self, guild: GuildId, call: EngineCall) {
        self.calls.lock().push((guild, call));
    }
}

pub fn track(title: &str) -> Track {
    Track::new(
        format!("encoded:{}", title),
        TrackInfo {
            identifier: title.to_string(),
            title: title.to_string(),
            length: 180_000,
            is_seekable: true,
            ..Default::default()
        },
    )
}

#[async_trait]
impl AudioEngine for MockEngine {
    async fn load_or_search(&self, query: &str) -> HanabiResult<Track> {
        if query.starts_with("missing") {
            return Err(HanabiError::TrackNotFound(query.to_string()));
        }
        if let Some(prepared) = self.prepared.lock().get(query) {
            return Ok(prepared.clone());
        }
        Ok(track(query))
    }

    async fn play(&self, guild: GuildId, track: &Track, _start_ms: u64, volume: u16) -> HanabiResult<()> {
        self.record(
            guild,
            EngineCall::Play {
                title: track.title().to_string(),
                volume,
            },
        );
        let mut nodes = self.nodes.lock();
        let node = nodes.entry(guild).or_default();
        node.track = Some(track.clone());
        node.paused = false;
        node.volume = volume;
        Ok(())
    }

    async fn stop(&self, guild: GuildId) -> HanabiResult<()> {
        self.record(guild, EngineCall::Stop);
        if let Some(node) = self.nodes.lock().get_mut(&guild) {
            node.track = None;
        }
        Ok(())
    }

    async fn destroy(&self, guild: GuildId) -> HanabiResult<()> {
        self.record(guild, EngineCall::Destroy);
        self.nodes.lock().remove(&guild);
        Ok(())
    }

    async fn set_pause(&self, guild: GuildId, paused: bool) -> HanabiResult<()> {
        self.record(guild, EngineCall::SetPause(paused));
        self.nodes.lock().entry(guild).or_default().paused = paused;
        Ok(())
    }

    async fn set_volume(&self, guild: GuildId, volume: u16) -> HanabiResult<()> {
        self.record(guild, EngineCall::SetVolume(volume));
        self.nodes.lock().entry(guild).or_default().volume = volume;
        Ok(())
    }

    async fn guild_node(&self, guild: GuildId) -> HanabiResult<GuildNode> {
        Ok(self.node(guild))
    }

    async fn set_guild_node(&self, guild: GuildId, node: &GuildNode) -> HanabiResult<()> {
        self.nodes.lock().insert(guild, node.clone());
        Ok(())
    }

    async fn wait_for_connection(&self, _guild: GuildId, _timeout: Duration) -> HanabiResult<()> {
        Ok(())
    }

    async fn wait_for_disconnection(&self, guild: GuildId, _timeout: Duration) -> HanabiResult<()> {
        self.record(guild, EngineCall::AwaitDisconnect);
        Ok(())
    }

    async fn voice_state_update(&self, guild: GuildId, channel: Option<VoiceId>, _session_id: String) {
        self.record(guild, EngineCall::VoiceState(channel));
    }

    async fn voice_server_update(&self, guild: GuildId, _token: String, endpoint: String) {
        self.record(guild, EngineCall::VoiceServer(endpoint));
    }
}

/// Available in every guild unless limited.
#[derive(Default)]
pub struct MockGateway {
    only: Option<Vec<GuildId>>,
    pub joined: Mutex<Vec<(GuildId, VoiceId)>>,
    pub left: Mutex<Vec<GuildId>>,
}

impl MockGateway {
    pub fn limited_to(guilds: Vec<GuildId>) -> Self {
        Self {
            only: Some(guilds),
            ..Default::default()
        }
    }
}

#[async_trait]
impl VoiceGateway for MockGateway {
    async fn join(&self, guild: GuildId, voice: VoiceId) -> HanabiResult<()> {
        self.joined.lock().push((guild, voice));
        Ok(())
    }

    async fn leave(&self, guild: GuildId) -> HanabiResult<()> {
        self.left.lock().push(guild);
        Ok(())
    }

    fn available_in(&self, guild: GuildId) -> bool {
        self.only.as_ref().is_none_or(|only| only.contains(&guild))
    }
}

/// Keeps the plain-text summary of everything sent.
#[derive(Default)]
pub struct MockChat {
    next_id: AtomicU64,
    sent: Mutex<Vec<(ChannelId, String)>>,
}

impl MockChat {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
    }

    pub fn saw(&self, text: &str) -> bool {
        self.sent.lock().iter().any(|(_, sent)| sent == text)
    }
}

#[async_trait]
impl Messenger for MockChat {
    async fn send(&self, channel: ChannelId, message: ChatMessage) -> HanabiResult<MessageId> {
        self.sent.lock().push((channel, message.summary()));
        Ok(MessageId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    async fn edit(&self, _channel: ChannelId, _id: MessageId, _message: ChatMessage) -> HanabiResult<()> {
        Ok(())
    }

    async fn delete(&self, _channel: ChannelId, _id: MessageId) -> HanabiResult<()> {
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<MockEngine>,
    pub gateway: Arc<MockGateway>,
    pub chat: Arc<MockChat>,
    pub store: Arc<MemoryStore>,
    pub manager: Arc<SessionManager>,
}

pub struct HarnessBuilder {
    name: String,
    role: Role,
    config: SessionConfig,
    gateway: MockGateway,
    peers: Vec<Arc<Peer>>,
    coordinator: Option<Arc<dyn PeerTransport>>,
}

impl HarnessBuilder {
    pub fn new(name: &str) -> Self {
        let config = SessionConfig {
            enqueue_delay_ms: 0,
            progress_interval_ms: 10,
            message_ttl_secs: 3600,
            ..Default::default()
        };
        Self {
            name: name.to_string(),
            role: Role::Coordinator,
            config,
            gateway: MockGateway::default(),
            peers: Vec::new(),
            coordinator: None,
        }
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn config(mut self, edit: impl FnOnce(&mut SessionConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn guilds(mut self, guilds: Vec<GuildId>) -> Self {
        self.gateway = MockGateway::limited_to(guilds);
        self
    }

    pub fn peer(mut self, peer: Arc<Peer>) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn coordinator(mut self, transport: Arc<dyn PeerTransport>) -> Self {
        self.coordinator = Some(transport);
        self
    }

    pub fn build(self) -> Harness {
        let engine = Arc::new(MockEngine::default());
        let gateway = Arc::new(self.gateway);
        let chat = Arc::new(MockChat::default());
        let store = Arc::new(MemoryStore::new());
        let ctx = SessionContext {
            process: self.name,
            engine: engine.clone(),
            gateway: gateway.clone(),
            chat: chat.clone(),
            store: store.clone(),
            config: self.config,
            coordinator: self.coordinator,
        };
        let manager = SessionManager::new(self.role, ctx, self.peers);
        Harness {
            engine,
            gateway,
            chat,
            store,
            manager,
        }
    }
}

pub fn harness() -> Harness {
    HarnessBuilder::new("parent").build()
}

pub fn playlist(owner: UserId, name: &str, private: bool, titles: &[&str]) -> Playlist {
    Playlist {
        owner,
        name: name.to_string(),
        private,
        entries: titles
            .iter()
            .map(|title| PlaylistEntry::new(*title, *title))
            .collect(),
    }
}

pub const GUILD: GuildId = GuildId(1);
pub const VOICE: VoiceId = VoiceId(11);
pub const TEXT: ChannelId = ChannelId(21);
pub const U1: UserId = UserId(101);
pub const U2: UserId = UserId(102);
