//! The session manager: which process owns which voice channel.
//!
//! One registry per process, guarded by a single async mutex held for the
//! whole of every mutating operation, network round trips included. Lock
//! order is registry, then a session's enqueue lock, then its state lock.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    chat::ChatMessage,
    common::{ChannelId, GuildId, HanabiError, HanabiResult, VoiceId},
    configs::Role,
    interop::PeerCall,
    protocol::EngineEvent,
    session::{LocalSession, Location, Phase, RemoteSession, Session, SessionContext},
};

pub mod peers;
pub mod tasks;

pub use peers::Peer;

/// Discord's close code for "disconnected from voice" (kicked or channel deleted).
const VOICE_DISCONNECTED: u16 = 4014;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    Kill,
    /// Exit so a supervisor starts the process again.
    Reinit,
}

impl ShutdownKind {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Kill => 0,
            Self::Reinit => 75,
        }
    }
}

#[derive(Default)]
struct Registry {
    by_voice: HashMap<VoiceId, Arc<dyn Session>>,
    /// Local sessions only, at most one per guild.
    local: HashMap<GuildId, Arc<LocalSession>>,
}

impl Registry {
    fn insert_local(&mut self, session: Arc<LocalSession>) {
        self.by_voice.insert(session.voice(), session.clone());
        self.local.insert(session.guild(), session);
    }

    fn remove(&mut self, voice: VoiceId) -> Option<Arc<dyn Session>> {
        let session = self.by_voice.remove(&voice)?;
        if session.location() == Location::Local
            && self
                .local
                .get(&session.guild())
                .is_some_and(|local| local.voice() == voice)
        {
            self.local.remove(&session.guild());
        }
        Some(session)
    }
}

/// One row of `voice_states`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceState {
    pub guild: GuildId,
    pub voice: VoiceId,
    pub location: Location,
    pub status: &'static str,
}

pub struct SessionManager {
    name: String,
    role: Role,
    registry: Mutex<Registry>,
    peers: Vec<Arc<Peer>>,
    ctx: Arc<SessionContext>,
    me: Weak<SessionManager>,
    shutdown: CancellationToken,
    shutdown_kind: SyncMutex<Option<ShutdownKind>>,
}

impl SessionManager {
    pub fn new(role: Role, ctx: SessionContext, peers: Vec<Arc<Peer>>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: ctx.process.clone(),
            role,
            registry: Mutex::new(Registry::default()),
            peers,
            ctx: Arc::new(ctx),
            me: me.clone(),
            shutdown: CancellationToken::new(),
            shutdown_kind: SyncMutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_coordinator(&self) -> bool {
        self.role == Role::Coordinator
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn peers(&self) -> &[Arc<Peer>] {
        &self.peers
    }

    pub fn peer(&self, name: &str) -> Option<&Arc<Peer>> {
        self.peers.iter().find(|p| p.name() == name)
    }

    /// Records a peer's announcement.
    pub fn mark_peer_alive(&self, name: &str) -> HanabiResult<()> {
        let peer = self
            .peer(name)
            .ok_or_else(|| HanabiError::InvalidName(name.to_string()))?;
        peer.mark_alive();
        peer.swap_online(true);
        info!("{} reports online", peer.describe());
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The first request wins; later ones only log.
    pub fn request_shutdown(&self, kind: ShutdownKind) {
        let mut current = self.shutdown_kind.lock();
        if current.is_none() {
            info!("Shutdown requested: {:?}", kind);
            *current = Some(kind);
        }
        self.shutdown.cancel();
    }

    pub fn shutdown_kind(&self) -> ShutdownKind {
        self.shutdown_kind.lock().unwrap_or(ShutdownKind::Kill)
    }

    fn can_hold_locally(&self, registry: &Registry, guild: GuildId) -> bool {
        !registry.local.contains_key(&guild) && self.ctx.gateway.available_in(guild)
    }

    async fn create_local_locked(
        &self,
        registry: &mut Registry,
        guild: GuildId,
        voice: VoiceId,
        channel: ChannelId,
    ) -> HanabiResult<Arc<dyn Session>> {
        let session = LocalSession::new(guild, voice, channel, self.ctx.clone(), self.me.clone());
        session.connect().await?;
        registry.insert_local(session.clone());
        info!("[{}] Local session created for {}", guild, voice);
        let session: Arc<dyn Session> = session;
        Ok(session)
    }

    async fn create_remote_locked(
        &self,
        registry: &mut Registry,
        peer: &Arc<Peer>,
        guild: GuildId,
        voice: VoiceId,
        channel: ChannelId,
    ) -> HanabiResult<Arc<dyn Session>> {
        let session: Arc<dyn Session> =
            Arc::new(RemoteSession::new(guild, voice, channel, peer.clone()));
        session.connect().await?;
        registry.by_voice.insert(voice, session.clone());
        info!("[{}] Session for {} placed on {}", guild, voice, peer.name());
        Ok(session)
    }

    /// Creates a session for `voice`: locally when this process can hold
    /// one for `guild`, otherwise (coordinator only) on the first live peer
    /// that accepts.
    pub async fn create_session(
        &self,
        guild: GuildId,
        voice: VoiceId,
        channel: ChannelId,
    ) -> HanabiResult<Arc<dyn Session>> {
        let mut registry = self.registry.lock().await;
        if registry.by_voice.contains_key(&voice) {
            return Err(HanabiError::SessionAlreadyExists);
        }
        if self.can_hold_locally(&registry, guild) {
            return self.create_local_locked(&mut registry, guild, voice, channel).await;
        }
        if !self.is_coordinator() {
            return Err(HanabiError::NotAvailable);
        }

        let window = self.ctx.config.liveness_window();
        for peer in &self.peers {
            if !peer.is_alive(window) {
                debug!("Skipping {}: not alive", peer.name());
                continue;
            }
            match self
                .create_remote_locked(&mut registry, peer, guild, voice, channel)
                .await
            {
                Ok(session) => return Ok(session),
                Err(HanabiError::NotAvailable) => {
                    debug!("{} cannot take {}", peer.name(), voice);
                }
                Err(e) => warn!("{} failed to take {}: {}", peer.name(), voice, e),
            }
        }
        Err(HanabiError::AllSessionsBusy)
    }

    /// Creates a session on the fleet member called `name`.
    pub async fn create_session_with(
        &self,
        name: &str,
        guild: GuildId,
        voice: VoiceId,
        channel: ChannelId,
    ) -> HanabiResult<Arc<dyn Session>> {
        let mut registry = self.registry.lock().await;
        if registry.by_voice.contains_key(&voice) {
            return Err(HanabiError::SessionAlreadyExists);
        }
        if name == self.name {
            if !self.can_hold_locally(&registry, guild) {
                return Err(HanabiError::NotAvailable);
            }
            return self.create_local_locked(&mut registry, guild, voice, channel).await;
        }

        let peer = self
            .peer(name)
            .ok_or_else(|| HanabiError::InvalidName(name.to_string()))?
            .clone();
        if !peer.is_alive(self.ctx.config.liveness_window()) {
            return Err(HanabiError::NotAvailable);
        }
        self.create_remote_locked(&mut registry, &peer, guild, voice, channel)
            .await
    }

    /// A coordinator asking this process to hold a session. Never fans out.
    pub async fn accept_session(
        &self,
        guild: GuildId,
        voice: VoiceId,
        channel: ChannelId,
    ) -> HanabiResult<Arc<dyn Session>> {
        let mut registry = self.registry.lock().await;
        if registry.by_voice.contains_key(&voice) {
            return Err(HanabiError::SessionAlreadyExists);
        }
        if !self.can_hold_locally(&registry, guild) {
            return Err(HanabiError::NotAvailable);
        }
        self.create_local_locked(&mut registry, guild, voice, channel).await
    }

    pub async fn get_session(&self, voice: VoiceId) -> HanabiResult<Arc<dyn Session>> {
        self.registry
            .lock()
            .await
            .by_voice
            .get(&voice)
            .cloned()
            .ok_or(HanabiError::NoSessionExists)
    }

    pub async fn get_local_session(&self, guild: GuildId) -> HanabiResult<Arc<LocalSession>> {
        self.registry
            .lock()
            .await
            .local
            .get(&guild)
            .cloned()
            .ok_or(HanabiError::NoSessionExists)
    }

    pub async fn sessions(&self) -> Vec<Arc<dyn Session>> {
        self.registry.lock().await.by_voice.values().cloned().collect()
    }

    pub(crate) async fn local_sessions(&self) -> Vec<Arc<LocalSession>> {
        self.registry.lock().await.local.values().cloned().collect()
    }

    /// Forgets a remote session without tearing it down. Used when its owner
    /// reports having done that already. Local sessions are only ever torn
    /// down here, never forgotten.
    pub async fn delete_session(&self, voice: VoiceId) -> Option<Arc<dyn Session>> {
        let mut registry = self.registry.lock().await;
        let removed = match registry.by_voice.get(&voice).map(|s| s.location()) {
            Some(Location::Remote(_)) => registry.remove(voice),
            Some(Location::Local) => {
                warn!("Refusing to delete local session for {}", voice);
                None
            }
            None => None,
        };
        match &removed {
            Some(session) => info!("[{}] Session for {} deleted", session.guild(), voice),
            None => debug!("No remote session for {} to delete", voice),
        }
        removed
    }

    /// A local session disconnecting itself. It is deregistered if it is
    /// still the session registered for its guild.
    pub(crate) async fn release_local(&self, session: &LocalSession) -> HanabiResult<()> {
        let mut registry = self.registry.lock().await;
        let voice = session.voice();
        let result = session.teardown().await;

        let registered = registry
            .local
            .get(&session.guild())
            .is_some_and(|local| std::ptr::eq(Arc::as_ptr(local), session));
        if registered {
            registry.remove(voice);
            info!("[{}] Session for {} destroyed", session.guild(), voice);
        }
        result
    }

    async fn destroy_locked(&self, registry: &mut Registry, voice: VoiceId) -> HanabiResult<()> {
        let session = registry
            .by_voice
            .get(&voice)
            .cloned()
            .ok_or(HanabiError::NoSessionExists)?;

        // `disconnect` on a local session takes the registry itself.
        let local = registry
            .local
            .get(&session.guild())
            .filter(|local| local.voice() == voice)
            .cloned();
        let result = match local {
            Some(local) => local.teardown().await,
            None => session.disconnect().await,
        };
        registry.remove(voice);
        info!("[{}] Session for {} destroyed", session.guild(), voice);

        match result {
            // The owner no longer had it; the mirror is gone now too.
            Err(HanabiError::NoSessionExists) if session.location() != Location::Local => Ok(()),
            Err(e) if !e.is_recoverable() => {
                warn!("[{}] Teardown of {} was incomplete: {}", session.guild(), voice, e);
                Ok(())
            }
            other => other,
        }
    }

    /// Disconnects the session and removes it. For remote sessions the
    /// disconnect is what tells the owning peer.
    pub async fn destroy_session(&self, voice: VoiceId) -> HanabiResult<()> {
        let mut registry = self.registry.lock().await;
        self.destroy_locked(&mut registry, voice).await
    }

    /// Destroys every session. With `forward`, the coordinator also passes
    /// the shutdown on to its live peers.
    pub async fn stop(&self, forward: Option<ShutdownKind>) {
        let mut registry = self.registry.lock().await;
        let voices: Vec<VoiceId> = registry.by_voice.keys().copied().collect();
        info!("Stopping {} session(s)", voices.len());
        for voice in voices {
            if let Err(e) = self.destroy_locked(&mut registry, voice).await {
                warn!("Failed to destroy session for {}: {}", voice, e);
            }
        }
        drop(registry);

        let Some(kind) = forward.filter(|_| self.is_coordinator()) else {
            return;
        };
        let window = self.ctx.config.liveness_window();
        for peer in self.peers.iter().filter(|p| p.is_alive(window)) {
            let call = match kind {
                ShutdownKind::Kill => PeerCall::Shutdown,
                ShutdownKind::Reinit => PeerCall::Reinit,
            };
            if let Err(e) = peer.call(call).await {
                warn!("Failed to pass shutdown on to {}: {}", peer.name(), e);
            }
        }
    }

    /// A voice-state update for this bot account from the chat gateway.
    /// The engine hears it first: a connect in progress holds the registry
    /// while it waits on the engine.
    pub async fn on_voice_state_update(
        &self,
        guild: GuildId,
        voice: Option<VoiceId>,
        session_id: String,
    ) -> HanabiResult<()> {
        self.ctx.engine.voice_state_update(guild, voice, session_id).await;
        self.handle_voice_move(guild, voice).await
    }

    /// A voice-server update from the chat gateway.
    pub async fn on_voice_server_update(&self, guild: GuildId, token: String, endpoint: String) {
        self.ctx.engine.voice_server_update(guild, token, endpoint).await;
    }

    /// The chat gateway reported this process' voice channel in `guild`
    /// changed. `None` means it left voice.
    pub async fn handle_voice_move(&self, guild: GuildId, voice: Option<VoiceId>) -> HanabiResult<()> {
        let mut registry = self.registry.lock().await;
        let Some(session) = registry.local.get(&guild).cloned() else {
            return Ok(());
        };
        let old = session.voice();

        let new = match voice {
            None => return self.destroy_locked(&mut registry, old).await,
            Some(new) if new == old => return Ok(()),
            Some(new) => new,
        };
        if registry.by_voice.contains_key(&new) {
            warn!("[{}] Moved into {} which already has a session", guild, new);
            return self.destroy_locked(&mut registry, old).await;
        }

        registry.by_voice.remove(&old);
        session.set_voice(new);
        registry.by_voice.insert(new, session.clone());
        info!("[{}] Session moved from {} to {}", guild, old, new);
        drop(registry);

        // The coordinator's mirror still points at the old channel.
        if let Some(coordinator) = self.ctx.coordinator.clone() {
            tokio::spawn(async move {
                if let Err(e) = coordinator.call(PeerCall::Delete { voice: old }).await {
                    warn!("[{}] Failed to report move to the coordinator: {}", guild, e);
                }
            });
        }
        Ok(())
    }

    pub async fn voice_states(&self) -> Vec<VoiceState> {
        let registry = self.registry.lock().await;
        let mut states = Vec::with_capacity(registry.by_voice.len());
        for (voice, session) in &registry.by_voice {
            let status = match registry.local.get(&session.guild()) {
                Some(local) if local.voice() == *voice => match local.phase().await {
                    Phase::New => "connecting",
                    Phase::Playing => "playing",
                    Phase::Paused => "paused",
                    Phase::Ended => "idle",
                    Phase::Disconnected => "disconnected",
                },
                _ => "remote",
            };
            states.push(VoiceState {
                guild: session.guild(),
                voice: *voice,
                location: session.location(),
                status,
            });
        }
        states.sort_by_key(|s| (s.guild, s.voice));
        states
    }

    /// Routes one audio-engine event to the guild's local session.
    pub async fn dispatch_event(&self, event: EngineEvent) {
        let guild = event.guild_id();
        let session = match self.get_local_session(guild).await {
            Ok(session) => session,
            Err(_) => {
                debug!("[{}] Event for a guild without a local session", guild);
                return;
            }
        };

        match event {
            EngineEvent::TrackStart { track, .. } => session.on_track_start(&track).await,
            EngineEvent::TrackEnd { track, reason, .. } => {
                debug!("[{}] Track `{}` ended: {:?}", guild, track.title(), reason);
                session.on_track_end(&track, reason.may_start_next()).await
            }
            EngineEvent::TrackException { track, exception, .. } => {
                session.on_track_exception(&track, &exception).await
            }
            EngineEvent::TrackStuck { track, threshold_ms, .. } => {
                warn!("[{}] Track `{}` stuck for {}ms", guild, track.title(), threshold_ms);
            }
            EngineEvent::WebSocketClosed { code, reason, by_remote, .. } => {
                warn!("[{}] Voice socket closed ({}): {}", guild, code, reason);
                if by_remote && code == VOICE_DISCONNECTED {
                    if let Err(e) = self.destroy_session(session.voice()).await {
                        warn!("[{}] Failed to clean up after voice disconnect: {}", guild, e);
                    }
                }
            }
            EngineEvent::PlayerUpdate { state, .. } => session.on_player_update(state).await,
        }
    }

    /// Sends a transient notice to `session`'s text channel.
    pub(crate) async fn announce(&self, channel: ChannelId, message: &str) {
        let ttl = self.ctx.config.message_ttl();
        if let Err(e) =
            crate::chat::send_transient(&self.ctx.chat, channel, ChatMessage::text(message), ttl).await
        {
            debug!("Failed to announce in {}: {}", channel, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinit_exits_distinctly() {
        assert_eq!(ShutdownKind::Kill.exit_code(), 0);
        assert_ne!(ShutdownKind::Reinit.exit_code(), 0);
    }

    #[test]
    fn registry_removal_is_idempotent() {
        let peer = Arc::new(Peer::over_channel("child-1"));
        let mut registry = Registry::default();
        let remote: Arc<dyn Session> = Arc::new(RemoteSession::new(
            GuildId(1),
            VoiceId(11),
            ChannelId(20),
            peer,
        ));
        registry.by_voice.insert(VoiceId(11), remote);
        assert!(registry.remove(VoiceId(11)).is_some());
        assert!(registry.remove(VoiceId(11)).is_none());
        assert!(registry.local.is_empty());
    }
}
