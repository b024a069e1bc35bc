use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::HeaderValue,
    protocol::Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    common::{Backoff, GuildId, HanabiError, HanabiResult, VoiceId},
    configs::EngineConfig,
    engine::{AudioEngine, GuildNode, identifier_for},
    protocol::{EngineEvent, EngineMessage, LoadResult, Track},
};

const MAX_RECONNECT_ATTEMPTS: u32 = 30;

/// Voice connection info as reported by the chat gateway. Complete once all
/// three fields are known.
#[derive(Debug, Clone, Default)]
struct VoiceInfo {
    session_id: Option<String>,
    token: Option<String>,
    endpoint: Option<String>,
    forwarded: bool,
}

impl VoiceInfo {
    fn payload(&self) -> Option<Value> {
        Some(json!({
            "token": self.token.as_ref()?,
            "endpoint": self.endpoint.as_ref()?,
            "sessionId": self.session_id.as_ref()?,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct PlayerResponse {
    track: Option<Track>,
    volume: u16,
    paused: bool,
    state: crate::protocol::PlayerState,
}

/// Lavalink v4 client: REST calls for player control, one WebSocket for events.
pub struct LavalinkClient {
    config: EngineConfig,
    http: reqwest::Client,
    session_id: RwLock<Option<String>>,
    voice: DashMap<GuildId, VoiceInfo>,
    voice_changed: Notify,
    events: flume::Sender<EngineEvent>,
    cancel: CancellationToken,
}

fn map_http_err(e: reqwest::Error) -> HanabiError {
    if e.is_timeout() {
        HanabiError::Timeout(format!("audio engine: {}", e))
    } else {
        HanabiError::Engine(e.to_string())
    }
}

impl LavalinkClient {
    pub fn new(
        config: EngineConfig,
        events: flume::Sender<EngineEvent>,
        request_timeout: Duration,
    ) -> HanabiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(map_http_err)?;

        Ok(Self {
            config,
            http,
            session_id: RwLock::new(None),
            voice: DashMap::new(),
            voice_changed: Notify::new(),
            events,
            cancel: CancellationToken::new(),
        })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn session_id(&self) -> HanabiResult<String> {
        self.session_id
            .read()
            .clone()
            .ok_or_else(|| HanabiError::Engine("not connected to the audio engine".into()))
    }

    fn player_url(&self, guild: GuildId) -> HanabiResult<String> {
        Ok(format!(
            "{}/sessions/{}/players/{}",
            self.config.rest_base(),
            self.session_id()?,
            guild
        ))
    }

    async fn patch_player(&self, guild: GuildId, body: Value) -> HanabiResult<()> {
        let url = self.player_url(guild)?;
        debug!("[{}] PATCH player {}", guild, body);
        let response = self
            .http
            .patch(url)
            .header("Authorization", &self.config.password)
            .json(&body)
            .send()
            .await
            .map_err(map_http_err)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(HanabiError::Engine(format!(
                "player update failed ({}): {}",
                status, text
            )));
        }
        Ok(())
    }

    async fn forward_voice(&self, guild: GuildId) {
        let Some(payload) = self.voice.get(&guild).and_then(|info| info.payload()) else {
            return;
        };
        match self.patch_player(guild, json!({ "voice": payload })).await {
            Ok(()) => {
                if let Some(mut info) = self.voice.get_mut(&guild) {
                    info.forwarded = true;
                }
                self.voice_changed.notify_waiters();
            }
            Err(e) => warn!("[{}] Failed to forward voice info: {}", guild, e),
        }
    }

    fn is_connected(&self, guild: GuildId) -> bool {
        self.voice.get(&guild).is_some_and(|info| info.forwarded)
    }

    async fn wait_until(
        &self,
        guild: GuildId,
        timeout: Duration,
        connected: bool,
    ) -> HanabiResult<()> {
        let wait = async {
            loop {
                let notified = self.voice_changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_connected(guild) == connected {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            HanabiError::Timeout(format!(
                "voice {} for guild {}",
                if connected { "connection" } else { "disconnection" },
                guild
            ))
        })
    }

    /// Runs the event socket until `shutdown` is called, reconnecting with backoff.
    pub async fn run(self: Arc<Self>) {
        let mut backoff = Backoff::new(MAX_RECONNECT_ATTEMPTS);

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            match self.connect(&mut backoff).await {
                Ok(()) if self.cancel.is_cancelled() => {
                    debug!("Audio engine socket shutting down cleanly");
                    return;
                }
                Ok(()) => {}
                Err(e) => warn!("Audio engine connection error: {}", e),
            }

            *self.session_id.write() = None;
            if backoff.is_exhausted() {
                error!("Audio engine unreachable after {} attempts", MAX_RECONNECT_ATTEMPTS);
                return;
            }
            let delay = backoff.next();
            info!("Reconnecting to the audio engine in {:?}", delay);
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect(&self, backoff: &mut Backoff) -> HanabiResult<()> {
        let url = self.config.websocket_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| HanabiError::Engine(e.to_string()))?;
        let headers = request.headers_mut();
        let header = |value: &str| {
            HeaderValue::from_str(value).map_err(|e| HanabiError::Engine(e.to_string()))
        };
        headers.insert("Authorization", header(&self.config.password)?);
        headers.insert("User-Id", header(&self.config.user_id.to_string())?);
        headers.insert("Client-Name", header(&self.config.client_name)?);

        debug!("Connecting to audio engine: {}", url);
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| HanabiError::Engine(e.to_string()))?;
        let (_write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => return Err(HanabiError::Engine(e.to_string())),
                        None => return Ok(()),
                    };
                    match msg {
                        Message::Text(text) => {
                            if self.handle_message(text.as_str()) {
                                backoff.reset();
                            }
                        }
                        Message::Close(frame) => {
                            info!("Audio engine closed the socket: {:?}", frame);
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Returns true on `ready`.
    fn handle_message(&self, text: &str) -> bool {
        let message: EngineMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Unrecognised audio engine message: {} ({})", text, e);
                return false;
            }
        };

        let event = match message {
            EngineMessage::Ready {
                resumed,
                session_id,
            } => {
                info!(
                    "Audio engine ready: session={} resumed={}",
                    session_id, resumed
                );
                *self.session_id.write() = Some(session_id);
                return true;
            }
            EngineMessage::Stats(_) => return false,
            EngineMessage::PlayerUpdate { guild_id, state } => EngineEvent::PlayerUpdate {
                guild_id,
                state,
            },
            EngineMessage::Event(event) => event,
        };

        if self.events.send(event).is_err() {
            warn!("Engine event dropped: no event pump is running");
        }
        false
    }
}

#[async_trait]
impl AudioEngine for LavalinkClient {
    async fn load_or_search(&self, query: &str) -> HanabiResult<Track> {
        let identifier = identifier_for(query);
        let response = self
            .http
            .get(format!("{}/loadtracks", self.config.rest_base()))
            .header("Authorization", &self.config.password)
            .query(&[("identifier", identifier.as_str())])
            .send()
            .await
            .map_err(map_http_err)?;

        let result: LoadResult = response.json().await.map_err(map_http_err)?;
        if let LoadResult::Error(ref e) = result {
            debug!(
                "Load failed for `{}`: {} ({})",
                query,
                e.message.as_deref().unwrap_or("no message"),
                e.cause
            );
        }
        result
            .into_first()
            .ok_or_else(|| HanabiError::TrackNotFound(query.to_string()))
    }

    async fn play(
        &self,
        guild: GuildId,
        track: &Track,
        start_ms: u64,
        volume: u16,
    ) -> HanabiResult<()> {
        let mut body = json!({
            "track": { "encoded": track.encoded },
            "position": start_ms,
            "volume": volume,
            "paused": false,
        });
        if let Some(end) = track.end_at {
            body["endTime"] = json!(end);
        }
        self.patch_player(guild, body).await
    }

    async fn stop(&self, guild: GuildId) -> HanabiResult<()> {
        self.patch_player(guild, json!({ "track": { "encoded": null } }))
            .await
    }

    async fn destroy(&self, guild: GuildId) -> HanabiResult<()> {
        let url = self.player_url(guild)?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", &self.config.password)
            .send()
            .await
            .map_err(map_http_err)?;
        if !response.status().is_success() {
            return Err(HanabiError::Engine(format!(
                "player destroy failed ({})",
                response.status()
            )));
        }
        self.voice.remove(&guild);
        self.voice_changed.notify_waiters();
        Ok(())
    }

    async fn set_pause(&self, guild: GuildId, paused: bool) -> HanabiResult<()> {
        self.patch_player(guild, json!({ "paused": paused })).await
    }

    async fn set_volume(&self, guild: GuildId, volume: u16) -> HanabiResult<()> {
        self.patch_player(guild, json!({ "volume": volume })).await
    }

    async fn guild_node(&self, guild: GuildId) -> HanabiResult<GuildNode> {
        let response = self
            .http
            .get(self.player_url(guild)?)
            .header("Authorization", &self.config.password)
            .send()
            .await
            .map_err(map_http_err)?;
        let player: PlayerResponse = response.json().await.map_err(map_http_err)?;
        Ok(GuildNode {
            track: player.track,
            paused: player.paused,
            volume: player.volume,
            position: player.state.position,
        })
    }

    async fn set_guild_node(&self, guild: GuildId, node: &GuildNode) -> HanabiResult<()> {
        let track = match &node.track {
            Some(track) => json!({ "encoded": track.encoded }),
            None => json!({ "encoded": null }),
        };
        self.patch_player(
            guild,
            json!({
                "track": track,
                "position": node.position,
                "volume": node.volume,
                "paused": node.paused,
            }),
        )
        .await
    }

    async fn wait_for_connection(&self, guild: GuildId, timeout: Duration) -> HanabiResult<()> {
        self.wait_until(guild, timeout, true).await
    }

    async fn wait_for_disconnection(
        &self,
        guild: GuildId,
        timeout: Duration,
    ) -> HanabiResult<()> {
        self.wait_until(guild, timeout, false).await
    }

    async fn voice_state_update(&self, guild: GuildId, channel: Option<VoiceId>, session_id: String) {
        match channel {
            None => {
                self.voice.remove(&guild);
                self.voice_changed.notify_waiters();
            }
            Some(channel) => {
                debug!("[{}] Bot voice state now in {}", guild, channel);
                {
                    let mut info = self.voice.entry(guild).or_default();
                    info.session_id = Some(session_id);
                }
                self.forward_voice(guild).await;
            }
        }
    }

    async fn voice_server_update(&self, guild: GuildId, token: String, endpoint: String) {
        {
            let mut info = self.voice.entry(guild).or_default();
            info.token = Some(token);
            info.endpoint = Some(endpoint);
            info.forwarded = false;
        }
        self.forward_voice(guild).await;
    }
}
