use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    common::{ChannelId, GuildId, HanabiResult, UserId, VoiceId},
    interop::PeerCall,
    manager::Peer,
    protocol::RepeatMode,
    session::{DequeueTarget, EnqueueRequest, Location, PauseSetting, Session, VolumeSetting},
};

/// The coordinator's handle on a session a peer plays. Holds no queue;
/// every operation is one call to the owning peer, and the peer's failures
/// come back as the same errors a local session would raise.
pub struct RemoteSession {
    guild: GuildId,
    voice: VoiceId,
    text_channel: ChannelId,
    peer: Arc<Peer>,
}

impl RemoteSession {
    pub fn new(guild: GuildId, voice: VoiceId, text_channel: ChannelId, peer: Arc<Peer>) -> Self {
        Self {
            guild,
            voice,
            text_channel,
            peer,
        }
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    async fn forward(&self, call: PeerCall) -> HanabiResult<()> {
        debug!("[{}] `{}` -> {}", self.guild, call.op(), self.peer.name());
        self.peer.call(call).await.map(|_| ())
    }
}

#[async_trait]
impl Session for RemoteSession {
    fn guild(&self) -> GuildId {
        self.guild
    }

    fn voice(&self) -> VoiceId {
        self.voice
    }

    fn text_channel(&self) -> ChannelId {
        self.text_channel
    }

    fn location(&self) -> Location {
        Location::Remote(self.peer.name().to_string())
    }

    async fn connect(&self) -> HanabiResult<()> {
        self.forward(PeerCall::Connect {
            guild: self.guild,
            voice: self.voice,
            channel: self.text_channel,
        })
        .await
    }

    async fn disconnect(&self) -> HanabiResult<()> {
        self.forward(PeerCall::Disconnect { voice: self.voice }).await
    }

    async fn play(&self, requester: UserId, query: &str, position: Option<usize>) -> HanabiResult<()> {
        self.forward(PeerCall::Play {
            voice: self.voice,
            requester,
            query: query.to_string(),
            position,
        })
        .await
    }

    async fn pause(&self, setting: PauseSetting) -> HanabiResult<()> {
        self.forward(PeerCall::Pause {
            voice: self.voice,
            setting,
        })
        .await
    }

    async fn skip(&self, by: Option<i64>, to: Option<usize>) -> HanabiResult<()> {
        self.forward(PeerCall::Skip {
            voice: self.voice,
            by,
            to,
        })
        .await
    }

    async fn volume(&self, requester: UserId, setting: VolumeSetting) -> HanabiResult<()> {
        self.forward(PeerCall::Volume {
            voice: self.voice,
            requester,
            setting,
        })
        .await
    }

    async fn set_repeat_mode(&self, mode: RepeatMode) -> HanabiResult<()> {
        self.forward(PeerCall::RepeatMode {
            voice: self.voice,
            mode,
        })
        .await
    }

    async fn enqueue(&self, request: EnqueueRequest) -> HanabiResult<()> {
        self.forward(PeerCall::Enqueue {
            voice: self.voice,
            request,
        })
        .await
    }

    async fn dequeue(&self, target: DequeueTarget) -> HanabiResult<()> {
        self.forward(PeerCall::Dequeue {
            voice: self.voice,
            target,
        })
        .await
    }

    async fn stop(&self) -> HanabiResult<()> {
        self.forward(PeerCall::Stop { voice: self.voice }).await
    }

    async fn display_queue(&self, amount: Option<usize>) -> HanabiResult<()> {
        self.forward(PeerCall::DisplayQueue {
            voice: self.voice,
            amount,
        })
        .await
    }

    async fn display_playback(&self) -> HanabiResult<()> {
        self.forward(PeerCall::DisplayPlayback { voice: self.voice })
            .await
    }
}
