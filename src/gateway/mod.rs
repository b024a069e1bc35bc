//! Voice-gateway collaborator: asks the chat platform to join or leave
//! voice channels on this process' bot account.

use async_trait::async_trait;
use tracing::info;

use crate::common::{GuildId, HanabiResult, VoiceId};

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Sends the voice-state update that joins `voice`.
    async fn join(&self, guild: GuildId, voice: VoiceId) -> HanabiResult<()>;

    /// Sends the voice-state update that leaves whatever channel this
    /// account occupies in `guild`.
    async fn leave(&self, guild: GuildId) -> HanabiResult<()>;

    /// Whether this bot account is a member of `guild` and may connect there.
    fn available_in(&self, guild: GuildId) -> bool;
}

/// Gateway used when no chat client is attached to the process: voice
/// updates are logged and every guild listed at construction is available.
pub struct DetachedGateway {
    guilds: Option<Vec<GuildId>>,
}

impl DetachedGateway {
    /// Available in every guild.
    pub fn open() -> Self {
        Self { guilds: None }
    }

    pub fn limited_to(guilds: Vec<GuildId>) -> Self {
        Self {
            guilds: Some(guilds),
        }
    }
}

#[async_trait]
impl VoiceGateway for DetachedGateway {
    async fn join(&self, guild: GuildId, voice: VoiceId) -> HanabiResult<()> {
        info!("[{}] Voice state update: join {}", guild, voice);
        Ok(())
    }

    async fn leave(&self, guild: GuildId) -> HanabiResult<()> {
        info!("[{}] Voice state update: leave", guild);
        Ok(())
    }

    fn available_in(&self, guild: GuildId) -> bool {
        self.guilds.as_ref().is_none_or(|g| g.contains(&guild))
    }
}
