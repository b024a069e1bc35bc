use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    chat::Messenger,
    common::{ChannelId, GuildId, HanabiError, HanabiResult, UserId, VoiceId},
    configs::SessionConfig,
    engine::AudioEngine,
    gateway::VoiceGateway,
    interop::PeerTransport,
    protocol::{EnqueueMode, RepeatMode},
    store::Store,
};

pub mod jobs;
pub mod local;
pub mod player_message;
pub mod remote;

pub use jobs::{EnqueueJob, Progress};
pub use local::{LocalSession, Phase};
pub use remote::RemoteSession;

/// Where a session's playback actually happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "peer")]
pub enum Location {
    Local,
    Remote(String),
}

/// One voice connection, wherever it lives. The session manager hands these
/// out and callers never care which variant they hold.
#[async_trait]
pub trait Session: Send + Sync {
    fn guild(&self) -> GuildId;
    fn voice(&self) -> VoiceId;
    fn text_channel(&self) -> ChannelId;
    fn location(&self) -> Location;

    /// Joins the voice channel and readies a player for it.
    async fn connect(&self) -> HanabiResult<()>;

    /// Tears the session down and removes it from the session manager.
    async fn disconnect(&self) -> HanabiResult<()>;

    /// Resolves `query` and either starts it or queues it. `position` is a
    /// 1-based queue position; `None` appends.
    async fn play(&self, requester: UserId, query: &str, position: Option<usize>)
    -> HanabiResult<()>;

    async fn pause(&self, setting: PauseSetting) -> HanabiResult<()>;

    /// Exactly one of `by` (relative) or `to` (1-based absolute) must be set.
    async fn skip(&self, by: Option<i64>, to: Option<usize>) -> HanabiResult<()>;

    async fn volume(&self, requester: UserId, setting: VolumeSetting) -> HanabiResult<()>;

    async fn set_repeat_mode(&self, mode: RepeatMode) -> HanabiResult<()>;

    /// Starts a background job that bulk-enqueues a stored playlist.
    async fn enqueue(&self, request: EnqueueRequest) -> HanabiResult<()>;

    async fn dequeue(&self, target: DequeueTarget) -> HanabiResult<()>;

    /// Clears the queue and stops playback without leaving voice.
    async fn stop(&self) -> HanabiResult<()>;

    async fn display_queue(&self, amount: Option<usize>) -> HanabiResult<()>;

    async fn display_playback(&self) -> HanabiResult<()>;
}

/// Everything a local session talks to.
pub struct SessionContext {
    /// This process' fleet name.
    pub process: String,
    pub engine: Arc<dyn AudioEngine>,
    pub gateway: Arc<dyn VoiceGateway>,
    pub chat: Arc<dyn Messenger>,
    pub store: Arc<dyn Store>,
    pub config: SessionConfig,
    /// Set on non-coordinator processes. Local sessions on such a process
    /// tell the coordinator when they tear themselves down.
    pub coordinator: Option<Arc<dyn PeerTransport>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseSetting {
    Pause,
    Resume,
    /// Flip whatever the audio engine currently reports.
    Toggle,
}

impl PauseSetting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Toggle => "toggle",
        }
    }
}

impl fmt::Display for PauseSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PauseSetting {
    type Err = HanabiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" | "on" | "true" => Ok(Self::Pause),
            "resume" | "off" | "false" => Ok(Self::Resume),
            "toggle" => Ok(Self::Toggle),
            _ => Err(HanabiError::setting(format!(
                "The setting `{}` is not valid.",
                s
            ))),
        }
    }
}

/// `"42"` sets the volume, `"+10"` and `"-5"` move it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeSetting {
    Absolute(i64),
    Relative(i64),
}

impl VolumeSetting {
    /// The resulting volume, or a rejection if it leaves `[0, max]`.
    pub fn resolve(self, current: u16, max: u16) -> HanabiResult<u16> {
        let target = match self {
            Self::Absolute(value) => value,
            Self::Relative(delta) => i64::from(current).saturating_add(delta),
        };
        if !(0..=i64::from(max)).contains(&target) {
            return Err(HanabiError::setting(format!(
                "The volume must be between `0` and `{}`.",
                max
            )));
        }
        Ok(target as u16)
    }
}

impl fmt::Display for VolumeSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absolute(value) => write!(f, "{}", value),
            Self::Relative(delta) => write!(f, "{:+}", delta),
        }
    }
}

impl FromStr for VolumeSetting {
    type Err = HanabiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || HanabiError::setting(format!("The setting `{}` is not valid.", s));
        let relative = s.starts_with('+') || s.starts_with('-');
        let value: i64 = s.parse().map_err(|_| invalid())?;
        Ok(if relative {
            Self::Relative(value)
        } else {
            Self::Absolute(value)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DequeueTarget {
    /// 1-based positions.
    Positions(Vec<usize>),
    /// Every removable track this user asked for.
    Requester(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub requester: UserId,
    pub owner: UserId,
    pub name: String,
    pub shuffle: bool,
    pub mode: EnqueueMode,
    /// Lets the requester enqueue another user's private playlist.
    pub bypass_owner: bool,
}
