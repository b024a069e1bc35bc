//! Process-to-process calls.
//!
//! A `PeerCall` is one operation against another fleet member. Transports
//! move calls and their outcomes; `execute` runs a received call against the
//! local session manager.

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    common::{ChannelId, GuildId, HanabiError, HanabiResult, UserId, VoiceId, now_ms},
    manager::{SessionManager, ShutdownKind},
    protocol::{EnqueueMode, RepeatMode},
    session::{DequeueTarget, EnqueueRequest, PauseSetting, VolumeSetting},
};

pub mod channel;
pub mod envelope;
pub mod http;
pub mod ops;

pub use channel::{ChannelClient, ChannelTransport, Interop, OpChannel};
pub use envelope::{Payload, Status};
pub use http::HttpTransport;
pub use ops::{Args, OpTable, SchemaError};

/// Moves calls to one other fleet member.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Performs `call` remotely and returns the reply payload, envelope
    /// keys removed. Remote failures come back as the same `HanabiError`.
    async fn call(&self, call: PeerCall) -> HanabiResult<Payload>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerCall {
    Heartbeat { timestamp: u64 },
    /// A peer telling the coordinator it is ready.
    InitComplete { name: String },
    Connect { guild: GuildId, voice: VoiceId, channel: ChannelId },
    /// The sender already tore this session down; forget it.
    Delete { voice: VoiceId },
    Disconnect { voice: VoiceId },
    Shutdown,
    Reinit,
    Play { voice: VoiceId, requester: UserId, query: String, position: Option<usize> },
    Pause { voice: VoiceId, setting: PauseSetting },
    Skip { voice: VoiceId, by: Option<i64>, to: Option<usize> },
    Volume { voice: VoiceId, requester: UserId, setting: VolumeSetting },
    RepeatMode { voice: VoiceId, mode: RepeatMode },
    Enqueue { voice: VoiceId, request: EnqueueRequest },
    Dequeue { voice: VoiceId, target: DequeueTarget },
    Stop { voice: VoiceId },
    DisplayQueue { voice: VoiceId, amount: Option<usize> },
    DisplayPlayback { voice: VoiceId },
    States,
}

fn object(pairs: Vec<(&str, Value)>) -> Payload {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn voice_only(voice: VoiceId) -> Payload {
    object(vec![("voice_id", voice.0.into())])
}

impl PeerCall {
    pub fn heartbeat() -> Self {
        Self::Heartbeat { timestamp: now_ms() }
    }

    /// Operation name on the persistent channel.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Heartbeat { .. } => "heartbeat",
            Self::InitComplete { .. } => "init-complete",
            Self::Connect { .. } => "connect",
            Self::Delete { .. } => "delete",
            Self::Disconnect { .. } => "disconnect",
            Self::Shutdown => "shutdown",
            Self::Reinit => "reinit",
            Self::Play { .. } => "play",
            Self::Pause { .. } => "pause",
            Self::Skip { .. } => "skip",
            Self::Volume { .. } => "volume",
            Self::RepeatMode { .. } => "repeat-mode",
            Self::Enqueue { .. } => "enqueue",
            Self::Dequeue { .. } => "dequeue",
            Self::Stop { .. } => "stop",
            Self::DisplayQueue { .. } => "display-queue",
            Self::DisplayPlayback { .. } => "display-playback",
            Self::States => "states",
        }
    }

    pub fn voice(&self) -> Option<VoiceId> {
        match self {
            Self::Connect { voice, .. }
            | Self::Delete { voice }
            | Self::Disconnect { voice }
            | Self::Play { voice, .. }
            | Self::Pause { voice, .. }
            | Self::Skip { voice, .. }
            | Self::Volume { voice, .. }
            | Self::RepeatMode { voice, .. }
            | Self::Enqueue { voice, .. }
            | Self::Dequeue { voice, .. }
            | Self::Stop { voice }
            | Self::DisplayQueue { voice, .. }
            | Self::DisplayPlayback { voice } => Some(*voice),
            Self::Heartbeat { .. }
            | Self::InitComplete { .. }
            | Self::Shutdown
            | Self::Reinit
            | Self::States => None,
        }
    }

    /// Arguments under their operation-channel names.
    pub fn args(&self) -> Payload {
        match self {
            Self::Heartbeat { timestamp } => object(vec![("timestamp", (*timestamp).into())]),
            Self::InitComplete { name } => object(vec![("child_name", name.as_str().into())]),
            Self::Connect { guild, voice, channel } => object(vec![
                ("guild_id", guild.0.into()),
                ("voice_id", voice.0.into()),
                ("channel_id", channel.0.into()),
            ]),
            Self::Delete { voice }
            | Self::Disconnect { voice }
            | Self::Stop { voice }
            | Self::DisplayPlayback { voice } => voice_only(*voice),
            Self::Shutdown | Self::Reinit | Self::States => Payload::new(),
            Self::Play { voice, requester, query, position } => object(vec![
                ("voice_id", voice.0.into()),
                ("requester", requester.0.into()),
                ("title", query.as_str().into()),
                ("position", position.map(|p| p as u64).into()),
            ]),
            Self::Pause { voice, setting } => object(vec![
                ("voice_id", voice.0.into()),
                ("setting", setting.as_str().into()),
            ]),
            Self::Skip { voice, by, to } => object(vec![
                ("voice_id", voice.0.into()),
                ("by", (*by).into()),
                ("to", to.map(|t| t as u64).into()),
            ]),
            Self::Volume { voice, requester, setting } => object(vec![
                ("voice_id", voice.0.into()),
                ("requester", requester.0.into()),
                ("setting", setting.to_string().into()),
            ]),
            Self::RepeatMode { voice, mode } => object(vec![
                ("voice_id", voice.0.into()),
                ("mode", mode.as_str().into()),
            ]),
            Self::Enqueue { voice, request } => object(vec![
                ("voice_id", voice.0.into()),
                ("name", request.name.as_str().into()),
                ("owner", request.owner.0.into()),
                ("requester", request.requester.0.into()),
                ("shuffle", request.shuffle.into()),
                ("mode", request.mode.as_str().into()),
                ("bypass_owner", request.bypass_owner.into()),
            ]),
            Self::Dequeue { voice, target } => {
                let (positions, requester) = match target {
                    DequeueTarget::Positions(positions) => (
                        positions.iter().map(|&p| Value::from(p as u64)).collect(),
                        None,
                    ),
                    DequeueTarget::Requester(user) => (Vec::new(), Some(user.0)),
                };
                object(vec![
                    ("voice_id", voice.0.into()),
                    ("positions", Value::Array(positions)),
                    ("requester", requester.into()),
                ])
            }
            Self::DisplayQueue { voice, amount } => object(vec![
                ("voice_id", voice.0.into()),
                ("amount", amount.map(|a| a as u64).into()),
            ]),
        }
    }

    /// Rebuilds a call from schema-checked arguments.
    pub fn decode(op: &str, args: &Args) -> HanabiResult<Self> {
        let voice = || args.u64("voice_id").map(VoiceId);
        let index = |value: Option<u64>| value.map(|v| v as usize);

        Ok(match op {
            "heartbeat" => Self::Heartbeat {
                timestamp: args.opt_u64("timestamp")?.unwrap_or_else(now_ms),
            },
            "init-complete" => Self::InitComplete {
                name: args.str("child_name")?.to_string(),
            },
            "connect" => Self::Connect {
                guild: GuildId(args.u64("guild_id")?),
                voice: voice()?,
                channel: ChannelId(args.u64("channel_id")?),
            },
            "delete" => Self::Delete { voice: voice()? },
            "disconnect" => Self::Disconnect { voice: voice()? },
            "shutdown" => Self::Shutdown,
            "reinit" => Self::Reinit,
            "play" => Self::Play {
                voice: voice()?,
                requester: UserId(args.u64("requester")?),
                query: args.str("title")?.to_string(),
                position: index(args.opt_u64("position")?),
            },
            "pause" => Self::Pause {
                voice: voice()?,
                setting: args.str("setting")?.parse()?,
            },
            "skip" => Self::Skip {
                voice: voice()?,
                by: args.opt_i64("by")?,
                to: index(args.opt_u64("to")?),
            },
            "volume" => Self::Volume {
                voice: voice()?,
                requester: UserId(args.u64("requester")?),
                setting: args.str("setting")?.parse()?,
            },
            "repeat-mode" => Self::RepeatMode {
                voice: voice()?,
                mode: args.str("mode")?.parse()?,
            },
            "enqueue" => Self::Enqueue {
                voice: voice()?,
                request: EnqueueRequest {
                    requester: UserId(args.u64("requester")?),
                    owner: UserId(args.u64("owner")?),
                    name: args.str("name")?.to_string(),
                    shuffle: args.bool("shuffle")?,
                    mode: args.str("mode")?.parse::<EnqueueMode>()?,
                    bypass_owner: args.bool("bypass_owner")?,
                },
            },
            "dequeue" => {
                let positions = args.list_u64("positions")?;
                let target = match args.opt_u64("requester")? {
                    Some(user) if positions.is_empty() => DequeueTarget::Requester(UserId(user)),
                    _ => DequeueTarget::Positions(positions.into_iter().map(|p| p as usize).collect()),
                };
                Self::Dequeue { voice: voice()?, target }
            }
            "stop" => Self::Stop { voice: voice()? },
            "display-queue" => Self::DisplayQueue {
                voice: voice()?,
                amount: index(args.opt_u64("amount")?),
            },
            "display-playback" => Self::DisplayPlayback { voice: voice()? },
            "states" => Self::States,
            other => {
                return Err(HanabiError::MalformedRequest(format!(
                    "no decoder for operation `{}`",
                    other
                )));
            }
        })
    }

    /// Runs a received call against this process' sessions.
    pub async fn execute(self, manager: &SessionManager) -> HanabiResult<Payload> {
        let done = || Ok(Payload::new());
        match self {
            Self::Heartbeat { timestamp } => Ok(object(vec![("timestamp", timestamp.into())])),
            Self::InitComplete { name } => {
                manager.mark_peer_alive(&name)?;
                done()
            }
            Self::Connect { guild, voice, channel } => {
                manager.accept_session(guild, voice, channel).await?;
                done()
            }
            Self::Delete { voice } => {
                let action = match manager.delete_session(voice).await {
                    Some(_) => "destroyed",
                    None => "none",
                };
                Ok(object(vec![("action", action.into())]))
            }
            Self::Disconnect { voice } => {
                manager.destroy_session(voice).await?;
                done()
            }
            Self::Shutdown => {
                manager.request_shutdown(ShutdownKind::Kill);
                done()
            }
            Self::Reinit => {
                manager.request_shutdown(ShutdownKind::Reinit);
                done()
            }
            Self::Play { voice, requester, query, position } => {
                let session = manager.get_session(voice).await?;
                session.play(requester, &query, position).await?;
                done()
            }
            Self::Pause { voice, setting } => {
                manager.get_session(voice).await?.pause(setting).await?;
                done()
            }
            Self::Skip { voice, by, to } => {
                manager.get_session(voice).await?.skip(by, to).await?;
                done()
            }
            Self::Volume { voice, requester, setting } => {
                let session = manager.get_session(voice).await?;
                session.volume(requester, setting).await?;
                done()
            }
            Self::RepeatMode { voice, mode } => {
                manager.get_session(voice).await?.set_repeat_mode(mode).await?;
                done()
            }
            Self::Enqueue { voice, request } => {
                manager.get_session(voice).await?.enqueue(request).await?;
                done()
            }
            Self::Dequeue { voice, target } => {
                manager.get_session(voice).await?.dequeue(target).await?;
                done()
            }
            Self::Stop { voice } => {
                manager.get_session(voice).await?.stop().await?;
                done()
            }
            Self::DisplayQueue { voice, amount } => {
                manager.get_session(voice).await?.display_queue(amount).await?;
                done()
            }
            Self::DisplayPlayback { voice } => {
                manager.get_session(voice).await?.display_playback().await?;
                done()
            }
            Self::States => {
                let states = serde_json::to_value(manager.voice_states().await)
                    .map_err(|e| HanabiError::PeerFailure(e.to_string()))?;
                Ok(object(vec![("states", states)]))
            }
        }
    }
}
