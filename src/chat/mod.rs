//! Chat-side collaborator: what the session layer says in text channels.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::common::{ChannelId, HanabiResult, MessageId};

pub mod render;

pub use render::*;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatMessage {
    pub content: Option<String>,
    pub embed: Option<Embed>,
    pub buttons: Vec<Button>,
}

impl ChatMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            embed: Some(embed),
            ..Default::default()
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        self.buttons = buttons;
        self
    }

    /// Plain-text rendering, used for logs and tests.
    pub fn summary(&self) -> String {
        match (&self.content, &self.embed) {
            (Some(content), _) => content.clone(),
            (None, Some(embed)) => embed.title.clone(),
            (None, None) => String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embed {
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub thumbnail: Option<String>,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
}

impl Embed {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Transport buttons attached to the now-playing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Previous,
    Stop,
    TogglePause,
    Next,
}

impl Control {
    pub const ALL: [Control; 4] = [Self::Previous, Self::Stop, Self::TogglePause, Self::Next];

    /// Stable id used as the button's custom id.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Previous => "hanabi:previous",
            Self::Stop => "hanabi:stop",
            Self::TogglePause => "hanabi:pause",
            Self::Next => "hanabi:next",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id() == id)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Previous => "⏮",
            Self::Stop => "⏹",
            Self::TogglePause => "⏯",
            Self::Next => "⏭",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub control: Control,
    pub disabled: bool,
}

pub fn control_buttons() -> Vec<Button> {
    Control::ALL
        .into_iter()
        .map(|control| Button {
            control,
            disabled: false,
        })
        .collect()
}

/// Sends, edits and deletes messages in text channels.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, channel: ChannelId, message: ChatMessage) -> HanabiResult<MessageId>;
    async fn edit(&self, channel: ChannelId, id: MessageId, message: ChatMessage) -> HanabiResult<()>;
    async fn delete(&self, channel: ChannelId, id: MessageId) -> HanabiResult<()>;
}

/// Sends a message and deletes it again after `ttl`.
pub async fn send_transient(
    chat: &Arc<dyn Messenger>,
    channel: ChannelId,
    message: ChatMessage,
    ttl: Duration,
) -> HanabiResult<()> {
    let id = chat.send(channel, message).await?;
    let chat = chat.clone();
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        if let Err(e) = chat.delete(channel, id).await {
            debug!("Failed to delete transient message {} in {}: {}", id, channel, e);
        }
    });
    Ok(())
}

/// A messenger that writes everything to the log. Used when this process
/// runs without a chat client attached.
#[derive(Default)]
pub struct LogMessenger {
    next_id: std::sync::atomic::AtomicU64,
}

#[async_trait]
impl Messenger for LogMessenger {
    async fn send(&self, channel: ChannelId, message: ChatMessage) -> HanabiResult<MessageId> {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        info!("[#{}] {}", channel, message.summary());
        Ok(MessageId(id))
    }

    async fn edit(&self, channel: ChannelId, id: MessageId, message: ChatMessage) -> HanabiResult<()> {
        debug!("[#{}] edit {}: {}", channel, id, message.summary());
        Ok(())
    }

    async fn delete(&self, _channel: ChannelId, _id: MessageId) -> HanabiResult<()> {
        Ok(())
    }
}
