use serde::Deserialize;

use crate::{common::types::GuildId, protocol::tracks::Track};

/// Messages received from the audio engine's event socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum EngineMessage {
    Ready {
        resumed: bool,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    PlayerUpdate {
        guild_id: GuildId,
        state: PlayerState,
    },
    Stats(serde_json::Value),
    Event(EngineEvent),
}

/// Player lifecycle events routed to the owning local session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart { guild_id: GuildId, track: Track },

    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        guild_id: GuildId,
        track: Track,
        reason: TrackEndReason,
    },

    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        guild_id: GuildId,
        track: Track,
        exception: TrackException,
    },

    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck {
        guild_id: GuildId,
        track: Track,
        threshold_ms: u64,
    },

    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebSocketClosed {
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },

    /// Not a wire event; `PlayerUpdate` messages are folded in here so the
    /// event pump has a single stream to route.
    #[serde(skip)]
    PlayerUpdate {
        guild_id: GuildId,
        state: PlayerState,
    },
}

impl EngineEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::WebSocketClosed { guild_id, .. }
            | Self::PlayerUpdate { guild_id, .. } => *guild_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether the session may move on to the next track by itself.
    pub fn may_start_next(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    pub message: Option<String>,
    pub severity: String,
    pub cause: String,
}

/// Periodic position report for one player.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PlayerState {
    pub time: u64,
    #[serde(default)]
    pub position: u64,
    pub connected: bool,
    pub ping: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_end_events_decode_with_string_guild_ids() {
        let raw = serde_json::json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "1",
            "track": { "encoded": "AAA", "info": {
                "identifier": "x", "isSeekable": true, "author": "a", "length": 1000,
                "isStream": false, "position": 0, "title": "song A", "uri": null,
                "artworkUrl": null, "isrc": null, "sourceName": "youtube"
            }},
            "reason": "finished"
        });
        let message: EngineMessage = serde_json::from_value(raw).expect("event");
        match message {
            EngineMessage::Event(EngineEvent::TrackEnd { guild_id, reason, .. }) => {
                assert_eq!(guild_id, GuildId(1));
                assert!(reason.may_start_next());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn replaced_and_stopped_tracks_do_not_advance() {
        assert!(!TrackEndReason::Replaced.may_start_next());
        assert!(!TrackEndReason::Stopped.may_start_next());
        assert!(!TrackEndReason::Cleanup.may_start_next());
        assert!(TrackEndReason::LoadFailed.may_start_next());
    }

    #[test]
    fn player_updates_decode() {
        let raw = serde_json::json!({
            "op": "playerUpdate",
            "guildId": "7",
            "state": { "time": 1, "position": 4200, "connected": true, "ping": 12 }
        });
        let message: EngineMessage = serde_json::from_value(raw).expect("update");
        assert!(matches!(
            message,
            EngineMessage::PlayerUpdate { guild_id: GuildId(7), state } if state.position == 4200
        ));
    }
}
