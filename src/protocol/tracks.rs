use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::common::{HanabiError, UserId};

/// A single playable track as resolved by the audio engine, plus the
/// queue-time fields the session attaches when it is enqueued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Engine-encoded track handle.
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default = "default_json_object")]
    pub plugin_info: serde_json::Value,
    /// Who asked for this track. Set when the track is enqueued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<UserId>,
    /// Clip start in milliseconds.
    #[serde(default)]
    pub begin_at: u64,
    /// Clip end in milliseconds. Playback is cut once the position reaches it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<u64>,
}

fn default_json_object() -> serde_json::Value {
    serde_json::json!({})
}

impl Track {
    pub fn new(encoded: impl Into<String>, info: TrackInfo) -> Self {
        Self {
            encoded: encoded.into(),
            info,
            plugin_info: default_json_object(),
            requester: None,
            begin_at: 0,
            end_at: None,
        }
    }

    pub fn requested_by(mut self, requester: UserId) -> Self {
        self.requester = Some(requester);
        self
    }

    pub fn clipped(mut self, begin_at: u64, end_at: Option<u64>) -> Self {
        self.begin_at = begin_at;
        self.end_at = end_at;
        self
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    /// True once `position` has reached the configured clip end.
    pub fn clip_reached(&self, position: u64) -> bool {
        self.end_at.is_some_and(|end| end <= position)
    }
}

/// Metadata for an audio track.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Duration in milliseconds. 0 for live streams.
    pub length: u64,
    pub is_stream: bool,
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub isrc: Option<String>,
    pub source_name: String,
}

/// Result of a `/v4/loadtracks` call.
#[derive(Debug, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    Track(Track),
    Playlist(PlaylistData),
    Search(Vec<Track>),
    Empty {},
    Error(LoadError),
}

impl LoadResult {
    /// The single track a query resolves to: the track itself, the first
    /// search hit, or the playlist's selected (else first) entry.
    pub fn into_first(self) -> Option<Track> {
        match self {
            Self::Track(track) => Some(track),
            Self::Search(tracks) => tracks.into_iter().next(),
            Self::Playlist(playlist) => {
                let selected = usize::try_from(playlist.info.selected_track).unwrap_or(0);
                let mut tracks = playlist.tracks;
                if selected < tracks.len() {
                    Some(tracks.swap_remove(selected))
                } else {
                    tracks.into_iter().next()
                }
            }
            Self::Empty {} | Self::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistData {
    pub info: PlaylistInfo,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// Index of the selected track, or -1 if none.
    pub selected_track: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadError {
    pub message: Option<String>,
    pub severity: String,
    pub cause: String,
}

/// What happens when the current track finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    None,
    One,
    All,
}

/// Where a bulk enqueue places each new track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnqueueMode {
    /// At the end of the queue.
    #[default]
    Fifo,
    /// Immediately after the cursor, so the batch reads in reverse order.
    Lifo,
    /// At a random index after the cursor.
    Random,
    /// Evenly spread among the other requesters' tracks.
    Interlace,
}

macro_rules! wire_enum {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = HanabiError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok(Self::$variant),)+
                    _ => Err(HanabiError::setting(format!("The setting `{}` is not valid.", s))),
                }
            }
        }
    };
}

wire_enum!(RepeatMode { None => "none", One => "one", All => "all" });
wire_enum!(EnqueueMode {
    Fifo => "fifo",
    Lifo => "lifo",
    Random => "random",
    Interlace => "interlace",
});

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> TrackInfo {
        TrackInfo {
            identifier: "dQw4w9WgXcQ".to_string(),
            is_seekable: true,
            author: "Rick Astley".to_string(),
            length: 212000,
            is_stream: false,
            position: 0,
            title: "Never Gonna Give You Up".to_string(),
            uri: Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string()),
            artwork_url: None,
            isrc: None,
            source_name: "youtube".to_string(),
        }
    }

    #[test]
    fn search_results_resolve_to_the_first_hit() {
        let raw = serde_json::json!({
            "loadType": "search",
            "data": [
                { "encoded": "AAA", "info": sample_info() },
                { "encoded": "BBB", "info": sample_info() }
            ]
        });
        let result: LoadResult = serde_json::from_value(raw).expect("search payload");
        let track = result.into_first().expect("first hit");
        assert_eq!(track.encoded, "AAA");
        assert_eq!(track.requester, None);
        assert_eq!(track.begin_at, 0);
    }

    #[test]
    fn empty_results_resolve_to_nothing() {
        let raw = serde_json::json!({ "loadType": "empty", "data": {} });
        let result: LoadResult = serde_json::from_value(raw).expect("empty payload");
        assert!(result.into_first().is_none());
    }

    #[test]
    fn playlists_prefer_the_selected_track() {
        let raw = serde_json::json!({
            "loadType": "playlist",
            "data": {
                "info": { "name": "mix", "selectedTrack": 1 },
                "pluginInfo": {},
                "tracks": [
                    { "encoded": "AAA", "info": sample_info() },
                    { "encoded": "BBB", "info": sample_info() }
                ]
            }
        });
        let result: LoadResult = serde_json::from_value(raw).expect("playlist payload");
        assert_eq!(result.into_first().map(|t| t.encoded).as_deref(), Some("BBB"));
    }

    #[test]
    fn clip_end_is_inclusive() {
        let track = Track::new("AAA", sample_info()).clipped(1000, Some(5000));
        assert!(!track.clip_reached(4999));
        assert!(track.clip_reached(5000));
        assert!(!Track::new("AAA", sample_info()).clip_reached(u64::MAX));
    }

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!("LIFO".parse::<EnqueueMode>().unwrap(), EnqueueMode::Lifo);
        assert_eq!("all".parse::<RepeatMode>().unwrap(), RepeatMode::All);
        let err = "sideways".parse::<EnqueueMode>().unwrap_err();
        assert_eq!(err.to_string(), "The setting `sideways` is not valid.");
    }
}
