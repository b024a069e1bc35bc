use crate::{
    chat::{ChatMessage, Embed, control_buttons, loading_bar, timestamp, volume_bar},
    protocol::{RepeatMode, Track},
};

const PROGRESS_WIDTH: usize = 24;

/// Snapshot of a session's playback, rendered into the now-playing message.
pub struct PlaybackView<'a> {
    pub track: &'a Track,
    pub position: u64,
    pub paused: bool,
    pub volume: u16,
    pub max_volume: u16,
    pub repeat: RepeatMode,
    pub upcoming: String,
    pub process: &'a str,
}

impl PlaybackView<'_> {
    fn progress_line(&self, finished: bool) -> String {
        let info = &self.track.info;
        if info.is_stream {
            return "🔴 LIVE".to_string();
        }
        let end = self.track.end_at.unwrap_or(info.length).min(info.length.max(1));
        let position = if finished {
            end
        } else {
            self.position.min(end)
        };
        let ratio = if end == 0 {
            0.0
        } else {
            position as f64 / end as f64
        };
        format!(
            "{} {} {}",
            timestamp(position),
            loading_bar(ratio, PROGRESS_WIDTH),
            timestamp(end)
        )
    }

    /// The now-playing message. Finished messages lose their buttons and
    /// show a full bar.
    pub fn render(&self, finished: bool) -> ChatMessage {
        let info = &self.track.info;
        let state = if finished {
            "Finished"
        } else if self.paused {
            "Paused"
        } else {
            "Now Playing"
        };

        let mut embed = Embed::new(format!("{}: {}", state, info.title))
            .description(self.progress_line(finished))
            .field("Author", info.author.clone(), true);
        embed.url = info.uri.clone();
        embed.thumbnail = info.artwork_url.clone();

        if let Some(requester) = self.track.requester {
            embed = embed.field("Requested by", format!("<@{}>", requester), true);
        }
        embed = embed
            .field("Volume", volume_bar(self.volume, self.max_volume), true)
            .field("Repeat", self.repeat.as_str(), true)
            .field("Queue", self.upcoming.clone(), false);
        embed.footer = Some(format!("Playing on {}", self.process));

        let message = ChatMessage::embed(embed);
        if finished {
            message
        } else {
            message.with_buttons(control_buttons())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{common::UserId, protocol::TrackInfo};

    fn view(track: &Track) -> PlaybackView<'_> {
        PlaybackView {
            track,
            position: 30_000,
            paused: false,
            volume: 40,
            max_volume: 100,
            repeat: RepeatMode::All,
            upcoming: "**1. ▶ song A**".into(),
            process: "child-1",
        }
    }

    fn song() -> Track {
        Track::new(
            "AAA",
            TrackInfo {
                title: "song A".into(),
                author: "someone".into(),
                length: 120_000,
                ..Default::default()
            },
        )
        .requested_by(UserId(7))
    }

    #[test]
    fn live_messages_carry_controls() {
        let track = song();
        let message = view(&track).render(false);
        let embed = message.embed.expect("embed");
        assert_eq!(embed.title, "Now Playing: song A");
        assert_eq!(embed.description.as_deref().map(|d| d.starts_with("0:30 [")), Some(true));
        assert!(embed.fields.iter().any(|f| f.value == "<@7>"));
        assert_eq!(message.buttons.len(), 4);
    }

    #[test]
    fn finished_messages_drop_controls() {
        let track = song();
        let message = view(&track).render(true);
        assert!(message.buttons.is_empty());
        let embed = message.embed.expect("embed");
        assert_eq!(embed.title, "Finished: song A");
        assert!(embed.description.unwrap().starts_with("2:00 ["));
    }
}
