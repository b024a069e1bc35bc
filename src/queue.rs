//! Position-tracked track list owned by a local session.
//!
//! Every mutating method assumes the caller holds the owning session's
//! state lock.

use crate::{
    common::{HanabiError, HanabiResult, UserId},
    protocol::Track,
};

#[derive(Debug, Clone, Default)]
pub struct Queue {
    tracks: Vec<Track>,
    /// Index of the track that is playing or about to play. Always `0` when empty.
    pos: usize,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.pos)
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn has_next(&self) -> bool {
        self.pos + 1 < self.tracks.len()
    }

    pub fn has_previous(&self) -> bool {
        self.pos > 0 && !self.tracks.is_empty()
    }

    /// Splices `track` in at `index` (clamped to the end) and returns where
    /// it landed. Inserting at or before the cursor shifts the cursor so it
    /// keeps pointing at the same track.
    pub fn insert(&mut self, track: Track, index: usize) -> usize {
        let index = index.min(self.tracks.len());
        if !self.tracks.is_empty() && index <= self.pos {
            self.pos += 1;
        }
        self.tracks.insert(index, track);
        index
    }

    pub fn append(&mut self, track: Track) -> usize {
        let index = self.tracks.len();
        self.insert(track, index)
    }

    pub fn insert_after_current(&mut self, track: Track) -> usize {
        let index = if self.tracks.is_empty() { 0 } else { self.pos + 1 };
        self.insert(track, index)
    }

    /// Moves the cursor by `delta`. On failure the message states how far
    /// the cursor actually can move from where it is.
    pub fn advance_by(&mut self, delta: i64) -> HanabiResult<usize> {
        if self.tracks.is_empty() {
            return Err(HanabiError::position("The queue is empty."));
        }
        if delta == 0 {
            return Err(HanabiError::position(
                "The queue cannot be advanced by `0`.",
            ));
        }

        let len = self.tracks.len() as i64;
        let pos = self.pos as i64;
        let target = pos.checked_add(delta).filter(|t| (0..len).contains(t));

        let Some(target) = target else {
            if len == 1 {
                return Err(HanabiError::position(
                    "There is nothing else in the queue to advance to.",
                ));
            }
            let lower = if pos != 0 { -pos } else { 1 };
            let upper = if pos + 1 != len { len - (pos + 1) } else { -1 };
            let message = if lower == upper {
                format!("This queue can currently only be advanced by `{}`.", lower)
            } else {
                format!(
                    "This queue can currently only be advanced by values between `{}` and `{}`.",
                    lower, upper
                )
            };
            return Err(HanabiError::position(message));
        };

        self.pos = target as usize;
        Ok(self.pos)
    }

    /// Jumps to `target`. Jumping to the current position is rejected.
    pub fn advance_to(&mut self, target: usize, zero_indexed: bool) -> HanabiResult<usize> {
        if self.tracks.is_empty() {
            return Err(HanabiError::position("The queue is empty."));
        }

        let len = self.tracks.len();
        let index = if zero_indexed {
            Some(target)
        } else {
            target.checked_sub(1)
        };

        let index = match index {
            Some(index) if index < len => index,
            _ => {
                let (lo, hi) = if zero_indexed { (0, len - 1) } else { (1, len) };
                return Err(HanabiError::position(format!(
                    "Values must be between `{}` and `{}`.",
                    lo, hi
                )));
            }
        };

        if index == self.pos {
            return Err(HanabiError::position(format!(
                "`{}` is the current position of the queue. This operation would have no effect.",
                target
            )));
        }

        self.pos = index;
        Ok(index)
    }

    /// Removes the track at a 1-based position. The current track cannot be removed.
    pub fn remove_at(&mut self, position: usize) -> HanabiResult<Track> {
        let index = self.checked_removal(position)?;
        Ok(self.remove_index(index))
    }

    /// Removes several 1-based positions at once. Nothing is removed unless
    /// every position is valid.
    pub fn remove_many(&mut self, positions: &[usize]) -> HanabiResult<Vec<Track>> {
        let mut indices = positions
            .iter()
            .map(|&p| self.checked_removal(p))
            .collect::<HanabiResult<Vec<_>>>()?;
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices.dedup();

        let mut removed: Vec<Track> = indices.into_iter().map(|i| self.remove_index(i)).collect();
        removed.reverse();
        Ok(removed)
    }

    /// Removes every track after or before the cursor that `requester` asked
    /// for. The current track stays.
    pub fn remove_requester(&mut self, requester: UserId) -> Vec<Track> {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.tracks.len() {
            if index != self.pos && self.tracks[index].requester == Some(requester) {
                removed.push(self.remove_index(index));
            } else {
                index += 1;
            }
        }
        removed
    }

    fn checked_removal(&self, position: usize) -> HanabiResult<usize> {
        let len = self.tracks.len();
        if position == 0 || position > len {
            return Err(HanabiError::position(if len == 0 {
                "The queue is empty.".to_string()
            } else {
                format!("Values must be between `1` and `{}`.", len)
            }));
        }
        let index = position - 1;
        if index == self.pos {
            return Err(HanabiError::position(
                "Removing at the current position is not allowed.",
            ));
        }
        Ok(index)
    }

    fn remove_index(&mut self, index: usize) -> Track {
        let track = self.tracks.remove(index);
        if index < self.pos {
            self.pos -= 1;
        }
        if self.pos >= self.tracks.len() {
            self.pos = self.tracks.len().saturating_sub(1);
        }
        track
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.pos = 0;
    }

    /// Requesters of the current and upcoming tracks, in first-seen order.
    pub fn unique_requesters(&self) -> Vec<UserId> {
        let mut seen = Vec::new();
        for requester in self.tracks.iter().skip(self.pos).filter_map(|t| t.requester) {
            if !seen.contains(&requester) {
                seen.push(requester);
            }
        }
        seen
    }

    /// `window` entries either side of the cursor, current entry marked.
    pub fn contents(&self, window: usize) -> String {
        if self.tracks.is_empty() {
            return "The queue is empty.".to_string();
        }

        let start = self.pos.saturating_sub(window);
        let end = (self.pos + window + 1).min(self.tracks.len());
        (start..end)
            .map(|i| {
                let title = self.tracks[i].title();
                if i == self.pos {
                    format!("**{}. ▶ {}**", i + 1, title)
                } else {
                    format!("{}. {}", i + 1, title)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
