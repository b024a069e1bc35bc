use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, seq::SliceRandom};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    chat::{ChatMessage, Embed, loading_bar},
    common::{MessageId, UserId},
    protocol::EnqueueMode,
    session::{EnqueueRequest, LocalSession},
    store::{Playlist, PlaylistEntry},
};

const PROGRESS_WIDTH: usize = 30;

/// Where the `i`-th successfully resolved track of a batch goes, given the
/// queue's cursor and length at the moment of the splice.
///
/// `factor` is the number of other requesters with upcoming tracks, plus one.
pub fn placement<R: Rng + ?Sized>(
    mode: EnqueueMode,
    i: usize,
    cursor: usize,
    len: usize,
    factor: usize,
    rng: &mut R,
) -> usize {
    if len == 0 {
        return 0;
    }
    let index = match mode {
        EnqueueMode::Fifo => len,
        EnqueueMode::Lifo => cursor + 1,
        EnqueueMode::Random => rng.gen_range(cursor + 1..=len),
        EnqueueMode::Interlace => cursor + 1 + factor * i,
    };
    index.min(len)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    /// Entries processed so far, failed ones included.
    pub done: usize,
    pub total: usize,
    pub failed: Vec<String>,
}

/// A cancellable bulk enqueue of one stored playlist into one session.
pub struct EnqueueJob {
    id: Uuid,
    requester: UserId,
    owner: UserId,
    playlist: String,
    mode: EnqueueMode,
    /// Entries in processing order, each with its index in the stored playlist.
    entries: Vec<(usize, PlaylistEntry)>,
    progress: Mutex<Progress>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl EnqueueJob {
    pub fn new(request: &EnqueueRequest, playlist: Playlist) -> Arc<Self> {
        let mut entries: Vec<(usize, PlaylistEntry)> =
            playlist.entries.into_iter().enumerate().collect();
        if request.shuffle {
            entries.shuffle(&mut rand::thread_rng());
        }

        Arc::new(Self {
            id: Uuid::new_v4(),
            requester: request.requester,
            owner: playlist.owner,
            playlist: playlist.name,
            mode: request.mode,
            progress: Mutex::new(Progress {
                done: 0,
                total: entries.len(),
                failed: Vec::new(),
            }),
            entries,
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn requester(&self) -> UserId {
        self.requester
    }

    pub fn mode(&self) -> EnqueueMode {
        self.mode
    }

    /// Stops further processing. Tracks already inserted stay.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    pub fn progress(&self) -> Progress {
        self.progress.lock().clone()
    }

    pub fn render(&self) -> ChatMessage {
        let progress = self.progress();
        let title = if self.is_cancelled() {
            "Enqueueing was cancelled".to_string()
        } else if self.is_finished() {
            format!("Finished enqueueing `{}`", self.playlist)
        } else {
            format!(
                "Enqueueing `{}` in {} mode",
                self.playlist,
                self.mode.as_str().to_ascii_uppercase()
            )
        };

        let ratio = if progress.total == 0 {
            1.0
        } else {
            progress.done as f64 / progress.total as f64
        };
        let mut embed = Embed::new(title).description(format!(
            "{} {}/{}",
            loading_bar(ratio, PROGRESS_WIDTH),
            progress.done,
            progress.total
        ));
        if !progress.failed.is_empty() {
            embed = embed.field("Failed Tracks", progress.failed.join("\n"), false);
        }
        ChatMessage::embed(embed)
    }

    /// Expands the playlist into `session`. Holds the session's bulk lock
    /// for the whole run and its state lock only per splice.
    pub(crate) async fn run(self: Arc<Self>, session: Arc<LocalSession>) {
        let _bulk = session.enqueue_lock().lock().await;
        let factor = session.interlace_factor(self.requester).await;
        let delay = session.context().config.enqueue_delay();
        let mut placed = 0;

        for (index, entry) in &self.entries {
            if self.cancel.is_cancelled() {
                break;
            }

            match session.context().engine.load_or_search(&entry.query).await {
                Ok(track) => {
                    let track = track
                        .requested_by(self.requester)
                        .clipped(entry.begin_at, entry.end_at);
                    if let Err(e) = session.splice(track, self.mode, placed, factor).await {
                        warn!(
                            "[{}] Enqueue job {} stopped: {}",
                            session.guild_id(),
                            self.id,
                            e
                        );
                        break;
                    }
                    placed += 1;
                }
                Err(e) => {
                    debug!("Enqueue job {} failed to resolve `{}`: {}", self.id, entry.title, e);
                    self.progress.lock().failed.push(entry.title.clone());
                    if let Err(e) = session
                        .context()
                        .store
                        .mark_failed(self.owner, &self.playlist, *index)
                        .await
                    {
                        warn!("Failed to mark `{}` as failed: {}", entry.title, e);
                    }
                }
            }

            self.progress.lock().done += 1;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(
            "[{}] Enqueue job {} done: {} placed, {} failed",
            session.guild_id(),
            self.id,
            placed,
            self.progress.lock().failed.len()
        );
        self.finished.cancel();
    }

    /// Keeps the progress message current until the job ends, then renders
    /// once more and removes the job from the session.
    pub(crate) async fn report(self: Arc<Self>, session: Arc<LocalSession>) {
        let chat = session.context().chat.clone();
        let channel = session.text_channel_id();
        let interval = session.context().config.progress_interval();

        let message: Option<MessageId> = match chat.send(channel, self.render()).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to send enqueue progress: {}", e);
                None
            }
        };

        loop {
            tokio::select! {
                _ = self.finished.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Some(id) = message {
                        if let Err(e) = chat.edit(channel, id, self.render()).await {
                            debug!("Failed to edit enqueue progress: {}", e);
                        }
                    }
                }
            }
        }

        if let Some(id) = message {
            if let Err(e) = chat.edit(channel, id, self.render()).await {
                debug!("Failed to edit enqueue progress: {}", e);
            }
        }
        session.remove_job(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn splice_all(mode: EnqueueMode, factor: usize) -> Vec<&'static str> {
        let mut queue = vec!["1", "2", "3"];
        let mut rng = StdRng::seed_from_u64(7);
        for (i, title) in ["a", "b", "c"].into_iter().enumerate() {
            let index = placement(mode, i, 0, queue.len(), factor, &mut rng);
            queue.insert(index, title);
        }
        queue
    }

    #[test]
    fn fifo_appends() {
        assert_eq!(splice_all(EnqueueMode::Fifo, 1), ["1", "2", "3", "a", "b", "c"]);
    }

    #[test]
    fn lifo_reverses_the_batch_after_the_cursor() {
        assert_eq!(splice_all(EnqueueMode::Lifo, 1), ["1", "c", "b", "a", "2", "3"]);
    }

    #[test]
    fn interlace_alternates_with_one_other_requester() {
        assert_eq!(
            splice_all(EnqueueMode::Interlace, 2),
            ["1", "a", "2", "b", "3", "c"]
        );
    }

    #[test]
    fn random_never_lands_on_or_before_the_cursor() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let index = placement(EnqueueMode::Random, 0, 2, 5, 1, &mut rng);
            assert!((3..=5).contains(&index));
        }
        assert_eq!(placement(EnqueueMode::Random, 0, 0, 0, 1, &mut rng), 0);
    }

    #[test]
    fn interlace_past_the_end_appends() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(placement(EnqueueMode::Interlace, 5, 0, 3, 2, &mut rng), 3);
    }
}
