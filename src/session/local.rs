use std::{
    cmp::Ordering as CmpOrdering,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    chat::{ChatMessage, Control, Embed, send_transient},
    common::{ChannelId, GuildId, HanabiError, HanabiResult, MessageId, UserId, VoiceId, now_ms},
    engine::GuildNode,
    interop::PeerCall,
    manager::SessionManager,
    protocol::{EnqueueMode, PlayerState, RepeatMode, Track, TrackException},
    queue::Queue,
    session::{
        DequeueTarget, EnqueueRequest, Location, PauseSetting, Session, SessionContext,
        VolumeSetting,
        jobs::{EnqueueJob, placement},
        player_message::PlaybackView,
    },
    store::HistoryEntry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    New,
    Playing,
    Paused,
    /// The last track finished and nothing followed it.
    Ended,
    Disconnected,
}

pub(crate) struct SessionState {
    queue: Queue,
    volume: u16,
    repeat: RepeatMode,
    phase: Phase,
    /// Last position reported by the engine.
    position: u64,
    /// The now-playing message and the track it describes.
    player_message: Option<(MessageId, Track)>,
}

/// A session whose playback this process' audio engine performs.
///
/// On a non-coordinator process a local session also reports its own
/// teardown to the coordinator, so the coordinator's remote mirror goes away.
///
/// Lock order: the manager's registry, then `enqueue_lock`, then `state`.
pub struct LocalSession {
    guild: GuildId,
    voice: AtomicU64,
    text_channel: ChannelId,
    ctx: Arc<SessionContext>,
    manager: Weak<SessionManager>,
    me: Weak<LocalSession>,
    state: Mutex<SessionState>,
    /// Held by enqueue jobs for their whole run and by bulk removals.
    enqueue_lock: Mutex<()>,
    jobs: parking_lot::Mutex<Vec<Arc<EnqueueJob>>>,
    /// When playback last stopped, in epoch ms. `0` while playing.
    idle_since: AtomicU64,
}

impl LocalSession {
    pub fn new(
        guild: GuildId,
        voice: VoiceId,
        text_channel: ChannelId,
        ctx: Arc<SessionContext>,
        manager: Weak<SessionManager>,
    ) -> Arc<Self> {
        let volume = ctx.config.default_volume.min(ctx.config.max_volume);
        Arc::new_cyclic(|me| Self {
            guild,
            voice: AtomicU64::new(voice.0),
            text_channel,
            ctx,
            manager,
            me: me.clone(),
            state: Mutex::new(SessionState {
                queue: Queue::new(),
                volume,
                repeat: RepeatMode::None,
                phase: Phase::New,
                position: 0,
                player_message: None,
            }),
            enqueue_lock: Mutex::new(()),
            jobs: parking_lot::Mutex::new(Vec::new()),
            idle_since: AtomicU64::new(now_ms()),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild
    }

    pub fn text_channel_id(&self) -> ChannelId {
        self.text_channel
    }

    pub(crate) fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub(crate) fn enqueue_lock(&self) -> &Mutex<()> {
        &self.enqueue_lock
    }

    pub(crate) fn set_voice(&self, voice: VoiceId) {
        self.voice.store(voice.0, Ordering::Relaxed);
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    pub async fn volume_level(&self) -> u16 {
        self.state.lock().await.volume
    }

    pub async fn repeat_mode(&self) -> RepeatMode {
        self.state.lock().await.repeat
    }

    /// A copy of the queue and its cursor.
    pub async fn queue_snapshot(&self) -> Queue {
        self.state.lock().await.queue.clone()
    }

    pub fn active_jobs(&self) -> Vec<Arc<EnqueueJob>> {
        self.jobs.lock().clone()
    }

    pub(crate) fn remove_job(&self, id: Uuid) {
        self.jobs.lock().retain(|job| job.id() != id);
    }

    fn cancel_jobs(&self) {
        for job in self.jobs.lock().drain(..) {
            job.cancel();
        }
    }

    /// How long nothing has been playing, if that is the case.
    pub fn idle_for(&self) -> Option<Duration> {
        match self.idle_since.load(Ordering::Relaxed) {
            0 => None,
            since => Some(Duration::from_millis(now_ms().saturating_sub(since))),
        }
    }

    fn mark_active(&self) {
        self.idle_since.store(0, Ordering::Relaxed);
    }

    fn mark_idle(&self) {
        let _ = self
            .idle_since
            .compare_exchange(0, now_ms(), Ordering::Relaxed, Ordering::Relaxed);
    }

    async fn notify(&self, message: impl Into<String>) {
        self.send(ChatMessage::text(message)).await;
    }

    async fn send(&self, message: ChatMessage) {
        let ttl = self.ctx.config.message_ttl();
        if let Err(e) = send_transient(&self.ctx.chat, self.text_channel, message, ttl).await {
            warn!("[{}] Failed to send message: {}", self.guild, e);
        }
    }

    fn ensure_connected(state: &SessionState) -> HanabiResult<()> {
        if state.phase == Phase::Disconnected {
            Err(HanabiError::NoSessionExists)
        } else {
            Ok(())
        }
    }

    async fn requester_volume(&self, requester: Option<UserId>) -> u16 {
        let config = &self.ctx.config;
        let preference = match requester {
            Some(user) => match self.ctx.store.volume_preference(user).await {
                Ok(preference) => preference,
                Err(e) => {
                    warn!("[{}] Failed to load volume of {}: {}", self.guild, user, e);
                    None
                }
            },
            None => None,
        };
        preference
            .unwrap_or(config.default_volume)
            .min(config.max_volume)
    }

    fn view<'a>(&'a self, state: &'a SessionState, track: &'a Track) -> PlaybackView<'a> {
        PlaybackView {
            track,
            position: state.position,
            paused: state.phase == Phase::Paused,
            volume: state.volume,
            max_volume: self.ctx.config.max_volume,
            repeat: state.repeat,
            upcoming: state.queue.contents(self.ctx.config.queue_window),
            process: &self.ctx.process,
        }
    }

    // Everything below taking `&mut SessionState` expects the state lock held.

    /// Plays the track under the cursor. With `carry_volume` the volume is
    /// reset to that track's requester's preference.
    async fn start_current(&self, state: &mut SessionState, carry_volume: bool) -> HanabiResult<()> {
        let track = state
            .queue
            .current()
            .cloned()
            .ok_or(HanabiError::NothingPlaying)?;
        if carry_volume {
            state.volume = self.requester_volume(track.requester).await;
        }
        self.finish_player_message(state).await;

        self.ctx
            .engine
            .play(self.guild, &track, track.begin_at, state.volume)
            .await?;
        state.phase = Phase::Playing;
        state.position = track.begin_at;
        self.mark_active();
        Ok(())
    }

    /// Inserts `track` at `index`. If nothing was playing, playback moves to
    /// the new track. Returns where it landed and whether it started.
    async fn enqueue_locked(
        &self,
        state: &mut SessionState,
        track: Track,
        index: usize,
    ) -> HanabiResult<(usize, bool)> {
        let fresh =
            state.queue.is_empty() || matches!(state.phase, Phase::New | Phase::Ended);
        let index = state.queue.insert(track, index);
        if fresh {
            if state.queue.pos() != index {
                state.queue.advance_to(index, true)?;
            }
            self.start_current(state, true).await?;
        }
        Ok((index, fresh))
    }

    /// Moves on after the current track ended, honouring the repeat mode.
    async fn advance_after_end(&self, state: &mut SessionState) -> HanabiResult<()> {
        self.finish_player_message(state).await;
        match state.repeat {
            RepeatMode::One => self.start_current(state, false).await,
            RepeatMode::None => {
                if state.queue.has_next() {
                    state.queue.advance_by(1)?;
                    self.start_current(state, true).await
                } else {
                    state.phase = Phase::Ended;
                    self.mark_idle();
                    Ok(())
                }
            }
            RepeatMode::All => {
                if state.queue.has_next() {
                    state.queue.advance_by(1)?;
                } else if state.queue.len() > 1 {
                    state.queue.advance_to(0, true)?;
                }
                self.start_current(state, true).await
            }
        }
    }

    async fn finish_player_message(&self, state: &mut SessionState) {
        let Some((id, track)) = state.player_message.take() else {
            return;
        };
        let message = self.view(state, &track).render(true);
        if let Err(e) = self.ctx.chat.edit(self.text_channel, id, message).await {
            debug!("[{}] Failed to finalise player message: {}", self.guild, e);
        }
    }

    async fn refresh_player_message(&self, state: &SessionState) {
        let Some((id, track)) = &state.player_message else {
            return;
        };
        let message = self.view(state, track).render(false);
        if let Err(e) = self.ctx.chat.edit(self.text_channel, *id, message).await {
            debug!("[{}] Failed to refresh player message: {}", self.guild, e);
        }
    }

    /// Inserts one track on behalf of an enqueue job.
    pub(crate) async fn splice(
        &self,
        track: Track,
        mode: EnqueueMode,
        placed: usize,
        factor: usize,
    ) -> HanabiResult<()> {
        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        let index = {
            let mut rng = rand::thread_rng();
            placement(
                mode,
                placed,
                state.queue.pos(),
                state.queue.len(),
                factor,
                &mut rng,
            )
        };
        self.enqueue_locked(&mut state, track, index).await.map(|_| ())
    }

    /// Distinct other requesters with upcoming tracks, plus one.
    pub(crate) async fn interlace_factor(&self, requester: UserId) -> usize {
        let state = self.state.lock().await;
        state
            .queue
            .unique_requesters()
            .into_iter()
            .filter(|&user| user != requester)
            .count()
            + 1
    }

    /// Stops playback, leaves voice and waits for the engine to drop the
    /// connection. Deregistration is left to the caller.
    pub(crate) async fn teardown(&self) -> HanabiResult<()> {
        self.cancel_jobs();

        let mut state = self.state.lock().await;
        if state.phase == Phase::Disconnected {
            return Ok(());
        }
        state.phase = Phase::Disconnected;
        state.queue.clear();
        self.mark_idle();
        self.finish_player_message(&mut state).await;
        drop(state);

        let ctx = &self.ctx;
        if let Err(e) = ctx.engine.stop(self.guild).await {
            warn!("[{}] Failed to stop playback: {}", self.guild, e);
        }
        if let Err(e) = ctx.engine.destroy(self.guild).await {
            warn!("[{}] Failed to destroy player: {}", self.guild, e);
        }
        if let Err(e) = ctx.gateway.leave(self.guild).await {
            warn!("[{}] Failed to leave voice: {}", self.guild, e);
        } else if let Err(e) = ctx
            .engine
            .wait_for_disconnection(self.guild, ctx.config.connect_timeout())
            .await
        {
            warn!("[{}] Voice connection lingered: {}", self.guild, e);
        }

        let voice = self.voice();
        info!("[{}] Disconnected from voice channel {}", self.guild, voice);
        self.notify("Disconnected.").await;

        // Fire and forget: the coordinator may be waiting on us while holding
        // its registry lock.
        if let Some(coordinator) = ctx.coordinator.clone() {
            let guild = self.guild;
            tokio::spawn(async move {
                if let Err(e) = coordinator.call(PeerCall::Delete { voice }).await {
                    warn!("[{}] Failed to report teardown to the coordinator: {}", guild, e);
                }
            });
        }
        Ok(())
    }

    /// Handles a press of one of the now-playing message's buttons.
    pub async fn control(&self, control: Control) -> HanabiResult<()> {
        match control {
            Control::Previous => match self.skip(Some(-1), None).await {
                Err(HanabiError::InvalidPosition(_)) => {
                    self.notify("You have reached the beginning of the queue.")
                        .await;
                    Ok(())
                }
                other => other,
            },
            Control::Next => match self.skip(Some(1), None).await {
                Err(HanabiError::InvalidPosition(_)) => {
                    self.notify("You have reached the end of the queue.").await;
                    Ok(())
                }
                other => other,
            },
            Control::TogglePause => self.pause(PauseSetting::Toggle).await,
            Control::Stop => {
                let manager = self.manager.upgrade().ok_or(HanabiError::NoSessionExists)?;
                manager.destroy_session(self.voice()).await
            }
        }
    }

    pub async fn on_track_start(&self, track: &Track) {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Disconnected {
            return;
        }
        let Some(current) = state.queue.current().cloned() else {
            return;
        };
        if current.encoded != track.encoded {
            debug!("[{}] Ignoring start of stale track `{}`", self.guild, track.title());
            return;
        }

        self.finish_player_message(&mut state).await;
        let message = self.view(&state, &current).render(false);
        match self.ctx.chat.send(self.text_channel, message).await {
            Ok(id) => state.player_message = Some((id, current.clone())),
            Err(e) => warn!("[{}] Failed to send player message: {}", self.guild, e),
        }
        drop(state);

        let entry = HistoryEntry {
            requester: current.requester,
            process: self.ctx.process.clone(),
            title: current.info.title.clone(),
            uri: current.info.uri.clone(),
            played_at: now_ms(),
        };
        if let Err(e) = self.ctx.store.record_history(entry).await {
            warn!("[{}] Failed to record history: {}", self.guild, e);
        }
    }

    /// `may_start_next` is false for replaced, stopped and cleaned-up tracks,
    /// which some other path already dealt with.
    pub async fn on_track_end(&self, track: &Track, may_start_next: bool) {
        if !may_start_next {
            return;
        }
        let mut state = self.state.lock().await;
        if state.phase == Phase::Disconnected {
            return;
        }
        if state.queue.current().map(|t| t.encoded.as_str()) != Some(track.encoded.as_str()) {
            debug!("[{}] Ignoring end of stale track `{}`", self.guild, track.title());
            return;
        }
        if let Err(e) = self.advance_after_end(&mut state).await {
            warn!("[{}] Failed to start the next track: {}", self.guild, e);
        }
    }

    pub async fn on_track_exception(&self, track: &Track, exception: &TrackException) {
        let reason = exception.message.as_deref().unwrap_or(&exception.cause);
        warn!(
            "[{}] Track `{}` failed ({}): {}",
            self.guild,
            track.title(),
            exception.severity,
            reason
        );
        self.notify(format!("Failed to play `{}`: {}", track.title(), reason))
            .await;
    }

    /// Position tick. Also enforces clip ends.
    pub async fn on_player_update(&self, update: PlayerState) {
        let mut state = self.state.lock().await;
        if !matches!(state.phase, Phase::Playing | Phase::Paused) {
            return;
        }
        state.position = update.position;

        let clip_reached = state
            .queue
            .current()
            .is_some_and(|t| t.clip_reached(update.position));
        if clip_reached && state.phase == Phase::Playing {
            debug!("[{}] Clip end reached at {}ms", self.guild, update.position);
            if let Err(e) = self.advance_after_end(&mut state).await {
                warn!("[{}] Failed to skip past clip end: {}", self.guild, e);
            }
            if state.phase == Phase::Ended {
                if let Err(e) = self.ctx.engine.stop(self.guild).await {
                    warn!("[{}] Failed to stop at clip end: {}", self.guild, e);
                }
            }
            return;
        }

        self.refresh_player_message(&state).await;
    }
}

#[async_trait]
impl Session for LocalSession {
    fn guild(&self) -> GuildId {
        self.guild
    }

    fn voice(&self) -> VoiceId {
        VoiceId(self.voice.load(Ordering::Relaxed))
    }

    fn text_channel(&self) -> ChannelId {
        self.text_channel
    }

    fn location(&self) -> Location {
        Location::Local
    }

    async fn connect(&self) -> HanabiResult<()> {
        let mut state = self.state.lock().await;
        if state.phase != Phase::New {
            return Ok(());
        }
        let voice = self.voice();
        let ctx = &self.ctx;

        ctx.gateway.join(self.guild, voice).await?;
        let ready = async {
            ctx.engine
                .wait_for_connection(self.guild, ctx.config.connect_timeout())
                .await?;
            ctx.engine
                .set_guild_node(self.guild, &GuildNode::idle(state.volume))
                .await
        };
        if let Err(e) = ready.await {
            if let Err(leave) = ctx.gateway.leave(self.guild).await {
                warn!("[{}] Failed to leave after connect error: {}", self.guild, leave);
            }
            return Err(e);
        }

        state.phase = Phase::Ended;
        self.mark_idle();
        drop(state);

        info!("[{}] Connected to voice channel {}", self.guild, voice);
        self.notify(format!("Connected to <#{}>.", voice)).await;
        Ok(())
    }

    async fn disconnect(&self) -> HanabiResult<()> {
        match self.manager.upgrade() {
            Some(manager) => manager.release_local(self).await,
            None => self.teardown().await,
        }
    }

    async fn play(
        &self,
        requester: UserId,
        query: &str,
        position: Option<usize>,
    ) -> HanabiResult<()> {
        if position == Some(0) {
            return Err(HanabiError::position("Queue positions start at `1`."));
        }
        // Resolving can be slow; only the splice needs the lock.
        let track = self
            .ctx
            .engine
            .load_or_search(query)
            .await?
            .requested_by(requester);
        let title = track.title().to_string();

        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        let index = position.map_or(state.queue.len(), |p| p - 1);
        let (index, started) = self.enqueue_locked(&mut state, track, index).await?;
        drop(state);

        if started {
            self.notify(format!("Playing `{}`.", title)).await;
        } else {
            self.notify(format!("Enqueued `{}` at position `{}`.", title, index + 1))
                .await;
        }
        Ok(())
    }

    async fn pause(&self, setting: PauseSetting) -> HanabiResult<()> {
        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        if state.queue.current().is_none() || !matches!(state.phase, Phase::Playing | Phase::Paused)
        {
            return Err(HanabiError::NothingPlaying);
        }

        let reported = self.ctx.engine.guild_node(self.guild).await?.paused;
        let paused = match setting {
            PauseSetting::Toggle => !reported,
            PauseSetting::Pause => true,
            PauseSetting::Resume => false,
        };

        if paused == reported {
            drop(state);
            self.notify(if paused {
                "Playback is already paused."
            } else {
                "Playback isn't paused."
            })
            .await;
            return Ok(());
        }

        self.ctx.engine.set_pause(self.guild, paused).await?;
        if paused {
            state.phase = Phase::Paused;
            self.mark_idle();
        } else {
            state.phase = Phase::Playing;
            self.mark_active();
        }
        self.refresh_player_message(&state).await;
        drop(state);

        self.notify(if paused {
            "Playback has been paused."
        } else {
            "Playback has been resumed."
        })
        .await;
        Ok(())
    }

    async fn skip(&self, by: Option<i64>, to: Option<usize>) -> HanabiResult<()> {
        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;

        let message = match (by, to) {
            (Some(_), Some(_)) => {
                return Err(HanabiError::position(
                    "Only one of `by` or `to` may be given.",
                ));
            }
            (None, None) => {
                return Err(HanabiError::position(
                    "Either `by` or `to` must be given.",
                ));
            }
            (Some(by), None) => {
                state.queue.advance_by(by)?;
                format!("Advanced the queue by `{}`.", by)
            }
            (None, Some(to)) => {
                state.queue.advance_to(to, false)?;
                format!("Advanced the queue to position `{}`.", to)
            }
        };

        self.start_current(&mut state, true).await?;
        drop(state);

        self.notify(message).await;
        Ok(())
    }

    async fn volume(&self, requester: UserId, setting: VolumeSetting) -> HanabiResult<()> {
        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;

        let volume = setting.resolve(state.volume, self.ctx.config.max_volume)?;
        self.ctx.engine.set_volume(self.guild, volume).await?;
        let verb = match volume.cmp(&state.volume) {
            CmpOrdering::Greater => "increased",
            CmpOrdering::Less => "decreased",
            CmpOrdering::Equal => "set",
        };
        state.volume = volume;
        self.refresh_player_message(&state).await;
        drop(state);

        if let Err(e) = self
            .ctx
            .store
            .set_volume_preference(requester, volume)
            .await
        {
            warn!("[{}] Failed to store volume of {}: {}", self.guild, requester, e);
        }
        self.notify(format!("Volume {} to `{}%`.", verb, volume))
            .await;
        Ok(())
    }

    async fn set_repeat_mode(&self, mode: RepeatMode) -> HanabiResult<()> {
        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        state.repeat = mode;
        self.refresh_player_message(&state).await;
        drop(state);

        self.notify(format!("Repeat mode set to `{}`.", mode)).await;
        Ok(())
    }

    async fn enqueue(&self, request: EnqueueRequest) -> HanabiResult<()> {
        Self::ensure_connected(&*self.state.lock().await)?;

        let playlist = self
            .ctx
            .store
            .playlist(request.owner, &request.name)
            .await?
            .ok_or_else(|| HanabiError::PlaylistNotFound(request.name.clone()))?;
        if playlist.private && request.requester != playlist.owner && !request.bypass_owner {
            return Err(HanabiError::PlaylistPrivate(request.name));
        }

        let session = self.me.upgrade().ok_or(HanabiError::NoSessionExists)?;
        let job = EnqueueJob::new(&request, playlist);
        info!(
            "[{}] Enqueue job {} started for `{}` ({} mode)",
            self.guild,
            job.id(),
            request.name,
            job.mode()
        );
        self.jobs.lock().push(job.clone());
        tokio::spawn(job.clone().run(session.clone()));
        tokio::spawn(job.report(session));
        Ok(())
    }

    async fn dequeue(&self, target: DequeueTarget) -> HanabiResult<()> {
        let _bulk = self.enqueue_lock.lock().await;
        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;

        let removed = match target {
            DequeueTarget::Positions(positions) => {
                if positions.is_empty() {
                    return Err(HanabiError::position("No positions were given."));
                }
                state.queue.remove_many(&positions)?.len()
            }
            DequeueTarget::Requester(user) => state.queue.remove_requester(user).len(),
        };
        self.refresh_player_message(&state).await;
        drop(state);

        self.notify(format!(
            "Removed `{}` track{} from the queue.",
            removed,
            if removed == 1 { "" } else { "s" }
        ))
        .await;
        Ok(())
    }

    async fn stop(&self) -> HanabiResult<()> {
        self.cancel_jobs();

        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        self.finish_player_message(&mut state).await;
        state.queue.clear();
        state.phase = Phase::Ended;
        self.mark_idle();
        self.ctx.engine.stop(self.guild).await?;
        drop(state);

        self.notify("Playback stopped and the queue was cleared.")
            .await;
        Ok(())
    }

    async fn display_queue(&self, amount: Option<usize>) -> HanabiResult<()> {
        let state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        let window = amount.unwrap_or(self.ctx.config.queue_window);
        let mut embed = Embed::new("Current Queue").description(state.queue.contents(window));
        embed.footer = Some(format!(
            "{} track{} · repeat {}",
            state.queue.len(),
            if state.queue.len() == 1 { "" } else { "s" },
            state.repeat
        ));
        drop(state);

        self.send(ChatMessage::embed(embed)).await;
        Ok(())
    }

    async fn display_playback(&self) -> HanabiResult<()> {
        let state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        if !matches!(state.phase, Phase::Playing | Phase::Paused) {
            return Err(HanabiError::NothingPlaying);
        }
        let track = state
            .queue
            .current()
            .ok_or(HanabiError::NothingPlaying)?;
        let message = self.view(&state, track).render(false);
        drop(state);

        self.send(message).await;
        Ok(())
    }
}
