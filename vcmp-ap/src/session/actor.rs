//! Session task
//!
//! Every input (commands, timer fires, player and connection notifications,
//! probe results) arrives as a [`SessionMsg`] and is applied by
//! [`SessionActor::handle`], one at a time. Crossfade scheduling is the
//! [`Crossfade`] state: Idle, Probing (durations being measured), Armed
//! (start timer pending) and Active (both players live).
//!
//! Notifications carry the id of the player or connection generation they
//! came from, and timers carry a token. Anything that no longer matches the
//! current state is dropped, so every transition is safe to trigger twice.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vcmp_common::events::TrackInfo;

use super::queue::{TrackQueue, TrackRequest};
use super::timers::{TaskGuard, Timer, TimerKind};
use super::{Command, EngineContext, SessionStatus};
use crate::announce;
use crate::crossfade::{should_arm, spawn_volume_ramp, CrossfadePlan, CrossfadeSettings};
use crate::error::{Error, Result};
use crate::transcode::FadeSpec;
use crate::transport::{AudioPlayer, ConnectionEvent, PlayerEvent, VoiceConnection};

/// Input to a session task
pub(crate) enum SessionMsg {
    Command(Command),
    Player {
        player_id: u64,
        event: PlayerEvent,
    },
    Connection {
        generation: u64,
        event: ConnectionEvent,
    },
    Timer {
        token: u64,
        kind: TimerKind,
    },
    /// Probe result; `None` when the pair may not crossfade at all
    PlanReady {
        token: u64,
        outcome: Option<ProbeOutcome>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Everything measured for one candidate transition
#[derive(Debug)]
pub(crate) struct ProbeOutcome {
    plan: CrossfadePlan,
    /// Settings the plan was computed with; used unchanged until completion
    settings: CrossfadeSettings,
    peak: Option<f32>,
}

/// A player attached to the session, with its notification forwarder
struct PlayerSlot {
    id: u64,
    player: Arc<dyn AudioPlayer>,
    forwarder: JoinHandle<()>,
}

/// A track with its player
struct Playing {
    track: TrackRequest,
    slot: PlayerSlot,
    paused: bool,
}

struct Connection {
    generation: u64,
    handle: Arc<dyn VoiceConnection>,
    forwarder: JoinHandle<()>,
}

/// Crossfade scheduler state
enum Crossfade {
    Idle,
    Probing {
        token: u64,
        current_entry: Uuid,
        next_entry: Uuid,
        _task: TaskGuard,
    },
    Armed {
        plan: CrossfadePlan,
        settings: CrossfadeSettings,
        next_entry: Uuid,
        peak: Option<f32>,
        timer: Timer,
    },
    Active {
        plan: CrossfadePlan,
        incoming: Playing,
        _ramp: Option<TaskGuard>,
        timer: Timer,
    },
}

impl Crossfade {
    fn name(&self) -> &'static str {
        match self {
            Crossfade::Idle => "idle",
            Crossfade::Probing { .. } => "probing",
            Crossfade::Armed { .. } => "armed",
            Crossfade::Active { .. } => "active",
        }
    }

    fn plan(&self) -> Option<&CrossfadePlan> {
        match self {
            Crossfade::Armed { plan, .. } | Crossfade::Active { plan, .. } => Some(plan),
            _ => None,
        }
    }
}

/// Something to do after a track stops playing, before advancing
#[derive(Debug)]
enum CompletionStep {
    /// Remove a transient track's file after the grace delay
    RemoveTransient(PathBuf),
    /// Put a fresh copy of the track back at the queue head
    Requeue(TrackRequest),
}

/// Why a track stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Finished,
    Skipped,
    Failed,
    CrossfadedOut,
}

/// Ordered steps to run after `track` stops, before advancing
fn completion_steps(track: &TrackRequest, reason: EndReason, looping: bool) -> Vec<CompletionStep> {
    // Only a natural end repeats; skips and failures move on
    if looping && reason == EndReason::Finished {
        return vec![CompletionStep::Requeue(track.requeued())];
    }
    let mut steps = Vec::new();
    if track.transient {
        steps.push(CompletionStep::RemoveTransient(track.source.clone()));
    }
    steps
}

pub(crate) struct SessionActor {
    id: String,
    ctx: EngineContext,
    inbox: mpsc::UnboundedSender<SessionMsg>,
    queue: TrackQueue,
    current: Option<Playing>,
    crossfade: Crossfade,
    looping: bool,
    connection: Option<Connection>,
    idle_timer: Option<Timer>,
    next_id: u64,
}

impl SessionActor {
    pub(crate) fn new(id: String, ctx: EngineContext, inbox: mpsc::UnboundedSender<SessionMsg>) -> Self {
        Self {
            id,
            ctx,
            inbox,
            queue: TrackQueue::new(),
            current: None,
            crossfade: Crossfade::Idle,
            looping: false,
            connection: None,
            idle_timer: None,
            next_id: 0,
        }
    }

    pub(crate) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<SessionMsg>) {
        while let Some(msg) = inbox.recv().await {
            if !self.handle(msg).await {
                break;
            }
        }
        debug!("Session {} task finished", self.id);
    }

    /// Apply one input; returns false once the session has shut down
    async fn handle(&mut self, msg: SessionMsg) -> bool {
        match msg {
            SessionMsg::Command(command) => self.handle_command(command).await,
            SessionMsg::Player { player_id, event } => self.on_player_event(player_id, event).await,
            SessionMsg::Connection { generation, event } => {
                self.on_connection_event(generation, event)
            }
            SessionMsg::Timer { token, kind } => self.on_timer(token, kind).await,
            SessionMsg::PlanReady { token, outcome } => self.on_plan_ready(token, outcome),
            SessionMsg::Shutdown { reply } => {
                self.reset(true);
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue { track, reply } => {
                let result = self.enqueue(track).await;
                let _ = reply.send(result);
            }
            Command::Skip { reply } => {
                let skipped = self.skip().await;
                let _ = reply.send(skipped);
            }
            Command::Reset {
                destroy_connection,
                reply,
            } => {
                self.reset(destroy_connection);
                let _ = reply.send(());
            }
            Command::Pause { reply } => {
                let paused = self.pause();
                let _ = reply.send(paused);
            }
            Command::Resume { reply } => {
                let resumed = self.resume();
                let _ = reply.send(resumed);
            }
            Command::SetLooping { looping, reply } => {
                let looping = looping.unwrap_or(!self.looping);
                self.set_looping(looping);
                let _ = reply.send(looping);
            }
            Command::Shuffle { reply } => {
                self.queue.shuffle();
                self.rearm();
                let _ = reply.send(self.queue.len());
            }
            Command::Clear { reply } => {
                let removed = self.queue.clear();
                info!("Session {}: cleared {} queued track(s)", self.id, removed);
                self.rearm();
                let _ = reply.send(removed);
            }
            Command::Remove { index, reply } => {
                let removed = self.queue.remove(index);
                if removed.is_some() {
                    self.rearm();
                }
                let _ = reply.send(removed.map(|t| t.info()));
            }
            Command::Queue { reply } => {
                let _ = reply.send(self.queue.snapshot().iter().map(TrackRequest::info).collect());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    // Commands

    async fn enqueue(&mut self, track: TrackRequest) -> Result<usize> {
        if self.idle_timer.take().is_some() {
            debug!("Session {}: idle teardown cancelled by enqueue", self.id);
        }

        info!("Session {}: enqueued {} ({})", self.id, track.name, track.source.display());
        let entry_id = track.entry_id;
        self.queue.enqueue(track);

        if self.current.is_none() {
            self.play_next().await?;
            let started = self
                .current
                .as_ref()
                .is_some_and(|c| c.track.entry_id == entry_id);
            return Ok(if started { 0 } else { self.queue.len() });
        }

        if matches!(self.crossfade, Crossfade::Idle) {
            self.try_arm();
        }
        Ok(self.queue.len())
    }

    async fn skip(&mut self) -> Option<TrackInfo> {
        let current = self.current.take()?;
        info!("Session {}: skipping {}", self.id, current.track.name);

        // Whatever was pending or fading in goes with it
        if let Crossfade::Active { incoming, .. } = std::mem::replace(&mut self.crossfade, Crossfade::Idle) {
            info!(
                "Session {}: discarding incoming {} mid-transition",
                self.id, incoming.track.name
            );
            self.finish_track(incoming, EndReason::Skipped);
        }

        let skipped = current.track.info();
        self.finish_track(current, EndReason::Skipped);
        if let Err(e) = self.play_next().await {
            debug!("Session {}: advance after skip failed: {}", self.id, e);
        }
        Some(skipped)
    }

    /// Stop players, clear queue and timers; the session stays reusable
    fn reset(&mut self, destroy_connection: bool) {
        let had_work = self.current.is_some() || !self.queue.is_empty();

        self.idle_timer = None;
        if let Crossfade::Active { incoming, .. } = std::mem::replace(&mut self.crossfade, Crossfade::Idle) {
            self.finish_track(incoming, EndReason::Skipped);
        }
        if let Some(current) = self.current.take() {
            self.finish_track(current, EndReason::Skipped);
        }
        for track in self.queue.snapshot() {
            if track.transient {
                self.ctx.janitor.schedule_removal(track.source);
            }
        }
        self.queue.clear();
        self.looping = false;

        if destroy_connection {
            if let Some(connection) = self.connection.take() {
                // Forwarder first, so our own Destroyed never comes back as a failure
                connection.forwarder.abort();
                connection.handle.destroy();
                info!("Session {}: connection released", self.id);
            }
        }

        if had_work {
            info!("Session {}: reset (destroy_connection={})", self.id, destroy_connection);
        }
    }

    fn pause(&mut self) -> bool {
        if matches!(self.crossfade, Crossfade::Active { .. }) {
            // Leave a single player to pause
            self.complete_crossfade();
        }
        self.disarm();

        let Some(current) = self.current.as_mut() else {
            return false;
        };
        if current.paused || !current.slot.player.pause() {
            return false;
        }
        current.paused = true;
        info!("Session {}: paused {}", self.id, current.track.name);
        true
    }

    fn resume(&mut self) -> bool {
        let Some(current) = self.current.as_mut() else {
            return false;
        };
        if !current.paused || !current.slot.player.unpause() {
            return false;
        }
        current.paused = false;
        info!("Session {}: resumed {}", self.id, current.track.name);
        self.try_arm();
        true
    }

    fn set_looping(&mut self, looping: bool) {
        if self.looping == looping {
            return;
        }
        self.looping = looping;
        info!("Session {}: looping {}", self.id, if looping { "on" } else { "off" });
        if looping {
            self.disarm();
        } else {
            self.try_arm();
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            is_playing: self.current.as_ref().is_some_and(|c| !c.paused),
            is_paused: self.current.as_ref().is_some_and(|c| c.paused),
            is_crossfading: matches!(self.crossfade, Crossfade::Active { .. }),
            is_looping: self.looping,
            queue_length: self.queue.len(),
            current_track: self.current.as_ref().map(|c| c.track.info()),
            crossfade_plan: self.crossfade.plan().cloned(),
            connected: self.connection.is_some(),
        }
    }

    // Playback controller

    /// Dequeue and start tracks until one plays or the queue is empty
    ///
    /// Pipeline failures skip to the next track. A transport failure resets
    /// the session and is returned.
    async fn play_next(&mut self) -> Result<()> {
        loop {
            let Some(track) = self.queue.dequeue_head() else {
                self.on_queue_exhausted();
                return Ok(());
            };
            let name = track.name.clone();
            let transient_source = track.transient.then(|| track.source.clone());

            match self.start_track(track).await {
                Ok(()) => {
                    self.announce_current(None);
                    self.try_arm();
                    return Ok(());
                }
                Err(e) => {
                    warn!("Session {}: cannot play {}: {}", self.id, name, e);
                    self.report(&e);
                    if let Some(path) = transient_source {
                        self.ctx.janitor.schedule_removal(path);
                    }
                    if matches!(e, Error::Transport(_)) {
                        self.reset(true);
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Attach a plain (or filtered) decode of `track` to a fresh player
    async fn start_track(&mut self, track: TrackRequest) -> Result<()> {
        let connection = self.ensure_connection().await?;
        let stream = self
            .ctx
            .transcoder
            .decode(&track.source, track.filter, track.speed)
            .await?;

        let slot = self.create_player();
        if let Err(e) = connection
            .subscribe(slot.player.clone())
            .and_then(|_| slot.player.play(stream))
        {
            self.retire_slot(slot);
            return Err(e);
        }

        match track.filter {
            Some(filter) => info!("Session {}: playing {} [{}]", self.id, track.name, filter),
            None => info!("Session {}: playing {}", self.id, track.name),
        }
        self.current = Some(Playing {
            track,
            slot,
            paused: false,
        });
        Ok(())
    }

    async fn ensure_connection(&mut self) -> Result<Arc<dyn VoiceConnection>> {
        if let Some(connection) = &self.connection {
            return Ok(connection.handle.clone());
        }

        let joined = self.ctx.transport.join(&self.id).await.map_err(|e| match e {
            Error::Transport(msg) => Error::Transport(msg),
            other => Error::Transport(other.to_string()),
        })?;

        let generation = self.next_id();
        let inbox = self.inbox.clone();
        let mut events = joined.events;
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if inbox.send(SessionMsg::Connection { generation, event }).is_err() {
                    break;
                }
            }
        });

        info!("Session {}: connected (generation {})", self.id, generation);
        let handle = joined.connection;
        self.connection = Some(Connection {
            generation,
            handle: handle.clone(),
            forwarder,
        });
        Ok(handle)
    }

    fn create_player(&mut self) -> PlayerSlot {
        let created = self.ctx.transport.create_player();
        let player_id = self.next_id();
        let inbox = self.inbox.clone();
        let mut events = created.events;
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if inbox.send(SessionMsg::Player { player_id, event }).is_err() {
                    break;
                }
            }
        });
        PlayerSlot {
            id: player_id,
            player: created.player,
            forwarder,
        }
    }

    /// Silence a player and stop listening to it
    fn retire_slot(&self, slot: PlayerSlot) {
        slot.forwarder.abort();
        slot.player.stop();
        if let Some(connection) = &self.connection {
            connection.handle.unsubscribe(&slot.player);
        }
    }

    /// Retire a track's player and run its completion steps
    fn finish_track(&mut self, playing: Playing, reason: EndReason) {
        let Playing { track, slot, .. } = playing;
        self.retire_slot(slot);

        for step in completion_steps(&track, reason, self.looping) {
            debug!("Session {}: completion step {:?}", self.id, step);
            match step {
                CompletionStep::RemoveTransient(path) => {
                    self.ctx.janitor.schedule_removal(path);
                }
                CompletionStep::Requeue(track) => self.queue.push_front(track),
            }
        }
    }

    async fn on_player_event(&mut self, player_id: u64, event: PlayerEvent) {
        let is_current = self.current.as_ref().is_some_and(|c| c.slot.id == player_id);
        let is_incoming = matches!(
            &self.crossfade,
            Crossfade::Active { incoming, .. } if incoming.slot.id == player_id
        );
        if !is_current && !is_incoming {
            debug!("Session {}: ignoring {:?} from retired player {}", self.id, event, player_id);
            return;
        }

        let reason = match event {
            PlayerEvent::Idle => EndReason::Finished,
            PlayerEvent::Error(message) => {
                let e = Error::Pipeline(message);
                warn!("Session {}: {}", self.id, e);
                self.report(&e);
                EndReason::Failed
            }
        };

        if is_incoming && reason == EndReason::Failed {
            self.abort_crossfade().await;
            return;
        }

        if matches!(self.crossfade, Crossfade::Active { .. }) {
            self.complete_crossfade();
            if is_current {
                // Outgoing ran out early; the transition is simply done
                return;
            }
            // Incoming ended before the transition did; it is current now
        }

        self.disarm();
        if let Some(current) = self.current.take() {
            debug!("Session {}: {} ended ({:?})", self.id, current.track.name, reason);
            self.finish_track(current, reason);
        }
        if let Err(e) = self.play_next().await {
            debug!("Session {}: advance failed: {}", self.id, e);
        }
    }

    fn on_queue_exhausted(&mut self) {
        self.current = None;
        self.crossfade = Crossfade::Idle;
        info!("Session {}: queue finished", self.id);
        self.ctx.announcer.announce(announce::queue_finished(&self.id));

        if self.connection.is_some() {
            debug!(
                "Session {}: releasing connection in {:?} unless more arrives",
                self.id, self.ctx.idle_timeout
            );
            let token = self.next_id();
            self.idle_timer = Some(Timer::start(
                token,
                self.ctx.idle_timeout,
                TimerKind::IdleTeardown,
                self.inbox.clone(),
            ));
        }
    }

    fn on_connection_event(&mut self, generation: u64, event: ConnectionEvent) {
        if self.connection.as_ref().map(|c| c.generation) != Some(generation) {
            debug!("Session {}: ignoring {:?} from old connection", self.id, event);
            return;
        }

        let message = match event {
            ConnectionEvent::Disconnected(reason) => reason,
            ConnectionEvent::Destroyed => "connection destroyed externally".to_string(),
        };
        let e = Error::Transport(message);
        warn!("Session {}: {}", self.id, e);
        self.report(&e);

        // Already gone; drop it without destroying again
        if let Some(connection) = self.connection.take() {
            connection.forwarder.abort();
        }
        self.reset(false);
    }

    async fn on_timer(&mut self, token: u64, kind: TimerKind) {
        match kind {
            TimerKind::IdleTeardown => {
                if self.idle_timer.as_ref().map(Timer::token) != Some(token) {
                    return;
                }
                self.idle_timer = None;
                if self.current.is_some() || !self.queue.is_empty() {
                    return;
                }
                if let Some(connection) = self.connection.take() {
                    connection.forwarder.abort();
                    connection.handle.destroy();
                    info!("Session {}: idle timeout, connection released", self.id);
                    self.ctx.announcer.announce(announce::idle_disconnected(
                        &self.id,
                        self.ctx.idle_timeout.as_secs(),
                    ));
                }
            }
            TimerKind::CrossfadeStart => {
                if matches!(&self.crossfade, Crossfade::Armed { timer, .. } if timer.token() == token) {
                    self.begin_crossfade().await;
                }
            }
            TimerKind::CrossfadeComplete => {
                if matches!(&self.crossfade, Crossfade::Active { timer, .. } if timer.token() == token) {
                    self.complete_crossfade();
                }
            }
        }
    }

    fn announce_current(&self, crossfade_secs: Option<u32>) {
        if let Some(current) = &self.current {
            self.ctx.announcer.announce(announce::track_changed(
                &self.id,
                current.track.info(),
                self.queue.len(),
                self.looping,
                matches!(self.crossfade, Crossfade::Active { .. }),
                crossfade_secs,
            ));
        }
    }

    fn report(&self, error: &Error) {
        if let Some(kind) = error.kind() {
            self.ctx
                .announcer
                .announce(announce::error(&self.id, kind, error.to_string()));
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // Crossfade scheduler

    /// Idle -> Probing when there is an unpaused current track and a next one
    ///
    /// The probe task snapshots the settings, applies the arming gate and
    /// measures both durations; its answer comes back as `PlanReady`.
    fn try_arm(&mut self) {
        if !matches!(self.crossfade, Crossfade::Idle) {
            return;
        }
        let (current, next) = match (&self.current, self.queue.peek()) {
            (Some(current), Some(next)) if !current.paused => (current.track.clone(), next.clone()),
            _ => return,
        };
        if self.looping || current.filter.is_some() || next.filter.is_some() {
            return;
        }

        debug!(
            "Session {}: probing {} -> {} for crossfade",
            self.id, current.name, next.name
        );
        let token = self.next_id();
        let current_entry = current.entry_id;
        let next_entry = next.entry_id;
        let shared = self.ctx.settings.clone();
        let transcoder = self.ctx.transcoder.clone();
        let fallback = self.ctx.avg_track_length.as_secs_f64();
        let looping = self.looping;
        let inbox = self.inbox.clone();

        let task = tokio::spawn(async move {
            // Settings are fixed for this transition from here on
            let settings = shared.snapshot().await;
            let outcome = if should_arm(&settings, &current, Some(&next), looping) {
                let (current_duration, next_duration) = tokio::join!(
                    transcoder.duration_or(&current.source, fallback),
                    transcoder.duration_or(&next.source, fallback)
                );
                let plan = CrossfadePlan::compute(current_duration, next_duration, &settings);
                let peak = if plan.eligible && settings.dj_mode() && settings.auto_gain {
                    match transcoder.estimate_peak(&next.source).await {
                        Ok(peak) => Some(peak),
                        Err(e) => {
                            debug!("Peak estimate for {} failed: {}", next.name, e);
                            None
                        }
                    }
                } else {
                    None
                };
                Some(ProbeOutcome {
                    plan,
                    settings,
                    peak,
                })
            } else {
                None
            };
            let _ = inbox.send(SessionMsg::PlanReady { token, outcome });
        });

        self.crossfade = Crossfade::Probing {
            token,
            current_entry,
            next_entry,
            _task: TaskGuard(task),
        };
    }

    /// Probing -> Armed, or back to Idle if the pair is ineligible
    fn on_plan_ready(&mut self, token: u64, outcome: Option<ProbeOutcome>) {
        let (current_entry, next_entry) = match &self.crossfade {
            Crossfade::Probing {
                token: expected,
                current_entry,
                next_entry,
                ..
            } if *expected == token => (*current_entry, *next_entry),
            _ => return,
        };
        self.crossfade = Crossfade::Idle;

        let pair_unchanged = self.current.as_ref().map(|c| c.track.entry_id) == Some(current_entry)
            && self.queue.peek().map(|t| t.entry_id) == Some(next_entry);
        if !pair_unchanged {
            self.try_arm();
            return;
        }

        let Some(ProbeOutcome {
            plan,
            settings,
            peak,
        }) = outcome
        else {
            debug!("Session {}: crossfade disabled for this pair", self.id);
            return;
        };

        if !plan.eligible {
            info!(
                "Session {}: no crossfade ({:.1}s -> {:.1}s, minimum {}s); playing sequentially",
                self.id, plan.current_duration, plan.next_duration, settings.min_track_length_secs
            );
            return;
        }

        let elapsed = self
            .current
            .as_ref()
            .map(|c| c.slot.player.position())
            .unwrap_or_default();
        let delay = plan.start_offset().saturating_sub(elapsed);
        info!(
            "Session {}: {}s crossfade armed, starts in {:?}",
            self.id, plan.optimal_crossfade_secs, delay
        );
        let timer_token = self.next_id();
        self.crossfade = Crossfade::Armed {
            plan,
            settings,
            next_entry,
            peak,
            timer: Timer::start(timer_token, delay, TimerKind::CrossfadeStart, self.inbox.clone()),
        };
    }

    /// Armed -> Active
    async fn begin_crossfade(&mut self) {
        let Crossfade::Armed {
            plan,
            settings,
            next_entry,
            peak,
            ..
        } = std::mem::replace(&mut self.crossfade, Crossfade::Idle)
        else {
            return;
        };

        if self.queue.peek().map(|t| t.entry_id) != Some(next_entry) {
            debug!("Session {}: next track changed since arming; replanning", self.id);
            self.try_arm();
            return;
        }
        let (outgoing_player, outgoing_source, outgoing_name) = match &self.current {
            Some(c) => (c.slot.player.clone(), c.track.source.clone(), c.track.name.clone()),
            None => return,
        };
        let Some(connection) = self.connection.as_ref().map(|c| c.handle.clone()) else {
            return;
        };
        let Some(next) = self.queue.dequeue_head() else {
            return;
        };

        let fade_secs = f64::from(plan.optimal_crossfade_secs);
        let intro = FadeSpec::intro(&settings, fade_secs, peak);
        let stream = match self.ctx.transcoder.decode_faded(&next.source, &intro).await {
            Ok(stream) => stream,
            Err(e) => {
                // Outgoing keeps playing; the failed track is dropped
                warn!("Session {}: cannot fade in {}: {}", self.id, next.name, e);
                self.report(&e);
                if next.transient {
                    self.ctx.janitor.schedule_removal(next.source);
                }
                self.try_arm();
                return;
            }
        };

        let slot = self.create_player();
        if let Err(e) = connection
            .subscribe(slot.player.clone())
            .and_then(|_| slot.player.play(stream))
        {
            warn!("Session {}: cannot start {}: {}", self.id, next.name, e);
            self.report(&e);
            self.retire_slot(slot);
            if next.transient {
                self.ctx.janitor.schedule_removal(next.source);
            }
            if matches!(e, Error::Transport(_)) {
                self.reset(true);
            } else {
                self.try_arm();
            }
            return;
        }

        let duration = plan.crossfade_duration();
        let ramp = if outgoing_player.supports_volume() {
            Some(TaskGuard(spawn_volume_ramp(
                outgoing_player,
                duration,
                settings.curve.outro_shape(),
            )))
        } else {
            // Re-decode from the current position with the fade baked in
            let seek = outgoing_player.position().as_secs_f64();
            let outro = FadeSpec::outro(&settings, fade_secs, seek);
            match self.ctx.transcoder.decode_faded(&outgoing_source, &outro).await {
                Ok(stream) => {
                    if let Err(e) = outgoing_player.play(stream) {
                        warn!("Session {}: fade-out swap failed: {}", self.id, e);
                    }
                }
                Err(e) => warn!("Session {}: fade-out decode failed: {}", self.id, e),
            }
            None
        };

        info!(
            "Session {}: crossfading {} -> {} over {}s",
            self.id, outgoing_name, next.name, plan.optimal_crossfade_secs
        );
        let token = self.next_id();
        self.crossfade = Crossfade::Active {
            plan,
            incoming: Playing {
                track: next,
                slot,
                paused: false,
            },
            _ramp: ramp,
            timer: Timer::start(token, duration, TimerKind::CrossfadeComplete, self.inbox.clone()),
        };
    }

    /// Active -> Idle: drop the outgoing player and promote the incoming one
    fn complete_crossfade(&mut self) {
        let Crossfade::Active { plan, incoming, .. } =
            std::mem::replace(&mut self.crossfade, Crossfade::Idle)
        else {
            return;
        };

        if let Some(outgoing) = self.current.take() {
            debug!("Session {}: {} faded out", self.id, outgoing.track.name);
            self.finish_track(outgoing, EndReason::CrossfadedOut);
        }

        info!("Session {}: crossfade complete, now playing {}", self.id, incoming.track.name);
        self.current = Some(incoming);
        self.announce_current(Some(plan.optimal_crossfade_secs));
        self.try_arm();
    }

    /// Active -> Idle after the incoming player failed
    ///
    /// The incoming track is never promoted. The outgoing one is already
    /// fading, so it ends here too and the queue moves on.
    async fn abort_crossfade(&mut self) {
        let Crossfade::Active { incoming, .. } =
            std::mem::replace(&mut self.crossfade, Crossfade::Idle)
        else {
            return;
        };

        warn!(
            "Session {}: {} failed mid-transition; aborting crossfade",
            self.id, incoming.track.name
        );
        self.finish_track(incoming, EndReason::Failed);
        if let Some(outgoing) = self.current.take() {
            self.finish_track(outgoing, EndReason::CrossfadedOut);
        }
        if let Err(e) = self.play_next().await {
            debug!("Session {}: advance after aborted crossfade failed: {}", self.id, e);
        }
    }

    /// Back to Idle from Probing or Armed
    fn disarm(&mut self) {
        if matches!(self.crossfade, Crossfade::Probing { .. } | Crossfade::Armed { .. }) {
            debug!("Session {}: crossfade {} -> idle", self.id, self.crossfade.name());
            self.crossfade = Crossfade::Idle;
        }
    }

    /// Re-plan after the queue head may have changed
    fn rearm(&mut self) {
        self.disarm();
        self.try_arm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(name: &str) -> TrackRequest {
        TrackRequest::new(name, format!("/tmp/{}.ogg", name), "tester")
    }

    #[test]
    fn test_finished_track_only_cleans_transient() {
        assert!(completion_steps(&track("a"), EndReason::Finished, false).is_empty());

        let steps = completion_steps(&track("b").transient(true), EndReason::Finished, false);
        assert!(matches!(
            steps.as_slice(),
            [CompletionStep::RemoveTransient(path)] if path.ends_with("b.ogg")
        ));
    }

    #[test]
    fn test_looped_track_is_requeued_not_removed() {
        let original = track("a").transient(true);

        let steps = completion_steps(&original, EndReason::Finished, true);
        match steps.as_slice() {
            [CompletionStep::Requeue(copy)] => {
                assert_eq!(copy.name, "a");
                assert!(copy.transient);
                assert_ne!(copy.entry_id, original.entry_id);
            }
            other => panic!("unexpected steps {:?}", other),
        }
    }

    #[test]
    fn test_skip_and_failure_never_requeue() {
        for reason in [EndReason::Skipped, EndReason::Failed, EndReason::CrossfadedOut] {
            let steps = completion_steps(&track("a").transient(true), reason, true);
            assert!(
                matches!(steps.as_slice(), [CompletionStep::RemoveTransient(_)]),
                "{:?} produced {:?}",
                reason,
                steps
            );
        }
    }
}
