//! Chat core: the single state-transition function over every input.
//!
//! DESIGN
//! ======
//! `ChatCore` owns all per-channel state: connection manager, history buffer,
//! deduplicator, height cache, echo reconciler, pause controller and timers.
//! Inputs arrive as [`CoreEvent`]s and are processed strictly in delivery
//! order by [`ChatCore::handle`], which returns the I/O the caller must
//! perform as [`Effect`]s. Nothing here is async and nothing reads the clock
//! except through the `now` argument, so every scenario is a plain unit test.
//!
//! Data flow for one transport line:
//!
//! ```text
//! raw -> classify -> control signal -> ConnectionManager
//!                 -> chat -> Deduplicator -> EchoReconciler? -> HistoryBuffer
//!                 -> deletion / user clear -> mark buffered entries
//! ```
//!
//! The consumer reads [`ChatCore::view`]: the live buffer, or the frozen
//! snapshot while paused.
//!
//! ERROR HANDLING
//! ==============
//! Collaborator failures (history, probe) are logged and absorbed. Send
//! failures roll back the local echo. Only an exhausted or dead session shows
//! up as `error` in the view.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::{ClassifiedEvent, classify_at};
use crate::config::Config;
use crate::connection::{ConnAction, ConnectionManager, ConnectionState, SourceStatus, normalize_channel};
use crate::dedup::Deduplicator;
use crate::echo::EchoReconciler;
use crate::error::SendError;
use crate::heights::HeightCache;
use crate::history::{BufferMode, Entry, HistoryBuffer};
use crate::message::{ChatMessage, Message, SelfProfile, now_ms};
use crate::timer::{TimerKind, Timers};
use crate::viewport::{PauseController, PauseTransition};
use crate::wire;

// =============================================================================
// EVENTS & EFFECTS
// =============================================================================

/// Everything that can happen to the core.
#[derive(Clone, Debug, PartialEq)]
pub enum CoreEvent {
    Connect { channel: String },
    Disconnect,
    TransportOpened,
    TransportClosed { abnormal: bool, reason: String },
    ConnectFailed { reason: String },
    /// One transport frame; may carry several lines.
    Payload { raw: String },
    HistoryLoaded { channel: String, result: Result<Vec<String>, String> },
    ProbeCompleted { channel: String, result: Result<SourceStatus, String> },
    SendFailed { local_id: String, reason: String },
    Scroll { distance_from_tail: f64, programmatic: bool },
    SetPaused(bool),
    Resume,
    ReportHeight { id: String, index: usize, extent: f64 },
    /// Wake-up for due timers and echo expiry.
    Tick,
}

/// I/O requested by the core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    OpenTransport { channel: String, attempt: u32, timeout: std::time::Duration },
    CloseTransport,
    FetchHistory { channel: String },
    ProbeSource { channel: String },
    Transmit { line: String },
    ScrollToTail,
    SourceEnded { channel: String },
}

/// A local send accepted by the core: the echo is already buffered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outgoing {
    pub local_id: String,
    pub line: String,
}

/// Published state for the consumer.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ChatView {
    pub channel: Option<String>,
    pub connection: ConnectionState,
    /// Live buffer, or the frozen snapshot while paused.
    pub messages: Vec<Entry>,
    pub heights: HashMap<String, f64>,
    pub error: Option<String>,
    pub warning: Option<String>,
    pub paused: bool,
    pub pending_new: usize,
    /// Bumped each time the consumer should jump to the tail.
    pub scroll_requests: u64,
}

// =============================================================================
// CORE
// =============================================================================

#[derive(Debug)]
pub struct ChatCore {
    conn: ConnectionManager,
    buffer: HistoryBuffer,
    dedup: Deduplicator,
    heights: HeightCache,
    echoes: EchoReconciler,
    pause: PauseController,
    timers: Timers,
    profile: SelfProfile,
    scroll_requests: u64,
    config: Config,
}

impl ChatCore {
    #[must_use]
    pub fn new(config: Config, profile: SelfProfile, now: Instant) -> Self {
        Self {
            conn: ConnectionManager::new(config.reconnect, config.health, now),
            buffer: HistoryBuffer::new(config.live_limit, config.buffer_slack),
            dedup: Deduplicator::new(config.paused_capacity().saturating_add(config.buffer_slack)),
            heights: HeightCache::new(),
            echoes: EchoReconciler::new(config.echo_ttl),
            pause: PauseController::new(config.viewport),
            timers: Timers::new(),
            profile,
            scroll_requests: 0,
            config,
        }
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.conn
    }

    #[must_use]
    pub fn profile(&self) -> &SelfProfile {
        &self.profile
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Length of the live buffer (not the frozen snapshot).
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.buffer.len()
    }

    /// When the caller should next deliver [`CoreEvent::Tick`].
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn handle(&mut self, event: CoreEvent, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            CoreEvent::Connect { channel } => {
                let actions = self.conn.connect(&channel, now);
                if !actions.is_empty() {
                    self.reset_channel_state();
                }
                self.apply(actions, now, &mut effects);
            }
            CoreEvent::Disconnect => {
                let actions = self.conn.disconnect();
                self.apply(actions, now, &mut effects);
            }
            CoreEvent::TransportOpened => {
                let actions = self.conn.on_opened(now);
                self.apply(actions, now, &mut effects);
            }
            CoreEvent::TransportClosed { abnormal, reason } => {
                let actions = self.conn.on_closed(abnormal, &reason);
                self.apply(actions, now, &mut effects);
            }
            CoreEvent::ConnectFailed { reason } => {
                let actions = self.conn.on_connect_failed(&reason);
                self.apply(actions, now, &mut effects);
            }
            CoreEvent::Payload { raw } => self.on_payload(&raw, now, &mut effects),
            CoreEvent::HistoryLoaded { channel, result } => self.on_history(&channel, result, now),
            CoreEvent::ProbeCompleted { channel, result } => {
                if self.is_current(&channel) {
                    let actions = self.conn.on_probe(result, now);
                    self.apply(actions, now, &mut effects);
                } else {
                    debug!(%channel, "core: probe result for stale channel");
                }
            }
            CoreEvent::SendFailed { local_id, reason } => self.rollback_send(&local_id, &reason),
            CoreEvent::Scroll { distance_from_tail, programmatic } => {
                match self.pause.on_scroll(distance_from_tail, programmatic) {
                    Some(PauseTransition::Pause) => self.pause_view(),
                    Some(PauseTransition::Resume) => self.resume_view(now, &mut effects),
                    None => {}
                }
            }
            CoreEvent::SetPaused(true) => self.pause_view(),
            CoreEvent::SetPaused(false) | CoreEvent::Resume => self.resume_view(now, &mut effects),
            CoreEvent::ReportHeight { id, index, extent } => {
                if !self.pause.absorb_height(&id, index, extent) && self.heights.record(&id, extent) {
                    self.heights.prune(self.buffer.ids(), self.buffer.len());
                }
            }
            CoreEvent::Tick => self.on_tick(now, &mut effects),
        }
        effects
    }

    /// Accept a local send: validate, buffer the echo, return the wire line.
    pub fn send(&mut self, body: &str, reply_parent: Option<String>, now: Instant) -> Result<Outgoing, SendError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(SendError::EmptyBody);
        }
        if !self.conn.can_send() {
            return Err(SendError::NotConnected);
        }
        let Some(channel) = self.conn.channel().map(str::to_owned) else {
            return Err(SendError::NotConnected);
        };

        let echo = self.echoes.send_local(body, &self.profile, reply_parent.clone(), now, now_ms());
        let local_id = echo.id.clone();
        let line = wire::format_privmsg(&channel, body, reply_parent.as_deref());
        debug!(%channel, %local_id, "core: local echo buffered");
        self.append(echo);
        Ok(Outgoing { local_id, line })
    }

    #[must_use]
    pub fn view(&self) -> ChatView {
        let (messages, heights) = match self.pause.snapshot() {
            Some(snapshot) => (snapshot.entries.clone(), snapshot.heights.clone()),
            None => (self.buffer.snapshot(), self.heights.snapshot()),
        };
        ChatView {
            channel: self.conn.channel().map(str::to_owned),
            connection: self.conn.state().clone(),
            messages,
            heights,
            error: self.conn.last_error().map(str::to_owned),
            warning: self.conn.warning().map(str::to_owned),
            paused: self.pause.is_paused(),
            pending_new: self.pause.pending_new(self.buffer.len()),
            scroll_requests: self.scroll_requests,
        }
    }

    // -------------------------------------------------------------------------
    // CONNECTION PLUMBING
    // -------------------------------------------------------------------------

    fn apply(&mut self, actions: Vec<ConnAction>, now: Instant, effects: &mut Vec<Effect>) {
        for action in actions {
            match action {
                ConnAction::Open { channel, attempt, timeout } => {
                    effects.push(Effect::OpenTransport { channel, attempt, timeout });
                }
                ConnAction::Close => effects.push(Effect::CloseTransport),
                ConnAction::FetchHistory { channel } => effects.push(Effect::FetchHistory { channel }),
                ConnAction::Probe { channel } => effects.push(Effect::ProbeSource { channel }),
                ConnAction::Schedule { kind, after } => self.schedule(kind, now, after),
                ConnAction::CancelTimers => {
                    self.timers.cancel_all();
                    self.pause.end_grace();
                }
                ConnAction::SourceEnded { channel } => effects.push(Effect::SourceEnded { channel }),
            }
        }
    }

    fn schedule(&mut self, kind: TimerKind, now: Instant, after: Duration) {
        if !self.timers.schedule_in(kind, now, after, self.conn.epoch()) {
            debug!(?kind, after_secs = after.as_secs(), "core: delay out of range; timer disabled");
        }
    }

    fn is_current(&self, channel: &str) -> bool {
        !self.conn.is_intentional() && self.conn.channel() == Some(normalize_channel(channel).as_str())
    }

    /// Fresh per-channel state for a new session.
    fn reset_channel_state(&mut self) {
        self.buffer.clear();
        self.dedup.clear();
        self.heights.clear();
        self.echoes.clear();
        self.pause.reset();
    }

    fn on_tick(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        for kind in self.timers.fire_due(now, self.conn.epoch()) {
            match kind {
                TimerKind::Reconnect => {
                    let actions = self.conn.on_reconnect_due(now);
                    self.apply(actions, now, effects);
                }
                TimerKind::HealthCheck => {
                    let actions = self.conn.on_health_check(now);
                    self.apply(actions, now, effects);
                }
                TimerKind::ResumeGrace => self.pause.end_grace(),
            }
        }
        let expired = self.echoes.expire(now);
        if expired > 0 {
            debug!(expired, "core: pending echoes expired");
        }
    }

    // -------------------------------------------------------------------------
    // INGESTION
    // -------------------------------------------------------------------------

    fn on_payload(&mut self, raw: &str, now: Instant, effects: &mut Vec<Effect>) {
        if self.conn.is_intentional() || self.conn.channel().is_none() {
            debug!("core: payload after disconnect dropped");
            return;
        }
        self.conn.on_signal(now);

        for line in wire::split_lines(raw) {
            match classify_at(line, now_ms()) {
                ClassifiedEvent::Message(Message::Chat(message)) => self.admit_live(message, now),
                ClassifiedEvent::Unidentified(message) => {
                    warn!(sender = %message.sender_login, "core: identifier-less message admitted without dedup");
                    self.append(message);
                }
                ClassifiedEvent::Message(Message::Session(signal)) => {
                    let actions = self.conn.on_session_signal(&signal, now);
                    self.apply(actions, now, effects);
                }
                ClassifiedEvent::Message(moderation) => self.apply_moderation(moderation),
                ClassifiedEvent::Ping(token) => {
                    effects.push(Effect::Transmit { line: format!("PONG :{token}") });
                }
                ClassifiedEvent::ServerReconnect => {
                    let actions = self.conn.on_server_reconnect(now);
                    self.apply(actions, now, effects);
                }
                ClassifiedEvent::BadgeSync(sync) => {
                    debug!(user_id = ?sync.user_id, "core: own badges synced");
                    self.profile.apply(sync);
                }
                ClassifiedEvent::Ignored => {}
            }
        }
    }

    fn admit_live(&mut self, message: ChatMessage, now: Instant) {
        if !self.dedup.admit(&message.id) {
            debug!(id = %message.id, "core: duplicate dropped");
            return;
        }
        if !message.historical && self.profile.is_self(&message) {
            if let Some(local_id) = self.echoes.take_match(&message, now) {
                if self.buffer.position(&local_id).is_some() {
                    let server_id = message.id.clone();
                    self.buffer.replace_at(|entry| entry.id() == local_id, message);
                    self.heights.rename(&local_id, &server_id);
                    debug!(%local_id, %server_id, "core: local echo reconciled");
                    return;
                }
                debug!(%local_id, "core: matched echo already evicted; appending");
            }
        }
        self.append(message);
    }

    fn apply_moderation(&mut self, event: Message) {
        match event {
            Message::Deletion(deletion) => {
                if !self.buffer.mark_deleted(&deletion.target_message_id) {
                    debug!(target = %deletion.target_message_id, "core: deletion target not buffered");
                }
            }
            Message::UserClear(clear) => {
                let marked = self.buffer.apply_user_clear(&clear.target_user_id, clear.moderation());
                info!(user_id = %clear.target_user_id, marked, moderation = ?clear.moderation(), "core: user cleared");
            }
            Message::Chat(_) | Message::Session(_) => {}
        }
    }

    fn on_history(&mut self, channel: &str, result: Result<Vec<String>, String>, now: Instant) {
        if !self.is_current(channel) {
            debug!(%channel, "core: history for stale channel dropped");
            return;
        }
        let payloads = match result {
            Ok(payloads) => payloads,
            Err(reason) => {
                warn!(%channel, %reason, "core: history fetch failed; continuing without it");
                return;
            }
        };

        // Moderation in the replay only reaches lines staged before it; live
        // entries already buffered are newer than anything replayed.
        let mut batch: Vec<Entry> = Vec::new();
        for raw in &payloads {
            for line in wire::split_lines(raw) {
                match classify_at(line, now_ms()) {
                    ClassifiedEvent::Message(Message::Chat(mut message)) => {
                        if self.dedup.admit(&message.id) {
                            message.historical = true;
                            batch.push(Entry::new(message));
                        }
                    }
                    ClassifiedEvent::Unidentified(mut message) => {
                        warn!(sender = %message.sender_login, "core: identifier-less history line admitted without dedup");
                        message.historical = true;
                        batch.push(Entry::new(message));
                    }
                    ClassifiedEvent::Message(Message::Deletion(deletion)) => {
                        let target = deletion.target_message_id.as_str();
                        match batch.iter_mut().find(|entry| entry.id() == target) {
                            Some(entry) => entry.deleted = true,
                            None => {
                                if !self.buffer.mark_deleted(target) {
                                    debug!(%target, "core: replayed deletion target not buffered");
                                }
                            }
                        }
                    }
                    ClassifiedEvent::Message(Message::UserClear(clear)) => {
                        let moderation = clear.moderation();
                        for entry in batch.iter_mut().filter(|entry| entry.message.sender_id == clear.target_user_id) {
                            entry.moderation = Some(moderation);
                        }
                    }
                    _ => {}
                }
            }
        }

        let replayed = batch.len();
        info!(%channel, replayed, "core: history loaded");
        let evicted = self.buffer.prepend_batch(batch);
        self.pause.note_replayed(replayed);
        self.forget_evicted(&evicted);
        self.maintain();
        self.echoes.expire(now);
    }

    fn append(&mut self, message: ChatMessage) {
        let evicted = self.buffer.append(message);
        self.forget_evicted(&evicted);
        self.maintain();
    }

    fn forget_evicted(&mut self, evicted: &[Entry]) {
        for entry in evicted.iter().filter(|entry| entry.message.is_local_echo) {
            self.echoes.discard(entry.id());
        }
    }

    /// Bound the dedup set and height cache against what the buffer holds.
    fn maintain(&mut self) {
        if self.dedup.needs_prune() {
            let dropped = self.dedup.prune(self.buffer.ids());
            debug!(dropped, "core: dedup set pruned");
        }
        self.heights.prune(self.buffer.ids(), self.buffer.len());
    }

    fn rollback_send(&mut self, local_id: &str, reason: &str) {
        self.echoes.discard(local_id);
        let removed = self.buffer.remove(local_id).is_some();
        self.heights.remove(local_id);
        warn!(%local_id, %reason, removed, "core: send failed; local echo rolled back");
    }

    // -------------------------------------------------------------------------
    // PAUSE
    // -------------------------------------------------------------------------

    fn pause_view(&mut self) {
        if self.pause.pause(self.buffer.snapshot(), self.heights.snapshot()) {
            self.buffer.set_mode(BufferMode::Paused);
            info!(frozen = self.buffer.len(), "core: view paused");
        }
    }

    fn resume_view(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        let Some(corrections) = self.pause.resume() else {
            return;
        };
        self.buffer.set_mode(BufferMode::Live);
        let evicted = self.buffer.trim();
        self.forget_evicted(&evicted);
        self.heights.extend(corrections);
        self.heights.prune(self.buffer.ids(), self.buffer.len());
        self.schedule(TimerKind::ResumeGrace, now, self.pause.resume_grace());
        info!(trimmed = evicted.len(), "core: view resumed");
        self.scroll_requests += 1;
        effects.push(Effect::ScrollToTail);
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
