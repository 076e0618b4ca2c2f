//! Connection manager: transport session lifecycle as a pure state machine.
//!
//! DESIGN
//! ======
//! The manager never performs I/O. Every method takes the current instant,
//! mutates state, and returns [`ConnAction`]s for the caller to execute
//! (open/close the transport, fetch history, probe the source, schedule a
//! timer). This keeps every transition testable without a socket.
//!
//! LIFECYCLE
//! =========
//! ```text
//! Disconnected --connect--> Connecting --opened--> Live
//! Connecting --open failed--> Connecting (linear delay, first connect)
//! Live --abnormal close--> Connecting (exponential backoff)
//! Live --silence > degraded_after--> Degraded
//! Degraded --silence > probe_after--> probe source
//!     active / probe error --> Connecting (transport only)
//!     ended                --> Disconnected + SourceEnded
//! any --N consecutive failures--> Dead (manual reconnect required)
//! ```
//!
//! An explicit disconnect sets the intentional flag and bumps the session
//! epoch; every handler checks the flag first and every timer is stamped
//! with the epoch, so nothing scheduled earlier can resurrect the session.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::message::SessionSignal;
use crate::timer::TimerKind;

// =============================================================================
// POLICY
// =============================================================================

/// Retry timing for transport opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
    /// Bound on a single open attempt.
    pub connect_timeout: Duration,
    /// First-connect retry delay: `initial_base + attempt * initial_step`, capped.
    pub initial_base: Duration,
    pub initial_step: Duration,
    pub initial_cap: Duration,
    /// Post-live retry delay: `backoff_base * 2^attempt`, capped.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            connect_timeout: Duration::from_secs(10),
            initial_base: Duration::from_secs(1),
            initial_step: Duration::from_secs(1),
            initial_cap: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based) of a first connect.
    #[must_use]
    pub fn initial_delay(&self, attempt: u32) -> Duration {
        self.initial_base
            .saturating_add(self.initial_step.saturating_mul(attempt))
            .min(self.initial_cap)
    }

    /// Delay before retry number `attempt` (0-based) after the session was live.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

/// Silence thresholds for the health check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthPolicy {
    pub degraded_after: Duration,
    pub probe_after: Duration,
    pub check_interval: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            degraded_after: Duration::from_secs(120),
            probe_after: Duration::from_secs(300),
            check_interval: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Live,
    Degraded(String),
    Dead,
}

/// Answer from the liveness probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Ended,
}

/// Side effect requested by the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnAction {
    Open { channel: String, attempt: u32, timeout: Duration },
    Close,
    FetchHistory { channel: String },
    Probe { channel: String },
    Schedule { kind: TimerKind, after: Duration },
    CancelTimers,
    SourceEnded { channel: String },
}

// =============================================================================
// MANAGER
// =============================================================================

#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    channel: Option<String>,
    /// Consecutive failed opens/abnormal closures since the last live session.
    attempt: u32,
    intentional: bool,
    reached_live: bool,
    probe_in_flight: bool,
    last_signal: Instant,
    epoch: u64,
    last_error: Option<String>,
    warning: Option<String>,
    reconnect: ReconnectPolicy,
    health: HealthPolicy,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(reconnect: ReconnectPolicy, health: HealthPolicy, now: Instant) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            channel: None,
            attempt: 0,
            intentional: false,
            reached_live: false,
            probe_in_flight: false,
            last_signal: now,
            epoch: 0,
            last_error: None,
            warning: None,
            reconnect,
            health,
        }
    }

    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Session identity used to stamp timers.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn is_intentional(&self) -> bool {
        self.intentional
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Current non-blocking warning: the degraded reason, else the last relay warning.
    #[must_use]
    pub fn warning(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Degraded(reason) => Some(reason),
            _ => self.warning.as_deref(),
        }
    }

    /// Whether outbound traffic can be written right now.
    #[must_use]
    pub fn can_send(&self) -> bool {
        !self.intentional && matches!(self.state, ConnectionState::Live | ConnectionState::Degraded(_))
    }

    fn active_channel(&self) -> Option<String> {
        if self.intentional {
            return None;
        }
        self.channel.clone()
    }

    fn open(&self, channel: String) -> ConnAction {
        ConnAction::Open { channel, attempt: self.attempt, timeout: self.reconnect.connect_timeout }
    }

    // -------------------------------------------------------------------------
    // CONTROL SURFACE
    // -------------------------------------------------------------------------

    /// Start (or restart) a session for `channel`.
    ///
    /// A request for the channel that is already connecting or live is a no-op.
    pub fn connect(&mut self, channel: &str, now: Instant) -> Vec<ConnAction> {
        let channel = normalize_channel(channel);
        let active = matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Live | ConnectionState::Degraded(_)
        );
        if active && !self.intentional && self.channel.as_deref() == Some(channel.as_str()) {
            debug!(%channel, "connection: already active");
            return Vec::new();
        }

        self.epoch += 1;
        self.channel = Some(channel.clone());
        self.intentional = false;
        self.attempt = 0;
        self.reached_live = false;
        self.probe_in_flight = false;
        self.last_signal = now;
        self.last_error = None;
        self.warning = None;
        self.state = ConnectionState::Connecting;
        info!(%channel, epoch = self.epoch, "connection: connecting");

        let mut actions = vec![ConnAction::CancelTimers];
        if active {
            actions.push(ConnAction::Close);
        }
        actions.push(self.open(channel.clone()));
        actions.push(ConnAction::FetchHistory { channel });
        actions.push(ConnAction::Schedule {
            kind: TimerKind::HealthCheck,
            after: self.health.check_interval,
        });
        actions
    }

    /// Stop the session and suppress every pending reconnect.
    pub fn disconnect(&mut self) -> Vec<ConnAction> {
        self.intentional = true;
        self.epoch += 1;
        self.attempt = 0;
        self.probe_in_flight = false;
        self.warning = None;
        if let Some(channel) = self.channel.take() {
            info!(%channel, "connection: disconnected by request");
        }
        self.state = ConnectionState::Disconnected;
        vec![ConnAction::CancelTimers, ConnAction::Close]
    }

    // -------------------------------------------------------------------------
    // TRANSPORT OUTCOMES
    // -------------------------------------------------------------------------

    pub fn on_opened(&mut self, now: Instant) -> Vec<ConnAction> {
        let Some(channel) = self.active_channel() else {
            debug!("connection: transport opened after disconnect; closing");
            return vec![ConnAction::Close];
        };
        if self.state != ConnectionState::Connecting {
            debug!(%channel, state = ?self.state, "connection: unexpected open");
            return vec![ConnAction::Close];
        }
        self.state = ConnectionState::Live;
        self.attempt = 0;
        self.reached_live = true;
        self.last_signal = now;
        self.last_error = None;
        info!(%channel, "connection: live");
        Vec::new()
    }

    /// An open attempt failed or timed out.
    pub fn on_connect_failed(&mut self, reason: &str) -> Vec<ConnAction> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.retry(reason)
    }

    pub fn on_closed(&mut self, abnormal: bool, reason: &str) -> Vec<ConnAction> {
        let Some(channel) = self.active_channel() else {
            return Vec::new();
        };
        if matches!(self.state, ConnectionState::Disconnected | ConnectionState::Dead) {
            return Vec::new();
        }
        if !abnormal {
            info!(%channel, %reason, "connection: closed normally by server");
            self.state = ConnectionState::Disconnected;
            self.warning = Some(format!("connection closed: {reason}"));
            return vec![ConnAction::CancelTimers];
        }
        self.retry(reason)
    }

    fn retry(&mut self, reason: &str) -> Vec<ConnAction> {
        let Some(channel) = self.active_channel() else {
            return Vec::new();
        };
        self.attempt += 1;
        if self.attempt >= self.reconnect.max_attempts {
            error!(%channel, attempts = self.attempt, %reason, "connection: reconnect attempts exhausted");
            self.state = ConnectionState::Dead;
            self.last_error = Some(format!(
                "connection lost after {} attempts ({reason}); reconnect manually",
                self.attempt
            ));
            return vec![ConnAction::CancelTimers, ConnAction::Close];
        }

        let delay = if self.reached_live {
            self.reconnect.backoff_delay(self.attempt - 1)
        } else {
            self.reconnect.initial_delay(self.attempt - 1)
        };
        warn!(%channel, attempt = self.attempt, delay_ms = delay.as_millis(), %reason, "connection: retry scheduled");
        self.state = ConnectionState::Connecting;
        vec![
            ConnAction::Close,
            ConnAction::Schedule { kind: TimerKind::Reconnect, after: delay },
        ]
    }

    /// Reconnect timer fired.
    pub fn on_reconnect_due(&mut self, now: Instant) -> Vec<ConnAction> {
        let Some(channel) = self.active_channel() else {
            return Vec::new();
        };
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.last_signal = now;
        debug!(%channel, attempt = self.attempt, "connection: reopening transport");
        vec![self.open(channel)]
    }

    // -------------------------------------------------------------------------
    // IN-BAND SIGNALS
    // -------------------------------------------------------------------------

    /// Any inbound traffic proves the pipe is alive.
    pub fn on_signal(&mut self, now: Instant) {
        self.last_signal = now;
        if let ConnectionState::Degraded(reason) = &self.state {
            info!(%reason, "connection: recovered");
            self.state = ConnectionState::Live;
        }
    }

    pub fn on_session_signal(&mut self, signal: &SessionSignal, now: Instant) -> Vec<ConnAction> {
        if self.active_channel().is_none() {
            return Vec::new();
        }
        match signal {
            SessionSignal::Connected | SessionSignal::Heartbeat => self.on_signal(now),
            SessionSignal::Warning(text) => {
                warn!(%text, "connection: upstream warning");
                self.warning = Some(text.clone());
                self.on_signal(now);
            }
            SessionSignal::Reconnecting(attempt) => {
                self.last_signal = now;
                self.degrade(format!("upstream reconnecting (attempt {attempt})"));
            }
            SessionSignal::ReconnectFailed(attempt) => {
                self.last_signal = now;
                self.degrade(format!("upstream reconnect attempt {attempt} failed"));
            }
            SessionSignal::ReconnectExhausted => {
                error!("connection: upstream gave up reconnecting");
                self.state = ConnectionState::Dead;
                self.last_error = Some("upstream reconnect attempts exhausted; reconnect manually".to_owned());
                return vec![ConnAction::CancelTimers, ConnAction::Close];
            }
        }
        Vec::new()
    }

    fn degrade(&mut self, reason: String) {
        if matches!(self.state, ConnectionState::Live | ConnectionState::Degraded(_)) {
            warn!(%reason, "connection: degraded");
            self.state = ConnectionState::Degraded(reason);
        }
    }

    /// Server asked us to reconnect: cycle the transport without counting a failure.
    pub fn on_server_reconnect(&mut self, now: Instant) -> Vec<ConnAction> {
        let Some(channel) = self.active_channel() else {
            return Vec::new();
        };
        if !matches!(self.state, ConnectionState::Live | ConnectionState::Degraded(_)) {
            return Vec::new();
        }
        info!(%channel, "connection: server requested reconnect");
        self.state = ConnectionState::Connecting;
        self.attempt = 0;
        self.last_signal = now;
        vec![ConnAction::Close, self.open(channel)]
    }

    // -------------------------------------------------------------------------
    // HEALTH
    // -------------------------------------------------------------------------

    /// Periodic silence check. Reschedules itself while the session is active.
    pub fn on_health_check(&mut self, now: Instant) -> Vec<ConnAction> {
        let Some(channel) = self.active_channel() else {
            return Vec::new();
        };
        if matches!(self.state, ConnectionState::Disconnected | ConnectionState::Dead) {
            return Vec::new();
        }

        let mut actions = vec![ConnAction::Schedule {
            kind: TimerKind::HealthCheck,
            after: self.health.check_interval,
        }];
        let silence = now.saturating_duration_since(self.last_signal);
        match self.state {
            ConnectionState::Live if silence >= self.health.degraded_after => {
                self.degrade(format!("no activity for {}s", silence.as_secs()));
            }
            ConnectionState::Degraded(_) if silence >= self.health.probe_after && !self.probe_in_flight => {
                warn!(%channel, silence_secs = silence.as_secs(), "connection: probing source liveness");
                self.probe_in_flight = true;
                actions.push(ConnAction::Probe { channel });
            }
            _ => {}
        }
        actions
    }

    /// Liveness probe finished. A failed probe is treated as "still active".
    pub fn on_probe(&mut self, result: Result<SourceStatus, String>, now: Instant) -> Vec<ConnAction> {
        self.probe_in_flight = false;
        let Some(channel) = self.active_channel() else {
            return Vec::new();
        };
        if !matches!(self.state, ConnectionState::Degraded(_)) {
            debug!(%channel, "connection: probe result no longer relevant");
            return Vec::new();
        }

        match result {
            Ok(SourceStatus::Ended) => {
                info!(%channel, "connection: source ended; tearing down session");
                self.intentional = true;
                self.epoch += 1;
                self.state = ConnectionState::Disconnected;
                self.last_error = Some(format!("{channel} has ended"));
                vec![
                    ConnAction::CancelTimers,
                    ConnAction::Close,
                    ConnAction::SourceEnded { channel },
                ]
            }
            Ok(SourceStatus::Active) | Err(_) => {
                if let Err(reason) = &result {
                    warn!(%channel, %reason, "connection: probe failed; reconnecting transport");
                } else {
                    info!(%channel, "connection: source still active; reconnecting transport");
                }
                self.state = ConnectionState::Connecting;
                self.attempt = 0;
                self.last_signal = now;
                vec![ConnAction::Close, self.open(channel)]
            }
        }
    }
}

/// Lowercase a channel name and drop a leading `#`.
#[must_use]
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
