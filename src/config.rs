//! Runtime tuning, read from the environment with typed defaults.
//!
//! Every knob has a default; a missing or malformed variable falls back to it,
//! so building a config never fails.

use std::time::Duration;

use tracing::warn;

use crate::connection::{HealthPolicy, ReconnectPolicy};
use crate::viewport::ViewportConfig;

const DEFAULT_LIVE_LIMIT: usize = 100;
const DEFAULT_BUFFER_SLACK: usize = 150;

const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_INITIAL_RETRY_BASE_MS: u64 = 1_000;
const DEFAULT_INITIAL_RETRY_STEP_MS: u64 = 1_000;
const DEFAULT_INITIAL_RETRY_CAP_MS: u64 = 10_000;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;

const DEFAULT_DEGRADED_AFTER_SECS: u64 = 120;
const DEFAULT_PROBE_AFTER_SECS: u64 = 300;
const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 10;

const DEFAULT_PAUSE_DISTANCE: f64 = 100.0;
const DEFAULT_RESUME_DISTANCE: f64 = 30.0;
const DEFAULT_RESUME_GRACE_MS: u64 = 500;

const DEFAULT_ECHO_TTL_SECS: u64 = 30;
const DEFAULT_SEND_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub live_limit: usize,
    /// Extra room while paused; paused capacity is `live_limit + buffer_slack`.
    pub buffer_slack: usize,
    pub reconnect: ReconnectPolicy,
    pub health: HealthPolicy,
    pub viewport: ViewportConfig,
    /// How long a local echo waits for its server copy.
    pub echo_ttl: Duration,
    pub send_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            live_limit: DEFAULT_LIVE_LIMIT,
            buffer_slack: DEFAULT_BUFFER_SLACK,
            reconnect: ReconnectPolicy::default(),
            health: HealthPolicy::default(),
            viewport: ViewportConfig::default(),
            echo_ttl: Duration::from_secs(DEFAULT_ECHO_TTL_SECS),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
        }
    }
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        let ms = |key: &str, default: u64| Duration::from_millis(env_parse(key, default));
        let secs = |key: &str, default: u64| Duration::from_secs(env_parse(key, default));

        Self {
            live_limit: env_parse("CHATSTREAM_LIVE_LIMIT", DEFAULT_LIVE_LIMIT).max(1),
            buffer_slack: env_parse("CHATSTREAM_BUFFER_SLACK", DEFAULT_BUFFER_SLACK),
            reconnect: ReconnectPolicy {
                max_attempts: env_parse("CHATSTREAM_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS).max(1),
                connect_timeout: ms("CHATSTREAM_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS),
                initial_base: ms("CHATSTREAM_INITIAL_RETRY_BASE_MS", DEFAULT_INITIAL_RETRY_BASE_MS),
                initial_step: ms("CHATSTREAM_INITIAL_RETRY_STEP_MS", DEFAULT_INITIAL_RETRY_STEP_MS),
                initial_cap: ms("CHATSTREAM_INITIAL_RETRY_CAP_MS", DEFAULT_INITIAL_RETRY_CAP_MS),
                backoff_base: ms("CHATSTREAM_BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
                backoff_cap: ms("CHATSTREAM_BACKOFF_CAP_MS", DEFAULT_BACKOFF_CAP_MS),
            },
            health: HealthPolicy {
                degraded_after: secs("CHATSTREAM_DEGRADED_AFTER_SECS", DEFAULT_DEGRADED_AFTER_SECS),
                probe_after: secs("CHATSTREAM_PROBE_AFTER_SECS", DEFAULT_PROBE_AFTER_SECS),
                check_interval: secs("CHATSTREAM_HEALTH_INTERVAL_SECS", DEFAULT_HEALTH_INTERVAL_SECS),
            },
            viewport: ViewportConfig {
                pause_distance: env_parse("CHATSTREAM_PAUSE_DISTANCE", DEFAULT_PAUSE_DISTANCE),
                resume_distance: env_parse("CHATSTREAM_RESUME_DISTANCE", DEFAULT_RESUME_DISTANCE),
                resume_grace: ms("CHATSTREAM_RESUME_GRACE_MS", DEFAULT_RESUME_GRACE_MS),
            },
            echo_ttl: secs("CHATSTREAM_ECHO_TTL_SECS", DEFAULT_ECHO_TTL_SECS),
            send_timeout: ms("CHATSTREAM_SEND_TIMEOUT_MS", DEFAULT_SEND_TIMEOUT_MS),
        }
    }

    /// Buffer capacity while paused.
    #[must_use]
    pub fn paused_capacity(&self) -> usize {
        self.live_limit.saturating_add(self.buffer_slack)
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!(key, value = %raw, "config: malformed value; using default");
            default
        }),
        Err(_) => default,
    }
}
