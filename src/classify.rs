//! Message classifier: one raw transport line in, one typed event out.
//!
//! DESIGN
//! ======
//! Stateless and pure apart from the arrival timestamp, which is injected by
//! [`classify_at`] so tests stay deterministic. Recognition runs in a fixed
//! priority order:
//!
//! 1. `CLEARMSG` → single-message deletion
//! 2. `CLEARCHAT` with a target user → timeout / ban
//! 3. session control: `PING`, `001`, `RECONNECT`, `:relay <TOKEN>` sentinels
//! 4. `USERSTATE` / `GLOBALUSERSTATE` → badge sync
//! 5. `PRIVMSG` → chat message
//!
//! Anything else is `Ignored`.
//!
//! ERROR HANDLING
//! ==============
//! A `PRIVMSG` without an `id` tag is not rejected. It is returned as
//! [`ClassifiedEvent::Unidentified`] with a synthesized `anon:` id and flows
//! into the buffer without deduplication.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::message::{
    BadgeSync, ChatMessage, DeletionEvent, Message, SessionSignal, UserClearEvent, anon_id, now_ms,
};
use crate::wire::{self, IrcLine};

/// Prefix used by relays for their session-control sentinels.
pub const RELAY_PREFIX: &str = "relay";

const ACTION_OPEN: &str = "\u{1}ACTION ";
const ACTION_CLOSE: char = '\u{1}';

/// Outcome of classifying one line.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClassifiedEvent {
    Message(Message),
    /// Chat line that arrived without an identifier.
    Unidentified(ChatMessage),
    /// Server keep-alive; the token must be echoed back in a `PONG`.
    Ping(String),
    /// Server asked the client to drop and re-open the transport.
    ServerReconnect,
    BadgeSync(BadgeSync),
    Ignored,
}

/// Classify a line using the current wall clock as arrival time.
#[must_use]
pub fn classify(raw: &str) -> ClassifiedEvent {
    classify_at(raw, now_ms())
}

/// Classify a line; `arrival_ms` stands in for a missing `tmi-sent-ts`.
#[must_use]
pub fn classify_at(raw: &str, arrival_ms: i64) -> ClassifiedEvent {
    let Some(line) = wire::parse_line(raw) else {
        debug!(raw, "classify: unparseable line");
        return ClassifiedEvent::Ignored;
    };

    match line.command {
        "CLEARMSG" => classify_deletion(&line),
        "CLEARCHAT" => classify_user_clear(&line),
        "PING" => ClassifiedEvent::Ping(line.trailing.or(line.params.first().copied()).unwrap_or_default().to_owned()),
        "001" => ClassifiedEvent::Message(Message::Session(SessionSignal::Connected)),
        "RECONNECT" => ClassifiedEvent::ServerReconnect,
        _ if line.prefix == Some(RELAY_PREFIX) => classify_relay(&line),
        "USERSTATE" | "GLOBALUSERSTATE" => ClassifiedEvent::BadgeSync(badge_sync(&line)),
        "PRIVMSG" => classify_chat(&line, arrival_ms),
        other => {
            debug!(command = other, "classify: ignored command");
            ClassifiedEvent::Ignored
        }
    }
}

fn classify_deletion(line: &IrcLine<'_>) -> ClassifiedEvent {
    match line.tag_nonempty("target-msg-id") {
        Some(target) => ClassifiedEvent::Message(Message::Deletion(DeletionEvent {
            target_message_id: target.to_owned(),
        })),
        None => ClassifiedEvent::Ignored,
    }
}

fn classify_user_clear(line: &IrcLine<'_>) -> ClassifiedEvent {
    let Some(target_user_id) = line.tag_nonempty("target-user-id") else {
        debug!("classify: channel-wide CLEARCHAT ignored");
        return ClassifiedEvent::Ignored;
    };
    // Presence of the tag, not its value, decides timeout versus ban.
    let ban_duration = line
        .tag("ban-duration")
        .map(|raw| Duration::from_secs(raw.trim().parse::<u64>().unwrap_or(0)));
    ClassifiedEvent::Message(Message::UserClear(UserClearEvent {
        target_user_id: target_user_id.to_owned(),
        ban_duration,
    }))
}

fn classify_relay(line: &IrcLine<'_>) -> ClassifiedEvent {
    let attempt = || {
        line.params
            .first()
            .and_then(|raw| raw.parse::<u32>().ok())
            .unwrap_or(0)
    };
    let signal = match line.command {
        "CONNECTED" => SessionSignal::Connected,
        "RECONNECTING" => SessionSignal::Reconnecting(attempt()),
        "RECONNECT_FAILED" => SessionSignal::ReconnectFailed(attempt()),
        "RECONNECT_EXHAUSTED" => SessionSignal::ReconnectExhausted,
        "HEARTBEAT" => SessionSignal::Heartbeat,
        "WARNING" => SessionSignal::Warning(line.trailing.unwrap_or_default().to_owned()),
        other => {
            debug!(token = other, "classify: unknown relay token");
            return ClassifiedEvent::Ignored;
        }
    };
    ClassifiedEvent::Message(Message::Session(signal))
}

fn badge_sync(line: &IrcLine<'_>) -> BadgeSync {
    BadgeSync {
        user_id: line.tag_nonempty("user-id").map(str::to_owned),
        display_name: line.tag_nonempty("display-name").map(str::to_owned),
        color: line.tag_nonempty("color").map(str::to_owned),
        badges: line.tag("badges").map(wire::parse_badges).unwrap_or_default(),
    }
}

fn classify_chat(line: &IrcLine<'_>, arrival_ms: i64) -> ClassifiedEvent {
    let (body, is_action) = split_action(line.trailing.unwrap_or_default());
    let sender_login = line.nick().unwrap_or_default().to_lowercase();
    let sender_name = line
        .tag_nonempty("display-name")
        .map_or_else(|| sender_login.clone(), str::to_owned);
    let sender_id = line
        .tag_nonempty("user-id")
        .map_or_else(|| sender_login.clone(), str::to_owned);
    let send_time = line
        .tag_nonempty("tmi-sent-ts")
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(arrival_ms);

    let mut message = ChatMessage {
        id: String::new(),
        sender_id,
        sender_login,
        sender_name,
        display_color: line.tag_nonempty("color").map(str::to_owned),
        badge_refs: line.tag("badges").map(wire::parse_badges).unwrap_or_default(),
        body: body.to_owned(),
        send_time,
        reply_parent_id: line.tag_nonempty("reply-parent-msg-id").map(str::to_owned),
        is_local_echo: false,
        is_action,
        historical: line.tag("historical") == Some("1"),
    };

    match line.tag_nonempty("id") {
        Some(id) => {
            message.id = id.to_owned();
            ClassifiedEvent::Message(Message::Chat(message))
        }
        None => {
            message.id = anon_id();
            ClassifiedEvent::Unidentified(message)
        }
    }
}

/// Strip CTCP `ACTION` framing from a body.
fn split_action(body: &str) -> (&str, bool) {
    match body.strip_prefix(ACTION_OPEN) {
        Some(inner) => (inner.strip_suffix(ACTION_CLOSE).unwrap_or(inner), true),
        None => (body, false),
    }
}

#[cfg(test)]
#[path = "classify_test.rs"]
mod tests;
