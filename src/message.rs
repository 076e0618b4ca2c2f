//! Chat data model shared by every stage of the ingestion pipeline.
//!
//! DESIGN
//! ======
//! Identifiers are plain strings in three namespaces:
//! - server ids: opaque, globally unique once admitted
//! - `local:<uuid>`: provisional local echoes awaiting the server copy
//! - `anon:<uuid>`: messages the upstream delivered without an id
//!
//! Only server ids take part in deduplication.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace prefix for provisional local-echo identifiers.
pub const LOCAL_ID_PREFIX: &str = "local:";

/// Namespace prefix for identifiers synthesized for untagged messages.
pub const ANON_ID_PREFIX: &str = "anon:";

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// True for identifiers assigned by the upstream server.
#[must_use]
pub fn is_server_id(id: &str) -> bool {
    !id.is_empty() && !id.starts_with(LOCAL_ID_PREFIX) && !id.starts_with(ANON_ID_PREFIX)
}

#[must_use]
pub fn local_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4())
}

#[must_use]
pub fn anon_id() -> String {
    format!("{ANON_ID_PREFIX}{}", Uuid::new_v4())
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(duration.as_millis()).unwrap_or(0)
}

// =============================================================================
// MESSAGES
// =============================================================================

/// A `name/version` badge reference. Resolution to artwork happens elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeRef {
    pub name: String,
    pub version: String,
}

/// A single chat line, either authoritative or a provisional local echo.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    /// Lowercase login taken from the line prefix.
    pub sender_login: String,
    pub sender_name: String,
    pub display_color: Option<String>,
    pub badge_refs: Vec<BadgeRef>,
    pub body: String,
    /// Milliseconds since the Unix epoch.
    pub send_time: i64,
    pub reply_parent_id: Option<String>,
    pub is_local_echo: bool,
    /// `/me` style action line.
    pub is_action: bool,
    /// Replayed from the recent-history collaborator rather than received live.
    pub historical: bool,
}

impl ChatMessage {
    #[must_use]
    pub fn has_server_id(&self) -> bool {
        is_server_id(&self.id)
    }
}

/// Removal of one message by a moderator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionEvent {
    pub target_message_id: String,
}

/// Timeout or ban of one user.
///
/// `ban_duration: None` is a permanent ban; `Some(_)`, including zero, is a
/// timeout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClearEvent {
    pub target_user_id: String,
    pub ban_duration: Option<Duration>,
}

impl UserClearEvent {
    #[must_use]
    pub fn moderation(&self) -> Moderation {
        match self.ban_duration {
            Some(duration) => Moderation::Timeout { seconds: duration.as_secs() },
            None => Moderation::Ban,
        }
    }
}

/// Connection-health signal carried in-band by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SessionSignal {
    Connected,
    Reconnecting(u32),
    ReconnectFailed(u32),
    ReconnectExhausted,
    Heartbeat,
    Warning(String),
}

/// Every event the classifier can turn a payload into that carries meaning
/// for the buffer or the connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    Chat(ChatMessage),
    Deletion(DeletionEvent),
    UserClear(UserClearEvent),
    Session(SessionSignal),
}

/// Moderation mark applied to buffered entries of a cleared user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Moderation {
    Timeout { seconds: u64 },
    Ban,
}

// =============================================================================
// SELF PROFILE
// =============================================================================

/// Own-user state pushed by the server (`USERSTATE` / `GLOBALUSERSTATE`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeSync {
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub badges: Vec<BadgeRef>,
}

/// Identity of the local session, used to decorate local echoes and to
/// recognise the authoritative copies of our own messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelfProfile {
    pub login: String,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub badges: Vec<BadgeRef>,
}

impl SelfProfile {
    #[must_use]
    pub fn new(login: &str) -> Self {
        Self { login: login.to_lowercase(), ..Self::default() }
    }

    /// Merge a badge-sync signal. Absent fields keep their previous value.
    pub fn apply(&mut self, sync: BadgeSync) {
        if sync.user_id.is_some() {
            self.user_id = sync.user_id;
        }
        if sync.display_name.is_some() {
            self.display_name = sync.display_name;
        }
        if sync.color.is_some() {
            self.color = sync.color;
        }
        self.badges = sync.badges;
    }

    /// Key recorded on pending echoes: the user id once known, else the login.
    #[must_use]
    pub fn sender_key(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.login)
    }

    /// Whether `message` was authored by this session's user.
    #[must_use]
    pub fn is_self(&self, message: &ChatMessage) -> bool {
        if let Some(user_id) = &self.user_id {
            if *user_id == message.sender_id {
                return true;
            }
        }
        !self.login.is_empty() && self.login.eq_ignore_ascii_case(&message.sender_login)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.login)
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;

    /// Authoritative chat message from `sender` (used as id, login and name).
    #[must_use]
    pub fn chat(id: &str, sender: &str, body: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_owned(),
            sender_id: sender.to_owned(),
            sender_login: sender.to_owned(),
            sender_name: sender.to_owned(),
            display_color: None,
            badge_refs: Vec::new(),
            body: body.to_owned(),
            send_time: 0,
            reply_parent_id: None,
            is_local_echo: false,
            is_action: false,
            historical: false,
        }
    }

    /// Raw `PRIVMSG` line as the transport would deliver it.
    #[must_use]
    pub fn privmsg(id: &str, sender: &str, body: &str) -> String {
        format!("@id={id};user-id={sender} :{sender}!{sender}@{sender}.tmi.twitch.tv PRIVMSG #foo :{body}")
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
