//! IRCv3 tagged-line codec.
//!
//! The transport delivers text frames holding one or more `\r\n`-separated
//! lines of the form:
//!
//! ```text
//! [@tag=value;tag=value ][:prefix ]COMMAND [params...] [:trailing]
//! ```
//!
//! Parsing borrows from the input except for tag values, which are unescaped
//! into owned strings.

use std::collections::HashMap;

use crate::message::BadgeRef;

/// A parsed line. Tag values are already unescaped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrcLine<'a> {
    pub tags: HashMap<&'a str, String>,
    pub prefix: Option<&'a str>,
    pub command: &'a str,
    pub params: Vec<&'a str>,
    pub trailing: Option<&'a str>,
}

impl<'a> IrcLine<'a> {
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Tag value, treating an empty value as absent.
    #[must_use]
    pub fn tag_nonempty(&self, key: &str) -> Option<&str> {
        self.tag(key).filter(|value| !value.is_empty())
    }

    /// Nick portion of a `nick!user@host` prefix.
    #[must_use]
    pub fn nick(&self) -> Option<&'a str> {
        self.prefix
            .and_then(|prefix| prefix.split('!').next())
            .filter(|nick| !nick.is_empty())
    }
}

/// Split a transport frame into its non-empty lines.
pub fn split_lines(frame: &str) -> impl Iterator<Item = &str> {
    frame.lines().filter(|line| !line.trim().is_empty())
}

/// Parse one line. Returns `None` when no command can be found.
#[must_use]
pub fn parse_line(line: &str) -> Option<IrcLine<'_>> {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    let mut tags = HashMap::new();

    if let Some(stripped) = rest.strip_prefix('@') {
        let (raw_tags, tail) = stripped.split_once(' ')?;
        for pair in raw_tags.split(';').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            tags.insert(key, unescape_tag(value));
        }
        rest = tail.trim_start_matches(' ');
    }

    let mut prefix = None;
    if let Some(stripped) = rest.strip_prefix(':') {
        let (raw_prefix, tail) = stripped.split_once(' ')?;
        prefix = Some(raw_prefix);
        rest = tail.trim_start_matches(' ');
    }

    let (head, trailing) = match rest.split_once(" :") {
        Some((head, trailing)) => (head, Some(trailing)),
        None => (rest, None),
    };

    let mut parts = head.split(' ').filter(|part| !part.is_empty());
    let command = parts.next()?;
    let params = parts.collect();

    Some(IrcLine { tags, prefix, command, params, trailing })
}

/// Undo IRCv3 tag-value escaping.
#[must_use]
pub fn unescape_tag(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[must_use]
pub fn escape_tag(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// Parse a `name/version,name/version` badge list.
#[must_use]
pub fn parse_badges(raw: &str) -> Vec<BadgeRef> {
    raw.split(',')
        .filter_map(|item| {
            let (name, version) = item.split_once('/')?;
            if name.is_empty() {
                return None;
            }
            Some(BadgeRef { name: name.to_owned(), version: version.to_owned() })
        })
        .collect()
}

/// Outbound chat line, tagged with the reply parent when replying.
#[must_use]
pub fn format_privmsg(channel: &str, body: &str, reply_parent: Option<&str>) -> String {
    // Line breaks in the body would smuggle extra commands onto the wire.
    let body = body.replace(['\r', '\n'], " ");
    match reply_parent {
        Some(parent) => format!("@reply-parent-msg-id={} PRIVMSG #{channel} :{body}", escape_tag(parent)),
        None => format!("PRIVMSG #{channel} :{body}"),
    }
}

/// Registration sequence sent right after the socket opens.
#[must_use]
pub fn login_lines(channel: &str, nick: &str, token: Option<&str>) -> Vec<String> {
    let mut lines = vec!["CAP REQ :twitch.tv/tags twitch.tv/commands".to_owned()];
    if let Some(token) = token {
        let token = token.strip_prefix("oauth:").unwrap_or(token);
        lines.push(format!("PASS oauth:{token}"));
    }
    lines.push(format!("NICK {}", nick.to_lowercase()));
    lines.push(format!("JOIN #{}", channel.to_lowercase()));
    lines
}

#[cfg(test)]
#[path = "wire_test.rs"]
mod tests;
