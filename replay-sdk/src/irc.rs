//! IRC message types.
//! A minimal parser/formatter for IRC protocol lines, plus the accessors the
//! playback reconstructor needs (sender prefix, message kind, CTCP framing,
//! IRCv3 server-time).
//!
//! Supports IRCv3 message tags: `@key=value;key2=value2 :prefix COMMAND params`

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

/// IRCv3 `server-time` tag name.
pub const TIME_TAG: &str = "time";

const CTCP_DELIM: char = '\x01';

/// A parsed IRC message with optional IRCv3 tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 message tags (key=value pairs).
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

/// Coarse message classification used by message filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// PRIVMSG, to a channel or a nick.
    Private,
    /// NOTICE.
    Notice,
    Other,
}

/// The sender of a message, split from `nick!user@host`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefix {
    pub name: String,
    pub user: String,
    pub host: String,
}

impl Prefix {
    /// Split a raw prefix. Missing parts are left empty.
    pub fn parse(raw: &str) -> Self {
        let (name, rest) = match raw.split_once('!') {
            Some((name, rest)) => (name, Some(rest)),
            None => (raw, None),
        };
        let (name, user, host) = match rest {
            Some(rest) => match rest.split_once('@') {
                Some((user, host)) => (name, user, host),
                None => (name, rest, ""),
            },
            None => match name.split_once('@') {
                Some((name, host)) => (name, "", host),
                None => (name, "", ""),
            },
        };
        Self {
            name: name.to_string(),
            user: user.to_string(),
            host: host.to_string(),
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.user.is_empty() {
            write!(f, "!{}", self.user)?;
        }
        if !self.host.is_empty() {
            write!(f, "@{}", self.host)?;
        }
        Ok(())
    }
}

/// CTCP framing of a PRIVMSG/NOTICE body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ctcp {
    /// Plain text, no framing.
    None,
    /// `\x01ACTION ...\x01`
    Action,
    /// Any other `\x01...\x01` body (a request in PRIVMSG, a reply in NOTICE).
    Other,
}

impl Ctcp {
    /// Split a body into its framing and the inner text.
    pub fn split(text: &str) -> (Self, &str) {
        let Some(inner) = text.strip_prefix(CTCP_DELIM) else {
            return (Ctcp::None, text);
        };
        let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
        match inner.strip_prefix("ACTION") {
            Some(rest) if rest.is_empty() || rest.starts_with(' ') => {
                (Ctcp::Action, rest.strip_prefix(' ').unwrap_or(rest))
            }
            _ => (Ctcp::Other, inner),
        }
    }

    /// Re-apply this framing to `inner`.
    pub fn wrap(self, inner: &str) -> String {
        match self {
            Ctcp::None => inner.to_string(),
            Ctcp::Action => format!("{CTCP_DELIM}ACTION {inner}{CTCP_DELIM}"),
            Ctcp::Other => format!("{CTCP_DELIM}{inner}{CTCP_DELIM}"),
        }
    }
}

impl Message {
    /// Parse a raw IRC line, including optional message tags.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return None;
        }

        let mut rest = line;

        // Parse tags: @key=value;key2=value2
        let tags = if rest.starts_with('@') {
            let end = rest.find(' ')?;
            let tag_str = &rest[1..end];
            rest = &rest[end + 1..];
            parse_tags(tag_str)
        } else {
            HashMap::new()
        };

        // Parse prefix: :server or :nick!user@host
        let prefix = if rest.starts_with(':') {
            let end = rest.find(' ')?;
            let pfx = rest[1..end].to_string();
            rest = &rest[end + 1..];
            Some(pfx)
        } else {
            None
        };

        let mut params = Vec::new();
        let command;

        if let Some(space) = rest.find(' ') {
            command = rest[..space].to_ascii_uppercase();
            rest = &rest[space + 1..];

            while !rest.is_empty() {
                if let Some(trailing) = rest.strip_prefix(':') {
                    params.push(trailing.to_string());
                    break;
                }
                if let Some(space) = rest.find(' ') {
                    params.push(rest[..space].to_string());
                    rest = &rest[space + 1..];
                } else {
                    params.push(rest.to_string());
                    break;
                }
            }
        } else {
            command = rest.to_ascii_uppercase();
        }

        Some(Message {
            tags,
            prefix,
            command,
            params,
        })
    }

    pub fn new(command: &str, params: Vec<&str>) -> Self {
        Self {
            tags: HashMap::new(),
            prefix: None,
            command: command.to_string(),
            params: params.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Build a message from a sender prefix, a command and its parameters.
    pub fn from_parameters(prefix: &str, command: &str, params: Vec<String>) -> Self {
        Self {
            tags: HashMap::new(),
            prefix: Some(prefix.to_string()),
            command: command.to_string(),
            params,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self.command.as_str() {
            "PRIVMSG" => MessageKind::Private,
            "NOTICE" => MessageKind::Notice,
            _ => MessageKind::Other,
        }
    }

    /// The parsed sender, or an empty prefix for server-less lines.
    pub fn sender(&self) -> Prefix {
        self.prefix.as_deref().map(Prefix::parse).unwrap_or_default()
    }

    /// Sender nick, without user and host.
    pub fn nick(&self) -> &str {
        self.prefix
            .as_deref()
            .and_then(|p| p.split('!').next())
            .unwrap_or("")
    }

    /// First parameter: the addressed channel or nick for PRIVMSG/NOTICE.
    pub fn target(&self) -> &str {
        self.params.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Raw PRIVMSG/NOTICE body, CTCP framing included.
    pub fn text(&self) -> &str {
        self.params.get(1).map(|s| s.as_str()).unwrap_or("")
    }

    /// Replace the PRIVMSG/NOTICE body, keeping the target.
    pub fn set_text(&mut self, text: String) {
        let target = self.target().to_string();
        self.params = vec![target, text];
    }

    /// Timestamp from the IRCv3 `time` tag, if present and well-formed.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.tags.get(TIME_TAG)?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Store `time` as the IRCv3 `time` tag.
    pub fn set_timestamp(&mut self, time: DateTime<Utc>) {
        self.tags.insert(
            TIME_TAG.to_string(),
            time.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Write tags
        if !self.tags.is_empty() {
            write!(f, "@")?;
            let mut keys: Vec<&String> = self.tags.keys().collect();
            keys.sort();
            let mut first = true;
            for key in keys {
                let value = &self.tags[key];
                if !first { write!(f, ";")?; }
                first = false;
                if value.is_empty() {
                    write!(f, "{key}")?;
                } else {
                    write!(f, "{key}={}", escape_tag_value(value))?;
                }
            }
            write!(f, " ")?;
        }

        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;
        for (i, param) in self.params.iter().enumerate() {
            if i == self.params.len() - 1
                && (param.contains(' ') || param.starts_with(':') || param.is_empty())
            {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

/// True for `#chan` and `&chan` targets.
pub fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}

/// Parse IRCv3 tag string: `key=value;key2=value2`
fn parse_tags(tag_str: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    for pair in tag_str.split(';') {
        if pair.is_empty() { continue; }
        if let Some((key, value)) = pair.split_once('=') {
            tags.insert(key.to_string(), unescape_tag_value(value));
        } else {
            tags.insert(pair.to_string(), String::new());
        }
    }
    tags
}

/// Unescape IRCv3 tag values.
/// `\:` → `;`, `\s` → space, `\\` → `\`, `\r` → CR, `\n` → LF
fn unescape_tag_value(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(':') => result.push(';'),
                Some('s') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some('r') => result.push('\r'),
                Some('n') => result.push('\n'),
                Some(other) => { result.push('\\'); result.push(other); }
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Escape a value for IRCv3 tag encoding.
fn escape_tag_value(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ';' => result.push_str("\\:"),
            ' ' => result.push_str("\\s"),
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}
