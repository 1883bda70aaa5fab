//! Translation of ZNC `*buffextras` narrations.
//!
//! The buffextras module records channel events as plain chat lines from the
//! `*buffextras` pseudo-user, e.g. `nick!user@host parted with message: [bye]`.
//! Each narration kind is one row of [`NARRATIONS`]: the leading keyword, the
//! IRC command it stands for, and how to pull the command's parameters out of
//! the text. Matching is a literal prefix test in table order.

use crate::irc::Message;

/// A replayed buffextras line with the timestamp already removed.
#[derive(Debug, Clone, Copy)]
pub struct Narration<'a> {
    /// Channel being replayed.
    pub target: &'a str,
    /// Sender prefix of the narrated event, e.g. `nick!user@host`.
    pub prefix: &'a str,
    /// Everything after the prefix, e.g. `joined`.
    pub text: &'a str,
}

impl<'a> Narration<'a> {
    /// Split `line` (`<prefix> <narration>`) for replay target `target`.
    pub fn parse(line: &'a str, target: &'a str) -> Option<Self> {
        let (prefix, text) = line.split_once(' ')?;
        if prefix.is_empty() {
            return None;
        }
        Some(Self {
            target,
            prefix,
            text,
        })
    }

    fn words(&self) -> Vec<&'a str> {
        self.text.split_whitespace().collect()
    }
}

type Extract = for<'a> fn(&Narration<'a>) -> Option<Vec<String>>;

/// One narration kind.
pub struct NarrationRule {
    pub keyword: &'static str,
    pub command: &'static str,
    extract: Extract,
}

/// Known narrations, tried in order.
///
/// `is` is taken as a nick change (`is now known as <nick>`) whatever
/// follows it.
pub const NARRATIONS: &[NarrationRule] = &[
    NarrationRule { keyword: "joined", command: "JOIN", extract: joined },
    NarrationRule { keyword: "parted", command: "PART", extract: parted },
    NarrationRule { keyword: "quit", command: "QUIT", extract: quit },
    NarrationRule { keyword: "is", command: "NICK", extract: nick },
    NarrationRule { keyword: "set", command: "MODE", extract: mode },
    NarrationRule { keyword: "changed", command: "TOPIC", extract: topic },
    NarrationRule { keyword: "kicked", command: "KICK", extract: kick },
];

/// Find the rule for `text` by its leading keyword.
pub fn rule_for(text: &str) -> Option<&'static NarrationRule> {
    NARRATIONS.iter().find(|rule| text.starts_with(rule.keyword))
}

/// Turn a narration into the IRC message it describes.
///
/// `None` when the keyword is unknown or the text lacks the fields the
/// keyword needs; the caller then treats the line as ordinary chat.
pub fn translate(narration: &Narration<'_>) -> Option<Message> {
    let rule = rule_for(narration.text)?;
    let params = (rule.extract)(narration)?;
    Some(Message::from_parameters(narration.prefix, rule.command, params))
}

fn joined(n: &Narration<'_>) -> Option<Vec<String>> {
    Some(vec![n.target.to_string()])
}

fn parted(n: &Narration<'_>) -> Option<Vec<String>> {
    Some(vec![n.target.to_string(), bracketed(n.text).to_string()])
}

fn quit(n: &Narration<'_>) -> Option<Vec<String>> {
    Some(vec![bracketed(n.text).to_string()])
}

fn nick(n: &Narration<'_>) -> Option<Vec<String>> {
    let new_nick = n.words().last()?.to_string();
    Some(vec![new_nick])
}

/// `set mode: +o nick` -> mode is the second-to-last word, the user the last.
fn mode(n: &Narration<'_>) -> Option<Vec<String>> {
    let words = n.words();
    if words.len() < 3 {
        return None;
    }
    let [.., mode, user] = words.as_slice() else {
        return None;
    };
    Some(vec![n.target.to_string(), mode.to_string(), user.to_string()])
}

fn topic(n: &Narration<'_>) -> Option<Vec<String>> {
    let text = match n.text.find(": ") {
        Some(i) => &n.text[i + 2..],
        None => n.text.find(':').map_or("", |i| &n.text[i + 1..]),
    };
    Some(vec![n.target.to_string(), text.to_string()])
}

/// The kicked user is the third word of the full line, counting the prefix.
fn kick(n: &Narration<'_>) -> Option<Vec<String>> {
    let user = n.words().get(1)?.to_string();
    Some(vec![
        n.target.to_string(),
        user,
        bracketed(n.text).to_string(),
    ])
}

/// Text from just after the first `[` up to the last `]`.
///
/// Cutting at the last `]` instead of always dropping the final character
/// keeps trailing words out of the reason: `kicked nick [no reason] by`
/// yields `no reason`. Without a closing bracket the final character is
/// dropped.
fn bracketed(text: &str) -> &str {
    let start = text.find('[').map_or(0, |i| i + 1);
    let inner = &text[start..];
    match inner.rfind(']') {
        Some(end) => &inner[..end],
        None => {
            let cut = inner.char_indices().last().map_or(0, |(i, _)| i);
            &inner[..cut]
        }
    }
}
