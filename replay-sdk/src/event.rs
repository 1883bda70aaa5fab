//! Events emitted by a session for the consumer (UI, logger, bot) to consume.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Events that the SDK emits to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A new connection started.
    Connected,

    /// IRC registration complete. `nick` is our confirmed nick.
    Registered { nick: String },

    /// Capability negotiation finished with these capabilities requested.
    CapsRequested { caps: Vec<String> },

    /// Someone joined a channel.
    Joined { channel: String, nick: String },

    /// Someone left a channel.
    Parted {
        channel: String,
        nick: String,
        reason: String,
    },

    /// A PRIVMSG in a channel or a private message.
    Message {
        from: String,
        target: String,
        text: String,
        /// IRCv3 message tags (empty if none).
        tags: HashMap<String, String>,
    },

    /// A NOTICE from a user or a server.
    Notice {
        from: String,
        target: String,
        text: String,
    },

    /// NAMES list for a channel.
    Names {
        channel: String,
        nicks: Vec<String>,
    },

    /// Channel mode changed.
    ModeChanged {
        channel: String,
        mode: String,
        arg: Option<String>,
        set_by: String,
    },

    /// Someone was kicked from a channel.
    Kicked {
        channel: String,
        nick: String,
        by: String,
        reason: String,
    },

    /// Channel topic changed or received on join.
    TopicChanged {
        channel: String,
        topic: String,
        set_by: Option<String>,
    },

    /// Someone changed nick.
    NickChanged { old: String, new: String },

    /// Someone quit the server.
    UserQuit { nick: String, reason: String },

    /// Connection was closed.
    Disconnected { reason: String },

    /// Raw server line (for debugging).
    RawLine(String),
}

/// An event together with the time it happened.
///
/// For live traffic this is the server-time tag or the receive time; for
/// reconstructed buffer playback it is the historical time parsed from the
/// replayed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEvent {
    pub time: DateTime<Utc>,
    pub event: Event,
}

impl TimedEvent {
    pub fn new(time: DateTime<Utc>, event: Event) -> Self {
        Self { time, event }
    }
}
