//! Channel registry and deferred delivery into channel owners.
//!
//! A [`ChannelHandle`] never owns the channel: it is the sending half of the
//! channel owner's inbox. Messages handed to [`ChannelHandle::deliver`] are
//! queued and picked up by whoever drains the matching [`ChannelInbox`],
//! typically a task on a different owner's executor.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::irc::Message;

/// Receiving half of a channel's inbox.
pub type ChannelInbox = mpsc::UnboundedReceiver<Message>;

/// Cheap, cloneable reference to a channel's inbox.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    name: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelHandle {
    /// Create a handle and the inbox it feeds.
    pub fn new(name: &str) -> (Self, ChannelInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.to_string(),
                tx,
            },
            rx,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a message for the channel owner. Fire-and-forget: a closed
    /// inbox means the channel is gone and the message is dropped.
    pub fn deliver(&self, message: Message) {
        if self.tx.send(message).is_err() {
            tracing::trace!(channel = %self.name, "Channel inbox closed, dropping message");
        }
    }

    /// True once the inbox has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Lookup of channel handles by name.
pub trait ChannelRegistry {
    fn resolve(&self, name: &str) -> Option<ChannelHandle>;
}

/// Registry keyed by case-folded channel name.
#[derive(Debug, Default)]
pub struct ChannelMap {
    channels: HashMap<String, ChannelHandle>,
}

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel, returning its inbox. `None` if already registered.
    pub fn open(&mut self, name: &str) -> Option<ChannelInbox> {
        let key = fold(name);
        if self.channels.contains_key(&key) {
            return None;
        }
        let (handle, inbox) = ChannelHandle::new(name);
        self.channels.insert(key, handle);
        Some(inbox)
    }

    pub fn remove(&mut self, name: &str) -> Option<ChannelHandle> {
        self.channels.remove(&fold(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(&fold(name))
    }

    /// Channel names as they were first registered, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.values().map(|h| h.name.clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }
}

impl ChannelRegistry for ChannelMap {
    fn resolve(&self, name: &str) -> Option<ChannelHandle> {
        self.channels.get(&fold(name)).cloned()
    }
}

/// RFC 1459 case mapping.
fn fold(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}
