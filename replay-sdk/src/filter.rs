//! Inbound message filters.
//!
//! Filters see every parsed inbound message before the session turns it into
//! events, and may consume it, rewrite it, or let it through untouched. They
//! also hook the session lifecycle (new connection, capability negotiation),
//! so installing a filter connects all of its hooks at once and uninstalling
//! it disconnects them together.
//!
//! # Writing a filter
//!
//! 1. Implement [`SessionFilter`]
//! 2. Install it with [`MessageBus::install`] (or `Session::install_filter`)
//! 3. Keep the returned [`FilterId`] to remove it later

use crate::channel::{ChannelHandle, ChannelRegistry};
use crate::irc::Message;

/// Outcome of filtering one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Fully handled; nothing downstream sees the message.
    Consumed,
    /// Continue through the pipeline, possibly rewritten.
    Passthrough(Message),
}

/// What a filter may look at while handling a message.
pub struct FilterContext<'a> {
    channels: &'a dyn ChannelRegistry,
}

impl<'a> FilterContext<'a> {
    pub fn new(channels: &'a dyn ChannelRegistry) -> Self {
        Self { channels }
    }

    /// Look up the handle of a channel the session knows about.
    pub fn resolve(&self, name: &str) -> Option<ChannelHandle> {
        self.channels.resolve(name)
    }
}

/// Trait that all message filters implement.
pub trait SessionFilter: Send {
    /// Human-readable name of this filter.
    fn name(&self) -> &str;

    /// Called once per inbound message, in arrival order.
    fn filter(&mut self, message: Message, ctx: &FilterContext<'_>) -> Verdict;

    /// Called when a new connection starts.
    fn on_connected(&mut self) {}

    /// Called on `CAP LS` with the advertised capabilities. Push names onto
    /// `requested` to have them included in `CAP REQ`.
    fn on_capabilities(&mut self, available: &[String], requested: &mut Vec<String>) {
        let _ = (available, requested);
    }
}

/// Identifies an installed filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(u64);

/// Ordered set of installed filters.
///
/// The most recently installed filter sees messages first.
#[derive(Default)]
pub struct MessageBus {
    filters: Vec<(FilterId, Box<dyn SessionFilter>)>,
    next_id: u64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, filter: Box<dyn SessionFilter>) -> FilterId {
        let id = FilterId(self.next_id);
        self.next_id += 1;
        tracing::info!("Installed message filter '{}'", filter.name());
        self.filters.push((id, filter));
        id
    }

    /// Remove a filter, handing it back to the caller.
    pub fn uninstall(&mut self, id: FilterId) -> Option<Box<dyn SessionFilter>> {
        let pos = self.filters.iter().position(|(fid, _)| *fid == id)?;
        let (_, filter) = self.filters.remove(pos);
        tracing::info!("Removed message filter '{}'", filter.name());
        Some(filter)
    }

    /// Run `message` through every filter. `None` if one consumed it.
    pub fn dispatch(&mut self, message: Message, ctx: &FilterContext<'_>) -> Option<Message> {
        let mut message = message;
        for (_, filter) in self.filters.iter_mut().rev() {
            match filter.filter(message, ctx) {
                Verdict::Consumed => {
                    tracing::trace!(filter = filter.name(), "Message consumed");
                    return None;
                }
                Verdict::Passthrough(next) => message = next,
            }
        }
        Some(message)
    }

    pub fn connected(&mut self) {
        for (_, filter) in self.filters.iter_mut().rev() {
            filter.on_connected();
        }
    }

    pub fn capabilities(&mut self, available: &[String], requested: &mut Vec<String>) {
        for (_, filter) in self.filters.iter_mut().rev() {
            filter.on_capabilities(available, requested);
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
