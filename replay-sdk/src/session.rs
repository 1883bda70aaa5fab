//! Transport-agnostic IRC session.
//!
//! A [`Session`] is fed raw inbound lines by whatever owns the connection.
//! Each line is parsed, run through the installed message filters, and what
//! survives is turned into [`TimedEvent`]s on the session's event channel.
//! Lines the session wants to send back (CAP negotiation, PONG) are returned
//! to the caller.
//!
//! Every joined channel gets an inbox. Filters can deliver messages into a
//! channel's inbox (see [`crate::channel`]); a per-channel task converts them
//! into events on the same event channel. The session must therefore be
//! driven from inside a tokio runtime.

use chrono::Utc;
use tokio::sync::mpsc;

use crate::channel::{ChannelInbox, ChannelMap};
use crate::event::{Event, TimedEvent};
use crate::filter::{FilterContext, FilterId, MessageBus, SessionFilter};
use crate::irc::{self, Message};

/// Capabilities the session asks for on its own when offered.
const BASE_CAPS: &[&str] = &["server-time", "message-tags"];

/// Session settings.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Our nick, if known before registration.
    pub nick: Option<String>,
    /// Emit [`Event::RawLine`] for every inbound line.
    pub raw_lines: bool,
}

pub struct Session {
    config: SessionConfig,
    nick: Option<String>,
    bus: MessageBus,
    channels: ChannelMap,
    event_tx: mpsc::UnboundedSender<TimedEvent>,
    /// Capabilities accumulated over a multi-line `CAP LS`.
    cap_ls: Vec<String>,
}

impl Session {
    /// Create a session and the receiver for its events.
    pub fn new(config: SessionConfig) -> (Self, mpsc::UnboundedReceiver<TimedEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let nick = config.nick.clone();
        let session = Self {
            config,
            nick,
            bus: MessageBus::new(),
            channels: ChannelMap::new(),
            event_tx,
            cap_ls: Vec::new(),
        };
        (session, event_rx)
    }

    /// Install a filter; it sees messages before any already installed.
    pub fn install_filter(&mut self, filter: Box<dyn SessionFilter>) -> FilterId {
        self.bus.install(filter)
    }

    pub fn uninstall_filter(&mut self, id: FilterId) -> Option<Box<dyn SessionFilter>> {
        self.bus.uninstall(id)
    }

    pub fn nick(&self) -> Option<&str> {
        self.nick.as_deref()
    }

    /// Channels we are currently in.
    pub fn channels(&self) -> Vec<String> {
        self.channels.names()
    }

    /// Signal the start of a new connection. Channel state from a previous
    /// connection is dropped.
    pub fn connected(&mut self) {
        self.channels.clear();
        self.cap_ls.clear();
        self.nick = self.config.nick.clone();
        self.bus.connected();
        self.emit_now(Event::Connected);
    }

    /// Signal the end of the connection.
    pub fn disconnected(&mut self, reason: &str) {
        self.channels.clear();
        self.emit_now(Event::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Process one raw inbound line. Returns lines to send to the server.
    pub fn handle_line(&mut self, line: &str) -> Vec<String> {
        let mut outgoing = Vec::new();

        if self.config.raw_lines {
            self.emit_now(Event::RawLine(line.trim_end().to_string()));
        }

        let Some(msg) = Message::parse(line) else {
            tracing::trace!(line, "Skipping unparseable line");
            return outgoing;
        };

        let ctx = FilterContext::new(&self.channels);
        let Some(msg) = self.bus.dispatch(msg, &ctx) else {
            return outgoing;
        };

        match msg.command.as_str() {
            "CAP" => self.handle_cap(&msg, &mut outgoing),
            "PING" => {
                let token = msg.params.first().map(|s| s.as_str()).unwrap_or("");
                outgoing.push(format!("PONG :{token}"));
            }
            "001" => {
                self.nick = msg.params.first().cloned();
            }
            "JOIN" => {
                let channel = msg.target();
                if self.is_me(msg.nick()) && !channel.is_empty() {
                    if let Some(inbox) = self.channels.open(channel) {
                        tracing::debug!(channel, "Opened channel");
                        spawn_channel_pump(inbox, self.event_tx.clone());
                    }
                }
            }
            "PART" => {
                if self.is_me(msg.nick()) {
                    self.channels.remove(msg.target());
                }
            }
            "KICK" => {
                if let Some(kicked) = msg.params.get(1) {
                    if self.is_me(kicked) {
                        self.channels.remove(msg.target());
                    }
                }
            }
            "NICK" => {
                if self.is_me(msg.nick()) {
                    self.nick = msg.params.first().cloned();
                }
            }
            _ => {}
        }

        if let Some(event) = to_event(&msg) {
            let time = msg.timestamp().unwrap_or_else(Utc::now);
            self.emit(TimedEvent::new(time, event));
        }

        outgoing
    }

    fn is_me(&self, nick: &str) -> bool {
        self.nick
            .as_deref()
            .is_some_and(|me| me.eq_ignore_ascii_case(nick))
    }

    fn handle_cap(&mut self, msg: &Message, outgoing: &mut Vec<String>) {
        let subcmd = msg.params.get(1).map(|s| s.to_ascii_uppercase());
        match subcmd.as_deref() {
            Some("LS") => {
                let caps_str = msg.params.last().map(|s| s.as_str()).unwrap_or("");
                // Values like `sasl=PLAIN` advertise the bare name.
                self.cap_ls.extend(
                    caps_str
                        .split_whitespace()
                        .map(|cap| cap.split('=').next().unwrap_or(cap).to_string()),
                );
                // `CAP * LS * :...` means more lines follow.
                if msg.params.len() > 3 && msg.params[2] == "*" {
                    return;
                }

                let available = std::mem::take(&mut self.cap_ls);
                let mut requested: Vec<String> = BASE_CAPS
                    .iter()
                    .filter(|cap| available.iter().any(|a| a.as_str() == **cap))
                    .map(|cap| cap.to_string())
                    .collect();
                self.bus.capabilities(&available, &mut requested);

                if requested.is_empty() {
                    outgoing.push("CAP END".to_string());
                } else {
                    tracing::debug!("Requesting capabilities: {}", requested.join(" "));
                    outgoing.push(format!("CAP REQ :{}", requested.join(" ")));
                    self.emit_now(Event::CapsRequested { caps: requested });
                }
            }
            Some("ACK") | Some("NAK") => {
                outgoing.push("CAP END".to_string());
            }
            _ => {}
        }
    }

    fn emit_now(&self, event: Event) {
        self.emit(TimedEvent::new(Utc::now(), event));
    }

    fn emit(&self, event: TimedEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}

/// Forward everything delivered into a channel's inbox as events.
fn spawn_channel_pump(mut inbox: ChannelInbox, event_tx: mpsc::UnboundedSender<TimedEvent>) {
    tokio::spawn(async move {
        while let Some(msg) = inbox.recv().await {
            let Some(event) = to_event(&msg) else {
                continue;
            };
            let time = msg.timestamp().unwrap_or_else(Utc::now);
            if event_tx.send(TimedEvent::new(time, event)).is_err() {
                break;
            }
        }
    });
}

/// Map a message to the event consumers see, if it has one.
pub fn to_event(msg: &Message) -> Option<Event> {
    let nick = msg.nick().to_string();
    let event = match msg.command.as_str() {
        "001" => Event::Registered {
            nick: msg.params.first().cloned().unwrap_or_default(),
        },
        "353" => {
            if msg.params.len() < 4 {
                return None;
            }
            Event::Names {
                channel: msg.params[2].clone(),
                nicks: msg.params[3].split_whitespace().map(|s| s.to_string()).collect(),
            }
        }
        "JOIN" => Event::Joined {
            channel: msg.params.first().cloned()?,
            nick,
        },
        "PART" => Event::Parted {
            channel: msg.params.first().cloned()?,
            nick,
            reason: msg.params.get(1).cloned().unwrap_or_default(),
        },
        "QUIT" => Event::UserQuit {
            nick,
            reason: msg.params.first().cloned().unwrap_or_default(),
        },
        "NICK" => Event::NickChanged {
            old: nick,
            new: msg.params.first().cloned()?,
        },
        "MODE" => {
            if msg.params.len() < 2 || !irc::is_channel(&msg.params[0]) {
                return None;
            }
            let set_by = if nick.is_empty() { "server".to_string() } else { nick };
            Event::ModeChanged {
                channel: msg.params[0].clone(),
                mode: msg.params[1].clone(),
                arg: msg.params.get(2).cloned(),
                set_by,
            }
        }
        "KICK" => {
            if msg.params.len() < 2 {
                return None;
            }
            let by = if nick.is_empty() { "server".to_string() } else { nick };
            Event::Kicked {
                channel: msg.params[0].clone(),
                nick: msg.params[1].clone(),
                by,
                reason: msg.params.get(2).cloned().unwrap_or_default(),
            }
        }
        // TOPIC (live change from another user)
        "TOPIC" => Event::TopicChanged {
            channel: msg.params.first().cloned()?,
            topic: msg.params.get(1).cloned().unwrap_or_default(),
            set_by: if nick.is_empty() { None } else { Some(nick) },
        },
        // RPL_TOPIC (on join or TOPIC query)
        "332" => {
            if msg.params.len() < 3 {
                return None;
            }
            Event::TopicChanged {
                channel: msg.params[1].clone(),
                topic: msg.params[2].clone(),
                set_by: None,
            }
        }
        "PRIVMSG" => {
            if msg.params.len() < 2 {
                return None;
            }
            Event::Message {
                from: nick,
                target: msg.target().to_string(),
                text: msg.text().to_string(),
                tags: msg.tags.clone(),
            }
        }
        "NOTICE" => {
            if msg.params.len() < 2 {
                return None;
            }
            Event::Notice {
                from: nick,
                target: msg.target().to_string(),
                text: msg.text().to_string(),
            }
        }
        _ => return None,
    };
    Some(event)
}
