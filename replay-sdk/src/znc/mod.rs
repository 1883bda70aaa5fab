//! ZNC buffer playback reconstruction.
//!
//! When a client attaches, ZNC replays each channel's buffer between two
//! sentinel lines from `***!znc@znc.in`. Replayed lines carry a textual
//! timestamp prefix instead of their original time, and with the
//! `buffextras` module loaded, joins/parts/quits/etc. arrive as chat lines
//! from `*buffextras`. [`ReplaySessionFilter`] detects the playback window,
//! strips the prefixes into real timestamps, and turns buffextras narrations
//! back into the IRC messages they describe.
//!
//! The filter also speaks the `communi` extension: the bouncer sends its
//! clock as a NOTICE from `*communi`, and at connect time the client requests
//! `communi/<seconds>` so playback resumes from the last second it saw.

pub mod buffextras;
pub mod clock;
pub mod timestamp;

use std::sync::Arc;

use tokio::sync::watch;

use crate::channel::ChannelHandle;
use crate::filter::{FilterContext, SessionFilter, Verdict};
use crate::irc::{Ctcp, Message, MessageKind};

use self::buffextras::Narration;
use self::clock::LogicalClock;
use self::timestamp::{FormatError, TimestampFormat};

/// Fixed bouncer identities and texts. These must match ZNC byte for byte.
pub mod protocol {
    /// Nick of the pseudo-user announcing playback.
    pub const PLAYBACK_NICK: &str = "***";
    /// Ident of the pseudo-user announcing playback.
    pub const PLAYBACK_USER: &str = "znc";
    pub const PLAYBACK_START: &str = "Buffer Playback...";
    pub const PLAYBACK_END: &str = "Playback Complete.";
    /// Sender of clock notices.
    pub const CLOCK_NICK: &str = "*communi";
    /// Sender of narrated channel events.
    pub const BUFFEXTRAS_NICK: &str = "*buffextras";
    /// Capability used to resume playback from a given second.
    pub const CAPABILITY: &str = "communi";
}

/// Read side of the filter's observable properties.
///
/// Each receiver only reports a change when the value actually changed.
#[derive(Debug, Clone)]
pub struct PlaybackStatus {
    active: watch::Receiver<bool>,
    target: watch::Receiver<Option<String>>,
    format: watch::Receiver<TimestampFormat>,
    clock: watch::Receiver<i64>,
}

impl PlaybackStatus {
    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    pub fn target(&self) -> Option<String> {
        self.target.borrow().clone()
    }

    pub fn timestamp_format(&self) -> String {
        self.format.borrow().pattern().to_string()
    }

    /// Logical clock as of the last message the filter handled.
    pub fn logical_clock(&self) -> i64 {
        *self.clock.borrow()
    }

    /// Watch `playbackActive` flips.
    pub fn active_changes(&self) -> watch::Receiver<bool> {
        self.active.clone()
    }

    /// Watch the playback target.
    pub fn target_changes(&self) -> watch::Receiver<Option<String>> {
        self.target.clone()
    }

    /// Watch the timestamp pattern.
    pub fn format_changes(&self) -> watch::Receiver<TimestampFormat> {
        self.format.clone()
    }

    pub fn clock_changes(&self) -> watch::Receiver<i64> {
        self.clock.clone()
    }
}

/// Shared write access to a filter's timestamp pattern.
///
/// Stays valid after the filter has been installed into a session; the
/// next replayed line is parsed with the new pattern.
#[derive(Debug, Clone)]
pub struct FormatHandle {
    tx: Arc<watch::Sender<TimestampFormat>>,
}

impl FormatHandle {
    fn new(format: TimestampFormat) -> Self {
        let (tx, _) = watch::channel(format);
        Self { tx: Arc::new(tx) }
    }

    pub fn pattern(&self) -> String {
        self.tx.borrow().pattern().to_string()
    }

    /// Compiled copy of the current pattern.
    pub fn current(&self) -> TimestampFormat {
        self.tx.borrow().clone()
    }

    /// Change the pattern. Returns whether it changed; an invalid pattern
    /// leaves the current one in place.
    pub fn set(&self, pattern: &str) -> Result<bool, FormatError> {
        let format = TimestampFormat::new(pattern)?;
        let changed = self.tx.send_if_modified(|current| {
            if current.pattern() == pattern {
                return false;
            }
            *current = format;
            true
        });
        if changed {
            tracing::debug!(pattern, "Timestamp format changed");
        }
        Ok(changed)
    }

    fn subscribe(&self) -> watch::Receiver<TimestampFormat> {
        self.tx.subscribe()
    }
}

/// Message filter reconstructing ZNC buffer playback.
pub struct ReplaySessionFilter {
    active: watch::Sender<bool>,
    target: watch::Sender<Option<String>>,
    /// Derived from `target` on every playback start, cleared with it.
    channel: Option<ChannelHandle>,
    clock: LogicalClock,
    clock_tx: watch::Sender<i64>,
    format: FormatHandle,
}

impl Default for ReplaySessionFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplaySessionFilter {
    pub fn new() -> Self {
        let (active, _) = watch::channel(false);
        let (target, _) = watch::channel(None);
        let (clock_tx, _) = watch::channel(0);
        Self {
            active,
            target,
            channel: None,
            clock: LogicalClock::new(),
            clock_tx,
            format: FormatHandle::new(TimestampFormat::default()),
        }
    }

    pub fn with_timestamp_format(pattern: &str) -> Result<Self, FormatError> {
        let filter = Self::new();
        filter.set_timestamp_format(pattern)?;
        Ok(filter)
    }

    /// Subscribe to the observable properties.
    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            active: self.active.subscribe(),
            target: self.target.subscribe(),
            format: self.format.subscribe(),
            clock: self.clock_tx.subscribe(),
        }
    }

    /// Handle for changing the timestamp pattern once the filter is
    /// owned by a session.
    pub fn format_handle(&self) -> FormatHandle {
        self.format.clone()
    }

    pub fn is_playback_active(&self) -> bool {
        *self.active.borrow()
    }

    pub fn playback_target(&self) -> Option<String> {
        self.target.borrow().clone()
    }

    /// Current value of the logical clock, in server seconds.
    pub fn logical_clock(&self) -> i64 {
        self.clock.seconds()
    }

    pub fn timestamp_format(&self) -> String {
        self.format.pattern()
    }

    /// Change the timestamp pattern, see [`FormatHandle::set`].
    pub fn set_timestamp_format(&self, pattern: &str) -> Result<bool, FormatError> {
        self.format.set(pattern)
    }

    fn publish_clock(&self) {
        let seconds = self.clock.seconds();
        self.clock_tx
            .send_if_modified(|current| std::mem::replace(current, seconds) != seconds);
    }

    /// Handle one inbound message.
    pub fn intercept(&mut self, message: Message, ctx: &FilterContext<'_>) -> Verdict {
        if self.clock.advance() > 0 {
            self.publish_clock();
        }

        match message.kind() {
            MessageKind::Private => {
                let sender = message.sender();
                if sender.name == protocol::PLAYBACK_NICK && sender.user == protocol::PLAYBACK_USER {
                    match message.text() {
                        protocol::PLAYBACK_START => {
                            self.begin_playback(message.target(), ctx);
                            return Verdict::Consumed;
                        }
                        protocol::PLAYBACK_END => {
                            self.end_playback();
                            return Verdict::Consumed;
                        }
                        _ => {}
                    }
                }
            }
            MessageKind::Notice if message.nick() == protocol::CLOCK_NICK => {
                match message.text().trim().parse::<i64>() {
                    Ok(seconds) => {
                        self.clock.sync(seconds);
                        self.publish_clock();
                    }
                    Err(_) => {
                        tracing::debug!(body = message.text(), "Ignoring malformed clock notice");
                    }
                }
                return Verdict::Consumed;
            }
            _ => {}
        }

        let channel = match (&self.channel, self.is_playback_active()) {
            (Some(channel), true) => channel.clone(),
            _ => return Verdict::Passthrough(message),
        };

        match message.kind() {
            MessageKind::Private => self.replay_privmsg(message, &channel),
            MessageKind::Notice => self.replay_notice(message),
            MessageKind::Other => Verdict::Passthrough(message),
        }
    }

    fn begin_playback(&mut self, target: &str, ctx: &FilterContext<'_>) {
        if self.active.send_if_modified(|active| !std::mem::replace(active, true)) {
            tracing::debug!(channel = target, "Buffer playback started");
        }
        let target = target.to_string();
        self.channel = ctx.resolve(&target);
        if self.channel.is_none() {
            tracing::debug!(channel = %target, "Playback target is not a known channel");
        }
        self.target.send_if_modified(|current| {
            if current.as_deref() == Some(target.as_str()) {
                false
            } else {
                *current = Some(target);
                true
            }
        });
    }

    fn end_playback(&mut self) {
        if self.active.send_if_modified(|active| std::mem::replace(active, false)) {
            tracing::debug!("Buffer playback complete");
        }
        self.channel = None;
        self.target.send_if_modified(|current| current.take().is_some());
    }

    /// Rewrite a replayed PRIVMSG, or turn a buffextras narration into the
    /// event it describes.
    fn replay_privmsg(&self, mut message: Message, channel: &ChannelHandle) -> Verdict {
        let format = self.format.current();
        let (ctcp, body) = Ctcp::split(message.text());
        let Some((stamp, rest)) = format.split(body) else {
            return Verdict::Passthrough(message);
        };
        let Some(time) = format.parse(stamp) else {
            tracing::trace!(stamp, "Replayed line has no parseable timestamp");
            return Verdict::Passthrough(message);
        };

        if message.nick() == protocol::BUFFEXTRAS_NICK {
            let synthetic = Narration::parse(rest, message.target())
                .and_then(|narration| buffextras::translate(&narration));
            if let Some(mut synthetic) = synthetic {
                synthetic.set_timestamp(time);
                tracing::trace!(channel = channel.name(), command = %synthetic.command, "Replaying buffextras event");
                channel.deliver(synthetic);
                return Verdict::Consumed;
            }
        }

        let text = ctcp.wrap(rest);
        message.set_text(text);
        message.set_timestamp(time);
        Verdict::Passthrough(message)
    }

    fn replay_notice(&self, mut message: Message) -> Verdict {
        let format = self.format.current();
        let (ctcp, body) = Ctcp::split(message.text());
        let Some((stamp, rest)) = format.split(body) else {
            return Verdict::Passthrough(message);
        };
        if let Some(time) = format.parse(stamp) {
            let text = ctcp.wrap(rest);
            message.set_text(text);
            message.set_timestamp(time);
        }
        Verdict::Passthrough(message)
    }
}

impl SessionFilter for ReplaySessionFilter {
    fn name(&self) -> &str {
        "znc-playback"
    }

    fn filter(&mut self, message: Message, ctx: &FilterContext<'_>) -> Verdict {
        self.intercept(message, ctx)
    }

    /// A new connection starts outside playback, with the clock stopped
    /// until the bouncer sends its time again.
    fn on_connected(&mut self) {
        self.clock.invalidate();
        self.end_playback();
    }

    fn on_capabilities(&mut self, available: &[String], requested: &mut Vec<String>) {
        if available.iter().any(|cap| cap == protocol::CAPABILITY) {
            requested.push(protocol::CAPABILITY.to_string());
            requested.push(format!("{}/{}", protocol::CAPABILITY, self.clock.seconds()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{Local, NaiveTime};

    use super::*;
    use crate::channel::{ChannelInbox, ChannelMap};

    struct Harness {
        filter: ReplaySessionFilter,
        channels: ChannelMap,
        inbox: ChannelInbox,
    }

    impl Harness {
        fn new() -> Self {
            let mut channels = ChannelMap::new();
            let inbox = channels.open("#chan").unwrap();
            Self {
                filter: ReplaySessionFilter::new(),
                channels,
                inbox,
            }
        }

        fn feed(&mut self, line: &str) -> Verdict {
            let msg = Message::parse(line).unwrap();
            let ctx = FilterContext::new(&self.channels);
            self.filter.intercept(msg, &ctx)
        }

        fn start(&mut self) {
            assert_eq!(
                self.feed(":***!znc@znc.in PRIVMSG #chan :Buffer Playback..."),
                Verdict::Consumed
            );
        }

        fn finish(&mut self) {
            assert_eq!(
                self.feed(":***!znc@znc.in PRIVMSG #chan :Playback Complete."),
                Verdict::Consumed
            );
        }
    }

    fn local_time(msg: &Message) -> NaiveTime {
        msg.timestamp().unwrap().with_timezone(&Local).time()
    }

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn sentinels_toggle_playback() {
        let mut h = Harness::new();
        assert!(!h.filter.is_playback_active());

        h.start();
        assert!(h.filter.is_playback_active());
        assert_eq!(h.filter.playback_target().as_deref(), Some("#chan"));

        h.finish();
        assert!(!h.filter.is_playback_active());
        assert_eq!(h.filter.playback_target(), None);
        assert!(h.filter.channel.is_none());
    }

    #[test]
    fn repeated_sentinel_notifies_once() {
        let mut h = Harness::new();
        let status = h.filter.status();
        let mut active = status.active_changes();
        let mut target = status.target_changes();

        h.start();
        assert!(active.has_changed().unwrap());
        assert!(*active.borrow_and_update());
        assert!(target.has_changed().unwrap());
        target.borrow_and_update();

        h.start();
        assert!(!active.has_changed().unwrap());
        assert!(!target.has_changed().unwrap());

        h.finish();
        assert!(active.has_changed().unwrap());
        assert!(!*active.borrow_and_update());
        h.finish();
        assert!(!active.has_changed().unwrap());
        assert!(!status.is_active());
    }

    #[test]
    fn sentinel_requires_znc_identity() {
        let mut h = Harness::new();
        let line = ":***!someone@evil PRIVMSG #chan :Buffer Playback...";
        assert!(matches!(h.feed(line), Verdict::Passthrough(_)));
        assert!(!h.filter.is_playback_active());
    }

    #[test]
    fn buffextras_join_is_synthesized() {
        let mut h = Harness::new();
        h.start();

        let verdict = h.feed(":*buffextras!buffextras@znc.in PRIVMSG #chan :[12:00:01] nick!user@host joined");
        assert_eq!(verdict, Verdict::Consumed);

        let join = h.inbox.try_recv().unwrap();
        assert_eq!(join.command, "JOIN");
        assert_eq!(join.prefix.as_deref(), Some("nick!user@host"));
        assert_eq!(join.params, vec!["#chan"]);
        assert_eq!(local_time(&join), hms(12, 0, 1));
    }

    #[test]
    fn buffextras_part_and_kick() {
        let mut h = Harness::new();
        h.start();

        h.feed(":*buffextras!buffextras@znc.in PRIVMSG #chan :[12:00:05] nick!user@host parted [goodbye]");
        let part = h.inbox.try_recv().unwrap();
        assert_eq!(part.command, "PART");
        assert_eq!(part.params, vec!["#chan", "goodbye"]);

        h.feed(":*buffextras!buffextras@znc.in PRIVMSG #chan :[12:00:06] nick!user@host kicked target [no reason] by");
        let kick = h.inbox.try_recv().unwrap();
        assert_eq!(kick.command, "KICK");
        assert_eq!(kick.params, vec!["#chan", "target", "no reason"]);
        assert_eq!(local_time(&kick), hms(12, 0, 6));
    }

    #[test]
    fn unknown_narration_is_rewritten() {
        let mut h = Harness::new();
        h.start();

        let verdict = h.feed(":*buffextras!buffextras@znc.in PRIVMSG #chan :[12:00:07] nick!user@host left the building");
        let Verdict::Passthrough(msg) = verdict else {
            panic!("expected passthrough");
        };
        assert_eq!(msg.text(), "nick!user@host left the building");
        assert_eq!(local_time(&msg), hms(12, 0, 7));
        assert!(h.inbox.try_recv().is_err());
    }

    #[test]
    fn replayed_chat_and_action_are_rewritten() {
        let mut h = Harness::new();
        h.start();

        let Verdict::Passthrough(msg) = h.feed(":alice!a@host PRIVMSG #chan :[09:15:00] good morning") else {
            panic!("expected passthrough");
        };
        assert_eq!(msg.target(), "#chan");
        assert_eq!(msg.text(), "good morning");
        assert_eq!(local_time(&msg), hms(9, 15, 0));

        let Verdict::Passthrough(msg) = h.feed(":alice!a@host PRIVMSG #chan :\x01ACTION [09:16:00] waves\x01") else {
            panic!("expected passthrough");
        };
        assert_eq!(msg.text(), "\x01ACTION waves\x01");
        assert_eq!(local_time(&msg), hms(9, 16, 0));
    }

    #[test]
    fn unparseable_timestamp_passes_untouched() {
        let mut h = Harness::new();
        h.start();

        let line = ":*buffextras!buffextras@znc.in PRIVMSG #chan :yesterday nick!user@host joined";
        let original = Message::parse(line).unwrap();
        assert_eq!(h.feed(line), Verdict::Passthrough(original));
        assert!(h.inbox.try_recv().is_err());
    }

    #[test]
    fn replayed_notice_is_restamped() {
        let mut h = Harness::new();
        h.start();

        let Verdict::Passthrough(msg) = h.feed(":bot!b@host NOTICE #chan :[10:00:00] deploy finished") else {
            panic!("expected passthrough");
        };
        assert_eq!(msg.text(), "deploy finished");
        assert_eq!(local_time(&msg), hms(10, 0, 0));

        let Verdict::Passthrough(msg) = h.feed(":bot!b@host NOTICE #chan :\x01[10:00:01] VERSION x\x01") else {
            panic!("expected passthrough");
        };
        assert_eq!(msg.text(), "\x01VERSION x\x01");

        // Notices from *buffextras are never turned into events.
        let verdict = h.feed(":*buffextras!b@znc.in NOTICE #chan :[10:00:02] nick!user@host joined");
        assert!(matches!(verdict, Verdict::Passthrough(_)));
        assert!(h.inbox.try_recv().is_err());
    }

    #[test]
    fn outside_playback_is_untouched() {
        let mut h = Harness::new();
        for line in [
            ":alice!a@host PRIVMSG #chan :[12:00:00] hi",
            ":*buffextras!buffextras@znc.in PRIVMSG #chan :[12:00:01] nick!user@host joined",
            ":bot!b@host NOTICE #chan :[12:00:02] note",
            ":alice!a@host JOIN #chan",
        ] {
            let original = Message::parse(line).unwrap();
            assert_eq!(h.feed(line), Verdict::Passthrough(original));
        }
        assert!(h.inbox.try_recv().is_err());
    }

    #[test]
    fn unknown_target_skips_translation() {
        let mut h = Harness::new();
        h.feed(":***!znc@znc.in PRIVMSG #elsewhere :Buffer Playback...");
        assert!(h.filter.is_playback_active());
        assert_eq!(h.filter.playback_target().as_deref(), Some("#elsewhere"));

        let line = ":*buffextras!buffextras@znc.in PRIVMSG #elsewhere :[12:00:01] nick!user@host joined";
        let original = Message::parse(line).unwrap();
        assert_eq!(h.feed(line), Verdict::Passthrough(original));
    }

    #[test]
    fn clock_notice_is_consumed() {
        let mut h = Harness::new();
        assert_eq!(h.feed(":*communi!c@znc.in NOTICE me :1700000000"), Verdict::Consumed);
        assert_eq!(h.filter.logical_clock(), 1_700_000_000);

        assert_eq!(h.feed(":*communi!c@znc.in NOTICE me :soon"), Verdict::Consumed);
        assert_eq!(h.filter.logical_clock(), 1_700_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_follows_wall_time_between_notices() {
        let mut h = Harness::new();
        h.feed(":*communi!c@znc.in NOTICE me :100");

        tokio::time::advance(Duration::from_secs(3)).await;
        h.feed(":alice!a@host PRIVMSG #chan :hi");
        assert_eq!(h.filter.logical_clock(), 103);

        // Same instant, another message: no second tick.
        h.feed(":alice!a@host PRIVMSG #chan :again");
        assert_eq!(h.filter.logical_clock(), 103);

        h.filter.on_connected();
        tokio::time::advance(Duration::from_secs(60)).await;
        h.feed(":alice!a@host PRIVMSG #chan :after reconnect");
        assert_eq!(h.filter.logical_clock(), 103);
    }

    #[test]
    fn clock_is_published_on_change() {
        let mut h = Harness::new();
        let status = h.filter.status();
        let mut clock = status.clock_changes();

        h.feed(":*communi!c@znc.in NOTICE me :500");
        assert!(clock.has_changed().unwrap());
        assert_eq!(*clock.borrow_and_update(), 500);

        h.feed(":*communi!c@znc.in NOTICE me :400");
        assert!(!clock.has_changed().unwrap());
        assert_eq!(status.logical_clock(), 500);
    }

    #[test]
    fn format_handle_reaches_running_filter() {
        let mut h = Harness::new();
        let handle = h.filter.format_handle();
        h.start();

        assert_eq!(handle.set("(HH:mm)"), Ok(true));
        assert_eq!(h.filter.timestamp_format(), "(HH:mm)");

        let Verdict::Passthrough(msg) = h.feed(":alice!a@host PRIVMSG #chan :(07:45) new pattern") else {
            panic!("expected passthrough");
        };
        assert_eq!(msg.text(), "new pattern");
        assert_eq!(local_time(&msg), hms(7, 45, 0));

        let line = ":alice!a@host PRIVMSG #chan :[07:46:00] old pattern";
        let original = Message::parse(line).unwrap();
        assert_eq!(h.feed(line), Verdict::Passthrough(original));
    }

    #[test]
    fn capability_request_carries_clock() {
        let mut h = Harness::new();
        h.feed(":*communi!c@znc.in NOTICE me :42");

        let available = vec!["multi-prefix".to_string(), "communi".to_string()];
        let mut requested = vec!["server-time".to_string()];
        h.filter.on_capabilities(&available, &mut requested);
        assert_eq!(requested, vec!["server-time", "communi", "communi/42"]);

        let mut requested = Vec::new();
        h.filter.on_capabilities(&["sasl".to_string()], &mut requested);
        assert!(requested.is_empty());
    }

    #[test]
    fn connected_resets_playback() {
        let mut h = Harness::new();
        h.start();
        h.filter.on_connected();
        assert!(!h.filter.is_playback_active());
        assert_eq!(h.filter.playback_target(), None);
    }

    #[test]
    fn timestamp_format_is_validated() {
        let filter = ReplaySessionFilter::new();
        let mut formats = filter.status().format_changes();

        assert_eq!(filter.set_timestamp_format("[hh:mm:ss]"), Ok(false));
        assert!(!formats.has_changed().unwrap());

        assert_eq!(filter.set_timestamp_format("(hh:mm)"), Ok(true));
        assert!(formats.has_changed().unwrap());
        assert_eq!(formats.borrow_and_update().pattern(), "(hh:mm)");

        assert!(filter.set_timestamp_format("'broken").is_err());
        assert_eq!(filter.timestamp_format(), "(hh:mm)");
        assert!(!formats.has_changed().unwrap());
    }

    #[test]
    fn custom_format_applies_to_replay() {
        let mut h = Harness::new();
        h.filter = ReplaySessionFilter::with_timestamp_format("yyyy-MM-dd hh:mm:ss").unwrap();
        h.start();

        let Verdict::Passthrough(msg) = h.feed(":alice!a@host PRIVMSG #chan :2024-01-02 03:04:05 hello world") else {
            panic!("expected passthrough");
        };
        assert_eq!(msg.text(), "hello world");
        let local = msg.timestamp().unwrap().with_timezone(&Local).naive_local();
        assert_eq!(local.to_string(), "2024-01-02 03:04:05");
    }
}
