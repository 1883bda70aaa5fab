//! One printed line per event.

use chrono::Local;
use replay_sdk::event::{Event, TimedEvent};
use replay_sdk::irc::Ctcp;
use replay_sdk::znc::timestamp::TimestampFormat;

/// Body of a timeline line, without the timestamp.
pub fn describe(event: &Event) -> String {
    match event {
        Event::Connected => "*** Connected".to_string(),
        Event::Registered { nick } => format!("*** Registered as {nick}"),
        Event::CapsRequested { caps } => format!("*** Requested capabilities: {}", caps.join(" ")),
        Event::Joined { channel, nick } => format!("{channel} {nick} has joined"),
        Event::Parted { channel, nick, reason } if reason.is_empty() => {
            format!("{channel} {nick} has left")
        }
        Event::Parted { channel, nick, reason } => format!("{channel} {nick} has left ({reason})"),
        Event::Message { from, target, text, .. } => match Ctcp::split(text) {
            (Ctcp::Action, action) => format!("{target} * {from} {action}"),
            (Ctcp::Other, request) => format!("{target} [CTCP {request}] from {from}"),
            (Ctcp::None, _) => format!("{target} <{from}> {text}"),
        },
        Event::Notice { from, target, text } => format!("{target} -{from}- {text}"),
        Event::Names { channel, nicks } => format!("{channel} Users: {}", nicks.join(", ")),
        Event::ModeChanged {
            channel,
            mode,
            arg,
            set_by,
        } => match arg {
            Some(a) => format!("{channel} {set_by} sets mode {mode} {a}"),
            None => format!("{channel} {set_by} sets mode {mode}"),
        },
        Event::Kicked {
            channel,
            nick,
            by,
            reason,
        } => format!("{channel} {nick} was kicked by {by} ({reason})"),
        Event::TopicChanged {
            channel,
            topic,
            set_by,
        } => match set_by {
            Some(who) => format!("{channel} {who} set topic: {topic}"),
            None => format!("{channel} Topic: {topic}"),
        },
        Event::NickChanged { old, new } => format!("{old} is now known as {new}"),
        Event::UserQuit { nick, reason } => format!("{nick} has quit ({reason})"),
        Event::Disconnected { reason } => format!("*** Disconnected: {reason}"),
        Event::RawLine(line) => format!(">> {line}"),
    }
}

/// Full timeline line, stamped in local time with `format`.
pub fn render(event: &TimedEvent, format: &TimestampFormat) -> Option<String> {
    let body = describe(&event.event);
    let stamp = format.format(&event.time.with_timezone(&Local))?;
    Some(format!("{stamp} {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone, Utc};
    use std::collections::HashMap;

    #[test]
    fn actions_are_shown_as_emotes() {
        let event = Event::Message {
            from: "alice".to_string(),
            target: "#rust".to_string(),
            text: "\x01ACTION waves\x01".to_string(),
            tags: HashMap::new(),
        };
        assert_eq!(describe(&event), "#rust * alice waves");
    }

    #[test]
    fn part_without_reason() {
        let event = Event::Parted {
            channel: "#rust".to_string(),
            nick: "bob".to_string(),
            reason: String::new(),
        };
        assert_eq!(describe(&event), "#rust bob has left");
    }

    #[test]
    fn render_uses_local_time_in_pattern() {
        let local = Local
            .from_local_datetime(
                &Utc::now()
                    .date_naive()
                    .and_time(NaiveTime::from_hms_opt(9, 5, 7).unwrap()),
            )
            .earliest()
            .unwrap();
        let event = TimedEvent::new(
            local.with_timezone(&Utc),
            Event::UserQuit {
                nick: "carol".to_string(),
                reason: "bye".to_string(),
            },
        );
        let format = TimestampFormat::new("[hh:mm:ss]").unwrap();
        assert_eq!(render(&event, &format).unwrap(), "[09:05:07] carol has quit (bye)");
    }
}
