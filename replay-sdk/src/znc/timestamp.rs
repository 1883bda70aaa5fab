//! Timestamp prefixes on replayed lines.
//!
//! ZNC prepends each buffered line with a timestamp rendered from its
//! `TimestampFormat` setting. Patterns use the Qt date/time syntax that
//! client settings are usually written in (`[hh:mm:ss]`, `yyyy-MM-dd hh:mm`,
//! `h:mm AP`, `'at' hh:mm`) and are compiled once into a chrono format
//! string.

use std::fmt::Write;

use chrono::format::{self, Parsed, StrftimeItems};
use chrono::{Datelike, DateTime, Days, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// ZNC's stock timestamp format.
pub const DEFAULT_PATTERN: &str = "[hh:mm:ss]";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("timestamp pattern is empty")]
    Empty,
    #[error("unterminated quote in timestamp pattern")]
    UnterminatedQuote,
    #[error("timestamp pattern has no hour field")]
    NoHour,
}

/// Where the date of a parsed timestamp came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    /// The token carried a full date.
    Parsed,
    /// Day and month were parsed, the year is the current one.
    ThisYear,
    /// No date fields, today's date.
    Today,
}

/// A compiled timestamp pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFormat {
    pattern: String,
    strftime: String,
    words: usize,
}

impl Default for TimestampFormat {
    fn default() -> Self {
        // The default pattern is known to compile.
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            strftime: "[%H:%M:%S]".to_string(),
            words: 1,
        }
    }
}

impl TimestampFormat {
    pub fn new(pattern: &str) -> Result<Self, FormatError> {
        if pattern.is_empty() {
            return Err(FormatError::Empty);
        }
        let strftime = compile(pattern)?;
        let words = pattern.matches(' ').count() + 1;
        Ok(Self {
            pattern: pattern.to_string(),
            strftime,
            words,
        })
    }

    /// The pattern as configured.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The equivalent chrono format string.
    pub fn strftime(&self) -> &str {
        &self.strftime
    }

    /// Split `line` into its timestamp token and the text after it.
    ///
    /// The token spans as many space-separated words as the pattern renders
    /// to. `None` if there is no text after the token.
    pub fn split<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        let mut end = 0;
        for _ in 0..self.words {
            let rest = &line[end..];
            let space = rest.find(' ')?;
            end += space + 1;
        }
        Some((&line[..end - 1], &line[end..]))
    }

    /// Parse a timestamp token as local time and convert it to UTC.
    ///
    /// Patterns without a full date are anchored to the current local date,
    /// see [`TimestampFormat::parse_at`].
    pub fn parse(&self, token: &str) -> Option<DateTime<Utc>> {
        let naive = self.parse_at(token, Local::now().naive_local())?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Parse a timestamp token seen at local time `now`.
    ///
    /// Replayed lines are never in the future: when the date had to be
    /// filled in and the result lands after `now`, it is moved back a day
    /// (time-only patterns) or a year (patterns without a year).
    pub fn parse_at(&self, token: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let (time, anchor) = self.anchor(token, now.date())?;
        if time <= now {
            return Some(time);
        }
        let earlier = match anchor {
            Anchor::Parsed => None,
            Anchor::Today => time.checked_sub_days(Days::new(1)),
            Anchor::ThisYear => time.with_year(time.year() - 1),
        };
        Some(earlier.unwrap_or(time))
    }

    /// Parse a timestamp token, filling the date fields the pattern does
    /// not carry from `today`.
    pub fn parse_naive(&self, token: &str, today: NaiveDate) -> Option<NaiveDateTime> {
        self.anchor(token, today).map(|(time, _)| time)
    }

    fn anchor(&self, token: &str, today: NaiveDate) -> Option<(NaiveDateTime, Anchor)> {
        let mut parsed = Parsed::new();
        format::parse(&mut parsed, token, StrftimeItems::new(&self.strftime)).ok()?;
        let time = parsed.to_naive_time().ok()?;

        if parsed.month.is_none() && parsed.day.is_none() {
            return Some((today.and_time(time), Anchor::Today));
        }
        let mut anchor = Anchor::Parsed;
        if parsed.year.is_none() && parsed.year_mod_100.is_none() {
            parsed.set_year(today.year().into()).ok()?;
            anchor = Anchor::ThisYear;
        }
        if parsed.month.is_none() {
            parsed.set_month(today.month().into()).ok()?;
        }
        if parsed.day.is_none() {
            parsed.set_day(today.day().into()).ok()?;
        }
        let date = parsed.to_naive_date().ok()?;
        Some((date.and_time(time), anchor))
    }

    /// Render `time` in this pattern.
    pub fn format<Tz>(&self, time: &DateTime<Tz>) -> Option<String>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let mut out = String::new();
        write!(out, "{}", time.format(&self.strftime)).ok()?;
        Some(out)
    }
}

/// Translate a Qt date/time pattern into a chrono format string.
fn compile(pattern: &str) -> Result<String, FormatError> {
    let chars: Vec<char> = pattern.chars().collect();
    let twelve_hour = has_meridiem(&chars);
    let mut out = String::new();
    let mut has_hour = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let run = chars[i..].iter().take_while(|&&x| x == c).count();

        match c {
            '\'' => {
                // Quoted literal text; '' stands for a single quote.
                i += 1;
                if chars.get(i) == Some(&'\'') {
                    out.push('\'');
                    i += 1;
                    continue;
                }
                loop {
                    match chars.get(i) {
                        None => return Err(FormatError::UnterminatedQuote),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            out.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(&lit) => {
                            push_literal(&mut out, lit);
                            i += 1;
                        }
                    }
                }
                continue;
            }
            'd' => {
                let (field, used) = match run {
                    1 => ("%-d", 1),
                    2 => ("%d", 2),
                    3 => ("%a", 3),
                    _ => ("%A", 4),
                };
                out.push_str(field);
                i += used;
            }
            'M' => {
                let (field, used) = match run {
                    1 => ("%-m", 1),
                    2 => ("%m", 2),
                    3 => ("%b", 3),
                    _ => ("%B", 4),
                };
                out.push_str(field);
                i += used;
            }
            'y' => {
                let (field, used) = match run {
                    1 => ("y", 1),
                    2 | 3 => ("%y", 2),
                    _ => ("%Y", 4),
                };
                out.push_str(field);
                i += used;
            }
            'h' | 'H' => {
                let twelve = c == 'h' && twelve_hour;
                let field = match (run >= 2, twelve) {
                    (false, false) => "%-H",
                    (true, false) => "%H",
                    (false, true) => "%-I",
                    (true, true) => "%I",
                };
                out.push_str(field);
                has_hour = true;
                i += run.min(2);
            }
            'm' => {
                out.push_str(if run >= 2 { "%M" } else { "%-M" });
                i += run.min(2);
            }
            's' => {
                out.push_str(if run >= 2 { "%S" } else { "%-S" });
                i += run.min(2);
            }
            'z' => {
                out.push_str("%3f");
                i += if run >= 3 { 3 } else { 1 };
            }
            'A' | 'a' => {
                out.push_str(if c == 'A' { "%p" } else { "%P" });
                let paired = if c == 'A' { 'P' } else { 'p' };
                i += if chars.get(i + 1) == Some(&paired) { 2 } else { 1 };
            }
            _ => {
                push_literal(&mut out, c);
                i += 1;
            }
        }
    }

    if !has_hour {
        return Err(FormatError::NoHour);
    }
    Ok(out)
}

/// True if an AM/PM field appears outside quoted text.
fn has_meridiem(chars: &[char]) -> bool {
    let mut quoted = false;
    for &c in chars {
        match c {
            '\'' => quoted = !quoted,
            'A' | 'a' if !quoted => return true,
            _ => {}
        }
    }
    false
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}
