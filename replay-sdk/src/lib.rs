//! ZNC playback SDK
//!
//! Client-side reconstruction of ZNC buffer playback: replayed lines are
//! turned back into timestamped IRC messages that look like live traffic.
//!
//! # Modules
//!
//! - [`irc`]: IRC message parsing/formatting
//! - [`event`]: Events emitted by a session
//! - [`filter`]: Inbound message filters and the message bus
//! - [`channel`]: Channel registry and deferred delivery
//! - [`session`]: Transport-agnostic session driving the filters
//! - [`znc`]: The playback filter, its clock and the buffextras translator

pub mod channel;
pub mod event;
pub mod filter;
pub mod irc;
pub mod session;
pub mod znc;

pub use filter::{SessionFilter, Verdict};
pub use session::{Session, SessionConfig};
pub use znc::ReplaySessionFilter;
