//! Logical clock shared with the bouncer.
//!
//! The bouncer periodically tells us its current epoch second; between
//! updates the clock is advanced from a local ticker. The value is what we
//! hand back at connect time so playback resumes where we left off.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct LogicalClock {
    seconds: i64,
    /// Start of the not-yet-counted interval. `None` while disconnected.
    ticker: Option<Instant>,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known server second, plus any local ticks applied so far.
    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    /// Fold whole seconds elapsed on the ticker into the clock.
    ///
    /// Only runs once the clock has been synchronized. The sub-second
    /// remainder stays on the ticker, so calling this for every message
    /// never counts the same second twice. Returns the seconds added.
    pub fn advance(&mut self) -> i64 {
        let Some(start) = self.ticker else {
            return 0;
        };
        if self.seconds <= 0 {
            return 0;
        }
        let elapsed = start.elapsed().as_secs();
        if elapsed == 0 {
            return 0;
        }
        let ticks = i64::try_from(elapsed).unwrap_or(i64::MAX);
        self.seconds = self.seconds.saturating_add(ticks);
        self.ticker = Some(start + Duration::from_secs(elapsed));
        ticks
    }

    /// Take a server-supplied value and restart the ticker.
    ///
    /// The clock never moves backwards: a value below the current one only
    /// restarts the ticker.
    pub fn sync(&mut self, seconds: i64) {
        if seconds < self.seconds {
            tracing::debug!(
                current = self.seconds,
                received = seconds,
                "Ignoring clock update older than local clock"
            );
        }
        self.seconds = self.seconds.max(seconds);
        self.ticker = Some(Instant::now());
    }

    /// Stop ticking until the next sync.
    pub fn invalidate(&mut self) {
        self.ticker = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn advances_in_whole_seconds() {
        let mut clock = LogicalClock::new();
        clock.sync(1_000);

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.seconds(), 1_001);

        // The half second left over is not lost.
        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.seconds(), 1_002);

        assert_eq!(clock.advance(), 0);
        assert_eq!(clock.seconds(), 1_002);
    }

    #[tokio::test(start_paused = true)]
    async fn unsynchronized_clock_stays_put() {
        let mut clock = LogicalClock::new();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(clock.advance(), 0);
        assert_eq!(clock.seconds(), 0);
        assert!(!clock.is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_stops_ticking() {
        let mut clock = LogicalClock::new();
        clock.sync(10);
        clock.invalidate();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(clock.advance(), 0);
        assert_eq!(clock.seconds(), 10);

        clock.sync(10);
        tokio::time::advance(Duration::from_secs(3)).await;
        clock.advance();
        assert_eq!(clock.seconds(), 13);
    }

    #[test]
    fn sync_never_moves_backwards() {
        let mut clock = LogicalClock::new();
        let mut last = clock.seconds();
        for value in [50, 20, 70, -5, 70, 69, 1_000] {
            clock.sync(value);
            assert!(clock.seconds() >= last);
            last = clock.seconds();
        }
        assert_eq!(clock.seconds(), 1_000);
    }
}
