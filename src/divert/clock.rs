use std::time::{Duration, Instant};

use tracing::warn;

/// A fixed-period tick clock anchored to its start time.
///
/// Tick `n` is due at `start + n * period`, so delays do not accumulate
/// drift from however long each tick took. Ticks whose slot has already
/// passed are skipped rather than run back to back.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, Instant};
/// use surplus_divert::divert::clock::TickClock;
///
/// let start = Instant::now();
/// let mut clock = TickClock::new(start, Duration::from_secs(60));
/// let wait = clock.next_delay(start + Duration::from_secs(5));
/// assert_eq!(wait, Duration::from_secs(55));
/// assert_eq!(clock.ticks(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct TickClock {
    start: Instant,
    period: Duration,
    /// Index of the next tick due.
    next: u32,
}

impl TickClock {
    /// Creates a clock whose tick 0 is at `start`.
    ///
    /// # Arguments
    ///
    /// * `start` - Instant of the first tick
    /// * `period` - Spacing between ticks (zero is treated as one second)
    pub fn new(start: Instant, period: Duration) -> Self {
        let period = if period.is_zero() {
            Duration::from_secs(1)
        } else {
            period
        };
        Self {
            start,
            period,
            next: 1,
        }
    }

    /// Returns how long to sleep from `now` until the next tick slot, and
    /// advances the clock to it.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.start);
        let periods_passed = u32::try_from(elapsed.as_nanos() / self.period.as_nanos())
            .unwrap_or(u32::MAX);
        let due = periods_passed.saturating_add(1);

        if due > self.next {
            warn!(skipped = due - self.next, "tick overran, skipping missed slots");
        }
        self.next = self.next.max(due);

        let target = self.start + self.period * self.next;
        self.next = self.next.saturating_add(1);
        target.saturating_duration_since(now)
    }

    /// Number of tick slots handed out so far.
    pub fn ticks(&self) -> u32 {
        self.next - 1
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn delays_do_not_drift() {
        let start = Instant::now();
        let mut clock = TickClock::new(start, secs(60));
        assert_eq!(clock.next_delay(start + secs(3)), secs(57));
        // Tick 1 ran late by 10 s; tick 2 is still at 120 s.
        assert_eq!(clock.next_delay(start + secs(70)), secs(50));
        assert_eq!(clock.ticks(), 2);
    }

    #[test]
    fn overrun_skips_missed_ticks() {
        let start = Instant::now();
        let mut clock = TickClock::new(start, secs(60));
        clock.next_delay(start);
        // A tick took 150 s: the 120 s slot is gone, next is 180 s.
        assert_eq!(clock.next_delay(start + secs(150)), secs(30));
        assert_eq!(clock.ticks(), 3);
    }

    #[test]
    fn zero_period_is_clamped() {
        let clock = TickClock::new(Instant::now(), Duration::ZERO);
        assert_eq!(clock.period(), secs(1));
    }
}
