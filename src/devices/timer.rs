//! Daily on-windows for switched loads.

use chrono::{Duration, NaiveTime, Timelike};

/// A daily window `[start, start + duration]` in UTC wall-clock time.
///
/// Windows may wrap past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub duration: Duration,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, duration: Duration) -> Self {
        Self { start, duration }
    }

    /// The night window used for off-peak loads: 00:15 for four hours.
    pub fn night() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(0, 15, 0).unwrap_or(NaiveTime::MIN),
            duration: Duration::hours(4),
        }
    }

    /// Returns `true` when `now` falls inside the window, ends inclusive at
    /// minute resolution.
    pub fn contains(&self, now: NaiveTime) -> bool {
        let minute_of_day = |t: NaiveTime| i64::from(t.hour() * 60 + t.minute());
        let start = minute_of_day(self.start);
        let length = self.duration.num_minutes().clamp(0, 24 * 60);
        let offset = (minute_of_day(now) - start).rem_euclid(24 * 60);
        offset <= length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
    }

    #[test]
    fn night_window_bounds() {
        let w = TimeWindow::night();
        assert!(!w.contains(hm(0, 14)));
        assert!(w.contains(hm(0, 15)));
        assert!(w.contains(hm(2, 0)));
        assert!(w.contains(hm(4, 15)));
        assert!(!w.contains(hm(4, 16)));
        assert!(!w.contains(hm(12, 0)));
    }

    #[test]
    fn window_wraps_midnight() {
        let w = TimeWindow::new(hm(22, 30), Duration::hours(3));
        assert!(w.contains(hm(23, 0)));
        assert!(w.contains(hm(0, 30)));
        assert!(w.contains(hm(1, 30)));
        assert!(!w.contains(hm(1, 31)));
        assert!(!w.contains(hm(22, 29)));
    }
}
