//! On/off and power history for switched loads.

use chrono::{DateTime, Utc};

/// One point of the descending power envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopePoint {
    /// Power observed, in watts.
    pub power: f64,
    /// Cumulative on-time (seconds) when the power was observed.
    pub runtime: i64,
}

/// Tracks how long a switched load has been running and the highest power
/// it has sustained as a function of elapsed on-time.
///
/// The envelope is kept sorted by descending power (and ascending runtime):
/// a new sample overwrites the first entry it matches or exceeds and drops
/// everything after it, so the tail always describes the most recent,
/// lowest sustained draw.
#[derive(Debug, Clone, Default)]
pub struct LoadHistory {
    is_on: Option<bool>,
    last_change: Option<DateTime<Utc>>,
    last_record: Option<DateTime<Utc>>,
    runtime_seconds: i64,
    envelope: Vec<EnvelopePoint>,
}

impl LoadHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one observation of the load.
    ///
    /// The first call only seeds the on/off state and clocks. Runtime
    /// advances by the time since the previous observation whenever the load
    /// is (now) on. Power samples are folded into the envelope only while on.
    pub fn set_entry(&mut self, timestamp: DateTime<Utc>, is_on: bool, power: Option<f64>) {
        let Some(prev_record) = self.last_record.replace(timestamp) else {
            self.is_on = Some(is_on);
            self.last_change = Some(timestamp);
            return;
        };

        let elapsed = (timestamp - prev_record).num_seconds().max(0);

        if self.is_on != Some(is_on) {
            self.last_change = Some(timestamp);
            self.is_on = Some(is_on);
        }

        if !is_on {
            return;
        }

        self.runtime_seconds += elapsed;

        if let Some(power) = power {
            self.record_power(power);
        }
    }

    fn record_power(&mut self, power: f64) {
        let runtime = self.runtime_seconds;

        if let Some(index) = self.envelope.iter().position(|p| power >= p.power) {
            self.envelope.truncate(index);
            self.envelope.push(EnvelopePoint { power, runtime });
            return;
        }

        match self.envelope.last() {
            Some(last) if last.runtime == runtime => {}
            _ => self.envelope.push(EnvelopePoint { power, runtime }),
        }
    }

    /// Highest power in the envelope, or 0 if nothing has been recorded.
    pub fn get_max_power(&self) -> f64 {
        self.envelope.first().map_or(0.0, |p| p.power)
    }

    /// Returns `true` if the load has stayed at or below `power_threshold`
    /// for the trailing `runtime_window` seconds of on-time.
    ///
    /// The first envelope entry inside the window decides: if it is above
    /// the threshold the load drew more power recently, so it is not
    /// satisfied. No entry inside the window means not satisfied either.
    pub fn is_satisfied(&self, power_threshold: f64, runtime_window: i64) -> bool {
        self.envelope
            .iter()
            .find(|p| self.runtime_seconds - p.runtime <= runtime_window)
            .is_some_and(|p| p.power <= power_threshold)
    }

    /// Last observed on/off state, if any observation has been made.
    pub fn is_on(&self) -> Option<bool> {
        self.is_on
    }

    /// Cumulative seconds the load has been observed on.
    pub fn runtime_seconds(&self) -> i64 {
        self.runtime_seconds
    }

    /// Seconds since the on/off state last changed, as of `now`.
    pub fn seconds_since_change(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_change.map(|t| (now - t).num_seconds())
    }

    pub fn envelope(&self) -> &[EnvelopePoint] {
        &self.envelope
    }
}
