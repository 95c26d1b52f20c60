//! Time-integrated energy accounting.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Watt-seconds in one kilowatt-hour.
pub const WATT_SECONDS_PER_KWH: f64 = 3_600_000.0;

/// Integrates instantaneous power samples into cumulative energy.
///
/// Positive and negative power are integrated into separate totals, so an
/// import/export reading yields both directions independently. Samples may
/// arrive at irregular intervals; each sample's power is applied over the
/// time elapsed since the previous sample.
///
/// Both totals are monotonically non-decreasing between resets.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use surplus_divert::energy::EnergyAccumulator;
///
/// let mut acc = EnergyAccumulator::new();
/// let t0 = Utc.timestamp_opt(0, 0).unwrap();
/// let t1 = Utc.timestamp_opt(3600, 0).unwrap();
/// acc.add_value(1000.0, t0);
/// acc.add_value(1000.0, t1);
/// assert!((acc.kwh() - 1.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EnergyAccumulator {
    positive_total: f64,
    negative_total: f64,
    last_sample_time: Option<DateTime<Utc>>,
}

impl EnergyAccumulator {
    /// Creates an empty accumulator. The first sample only seeds the clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a power sample (watts) taken at `timestamp`.
    ///
    /// The first sample after construction or [`reset`](Self::reset) seeds the
    /// sample clock without integrating anything. A timestamp that does not
    /// advance re-seeds the clock and integrates nothing.
    pub fn add_value(&mut self, power: f64, timestamp: DateTime<Utc>) {
        let Some(last) = self.last_sample_time.replace(timestamp) else {
            debug!(%timestamp, "seeding accumulator start time");
            return;
        };

        let elapsed = (timestamp - last).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return;
        }

        if power > 0.0 {
            self.positive_total += power * elapsed;
        } else {
            self.negative_total += -power * elapsed;
        }
    }

    /// Positive energy integrated so far, in kWh.
    pub fn kwh(&self) -> f64 {
        self.positive_total / WATT_SECONDS_PER_KWH
    }

    /// Negative energy integrated so far, as a positive magnitude in kWh.
    pub fn neg_kwh(&self) -> f64 {
        self.negative_total / WATT_SECONDS_PER_KWH
    }

    /// Resets the totals, seeding the positive total with `baseline_kwh`.
    ///
    /// The next [`add_value`](Self::add_value) re-seeds the sample clock so no
    /// spurious interval spanning the reset is integrated.
    pub fn reset(&mut self, baseline_kwh: f64) {
        self.positive_total = baseline_kwh * WATT_SECONDS_PER_KWH;
        self.negative_total = 0.0;
        self.last_sample_time = None;
    }

    /// Returns `true` once a sample has seeded the clock since the last reset.
    pub fn is_initialized(&self) -> bool {
        self.last_sample_time.is_some()
    }
}

impl fmt::Display for EnergyAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative_total > 0.0 {
            write!(f, "{:.3}kWh -{:.3}kWh", self.kwh(), self.neg_kwh())
        } else {
            write!(f, "{:.3}kWh", self.kwh())
        }
    }
}

/// Daily per-reading energy totals (generation, house, grid, ...).
///
/// Entries are created on first sight of a reading name and cleared together
/// at day rollover.
#[derive(Debug, Clone, Default)]
pub struct EnergyLedger {
    entries: BTreeMap<String, EnergyAccumulator>,
}

impl EnergyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one reading into its named accumulator.
    pub fn record(&mut self, name: &str, watts: f64, timestamp: DateTime<Utc>) {
        self.entries
            .entry(name.to_string())
            .or_default()
            .add_value(watts, timestamp);
    }

    pub fn get(&self, name: &str) -> Option<&EnergyAccumulator> {
        self.entries.get(name)
    }

    /// Resets every entry to zero for a new day.
    pub fn reset_day(&mut self) {
        for acc in self.entries.values_mut() {
            acc.reset(0.0);
        }
    }

    /// Logs every running total.
    pub fn log_totals(&self) {
        for (name, acc) in &self.entries {
            info!("Total for {name} is {acc}");
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EnergyAccumulator)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }

    #[test]
    fn first_sample_only_seeds() {
        let mut acc = EnergyAccumulator::new();
        acc.add_value(5000.0, ts(100));
        assert_eq!(acc.kwh(), 0.0);
        assert!(acc.is_initialized());
    }

    #[test]
    fn constant_power_integrates_linearly() {
        let mut acc = EnergyAccumulator::new();
        let times = [0, 7, 60, 61, 300, 1800, 3600];
        for t in times {
            acc.add_value(2400.0, ts(t));
        }
        let expected = 2400.0 * 3600.0 / WATT_SECONDS_PER_KWH;
        assert!((acc.kwh() - expected).abs() < 1e-9);
    }

    #[test]
    fn sample_power_applies_to_preceding_interval() {
        let mut acc = EnergyAccumulator::new();
        acc.add_value(0.0, ts(0));
        acc.add_value(3600.0, ts(1000));
        acc.add_value(0.0, ts(2000));
        assert!((acc.kwh() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn negative_power_only_affects_neg_kwh() {
        let mut acc = EnergyAccumulator::new();
        acc.add_value(-1800.0, ts(0));
        acc.add_value(-1800.0, ts(1000));
        acc.add_value(-1800.0, ts(2000));
        assert_eq!(acc.kwh(), 0.0);
        assert!((acc.neg_kwh() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn reset_sets_baseline_exactly() {
        let mut acc = EnergyAccumulator::new();
        acc.add_value(1000.0, ts(0));
        acc.add_value(1000.0, ts(60));
        acc.reset(2.5);
        assert_eq!(acc.kwh(), 2.5);
        assert_eq!(acc.neg_kwh(), 0.0);
        assert!(!acc.is_initialized());
    }

    #[test]
    fn reset_does_not_integrate_across_gap() {
        let mut acc = EnergyAccumulator::new();
        acc.add_value(1000.0, ts(0));
        acc.reset(1.0);
        // A long gap after reset must only seed, not integrate.
        acc.add_value(3600.0, ts(86_400));
        assert_eq!(acc.kwh(), 1.0);
        acc.add_value(3600.0, ts(86_400 + 1000));
        assert!((acc.kwh() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn backwards_timestamp_integrates_nothing() {
        let mut acc = EnergyAccumulator::new();
        acc.add_value(1000.0, ts(100));
        acc.add_value(1000.0, ts(50));
        assert_eq!(acc.kwh(), 0.0);
        acc.add_value(3600.0, ts(1050));
        assert!((acc.kwh() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn display_shows_negative_only_when_present() {
        let mut acc = EnergyAccumulator::new();
        acc.reset(1.5);
        assert_eq!(acc.to_string(), "1.500kWh");
        acc.add_value(-3600.0, ts(0));
        acc.add_value(-3600.0, ts(1000));
        assert_eq!(acc.to_string(), "1.500kWh -1.000kWh");
    }

    #[test]
    fn ledger_resets_all_entries() {
        let mut ledger = EnergyLedger::new();
        ledger.record("Generation", 3000.0, ts(0));
        ledger.record("Generation", 3000.0, ts(1200));
        ledger.record("Grid", -500.0, ts(0));
        ledger.record("Grid", -500.0, ts(1200));
        assert!(ledger.get("Generation").map(EnergyAccumulator::kwh).unwrap_or(0.0) > 0.0);

        ledger.reset_day();
        for (_, acc) in ledger.iter() {
            assert_eq!(acc.kwh(), 0.0);
            assert_eq!(acc.neg_kwh(), 0.0);
        }
    }
}
