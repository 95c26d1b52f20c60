//! Per-tick site snapshot and its consistency checks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::devices::{ChargerReading, SocketReading};
use crate::error::TelemetryError;

/// How far two readings of the same quantity may disagree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaleTolerance {
    pub abs_watts: f64,
    /// Percent of the two readings' average.
    pub pct: f64,
}

impl Default for StaleTolerance {
    fn default() -> Self {
        Self {
            abs_watts: 200.0,
            pct: 5.0,
        }
    }
}

/// Two independently metered readings of the same quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossCheck {
    /// `generation`, `house`, `grid`, or an unmanaged load name.
    pub quantity: String,
    pub primary: f64,
    pub secondary: f64,
}

impl CrossCheck {
    /// Value to use for the quantity: the reading itself when both agree,
    /// their average when they differ within tolerance.
    ///
    /// Readings that differ by more than the absolute tolerance *and* the
    /// percentage tolerance mean one meter is lagging; the snapshot is stale.
    pub fn resolve(&self, tolerance: &StaleTolerance) -> Result<f64, TelemetryError> {
        let (a, b) = (self.primary, self.secondary);
        if a == b {
            return Ok(a);
        }

        let diff = (a - b).abs();
        let average = (a + b) / 2.0;
        let over_pct = if average == 0.0 {
            true
        } else {
            diff / average.abs() * 100.0 > tolerance.pct
        };

        if diff > tolerance.abs_watts && over_pct {
            warn!(
                quantity = %self.quantity,
                primary = a,
                secondary = b,
                "readings disagree beyond tolerance"
            );
            return Err(TelemetryError::StaleData {
                quantity: self.quantity.clone(),
                primary: a,
                secondary: b,
            });
        }
        debug!(quantity = %self.quantity, a, b, average, "using averaged reading");
        Ok(average)
    }
}

/// One consistent snapshot of the site, as fetched at the start of a tick.
#[derive(Debug, Clone)]
pub struct State {
    pub timestamp: DateTime<Utc>,
    pub generation_watts: f64,
    /// Consumption not accounted to any load the engine knows about.
    pub house_watts: f64,
    /// Grid import (+) / export (-), when metered.
    pub grid_watts: Option<f64>,
    /// Metered loads the engine cannot control.
    pub unmanaged: BTreeMap<String, f64>,
    /// Relay sockets by name. A socket absent here has a telemetry gap.
    pub switches: BTreeMap<String, SocketReading>,
    pub chargers: Vec<ChargerReading>,
    /// The diverter, if the site has one: `(name, draw)`.
    pub diverter: Option<(String, Option<f64>)>,
    pub cross_checks: Vec<CrossCheck>,
}

impl State {
    /// Empty snapshot at `timestamp`.
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            generation_watts: 0.0,
            house_watts: 0.0,
            grid_watts: None,
            unmanaged: BTreeMap::new(),
            switches: BTreeMap::new(),
            chargers: Vec::new(),
            diverter: None,
            cross_checks: Vec::new(),
        }
    }

    /// Checks the snapshot is usable and folds cross-checked readings into
    /// the quantities they measure.
    ///
    /// Nothing is modified when an error is returned.
    pub fn validate(&mut self, tolerance: &StaleTolerance) -> Result<(), TelemetryError> {
        if let Some(charger) = self.chargers.iter().find(|c| c.voltage == 0.0) {
            return Err(TelemetryError::Bogus(format!(
                "charger {} reports 0 V supply",
                charger.id
            )));
        }

        let resolved = self
            .cross_checks
            .iter()
            .map(|check| Ok((check.quantity.clone(), check.resolve(tolerance)?)))
            .collect::<Result<Vec<_>, TelemetryError>>()?;

        for (quantity, value) in resolved {
            match quantity.as_str() {
                "generation" => self.generation_watts = value,
                "house" => self.house_watts = value,
                "grid" => self.grid_watts = Some(value),
                _ => {
                    self.unmanaged.insert(quantity, value);
                }
            }
        }
        Ok(())
    }

    /// Generation minus house consumption.
    pub fn surplus_watts(&self) -> f64 {
        self.generation_watts - self.house_watts
    }

    pub fn diverter_watts(&self) -> Option<f64> {
        self.diverter.as_ref().and_then(|(_, w)| *w)
    }
}

/// Which load a slot in the allocation order refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadRef {
    /// Index into the site's sockets; kept on, never toggled this tick.
    Committed(usize),
    Diverter,
    /// Index into the site's chargers.
    Charger(usize),
    /// Index into the site's sockets.
    Socket(usize),
}

/// Ephemeral per-tick allocation state.
#[derive(Debug, Clone, PartialEq)]
pub struct DivertState {
    pub generation_watts: f64,
    pub house_watts: f64,
    /// Surplus after fast chargers, before the walk.
    pub surplus_watts: f64,
    pub order: Vec<LoadRef>,
}
