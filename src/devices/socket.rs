use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::history::LoadHistory;
use super::timer::TimeWindow;
use crate::energy::EnergyAccumulator;

/// Below this many watts a running socket counts as drawing nothing.
const SATISFIED_WATTS: f64 = 25.0;
/// On-time after which a low-drawing socket counts as satisfied.
const SATISFIED_WINDOW_SECS: i64 = 600;
/// On-time after which a low-drawing socket counts as idle.
const IDLE_WINDOW_SECS: i64 = 10;

/// Debounce counter for switching a marginal load off.
///
/// Each [`strike`](Self::strike) uses up one unit; the strike that exhausts the
/// counter reports that the load should be turned off and re-arms the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrikeCounter {
    initial: u32,
    remaining: u32,
}

impl StrikeCounter {
    /// Creates a counter that trips after `n` consecutive strikes (minimum 1).
    pub fn new(n: u32) -> Self {
        let n = n.max(1);
        Self {
            initial: n,
            remaining: n,
        }
    }

    /// Records one strike. Returns `true` when the counter trips.
    pub fn strike(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.remaining = self.initial;
            return true;
        }
        false
    }

    /// Re-arms the counter after the load proved viable.
    pub fn reset(&mut self) {
        self.remaining = self.initial;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }
}

/// Who decides the socket's relay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketMode {
    /// Switched by surplus allocation.
    Auto,
    /// Left alone by the engine.
    Manual,
    /// Held on by its time window; returns to `Auto` when the window ends.
    Timed,
}

/// One tick's raw reading for a switched socket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SocketReading {
    pub on: bool,
    /// Instantaneous draw, if the device has an energy meter.
    pub watts: Option<f64>,
    /// Device-reported energy used today, if available.
    pub energy_today_kwh: Option<f64>,
}

/// A relay-switched smart plug feeding a load of roughly known size.
#[derive(Debug, Clone)]
pub struct SwitchedSocket {
    pub name: String,
    pub priority: u32,
    pub mode: SocketMode,
    /// Daily window during which the socket is held on.
    pub timer: Option<TimeWindow>,
    on: bool,
    watts: f64,
    rated_watts: f64,
    has_energy_meter: bool,
    observed: bool,
    external_change: bool,
    satisfied: bool,
    strikes: StrikeCounter,
    history: LoadHistory,
    energy: EnergyAccumulator,
}

impl SwitchedSocket {
    /// Creates a socket expected to draw `rated_watts` until it has been seen
    /// drawing power.
    pub fn new(name: impl Into<String>, priority: u32, rated_watts: f64, strike_count: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            mode: SocketMode::Auto,
            timer: None,
            on: false,
            watts: 0.0,
            rated_watts: rated_watts.max(0.0),
            has_energy_meter: false,
            observed: false,
            external_change: false,
            satisfied: false,
            strikes: StrikeCounter::new(strike_count),
            history: LoadHistory::new(),
            energy: EnergyAccumulator::new(),
        }
    }

    /// Builder-style setter for the socket's time window.
    pub fn with_timer(mut self, timer: TimeWindow) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn with_mode(mut self, mode: SocketMode) -> Self {
        self.mode = mode;
        self
    }

    /// Folds this tick's reading into the socket state.
    ///
    /// A missing reading is a telemetry gap: the socket keeps its last relay
    /// state but counts as drawing nothing this tick.
    pub fn observe(&mut self, reading: Option<&SocketReading>, timestamp: DateTime<Utc>) {
        let Some(reading) = reading else {
            debug!(socket = %self.name, "no telemetry this tick, assuming zero draw");
            self.watts = 0.0;
            return;
        };

        if self.observed && reading.on != self.on {
            debug!(
                socket = %self.name,
                from = self.on,
                to = reading.on,
                "socket state changed externally"
            );
            self.external_change = true;
        }
        self.on = reading.on;

        if !self.observed {
            if let Some(kwh) = reading.energy_today_kwh {
                debug!(socket = %self.name, kwh, "seeding today's energy");
                self.energy.reset(kwh);
            }
        }
        self.observed = true;

        let Some(watts) = reading.watts else {
            self.watts = 0.0;
            self.history.set_entry(timestamp, reading.on, None);
            return;
        };

        self.has_energy_meter = true;
        self.watts = watts;
        self.energy.add_value(watts, timestamp);
        self.history.set_entry(timestamp, reading.on, Some(watts));

        let satisfied = self.is_satisfied();
        if satisfied && !self.satisfied {
            info!("Load on '{}' is satisfied", self.name);
        } else if !satisfied && self.history.is_satisfied(SATISFIED_WATTS, IDLE_WINDOW_SECS) {
            debug!(socket = %self.name, "socket load is idle");
        }
        self.satisfied = satisfied;
    }

    /// Applies an acknowledged relay command.
    pub fn set_on(&mut self, on: bool) {
        self.on = on;
        self.external_change = false;
        info!("Turned {} '{}'", if on { "on" } else { "off" }, self.name);
    }

    /// Records a strike. Returns `true` when the socket should be turned off.
    pub fn strike(&mut self) -> bool {
        let tripped = self.strikes.strike();
        info!(
            "Strike count for '{}' is {}",
            self.name,
            if tripped { 0 } else { self.strikes.remaining() }
        );
        tripped
    }

    pub fn reset_strike_count(&mut self) {
        self.strikes.reset();
    }

    pub fn strike_count(&self) -> u32 {
        self.strikes.remaining()
    }

    /// Power the socket is expected to draw when switched on.
    ///
    /// The highest draw ever seen while on wins; otherwise the rated value.
    pub fn expected_draw(&self) -> f64 {
        let seen = self.history.get_max_power();
        if seen > 0.0 { seen } else { self.rated_watts }
    }

    /// Draw measured this tick (0 when unmetered or missing).
    pub fn watts(&self) -> f64 {
        self.watts
    }

    /// Draw to account for while the socket is on: the measured value for
    /// metered sockets, the expected draw otherwise.
    pub fn known_watts(&self) -> f64 {
        if !self.on {
            0.0
        } else if self.has_energy_meter {
            self.watts
        } else {
            self.expected_draw()
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn external_change(&self) -> bool {
        self.external_change
    }

    /// Committed sockets keep their state during allocation: those held on
    /// by their time window right now and those switched on by someone else.
    ///
    /// A socket with a window is divertable like any other outside it.
    pub fn is_committed(&self) -> bool {
        self.mode == SocketMode::Timed || (self.external_change && self.on)
    }

    pub fn is_satisfied(&self) -> bool {
        self.history.is_satisfied(SATISFIED_WATTS, SATISFIED_WINDOW_SECS)
    }

    pub fn history(&self) -> &LoadHistory {
        &self.history
    }

    /// Energy used today, or 0 for unmetered sockets.
    pub fn todays_kwh(&self) -> f64 {
        if self.has_energy_meter { self.energy.kwh() } else { 0.0 }
    }

    pub fn reset_day(&mut self) {
        self.energy.reset(0.0);
    }
}

impl fmt::Display for SwitchedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.on { "On" } else { "Off" };
        if self.has_energy_meter {
            write!(
                f,
                "Device '{}' {} {:.0} Watts ({:.2}kWh today)",
                self.name,
                state,
                self.watts,
                self.todays_kwh()
            )
        } else {
            write!(f, "Device '{}' {}", self.name, state)
        }
    }
}
