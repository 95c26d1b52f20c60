use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::session::{SessionFactory, SessionInput, SessionTracker};

/// Charging mode selected on the charger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ChargerMode {
    /// Full rate regardless of surplus.
    #[serde(rename = "fast")]
    Fast,
    /// Surplus plus grid top-up to the minimum charge rate.
    #[serde(rename = "eco")]
    Eco,
    /// Surplus only.
    #[serde(rename = "eco+")]
    EcoPlus,
    #[serde(rename = "stop")]
    Stop,
}

impl fmt::Display for ChargerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fast => "Fast",
            Self::Eco => "Eco",
            Self::EcoPlus => "Eco+",
            Self::Stop => "Stop",
        };
        f.write_str(name)
    }
}

/// Status reported by the charger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargerStatus {
    Starting,
    WaitingForExport,
    Dsr,
    Diverting,
    Boosting,
    /// Car connected but no longer accepting charge.
    Hot,
}

/// One tick's raw reading for an EV charger.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargerReading {
    pub id: String,
    pub priority: u32,
    pub mode: ChargerMode,
    pub status: ChargerStatus,
    pub charge_rate_watts: f64,
    pub min_green_level_pct: u8,
    pub voltage: f64,
    pub car_connected: bool,
    /// Charger's own counter of energy added this session.
    pub charge_added_kwh: f64,
}

/// An EV charger under divert control.
///
/// Holds the last observed telemetry and the SOC session for whatever car is
/// plugged in.
#[derive(Debug)]
pub struct EvCharger {
    pub id: String,
    pub priority: u32,
    mode: ChargerMode,
    status: ChargerStatus,
    charge_rate_watts: f64,
    min_green_level_pct: u8,
    voltage: f64,
    car_connected: bool,
    charge_added_kwh: f64,
    last_seen: Option<DateTime<Utc>>,
    /// Lowest current the charger will run at (A).
    min_charge_amps: f64,
    session: SessionTracker,
}

impl EvCharger {
    /// Creates a charger from its first reading.
    ///
    /// # Arguments
    ///
    /// * `reading` - Telemetry the charger was discovered with
    /// * `min_charge_amps` - Lowest current the charger can run at
    pub fn from_reading(reading: &ChargerReading, min_charge_amps: f64) -> Self {
        Self {
            id: reading.id.clone(),
            priority: reading.priority,
            mode: reading.mode,
            status: reading.status,
            charge_rate_watts: reading.charge_rate_watts,
            min_green_level_pct: reading.min_green_level_pct,
            voltage: reading.voltage,
            car_connected: reading.car_connected,
            charge_added_kwh: reading.charge_added_kwh,
            last_seen: None,
            min_charge_amps,
            session: SessionTracker::new(),
        }
    }

    /// Folds this tick's reading into the charger.
    ///
    /// Seeing the charger in `Stop` releases the session's stop latch.
    pub fn observe(&mut self, reading: &ChargerReading, timestamp: DateTime<Utc>) {
        self.priority = reading.priority;
        self.mode = reading.mode;
        self.status = reading.status;
        self.charge_rate_watts = reading.charge_rate_watts;
        self.min_green_level_pct = reading.min_green_level_pct;
        self.voltage = reading.voltage;
        self.car_connected = reading.car_connected;
        self.charge_added_kwh = reading.charge_added_kwh;
        self.last_seen = Some(timestamp);

        if self.mode == ChargerMode::Stop {
            if let Some(session) = self.session.session_mut() {
                if session.is_stop_latched() {
                    debug!(charger = %self.id, "charger stopped, clearing stop latch");
                    session.clear_stop_latch();
                }
            }
        }
    }

    /// Missing telemetry this tick: keep the last state, assume no draw.
    pub fn mark_missing(&mut self) {
        debug!(charger = %self.id, "no telemetry this tick, assuming zero draw");
        self.charge_rate_watts = 0.0;
    }

    /// Feeds this tick's charge into the session, creating or ending it as
    /// the car comes and goes.
    pub fn update_session(
        &mut self,
        factory: &SessionFactory,
        other_valid_session: bool,
        noise_floor_kwh: f64,
        timestamp: DateTime<Utc>,
    ) {
        let input = SessionInput {
            car_connected: self.car_connected,
            charge_added_kwh: self.charge_added_kwh,
            charge_rate_watts: self.charge_rate_watts,
            timestamp,
        };
        self.session
            .update(&input, factory, other_valid_session, noise_floor_kwh);
    }

    /// Lowest power the charger will draw once it starts, given the supply
    /// voltage and the configured green level.
    pub fn min_green_level_rate(&self) -> f64 {
        (self.voltage * self.min_charge_amps * f64::from(self.min_green_level_pct) / 100.0).floor()
    }

    /// Connected and waiting for surplus before it can start.
    pub fn waiting_for_export(&self) -> bool {
        self.car_connected && self.status == ChargerStatus::WaitingForExport
    }

    /// Nothing to charge: no car, or the car is full.
    pub fn is_idle(&self) -> bool {
        !self.car_connected || self.status == ChargerStatus::Hot
    }

    /// Eligible for surplus allocation this tick.
    pub fn is_divert_candidate(&self) -> bool {
        self.car_connected && self.status != ChargerStatus::Hot && self.mode != ChargerMode::Fast
    }

    /// Applies an acknowledged mode change.
    pub fn set_mode(&mut self, mode: ChargerMode) {
        info!("Charger '{}' mode {} -> {}", self.id, self.mode, mode);
        self.mode = mode;
    }

    /// Applies an acknowledged green level change.
    pub fn set_green_level(&mut self, percent: u8) {
        info!(
            "Charger '{}' green level {}% -> {}%",
            self.id, self.min_green_level_pct, percent
        );
        self.min_green_level_pct = percent;
    }

    pub fn mode(&self) -> ChargerMode {
        self.mode
    }

    pub fn status(&self) -> ChargerStatus {
        self.status
    }

    pub fn charge_rate_watts(&self) -> f64 {
        self.charge_rate_watts
    }

    pub fn min_green_level_pct(&self) -> u8 {
        self.min_green_level_pct
    }

    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    pub fn car_connected(&self) -> bool {
        self.car_connected
    }

    pub fn charge_added_kwh(&self) -> f64 {
        self.charge_added_kwh
    }

    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionTracker {
        &mut self.session
    }
}

impl fmt::Display for EvCharger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Charger '{}' {} {:?} {:.0} Watts",
            self.id, self.mode, self.status, self.charge_rate_watts
        )?;
        if let Some(pct) = self.session.session().and_then(|s| s.estimated_soc_pct()) {
            write!(f, " (SOC {pct:.0}%)")?;
        }
        Ok(())
    }
}
