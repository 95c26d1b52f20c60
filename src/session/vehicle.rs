//! Vehicle state-of-charge back-ends.

use std::fmt;

use serde::Deserialize;

use crate::error::VehicleApiError;

/// Vehicle families with a known SOC back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleKind {
    /// No vehicle telemetry; sessions never become valid.
    #[default]
    None,
    Leaf,
    Tesla,
    Jaguar,
}

impl VehicleKind {
    /// Usable battery capacity assumed when none is configured (kWh).
    pub fn default_capacity_kwh(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Leaf => 26.0,
            Self::Tesla => 70.0,
            Self::Jaguar => 80.0,
        }
    }

    /// Typical on-board charger rate assumed when none is configured (W).
    pub fn default_charge_rate_watts(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Leaf => 6600.0,
            Self::Tesla => 7200.0,
            Self::Jaguar => 7400.0,
        }
    }
}

impl fmt::Display for VehicleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::Leaf => "Leaf",
            Self::Tesla => "Tesla",
            Self::Jaguar => "Jaguar",
        };
        f.write_str(name)
    }
}

/// Static facts about the configured vehicle plus SOC thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleProfile {
    pub kind: VehicleKind,
    pub capacity_kwh: f64,
    pub charge_rate_watts: f64,
    /// Below this SOC% the car needs a health charge.
    pub low_pct: f64,
    /// Above this SOC% charging should stop.
    pub high_pct: f64,
}

impl VehicleProfile {
    /// Profile with the kind's default capacity/rate and 20/80 thresholds.
    pub fn for_kind(kind: VehicleKind) -> Self {
        Self {
            kind,
            capacity_kwh: kind.default_capacity_kwh(),
            charge_rate_watts: kind.default_charge_rate_watts(),
            low_pct: 20.0,
            high_pct: 80.0,
        }
    }
}

/// A vehicle's SOC telemetry, selected once per session.
pub trait VehicleApi: fmt::Debug {
    fn kind(&self) -> VehicleKind;

    fn capacity_kwh(&self) -> f64;

    fn charge_rate_watts(&self) -> f64;

    /// Current state of charge in percent.
    ///
    /// `Ok(None)` means the vehicle answered without a usable reading
    /// (e.g. data too old). Errors cover timeouts and auth failures.
    fn fetch_soc(&mut self) -> Result<Option<f64>, VehicleApiError>;
}

/// Creates the SOC back-end for a new session.
pub trait VehicleConnector {
    fn connect(&self, profile: &VehicleProfile) -> Box<dyn VehicleApi>;
}

/// Back-end for sessions without vehicle telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVehicle;

impl VehicleApi for NoVehicle {
    fn kind(&self) -> VehicleKind {
        VehicleKind::None
    }

    fn capacity_kwh(&self) -> f64 {
        0.0
    }

    fn charge_rate_watts(&self) -> f64 {
        0.0
    }

    fn fetch_soc(&mut self) -> Result<Option<f64>, VehicleApiError> {
        Ok(None)
    }
}

/// Connector for sites without any vehicle integration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVehicleConnector;

impl VehicleConnector for NoVehicleConnector {
    fn connect(&self, _profile: &VehicleProfile) -> Box<dyn VehicleApi> {
        Box::new(NoVehicle)
    }
}
