//! TOML-based controller configuration and preset definitions.

use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveTime};
use serde::Deserialize;
use thiserror::Error;

use crate::devices::{ChargerMode, SocketMode, SwitchedSocket, TimeWindow};
use crate::divert::state::StaleTolerance;
use crate::session::{VehicleKind, VehicleProfile};

/// Top-level controller configuration parsed from TOML.
///
/// All fields have defaults. Load from TOML with
/// [`Config::from_toml_file`] or use [`Config::from_preset`] for a
/// built-in site.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Allocation headroom and hysteresis.
    #[serde(default)]
    pub divert: DivertConfig,
    /// Snapshot validation and tick pacing.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Idle charger defaults and session bookkeeping.
    #[serde(default)]
    pub charger: ChargerConfig,
    /// Vehicle SOC back-end and thresholds.
    #[serde(default)]
    pub vehicle: VehicleConfig,
    /// Relay-switched sockets, in any order.
    #[serde(default)]
    pub sockets: Vec<SocketConfig>,
    /// Dry-run site model.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Allocation headroom and hysteresis parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DivertConfig {
    /// Extra reservation for a charger waiting for export (W).
    pub waiting_for_export_penalty_watts: f64,
    /// Room left for a running charger to ramp up (W).
    pub ramp_margin_watts: f64,
    /// Reservation for an active water-heater diverter (W).
    pub diverter_headroom_watts: f64,
    /// Draw above which the diverter counts as heating (W).
    pub diverter_active_watts: f64,
    /// Surplus below which an auto-promoted charger reverts to Eco+ (W).
    pub low_power_floor_watts: f64,
    /// Consecutive short ticks before a socket is switched off.
    pub strike_count: u32,
    /// Lowest charger current (A).
    pub min_charge_amps: f64,
}

impl Default for DivertConfig {
    fn default() -> Self {
        Self {
            waiting_for_export_penalty_watts: 1000.0,
            ramp_margin_watts: 250.0,
            diverter_headroom_watts: 2000.0,
            diverter_active_watts: 50.0,
            low_power_floor_watts: 1500.0,
            strike_count: 2,
            min_charge_amps: 6.0,
        }
    }
}

/// Snapshot validation and tick pacing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Redundant readings may differ by this much (W)...
    pub stale_abs_tolerance_watts: f64,
    /// ...or by this percentage of their average.
    pub stale_pct_tolerance: f64,
    /// Seconds between ticks.
    pub tick_seconds: u64,
    /// Seconds to wait before refetching a rejected snapshot.
    pub retry_delay_seconds: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            stale_abs_tolerance_watts: 200.0,
            stale_pct_tolerance: 5.0,
            tick_seconds: 60,
            retry_delay_seconds: 5,
        }
    }
}

impl TelemetryConfig {
    pub fn tolerance(&self) -> StaleTolerance {
        StaleTolerance {
            abs_watts: self.stale_abs_tolerance_watts,
            pct: self.stale_pct_tolerance,
        }
    }
}

/// Idle charger defaults and session bookkeeping.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChargerConfig {
    /// Mode an idle charger is returned to.
    pub idle_mode: ChargerMode,
    /// Green level an idle charger is returned to (%).
    pub idle_green_level: u8,
    /// A session ends when the charger's added-charge counter regresses
    /// below this (kWh).
    pub charge_noise_floor_kwh: f64,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            idle_mode: ChargerMode::EcoPlus,
            idle_green_level: 100,
            charge_noise_floor_kwh: 1.0,
        }
    }
}

/// Vehicle SOC back-end and thresholds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VehicleConfig {
    pub kind: VehicleKind,
    /// Usable capacity (kWh); the kind's default when absent.
    pub capacity_kwh: Option<f64>,
    /// On-board charger rate (W); the kind's default when absent.
    pub charge_rate_watts: Option<f64>,
    /// Health-charge threshold (%).
    pub low_pct: f64,
    /// Stop-charge threshold (%).
    pub high_pct: f64,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            kind: VehicleKind::None,
            capacity_kwh: None,
            charge_rate_watts: None,
            low_pct: 20.0,
            high_pct: 80.0,
        }
    }
}

impl VehicleConfig {
    pub fn profile(&self) -> VehicleProfile {
        let defaults = VehicleProfile::for_kind(self.kind);
        VehicleProfile {
            capacity_kwh: self.capacity_kwh.unwrap_or(defaults.capacity_kwh),
            charge_rate_watts: self.charge_rate_watts.unwrap_or(defaults.charge_rate_watts),
            low_pct: self.low_pct,
            high_pct: self.high_pct,
            ..defaults
        }
    }
}

/// One relay-switched socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SocketConfig {
    pub name: String,
    /// Lower runs first.
    #[serde(default)]
    pub priority: u32,
    /// Expected draw before the socket has been seen running (W).
    #[serde(default)]
    pub power: f64,
    #[serde(default = "default_socket_mode")]
    pub mode: SocketMode,
    /// Hold on during the night window (00:15 for four hours).
    #[serde(default)]
    pub night: bool,
    /// Start of a daily on-window, `"HH:MM"` UTC.
    #[serde(default)]
    pub on_time: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

fn default_socket_mode() -> SocketMode {
    SocketMode::Auto
}

impl SocketConfig {
    /// Auto-mode socket without a timer.
    pub fn new(name: impl Into<String>, priority: u32, power: f64) -> Self {
        Self {
            name: name.into(),
            priority,
            power,
            mode: SocketMode::Auto,
            night: false,
            on_time: None,
            duration_minutes: None,
        }
    }

    /// The socket's daily window, if it has one.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if `on_time` is not `HH:MM` or has no
    /// duration.
    pub fn time_window(&self, index: usize) -> Result<Option<TimeWindow>, ConfigError> {
        if self.night {
            return Ok(Some(TimeWindow::night()));
        }
        let Some(on_time) = &self.on_time else {
            return Ok(None);
        };
        let start = NaiveTime::parse_from_str(on_time, "%H:%M").map_err(|e| ConfigError {
            field: format!("sockets[{index}].on_time"),
            message: format!("expected \"HH:MM\", got \"{on_time}\": {e}"),
        })?;
        let minutes = self.duration_minutes.ok_or_else(|| ConfigError {
            field: format!("sockets[{index}].duration_minutes"),
            message: "required with on_time".into(),
        })?;
        Ok(Some(TimeWindow::new(
            start,
            Duration::minutes(i64::from(minutes)),
        )))
    }

    /// Builds the runtime socket.
    pub fn build(&self, index: usize, strike_count: u32) -> Result<SwitchedSocket, ConfigError> {
        let socket = SwitchedSocket::new(&self.name, self.priority, self.power, strike_count)
            .with_mode(self.mode);
        Ok(match self.time_window(index)? {
            Some(window) => socket.with_timer(window),
            None => socket,
        })
    }
}

/// Dry-run site model parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Master random seed.
    pub seed: u64,
    /// Ticks to run (must be > 0).
    pub ticks: usize,
    /// UTC hour the dry run starts at.
    pub start_hour: u32,
    /// Peak PV output (W).
    pub solar_peak_watts: f64,
    pub sunrise_hour: f64,
    pub sunset_hour: f64,
    /// AR(1) cloud persistence (0.0-1.0).
    pub cloud_alpha: f64,
    /// AR(1) cloud innovation noise.
    pub cloud_noise_std: f64,
    /// House consumption baseline (W).
    pub house_base_watts: f64,
    /// Sinusoidal house consumption amplitude (W).
    pub house_amp_watts: f64,
    pub house_noise_std: f64,
    /// UTC hour a car plugs in; none when absent.
    pub car_arrival_hour: Option<f64>,
    pub car_initial_soc_pct: f64,
    pub charger_voltage: f64,
    /// Water-heater element rating (W); no diverter when 0.
    pub diverter_rating_watts: f64,
    /// Heat the tank absorbs before the thermostat cuts out (kWh).
    pub tank_kwh: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            ticks: 480,
            start_hour: 8,
            solar_peak_watts: 4000.0,
            sunrise_hour: 6.0,
            sunset_hour: 20.0,
            cloud_alpha: 0.9,
            cloud_noise_std: 0.15,
            house_base_watts: 400.0,
            house_amp_watts: 250.0,
            house_noise_std: 30.0,
            car_arrival_hour: Some(10.0),
            car_initial_soc_pct: 45.0,
            charger_voltage: 240.0,
            diverter_rating_watts: 3000.0,
            tank_kwh: 6.0,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"divert.strike_count"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Config {
    /// A small site: two sockets, no vehicle telemetry.
    pub fn baseline() -> Self {
        Self {
            sockets: vec![
                SocketConfig::new("dehumidifier", 1, 300.0),
                SocketConfig::new("heater", 2, 1000.0),
            ],
            ..Self::default()
        }
    }

    /// Large array, a Leaf with SOC telemetry and three sockets.
    pub fn sunny() -> Self {
        Self {
            vehicle: VehicleConfig {
                kind: VehicleKind::Leaf,
                ..VehicleConfig::default()
            },
            sockets: vec![
                SocketConfig::new("dehumidifier", 1, 300.0),
                SocketConfig::new("heater", 2, 1000.0),
                SocketConfig::new("towel-rail", 3, 500.0),
            ],
            simulation: SimulationConfig {
                solar_peak_watts: 7500.0,
                cloud_noise_std: 0.05,
                car_initial_soc_pct: 60.0,
                ..SimulationConfig::default()
            },
            ..Self::default()
        }
    }

    /// Overnight run with a night-timer socket and no car.
    pub fn night_timer() -> Self {
        Self {
            sockets: vec![
                SocketConfig {
                    night: true,
                    ..SocketConfig::new("storage-heater", 1, 2000.0)
                },
                SocketConfig::new("heater", 2, 1000.0),
            ],
            simulation: SimulationConfig {
                start_hour: 23,
                ticks: 360,
                car_arrival_hour: None,
                ..SimulationConfig::default()
            },
            ..Self::default()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["default", "sunny", "night_timer"];

    /// Loads a configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "default" => Ok(Self::baseline()),
            "sunny" => Ok(Self::sunny()),
            "night_timer" => Ok(Self::night_timer()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Builds the configured sockets.
    ///
    /// # Errors
    ///
    /// Returns the first socket whose timer does not parse.
    pub fn build_sockets(&self) -> Result<Vec<SwitchedSocket>, ConfigError> {
        self.sockets
            .iter()
            .enumerate()
            .map(|(i, s)| s.build(i, self.divert.strike_count))
            .collect()
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let d = &self.divert;
        if d.strike_count == 0 {
            errors.push(ConfigError::new("divert.strike_count", "must be > 0"));
        }
        if d.min_charge_amps <= 0.0 {
            errors.push(ConfigError::new("divert.min_charge_amps", "must be > 0"));
        }
        for (field, value) in [
            ("waiting_for_export_penalty_watts", d.waiting_for_export_penalty_watts),
            ("ramp_margin_watts", d.ramp_margin_watts),
            ("diverter_headroom_watts", d.diverter_headroom_watts),
            ("diverter_active_watts", d.diverter_active_watts),
            ("low_power_floor_watts", d.low_power_floor_watts),
        ] {
            if value < 0.0 {
                errors.push(ConfigError::new(format!("divert.{field}"), "must be >= 0"));
            }
        }

        let t = &self.telemetry;
        if t.tick_seconds == 0 {
            errors.push(ConfigError::new("telemetry.tick_seconds", "must be > 0"));
        }
        if t.stale_abs_tolerance_watts < 0.0 {
            errors.push(ConfigError::new(
                "telemetry.stale_abs_tolerance_watts",
                "must be >= 0",
            ));
        }
        if t.stale_pct_tolerance < 0.0 {
            errors.push(ConfigError::new("telemetry.stale_pct_tolerance", "must be >= 0"));
        }

        let c = &self.charger;
        if !(1..=100).contains(&c.idle_green_level) {
            errors.push(ConfigError::new(
                "charger.idle_green_level",
                "must be in [1, 100]",
            ));
        }
        if c.idle_mode == ChargerMode::Fast {
            errors.push(ConfigError::new(
                "charger.idle_mode",
                "must not be \"fast\"",
            ));
        }

        let v = &self.vehicle;
        if !(0.0..=100.0).contains(&v.low_pct) {
            errors.push(ConfigError::new("vehicle.low_pct", "must be in [0, 100]"));
        }
        if !(0.0..=100.0).contains(&v.high_pct) {
            errors.push(ConfigError::new("vehicle.high_pct", "must be in [0, 100]"));
        }
        if v.low_pct >= v.high_pct {
            errors.push(ConfigError::new("vehicle.low_pct", "must be < vehicle.high_pct"));
        }
        if v.capacity_kwh.is_some_and(|kwh| kwh <= 0.0) {
            errors.push(ConfigError::new("vehicle.capacity_kwh", "must be > 0"));
        }

        for (i, s) in self.sockets.iter().enumerate() {
            if s.name.is_empty() {
                errors.push(ConfigError::new(format!("sockets[{i}].name"), "must not be empty"));
            }
            if self.sockets[..i].iter().any(|o| o.name == s.name) {
                errors.push(ConfigError::new(
                    format!("sockets[{i}].name"),
                    format!("duplicate socket \"{}\"", s.name),
                ));
            }
            if s.power < 0.0 {
                errors.push(ConfigError::new(format!("sockets[{i}].power"), "must be >= 0"));
            }
            if s.mode == SocketMode::Timed {
                errors.push(ConfigError::new(
                    format!("sockets[{i}].mode"),
                    "must be \"auto\" or \"manual\"",
                ));
            }
            if s.night && s.on_time.is_some() {
                errors.push(ConfigError::new(
                    format!("sockets[{i}].on_time"),
                    "cannot be combined with night",
                ));
            }
            if let Err(e) = s.time_window(i) {
                errors.push(e);
            }
        }

        let sim = &self.simulation;
        if sim.ticks == 0 {
            errors.push(ConfigError::new("simulation.ticks", "must be > 0"));
        }
        if sim.start_hour > 23 {
            errors.push(ConfigError::new("simulation.start_hour", "must be in [0, 23]"));
        }
        if sim.sunrise_hour >= sim.sunset_hour {
            errors.push(ConfigError::new(
                "simulation.sunrise_hour",
                "must be < simulation.sunset_hour",
            ));
        }
        if !(0.0..=1.0).contains(&sim.cloud_alpha) {
            errors.push(ConfigError::new("simulation.cloud_alpha", "must be in [0.0, 1.0]"));
        }
        if !(0.0..=100.0).contains(&sim.car_initial_soc_pct) {
            errors.push(ConfigError::new(
                "simulation.car_initial_soc_pct",
                "must be in [0, 100]",
            ));
        }
        if sim.charger_voltage <= 0.0 {
            errors.push(ConfigError::new("simulation.charger_voltage", "must be > 0"));
        }

        errors
    }
}
