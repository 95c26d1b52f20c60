//! A modelled household for dry runs.
//!
//! [`SimulatedSite`] stands in for every external boundary at once: it serves
//! snapshots, acknowledges commands and answers SOC queries, all from one
//! shared model that advances a fixed step per snapshot.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, trace};

use super::profile::{HouseProfile, SolarProfile, gaussian_noise};
use crate::command::{Command, CommandSink};
use crate::config::Config;
use crate::devices::{ChargerMode, ChargerReading, ChargerStatus, SocketReading};
use crate::divert::{CrossCheck, State};
use crate::error::{CommandError, TelemetryError, VehicleApiError};
use crate::runner::StateSource;
use crate::session::{VehicleApi, VehicleConnector, VehicleKind, VehicleProfile};

/// Name the modelled charger reports under.
pub const CHARGER_ID: &str = "zappi";
/// Name the modelled water-heater diverter reports under.
pub const DIVERTER_ID: &str = "eddi";

/// Noise on the secondary generation meter (W).
const METER_NOISE_STD: f64 = 20.0;
/// Capacity assumed for a car whose kind has no known battery (kWh).
const FALLBACK_CAPACITY_KWH: f64 = 40.0;
/// Highest current the modelled charger supplies (A).
const MAX_CHARGE_AMPS: f64 = 32.0;

#[derive(Debug, Clone, Copy)]
struct SimSocket {
    on: bool,
    rated_watts: f64,
}

#[derive(Debug, Clone)]
struct SimCharger {
    mode: ChargerMode,
    status: ChargerStatus,
    green_level_pct: u8,
    voltage: f64,
    min_charge_amps: f64,
    rate_watts: f64,
    added_kwh: f64,
    arrives_at: Option<DateTime<Utc>>,
    connected: bool,
    soc_pct: f64,
    capacity_kwh: f64,
    max_rate_watts: f64,
}

impl SimCharger {
    fn min_rate(&self) -> f64 {
        self.voltage * self.min_charge_amps
    }

    /// Chooses this step's rate from the power left over after the house and
    /// the sockets, the way the charger's own mode logic would.
    fn settle(&mut self, available: f64, now: DateTime<Utc>) {
        if !self.connected && self.arrives_at.is_some_and(|t| now >= t) {
            debug!(soc = self.soc_pct, "car plugged in");
            self.connected = true;
            self.added_kwh = 0.0;
        }

        let min_rate = self.min_rate();
        let (rate, status) = if !self.connected {
            (0.0, ChargerStatus::Starting)
        } else if self.soc_pct >= 100.0 {
            (0.0, ChargerStatus::Hot)
        } else {
            match self.mode {
                ChargerMode::Stop => (0.0, ChargerStatus::Starting),
                ChargerMode::Fast => (self.max_rate_watts, ChargerStatus::Boosting),
                ChargerMode::Eco => (
                    available.clamp(min_rate, self.max_rate_watts),
                    ChargerStatus::Diverting,
                ),
                ChargerMode::EcoPlus => {
                    let threshold = min_rate * f64::from(self.green_level_pct) / 100.0;
                    if available >= threshold {
                        (
                            available.clamp(min_rate, self.max_rate_watts),
                            ChargerStatus::Diverting,
                        )
                    } else {
                        (0.0, ChargerStatus::WaitingForExport)
                    }
                }
            }
        };
        self.rate_watts = rate;
        self.status = status;
    }

    fn charge(&mut self, hours: f64) {
        if self.rate_watts <= 0.0 {
            return;
        }
        let kwh = self.rate_watts * hours / 1000.0;
        self.added_kwh += kwh;
        self.soc_pct = (self.soc_pct + kwh / self.capacity_kwh * 100.0).min(100.0);
    }

    fn reading(&self) -> ChargerReading {
        ChargerReading {
            id: CHARGER_ID.into(),
            priority: 0,
            mode: self.mode,
            status: self.status,
            charge_rate_watts: self.rate_watts,
            min_green_level_pct: self.green_level_pct,
            voltage: self.voltage,
            car_connected: self.connected,
            charge_added_kwh: self.added_kwh,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SimDiverter {
    rating_watts: f64,
    tank_kwh: f64,
    stored_kwh: f64,
    draw_watts: f64,
}

impl SimDiverter {
    fn settle(&mut self, available: f64, hours: f64) {
        self.draw_watts = if self.stored_kwh >= self.tank_kwh {
            0.0
        } else {
            available.clamp(0.0, self.rating_watts)
        };
        self.stored_kwh = (self.stored_kwh + self.draw_watts * hours / 1000.0).min(self.tank_kwh);
    }
}

#[derive(Debug)]
struct SiteModel {
    now: DateTime<Utc>,
    step: Duration,
    started: bool,
    solar: SolarProfile,
    house: HouseProfile,
    meter_rng: StdRng,
    sockets: BTreeMap<String, SimSocket>,
    charger: SimCharger,
    diverter: Option<SimDiverter>,
}

impl SiteModel {
    fn hour(&self) -> f64 {
        f64::from(self.now.hour()) + f64::from(self.now.minute()) / 60.0
    }

    fn advance(&mut self) -> State {
        if self.started {
            self.now += self.step;
            if self.now.hour() == 0 && self.now.minute() < self.step_minutes() {
                if let Some(d) = self.diverter.as_mut() {
                    d.stored_kwh = 0.0;
                }
            }
        }
        self.started = true;

        let hours = self.step.num_seconds() as f64 / 3600.0;
        let hour = self.hour();
        let generation = self.solar.watts(hour);
        let house = self.house.watts(hour);
        let sockets: f64 = self
            .sockets
            .values()
            .filter(|s| s.on)
            .map(|s| s.rated_watts)
            .sum();

        let available = generation - house - sockets;
        self.charger.settle(available, self.now);
        self.charger.charge(hours);
        let mut controlled = sockets + self.charger.rate_watts;
        if let Some(d) = self.diverter.as_mut() {
            d.settle(available - self.charger.rate_watts, hours);
            controlled += d.draw_watts;
        }

        let mut state = State::new(self.now);
        state.generation_watts = generation;
        state.house_watts = house;
        state.grid_watts = Some(house + controlled - generation);
        state.cross_checks.push(CrossCheck {
            quantity: "generation".into(),
            primary: generation,
            secondary: (generation + gaussian_noise(&mut self.meter_rng, METER_NOISE_STD))
                .max(0.0),
        });
        for (name, socket) in &self.sockets {
            state.switches.insert(
                name.clone(),
                SocketReading {
                    on: socket.on,
                    watts: Some(if socket.on { socket.rated_watts } else { 0.0 }),
                    energy_today_kwh: None,
                },
            );
        }
        state.chargers.push(self.charger.reading());
        state.diverter = self
            .diverter
            .map(|d| (DIVERTER_ID.to_string(), Some(d.draw_watts)));

        trace!(
            generation,
            house,
            soc = self.charger.soc_pct,
            "simulated snapshot"
        );
        state
    }

    fn step_minutes(&self) -> u32 {
        u32::try_from(self.step.num_minutes()).unwrap_or(u32::MAX).max(1)
    }

    fn apply(&mut self, command: &Command) -> Result<(), CommandError> {
        let unreachable = |target: &str| CommandError::Unreachable {
            target: target.to_string(),
            reason: "no such device".into(),
        };
        match command {
            Command::TurnOn { load } | Command::TurnOff { load } => {
                let socket = self.sockets.get_mut(load).ok_or_else(|| unreachable(load))?;
                socket.on = matches!(command, Command::TurnOn { .. });
            }
            Command::SetMode { charger, mode } => {
                if charger != CHARGER_ID {
                    return Err(unreachable(charger));
                }
                self.charger.mode = *mode;
            }
            Command::SetGreenLevel { charger, percent } => {
                if charger != CHARGER_ID {
                    return Err(unreachable(charger));
                }
                self.charger.green_level_pct = *percent;
            }
        }
        Ok(())
    }
}

/// Shared handle to a modelled site.
///
/// Clones share the same model, so one clone can serve snapshots while
/// another receives commands.
#[derive(Clone)]
pub struct SimulatedSite {
    model: Rc<RefCell<SiteModel>>,
}

impl SimulatedSite {
    /// Builds the model from the configuration's simulation, socket,
    /// vehicle and tick settings.
    pub fn new(config: &Config) -> Self {
        let sim = &config.simulation;
        let start_date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap_or_default();
        let midnight = Utc.from_utc_datetime(&start_date.and_hms_opt(0, 0, 0).unwrap_or_default());
        let now = midnight + Duration::hours(i64::from(sim.start_hour % 24));

        let arrives_at = sim.car_arrival_hour.map(|h| {
            let at = midnight + Duration::minutes((h * 60.0).round() as i64);
            if at < now { at + Duration::days(1) } else { at }
        });

        let profile = config.vehicle.profile();
        let capacity_kwh = if profile.capacity_kwh > 0.0 {
            profile.capacity_kwh
        } else {
            FALLBACK_CAPACITY_KWH
        };
        let supply_max = sim.charger_voltage * MAX_CHARGE_AMPS;
        let max_rate_watts = if profile.charge_rate_watts > 0.0 {
            profile.charge_rate_watts.min(supply_max)
        } else {
            supply_max
        };

        let sockets = config
            .sockets
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    SimSocket {
                        on: false,
                        rated_watts: s.power,
                    },
                )
            })
            .collect();

        let diverter = (sim.diverter_rating_watts > 0.0).then_some(SimDiverter {
            rating_watts: sim.diverter_rating_watts,
            tank_kwh: sim.tank_kwh,
            stored_kwh: 0.0,
            draw_watts: 0.0,
        });

        let model = SiteModel {
            now,
            step: Duration::seconds(i64::try_from(config.telemetry.tick_seconds).unwrap_or(60)),
            started: false,
            solar: SolarProfile::new(
                sim.solar_peak_watts,
                sim.sunrise_hour,
                sim.sunset_hour,
                sim.cloud_alpha,
                sim.cloud_noise_std,
                sim.seed,
            ),
            house: HouseProfile::new(
                sim.house_base_watts,
                sim.house_amp_watts,
                sim.house_noise_std,
                sim.seed.wrapping_add(1),
            ),
            meter_rng: StdRng::seed_from_u64(sim.seed.wrapping_add(2)),
            sockets,
            charger: SimCharger {
                mode: config.charger.idle_mode,
                status: ChargerStatus::Starting,
                green_level_pct: config.charger.idle_green_level,
                voltage: sim.charger_voltage,
                min_charge_amps: config.divert.min_charge_amps,
                rate_watts: 0.0,
                added_kwh: 0.0,
                arrives_at,
                connected: false,
                soc_pct: sim.car_initial_soc_pct,
                capacity_kwh,
                max_rate_watts,
            },
            diverter,
        };

        Self {
            model: Rc::new(RefCell::new(model)),
        }
    }

    /// The modelled car's true state of charge.
    pub fn car_soc_pct(&self) -> f64 {
        self.model.borrow().charger.soc_pct
    }

    pub fn charger_mode(&self) -> ChargerMode {
        self.model.borrow().charger.mode
    }

    /// Whether the named socket's relay is closed.
    pub fn socket_on(&self, name: &str) -> Option<bool> {
        self.model.borrow().sockets.get(name).map(|s| s.on)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.model.borrow().now
    }
}

impl fmt::Debug for SimulatedSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.model.borrow();
        f.debug_struct("SimulatedSite")
            .field("now", &model.now)
            .field("sockets", &model.sockets.len())
            .field("soc_pct", &model.charger.soc_pct)
            .finish()
    }
}

impl StateSource for SimulatedSite {
    fn fetch_state(&mut self) -> Result<State, TelemetryError> {
        Ok(self.model.borrow_mut().advance())
    }
}

impl CommandSink for SimulatedSite {
    fn send(&mut self, command: &Command) -> Result<(), CommandError> {
        self.model.borrow_mut().apply(command)
    }
}

impl VehicleConnector for SimulatedSite {
    fn connect(&self, profile: &VehicleProfile) -> Box<dyn VehicleApi> {
        Box::new(SimVehicle {
            site: self.clone(),
            profile: profile.clone(),
        })
    }
}

/// SOC back-end reading the modelled car directly.
#[derive(Debug)]
struct SimVehicle {
    site: SimulatedSite,
    profile: VehicleProfile,
}

impl VehicleApi for SimVehicle {
    fn kind(&self) -> VehicleKind {
        self.profile.kind
    }

    fn capacity_kwh(&self) -> f64 {
        self.profile.capacity_kwh
    }

    fn charge_rate_watts(&self) -> f64 {
        self.profile.charge_rate_watts
    }

    fn fetch_soc(&mut self) -> Result<Option<f64>, VehicleApiError> {
        let model = self.site.model.borrow();
        if !model.charger.connected {
            return Ok(None);
        }
        Ok(Some(model.charger.soc_pct))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocketConfig;

    fn config() -> Config {
        let mut c = Config::baseline();
        c.simulation.start_hour = 12;
        c.simulation.cloud_noise_std = 0.0;
        c.simulation.house_noise_std = 0.0;
        c
    }

    #[test]
    fn snapshots_advance_one_step() {
        let mut site = SimulatedSite::new(&config());
        let a = site.fetch_state().unwrap_or_else(|e| panic!("{e}"));
        let b = site.fetch_state().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(b.timestamp - a.timestamp, Duration::seconds(60));
        assert_eq!(a.timestamp.hour(), 12);
    }

    #[test]
    fn commands_switch_sockets() {
        let mut site = SimulatedSite::new(&config());
        assert_eq!(site.socket_on("heater"), Some(false));
        assert!(site.send(&Command::TurnOn { load: "heater".into() }).is_ok());
        assert_eq!(site.socket_on("heater"), Some(true));

        let state = site.fetch_state().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(state.switches["heater"].watts, Some(1000.0));
    }

    #[test]
    fn unknown_device_is_unreachable() {
        let mut site = SimulatedSite::new(&config());
        let result = site.send(&Command::TurnOn { load: "kettle".into() });
        assert!(matches!(result, Err(CommandError::Unreachable { .. })));
        let result = site.send(&Command::SetMode {
            charger: "other".into(),
            mode: ChargerMode::Fast,
        });
        assert!(result.is_err());
    }

    #[test]
    fn grid_balances_loads() {
        let mut c = config();
        c.sockets = vec![SocketConfig::new("heater", 1, 1000.0)];
        let mut site = SimulatedSite::new(&c);
        site.send(&Command::TurnOn { load: "heater".into() }).ok();
        let s = site.fetch_state().unwrap_or_else(|e| panic!("{e}"));

        let charger = s.chargers[0].charge_rate_watts;
        let diverter = s.diverter_watts().unwrap_or_default();
        let grid = s.grid_watts.unwrap_or_default();
        let expected = s.house_watts + 1000.0 + charger + diverter - s.generation_watts;
        assert!((grid - expected).abs() < 1e-6);
    }

    #[test]
    fn fast_mode_charges_connected_car() {
        let mut c = config();
        c.simulation.car_arrival_hour = Some(12.0);
        let mut site = SimulatedSite::new(&c);
        site.send(&Command::SetMode {
            charger: CHARGER_ID.into(),
            mode: ChargerMode::Fast,
        })
        .ok();
        let before = site.car_soc_pct();
        let s = site.fetch_state().unwrap_or_else(|e| panic!("{e}"));
        assert!(s.chargers[0].car_connected);
        assert_eq!(s.chargers[0].status, ChargerStatus::Boosting);
        assert!(site.car_soc_pct() > before);
    }

    #[test]
    fn configured_rate_caps_fast_charging() {
        let mut c = config();
        c.simulation.car_arrival_hour = Some(12.0);
        c.vehicle.kind = VehicleKind::Leaf;
        c.vehicle.charge_rate_watts = Some(3600.0);
        let mut site = SimulatedSite::new(&c);
        site.send(&Command::SetMode {
            charger: CHARGER_ID.into(),
            mode: ChargerMode::Fast,
        })
        .ok();
        let s = site.fetch_state().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(s.chargers[0].charge_rate_watts, 3600.0);

        let car = site.connect(&c.vehicle.profile());
        assert_eq!(car.charge_rate_watts(), 3600.0);
    }

    #[test]
    fn eco_plus_waits_without_export() {
        let mut c = config();
        c.simulation.start_hour = 2;
        c.simulation.car_arrival_hour = Some(2.0);
        let mut site = SimulatedSite::new(&c);
        let s = site.fetch_state().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(s.chargers[0].mode, ChargerMode::EcoPlus);
        assert_eq!(s.chargers[0].status, ChargerStatus::WaitingForExport);
        assert_eq!(s.chargers[0].charge_rate_watts, 0.0);
    }

    #[test]
    fn vehicle_reports_soc_only_when_plugged_in() {
        let mut c = config();
        c.simulation.car_arrival_hour = Some(13.0);
        let mut site = SimulatedSite::new(&c);
        let mut car = site.connect(&VehicleProfile::for_kind(VehicleKind::Leaf));
        assert_eq!(car.fetch_soc(), Ok(None));

        for _ in 0..61 {
            site.fetch_state().ok();
        }
        assert!(matches!(car.fetch_soc(), Ok(Some(soc)) if soc >= 45.0));
    }

    #[test]
    fn same_seed_same_run() {
        let mut a = SimulatedSite::new(&Config::baseline());
        let mut b = SimulatedSite::new(&Config::baseline());
        for _ in 0..30 {
            let (sa, sb) = (a.fetch_state(), b.fetch_state());
            let (Ok(sa), Ok(sb)) = (sa, sb) else {
                panic!("simulated fetch never fails");
            };
            assert_eq!(sa.generation_watts, sb.generation_watts);
            assert_eq!(sa.house_watts, sb.house_watts);
        }
    }
}
