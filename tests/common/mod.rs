//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use surplus_divert::config::{ChargerConfig, DivertConfig};
use surplus_divert::devices::{ChargerMode, ChargerReading, ChargerStatus, SocketReading};
use surplus_divert::divert::{DivertEngine, State};
use surplus_divert::error::VehicleApiError;
use surplus_divert::session::{
    SessionFactory, VehicleApi, VehicleConnector, VehicleKind, VehicleProfile,
};

/// 2024-06-01 at `h:m` UTC.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, h, m, 0)
        .single()
        .unwrap_or_default()
}

/// `n` minutes after 12:00.
pub fn minute(n: i64) -> DateTime<Utc> {
    at(12, 0) + Duration::minutes(n)
}

/// Snapshot with only generation and house set.
pub fn snapshot(ts: DateTime<Utc>, generation: f64, house: f64) -> State {
    let mut s = State::new(ts);
    s.generation_watts = generation;
    s.house_watts = house;
    s
}

/// Metered socket reading drawing `watts` while on.
pub fn socket_reading(on: bool, watts: f64) -> SocketReading {
    SocketReading {
        on,
        watts: Some(if on { watts } else { 0.0 }),
        energy_today_kwh: None,
    }
}

/// Connected charger on a 233 V supply at 100% green level, which makes
/// its minimum rate 1398 W.
pub fn charger_reading(
    id: &str,
    mode: ChargerMode,
    status: ChargerStatus,
    rate: f64,
) -> ChargerReading {
    ChargerReading {
        id: id.into(),
        priority: 0,
        mode,
        status,
        charge_rate_watts: rate,
        min_green_level_pct: 100,
        voltage: 233.0,
        car_connected: true,
        charge_added_kwh: 0.0,
    }
}

/// Engine with default headroom and no vehicle telemetry.
pub fn engine() -> DivertEngine {
    DivertEngine::new(
        DivertConfig::default(),
        ChargerConfig::default(),
        SessionFactory::without_vehicle(),
    )
}

/// SOC readings a test can append to while a session holds the vehicle.
#[derive(Debug, Clone, Default)]
pub struct SocScript(Rc<RefCell<VecDeque<f64>>>);

impl SocScript {
    pub fn new(readings: &[f64]) -> Self {
        Self(Rc::new(RefCell::new(readings.iter().copied().collect())))
    }

    pub fn push(&self, pct: f64) {
        self.0.borrow_mut().push_back(pct);
    }
}

/// Vehicle returning scripted SOC readings; the last one repeats.
#[derive(Debug)]
pub struct ScriptedVehicle {
    profile: VehicleProfile,
    script: SocScript,
    last: Option<f64>,
}

impl VehicleApi for ScriptedVehicle {
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
        if let Some(pct) = self.script.0.borrow_mut().pop_front() {
            self.last = Some(pct);
        }
        Ok(self.last)
    }
}

pub struct ScriptedConnector(pub SocScript);

impl VehicleConnector for ScriptedConnector {
    fn connect(&self, profile: &VehicleProfile) -> Box<dyn VehicleApi> {
        Box::new(ScriptedVehicle {
            profile: profile.clone(),
            script: self.0.clone(),
            last: None,
        })
    }
}

/// Engine tracking a 26 kWh Leaf (20%/80% thresholds) through `script`.
pub fn leaf_engine(script: &SocScript) -> DivertEngine {
    let factory = SessionFactory::new(
        VehicleProfile::for_kind(VehicleKind::Leaf),
        Box::new(ScriptedConnector(script.clone())),
    );
    DivertEngine::new(DivertConfig::default(), ChargerConfig::default(), factory)
}
