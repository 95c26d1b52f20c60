use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::state::State;
use crate::devices::{EvCharger, Load, SwitchedSocket, UnmanagedLoad, WaterHeaterDiverter};
use crate::session::SessionFactory;

/// Every load on the site, each owned for the lifetime of the process.
///
/// Sockets come from configuration; chargers, the diverter and unmanaged
/// loads are discovered from telemetry.
#[derive(Debug, Default)]
pub struct Site {
    /// Kept in priority order.
    pub sockets: Vec<SwitchedSocket>,
    /// Kept in priority order.
    pub chargers: Vec<EvCharger>,
    pub diverter: Option<WaterHeaterDiverter>,
    pub unmanaged: Vec<UnmanagedLoad>,
    min_charge_amps: f64,
}

impl Site {
    pub fn new(mut sockets: Vec<SwitchedSocket>, min_charge_amps: f64) -> Self {
        sockets.sort_by_key(|s| s.priority);
        Self {
            sockets,
            chargers: Vec::new(),
            diverter: None,
            unmanaged: Vec::new(),
            min_charge_amps,
        }
    }

    /// Folds a validated snapshot into every load's state.
    ///
    /// A load missing from the snapshot counts as drawing nothing this tick.
    pub fn observe(&mut self, state: &State) {
        let ts = state.timestamp;

        for socket in &mut self.sockets {
            socket.observe(state.switches.get(&socket.name), ts);
        }

        for charger in &mut self.chargers {
            if !state.chargers.iter().any(|r| r.id == charger.id) {
                charger.mark_missing();
            }
        }
        for reading in &state.chargers {
            match self.chargers.iter_mut().find(|c| c.id == reading.id) {
                Some(charger) => charger.observe(reading, ts),
                None => {
                    info!("Found charger '{}'", reading.id);
                    let mut charger = EvCharger::from_reading(reading, self.min_charge_amps);
                    charger.observe(reading, ts);
                    self.chargers.push(charger);
                }
            }
        }
        self.chargers.sort_by_key(|c| c.priority);

        self.diverter = state.diverter.as_ref().map(|(name, watts)| WaterHeaterDiverter {
            name: name.clone(),
            draw_watts: *watts,
        });

        self.unmanaged = state
            .unmanaged
            .iter()
            .map(|(name, watts)| UnmanagedLoad {
                name: name.clone(),
                watts: *watts,
            })
            .collect();
    }

    /// Advances every charger's session by this tick's charge.
    ///
    /// Only one session may be vehicle-backed at a time, so each charger is
    /// told whether another already holds a valid one.
    pub fn update_sessions(
        &mut self,
        factory: &SessionFactory,
        noise_floor_kwh: f64,
        timestamp: DateTime<Utc>,
    ) {
        for i in 0..self.chargers.len() {
            let other_valid = self
                .chargers
                .iter()
                .enumerate()
                .any(|(j, c)| j != i && c.session().has_valid_session());
            self.chargers[i].update_session(factory, other_valid, noise_floor_kwh, timestamp);
        }
    }

    pub fn socket_mut(&mut self, name: &str) -> Option<&mut SwitchedSocket> {
        self.sockets.iter_mut().find(|s| s.name == name)
    }

    pub fn charger_mut(&mut self, id: &str) -> Option<&mut EvCharger> {
        self.chargers.iter_mut().find(|c| c.id == id)
    }

    /// All loads, for reporting.
    pub fn loads(&self) -> impl Iterator<Item = &dyn Load> {
        let sockets = self.sockets.iter().map(|s| s as &dyn Load);
        let chargers = self.chargers.iter().map(|c| c as &dyn Load);
        let diverter = self.diverter.iter().map(|d| d as &dyn Load);
        let unmanaged = self.unmanaged.iter().map(|u| u as &dyn Load);
        chargers.chain(diverter).chain(sockets).chain(unmanaged)
    }

    /// Resets every socket's daily energy.
    pub fn reset_day(&mut self) {
        for socket in &mut self.sockets {
            socket.reset_day();
        }
    }

    /// Logs one line per load at debug level.
    pub fn log_loads(&self) {
        for socket in &self.sockets {
            debug!("{socket}");
        }
        for charger in &self.chargers {
            debug!("{charger}");
        }
        if let Some(diverter) = &self.diverter {
            debug!("{diverter}");
        }
        for load in &self.unmanaged {
            debug!("{load}");
        }
    }
}
