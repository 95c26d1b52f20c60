//! The per-tick surplus allocation pass.

use std::collections::BTreeSet;

use chrono::NaiveTime;
use tracing::{debug, info, warn};

use super::site::Site;
use super::state::{DivertState, LoadRef, State};
use crate::command::{Command, CommandSink};
use crate::config::{ChargerConfig, DivertConfig};
use crate::devices::{ChargerMode, EvCharger, Load, SocketMode, SwitchedSocket};
use crate::session::SessionFactory;

/// Everything a tick did, for logging, export and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Acknowledged commands, in issue order.
    pub commands: Vec<Command>,
    /// Commands the sink rejected. Not retried this tick.
    pub failed: Vec<Command>,
    pub divert: DivertState,
    /// Surplus left after the walk.
    pub surplus_end_watts: f64,
}

/// Collects the outcome of every command sent during a tick.
struct Outbox<'a> {
    sink: &'a mut dyn CommandSink,
    sent: Vec<Command>,
    failed: Vec<Command>,
}

impl<'a> Outbox<'a> {
    fn new(sink: &'a mut dyn CommandSink) -> Self {
        Self {
            sink,
            sent: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Sends `command`, returning whether the device acknowledged it.
    fn send(&mut self, command: Command) -> bool {
        match self.sink.send(&command) {
            Ok(()) => {
                debug!(%command, "command acknowledged");
                self.sent.push(command);
                true
            }
            Err(e) => {
                warn!(%command, error = %e, "command failed");
                self.failed.push(command);
                false
            }
        }
    }
}

fn switch_socket(socket: &mut SwitchedSocket, on: bool, out: &mut Outbox<'_>) -> bool {
    let command = if on {
        Load::turn_on(socket)
    } else {
        Load::turn_off(socket)
    };
    let Some(command) = command else {
        return false;
    };
    if out.send(command) {
        socket.set_on(on);
        true
    } else {
        false
    }
}

fn change_mode(charger: &mut EvCharger, mode: ChargerMode, out: &mut Outbox<'_>) -> bool {
    let command = Command::SetMode {
        charger: charger.id.clone(),
        mode,
    };
    if out.send(command) {
        charger.set_mode(mode);
        true
    } else {
        false
    }
}

/// Steers surplus generation into the site's loads, one tick at a time.
///
/// Holds the only state that spans ticks outside the loads themselves: the
/// set of chargers it promoted to `Eco` on its own initiative.
#[derive(Debug)]
pub struct DivertEngine {
    divert: DivertConfig,
    charger: ChargerConfig,
    factory: SessionFactory,
    auto_eco: BTreeSet<String>,
}

impl DivertEngine {
    pub fn new(divert: DivertConfig, charger: ChargerConfig, factory: SessionFactory) -> Self {
        Self {
            divert,
            charger,
            factory,
            auto_eco: BTreeSet::new(),
        }
    }

    /// Chargers currently held in `Eco` by auto promotion.
    pub fn auto_eco(&self) -> &BTreeSet<String> {
        &self.auto_eco
    }

    /// Runs one tick against a validated snapshot.
    ///
    /// Order: fold telemetry and sessions into the site, gate charging on
    /// SOC, apply socket timers, reset idle chargers, then allocate surplus.
    /// Local state follows a command only once the sink acknowledges it.
    pub fn run_tick(
        &mut self,
        state: &State,
        site: &mut Site,
        sink: &mut dyn CommandSink,
    ) -> TickReport {
        site.observe(state);
        site.update_sessions(
            &self.factory,
            self.charger.charge_noise_floor_kwh,
            state.timestamp,
        );
        site.log_loads();

        let mut out = Outbox::new(sink);
        self.gate_sessions(site, &mut out);
        self.apply_timers(state.timestamp.time(), site, &mut out);
        self.reset_idle_chargers(site, &mut out);
        let (divert, surplus_end_watts) = self.allocate(state, site, &mut out);

        TickReport {
            commands: out.sent,
            failed: out.failed,
            divert,
            surplus_end_watts,
        }
    }

    /// Raises, restores or stops charging based on each session's SOC.
    fn gate_sessions(&self, site: &mut Site, out: &mut Outbox<'_>) {
        for charger in &mut site.chargers {
            if charger.session().session().is_none() {
                continue;
            }
            let mode = charger.mode();
            let health = charger.session().should_health_charge();

            if health && mode == ChargerMode::EcoPlus {
                info!("Battery low on '{}', raising to Eco", charger.id);
                if change_mode(charger, ChargerMode::Eco, out) {
                    charger.session_mut().low_charge_boost = true;
                }
            } else if charger.session().low_charge_boost && mode == ChargerMode::Eco && !health {
                info!("Battery recovered on '{}', back to Eco+", charger.id);
                if change_mode(charger, ChargerMode::EcoPlus, out) {
                    charger.session_mut().low_charge_boost = false;
                }
            } else if !matches!(mode, ChargerMode::Fast | ChargerMode::Stop)
                && charger.session_mut().should_stop_charge()
            {
                info!("Stopping charge on '{}' as battery full", charger.id);
                change_mode(charger, ChargerMode::Stop, out);
                if let Some(session) = charger.session_mut().session_mut() {
                    session.request_refresh();
                }
            }
        }
    }

    /// Holds sockets on inside their daily window and releases them after.
    fn apply_timers(&self, now: NaiveTime, site: &mut Site, out: &mut Outbox<'_>) {
        for socket in &mut site.sockets {
            let Some(window) = socket.timer else {
                continue;
            };
            let mode = socket.mode;
            match mode {
                SocketMode::Manual => {}
                SocketMode::Timed if !window.contains(now) => {
                    if !socket.is_on() || switch_socket(socket, false, out) {
                        info!("Turned off '{}' from timer", socket.name);
                        socket.mode = SocketMode::Auto;
                    }
                }
                SocketMode::Auto if window.contains(now) => {
                    if socket.is_on() || switch_socket(socket, true, out) {
                        info!("Turned on '{}' from timer", socket.name);
                        socket.mode = SocketMode::Timed;
                    }
                }
                SocketMode::Timed | SocketMode::Auto => {}
            }
        }
    }

    /// Returns chargers with nothing to charge to the idle mode and level.
    fn reset_idle_chargers(&self, site: &mut Site, out: &mut Outbox<'_>) {
        let idle_mode = self.charger.idle_mode;
        let idle_level = self.charger.idle_green_level;
        for charger in site.chargers.iter_mut().filter(|c| c.is_idle()) {
            if charger.mode() != idle_mode {
                change_mode(charger, idle_mode, out);
            }
            if charger.min_green_level_pct() != idle_level {
                let command = Command::SetGreenLevel {
                    charger: charger.id.clone(),
                    percent: idle_level,
                };
                if out.send(command) {
                    charger.set_green_level(idle_level);
                }
            }
        }
    }

    /// Lays out the allocation order and the surplus it starts from.
    ///
    /// Committed sockets first, then the diverter, divertable chargers and
    /// the remaining auto sockets. Fast chargers take their draw up front.
    fn plan(&mut self, state: &State, site: &Site) -> (DivertState, bool) {
        self.auto_eco.retain(|id| {
            site.chargers
                .iter()
                .any(|c| &c.id == id && c.mode() == ChargerMode::Eco)
        });

        let mut surplus = state.surplus_watts();
        let mut order = Vec::new();
        let mut auto = Vec::new();

        for (i, socket) in site.sockets.iter().enumerate() {
            if socket.mode != SocketMode::Auto || socket.is_committed() {
                order.push(LoadRef::Committed(i));
            } else {
                auto.push(LoadRef::Socket(i));
            }
        }

        if site.diverter.is_some() {
            order.push(LoadRef::Diverter);
        }

        let mut can_auto_eco = false;
        for (i, charger) in site.chargers.iter().enumerate() {
            if charger.is_divert_candidate() {
                can_auto_eco = true;
                order.push(LoadRef::Charger(i));
            }
            if charger.mode() == ChargerMode::Fast {
                surplus -= charger.charge_rate_watts();
            }
        }
        order.extend(auto);

        let divert = DivertState {
            generation_watts: state.generation_watts,
            house_watts: state.house_watts,
            surplus_watts: surplus,
            order,
        };
        (divert, can_auto_eco)
    }

    /// The allocation walk. Returns the plan and the surplus left over.
    fn allocate(
        &mut self,
        state: &State,
        site: &mut Site,
        out: &mut Outbox<'_>,
    ) -> (DivertState, f64) {
        let (divert, can_auto_eco) = self.plan(state, site);
        let cfg = &self.divert;
        let mut surplus = divert.surplus_watts;
        debug!(surplus, auto_eco = ?self.auto_eco, "available power");

        let diverter_draw = site.diverter.as_ref().map(|d| d.draw());
        let mut fast_off = false;
        let mut first_candidate = true;
        let mut promote = false;
        let mut revert = Vec::new();

        for slot in &divert.order {
            match *slot {
                LoadRef::Committed(i) => {
                    let socket = &site.sockets[i];
                    debug!(socket = %socket.name, surplus, "committed");
                    surplus -= socket.known_watts();
                }
                LoadRef::Charger(i) => {
                    let charger = &site.chargers[i];
                    let rate = charger.charge_rate_watts();
                    let min_rate = charger.min_green_level_rate();
                    debug!(charger = %charger.id, surplus, rate, min_rate, "checking charger");

                    if let Some(diverter) = diverter_draw {
                        if self.auto_eco.contains(&charger.id)
                            && surplus + diverter + rate < cfg.low_power_floor_watts
                        {
                            info!(
                                "Flagging '{}' for Eco+ ({surplus:.0} {diverter:.0} {rate:.0})",
                                charger.id
                            );
                            revert.push(i);
                        }
                    }

                    if surplus >= min_rate || rate > 0.0 {
                        surplus -= rate.max(min_rate);
                        if charger.waiting_for_export() {
                            surplus -= cfg.waiting_for_export_penalty_watts;
                            fast_off = true;
                        } else {
                            surplus -= cfg.ramp_margin_watts;
                        }
                    }
                }
                LoadRef::Diverter => {
                    if can_auto_eco && surplus > cfg.diverter_headroom_watts {
                        promote = true;
                    }
                    if site
                        .diverter
                        .as_ref()
                        .is_some_and(|d| d.is_active(cfg.diverter_active_watts))
                    {
                        surplus -= cfg.diverter_headroom_watts;
                    }
                }
                LoadRef::Socket(i) => {
                    let socket = &mut site.sockets[i];
                    debug!(socket = %socket.name, surplus, "checking socket");
                    if socket.is_on() {
                        let watts = socket.known_watts();
                        if surplus >= watts {
                            socket.reset_strike_count();
                        } else if (fast_off || socket.strike())
                            && switch_socket(socket, false, out)
                        {
                            info!("Saved {watts:.0} watts by turning off '{}'", socket.name);
                        }
                        surplus -= watts;
                    } else if first_candidate {
                        first_candidate = false;
                        let expected = socket.expected_draw();
                        if surplus > expected
                            && !promote
                            && revert.is_empty()
                            && switch_socket(socket, true, out)
                        {
                            info!("Turned on '{}' to use {expected:.0} watts", socket.name);
                            surplus -= expected;
                        } else {
                            debug!("Device '{}' needs {expected:.0} watts", socket.name);
                        }
                    } else {
                        debug!(
                            "Device '{}' needs {:.0} watts",
                            socket.name,
                            socket.expected_draw()
                        );
                    }
                }
            }
        }

        self.apply_mode_change(site, &revert, promote, out);
        (divert, surplus)
    }

    /// Applies at most one charger mode change: a revert to Eco+ if any
    /// charger was flagged, otherwise an auto promotion to Eco.
    fn apply_mode_change(
        &mut self,
        site: &mut Site,
        revert: &[usize],
        promote: bool,
        out: &mut Outbox<'_>,
    ) {
        if let Some(&i) = revert.iter().find(|&&i| site.chargers[i].car_connected()) {
            let charger = &mut site.chargers[i];
            info!("Setting '{}' to Eco+", charger.id);
            change_mode(charger, ChargerMode::EcoPlus, out);
            return;
        }

        if !promote {
            return;
        }
        let candidate = site
            .chargers
            .iter_mut()
            .find(|c| c.car_connected() && c.mode() == ChargerMode::EcoPlus);
        if let Some(charger) = candidate {
            info!("Setting '{}' to Eco", charger.id);
            if change_mode(charger, ChargerMode::Eco, out) {
                self.auto_eco.insert(charger.id.clone());
            }
        }
    }
}
