//! The control loop around the engine: fetch, validate, account, allocate.

use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::command::{Command, CommandSink};
use crate::config::{Config, ConfigError};
use crate::devices::{Load, SocketMode};
use crate::divert::{DivertEngine, Site, StaleTolerance, State, TickClock, TickReport};
use crate::energy::EnergyLedger;
use crate::error::TelemetryError;
use crate::session::{SessionFactory, VehicleConnector};

/// Source of per-tick site snapshots.
///
/// Implementations perform the blocking telemetry I/O. Errors abort the tick.
pub trait StateSource {
    fn fetch_state(&mut self) -> Result<State, TelemetryError>;
}

/// One completed tick, flattened for export.
#[derive(Debug, Clone, PartialEq)]
pub struct TickRecord {
    pub timestamp: DateTime<Utc>,
    pub generation_watts: f64,
    pub house_watts: f64,
    pub surplus_start_watts: f64,
    pub surplus_end_watts: f64,
    pub diverter_watts: Option<f64>,
    pub commands: usize,
    pub failed_commands: usize,
    /// First charger's estimated SOC, if its session has one.
    pub soc_pct: Option<f64>,
}

/// Totals for a [`Controller::run`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub aborted: usize,
    pub commands: usize,
}

/// Owns the site and the engine across ticks.
#[derive(Debug)]
pub struct Controller {
    engine: DivertEngine,
    site: Site,
    ledger: EnergyLedger,
    tolerance: StaleTolerance,
    tick_period: Duration,
    retry_delay: Duration,
    day: Option<NaiveDate>,
    records: Vec<TickRecord>,
}

impl Controller {
    /// Builds the controller from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a socket's timer does not parse.
    pub fn new(config: &Config, connector: Box<dyn VehicleConnector>) -> Result<Self, ConfigError> {
        let sockets = config.build_sockets()?;
        let factory = SessionFactory::new(config.vehicle.profile(), connector);
        Ok(Self {
            engine: DivertEngine::new(config.divert.clone(), config.charger.clone(), factory),
            site: Site::new(sockets, config.divert.min_charge_amps),
            ledger: EnergyLedger::new(),
            tolerance: config.telemetry.tolerance(),
            tick_period: Duration::from_secs(config.telemetry.tick_seconds),
            retry_delay: Duration::from_secs(config.telemetry.retry_delay_seconds),
            day: None,
            records: Vec::new(),
        })
    }

    /// Performs one tick.
    ///
    /// A snapshot that fails to fetch or validate aborts the tick before
    /// anything is mutated or any command is sent.
    pub fn run_once(
        &mut self,
        source: &mut dyn StateSource,
        sink: &mut dyn CommandSink,
    ) -> Result<TickReport, TelemetryError> {
        let mut state = source.fetch_state()?;
        state.validate(&self.tolerance)?;

        self.record_energy(&state);
        self.roll_day(state.timestamp);

        let report = self.engine.run_tick(&state, &mut self.site, sink);
        for command in &report.commands {
            info!("{command}");
        }
        debug!(
            surplus_start = report.divert.surplus_watts,
            surplus_end = report.surplus_end_watts,
            "tick complete"
        );

        self.records.push(TickRecord {
            timestamp: state.timestamp,
            generation_watts: state.generation_watts,
            house_watts: state.house_watts,
            surplus_start_watts: report.divert.surplus_watts,
            surplus_end_watts: report.surplus_end_watts,
            diverter_watts: state.diverter_watts(),
            commands: report.commands.len(),
            failed_commands: report.failed.len(),
            soc_pct: self
                .site
                .chargers
                .first()
                .and_then(|c| c.session().session())
                .and_then(|s| s.estimated_soc_pct()),
        });
        Ok(report)
    }

    /// Runs `ticks` attempts, pacing completed ticks on a [`TickClock`] and
    /// waiting the retry delay after an aborted one.
    ///
    /// `sleep` performs the waits; dry runs pass a no-op.
    pub fn run(
        &mut self,
        source: &mut dyn StateSource,
        sink: &mut dyn CommandSink,
        ticks: usize,
        mut sleep: impl FnMut(Duration),
    ) -> RunSummary {
        let mut clock = TickClock::new(Instant::now(), self.tick_period);
        let mut summary = RunSummary::default();

        for _ in 0..ticks {
            match self.run_once(source, sink) {
                Ok(report) => {
                    summary.completed += 1;
                    summary.commands += report.commands.len();
                    sleep(clock.next_delay(Instant::now()));
                }
                Err(e) => {
                    summary.aborted += 1;
                    warn!(error = %e, delay = ?self.retry_delay, "tick aborted, retrying");
                    sleep(self.retry_delay);
                }
            }
        }
        summary
    }

    /// Turns off every auto-mode socket that is on.
    pub fn shutdown(&mut self, sink: &mut dyn CommandSink) -> Vec<Command> {
        let mut sent = Vec::new();
        for socket in &mut self.site.sockets {
            if socket.mode != SocketMode::Auto || !socket.is_on() {
                continue;
            }
            let Some(command) = Load::turn_off(socket) else {
                continue;
            };
            match sink.send(&command) {
                Ok(()) => {
                    socket.set_on(false);
                    sent.push(command);
                }
                Err(e) => warn!(socket = %socket.name, error = %e, "could not turn off at shutdown"),
            }
        }
        self.ledger.log_totals();
        sent
    }

    fn record_energy(&mut self, state: &State) {
        let ts = state.timestamp;
        self.ledger.record("generation", state.generation_watts, ts);
        self.ledger.record("house", state.house_watts, ts);
        if let Some(grid) = state.grid_watts {
            self.ledger.record("grid", grid, ts);
        }
        if let Some((name, watts)) = &state.diverter {
            self.ledger.record(name, watts.unwrap_or(0.0), ts);
        }
        for charger in &state.chargers {
            self.ledger.record(&charger.id, charger.charge_rate_watts, ts);
        }
        for (name, watts) in &state.unmanaged {
            self.ledger.record(name, *watts, ts);
        }
    }

    /// Resets daily energy when the UTC date changes.
    fn roll_day(&mut self, timestamp: DateTime<Utc>) {
        let today = timestamp.date_naive();
        if self.day.is_some_and(|day| day != today) {
            info!("New day {today}, resetting daily energy");
            self.ledger.log_totals();
            self.ledger.reset_day();
            self.site.reset_day();
        }
        self.day = Some(today);
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn engine(&self) -> &DivertEngine {
        &self.engine
    }

    pub fn ledger(&self) -> &EnergyLedger {
        &self.ledger
    }

    /// Every completed tick so far.
    pub fn records(&self) -> &[TickRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RecordingSink;
    use crate::config::SocketConfig;
    use crate::devices::SocketReading;
    use crate::divert::CrossCheck;
    use crate::session::NoVehicleConnector;
    use chrono::TimeZone;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Result<State, TelemetryError>>);

    impl StateSource for Scripted {
        fn fetch_state(&mut self) -> Result<State, TelemetryError> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Err(TelemetryError::Timeout("script exhausted".into())))
        }
    }

    fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, h, m, 0)
            .single()
            .unwrap_or_default()
    }

    fn snapshot(ts: DateTime<Utc>, generation: f64, heater_on: bool) -> State {
        let mut s = State::new(ts);
        s.generation_watts = generation;
        s.house_watts = 400.0;
        s.switches.insert(
            "heater".into(),
            SocketReading {
                on: heater_on,
                watts: Some(if heater_on { 1000.0 } else { 0.0 }),
                energy_today_kwh: None,
            },
        );
        s
    }

    fn controller() -> Controller {
        let config = Config {
            sockets: vec![SocketConfig::new("heater", 1, 1000.0)],
            ..Config::default()
        };
        Controller::new(&config, Box::new(NoVehicleConnector))
            .unwrap_or_else(|e| panic!("config should build: {e}"))
    }

    #[test]
    fn stale_snapshot_aborts_without_commands() {
        let mut c = controller();
        let mut state = snapshot(at(1, 12, 0), 3000.0, false);
        state.cross_checks.push(CrossCheck {
            quantity: "generation".into(),
            primary: 3000.0,
            secondary: 1000.0,
        });
        let mut source = Scripted(VecDeque::from(vec![Ok(state)]));
        let mut sink = RecordingSink::new();

        let result = c.run_once(&mut source, &mut sink);
        assert!(matches!(result, Err(TelemetryError::StaleData { .. })));
        assert!(sink.sent.is_empty());
        assert!(c.records().is_empty());
        assert!(c.ledger().get("generation").is_none());
    }

    #[test]
    fn run_retries_after_abort() {
        let mut c = controller();
        let mut source = Scripted(VecDeque::from(vec![
            Err(TelemetryError::Timeout("meter".into())),
            Ok(snapshot(at(1, 12, 0), 3000.0, false)),
        ]));
        let mut sink = RecordingSink::new();
        let mut waits = Vec::new();

        let summary = c.run(&mut source, &mut sink, 2, |d| waits.push(d));
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.aborted, 1);
        assert_eq!(summary.commands, 1);
        assert_eq!(waits[0], Duration::from_secs(5));
        assert_eq!(sink.sent, vec![Command::TurnOn { load: "heater".into() }]);
    }

    #[test]
    fn day_rollover_resets_energy() {
        let mut c = controller();
        let mut source = Scripted(VecDeque::from(vec![
            Ok(snapshot(at(1, 23, 0), 0.0, true)),
            Ok(snapshot(at(1, 23, 59), 0.0, true)),
            Ok(snapshot(at(2, 0, 1), 0.0, true)),
        ]));
        let mut sink = RecordingSink::new();

        c.run_once(&mut source, &mut sink).ok();
        c.run_once(&mut source, &mut sink).ok();
        let before = c.ledger().get("house").map(|a| a.kwh()).unwrap_or_default();
        assert!(before > 0.0);

        c.run_once(&mut source, &mut sink).ok();
        let after = c.ledger().get("house").map(|a| a.kwh()).unwrap_or_default();
        assert_eq!(after, 0.0);
        assert_eq!(c.site().sockets[0].todays_kwh(), 0.0);
    }

    #[test]
    fn shutdown_turns_off_auto_sockets() {
        let mut c = controller();
        let mut source = Scripted(VecDeque::from(vec![Ok(snapshot(
            at(1, 12, 0),
            3000.0,
            true,
        ))]));
        let mut sink = RecordingSink::new();
        c.run_once(&mut source, &mut sink).ok();

        let sent = c.shutdown(&mut sink);
        assert_eq!(sent, vec![Command::TurnOff { load: "heater".into() }]);
        assert!(!c.site().sockets[0].is_on());
    }

    #[test]
    fn records_track_each_tick() {
        let mut c = controller();
        let mut source = Scripted(VecDeque::from(vec![
            Ok(snapshot(at(1, 12, 0), 3000.0, false)),
            Ok(snapshot(at(1, 12, 1), 3000.0, true)),
        ]));
        let mut sink = RecordingSink::new();
        c.run_once(&mut source, &mut sink).ok();
        c.run_once(&mut source, &mut sink).ok();

        let records = c.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].surplus_start_watts, 2600.0);
        assert_eq!(records[0].commands, 1);
        assert_eq!(records[1].surplus_end_watts, 1600.0);
    }
}
