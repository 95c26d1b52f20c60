//! EV charging sessions and state-of-charge estimation.
//!
//! A [`ChargeSession`] lives from car connection to disconnection. It
//! integrates the charger's delivered power and anchors that to a single
//! SOC reading from the vehicle, giving a continuous SOC estimate without
//! polling rate-limited vehicle APIs every tick.

pub mod vehicle;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::energy::EnergyAccumulator;
pub use vehicle::{
    NoVehicle, NoVehicleConnector, VehicleApi, VehicleConnector, VehicleKind, VehicleProfile,
};

/// Whether a session's SOC estimate is backed by vehicle telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionValidity {
    /// No successful SOC read yet.
    Unknown,
    /// Anchored to a vehicle SOC reading.
    Valid,
    /// No telemetry will ever be available for this session.
    Invalid,
}

/// SOC model for one connected car.
#[derive(Debug)]
pub struct ChargeSession {
    vehicle: Box<dyn VehicleApi>,
    capacity_kwh: f64,
    low_pct: f64,
    high_pct: f64,
    accumulator: EnergyAccumulator,
    base_soc_kwh: Option<f64>,
    initial_pct: Option<f64>,
    soc_kwh: Option<f64>,
    validity: SessionValidity,
    stop_latched: bool,
    refresh_requested: bool,
    observed_capacity_kwh: Option<f64>,
}

impl ChargeSession {
    pub fn new(vehicle: Box<dyn VehicleApi>, low_pct: f64, high_pct: f64) -> Self {
        let validity = if vehicle.kind() == VehicleKind::None {
            SessionValidity::Invalid
        } else {
            SessionValidity::Unknown
        };
        debug!(kind = %vehicle.kind(), "starting new session");
        Self {
            capacity_kwh: vehicle.capacity_kwh(),
            vehicle,
            low_pct,
            high_pct,
            accumulator: EnergyAccumulator::new(),
            base_soc_kwh: None,
            initial_pct: None,
            soc_kwh: None,
            validity,
            stop_latched: false,
            refresh_requested: false,
            observed_capacity_kwh: None,
        }
    }

    /// Folds one tick of charger output into the session.
    ///
    /// The first successful vehicle read sets the baseline so that
    /// `baseline + delivered == capacity * reported%`. Failed reads leave the
    /// estimate where it was.
    pub fn update(&mut self, charge_rate_watts: f64, timestamp: DateTime<Utc>) {
        self.accumulator.add_value(charge_rate_watts, timestamp);
        let added_kwh = self.accumulator.kwh();

        if self.validity == SessionValidity::Invalid {
            return;
        }

        let base = match self.base_soc_kwh {
            Some(base) => {
                if self.refresh_requested {
                    self.refresh(added_kwh);
                }
                self.base_soc_kwh.unwrap_or(base)
            }
            None => {
                let Some(percent) = self.read_soc() else {
                    return;
                };
                let base = self.capacity_kwh * percent / 100.0 - added_kwh;
                info!(
                    kind = %self.vehicle.kind(),
                    "State of charge is reported as {percent:.0}%, {:.1} kWh",
                    base + added_kwh
                );
                self.base_soc_kwh = Some(base);
                self.initial_pct = Some(percent);
                self.validity = SessionValidity::Valid;
                if let Some(hours) = self.hours_to_soc(self.high_pct) {
                    info!("About {hours:.1} h of charging to reach {:.0}%", self.high_pct);
                }
                base
            }
        };

        let soc_kwh = base + added_kwh;
        self.soc_kwh = Some(soc_kwh);
        debug!(
            added_kwh,
            soc_kwh,
            soc_pct = self.estimated_soc_pct().unwrap_or_default(),
            "session estimate"
        );
    }

    fn read_soc(&mut self) -> Option<f64> {
        match self.vehicle.fetch_soc() {
            Ok(Some(percent)) => Some(percent),
            Ok(None) => {
                debug!(kind = %self.vehicle.kind(), "vehicle returned no SOC");
                None
            }
            Err(e) => {
                warn!(kind = %self.vehicle.kind(), error = %e, "SOC fetch failed, keeping last estimate");
                None
            }
        }
    }

    /// Re-reads SOC after a stop request and re-anchors the estimate.
    fn refresh(&mut self, added_kwh: f64) {
        let Some(percent) = self.read_soc() else {
            return;
        };
        self.refresh_requested = false;

        info!(
            "State of charge update {:.0}% {percent:.0}%",
            self.estimated_soc_pct().unwrap_or_default()
        );

        if let Some(initial) = self.initial_pct {
            let added_pct = percent - initial;
            if added_pct.abs() > f64::EPSILON {
                let observed = added_kwh * 100.0 / added_pct;
                info!(
                    "Capacity change from {:.1} to {observed:.1} after {added_kwh:.1} kWh",
                    self.capacity_kwh
                );
                self.observed_capacity_kwh = Some(observed);
            }
        }

        self.base_soc_kwh = Some(self.capacity_kwh * percent / 100.0 - added_kwh);
    }

    /// Estimated state of charge in percent, once anchored.
    pub fn estimated_soc_pct(&self) -> Option<f64> {
        if self.capacity_kwh <= 0.0 {
            return None;
        }
        self.soc_kwh.map(|kwh| kwh / self.capacity_kwh * 100.0)
    }

    /// `true` when the battery is critically low and charging should be
    /// prioritised.
    pub fn should_health_charge(&self) -> bool {
        self.estimated_soc_pct().is_some_and(|pct| pct < self.low_pct)
    }

    /// `true` once the estimate has exceeded the high threshold.
    ///
    /// Latched: stays `true` regardless of later estimates until
    /// [`clear_stop_latch`](Self::clear_stop_latch) is called by whoever
    /// observes the charger actually stopped.
    pub fn should_stop_charge(&mut self) -> bool {
        if self.stop_latched {
            return true;
        }
        if self.estimated_soc_pct().is_some_and(|pct| pct > self.high_pct) {
            info!("SOC above {:.0}%, latching stop", self.high_pct);
            self.stop_latched = true;
        }
        self.stop_latched
    }

    pub fn clear_stop_latch(&mut self) {
        self.stop_latched = false;
    }

    pub fn is_stop_latched(&self) -> bool {
        self.stop_latched
    }

    /// Asks for a fresh vehicle SOC read on the next update.
    pub fn request_refresh(&mut self) {
        self.refresh_requested = true;
    }

    /// kWh still needed to reach `target_pct`, once anchored.
    pub fn charge_required_for_soc(&self, target_pct: f64) -> Option<f64> {
        self.estimated_soc_pct()
            .map(|pct| self.capacity_kwh * (target_pct - pct) / 100.0)
    }

    /// Hours at the vehicle's charge rate to reach `target_pct`, once anchored.
    pub fn hours_to_soc(&self, target_pct: f64) -> Option<f64> {
        let rate_kw = self.vehicle.charge_rate_watts() / 1000.0;
        if rate_kw <= 0.0 {
            return None;
        }
        self.charge_required_for_soc(target_pct)
            .map(|kwh| kwh.max(0.0) / rate_kw)
    }

    pub fn validity(&self) -> SessionValidity {
        self.validity
    }

    pub fn kind(&self) -> VehicleKind {
        self.vehicle.kind()
    }

    /// Energy delivered during this session (kWh).
    pub fn added_kwh(&self) -> f64 {
        self.accumulator.kwh()
    }

    pub fn soc_kwh(&self) -> Option<f64> {
        self.soc_kwh
    }

    pub fn base_soc_kwh(&self) -> Option<f64> {
        self.base_soc_kwh
    }

    /// Capacity implied by the last refresh, if one succeeded.
    pub fn observed_capacity_kwh(&self) -> Option<f64> {
        self.observed_capacity_kwh
    }
}

/// Builds sessions for newly connected cars.
pub struct SessionFactory {
    profile: VehicleProfile,
    connector: Box<dyn VehicleConnector>,
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl SessionFactory {
    pub fn new(profile: VehicleProfile, connector: Box<dyn VehicleConnector>) -> Self {
        Self { profile, connector }
    }

    /// Factory that only ever produces telemetry-less sessions.
    pub fn without_vehicle() -> Self {
        Self::new(
            VehicleProfile::for_kind(VehicleKind::None),
            Box::new(NoVehicleConnector),
        )
    }

    /// Creates a session. Only one car can be tracked: when another charger
    /// already holds a valid session the new one gets no telemetry.
    pub fn new_session(&self, other_valid_session: bool) -> ChargeSession {
        let p = &self.profile;
        if other_valid_session || p.kind == VehicleKind::None {
            return ChargeSession::new(Box::new(NoVehicle), p.low_pct, p.high_pct);
        }
        ChargeSession::new(self.connector.connect(p), p.low_pct, p.high_pct)
    }

    pub fn profile(&self) -> &VehicleProfile {
        &self.profile
    }
}

/// What a charger reports that matters to session lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct SessionInput {
    pub car_connected: bool,
    pub charge_added_kwh: f64,
    pub charge_rate_watts: f64,
    pub timestamp: DateTime<Utc>,
}

/// Owns the (optional) session for one charger across ticks.
#[derive(Debug, Default)]
pub struct SessionTracker {
    session: Option<ChargeSession>,
    known_charge_added_kwh: f64,
    /// Set while the engine has raised the mode for a health charge.
    pub low_charge_boost: bool,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ends, starts, and updates the session from this tick's reading.
    ///
    /// A session ends when the car disconnects or the charger's added-charge
    /// counter falls back under `noise_floor_kwh` (a new session started on
    /// the charger without us seeing a disconnect).
    pub fn update(
        &mut self,
        input: &SessionInput,
        factory: &SessionFactory,
        other_valid_session: bool,
        noise_floor_kwh: f64,
    ) {
        if let Some(session) = &self.session {
            let regressed = input.charge_added_kwh < self.known_charge_added_kwh
                && input.charge_added_kwh < noise_floor_kwh;
            if !input.car_connected || regressed {
                if let (Some(base), Some(soc)) = (session.base_soc_kwh(), session.soc_kwh()) {
                    info!("Charge went from {base:.1} to {soc:.1} kWh");
                }
                debug!("closing session");
                self.session = None;
                self.low_charge_boost = false;
            }
        }

        if self.session.is_none() && input.car_connected {
            self.session = Some(factory.new_session(other_valid_session));
            self.known_charge_added_kwh = input.charge_added_kwh;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.update(input.charge_rate_watts, input.timestamp);
        self.known_charge_added_kwh = input.charge_added_kwh;
    }

    pub fn session(&self) -> Option<&ChargeSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut ChargeSession> {
        self.session.as_mut()
    }

    pub fn has_valid_session(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.validity() == SessionValidity::Valid)
    }

    pub fn should_health_charge(&self) -> bool {
        self.session.as_ref().is_some_and(ChargeSession::should_health_charge)
    }

    pub fn should_stop_charge(&mut self) -> bool {
        self.session.as_mut().is_some_and(ChargeSession::should_stop_charge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VehicleApiError;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }

    /// Vehicle answering from a queue of canned responses; repeats the last.
    #[derive(Debug)]
    struct Scripted {
        replies: Rc<RefCell<VecDeque<Result<Option<f64>, VehicleApiError>>>>,
        capacity: f64,
    }

    impl VehicleApi for Scripted {
        fn kind(&self) -> VehicleKind {
            VehicleKind::Leaf
        }
        fn capacity_kwh(&self) -> f64 {
            self.capacity
        }
        fn charge_rate_watts(&self) -> f64 {
            6600.0
        }
        fn fetch_soc(&mut self) -> Result<Option<f64>, VehicleApiError> {
            let mut q = self.replies.borrow_mut();
            if q.len() > 1 {
                q.pop_front().unwrap_or(Ok(None))
            } else {
                q.front().cloned().unwrap_or(Ok(None))
            }
        }
    }

    fn scripted(
        capacity: f64,
        replies: Vec<Result<Option<f64>, VehicleApiError>>,
    ) -> (ChargeSession, Rc<RefCell<VecDeque<Result<Option<f64>, VehicleApiError>>>>) {
        let queue = Rc::new(RefCell::new(VecDeque::from(replies)));
        let vehicle = Scripted {
            replies: Rc::clone(&queue),
            capacity,
        };
        (ChargeSession::new(Box::new(vehicle), 20.0, 80.0), queue)
    }

    #[test]
    fn baseline_set_on_first_read() {
        let (mut s, _) = scripted(40.0, vec![Ok(Some(50.0))]);
        s.update(3600.0, ts(0));
        assert_eq!(s.validity(), SessionValidity::Valid);
        assert_eq!(s.base_soc_kwh(), Some(20.0));
        // One hour at 4 kW adds 4 kWh = 10%.
        s.update(4000.0, ts(3600));
        let pct = s.estimated_soc_pct().unwrap_or_default();
        assert!((pct - 60.0).abs() < 1e-9);
    }

    #[test]
    fn baseline_accounts_for_charge_before_first_read() {
        let (mut s, _) = scripted(
            40.0,
            vec![
                Err(VehicleApiError::Timeout),
                Err(VehicleApiError::Timeout),
                Ok(Some(50.0)),
            ],
        );
        s.update(4000.0, ts(0));
        s.update(4000.0, ts(3600));
        assert_eq!(s.validity(), SessionValidity::Unknown);
        assert_eq!(s.estimated_soc_pct(), None);

        s.update(4000.0, ts(3600 * 2));
        // 8 kWh already delivered when the car reported 50% of 40 kWh.
        assert_eq!(s.base_soc_kwh(), Some(12.0));
        assert!((s.estimated_soc_pct().unwrap_or_default() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn api_errors_leave_session_unknown() {
        let (mut s, _) = scripted(40.0, vec![Err(VehicleApiError::Unauthorized)]);
        for t in 0..5 {
            s.update(2000.0, ts(t * 60));
        }
        assert_eq!(s.validity(), SessionValidity::Unknown);
        assert!(!s.should_health_charge());
        assert!(!s.should_stop_charge());
    }

    #[test]
    fn no_vehicle_session_is_invalid() {
        let mut s = ChargeSession::new(Box::new(NoVehicle), 20.0, 80.0);
        s.update(2000.0, ts(0));
        s.update(2000.0, ts(60));
        assert_eq!(s.validity(), SessionValidity::Invalid);
        assert!(s.added_kwh() > 0.0);
        assert_eq!(s.estimated_soc_pct(), None);
    }

    #[test]
    fn health_charge_below_low_threshold() {
        let (mut s, _) = scripted(40.0, vec![Ok(Some(15.0))]);
        s.update(0.0, ts(0));
        assert!(s.should_health_charge());
        s.update(8000.0, ts(3600));
        // 6 kWh + 8 kWh = 35%
        assert!(!s.should_health_charge());
    }

    #[test]
    fn stop_latches_until_cleared() {
        let (mut s, queue) = scripted(40.0, vec![Ok(Some(79.0))]);
        s.update(0.0, ts(0));
        assert!(!s.should_stop_charge());

        // 0.8 kWh pushes 79% to 81%.
        s.update(800.0, ts(3600));
        assert!(s.should_stop_charge());

        // The car now reports 75%; the estimate re-anchors lower.
        queue.borrow_mut().clear();
        queue.borrow_mut().push_back(Ok(Some(75.0)));
        s.request_refresh();
        s.update(0.0, ts(7200));
        assert!((s.estimated_soc_pct().unwrap_or_default() - 75.0).abs() < 1e-9);
        assert!(s.should_stop_charge());
        assert!(s.should_stop_charge());

        s.clear_stop_latch();
        assert!(!s.should_stop_charge());
    }

    #[test]
    fn refresh_estimates_capacity() {
        let (mut s, queue) = scripted(40.0, vec![Ok(Some(50.0))]);
        s.update(0.0, ts(0));
        s.update(9000.0, ts(3600));
        queue.borrow_mut().clear();
        queue.borrow_mut().push_back(Ok(Some(70.0)));
        s.request_refresh();
        s.update(0.0, ts(7200));
        // 9 kWh for 20% => 45 kWh
        let cap = s.observed_capacity_kwh().unwrap_or_default();
        assert!((cap - 45.0).abs() < 1e-9);
    }

    #[test]
    fn failed_refresh_keeps_request_pending() {
        let (mut s, queue) = scripted(40.0, vec![Ok(Some(50.0))]);
        s.update(0.0, ts(0));
        queue.borrow_mut().clear();
        queue.borrow_mut().push_back(Err(VehicleApiError::Timeout));
        s.request_refresh();
        s.update(4000.0, ts(3600));
        assert!((s.estimated_soc_pct().unwrap_or_default() - 60.0).abs() < 1e-9);

        queue.borrow_mut().clear();
        queue.borrow_mut().push_back(Ok(Some(55.0)));
        s.update(0.0, ts(7200));
        assert!((s.estimated_soc_pct().unwrap_or_default() - 55.0).abs() < 1e-9);
    }

    #[test]
    fn charge_required_for_target() {
        let (mut s, _) = scripted(40.0, vec![Ok(Some(50.0))]);
        s.update(0.0, ts(0));
        assert_eq!(s.charge_required_for_soc(80.0), Some(12.0));
    }

    #[test]
    fn hours_to_target_use_vehicle_rate() {
        let (mut s, _) = scripted(40.0, vec![Ok(Some(50.0))]);
        assert_eq!(s.hours_to_soc(80.0), None);
        s.update(0.0, ts(0));
        let hours = s.hours_to_soc(80.0).unwrap_or_default();
        assert!((hours - 12.0 / 6.6).abs() < 1e-9);
        assert_eq!(s.hours_to_soc(40.0), Some(0.0));
    }

    #[test]
    fn no_vehicle_has_no_charge_time() {
        let s = ChargeSession::new(Box::new(NoVehicle), 20.0, 80.0);
        assert_eq!(s.hours_to_soc(80.0), None);
    }

    struct ScriptedConnector(f64);

    impl VehicleConnector for ScriptedConnector {
        fn connect(&self, profile: &VehicleProfile) -> Box<dyn VehicleApi> {
            Box::new(Scripted {
                replies: Rc::new(RefCell::new(VecDeque::from(vec![Ok(Some(self.0))]))),
                capacity: profile.capacity_kwh,
            })
        }
    }

    fn input(connected: bool, added: f64, rate: f64, t: i64) -> SessionInput {
        SessionInput {
            car_connected: connected,
            charge_added_kwh: added,
            charge_rate_watts: rate,
            timestamp: ts(t),
        }
    }

    fn leaf_factory() -> SessionFactory {
        SessionFactory::new(
            VehicleProfile::for_kind(VehicleKind::Leaf),
            Box::new(ScriptedConnector(40.0)),
        )
    }

    #[test]
    fn tracker_creates_and_ends_on_disconnect() {
        let factory = leaf_factory();
        let mut tracker = SessionTracker::new();
        tracker.update(&input(false, 0.0, 0.0, 0), &factory, false, 1.0);
        assert!(tracker.session().is_none());

        tracker.update(&input(true, 0.0, 0.0, 60), &factory, false, 1.0);
        assert!(tracker.has_valid_session());

        tracker.update(&input(false, 3.0, 0.0, 120), &factory, false, 1.0);
        assert!(tracker.session().is_none());
    }

    #[test]
    fn tracker_ends_when_counter_falls_under_noise_floor() {
        let factory = leaf_factory();
        let mut tracker = SessionTracker::new();
        tracker.update(&input(true, 5.0, 3000.0, 0), &factory, false, 1.0);
        tracker.update(&input(true, 5.1, 3000.0, 60), &factory, false, 1.0);
        let before = tracker.session().map(ChargeSession::added_kwh);

        // A small regression above the floor is jitter.
        tracker.update(&input(true, 4.9, 3000.0, 120), &factory, false, 1.0);
        assert!(tracker.session().map(ChargeSession::added_kwh) > before);

        // Falling back to ~0 means a new session started on the charger.
        tracker.update(&input(true, 0.2, 3000.0, 180), &factory, false, 1.0);
        let session = tracker.session();
        assert!(session.is_some());
        assert_eq!(session.map(ChargeSession::added_kwh), Some(0.0));
    }

    #[test]
    fn second_car_gets_no_telemetry() {
        let factory = leaf_factory();
        let mut tracker = SessionTracker::new();
        tracker.update(&input(true, 0.0, 0.0, 0), &factory, true, 1.0);
        let validity = tracker.session().map(ChargeSession::validity);
        assert_eq!(validity, Some(SessionValidity::Invalid));
    }
}
