//! Common capability set shared by every load the engine can see.

use crate::command::Command;

use super::diverter::{UnmanagedLoad, WaterHeaterDiverter};
use super::ev_charger::EvCharger;
use super::socket::{SocketMode, SwitchedSocket};

/// Trait defining a load that competes for surplus power.
///
/// The engine works through this interface instead of inspecting concrete
/// device types, so allocation, logging and reporting treat sockets,
/// chargers and the diverter uniformly.
pub trait Load {
    fn name(&self) -> &str;

    /// Position in the allocation order; lower runs first.
    fn priority(&self) -> u32;

    /// Power the load is expected to draw when on (W).
    fn expected_draw(&self) -> f64;

    /// Power measured this tick (W).
    fn current_draw(&self) -> f64;

    fn is_on(&self) -> bool;

    /// `true` for loads that modulate their own draw to track surplus.
    fn is_divertable(&self) -> bool;

    /// Command that switches the load on, if it is switchable.
    fn turn_on(&self) -> Option<Command>;

    /// Command that switches the load off, if it is switchable.
    fn turn_off(&self) -> Option<Command>;

    /// Returns a human-readable type name for the load.
    fn load_type(&self) -> &'static str;
}

impl Load for SwitchedSocket {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn expected_draw(&self) -> f64 {
        SwitchedSocket::expected_draw(self)
    }

    fn current_draw(&self) -> f64 {
        self.watts()
    }

    fn is_on(&self) -> bool {
        SwitchedSocket::is_on(self)
    }

    fn is_divertable(&self) -> bool {
        false
    }

    fn turn_on(&self) -> Option<Command> {
        (self.mode != SocketMode::Manual).then(|| Command::TurnOn {
            load: self.name.clone(),
        })
    }

    fn turn_off(&self) -> Option<Command> {
        (self.mode != SocketMode::Manual).then(|| Command::TurnOff {
            load: self.name.clone(),
        })
    }

    fn load_type(&self) -> &'static str {
        "socket"
    }
}

impl Load for EvCharger {
    fn name(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn expected_draw(&self) -> f64 {
        self.charge_rate_watts().max(self.min_green_level_rate())
    }

    fn current_draw(&self) -> f64 {
        self.charge_rate_watts()
    }

    fn is_on(&self) -> bool {
        self.charge_rate_watts() > 0.0
    }

    fn is_divertable(&self) -> bool {
        true
    }

    fn turn_on(&self) -> Option<Command> {
        None
    }

    fn turn_off(&self) -> Option<Command> {
        None
    }

    fn load_type(&self) -> &'static str {
        "charger"
    }
}

impl Load for WaterHeaterDiverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        0
    }

    fn expected_draw(&self) -> f64 {
        self.draw()
    }

    fn current_draw(&self) -> f64 {
        self.draw()
    }

    fn is_on(&self) -> bool {
        true
    }

    fn is_divertable(&self) -> bool {
        true
    }

    fn turn_on(&self) -> Option<Command> {
        None
    }

    fn turn_off(&self) -> Option<Command> {
        None
    }

    fn load_type(&self) -> &'static str {
        "diverter"
    }
}

impl Load for UnmanagedLoad {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        u32::MAX
    }

    fn expected_draw(&self) -> f64 {
        self.watts
    }

    fn current_draw(&self) -> f64 {
        self.watts
    }

    fn is_on(&self) -> bool {
        self.watts > 0.0
    }

    fn is_divertable(&self) -> bool {
        false
    }

    fn turn_on(&self) -> Option<Command> {
        None
    }

    fn turn_off(&self) -> Option<Command> {
        None
    }

    fn load_type(&self) -> &'static str {
        "unmanaged"
    }
}
