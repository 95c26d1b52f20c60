//! Loads the divert engine can observe and control.

/// Water-heater diverter and informational loads.
pub mod diverter;
/// EV charger state and session ownership.
pub mod ev_charger;
pub mod history;
/// Relay-switched smart plugs.
pub mod socket;
pub mod timer;
pub mod types;

// Re-export the main types for convenience
pub use diverter::{UnmanagedLoad, WaterHeaterDiverter};
pub use ev_charger::{ChargerMode, ChargerReading, ChargerStatus, EvCharger};
pub use history::LoadHistory;
pub use socket::{SocketMode, SocketReading, StrikeCounter, SwitchedSocket};
pub use timer::TimeWindow;
pub use types::Load;
