//! Solar surplus diversion for a household with switched loads, EV chargers
//! and a water-heater diverter.

pub mod command;
pub mod config;
pub mod devices;
/// Surplus allocation engine and per-tick snapshot.
pub mod divert;
pub mod energy;
pub mod error;
/// CSV export.
pub mod io;
pub mod runner;
/// Charge sessions and vehicle SOC back-ends.
pub mod session;
/// Modelled site for dry runs.
pub mod sim;
