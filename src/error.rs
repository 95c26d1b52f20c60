//! Error types shared by the control loop and its external boundaries.

use thiserror::Error;

/// Failure to obtain a usable site snapshot. Aborts the whole tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TelemetryError {
    /// Two independently metered readings of the same quantity disagree.
    #[error("stale data: {quantity} readings disagree ({primary:.0} W vs {secondary:.0} W)")]
    StaleData {
        quantity: String,
        primary: f64,
        secondary: f64,
    },

    #[error("telemetry fetch timed out: {0}")]
    Timeout(String),

    /// Snapshot is internally inconsistent (e.g. a charger reporting 0 V).
    #[error("bogus telemetry: {0}")]
    Bogus(String),
}

/// Failure reading a vehicle's state of charge. Never fatal to a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VehicleApiError {
    #[error("vehicle api timed out")]
    Timeout,

    #[error("vehicle api rejected credentials")]
    Unauthorized,

    #[error("vehicle api unavailable: {0}")]
    Unavailable(String),
}

/// A device did not act on a command. Logged only, never retried in-tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("device did not acknowledge `{command}`")]
    NotAcknowledged { command: String },

    #[error("could not reach {target}: {reason}")]
    Unreachable { target: String, reason: String },
}
