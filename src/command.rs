//! Commands the control loop issues to devices, and where they go.

use std::fmt;

use crate::devices::ChargerMode;
use crate::error::CommandError;

/// One outbound device command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    TurnOn { load: String },
    TurnOff { load: String },
    SetMode { charger: String, mode: ChargerMode },
    SetGreenLevel { charger: String, percent: u8 },
}

impl Command {
    /// Name of the device the command addresses.
    pub fn target(&self) -> &str {
        match self {
            Self::TurnOn { load } | Self::TurnOff { load } => load,
            Self::SetMode { charger, .. } | Self::SetGreenLevel { charger, .. } => charger,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TurnOn { load } => write!(f, "turn_on({load})"),
            Self::TurnOff { load } => write!(f, "turn_off({load})"),
            Self::SetMode { charger, mode } => write!(f, "set_mode({charger}, {mode})"),
            Self::SetGreenLevel { charger, percent } => {
                write!(f, "set_green_level({charger}, {percent}%)")
            }
        }
    }
}

/// Destination for device commands.
///
/// Implementations perform the device I/O. A returned error is logged by the
/// caller and the command is not retried within the tick.
pub trait CommandSink {
    fn send(&mut self, command: &Command) -> Result<(), CommandError>;
}

/// Sink that accepts every command and remembers it. Useful for dry runs.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub sent: Vec<Command>,
    /// Targets whose commands are rejected as unacknowledged.
    pub unresponsive: Vec<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a device as never acknowledging commands.
    pub fn with_unresponsive(mut self, target: impl Into<String>) -> Self {
        self.unresponsive.push(target.into());
        self
    }
}

impl CommandSink for RecordingSink {
    fn send(&mut self, command: &Command) -> Result<(), CommandError> {
        if self.unresponsive.iter().any(|t| t == command.target()) {
            return Err(CommandError::NotAcknowledged {
                command: command.to_string(),
            });
        }
        self.sent.push(command.clone());
        Ok(())
    }
}
