use std::fmt;

/// Water-heater diverter. Self-modulates to soak up whatever surplus reaches
/// it, so the engine only reserves headroom for it.
#[derive(Debug, Clone, PartialEq)]
pub struct WaterHeaterDiverter {
    pub name: String,
    /// Last measured draw; `None` when this tick's reading is missing.
    pub draw_watts: Option<f64>,
}

impl WaterHeaterDiverter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            draw_watts: None,
        }
    }

    /// Current draw, zero when unknown.
    pub fn draw(&self) -> f64 {
        self.draw_watts.unwrap_or(0.0)
    }

    /// Heating above `threshold` watts (not satisfied).
    pub fn is_active(&self, threshold: f64) -> bool {
        self.draw() > threshold
    }
}

impl fmt::Display for WaterHeaterDiverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Diverter '{}' {:.0} Watts", self.name, self.draw())
    }
}

/// A metered load the engine cannot control. Informational only.
#[derive(Debug, Clone, PartialEq)]
pub struct UnmanagedLoad {
    pub name: String,
    pub watts: f64,
}

impl fmt::Display for UnmanagedLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Load '{}' {:.0} Watts", self.name, self.watts)
    }
}
