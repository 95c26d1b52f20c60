//! Surplus allocation: the snapshot, the site's loads, and the engine that
//! walks them each tick.

/// Drift-free tick pacing.
pub mod clock;
pub mod engine;
pub mod site;
/// Per-tick snapshot and validation.
pub mod state;

pub use clock::TickClock;
pub use engine::{DivertEngine, TickReport};
pub use site::Site;
pub use state::{CrossCheck, DivertState, LoadRef, StaleTolerance, State};
