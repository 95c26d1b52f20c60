/// Seeded solar and house consumption profiles.
pub mod profile;
pub mod site;

pub use profile::{HouseProfile, SolarProfile};
pub use site::{CHARGER_ID, DIVERTER_ID, SimulatedSite};
