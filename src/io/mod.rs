/// CSV tick export.
pub mod export;
