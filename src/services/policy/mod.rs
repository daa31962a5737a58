//! Click policies: geo allow/block rules and bot scoring

pub mod bot;
pub mod geo;

pub use bot::{BotPolicy, BotSignals, BotVerdict};
pub use geo::{GeoDecision, GeoPolicy, evaluate_geo_rules};
