//! Battle Engine - turn-based territory wargame battle resolution

pub mod battle;
pub mod bridge;
pub mod core;
pub mod model;
pub mod odds;
pub mod scenario;
