//! Map, unit and player data the battle engine operates on

pub mod builder;
pub mod change;
pub mod matches;
pub mod player;
pub mod route;
pub mod state;
pub mod territory;
pub mod unit;

pub use builder::{classic_unit_types, GameStateBuilder};
pub use change::{Change, CompositeChange};
pub use player::{Player, Relationship, Relationships};
pub use route::Route;
pub use state::GameState;
pub use territory::Territory;
pub use unit::{AaStats, Unit, UnitDomain, UnitFlag, UnitType};
