pub mod config;
pub mod error;
pub mod types;

pub use config::{load_rules, EngineConfig, RulesConfig};
pub use error::{BattleError, Result};
pub use types::{BattleId, PlayerId, Side, TerritoryId, UnitId, UnitTypeId};
