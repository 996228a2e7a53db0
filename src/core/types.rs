//! Core type definitions used throughout the engine

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a battle
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display(fmt = "{}", _0)]
pub struct BattleId(pub Uuid);

impl BattleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BattleId {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of a unit in the game-state arena
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display(fmt = "unit#{}", _0)]
pub struct UnitId(pub u32);

/// Index of a territory (land or sea zone)
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display(fmt = "territory#{}", _0)]
pub struct TerritoryId(pub u32);

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display(fmt = "player#{}", _0)]
pub struct PlayerId(pub u32);

impl PlayerId {
    /// Owner of unowned land and of units that belong to no player
    pub const NEUTRAL: PlayerId = PlayerId(u32::MAX);

    pub fn is_neutral(self) -> bool {
        self == Self::NEUTRAL
    }
}

/// Index into the unit type catalogue
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display(fmt = "type#{}", _0)]
pub struct UnitTypeId(pub u16);

/// Which side of a battle a unit fights on
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Attacker,
    Defender,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Attacker => Side::Defender,
            Side::Defender => Side::Attacker,
        }
    }

    pub fn is_defender(self) -> bool {
        self == Side::Defender
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battle_id_unique() {
        let a = BattleId::new();
        let b = BattleId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Attacker.opposite(), Side::Defender);
        assert_eq!(Side::Defender.opposite(), Side::Attacker);
        assert!(Side::Defender.is_defender());
    }

    #[test]
    fn test_id_display() {
        assert_eq!(UnitId(7).to_string(), "unit#7");
        assert_eq!(TerritoryId(3).to_string(), "territory#3");
    }
}
