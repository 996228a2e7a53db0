use thiserror::Error;

use crate::core::types::{BattleId, PlayerId, TerritoryId, UnitId};

#[derive(Error, Debug)]
pub enum BattleError {
    /// A structural rule of the engine was broken. Resolution must stop.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The remote side dropped while we were waiting on it. Safe to re-issue.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Illegal input: {0}")]
    IllegalInput(String),

    #[error("Battle {battle} is blocked by {blocking:?}")]
    BattleBlocked {
        battle: BattleId,
        blocking: Vec<BattleId>,
    },

    #[error("Battle not found: {0}")]
    UnknownBattle(BattleId),

    #[error("Unit not found: {0}")]
    UnknownUnit(UnitId),

    #[error("Territory not found: {0}")]
    UnknownTerritory(TerritoryId),

    #[error("Player not found: {0}")]
    UnknownPlayer(PlayerId),

    #[error("Unit type not found: {0}")]
    UnknownUnitType(String),

    #[error("Territory {0} already provided naval bombardment this turn")]
    BombardmentSourceUsed(TerritoryId),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl BattleError {
    /// Only a lost connection may be retried by re-issuing the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BattleError::ConnectionLost(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, BattleError::InvariantViolation(_))
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        BattleError::InvariantViolation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, BattleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_lost_is_retryable() {
        assert!(BattleError::ConnectionLost("peer".into()).is_retryable());
        assert!(!BattleError::IllegalInput("bad".into()).is_retryable());
        assert!(!BattleError::invariant("boom").is_retryable());
    }

    #[test]
    fn test_invariant_is_fatal() {
        assert!(BattleError::invariant("Non empty change").is_fatal());
        assert!(!BattleError::ConnectionLost("x".into()).is_fatal());
    }
}
