//! Remote decision gateway

use std::collections::VecDeque;

use crate::core::error::{BattleError, Result};
use crate::core::types::{BattleId, PlayerId, TerritoryId};

#[derive(Debug, Clone)]
pub struct RetreatQuery<'a> {
    pub battle: BattleId,
    pub player: PlayerId,
    pub site: TerritoryId,
    pub available: &'a [TerritoryId],
    /// Choosing the battle site means submerging
    pub submerge: bool,
    pub prompt: &'a str,
}

/// Asks a controlling player to decide. Calls may block for as long as the
/// player takes and may fail with [`BattleError::ConnectionLost`].
pub trait RemoteGateway {
    /// `None` means stay and fight
    fn query_retreat(&mut self, query: &RetreatQuery<'_>) -> Result<Option<TerritoryId>>;

    fn confirm(&mut self, player: PlayerId, prompt: &str) -> Result<bool>;
}

/// Never retreats and accepts every confirmation
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoRemote;

impl RemoteGateway for AutoRemote {
    fn query_retreat(&mut self, _query: &RetreatQuery<'_>) -> Result<Option<TerritoryId>> {
        Ok(None)
    }

    fn confirm(&mut self, _player: PlayerId, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetreatAnswer {
    Stay,
    To(TerritoryId),
    /// Fail this call with a lost connection
    Drop,
}

/// Answers from a queue, recording every question asked
#[derive(Debug, Clone, Default)]
pub struct ScriptedRemote {
    retreats: VecDeque<RetreatAnswer>,
    confirms: VecDeque<bool>,
    /// (player, offered destinations, submerge) per retreat query
    pub asked: Vec<(PlayerId, Vec<TerritoryId>, bool)>,
    pub confirmations_asked: Vec<(PlayerId, String)>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retreat(mut self, answer: RetreatAnswer) -> Self {
        self.retreats.push_back(answer);
        self
    }

    pub fn confirm_answer(mut self, answer: bool) -> Self {
        self.confirms.push_back(answer);
        self
    }
}

impl RemoteGateway for ScriptedRemote {
    fn query_retreat(&mut self, query: &RetreatQuery<'_>) -> Result<Option<TerritoryId>> {
        match self.retreats.pop_front() {
            Some(RetreatAnswer::Drop) => Err(BattleError::ConnectionLost(format!(
                "{} disconnected",
                query.player
            ))),
            answer => {
                self.asked
                    .push((query.player, query.available.to_vec(), query.submerge));
                Ok(match answer {
                    Some(RetreatAnswer::To(t)) => Some(t),
                    _ => None,
                })
            }
        }
    }

    fn confirm(&mut self, player: PlayerId, prompt: &str) -> Result<bool> {
        self.confirmations_asked.push((player, prompt.to_string()));
        Ok(self.confirms.pop_front().unwrap_or(true))
    }
}
