//! Casualty selection

use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::types::{BattleId, PlayerId, UnitId};
use crate::model::GameState;

/// Which units die and which only take damage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasualtyDetails {
    pub killed: Vec<UnitId>,
    pub damaged: Vec<UnitId>,
}

impl CasualtyDetails {
    pub fn is_empty(&self) -> bool {
        self.killed.is_empty() && self.damaged.is_empty()
    }

    /// Hits absorbed by this selection
    pub fn hits_absorbed(&self) -> u32 {
        (self.killed.len() + self.damaged.len()) as u32
    }
}

#[derive(Debug, Clone)]
pub struct CasualtyRequest<'a> {
    pub battle: BattleId,
    pub step: &'a str,
    pub hitting_player: PlayerId,
    pub victim: PlayerId,
    /// Ordered least valuable first
    pub candidates: &'a [UnitId],
    pub hits: u32,
}

pub trait CasualtySelector {
    fn select_casualties(&mut self, state: &GameState, request: &CasualtyRequest<'_>) -> Result<CasualtyDetails>;
}

/// Damages multi-hit units first, then kills in candidate order, cheapest first
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoCasualtySelector;

impl AutoCasualtySelector {
    pub fn choose(state: &GameState, candidates: &[UnitId], hits: u32) -> CasualtyDetails {
        let mut remaining = hits;
        let mut details = CasualtyDetails::default();

        for &u in candidates {
            if remaining == 0 {
                break;
            }
            if state.remaining_hit_points(u) > 1 {
                details.damaged.push(u);
                remaining -= 1;
            }
        }

        let mut by_cost: Vec<UnitId> = candidates.to_vec();
        by_cost.sort_by_key(|&u| state.cost(u));
        for u in by_cost {
            if remaining == 0 {
                break;
            }
            // Undamaged multi-hit units need their extra hit first
            if state.remaining_hit_points(u) > 1 && !details.damaged.contains(&u) {
                continue;
            }
            details.killed.push(u);
            remaining -= 1;
        }
        details
    }
}

impl CasualtySelector for AutoCasualtySelector {
    fn select_casualties(&mut self, state: &GameState, request: &CasualtyRequest<'_>) -> Result<CasualtyDetails> {
        Ok(Self::choose(state, request.candidates, request.hits))
    }
}

/// Check a selection against the request
pub fn validate_selection(
    state: &GameState,
    request: &CasualtyRequest<'_>,
    details: &CasualtyDetails,
) -> std::result::Result<(), String> {
    let capacity: u32 = request
        .candidates
        .iter()
        .map(|&u| state.remaining_hit_points(u))
        .sum();
    let expected = request.hits.min(capacity);
    if details.hits_absorbed() != expected {
        return Err(format!(
            "selection absorbs {} hits, expected {}",
            details.hits_absorbed(),
            expected
        ));
    }
    for list in [&details.killed, &details.damaged] {
        for (i, u) in list.iter().enumerate() {
            if !request.candidates.contains(u) {
                return Err(format!("{} is not a legal casualty", u));
            }
            if list[..i].contains(u) {
                return Err(format!("{} selected twice", u));
            }
        }
    }
    for u in &details.damaged {
        if state.remaining_hit_points(*u) < 2 {
            return Err(format!("{} cannot absorb damage", u));
        }
    }
    Ok(())
}
