use serde::{Deserialize, Serialize};

use crate::core::types::TerritoryId;
use crate::model::state::GameState;

/// A movement path: start territory followed by each step entered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub start: TerritoryId,
    pub steps: Vec<TerritoryId>,
}

impl Route {
    pub fn new(start: TerritoryId, steps: Vec<TerritoryId>) -> Self {
        Self { start, steps }
    }

    /// Zero-length route used when units fight where they already are
    pub fn stationary(at: TerritoryId) -> Self {
        Self {
            start: at,
            steps: Vec::new(),
        }
    }

    pub fn end(&self) -> TerritoryId {
        self.steps.last().copied().unwrap_or(self.start)
    }

    pub fn has_exactly_one_step(&self) -> bool {
        self.steps.len() == 1
    }

    pub fn has_steps(&self) -> bool {
        !self.steps.is_empty()
    }

    /// Territory the units were in just before entering the end
    pub fn territory_before_end(&self) -> TerritoryId {
        match self.steps.len() {
            0 | 1 => self.start,
            n => self.steps[n - 2],
        }
    }

    /// Start plus every step
    pub fn all_territories(&self) -> Vec<TerritoryId> {
        let mut all = Vec::with_capacity(self.steps.len() + 1);
        all.push(self.start);
        all.extend(self.steps.iter().copied());
        all
    }

    /// Sea to land movement
    pub fn is_unload(&self, state: &GameState) -> bool {
        let start_water = state.territory(self.start).map(|t| t.is_water).unwrap_or(false);
        let end_land = state.territory(self.end()).map(|t| !t.is_water).unwrap_or(false);
        start_water && end_land && self.has_steps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_end_and_before_end() {
        let r = Route::new(TerritoryId(0), vec![TerritoryId(1), TerritoryId(2)]);
        assert_eq!(r.end(), TerritoryId(2));
        assert_eq!(r.territory_before_end(), TerritoryId(1));
        assert_eq!(r.all_territories().len(), 3);
    }

    #[test]
    fn test_stationary_route() {
        let r = Route::stationary(TerritoryId(4));
        assert_eq!(r.end(), TerritoryId(4));
        assert_eq!(r.territory_before_end(), TerritoryId(4));
        assert!(!r.has_exactly_one_step());
    }
}
