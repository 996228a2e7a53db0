use serde::{Deserialize, Serialize};

use crate::core::types::{PlayerId, TerritoryId, UnitId};

/// A land territory or sea zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Territory {
    pub id: TerritoryId,
    pub name: String,
    pub is_water: bool,
    /// `None` for neutral land and unowned sea
    pub owner: Option<PlayerId>,
    pub original_owner: Option<PlayerId>,
    pub production: u32,
    pub capital_of: Option<PlayerId>,
    /// Land territories whose production depends on this sea zone
    pub convoy_for: Vec<TerritoryId>,
    pub neighbors: Vec<TerritoryId>,
    /// (capturer, receiver) overrides applied on conquest
    pub captured_goes_to: Vec<(PlayerId, PlayerId)>,
    /// Occupants in insertion order
    pub units: Vec<UnitId>,
}

impl Territory {
    pub fn new(id: TerritoryId, name: &str, is_water: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            is_water,
            owner: None,
            original_owner: None,
            production: 0,
            capital_of: None,
            convoy_for: Vec::new(),
            neighbors: Vec::new(),
            captured_goes_to: Vec::new(),
            units: Vec::new(),
        }
    }

    pub fn is_convoy_route(&self) -> bool {
        !self.convoy_for.is_empty()
    }

    /// Unowned water that no player can ever hold
    pub fn is_unownable_water(&self) -> bool {
        self.is_water && self.owner.is_none() && !self.is_convoy_route()
    }

    pub fn contains(&self, unit: UnitId) -> bool {
        self.units.contains(&unit)
    }
}
