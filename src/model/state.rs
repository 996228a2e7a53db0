//! Game state arena consumed by the battle engine

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{BattleError, Result};
use crate::core::types::{PlayerId, TerritoryId, UnitId, UnitTypeId};
use crate::model::player::{Player, Relationships};
use crate::model::territory::Territory;
use crate::model::unit::{Unit, UnitType};

/// Everything the engine reads and mutates, indexed by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub unit_types: Vec<UnitType>,
    pub units: BTreeMap<UnitId, Unit>,
    pub territories: Vec<Territory>,
    pub players: Vec<Player>,
    pub relationships: Relationships,
    next_unit: u32,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    // === LOOKUPS ===

    pub fn unit(&self, id: UnitId) -> Result<&Unit> {
        self.units.get(&id).ok_or(BattleError::UnknownUnit(id))
    }

    pub fn unit_mut(&mut self, id: UnitId) -> Result<&mut Unit> {
        self.units.get_mut(&id).ok_or(BattleError::UnknownUnit(id))
    }

    pub fn unit_type(&self, id: UnitTypeId) -> Result<&UnitType> {
        self.unit_types
            .get(id.0 as usize)
            .ok_or_else(|| BattleError::UnknownUnitType(id.to_string()))
    }

    pub fn unit_type_id(&self, name: &str) -> Result<UnitTypeId> {
        self.unit_types
            .iter()
            .position(|t| t.name == name)
            .map(|i| UnitTypeId(i as u16))
            .ok_or_else(|| BattleError::UnknownUnitType(name.to_string()))
    }

    /// Type of a live or dead unit
    pub fn type_of(&self, unit: UnitId) -> Option<&UnitType> {
        let u = self.units.get(&unit)?;
        self.unit_types.get(u.type_id.0 as usize)
    }

    pub fn territory(&self, id: TerritoryId) -> Result<&Territory> {
        self.territories
            .get(id.0 as usize)
            .ok_or(BattleError::UnknownTerritory(id))
    }

    pub fn territory_mut(&mut self, id: TerritoryId) -> Result<&mut Territory> {
        self.territories
            .get_mut(id.0 as usize)
            .ok_or(BattleError::UnknownTerritory(id))
    }

    pub fn territory_id(&self, name: &str) -> Result<TerritoryId> {
        self.territories
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.id)
            .ok_or_else(|| BattleError::Parse(format!("unknown territory '{}'", name)))
    }

    pub fn player(&self, id: PlayerId) -> Result<&Player> {
        self.players
            .get(id.0 as usize)
            .ok_or(BattleError::UnknownPlayer(id))
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Result<&mut Player> {
        self.players
            .get_mut(id.0 as usize)
            .ok_or(BattleError::UnknownPlayer(id))
    }

    pub fn player_id(&self, name: &str) -> Result<PlayerId> {
        self.players
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.id)
            .ok_or_else(|| BattleError::Parse(format!("unknown player '{}'", name)))
    }

    pub fn player_name(&self, id: PlayerId) -> String {
        if id.is_neutral() {
            return "Neutral".into();
        }
        self.player(id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|_| id.to_string())
    }

    pub fn territory_name(&self, id: TerritoryId) -> String {
        self.territory(id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|_| id.to_string())
    }

    pub fn location_of(&self, unit: UnitId) -> Option<TerritoryId> {
        self.units.get(&unit).and_then(|u| u.location)
    }

    // === RELATIONSHIPS ===

    pub fn is_at_war(&self, a: PlayerId, b: PlayerId) -> bool {
        self.relationships.is_at_war(a, b)
    }

    pub fn is_allied(&self, a: PlayerId, b: PlayerId) -> bool {
        self.relationships.is_allied(a, b)
    }

    /// Owned by someone `player` is at war with, or unowned land
    pub fn is_enemy_territory(&self, territory: TerritoryId, player: PlayerId) -> bool {
        match self.territory(territory) {
            Ok(t) => match t.owner {
                Some(owner) => self.is_at_war(player, owner),
                None => !t.is_water,
            },
            Err(_) => false,
        }
    }

    pub fn is_enemy_unit(&self, unit: UnitId, player: PlayerId) -> bool {
        self.units
            .get(&unit)
            .map(|u| self.is_at_war(u.owner, player))
            .unwrap_or(false)
    }

    // === UNIT QUERIES ===

    pub fn matches(&self, unit: UnitId, pred: impl Fn(&Unit, &UnitType) -> bool) -> bool {
        match self.units.get(&unit) {
            Some(u) => self
                .unit_types
                .get(u.type_id.0 as usize)
                .map(|t| pred(u, t))
                .unwrap_or(false),
            None => false,
        }
    }

    pub fn filter(&self, units: &[UnitId], pred: impl Fn(&Unit, &UnitType) -> bool) -> Vec<UnitId> {
        units
            .iter()
            .copied()
            .filter(|&id| self.matches(id, &pred))
            .collect()
    }

    pub fn any(&self, units: &[UnitId], pred: impl Fn(&Unit, &UnitType) -> bool) -> bool {
        units.iter().any(|&id| self.matches(id, &pred))
    }

    /// True for an empty slice
    pub fn all(&self, units: &[UnitId], pred: impl Fn(&Unit, &UnitType) -> bool) -> bool {
        units.iter().all(|&id| self.matches(id, &pred))
    }

    pub fn units_in(&self, territory: TerritoryId) -> Vec<UnitId> {
        self.territory(territory)
            .map(|t| t.units.clone())
            .unwrap_or_default()
    }

    pub fn enemy_units_in(&self, territory: TerritoryId, player: PlayerId) -> Vec<UnitId> {
        self.units_in(territory)
            .into_iter()
            .filter(|&u| self.is_enemy_unit(u, player))
            .collect()
    }

    pub fn is_in(&self, unit: UnitId, territory: TerritoryId) -> bool {
        self.location_of(unit) == Some(territory)
    }

    /// Units carried by `transport`, loaded or unloaded this turn
    pub fn transporting(&self, transport: UnitId) -> Vec<UnitId> {
        self.units
            .values()
            .filter(|u| u.transported_by == Some(transport) && u.location.is_some())
            .map(|u| u.id)
            .collect()
    }

    pub fn owner_of(&self, unit: UnitId) -> Option<PlayerId> {
        self.units.get(&unit).map(|u| u.owner)
    }

    /// Total unit value of the units owned by `owner` or its allies
    pub fn tuv_for(&self, units: &[UnitId], owner: PlayerId) -> u32 {
        units
            .iter()
            .filter_map(|&id| {
                let u = self.units.get(&id)?;
                if !self.is_allied(u.owner, owner) {
                    return None;
                }
                self.unit_types.get(u.type_id.0 as usize).map(|t| t.cost)
            })
            .sum()
    }

    pub fn cost(&self, unit: UnitId) -> u32 {
        self.type_of(unit).map(|t| t.cost).unwrap_or(0)
    }

    /// Hits a unit can still absorb before dying
    pub fn remaining_hit_points(&self, unit: UnitId) -> u32 {
        match (self.units.get(&unit), self.type_of(unit)) {
            (Some(u), Some(t)) => t.hit_points.saturating_sub(u.hits).max(1),
            _ => 1,
        }
    }

    // === TERRITORY QUERIES ===

    /// Capitals of `player` that `player` still holds
    pub fn capitals_owned_by(&self, player: PlayerId) -> Vec<TerritoryId> {
        self.territories
            .iter()
            .filter(|t| t.capital_of == Some(player) && t.owner == Some(player))
            .map(|t| t.id)
            .collect()
    }

    pub fn original_capitals(&self, player: PlayerId) -> Vec<TerritoryId> {
        self.territories
            .iter()
            .filter(|t| t.capital_of == Some(player))
            .map(|t| t.id)
            .collect()
    }

    /// Sea zones whose convoy feeds `land`
    pub fn convoy_zones_for(&self, land: TerritoryId) -> Vec<TerritoryId> {
        self.territories
            .iter()
            .filter(|t| t.convoy_for.contains(&land))
            .map(|t| t.id)
            .collect()
    }

    // === CONSTRUCTION ===

    pub fn add_unit_type(&mut self, unit_type: UnitType) -> UnitTypeId {
        self.unit_types.push(unit_type);
        UnitTypeId((self.unit_types.len() - 1) as u16)
    }

    pub fn add_territory(&mut self, name: &str, is_water: bool) -> TerritoryId {
        let id = TerritoryId(self.territories.len() as u32);
        self.territories.push(Territory::new(id, name, is_water));
        id
    }

    pub fn add_player(&mut self, name: &str) -> PlayerId {
        let id = PlayerId(self.players.len() as u32);
        self.players.push(Player::new(id, name));
        id
    }

    /// Create a unit and place it on the map
    pub fn spawn_unit(
        &mut self,
        type_id: UnitTypeId,
        owner: PlayerId,
        territory: TerritoryId,
    ) -> Result<UnitId> {
        let movement = self.unit_type(type_id)?.movement;
        self.territory(territory)?;
        let id = UnitId(self.next_unit);
        self.next_unit += 1;
        let mut unit = Unit::new(id, type_id, owner, movement);
        unit.location = Some(territory);
        self.units.insert(id, unit);
        self.territory_mut(territory)?.units.push(id);
        Ok(id)
    }
}
