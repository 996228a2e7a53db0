//! Fluent construction of game states for scenarios and tests

use crate::core::error::{BattleError, Result};
use crate::core::types::{PlayerId, TerritoryId, UnitId};
use crate::model::player::Relationship;
use crate::model::state::GameState;
use crate::model::unit::{AaStats, UnitDomain, UnitType};

/// Unit catalogue modelled on the classic ruleset
pub fn classic_unit_types() -> Vec<UnitType> {
    vec![
        UnitType {
            attack: 1,
            defense: 2,
            cost: 3,
            transport_cost: 2,
            is_air_transportable: true,
            ..UnitType::named("infantry", UnitDomain::Land)
        },
        UnitType {
            attack: 2,
            defense: 2,
            cost: 4,
            transport_cost: 3,
            ..UnitType::named("artillery", UnitDomain::Land)
        },
        UnitType {
            attack: 3,
            defense: 3,
            cost: 5,
            movement: 2,
            transport_cost: 3,
            can_blitz: true,
            ..UnitType::named("armour", UnitDomain::Land)
        },
        UnitType {
            attack: 3,
            defense: 4,
            cost: 10,
            movement: 4,
            carrier_cost: 1,
            can_intercept: true,
            can_escort: true,
            air_attack: 1,
            air_defense: 1,
            ..UnitType::named("fighter", UnitDomain::Air)
        },
        UnitType {
            attack: 4,
            defense: 1,
            cost: 12,
            movement: 6,
            is_strategic_bomber: true,
            ..UnitType::named("bomber", UnitDomain::Air)
        },
        UnitType {
            cost: 7,
            movement: 2,
            is_transport: true,
            transport_capacity: 5,
            ..UnitType::named("transport", UnitDomain::Sea)
        },
        UnitType {
            attack: 2,
            defense: 1,
            cost: 6,
            movement: 2,
            is_sub: true,
            ..UnitType::named("submarine", UnitDomain::Sea)
        },
        UnitType {
            attack: 2,
            defense: 2,
            cost: 8,
            movement: 2,
            is_destroyer: true,
            ..UnitType::named("destroyer", UnitDomain::Sea)
        },
        UnitType {
            attack: 4,
            defense: 4,
            cost: 20,
            movement: 2,
            hit_points: 2,
            bombard: 4,
            ..UnitType::named("battleship", UnitDomain::Sea)
        },
        UnitType {
            attack: 1,
            defense: 3,
            cost: 14,
            movement: 2,
            carrier_capacity: 2,
            ..UnitType::named("carrier", UnitDomain::Sea)
        },
        UnitType {
            cost: 5,
            is_infrastructure: true,
            aa: Some(AaStats::default()),
            ..UnitType::named("aa_gun", UnitDomain::Land)
        },
        UnitType {
            cost: 15,
            movement: 0,
            is_infrastructure: true,
            max_damage: 20,
            ..UnitType::named("factory", UnitDomain::Land)
        },
    ]
}

/// Builds a [`GameState`] by name. The first lookup failure is kept and
/// reported by [`GameStateBuilder::build`].
#[derive(Debug, Default)]
pub struct GameStateBuilder {
    state: GameState,
    error: Option<BattleError>,
}

impl GameStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the classic unit catalogue
    pub fn classic() -> Self {
        let mut builder = Self::new();
        for t in classic_unit_types() {
            builder.state.add_unit_type(t);
        }
        builder
    }

    fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
                None
            }
        }
    }

    pub fn unit_type(mut self, unit_type: UnitType) -> Self {
        self.state.add_unit_type(unit_type);
        self
    }

    pub fn player(mut self, name: &str, pus: u32) -> Self {
        let id = self.state.add_player(name);
        if let Ok(p) = self.state.player_mut(id) {
            p.pus = pus;
        }
        self
    }

    pub fn relationship(mut self, a: &str, b: &str, rel: Relationship) -> Self {
        let looked_up = self.state.player_id(a).and_then(|a| {
            self.state.player_id(b).map(|b| (a, b))
        });
        let ids = self.record(looked_up);
        if let Some((a, b)) = ids {
            self.state.relationships.set(a, b, rel);
        }
        self
    }

    pub fn allied(self, a: &str, b: &str) -> Self {
        self.relationship(a, b, Relationship::Allied)
    }

    pub fn land(mut self, name: &str, owner: Option<&str>, production: u32) -> Self {
        let owner = match owner {
            Some(o) => {
                let id = self.state.player_id(o);
                self.record(id)
            }
            None => None,
        };
        let id = self.state.add_territory(name, false);
        if let Ok(t) = self.state.territory_mut(id) {
            t.owner = owner;
            t.original_owner = owner;
            t.production = production;
        }
        self
    }

    pub fn sea(mut self, name: &str) -> Self {
        self.state.add_territory(name, true);
        self
    }

    pub fn connect(mut self, a: &str, b: &str) -> Self {
        let looked_up = self.state.territory_id(a).and_then(|a| {
            self.state.territory_id(b).map(|b| (a, b))
        });
        let ids = self.record(looked_up);
        if let Some((a, b)) = ids {
            if let Ok(t) = self.state.territory_mut(a) {
                t.neighbors.push(b);
            }
            if let Ok(t) = self.state.territory_mut(b) {
                t.neighbors.push(a);
            }
        }
        self
    }

    pub fn capital(mut self, territory: &str, player: &str) -> Self {
        let looked_up = self.state.territory_id(territory).and_then(|t| {
            self.state.player_id(player).map(|p| (t, p))
        });
        let ids = self.record(looked_up);
        if let Some((t, p)) = ids {
            if let Ok(t) = self.state.territory_mut(t) {
                t.capital_of = Some(p);
            }
        }
        self
    }

    /// Mark a sea zone as feeding the production of a land territory
    pub fn convoy(mut self, sea: &str, land: &str) -> Self {
        let looked_up = self.state.territory_id(sea).and_then(|s| {
            self.state.territory_id(land).map(|l| (s, l))
        });
        let ids = self.record(looked_up);
        if let Some((s, l)) = ids {
            if let Ok(t) = self.state.territory_mut(s) {
                t.convoy_for.push(l);
            }
        }
        self
    }

    pub fn units(mut self, territory: &str, owner: &str, count: u32, type_name: &str) -> Self {
        let looked_up = self.lookup(territory, owner, type_name);
        let ids = self.record(looked_up);
        if let Some((t, p, ty)) = ids {
            for _ in 0..count {
                let spawned = self.state.spawn_unit(ty, p, t);
                self.record(spawned);
            }
        }
        self
    }

    fn lookup(
        &self,
        territory: &str,
        owner: &str,
        type_name: &str,
    ) -> Result<(TerritoryId, PlayerId, crate::core::types::UnitTypeId)> {
        Ok((
            self.state.territory_id(territory)?,
            self.state.player_id(owner)?,
            self.state.unit_type_id(type_name)?,
        ))
    }

    /// Apply an arbitrary edit to the state being built
    pub fn with(mut self, f: impl FnOnce(&mut GameState) -> Result<()>) -> Self {
        let result = f(&mut self.state);
        self.record(result);
        self
    }

    pub fn build(self) -> Result<GameState> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.state),
        }
    }
}

impl GameState {
    /// Units of one type owned by `owner` in `territory`, in placement order
    pub fn units_of_type(&self, territory: TerritoryId, owner: PlayerId, type_name: &str) -> Vec<UnitId> {
        let Ok(type_id) = self.unit_type_id(type_name) else {
            return Vec::new();
        };
        self.units_in(territory)
            .into_iter()
            .filter(|&u| {
                self.unit(u)
                    .map(|unit| unit.owner == owner && unit.type_id == type_id)
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_places_units() {
        let state = GameStateBuilder::classic()
            .player("Germany", 10)
            .player("Russia", 10)
            .land("Berlin", Some("Germany"), 10)
            .land("Warsaw", Some("Russia"), 2)
            .connect("Berlin", "Warsaw")
            .units("Berlin", "Germany", 3, "infantry")
            .build()
            .expect("Should build");
        let berlin = state.territory_id("Berlin").unwrap();
        let germany = state.player_id("Germany").unwrap();
        assert_eq!(state.units_of_type(berlin, germany, "infantry").len(), 3);
        assert!(state.is_at_war(germany, state.player_id("Russia").unwrap()));
        assert_eq!(state.territory(berlin).unwrap().neighbors.len(), 1);
    }

    #[test]
    fn test_builder_reports_first_error() {
        let err = GameStateBuilder::classic()
            .player("Germany", 0)
            .units("Nowhere", "Germany", 1, "infantry")
            .build()
            .unwrap_err();
        assert!(matches!(err, BattleError::Parse(_)));
    }
}
