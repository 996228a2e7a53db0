//! Invertible game-state changes
//!
//! Every mutation the engine makes to [`GameState`] goes through a
//! [`Change`]. Each change carries the values it overwrites so that
//! [`Change::invert`] can undo it exactly.

use serde::{Deserialize, Serialize};

use crate::core::error::{BattleError, Result};
use crate::core::types::{PlayerId, TerritoryId, UnitId};
use crate::model::state::GameState;
use crate::model::unit::UnitFlag;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    TerritoryOwner {
        territory: TerritoryId,
        old: Option<PlayerId>,
        new: Option<PlayerId>,
    },
    /// `(unit, old owner, new owner)`
    UnitOwner {
        units: Vec<(UnitId, PlayerId, PlayerId)>,
    },
    RemoveUnits {
        territory: TerritoryId,
        units: Vec<UnitId>,
    },
    AddUnits {
        territory: TerritoryId,
        units: Vec<UnitId>,
    },
    MoveUnits {
        from: TerritoryId,
        to: TerritoryId,
        units: Vec<UnitId>,
    },
    Resources {
        player: PlayerId,
        delta: i64,
    },
    /// `(unit, old movement, new movement)`
    Movement {
        units: Vec<(UnitId, u32, u32)>,
    },
    /// `(unit, previous value)`
    Flag {
        units: Vec<(UnitId, bool)>,
        flag: UnitFlag,
        value: bool,
    },
    /// `(unit, old carrier, new carrier)`
    TransportedBy {
        units: Vec<(UnitId, Option<UnitId>, Option<UnitId>)>,
    },
    /// `(unit, old landing, new landing)`
    UnloadedTo {
        units: Vec<(UnitId, Option<TerritoryId>, Option<TerritoryId>)>,
    },
    Hits {
        unit: UnitId,
        old: u32,
        new: u32,
    },
    BombingDamage {
        unit: UnitId,
        old: u32,
        new: u32,
    },
}

impl Change {
    pub fn territory_owner(state: &GameState, territory: TerritoryId, new: Option<PlayerId>) -> Result<Change> {
        let old = state.territory(territory)?.owner;
        Ok(Change::TerritoryOwner { territory, old, new })
    }

    pub fn unit_owner(state: &GameState, units: &[UnitId], new: PlayerId) -> Result<Change> {
        let units = units
            .iter()
            .map(|&u| state.unit(u).map(|unit| (u, unit.owner, new)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Change::UnitOwner { units })
    }

    pub fn remove_units(territory: TerritoryId, units: &[UnitId]) -> Change {
        Change::RemoveUnits {
            territory,
            units: units.to_vec(),
        }
    }

    pub fn move_units(from: TerritoryId, to: TerritoryId, units: &[UnitId]) -> Change {
        Change::MoveUnits {
            from,
            to,
            units: units.to_vec(),
        }
    }

    pub fn resources(player: PlayerId, delta: i64) -> Change {
        Change::Resources { player, delta }
    }

    pub fn mark_no_movement(state: &GameState, units: &[UnitId]) -> Change {
        let units = units
            .iter()
            .filter_map(|&u| state.unit(u).ok())
            .filter(|u| u.movement_left != 0)
            .map(|u| (u.id, u.movement_left, 0))
            .collect();
        Change::Movement { units }
    }

    /// Only units whose flag differs are recorded
    pub fn flag(state: &GameState, units: &[UnitId], flag: UnitFlag, value: bool) -> Change {
        let units = units
            .iter()
            .filter_map(|&u| state.unit(u).ok())
            .filter(|u| u.flag(flag) != value)
            .map(|u| (u.id, u.flag(flag)))
            .collect();
        Change::Flag { units, flag, value }
    }

    pub fn transported_by(state: &GameState, units: &[UnitId], new: Option<UnitId>) -> Change {
        let units = units
            .iter()
            .filter_map(|&u| state.unit(u).ok())
            .filter(|u| u.transported_by != new)
            .map(|u| (u.id, u.transported_by, new))
            .collect();
        Change::TransportedBy { units }
    }

    /// Record where cargo went ashore while still tied to its transport
    pub fn unloaded_to(state: &GameState, units: &[UnitId], new: Option<TerritoryId>) -> Change {
        let units = units
            .iter()
            .filter_map(|&u| state.unit(u).ok())
            .filter(|u| u.unloaded_to != new)
            .map(|u| (u.id, u.unloaded_to, new))
            .collect();
        Change::UnloadedTo { units }
    }

    pub fn hits(state: &GameState, unit: UnitId, new: u32) -> Result<Change> {
        let old = state.unit(unit)?.hits;
        Ok(Change::Hits { unit, old, new })
    }

    pub fn bombing_damage(state: &GameState, unit: UnitId, new: u32) -> Result<Change> {
        let old = state.unit(unit)?.bombing_damage;
        Ok(Change::BombingDamage { unit, old, new })
    }

    /// Changes that would not alter state
    pub fn is_noop(&self) -> bool {
        match self {
            Change::TerritoryOwner { old, new, .. } => old == new,
            Change::UnitOwner { units, .. } => units.is_empty(),
            Change::RemoveUnits { units, .. }
            | Change::AddUnits { units, .. }
            | Change::MoveUnits { units, .. } => units.is_empty(),
            Change::Resources { delta, .. } => *delta == 0,
            Change::Movement { units, .. } => units.is_empty(),
            Change::Flag { units, .. } => units.is_empty(),
            Change::TransportedBy { units, .. } => units.is_empty(),
            Change::UnloadedTo { units } => units.is_empty(),
            Change::Hits { old, new, .. } | Change::BombingDamage { old, new, .. } => old == new,
        }
    }

    pub fn invert(&self) -> Change {
        match self.clone() {
            Change::TerritoryOwner { territory, old, new } => Change::TerritoryOwner {
                territory,
                old: new,
                new: old,
            },
            Change::UnitOwner { units } => Change::UnitOwner {
                units: units.into_iter().map(|(u, old, new)| (u, new, old)).collect(),
            },
            Change::RemoveUnits { territory, units } => Change::AddUnits { territory, units },
            Change::AddUnits { territory, units } => Change::RemoveUnits { territory, units },
            Change::MoveUnits { from, to, units } => Change::MoveUnits {
                from: to,
                to: from,
                units,
            },
            Change::Resources { player, delta } => Change::Resources {
                player,
                delta: -delta,
            },
            Change::Movement { units } => Change::Movement {
                units: units.into_iter().map(|(u, old, new)| (u, new, old)).collect(),
            },
            Change::Flag { units, flag, value } => Change::Flag {
                units: units.iter().map(|&(u, _)| (u, value)).collect(),
                flag,
                value: !value,
            },
            Change::TransportedBy { units } => Change::TransportedBy {
                units: units.into_iter().map(|(u, old, new)| (u, new, old)).collect(),
            },
            Change::UnloadedTo { units } => Change::UnloadedTo {
                units: units.into_iter().map(|(u, old, new)| (u, new, old)).collect(),
            },
            Change::Hits { unit, old, new } => Change::Hits { unit, old: new, new: old },
            Change::BombingDamage { unit, old, new } => Change::BombingDamage {
                unit,
                old: new,
                new: old,
            },
        }
    }
}

/// Ordered group of changes applied and undone as one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeChange {
    pub changes: Vec<Change>,
}

impl CompositeChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, change: Change) {
        if !change.is_noop() {
            self.changes.push(change);
        }
    }

    pub fn extend(&mut self, other: CompositeChange) {
        self.changes.extend(other.changes);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    /// Inverse of each change, in reverse order
    pub fn invert(&self) -> CompositeChange {
        CompositeChange {
            changes: self.changes.iter().rev().map(Change::invert).collect(),
        }
    }
}

impl GameState {
    pub fn apply(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::TerritoryOwner { territory, new, .. } => {
                self.territory_mut(*territory)?.owner = *new;
            }
            Change::UnitOwner { units } => {
                for &(u, _, new) in units {
                    self.unit_mut(u)?.owner = new;
                }
            }
            Change::RemoveUnits { territory, units } => {
                let t = self.territory_mut(*territory)?;
                t.units.retain(|u| !units.contains(u));
                for &u in units {
                    let unit = self.unit_mut(u)?;
                    if unit.location == Some(*territory) {
                        unit.location = None;
                    }
                }
            }
            Change::AddUnits { territory, units } => {
                for &u in units {
                    self.unit_mut(u)?.location = Some(*territory);
                }
                let t = self.territory_mut(*territory)?;
                for &u in units {
                    if !t.units.contains(&u) {
                        t.units.push(u);
                    }
                }
            }
            Change::MoveUnits { from, to, units } => {
                self.territory_mut(*from)?.units.retain(|u| !units.contains(u));
                for &u in units {
                    self.unit_mut(u)?.location = Some(*to);
                }
                let dest = self.territory_mut(*to)?;
                for &u in units {
                    if !dest.units.contains(&u) {
                        dest.units.push(u);
                    }
                }
            }
            Change::Resources { player, delta } => {
                let p = self.player_mut(*player)?;
                let next = p.pus as i64 + delta;
                if next < 0 {
                    return Err(BattleError::invariant(format!(
                        "{} would go below zero resources",
                        p.name
                    )));
                }
                p.pus = next as u32;
            }
            Change::Movement { units } => {
                for &(u, _, new) in units {
                    self.unit_mut(u)?.movement_left = new;
                }
            }
            Change::Flag { units, flag, value } => {
                for &(u, _) in units {
                    self.unit_mut(u)?.set_flag(*flag, *value);
                }
            }
            Change::TransportedBy { units } => {
                for &(u, _, new) in units {
                    self.unit_mut(u)?.transported_by = new;
                }
            }
            Change::UnloadedTo { units } => {
                for &(u, _, new) in units {
                    self.unit_mut(u)?.unloaded_to = new;
                }
            }
            Change::Hits { unit, new, .. } => {
                self.unit_mut(*unit)?.hits = *new;
            }
            Change::BombingDamage { unit, new, .. } => {
                self.unit_mut(*unit)?.bombing_damage = *new;
            }
        }
        Ok(())
    }

    pub fn apply_all(&mut self, change: &CompositeChange) -> Result<()> {
        for c in change.iter() {
            self.apply(c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::unit::{UnitDomain, UnitType};

    fn state() -> (GameState, TerritoryId, TerritoryId, UnitId) {
        let mut s = GameState::new();
        let inf = s.add_unit_type(UnitType {
            movement: 1,
            ..UnitType::named("infantry", UnitDomain::Land)
        });
        let p = s.add_player("Germany");
        let a = s.add_territory("A", false);
        let b = s.add_territory("B", false);
        let u = s.spawn_unit(inf, p, a).unwrap();
        (s, a, b, u)
    }

    #[test]
    fn test_move_and_invert() {
        let (mut s, a, b, u) = state();
        let before = s.clone();
        let change = Change::move_units(a, b, &[u]);
        s.apply(&change).unwrap();
        assert_eq!(s.location_of(u), Some(b));
        assert!(s.territory(a).unwrap().units.is_empty());
        s.apply(&change.invert()).unwrap();
        assert_eq!(s, before);
    }

    #[test]
    fn test_remove_clears_location() {
        let (mut s, a, _, u) = state();
        s.apply(&Change::remove_units(a, &[u])).unwrap();
        assert_eq!(s.location_of(u), None);
        assert!(s.unit(u).is_ok());
    }

    #[test]
    fn test_composite_invert_restores_state() {
        let (mut s, a, _, u) = state();
        let before = s.clone();
        let mut composite = CompositeChange::new();
        composite.add(Change::territory_owner(&s, a, Some(PlayerId(0))).unwrap());
        composite.add(Change::mark_no_movement(&s, &[u]));
        composite.add(Change::flag(&s, &[u], UnitFlag::WasInCombat, true));
        s.apply_all(&composite).unwrap();
        assert_eq!(s.unit(u).unwrap().movement_left, 0);
        s.apply_all(&composite.invert()).unwrap();
        assert_eq!(s, before);
    }

    #[test]
    fn test_noop_changes_are_dropped() {
        let (s, _, _, u) = state();
        let mut composite = CompositeChange::new();
        composite.add(Change::flag(&s, &[u], UnitFlag::Submerged, false));
        composite.add(Change::resources(PlayerId(0), 0));
        assert!(composite.is_empty());
    }

    #[test]
    fn test_unload_is_undone_with_the_attack() {
        let (mut s, _, b, u) = state();
        let before = s.clone();
        let change = Change::unloaded_to(&s, &[u], Some(b));
        s.apply(&change).unwrap();
        assert_eq!(s.unit(u).unwrap().unloaded_to, Some(b));
        assert!(Change::unloaded_to(&s, &[u], Some(b)).is_noop());
        s.apply(&change.invert()).unwrap();
        assert_eq!(s, before);
    }

    #[test]
    fn test_negative_resources_rejected() {
        let (mut s, _, _, _) = state();
        let err = s.apply(&Change::resources(PlayerId(0), -5)).unwrap_err();
        assert!(err.is_fatal());
    }
}
