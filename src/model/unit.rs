//! Unit types and unit instances

use serde::{Deserialize, Serialize};

use crate::core::types::{PlayerId, TerritoryId, UnitId, UnitTypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UnitDomain {
    #[default]
    Land,
    Sea,
    Air,
}

/// Anti-aircraft capability attached to a unit type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AaStats {
    /// Units of the same category fire together in one roll
    pub aa_type: String,
    pub strength: u32,
    /// Dice per AA unit. 0 means one die per eligible target.
    pub max_rolls_per_unit: u32,
    pub targets: Vec<UnitDomain>,
    /// Fires when attacking, not only when defending
    pub offensive: bool,
    /// Fires during normal battles
    pub in_combat: bool,
    /// Fires at strategic bombers during raids
    pub vs_raids: bool,
    /// Combat rounds in which the gun fires. 0 means every round.
    pub max_rounds: u32,
}

impl Default for AaStats {
    fn default() -> Self {
        Self {
            aa_type: "AA".into(),
            strength: 1,
            max_rolls_per_unit: 0,
            targets: vec![UnitDomain::Air],
            offensive: false,
            in_combat: true,
            vs_raids: true,
            max_rounds: 1,
        }
    }
}

/// Static stats shared by every unit of one type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitType {
    pub name: String,
    pub domain: UnitDomain,
    pub attack: u32,
    pub defense: u32,
    /// Dice rolled per unit each volley
    pub rolls: u32,
    pub cost: u32,
    pub movement: u32,
    pub hit_points: u32,

    pub is_sub: bool,
    pub is_destroyer: bool,
    pub is_transport: bool,
    pub transport_capacity: u32,
    pub transport_cost: u32,
    pub is_air_transport: bool,
    pub is_air_transportable: bool,
    pub carrier_capacity: u32,
    pub carrier_cost: u32,

    pub is_infrastructure: bool,
    pub is_suicide: bool,
    pub can_blitz: bool,
    /// Naval bombardment strength, 0 if the unit cannot bombard
    pub bombard: u32,

    pub is_strategic_bomber: bool,
    pub bombing_bonus: i32,
    /// Bombing damage the unit can absorb. 0 means it is not a bombing target.
    pub max_damage: u32,

    pub can_intercept: bool,
    pub can_escort: bool,
    pub air_attack: u32,
    pub air_defense: u32,

    pub aa: Option<AaStats>,

    pub capturable_on_entering: bool,
    pub destroyed_when_captured: bool,
}

impl Default for UnitType {
    fn default() -> Self {
        Self {
            name: String::new(),
            domain: UnitDomain::Land,
            attack: 0,
            defense: 0,
            rolls: 1,
            cost: 0,
            movement: 1,
            hit_points: 1,
            is_sub: false,
            is_destroyer: false,
            is_transport: false,
            transport_capacity: 0,
            transport_cost: 0,
            is_air_transport: false,
            is_air_transportable: false,
            carrier_capacity: 0,
            carrier_cost: 0,
            is_infrastructure: false,
            is_suicide: false,
            can_blitz: false,
            bombard: 0,
            is_strategic_bomber: false,
            bombing_bonus: 0,
            max_damage: 0,
            can_intercept: false,
            can_escort: false,
            air_attack: 0,
            air_defense: 0,
            aa: None,
            capturable_on_entering: false,
            destroyed_when_captured: false,
        }
    }
}

impl UnitType {
    pub fn named(name: &str, domain: UnitDomain) -> Self {
        Self {
            name: name.to_string(),
            domain,
            ..Default::default()
        }
    }

    pub fn strength(&self, defending: bool) -> u32 {
        if defending {
            self.defense
        } else {
            self.attack
        }
    }

    pub fn air_strength(&self, defending: bool) -> u32 {
        if defending {
            self.air_defense
        } else {
            self.air_attack
        }
    }
}

/// Per-unit boolean state tracked by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitFlag {
    Submerged,
    WasInCombat,
    WasAmphibious,
    WasInAirBattle,
    WasScrambled,
}

/// One unit instance in the arena
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub type_id: UnitTypeId,
    pub owner: PlayerId,
    /// `None` once the unit has been removed from the map
    pub location: Option<TerritoryId>,
    /// Combat hits already absorbed
    pub hits: u32,
    pub bombing_damage: u32,
    pub movement_left: u32,
    pub submerged: bool,
    pub was_in_combat: bool,
    pub was_amphibious: bool,
    pub was_in_air_battle: bool,
    pub was_scrambled: bool,
    pub transported_by: Option<UnitId>,
    pub unloaded_to: Option<TerritoryId>,
}

impl Unit {
    pub fn new(id: UnitId, type_id: UnitTypeId, owner: PlayerId, movement: u32) -> Self {
        Self {
            id,
            type_id,
            owner,
            location: None,
            hits: 0,
            bombing_damage: 0,
            movement_left: movement,
            submerged: false,
            was_in_combat: false,
            was_amphibious: false,
            was_in_air_battle: false,
            was_scrambled: false,
            transported_by: None,
            unloaded_to: None,
        }
    }

    pub fn flag(&self, flag: UnitFlag) -> bool {
        match flag {
            UnitFlag::Submerged => self.submerged,
            UnitFlag::WasInCombat => self.was_in_combat,
            UnitFlag::WasAmphibious => self.was_amphibious,
            UnitFlag::WasInAirBattle => self.was_in_air_battle,
            UnitFlag::WasScrambled => self.was_scrambled,
        }
    }

    pub fn set_flag(&mut self, flag: UnitFlag, value: bool) {
        match flag {
            UnitFlag::Submerged => self.submerged = value,
            UnitFlag::WasInCombat => self.was_in_combat = value,
            UnitFlag::WasAmphibious => self.was_amphibious = value,
            UnitFlag::WasInAirBattle => self.was_in_air_battle = value,
            UnitFlag::WasScrambled => self.was_scrambled = value,
        }
    }
}
