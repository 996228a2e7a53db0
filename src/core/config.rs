//! Rule variants and engine tuning
//!
//! Rules are an opaque set of toggles. Battle code only ever reads them
//! through the predicate methods on [`RulesConfig`], never by matching on a
//! named ruleset, so each toggle can be combined with any other.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{BattleError, Result};

/// Engine behaviour that is not a game rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many times a lost connection is re-issued before the error
    /// escapes to the caller. `None` waits forever.
    pub remote_retry_limit: Option<u32>,

    /// How many illegal answers (retreat outside the legal set, malformed
    /// casualty picks) are re-queried before falling back to a default.
    pub illegal_answer_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote_retry_limit: None,
            illegal_answer_limit: 5,
        }
    }
}

/// Game rule toggles consulted during battle resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub name: String,

    /// Sides on a combat die. Rolls are zero based.
    pub dice_sides: u32,

    // === RULESET FAMILY ===
    pub ww2v2: bool,

    // === SUBMARINES ===
    pub defending_subs_sneak_attack: bool,
    /// Aircraft cannot hit submarines unless a friendly destroyer is present
    pub air_attack_sub_restricted: bool,
    /// Submarines may submerge instead of retreating
    pub submersible_subs: bool,
    /// Submarines choose to withdraw before the first volley
    pub sub_retreat_before_battle: bool,
    pub sub_control_sea_zone_restricted: bool,

    // === TRANSPORTS & AMPHIBIOUS ===
    /// Transports are only chosen as casualties once nothing else is left
    pub transport_casualties_restricted: bool,
    pub partial_amphibious_retreat: bool,
    pub transport_control_sea_zone: bool,

    // === RETREAT ===
    pub attacker_retreat_planes: bool,
    /// All retreats stay in the battle site
    pub retreating_units_remain_in_place: bool,

    // === SPECIAL FIRE ===
    pub naval_bombard_casualties_return_fire: bool,
    pub defending_suicide_do_not_fire: bool,

    /// Maximum rounds for ground and naval battles. 0 means unlimited.
    pub max_battle_rounds: u32,

    // === AIR BATTLES ===
    pub raids_may_be_preceded_by_air_battles: bool,
    pub battles_may_be_preceded_by_air_battles: bool,
    pub air_battle_rounds: u32,
    pub air_battle_attackers_can_retreat: bool,
    pub air_battle_defenders_can_retreat: bool,
    pub scramble_rules_in_effect: bool,

    // === STRATEGIC BOMBING ===
    pub limit_sbr_damage_to_production: bool,
    pub limit_sbr_damage_per_turn: bool,
    /// Bombing damages target units instead of draining resources
    pub sbr_damages_units: bool,
    /// Bombers rolling several dice keep only the best one
    pub lhtr_heavy_bombers: bool,
    pub pu_multiplier: u32,

    // === CONQUEST ===
    /// Resources charged for conquering unowned land. `None` disables it.
    pub neutral_charge: Option<u32>,
    pub units_destroyed_instead_of_captured: bool,
    pub abandoned_territories_taken_over: bool,

    pub engine: EngineConfig,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            dice_sides: 6,
            ww2v2: false,
            defending_subs_sneak_attack: false,
            air_attack_sub_restricted: false,
            submersible_subs: false,
            sub_retreat_before_battle: false,
            sub_control_sea_zone_restricted: false,
            transport_casualties_restricted: false,
            partial_amphibious_retreat: false,
            transport_control_sea_zone: true,
            attacker_retreat_planes: false,
            retreating_units_remain_in_place: false,
            naval_bombard_casualties_return_fire: false,
            defending_suicide_do_not_fire: false,
            max_battle_rounds: 0,
            raids_may_be_preceded_by_air_battles: false,
            battles_may_be_preceded_by_air_battles: false,
            air_battle_rounds: 1,
            air_battle_attackers_can_retreat: false,
            air_battle_defenders_can_retreat: false,
            scramble_rules_in_effect: false,
            limit_sbr_damage_to_production: false,
            limit_sbr_damage_per_turn: false,
            sbr_damages_units: false,
            lhtr_heavy_bombers: false,
            pu_multiplier: 1,
            neutral_charge: None,
            units_destroyed_instead_of_captured: false,
            abandoned_territories_taken_over: false,
            engine: EngineConfig::default(),
        }
    }
}

impl RulesConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a ruleset from TOML text and validate it
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let rules: RulesConfig = toml::from_str(contents)?;
        rules.validate().map_err(BattleError::Config)?;
        Ok(rules)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.dice_sides < 2 {
            return Err(format!("dice_sides ({}) must be at least 2", self.dice_sides));
        }
        if self.air_battle_rounds == 0 {
            return Err("air_battle_rounds must be at least 1".into());
        }
        if self.pu_multiplier == 0 {
            return Err("pu_multiplier must be positive".into());
        }
        Ok(())
    }

    pub fn is_ww2v2(&self) -> bool {
        self.ww2v2
    }

    /// Defending submarines get a first strike unless countered
    pub fn subs_sneak_attack_on_defense(&self) -> bool {
        self.ww2v2 || self.defending_subs_sneak_attack
    }

    pub fn submersible_subs(&self) -> bool {
        self.submersible_subs
    }

    pub fn air_attack_sub_restricted(&self) -> bool {
        self.air_attack_sub_restricted
    }

    pub fn sub_retreat_before_battle(&self) -> bool {
        self.sub_retreat_before_battle
    }

    pub fn transport_casualties_restricted(&self) -> bool {
        self.transport_casualties_restricted
    }

    pub fn partial_amphibious_retreat(&self) -> bool {
        self.partial_amphibious_retreat
    }

    /// Planes may leave an amphibious assault on their own
    pub fn attacker_retreat_planes(&self) -> bool {
        self.attacker_retreat_planes
    }

    pub fn retreating_units_remain_in_place(&self) -> bool {
        self.retreating_units_remain_in_place
    }

    pub fn naval_bombard_casualties_return_fire(&self) -> bool {
        self.naval_bombard_casualties_return_fire
    }

    pub fn defending_suicide_do_not_fire(&self) -> bool {
        self.defending_suicide_do_not_fire
    }

    /// Whether a battle that has completed `round` rounds must stop
    pub fn max_rounds_reached(&self, round: u32) -> bool {
        self.max_battle_rounds > 0 && self.max_battle_rounds <= round
    }

    pub fn raids_may_be_preceded_by_air_battles(&self) -> bool {
        self.raids_may_be_preceded_by_air_battles
    }

    pub fn battles_may_be_preceded_by_air_battles(&self) -> bool {
        self.battles_may_be_preceded_by_air_battles
    }

    pub fn air_battle_rounds_reached(&self, round: u32) -> bool {
        self.air_battle_rounds <= round
    }

    pub fn air_battle_attackers_can_retreat(&self) -> bool {
        self.air_battle_attackers_can_retreat
    }

    pub fn air_battle_defenders_can_retreat(&self) -> bool {
        self.air_battle_defenders_can_retreat
    }

    pub fn scramble_rules_in_effect(&self) -> bool {
        self.scramble_rules_in_effect
    }

    /// Bombing damage may not exceed the territory's production
    pub fn limit_sbr_damage_to_production(&self) -> bool {
        self.ww2v2 || self.limit_sbr_damage_to_production
    }

    pub fn limit_sbr_damage_per_turn(&self) -> bool {
        self.limit_sbr_damage_per_turn
    }

    pub fn sbr_damages_units(&self) -> bool {
        self.sbr_damages_units
    }

    pub fn lhtr_heavy_bombers(&self) -> bool {
        self.lhtr_heavy_bombers
    }

    /// Resources lost per point of bombing damage
    pub fn pu_multiplier(&self) -> u32 {
        self.pu_multiplier
    }

    pub fn transport_control_sea_zone(&self) -> bool {
        self.transport_control_sea_zone
    }

    pub fn sub_control_sea_zone_restricted(&self) -> bool {
        self.sub_control_sea_zone_restricted
    }

    // === CONQUEST ===

    /// Resources charged for taking unowned land, if any
    pub fn neutral_charge(&self) -> Option<u32> {
        self.neutral_charge
    }

    pub fn units_destroyed_instead_of_captured(&self) -> bool {
        self.units_destroyed_instead_of_captured
    }

    /// A defender left with nothing but infrastructure loses the territory
    /// to whoever has the most units there
    pub fn abandoned_territories_taken_over(&self) -> bool {
        self.abandoned_territories_taken_over
    }
}

/// Load a ruleset from TOML file
///
/// Loads from `data/rules/{name}.toml`
pub fn load_rules(name: &str) -> Result<RulesConfig> {
    let path = rules_path(name);
    let contents = fs::read_to_string(&path).map_err(|e| {
        BattleError::Config(format!("Failed to read rules file {:?}: {}", path, e))
    })?;
    let mut rules = RulesConfig::from_toml_str(&contents)?;
    rules.name = name.to_string();
    Ok(rules)
}

fn rules_path(name: &str) -> PathBuf {
    PathBuf::from("data/rules").join(format!("{}.toml", name))
}
