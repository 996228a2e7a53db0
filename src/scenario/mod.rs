//! Scenario files: a small map, the armies on it and the attacks to resolve
//!
//! ```toml
//! name = "Ukraine push"
//! rules = "classic"
//!
//! [[players]]
//! name = "Germany"
//! pus = 30
//!
//! [[territories]]
//! name = "Ukraine"
//! owner = "Russia"
//! production = 2
//! neighbors = ["Poland"]
//! units = { Russia = "2 infantry, 1 aa_gun" }
//!
//! [[attacks]]
//! player = "Germany"
//! route = ["Poland", "Ukraine"]
//! units = "2 armour, 1 fighter"
//! ```
//!
//! Attacking units are placed at the end of their route, as if they had
//! already moved there.

pub mod unit_list;

pub use unit_list::{parse_unit_list, UnitCount};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

use crate::battle::{AttackKind, PlannedAttack};
use crate::core::error::{BattleError, Result};
use crate::core::types::{PlayerId, TerritoryId, UnitId};
use crate::model::{GameState, GameStateBuilder, Route};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub name: String,
    #[serde(default)]
    pub pus: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerritoryEntry {
    pub name: String,
    pub water: bool,
    pub owner: Option<String>,
    pub production: u32,
    pub capital_of: Option<String>,
    /// Land territories whose production this sea zone carries
    pub convoy_for: Vec<String>,
    pub neighbors: Vec<String>,
    /// Owner name to unit list
    pub units: BTreeMap<String, String>,
}

fn ground() -> AttackKind {
    AttackKind::Ground
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackEntry {
    pub player: String,
    /// Territory names from the start of the move to the battle site
    pub route: Vec<String>,
    pub units: String,
    #[serde(default = "ground")]
    pub kind: AttackKind,
}

/// A scenario as written on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioFile {
    pub name: String,
    /// Bundled ruleset to use when the caller does not pick one
    #[serde(default)]
    pub rules: Option<String>,
    /// Site the odds calculator reports on
    #[serde(default)]
    pub focus: Option<String>,
    pub players: Vec<PlayerEntry>,
    #[serde(default)]
    pub alliances: Vec<[String; 2]>,
    pub territories: Vec<TerritoryEntry>,
    #[serde(default)]
    pub attacks: Vec<AttackEntry>,
}

/// A scenario ready for the engine
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub rules: Option<String>,
    pub state: GameState,
    pub attacks: Vec<PlannedAttack>,
    focus: Option<TerritoryId>,
}

impl Scenario {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ScenarioFile = toml::from_str(contents)?;
        file.build()
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BattleError::Config(format!("Failed to read scenario {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// The explicit focus, or the site of the first attack
    pub fn focus(&self) -> Option<TerritoryId> {
        self.focus.or_else(|| self.attacks.first().map(|a| a.route.end()))
    }
}

/// Name lookups over a built state
struct NameIndex {
    territories: AHashMap<String, TerritoryId>,
    players: AHashMap<String, PlayerId>,
}

impl NameIndex {
    fn new(state: &GameState) -> Self {
        Self {
            territories: state.territories.iter().map(|t| (t.name.clone(), t.id)).collect(),
            players: state.players.iter().map(|p| (p.name.clone(), p.id)).collect(),
        }
    }

    fn territory(&self, name: &str) -> Result<TerritoryId> {
        self.territories
            .get(name)
            .copied()
            .ok_or_else(|| BattleError::Config(format!("unknown territory '{}'", name)))
    }

    fn player(&self, name: &str) -> Result<PlayerId> {
        self.players
            .get(name)
            .copied()
            .ok_or_else(|| BattleError::Config(format!("unknown player '{}'", name)))
    }
}

impl ScenarioFile {
    fn check_unique_names(&self) -> Result<()> {
        let mut seen = AHashSet::new();
        for name in self
            .players
            .iter()
            .map(|p| &p.name)
            .chain(self.territories.iter().map(|t| &t.name))
        {
            if !seen.insert(name.as_str()) {
                return Err(BattleError::Config(format!("'{}' is defined twice", name)));
            }
        }
        Ok(())
    }

    fn map(&self) -> Result<GameState> {
        let mut b = GameStateBuilder::classic();
        for p in &self.players {
            b = b.player(&p.name, p.pus);
        }
        for [a, other] in &self.alliances {
            b = b.allied(a, other);
        }
        for t in &self.territories {
            b = if t.water {
                b.sea(&t.name)
            } else {
                b.land(&t.name, t.owner.as_deref(), t.production)
            };
        }
        let mut connected: AHashSet<(&str, &str)> = AHashSet::new();
        for t in &self.territories {
            for n in &t.neighbors {
                let pair = if t.name.as_str() <= n.as_str() {
                    (t.name.as_str(), n.as_str())
                } else {
                    (n.as_str(), t.name.as_str())
                };
                if connected.insert(pair) {
                    b = b.connect(&t.name, n);
                }
            }
            if let Some(player) = &t.capital_of {
                b = b.capital(&t.name, player);
            }
            for land in &t.convoy_for {
                b = b.convoy(&t.name, land);
            }
            for (owner, list) in &t.units {
                for entry in parse_unit_list(list)? {
                    b = b.units(&t.name, owner, entry.count, &entry.type_name);
                }
            }
        }
        b.build()
    }

    fn attack(&self, entry: &AttackEntry, index: &NameIndex, state: &mut GameState) -> Result<PlannedAttack> {
        let player = index.player(&entry.player)?;
        let route: Vec<TerritoryId> = entry
            .route
            .iter()
            .map(|name| index.territory(name))
            .collect::<Result<_>>()?;
        let Some((&start, steps)) = route.split_first() else {
            return Err(BattleError::Config(format!("attack by {} has an empty route", entry.player)));
        };
        let route = if steps.is_empty() {
            Route::stationary(start)
        } else {
            Route::new(start, steps.to_vec())
        };
        let site = route.end();
        let mut units: Vec<UnitId> = Vec::new();
        for group in parse_unit_list(&entry.units)? {
            let type_id = state.unit_type_id(&group.type_name)?;
            for _ in 0..group.count {
                units.push(state.spawn_unit(type_id, player, site)?);
            }
        }
        if units.is_empty() {
            return Err(BattleError::Config(format!(
                "attack by {} on {} has no units",
                entry.player,
                state.territory_name(site)
            )));
        }
        Ok(PlannedAttack {
            route,
            units,
            player,
            kind: entry.kind,
        })
    }

    pub fn build(&self) -> Result<Scenario> {
        self.check_unique_names()?;
        let mut state = self.map()?;
        let index = NameIndex::new(&state);
        let attacks = self
            .attacks
            .iter()
            .map(|a| self.attack(a, &index, &mut state))
            .collect::<Result<Vec<_>>>()?;
        let focus = self.focus.as_deref().map(|f| index.territory(f)).transpose()?;
        tracing::debug!(
            scenario = %self.name,
            territories = state.territories.len(),
            units = state.units.len(),
            attacks = attacks.len(),
            "scenario loaded"
        );
        Ok(Scenario {
            name: self.name.clone(),
            rules: self.rules.clone(),
            state,
            attacks,
            focus,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UKRAINE: &str = r#"
name = "Ukraine push"
rules = "classic"
alliances = [["Germany", "Italy"]]

[[players]]
name = "Germany"
pus = 30

[[players]]
name = "Italy"

[[players]]
name = "Russia"
pus = 24

[[territories]]
name = "Poland"
owner = "Germany"
production = 2
neighbors = ["Ukraine"]

[[territories]]
name = "Ukraine"
owner = "Russia"
production = 2
neighbors = ["Poland", "Russia"]
units = { Russia = "2 infantry, 1 aa_gun" }

[[territories]]
name = "Russia"
owner = "Russia"
production = 8
capital_of = "Russia"
neighbors = ["Ukraine"]

[[attacks]]
player = "Germany"
route = ["Poland", "Ukraine"]
units = "2 armour, fighter"
"#;

    #[test]
    fn test_loads_map_and_attacks() {
        let scenario = Scenario::from_toml_str(UKRAINE).unwrap();
        let s = &scenario.state;
        let poland = s.territory_id("Poland").unwrap();
        let ukraine = s.territory_id("Ukraine").unwrap();
        let russia = s.territory_id("Russia").unwrap();
        assert_eq!(scenario.rules.as_deref(), Some("classic"));
        assert!(s.is_allied(PlayerId(0), PlayerId(1)));
        assert!(s.is_at_war(PlayerId(0), PlayerId(2)));
        // listed from both sides, connected once
        assert_eq!(s.territory(ukraine).unwrap().neighbors, vec![poland, russia]);
        assert_eq!(s.territory(russia).unwrap().capital_of, Some(PlayerId(2)));
        assert_eq!(s.units_of_type(ukraine, PlayerId(2), "infantry").len(), 2);
        assert_eq!(s.player(PlayerId(2)).unwrap().pus, 24);

        assert_eq!(scenario.attacks.len(), 1);
        let attack = &scenario.attacks[0];
        assert_eq!(attack.kind, AttackKind::Ground);
        assert_eq!(attack.route, Route::new(poland, vec![ukraine]));
        assert_eq!(attack.units.len(), 3);
        assert!(attack.units.iter().all(|&u| s.is_in(u, ukraine)));
        assert_eq!(scenario.focus(), Some(ukraine));
    }

    #[test]
    fn test_unknown_names_rejected() {
        let broken = UKRAINE.replace("route = [\"Poland\", \"Ukraine\"]", "route = [\"Poland\", \"Kiev\"]");
        assert!(matches!(Scenario::from_toml_str(&broken), Err(BattleError::Config(_))));

        let broken = UKRAINE.replace("2 armour, fighter", "2 panzer");
        assert!(matches!(
            Scenario::from_toml_str(&broken),
            Err(BattleError::UnknownUnitType(_))
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let broken = UKRAINE.replace("name = \"Italy\"", "name = \"Poland\"");
        let err = Scenario::from_toml_str(&broken).unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn test_bad_unit_list_is_a_parse_error() {
        let broken = UKRAINE.replace("2 infantry, 1 aa_gun", "2 infantry;");
        assert!(matches!(Scenario::from_toml_str(&broken), Err(BattleError::Parse(_))));
    }
}
