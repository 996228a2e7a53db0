//! Shared fixtures for the integration tests

#![allow(dead_code)]

use battle_engine::battle::{commit_attacks, resolve_all, BattleRegistry, PlannedAttack, ResolutionSummary};
use battle_engine::bridge::{
    AutoCasualtySelector, BattleContext, InMemoryHistory, RecordingDisplay, ScriptedDice, ScriptedRemote,
};
use battle_engine::core::{Result, RulesConfig};
use battle_engine::model::GameState;

/// Scripted dice and answers, automatic casualties and recording sinks
pub struct Harness {
    pub dice: ScriptedDice,
    pub casualties: AutoCasualtySelector,
    pub remote: ScriptedRemote,
    pub display: RecordingDisplay,
    pub history: InMemoryHistory,
}

impl Harness {
    pub fn new(dice: ScriptedDice) -> Self {
        Self {
            dice,
            casualties: AutoCasualtySelector,
            remote: ScriptedRemote::new(),
            display: RecordingDisplay::new(),
            history: InMemoryHistory::new(),
        }
    }

    pub fn ctx<'a>(&'a mut self, state: &'a mut GameState, rules: &'a RulesConfig) -> BattleContext<'a> {
        BattleContext::new(
            state,
            rules,
            &mut self.dice,
            &mut self.casualties,
            &mut self.remote,
            &mut self.display,
            &mut self.history,
        )
    }

    /// Commit `attacks` and fight everything that results
    pub fn resolve(
        &mut self,
        state: &mut GameState,
        rules: &RulesConfig,
        registry: &mut BattleRegistry,
        attacks: &[PlannedAttack],
    ) -> Result<ResolutionSummary> {
        let mut ctx = self.ctx(state, rules);
        commit_attacks(registry, attacks, &mut ctx)?;
        resolve_all(registry, &mut ctx)
    }
}

/// Two armour moved from Poland into Ukraine, held by Russian infantry
pub const UKRAINE: &str = r#"
name = "Ukraine"

[[players]]
name = "Germany"
pus = 10

[[players]]
name = "Russia"
pus = 20

[[territories]]
name = "Germany"
owner = "Germany"
production = 10
neighbors = ["Poland"]

[[territories]]
name = "Poland"
owner = "Germany"
production = 2
neighbors = ["Ukraine"]

[[territories]]
name = "Ukraine"
owner = "Russia"
production = 2
neighbors = ["Russia"]
units = { Russia = "1 infantry" }

[[territories]]
name = "Russia"
owner = "Russia"
production = 8
capital_of = "Russia"
units = { Russia = "1 factory" }

[[attacks]]
player = "Germany"
route = ["Poland", "Ukraine"]
units = "2 armour"
"#;
