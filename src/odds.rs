//! Monte Carlo battle odds
//!
//! Replays the same set of attacks many times on independent copies of the
//! game state, each with its own dice stream and automatic decisions, and
//! summarises how the battle at one site tends to go.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::battle::{commit_attacks, resolve_all, BattleRecord, BattleRegistry, PlannedAttack, WhoWon};
use crate::bridge::Collaborators;
use crate::core::config::RulesConfig;
use crate::core::error::{BattleError, Result};
use crate::core::types::TerritoryId;
use crate::model::GameState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OddsSettings {
    pub trials: u32,
    /// Trial `i` rolls with seed `seed + i`
    pub seed: u64,
}

impl Default for OddsSettings {
    fn default() -> Self {
        Self { trials: 1000, seed: 0 }
    }
}

/// How one trial ended at the site being measured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrialOutcome {
    who_won: WhoWon,
    attacker_lost_tuv: u32,
    defender_lost_tuv: u32,
    rounds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsReport {
    pub site: TerritoryId,
    pub trials: u32,
    pub attacker_wins: u32,
    pub defender_wins: u32,
    pub draws: u32,
    pub average_attacker_tuv_lost: f64,
    pub average_defender_tuv_lost: f64,
    pub average_rounds: f64,
}

impl OddsReport {
    fn from_trials(site: TerritoryId, outcomes: &[TrialOutcome]) -> Self {
        let n = outcomes.len().max(1) as f64;
        let count = |w: WhoWon| outcomes.iter().filter(|o| o.who_won == w).count() as u32;
        let mean = |f: fn(&TrialOutcome) -> u32| outcomes.iter().map(|o| f(o) as f64).sum::<f64>() / n;
        Self {
            site,
            trials: outcomes.len() as u32,
            attacker_wins: count(WhoWon::Attacker),
            defender_wins: count(WhoWon::Defender),
            draws: count(WhoWon::Draw),
            average_attacker_tuv_lost: mean(|o| o.attacker_lost_tuv),
            average_defender_tuv_lost: mean(|o| o.defender_lost_tuv),
            average_rounds: mean(|o| o.rounds),
        }
    }

    fn ratio(&self, count: u32) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        count as f64 / self.trials as f64
    }

    pub fn attacker_win_ratio(&self) -> f64 {
        self.ratio(self.attacker_wins)
    }

    pub fn defender_win_ratio(&self) -> f64 {
        self.ratio(self.defender_wins)
    }

    pub fn draw_ratio(&self) -> f64 {
        self.ratio(self.draws)
    }
}

/// The deciding battle at `site`: the ground battle if there was one, else
/// the last phase fought there. Losses of every battle at the site count.
fn outcome_at(records: &[BattleRecord], site: TerritoryId) -> Option<TrialOutcome> {
    let at_site: Vec<&BattleRecord> = records.iter().filter(|r| r.site == site).collect();
    let deciding = at_site.iter().max_by_key(|r| r.kind.phase())?;
    Some(TrialOutcome {
        who_won: deciding.who_won,
        attacker_lost_tuv: at_site.iter().map(|r| r.attacker_lost_tuv).sum(),
        defender_lost_tuv: at_site.iter().map(|r| r.defender_lost_tuv).sum(),
        rounds: deciding.rounds,
    })
}

fn run_trial(
    state: &GameState,
    rules: &RulesConfig,
    attacks: &[PlannedAttack],
    site: TerritoryId,
    seed: u64,
) -> Result<TrialOutcome> {
    let mut state = state.clone();
    let mut registry = BattleRegistry::new();
    let mut collaborators = Collaborators::automatic(seed);
    {
        let mut ctx = collaborators.context(&mut state, rules);
        commit_attacks(&mut registry, attacks, &mut ctx)?;
        resolve_all(&mut registry, &mut ctx)?;
    }
    outcome_at(registry.records().all(), site).ok_or_else(|| {
        BattleError::IllegalInput(format!("no battle was fought at territory {}", site))
    })
}

/// Estimate the outcome at `site` of committing `attacks` against `state`
pub fn calculate(
    state: &GameState,
    rules: &RulesConfig,
    attacks: &[PlannedAttack],
    site: TerritoryId,
    settings: &OddsSettings,
) -> Result<OddsReport> {
    if settings.trials == 0 {
        return Err(BattleError::Config("odds need at least one trial".into()));
    }
    state.territory(site)?;
    let outcomes: Vec<TrialOutcome> = (0..settings.trials)
        .into_par_iter()
        .map(|i| run_trial(state, rules, attacks, site, settings.seed.wrapping_add(i as u64)))
        .collect::<Result<Vec<_>>>()?;
    let report = OddsReport::from_trials(site, &outcomes);
    tracing::info!(
        site = %state.territory_name(site),
        trials = report.trials,
        attacker = report.attacker_win_ratio(),
        defender = report.defender_win_ratio(),
        draw = report.draw_ratio(),
        "odds calculated"
    );
    Ok(report)
}
