//! Fighting out every pending battle of a turn
//!
//! Battles are driven one at a time in a fixed order so that a shared dice
//! stream always produces the same results for the same moves.

use serde::{Deserialize, Serialize};

use crate::battle::common::BattleKind;
use crate::battle::registry::{AttackKind, BattleRegistry};
use crate::battle::Battle;
use crate::bridge::BattleContext;
use crate::core::error::{BattleError, Result};
use crate::core::types::{BattleId, PlayerId, TerritoryId, UnitId};
use crate::model::{CompositeChange, Route};

/// One group of units committed to an attack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAttack {
    pub route: Route,
    pub units: Vec<UnitId>,
    pub player: PlayerId,
    pub kind: AttackKind,
}

/// Register every planned attack, in order. Returns what each one changed.
pub fn commit_attacks(
    registry: &mut BattleRegistry,
    attacks: &[PlannedAttack],
    ctx: &mut BattleContext<'_>,
) -> Result<Vec<CompositeChange>> {
    attacks
        .iter()
        .map(|a| registry.add_attack(&a.route, &a.units, a.player, a.kind, ctx))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoughtBattle {
    pub battle: BattleId,
    pub kind: BattleKind,
    pub site: TerritoryId,
}

/// What [`resolve_all`] did, in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSummary {
    /// Conquests made on the move, recorded without a fight
    pub placeholders: Vec<BattleId>,
    /// Air battles closed because nobody came up to intercept
    pub headless: Vec<BattleId>,
    pub fought: Vec<FoughtBattle>,
}

impl ResolutionSummary {
    pub fn battles_fought(&self) -> usize {
        self.fought.len()
    }
}

fn ids_where(registry: &BattleRegistry, pred: impl Fn(&Battle) -> bool) -> Vec<BattleId> {
    let mut found: Vec<&Battle> = registry.battles().filter(|b| pred(b)).collect();
    found.sort_by_key(|b| b.core().sequence);
    found.into_iter().map(|b| b.id()).collect()
}

/// The first pending battle, by phase then creation order, that nothing
/// else is waiting on
fn next_unblocked(registry: &BattleRegistry) -> Option<BattleId> {
    let mut pending: Vec<&Battle> = registry.battles().collect();
    pending.sort_by_key(|b| (b.kind().phase(), b.core().sequence));
    pending
        .into_iter()
        .map(|b| b.id())
        .find(|&id| registry.get_dependent_on(id).is_empty())
}

/// Fight every pending battle in the registry.
///
/// Finished placeholders are recorded first and air battles without
/// interceptors are closed. The remaining battles are fought phase by phase:
/// air battles ahead of raids, raids, escort air battles, then ground battles.
pub fn resolve_all(registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<ResolutionSummary> {
    let mut summary = ResolutionSummary::default();

    for id in ids_where(registry, |b| matches!(b, Battle::Finished(_))) {
        if registry.get_dependent_on(id).is_empty() {
            registry.fight_battle(id, ctx)?;
            summary.placeholders.push(id);
        }
    }

    let (state, rules) = (&*ctx.state, ctx.rules);
    let idle_air: Vec<BattleId> = ids_where(registry, |b| match b {
        Battle::AirDuel(air) => {
            let mut air = air.clone();
            air.refresh_defenders(state, rules);
            !air.should_fight()
        }
        _ => false,
    });
    for id in idle_air {
        if registry.get_dependent_on(id).is_empty() {
            registry.finish_air_battle_headless(id, ctx)?;
            summary.headless.push(id);
        }
    }

    while !registry.is_empty() {
        let Some(id) = next_unblocked(registry) else {
            let stuck = registry.battle_ids();
            tracing::error!(?stuck, "every pending battle is blocked");
            return Err(BattleError::invariant(format!(
                "{} battles pending but none can be fought",
                stuck.len()
            )));
        };
        let battle = registry.battle(id)?;
        let fought = FoughtBattle {
            battle: id,
            kind: battle.kind(),
            site: battle.site(),
        };
        tracing::debug!(battle = %id, kind = ?fought.kind, "resolving");
        registry.fight_battle(id, ctx)?;
        if registry.battle(id).is_ok() {
            return Err(BattleError::invariant(format!("battle {} did not finish", id)));
        }
        summary.fought.push(fought);
    }
    tracing::info!(
        fought = summary.fought.len(),
        headless = summary.headless.len(),
        "all battles resolved"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::WhoWon;
    use crate::bridge::{AutoCasualtySelector, AutoRemote, InMemoryHistory, RecordingDisplay, ScriptedDice};
    use crate::core::config::RulesConfig;
    use crate::model::{GameState, GameStateBuilder};

    fn europe() -> GameState {
        GameStateBuilder::classic()
            .player("Germany", 0)
            .player("Russia", 20)
            .land("Germany", Some("Germany"), 10)
            .land("Poland", Some("Russia"), 2)
            .land("Ukraine", Some("Russia"), 2)
            .land("Russia", Some("Russia"), 8)
            .connect("Germany", "Poland")
            .connect("Poland", "Ukraine")
            .connect("Ukraine", "Russia")
            .units("Germany", "Germany", 2, "armour")
            .units("Germany", "Germany", 1, "bomber")
            .units("Ukraine", "Russia", 1, "infantry")
            .units("Russia", "Russia", 1, "factory")
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolves_in_phase_order() {
        let mut state = europe();
        let rules = RulesConfig::default();
        let germany = state.territory_id("Germany").unwrap();
        let poland = state.territory_id("Poland").unwrap();
        let ukraine = state.territory_id("Ukraine").unwrap();
        let russia = state.territory_id("Russia").unwrap();
        let armour = state.units_of_type(germany, PlayerId(0), "armour");
        let bomber = state.units_of_type(germany, PlayerId(0), "bomber");
        // units are already at their destinations
        state
            .apply(&crate::model::Change::move_units(germany, ukraine, &armour))
            .unwrap();
        state
            .apply(&crate::model::Change::move_units(germany, russia, &bomber))
            .unwrap();
        let attacks = vec![
            PlannedAttack {
                route: Route::new(germany, vec![poland, ukraine]),
                units: armour,
                player: PlayerId(0),
                kind: AttackKind::Ground,
            },
            PlannedAttack {
                route: Route::new(germany, vec![poland, ukraine, russia]),
                units: bomber,
                player: PlayerId(0),
                kind: AttackKind::Bombing,
            },
        ];
        // bombing die first, then armour hit and infantry miss
        let mut dice = ScriptedDice::new([2, 0, 0, 5]);
        let (mut casualties, mut remote) = (AutoCasualtySelector, AutoRemote);
        let (mut display, mut history) = (RecordingDisplay::new(), InMemoryHistory::new());
        let mut registry = BattleRegistry::new();
        let summary = {
            let mut ctx = BattleContext::new(
                &mut state,
                &rules,
                &mut dice,
                &mut casualties,
                &mut remote,
                &mut display,
                &mut history,
            );
            commit_attacks(&mut registry, &attacks, &mut ctx).unwrap();
            resolve_all(&mut registry, &mut ctx).unwrap()
        };
        assert!(registry.is_empty());
        // Poland was taken on the move
        assert_eq!(summary.placeholders.len(), 1);
        assert!(registry.was_conquered(poland));
        let kinds: Vec<BattleKind> = summary.fought.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![BattleKind::BombingRaid, BattleKind::Normal]);
        assert_eq!(state.player(PlayerId(1)).unwrap().pus, 17);
        assert_eq!(state.territory(ukraine).unwrap().owner, Some(PlayerId(0)));
        let ground = registry
            .records()
            .all()
            .iter()
            .find(|r| r.site == ukraine)
            .unwrap();
        assert_eq!(ground.who_won, WhoWon::Attacker);
    }

    #[test]
    fn test_nothing_pending_is_a_noop() {
        let mut state = europe();
        let rules = RulesConfig::default();
        let mut dice = ScriptedDice::new([]);
        let (mut casualties, mut remote) = (AutoCasualtySelector, AutoRemote);
        let (mut display, mut history) = (RecordingDisplay::new(), InMemoryHistory::new());
        let mut registry = BattleRegistry::new();
        let mut ctx = BattleContext::new(
            &mut state,
            &rules,
            &mut dice,
            &mut casualties,
            &mut remote,
            &mut display,
            &mut history,
        );
        let summary = resolve_all(&mut registry, &mut ctx).unwrap();
        assert_eq!(summary, ResolutionSummary::default());
    }
}
