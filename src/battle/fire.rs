//! One volley: roll dice, choose casualties, hand the result back
//!
//! A volley is three steps on the owning battle's stack. The first two each
//! make a single external call; the last is applied by the battle itself,
//! since what happens to the dead depends on the variant.

use serde::{Deserialize, Serialize};

use crate::bridge::casualty::validate_selection;
use crate::bridge::{AutoCasualtySelector, BattleContext, BattleNotice, CasualtyDetails, CasualtyRequest, DiceTag};
use crate::core::config::RulesConfig;
use crate::core::error::{BattleError, Result};
use crate::core::types::{BattleId, PlayerId, Side, UnitId};
use crate::model::{Change, GameState};

/// What the side being fired on may still do with its hit units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnFire {
    /// Every hit unit fires back before it is removed
    All,
    /// Only hit submarines fire back
    Subs,
    /// Hit units are removed at once
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FireKind {
    Normal,
    AntiAir,
    Bombard,
    AirBattle,
}

impl FireKind {
    pub fn tag(self) -> DiceTag {
        match self {
            FireKind::Normal => DiceTag::Combat,
            FireKind::AntiAir => DiceTag::AntiAir,
            FireKind::Bombard => DiceTag::Bombard,
            FireKind::AirBattle => DiceTag::AirBattle,
        }
    }
}

/// Who fires at whom, fixed when the volley starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireSpec {
    pub label: String,
    pub firing_player: PlayerId,
    pub hit_player: PlayerId,
    pub firing_side: Side,
    pub firing: Vec<UnitId>,
    pub targets: Vec<UnitId>,
    pub return_fire: ReturnFire,
    pub kind: FireKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Die {
    pub value: u32,
    pub strength: u32,
    pub hit: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRoll {
    pub rolls: Vec<Die>,
    pub hits: u32,
}

impl DiceRoll {
    pub fn from_values(values: &[u32], strengths: &[u32]) -> Self {
        let rolls: Vec<Die> = values
            .iter()
            .zip(strengths)
            .map(|(&value, &strength)| Die {
                value,
                strength,
                hit: value < strength,
            })
            .collect();
        let hits = rolls.iter().filter(|d| d.hit).count() as u32;
        Self { rolls, hits }
    }

    pub fn values(&self) -> Vec<u32> {
        self.rolls.iter().map(|d| d.value).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FireStep {
    Roll(FireSpec),
    SelectCasualties {
        spec: FireSpec,
        dice: DiceRoll,
    },
    RemoveCasualties {
        spec: FireSpec,
        dice: DiceRoll,
        details: CasualtyDetails,
    },
}

/// Run a roll or selection step and return the step that follows it
pub fn advance(step: FireStep, battle: BattleId, ctx: &mut BattleContext<'_>) -> Result<FireStep> {
    match step {
        FireStep::Roll(spec) => {
            let dice = roll(&spec, battle, ctx)?;
            Ok(FireStep::SelectCasualties { spec, dice })
        }
        FireStep::SelectCasualties { spec, dice } => {
            let details = select_casualties(&spec, &dice, battle, ctx)?;
            Ok(FireStep::RemoveCasualties { spec, dice, details })
        }
        FireStep::RemoveCasualties { .. } => Err(BattleError::invariant(
            "casualty removal must be applied by the battle",
        )),
    }
}

/// Strength of every die the firing units roll
pub fn dice_strengths(spec: &FireSpec, state: &GameState, rules: &RulesConfig) -> Vec<u32> {
    let defending = spec.firing_side.is_defender();
    let sides = rules.dice_sides;
    let mut strengths = Vec::new();
    if spec.targets.is_empty() {
        return strengths;
    }
    match spec.kind {
        FireKind::Normal | FireKind::AirBattle => {
            for &u in &spec.firing {
                let Some(t) = state.type_of(u) else { continue };
                let s = if spec.kind == FireKind::AirBattle {
                    t.air_strength(defending)
                } else {
                    t.strength(defending)
                };
                let s = s.min(sides);
                if s > 0 {
                    strengths.extend(std::iter::repeat(s).take(t.rolls as usize));
                }
            }
        }
        FireKind::Bombard => {
            for &u in &spec.firing {
                if let Some(t) = state.type_of(u) {
                    let s = t.bombard.min(sides);
                    if s > 0 {
                        strengths.push(s);
                    }
                }
            }
        }
        FireKind::AntiAir => {
            let mut strength = 0;
            let mut max_rolls = 0u32;
            let mut unlimited = false;
            for &u in &spec.firing {
                if let Some(aa) = state.type_of(u).and_then(|t| t.aa.as_ref()) {
                    strength = strength.max(aa.strength);
                    if aa.max_rolls_per_unit == 0 {
                        unlimited = true;
                    }
                    max_rolls += aa.max_rolls_per_unit;
                }
            }
            let strength = strength.min(sides);
            if strength == 0 {
                return strengths;
            }
            let count = if unlimited {
                spec.targets.len()
            } else {
                spec.targets.len().min(max_rolls as usize)
            };
            strengths = vec![strength; count];
        }
    }
    strengths
}

pub fn roll(spec: &FireSpec, battle: BattleId, ctx: &mut BattleContext<'_>) -> Result<DiceRoll> {
    let strengths = dice_strengths(spec, ctx.state, ctx.rules);
    if strengths.is_empty() {
        return Ok(DiceRoll::default());
    }
    let values = ctx.roll_dice(strengths.len(), spec.firing_player, spec.kind.tag(), &spec.label)?;
    let dice = DiceRoll::from_values(&values, &strengths);
    tracing::debug!(%battle, step = %spec.label, hits = dice.hits, "dice rolled");
    ctx.notify(BattleNotice::Dice {
        battle,
        step: spec.label.clone(),
        player: spec.firing_player,
        rolls: dice.values(),
        hits: dice.hits,
    });
    Ok(dice)
}

/// Targets that are still on the map, cheapest first
pub fn casualty_candidates(state: &GameState, targets: &[UnitId]) -> Vec<UnitId> {
    let mut candidates: Vec<UnitId> = targets
        .iter()
        .copied()
        .filter(|&u| state.location_of(u).is_some())
        .collect();
    candidates.sort_by_key(|&u| state.cost(u));
    candidates
}

pub fn select_casualties(
    spec: &FireSpec,
    dice: &DiceRoll,
    battle: BattleId,
    ctx: &mut BattleContext<'_>,
) -> Result<CasualtyDetails> {
    let candidates = casualty_candidates(ctx.state, &spec.targets);
    if dice.hits == 0 || candidates.is_empty() {
        return Ok(CasualtyDetails::default());
    }
    let capacity: u32 = candidates
        .iter()
        .map(|&u| ctx.state.remaining_hit_points(u))
        .sum();

    let details = if dice.hits >= capacity {
        CasualtyDetails {
            killed: candidates.clone(),
            damaged: Vec::new(),
        }
    } else if candidates.len() == 1 {
        AutoCasualtySelector::choose(ctx.state, &candidates, dice.hits)
    } else {
        let request = CasualtyRequest {
            battle,
            step: &spec.label,
            hitting_player: spec.firing_player,
            victim: spec.hit_player,
            candidates: &candidates,
            hits: dice.hits,
        };
        let limit = ctx.rules.engine.illegal_answer_limit;
        let mut rejected = 0;
        loop {
            let answer = ctx.select_casualties(&request)?;
            match validate_selection(ctx.state, &request, &answer) {
                Ok(()) => break answer,
                Err(reason) => {
                    rejected += 1;
                    tracing::warn!(%battle, %reason, rejected, "illegal casualty selection");
                    if rejected > limit {
                        break AutoCasualtySelector::choose(ctx.state, &candidates, dice.hits);
                    }
                }
            }
        }
    };

    ctx.notify(BattleNotice::Casualties {
        battle,
        step: spec.label.clone(),
        player: spec.hit_player,
        killed: details.killed.clone(),
        damaged: details.damaged.clone(),
    });
    Ok(details)
}

/// Record one more combat hit on each damaged unit
pub fn mark_damaged(damaged: &[UnitId], ctx: &mut BattleContext<'_>) -> Result<()> {
    for &u in damaged {
        let hits = ctx.state.unit(u)?.hits;
        let change = Change::hits(ctx.state, u, hits + 1)?;
        ctx.add_change(change)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{AutoRemote, CasualtySelector, InMemoryHistory, RecordingDisplay, ScriptedDice};
    use crate::model::GameStateBuilder;

    fn world() -> GameState {
        GameStateBuilder::classic()
            .player("Germany", 0)
            .player("Russia", 0)
            .land("Poland", Some("Russia"), 2)
            .units("Poland", "Germany", 2, "infantry")
            .units("Poland", "Germany", 1, "armour")
            .units("Poland", "Russia", 2, "infantry")
            .units("Poland", "Russia", 1, "aa_gun")
            .build()
            .unwrap()
    }

    fn spec(state: &GameState, kind: FireKind) -> FireSpec {
        let poland = state.territory_id("Poland").unwrap();
        let (germany, russia) = (PlayerId(0), PlayerId(1));
        let mut attackers = state.units_of_type(poland, germany, "infantry");
        attackers.extend(state.units_of_type(poland, germany, "armour"));
        FireSpec {
            label: "Germany attacks".into(),
            firing_player: germany,
            hit_player: russia,
            firing_side: Side::Attacker,
            firing: attackers,
            targets: state.units_of_type(poland, russia, "infantry"),
            return_fire: ReturnFire::All,
            kind,
        }
    }

    /// Picks the most expensive units, which is still legal
    struct Stubborn;

    impl CasualtySelector for Stubborn {
        fn select_casualties(&mut self, _: &GameState, request: &CasualtyRequest<'_>) -> Result<CasualtyDetails> {
            Ok(CasualtyDetails {
                killed: request.candidates.iter().rev().take(request.hits as usize).copied().collect(),
                damaged: vec![],
            })
        }
    }

    #[test]
    fn test_normal_strengths_follow_attack_values() {
        let state = world();
        let s = spec(&state, FireKind::Normal);
        assert_eq!(dice_strengths(&s, &state, &RulesConfig::default()), vec![1, 1, 3]);
    }

    #[test]
    fn test_aa_rolls_once_per_target() {
        let state = world();
        let poland = state.territory_id("Poland").unwrap();
        let mut s = spec(&state, FireKind::AntiAir);
        s.firing = state.units_of_type(poland, PlayerId(1), "aa_gun");
        s.targets = vec![UnitId(0), UnitId(1), UnitId(2)];
        assert_eq!(dice_strengths(&s, &state, &RulesConfig::default()), vec![1, 1, 1]);
    }

    #[test]
    fn test_roll_counts_hits() {
        let mut state = world();
        let rules = RulesConfig::default();
        let s = spec(&state, FireKind::Normal);
        let mut dice = ScriptedDice::new([0, 3, 2]);
        let mut casualties = AutoCasualtySelector;
        let mut remote = AutoRemote;
        let mut display = RecordingDisplay::new();
        let mut history = InMemoryHistory::new();
        let mut ctx = BattleContext::new(
            &mut state,
            &rules,
            &mut dice,
            &mut casualties,
            &mut remote,
            &mut display,
            &mut history,
        );
        let roll = roll(&s, BattleId::new(), &mut ctx).unwrap();
        // 0 < 1 hits, 3 >= 1 misses, 2 < 3 hits
        assert_eq!(roll.hits, 2);
        assert_eq!(display.notices.len(), 1);
    }

    #[test]
    fn test_enough_hits_kill_everything_without_asking() {
        let mut state = world();
        let rules = RulesConfig::default();
        let s = spec(&state, FireKind::Normal);
        let dice = DiceRoll::from_values(&[0, 0, 0], &[1, 1, 3]);
        let mut d = ScriptedDice::always(0);
        let mut casualties = Stubborn;
        let mut remote = AutoRemote;
        let mut display = RecordingDisplay::new();
        let mut history = InMemoryHistory::new();
        let mut ctx = BattleContext::new(
            &mut state,
            &rules,
            &mut d,
            &mut casualties,
            &mut remote,
            &mut display,
            &mut history,
        );
        let details = select_casualties(&s, &dice, BattleId::new(), &mut ctx).unwrap();
        assert_eq!(details.killed.len(), 2);
    }

    #[test]
    fn test_selector_consulted_for_partial_hits() {
        let mut state = world();
        let rules = RulesConfig::default();
        let s = spec(&state, FireKind::Normal);
        let dice = DiceRoll::from_values(&[0, 5, 5], &[1, 1, 3]);
        let mut d = ScriptedDice::always(0);
        let mut casualties = Stubborn;
        let mut remote = AutoRemote;
        let mut display = RecordingDisplay::new();
        let mut history = InMemoryHistory::new();
        let mut ctx = BattleContext::new(
            &mut state,
            &rules,
            &mut d,
            &mut casualties,
            &mut remote,
            &mut display,
            &mut history,
        );
        let details = select_casualties(&s, &dice, BattleId::new(), &mut ctx).unwrap();
        assert_eq!(details.killed, vec![s.targets[1]]);
    }
}
