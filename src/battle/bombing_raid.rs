//! Strategic bombing raids
//!
//! Defending AA fires at the raiders first, one roll per AA category. The
//! bombers that get through roll for damage, which the defender pays in PUs
//! or, when units take bombing damage, as damage on the targeted units.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::battle::common::{find_defender, BattleCore, BattleKind, BattleResultDescription, WhoWon};
use crate::battle::execution::{drive, ExecutionStack, SteppedBattle};
use crate::battle::fire::{self, FireKind, FireSpec, FireStep, ReturnFire};
use crate::battle::registry::BattleRegistry;
use crate::battle::BattleOps;
use crate::bridge::{BattleContext, BattleNotice, DiceTag};
use crate::core::config::RulesConfig;
use crate::core::error::{BattleError, Result};
use crate::core::types::{PlayerId, Side, TerritoryId, UnitId};
use crate::model::{matches, Change, CompositeChange, GameState, Route, UnitDomain};

const RAID: &str = "Strategic bombing raid";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BombingRaidStep {
    FireAa,
    FireAaGroup { aa_type: String },
    Fire(FireStep),
    RollBombing,
    /// Bombing dice already rolled, one entry per die
    ApplyDamage { rolls: Vec<u32> },
    Aftermath,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BombingRaidBattle {
    core: BattleCore,
    stack: ExecutionStack<BombingRaidStep>,
    /// target -> bombers assigned to it
    targets: BTreeMap<UnitId, Vec<UnitId>>,
    total: u32,
    unit_damage: BTreeMap<UnitId, u32>,
}

impl BombingRaidBattle {
    pub fn new(site: TerritoryId, attacker: PlayerId, sequence: u64, state: &GameState) -> Self {
        let defender = find_defender(state, site, attacker);
        let mut battle = Self {
            core: BattleCore::new(BattleKind::BombingRaid, sequence, site, attacker, defender),
            stack: ExecutionStack::new(),
            targets: BTreeMap::new(),
            total: 0,
            unit_damage: BTreeMap::new(),
        };
        battle.update_defending_units(state);
        battle
    }

    pub fn stack(&self) -> &ExecutionStack<BombingRaidStep> {
        &self.stack
    }

    pub fn targets(&self) -> &BTreeMap<UnitId, Vec<UnitId>> {
        &self.targets
    }

    /// PUs or unit damage the raid has caused
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Send `bombers` against `target`
    pub fn assign_target(&mut self, target: UnitId, bombers: &[UnitId]) {
        for list in self.targets.values_mut() {
            list.retain(|b| !bombers.contains(b));
        }
        self.targets.retain(|_, list| !list.is_empty());
        self.targets.entry(target).or_default().extend(bombers.iter().copied());
    }

    fn target_of(&self, bomber: UnitId) -> Option<UnitId> {
        self.targets
            .iter()
            .find(|(_, bombers)| bombers.contains(&bomber))
            .map(|(&t, _)| t)
    }

    fn raid_aa(&self, state: &GameState) -> Vec<UnitId> {
        let domains: Vec<UnitDomain> = self
            .core
            .attacking_units
            .iter()
            .filter_map(|&u| state.type_of(u).map(|t| t.domain))
            .collect();
        state
            .enemy_units_in(self.core.site, self.core.attacker)
            .into_iter()
            .filter(|&u| {
                state
                    .type_of(u)
                    .and_then(|t| t.aa.as_ref())
                    .map(|aa| aa.vs_raids && aa.targets.iter().any(|d| domains.contains(d)))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn update_defending_units(&mut self, state: &GameState) {
        let mut defenders = self.raid_aa(state);
        let damageable: Vec<UnitId> = if self.targets.is_empty() {
            state
                .enemy_units_in(self.core.site, self.core.attacker)
                .into_iter()
                .filter(|&u| state.matches(u, matches::can_be_damaged))
                .collect()
        } else {
            self.targets.keys().copied().collect()
        };
        for u in damageable {
            if !defenders.contains(&u) {
                defenders.push(u);
            }
        }
        self.core.defending_units = defenders;
    }

    /// Bombers without a target go for the unit that can take the most damage
    fn assign_default_targets(&mut self, state: &GameState) {
        let unassigned: Vec<UnitId> = self
            .core
            .attacking_units
            .iter()
            .copied()
            .filter(|&b| self.target_of(b).is_none())
            .filter(|&b| state.matches(b, matches::is_strategic_bomber))
            .collect();
        if unassigned.is_empty() {
            return;
        }
        let best = self
            .core
            .defending_units
            .iter()
            .copied()
            .filter(|&u| state.matches(u, matches::can_be_damaged))
            .max_by_key(|&u| {
                let remaining = state
                    .unit(u)
                    .ok()
                    .zip(state.type_of(u))
                    .map(|(unit, t)| t.max_damage.saturating_sub(unit.bombing_damage))
                    .unwrap_or(0);
                // earliest unit wins ties
                (remaining, std::cmp::Reverse(u))
            });
        if let Some(target) = best {
            self.assign_target(target, &unassigned);
        }
    }

    fn forget_attackers(&mut self, units: &[UnitId]) {
        self.core.attacking_units.retain(|u| !units.contains(u));
        for list in self.targets.values_mut() {
            list.retain(|b| !units.contains(b));
        }
    }

    fn push_steps(&mut self, has_aa: bool, ctx: &mut BattleContext<'_>) {
        let mut names = Vec::new();
        if has_aa {
            for aa_type in self.aa_types(ctx.state) {
                names.push(format!("{} fire", aa_type));
                names.push(format!("select {} casualties", aa_type));
                names.push(format!("remove {} casualties", aa_type));
            }
        }
        names.push(RAID.to_string());
        ctx.notify(BattleNotice::Steps {
            battle: self.core.id,
            steps: names,
        });

        let mut steps = Vec::new();
        if has_aa {
            steps.push(BombingRaidStep::FireAa);
        }
        steps.extend([
            BombingRaidStep::RollBombing,
            BombingRaidStep::Aftermath,
            BombingRaidStep::End,
        ]);
        self.stack.push_all_reversed(steps);
    }

    fn aa_types(&self, state: &GameState) -> Vec<String> {
        let mut types: Vec<String> = self
            .raid_aa(state)
            .into_iter()
            .filter_map(|u| state.type_of(u).and_then(|t| t.aa.as_ref()).map(|aa| aa.aa_type.clone()))
            .collect();
        types.sort();
        types.dedup();
        types
    }

    // === AA ===

    fn fire_aa(&mut self, state: &GameState) {
        let groups = self
            .aa_types(state)
            .into_iter()
            .map(|aa_type| BombingRaidStep::FireAaGroup { aa_type })
            .collect();
        self.stack.push_all_reversed(groups);
    }

    fn fire_aa_group(&mut self, aa_type: &str, state: &GameState) {
        let guns: Vec<UnitId> = self
            .raid_aa(state)
            .into_iter()
            .filter(|&u| {
                state
                    .type_of(u)
                    .and_then(|t| t.aa.as_ref())
                    .map(|aa| aa.aa_type == aa_type)
                    .unwrap_or(false)
            })
            .collect();
        let domains: Vec<UnitDomain> = guns
            .iter()
            .filter_map(|&u| state.type_of(u).and_then(|t| t.aa.as_ref()))
            .flat_map(|aa| aa.targets.iter().copied())
            .collect();
        let targets = state.filter(&self.core.attacking_units, |_, t| domains.contains(&t.domain));
        if guns.is_empty() || targets.is_empty() {
            return;
        }
        let spec = FireSpec {
            label: format!("{} fire", aa_type),
            firing_player: self.core.defender,
            hit_player: self.core.attacker,
            firing_side: Side::Defender,
            firing: guns,
            targets,
            return_fire: ReturnFire::None,
            kind: FireKind::AntiAir,
        };
        self.stack.push(BombingRaidStep::Fire(FireStep::Roll(spec)));
    }

    fn remove_aa_hits(&mut self, spec: &FireSpec, killed: &[UnitId], ctx: &mut BattleContext<'_>) -> Result<()> {
        if killed.is_empty() {
            return Ok(());
        }
        let aa_type = spec.label.trim_end_matches(" fire");
        let text = format!("{} killed by {}", ctx.describe_units(killed), aa_type);
        ctx.add_history(&text, killed);
        self.forget_attackers(killed);
        let site = self.core.site;
        let on_site: Vec<UnitId> = killed.iter().copied().filter(|&u| ctx.state.is_in(u, site)).collect();
        ctx.add_change(Change::remove_units(site, &on_site))?;
        self.core.killed.extend(on_site);
        Ok(())
    }

    // === BOMBING ===

    fn bombers(&self, state: &GameState) -> Vec<UnitId> {
        state.filter(&self.core.attacking_units, |u, t| {
            matches::is_strategic_bomber(u, t) && t.rolls > 0
        })
    }

    fn roll_bombing(&mut self, ctx: &mut BattleContext<'_>) -> Result<()> {
        let bombers = self.bombers(ctx.state);
        let count: usize = bombers
            .iter()
            .filter_map(|&b| ctx.state.type_of(b))
            .map(|t| t.rolls as usize)
            .sum();
        if count == 0 {
            return Ok(());
        }
        let annotation = format!(
            "{} rolling to allocate cost of strategic bombing raid against {} in {}",
            ctx.state.player_name(self.core.attacker),
            ctx.state.player_name(self.core.defender),
            ctx.state.territory_name(self.core.site)
        );
        let rolls = ctx.roll_dice(count, self.core.attacker, DiceTag::Bombing, &annotation)?;
        self.stack.push(BombingRaidStep::ApplyDamage { rolls });
        Ok(())
    }

    /// Damage per bomber, before any cap on what the territory can lose
    fn bomber_damage(&self, rolls: &[u32], state: &GameState, rules: &RulesConfig) -> Vec<(UnitId, u32)> {
        let production = state.territory(self.core.site).map(|t| t.production).unwrap_or(0);
        let limit_to_production = rules.limit_sbr_damage_to_production();
        let mut index = 0usize;
        let mut out = Vec::new();
        for bomber in self.bombers(state) {
            let Some(t) = state.type_of(bomber) else { continue };
            let n = t.rolls as usize;
            let end = (index + n).min(rolls.len());
            let dice = &rolls[index..end];
            index = end;
            let per_die = |d: u32| (d as i64 + 1 + t.bombing_bonus as i64).max(0) as u32;
            let mut damage = if n > 1 && rules.lhtr_heavy_bombers() {
                dice.iter().map(|&d| per_die(d)).max().unwrap_or(0)
            } else {
                dice.iter().map(|&d| per_die(d)).sum()
            };
            if limit_to_production {
                damage = damage.min(production);
            }
            out.push((bomber, damage));
        }
        out
    }

    fn apply_damage(&mut self, rolls: &[u32], registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        if self.core.attacking_units.is_empty() {
            return Ok(());
        }
        let site = self.core.site;
        let site_name = ctx.state.territory_name(site);
        let production = ctx.state.territory(site)?.production;
        let per_bomber = self.bomber_damage(rolls, ctx.state, ctx.rules);
        let mut cost: u32 = per_bomber.iter().map(|(_, d)| d).sum();
        let mut by_target: BTreeMap<UnitId, u32> = BTreeMap::new();
        if ctx.rules.sbr_damages_units() {
            for &(bomber, damage) in &per_bomber {
                let target = self
                    .target_of(bomber)
                    .ok_or_else(|| BattleError::invariant(format!("bomber {} has no target", bomber)))?;
                *by_target.entry(target).or_default() += damage;
            }
        }

        if ctx.rules.limit_sbr_damage_per_turn() {
            let limit = production.saturating_sub(registry.bombing_damage(site));
            cost = cost.min(limit);
            for damage in by_target.values_mut() {
                *damage = (*damage).min(limit);
            }
        }

        ctx.notify(BattleNotice::Bombing {
            battle: self.core.id,
            rolls: rolls.to_vec(),
            damage: cost,
        });

        if ctx.rules.sbr_damages_units() {
            let mut total = 0;
            for (target, damage) in by_target {
                let unit = ctx.state.unit(target)?;
                let max = ctx.state.type_of(target).map(|t| t.max_damage).unwrap_or(0);
                let damage = damage.min(max.saturating_sub(unit.bombing_damage));
                let new_damage = unit.bombing_damage + damage;
                let type_name = ctx.state.type_of(target).map(|t| t.name.clone()).unwrap_or_default();
                registry.add_bombing_damage(site, damage);
                let change = Change::bombing_damage(ctx.state, target, new_damage)?;
                ctx.add_change(change)?;
                let text = format!(
                    "Bombing raid in {} rolls: {:?} and causes: {} damage to unit: {}",
                    site_name, rolls, damage, type_name
                );
                ctx.add_history(&text, &[target]);
                self.unit_damage.insert(target, damage);
                total += damage;
            }
            self.total = total;
        } else {
            registry.add_bombing_damage(site, cost);
            let cost = cost * ctx.rules.pu_multiplier();
            let defender = self.core.defender;
            let have = ctx.state.player(defender).map(|p| p.pus).unwrap_or(0);
            let to_remove = cost.min(have);
            ctx.add_change(Change::resources(defender, -(to_remove as i64)))?;
            let text = format!(
                "Bombing raid in {} rolls: {:?} and costs: {} {}.",
                site_name,
                rolls,
                cost,
                pluralize_pu(cost)
            );
            ctx.add_history(&text, &[]);
            self.total = cost;
        }
        tracing::info!(battle = %self.core.id, damage = self.total, "bombs dropped");
        Ok(())
    }

    /// Raid summary and suicide attackers
    fn aftermath(&mut self, ctx: &mut BattleContext<'_>) -> Result<()> {
        let text = if ctx.rules.sbr_damages_units() {
            format!(
                "Bombing raid in {} causes {} damage total.",
                ctx.state.territory_name(self.core.site),
                self.total
            )
        } else {
            format!("Bombing raid costs {} {}", self.total, pluralize_pu(self.total))
        };
        ctx.add_history(&text, &[]);

        let suicide = ctx.state.filter(&self.core.attacking_units, matches::is_suicide);
        if !suicide.is_empty() {
            let site = self.core.site;
            let text = format!(
                "{} lost in {}",
                ctx.describe_units(&suicide),
                ctx.state.territory_name(site)
            );
            ctx.add_history(&text, &suicide);
            ctx.add_change(Change::remove_units(site, &suicide))?;
            self.forget_attackers(&suicide);
            self.core.killed.extend(suicide);
        }
        Ok(())
    }

    fn end(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        let message = if ctx.rules.sbr_damages_units() {
            format!("Raid causes {} damage total.", self.total)
        } else {
            format!("Bombing raid cost {} {}", self.total, pluralize_pu(self.total))
        };
        ctx.notify(BattleNotice::BattleEnd {
            battle: self.core.id,
            message,
        });
        if self.total > 0 {
            self.core.who_won = WhoWon::Attacker;
            self.core.result = Some(BattleResultDescription::Bombed);
        } else {
            self.core.who_won = WhoWon::Defender;
            self.core.result = Some(BattleResultDescription::Lost);
        }
        self.core.tally_losses(ctx.state);
        registry.records_mut().add_result(self.core.id, self.core.outcome());
        self.core.is_over = true;
        tracing::info!(battle = %self.core.id, who_won = ?self.core.who_won, "bombing raid over");
        Ok(())
    }

    fn end_before_rolling(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) {
        ctx.notify(BattleNotice::BattleEnd {
            battle: self.core.id,
            message: "Bombing raid does no damage".to_string(),
        });
        self.core.who_won = WhoWon::Draw;
        self.core.result = Some(BattleResultDescription::NoBattle);
        registry.records_mut().add_result(self.core.id, self.core.outcome());
        self.core.is_over = true;
    }
}

fn pluralize_pu(n: u32) -> &'static str {
    if n == 1 {
        "PU"
    } else {
        "PUs"
    }
}

impl BattleOps for BombingRaidBattle {
    fn core(&self) -> &BattleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BattleCore {
        &mut self.core
    }

    fn add_attack(&mut self, state: &GameState, route: &Route, units: &[UnitId]) -> Result<CompositeChange> {
        self.core.record_attack(state, route, units);
        Ok(CompositeChange::new())
    }

    fn remove_attack(&mut self, _route: &Route, units: &[UnitId]) {
        self.forget_attackers(units);
        self.targets.retain(|_, list| !list.is_empty());
    }

    fn fight(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        self.core.prune_missing(ctx.state);
        let site = self.core.site;
        self.targets.retain(|&t, _| ctx.state.is_in(t, site));
        if self.stack.is_executing() {
            tracing::info!(battle = %self.core.id, "resuming bombing raid");
            return drive(self, registry, ctx);
        }
        // targets are only complete once every attack has been added
        self.update_defending_units(ctx.state);
        ctx.start_event(&format!("Strategic bombing raid in {}", ctx.state.territory_name(site)));
        let damageable = ctx.state.any(&self.core.defending_units, matches::can_be_damaged);
        if self.core.attacking_units.is_empty() || !damageable {
            self.end_before_rolling(registry, ctx);
            return Ok(());
        }
        if ctx.rules.sbr_damages_units() {
            self.assign_default_targets(ctx.state);
        }
        let has_aa = !self.raid_aa(ctx.state).is_empty();
        self.push_steps(has_aa, ctx);
        drive(self, registry, ctx)
    }

    fn units_lost_in_preceding_battle(
        &mut self,
        _units: &[UnitId],
        _withdrawn: bool,
        _registry: &mut BattleRegistry,
        _ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        Ok(())
    }
}

impl SteppedBattle for BombingRaidBattle {
    type Step = BombingRaidStep;

    fn stack_mut(&mut self) -> &mut ExecutionStack<BombingRaidStep> {
        &mut self.stack
    }

    fn is_over(&self) -> bool {
        self.core.is_over
    }

    fn execute(
        &mut self,
        step: BombingRaidStep,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        match step {
            BombingRaidStep::FireAa => {
                self.fire_aa(ctx.state);
                Ok(())
            }
            BombingRaidStep::FireAaGroup { aa_type } => {
                self.fire_aa_group(&aa_type, ctx.state);
                Ok(())
            }
            BombingRaidStep::Fire(FireStep::RemoveCasualties { spec, details, .. }) => {
                fire::mark_damaged(&details.damaged, ctx)?;
                self.remove_aa_hits(&spec, &details.killed, ctx)
            }
            BombingRaidStep::Fire(step) => {
                let next = fire::advance(step, self.core.id, ctx)?;
                self.stack.push(BombingRaidStep::Fire(next));
                Ok(())
            }
            BombingRaidStep::RollBombing => self.roll_bombing(ctx),
            BombingRaidStep::ApplyDamage { rolls } => self.apply_damage(&rolls, registry, ctx),
            BombingRaidStep::Aftermath => self.aftermath(ctx),
            BombingRaidStep::End => self.end(registry, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::{AttackKind, Battle};
    use crate::bridge::{AutoCasualtySelector, InMemoryHistory, RecordingDisplay, ScriptedDice, ScriptedRemote};
    use crate::core::config::EngineConfig;
    use crate::core::types::BattleId;
    use crate::model::{GameStateBuilder, UnitType};

    struct Harness {
        dice: ScriptedDice,
        casualties: AutoCasualtySelector,
        remote: ScriptedRemote,
        display: RecordingDisplay,
        history: InMemoryHistory,
    }

    impl Harness {
        fn new(dice: ScriptedDice) -> Self {
            Self {
                dice,
                casualties: AutoCasualtySelector,
                remote: ScriptedRemote::new(),
                display: RecordingDisplay::new(),
                history: InMemoryHistory::new(),
            }
        }

        fn ctx<'a>(&'a mut self, state: &'a mut GameState, rules: &'a RulesConfig) -> BattleContext<'a> {
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
    }

    fn ruhr(bombers: u32, extra: &[(u32, &str)], production: u32) -> GameState {
        let mut b = GameStateBuilder::classic()
            .unit_type(UnitType {
                attack: 4,
                defense: 1,
                cost: 15,
                rolls: 2,
                is_strategic_bomber: true,
                ..UnitType::named("heavy_bomber", UnitDomain::Air)
            })
            .player("UK", 0)
            .player("Germany", 30)
            .land("Ruhr", Some("Germany"), production)
            .sea("North Sea")
            .connect("Ruhr", "North Sea")
            .units("Ruhr", "UK", bombers, "bomber");
        for &(n, t) in extra {
            let owner = if t.contains("bomber") { "UK" } else { "Germany" };
            b = b.units("Ruhr", owner, n, t);
        }
        b.build().unwrap()
    }

    fn raid(state: &mut GameState, rules: &RulesConfig, h: &mut Harness) -> (BattleRegistry, BattleId) {
        let north = state.territory_id("North Sea").unwrap();
        let ruhr = state.territory_id("Ruhr").unwrap();
        let units: Vec<UnitId> = state
            .units_in(ruhr)
            .into_iter()
            .filter(|&u| state.owner_of(u) == Some(PlayerId(0)))
            .collect();
        let mut registry = BattleRegistry::new();
        {
            let mut ctx = h.ctx(state, rules);
            registry
                .add_attack(&Route::new(north, vec![ruhr]), &units, PlayerId(0), AttackKind::Bombing, &mut ctx)
                .unwrap();
        }
        let id = registry.pending(ruhr, BattleKind::BombingRaid).unwrap();
        {
            let mut ctx = h.ctx(state, rules);
            registry.fight_battle(id, &mut ctx).unwrap();
        }
        (registry, id)
    }

    fn pus(state: &GameState, player: u32) -> u32 {
        state.player(PlayerId(player)).unwrap().pus
    }

    #[test]
    fn test_raid_costs_defender_pus() {
        let mut state = ruhr(1, &[(1, "factory")], 6);
        let rules = RulesConfig::default();
        let mut h = Harness::new(ScriptedDice::new([3]));
        let (registry, id) = raid(&mut state, &rules, &mut h);
        let ruhr = state.territory_id("Ruhr").unwrap();
        assert_eq!(pus(&state, 1), 26);
        assert_eq!(registry.bombing_damage(ruhr), 4);
        let record = registry.records().get(id).unwrap();
        assert_eq!(record.who_won, WhoWon::Attacker);
        assert_eq!(record.result, Some(BattleResultDescription::Bombed));
        assert!(h.history.mentions("and costs: 4 PUs."));
        assert_eq!(h.dice.requests, vec![(PlayerId(0), DiceTag::Bombing, 1)]);
    }

    #[test]
    fn test_damage_capped_by_production_and_turn() {
        let mut state = ruhr(2, &[(1, "factory")], 2);
        let rules = RulesConfig {
            ww2v2: true,
            limit_sbr_damage_per_turn: true,
            ..RulesConfig::default()
        };
        let mut h = Harness::new(ScriptedDice::new([5, 5]));
        let (registry, _) = raid(&mut state, &rules, &mut h);
        let ruhr = state.territory_id("Ruhr").unwrap();
        assert_eq!(pus(&state, 1), 28);
        assert_eq!(registry.bombing_damage(ruhr), 2);
    }

    #[test]
    fn test_pu_multiplier_scales_the_loss() {
        let mut state = ruhr(1, &[(1, "factory")], 6);
        let rules = RulesConfig {
            pu_multiplier: 3,
            ..RulesConfig::default()
        };
        let mut h = Harness::new(ScriptedDice::new([1]));
        let (registry, _) = raid(&mut state, &rules, &mut h);
        let ruhr = state.territory_id("Ruhr").unwrap();
        assert_eq!(pus(&state, 1), 24);
        // production lost is counted before the multiplier
        assert_eq!(registry.bombing_damage(ruhr), 2);
    }

    #[test]
    fn test_aa_shoots_down_bomber_before_bombing() {
        let mut state = ruhr(2, &[(1, "factory"), (1, "aa_gun")], 6);
        let rules = RulesConfig::default();
        // AA: one hit, one miss; then the survivor rolls a 3
        let mut h = Harness::new(ScriptedDice::new([0, 5, 2]));
        let (registry, id) = raid(&mut state, &rules, &mut h);
        let ruhr = state.territory_id("Ruhr").unwrap();
        assert_eq!(state.units_of_type(ruhr, PlayerId(0), "bomber").len(), 1);
        assert_eq!(pus(&state, 1), 27);
        assert!(h.history.mentions("1 bomber killed by AA"));
        let record = registry.records().get(id).unwrap();
        assert_eq!(record.attacker_lost_tuv, 12);
        assert_eq!(
            h.dice.requests,
            vec![(PlayerId(1), DiceTag::AntiAir, 2), (PlayerId(0), DiceTag::Bombing, 1)]
        );
    }

    #[test]
    fn test_unit_damage_is_capped_at_max_damage() {
        let mut state = ruhr(1, &[(1, "factory")], 10);
        let ruhr = state.territory_id("Ruhr").unwrap();
        let factory = state.units_of_type(ruhr, PlayerId(1), "factory")[0];
        state.unit_mut(factory).unwrap().bombing_damage = 18;
        let rules = RulesConfig {
            sbr_damages_units: true,
            ..RulesConfig::default()
        };
        let mut h = Harness::new(ScriptedDice::new([5]));
        let (registry, id) = raid(&mut state, &rules, &mut h);
        assert_eq!(state.unit(factory).unwrap().bombing_damage, 20);
        assert_eq!(pus(&state, 1), 30);
        assert_eq!(registry.bombing_damage(ruhr), 2);
        assert_eq!(registry.records().get(id).unwrap().result, Some(BattleResultDescription::Bombed));
        assert!(h.history.mentions("causes: 2 damage to unit: factory"));
    }

    #[test]
    fn test_heavy_bombers_keep_best_die() {
        let mut state = ruhr(0, &[(1, "factory"), (1, "heavy_bomber")], 10);
        let lhtr = RulesConfig {
            lhtr_heavy_bombers: true,
            ..RulesConfig::default()
        };
        let mut h = Harness::new(ScriptedDice::new([1, 4]));
        raid(&mut state, &lhtr, &mut h);
        assert_eq!(pus(&state, 1), 25);

        let mut state = ruhr(0, &[(1, "factory"), (1, "heavy_bomber")], 10);
        let mut h = Harness::new(ScriptedDice::new([1, 4]));
        raid(&mut state, &RulesConfig::default(), &mut h);
        assert_eq!(pus(&state, 1), 23);
    }

    #[test]
    fn test_nothing_to_bomb_ends_without_rolling() {
        let mut state = ruhr(1, &[(1, "infantry")], 6);
        let rules = RulesConfig::default();
        let mut h = Harness::new(ScriptedDice::new([]));
        let (registry, id) = raid(&mut state, &rules, &mut h);
        assert!(h.dice.requests.is_empty());
        let record = registry.records().get(id).unwrap();
        assert_eq!(record.who_won, WhoWon::Draw);
        assert_eq!(record.result, Some(BattleResultDescription::NoBattle));
        assert_eq!(pus(&state, 1), 30);
    }

    #[test]
    fn test_lost_connection_resumes_before_damage() {
        let mut state = ruhr(1, &[(1, "factory")], 6);
        let rules = RulesConfig {
            engine: EngineConfig {
                remote_retry_limit: Some(0),
                ..Default::default()
            },
            ..RulesConfig::default()
        };
        let north = state.territory_id("North Sea").unwrap();
        let ruhr = state.territory_id("Ruhr").unwrap();
        let bomber = state.units_of_type(ruhr, PlayerId(0), "bomber");
        let mut h = Harness::new(ScriptedDice::new([2]));
        let mut registry = BattleRegistry::new();
        {
            let mut ctx = h.ctx(&mut state, &rules);
            registry
                .add_attack(&Route::new(north, vec![ruhr]), &bomber, PlayerId(0), AttackKind::Bombing, &mut ctx)
                .unwrap();
        }
        let id = registry.pending(ruhr, BattleKind::BombingRaid).unwrap();
        h.dice.drop_next(1);
        {
            let mut ctx = h.ctx(&mut state, &rules);
            assert!(registry.fight_battle(id, &mut ctx).unwrap_err().is_retryable());
        }
        let Battle::BombingRaid(suspended) = registry.battle(id).unwrap() else {
            panic!("expected a bombing raid");
        };
        assert_eq!(suspended.stack().in_flight(), Some(&BombingRaidStep::RollBombing));
        assert_eq!(pus(&state, 1), 30);
        {
            let mut ctx = h.ctx(&mut state, &rules);
            registry.fight_battle(id, &mut ctx).unwrap();
        }
        assert_eq!(pus(&state, 1), 27);
        assert!(registry.battle(id).is_err());
    }
}
