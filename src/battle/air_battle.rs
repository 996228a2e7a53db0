//! Air-to-air combat ahead of a bombing raid or a ground battle
//!
//! Escorts (and bombers, on a raid) meet the defender's interceptors over the
//! site. Both sides fire at the same time each round; the dead are removed
//! once both volleys are in. When the air battle ends, surviving bombers go on
//! to a [`BombingRaidBattle`](crate::battle::BombingRaidBattle) at the same site.

use serde::{Deserialize, Serialize};

use crate::battle::common::{find_defender, BattleCore, BattleKind, BattleResultDescription, WhoWon};
use crate::battle::execution::{drive, ExecutionStack, SteppedBattle};
use crate::battle::fire::{self, FireKind, FireSpec, FireStep, ReturnFire};
use crate::battle::registry::BattleRegistry;
use crate::battle::BattleOps;
use crate::bridge::{BattleContext, BattleNotice, RetreatQuery};
use crate::core::config::RulesConfig;
use crate::core::error::{BattleError, Result};
use crate::core::types::{PlayerId, Side, TerritoryId, UnitId};
use crate::model::{matches, Change, CompositeChange, GameState, Route, Unit, UnitFlag, UnitType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AirBattleStep {
    LaunchInterceptors,
    AttackersFire,
    DefendersFire,
    Fire(FireStep),
    RemoveCasualties,
    /// Hand surviving bombers on to their raid
    DispatchBombers,
    End,
    AttackerWithdraw,
    DefenderWithdraw,
    NextRound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirBattle {
    core: BattleCore,
    stack: ExecutionStack<AirBattleStep>,
    bombing_run: bool,
    /// Some interceptors took off
    intercepted: bool,
    max_rounds: u32,
}

fn interceptors_in(
    state: &GameState,
    rules: &RulesConfig,
    site: TerritoryId,
    attacker: PlayerId,
    bombing: bool,
) -> Vec<UnitId> {
    let scramble = rules.scramble_rules_in_effect();
    state
        .units_in(site)
        .into_iter()
        .filter(|&u| {
            state.is_enemy_unit(u, attacker)
                && state.matches(u, |u: &Unit, t: &UnitType| {
                    let able = if bombing {
                        matches::can_intercept(u, t)
                    } else {
                        matches::can_air_battle(u, t)
                    };
                    able && !u.was_in_air_battle && (scramble || !u.was_scrambled)
                })
        })
        .collect()
}

/// Whether an attack on `site` may meet interceptors. With scrambling, air
/// next door counts too.
pub fn territory_could_have_interceptors(
    state: &GameState,
    rules: &RulesConfig,
    site: TerritoryId,
    attacker: PlayerId,
    bombing: bool,
) -> bool {
    if !interceptors_in(state, rules, site, attacker, bombing).is_empty() {
        return true;
    }
    if !rules.scramble_rules_in_effect() {
        return false;
    }
    state
        .territory(site)
        .map(|t| {
            t.neighbors
                .iter()
                .any(|&n| !interceptors_in(state, rules, n, attacker, bombing).is_empty())
        })
        .unwrap_or(false)
}

impl AirBattle {
    pub fn new(
        site: TerritoryId,
        attacker: PlayerId,
        bombing_run: bool,
        sequence: u64,
        state: &GameState,
        rules: &RulesConfig,
    ) -> Self {
        let kind = if bombing_run {
            BattleKind::AirRaid
        } else {
            BattleKind::AirBattle
        };
        let defender = find_defender(state, site, attacker);
        let mut core = BattleCore::new(kind, sequence, site, attacker, defender);
        core.defending_units = interceptors_in(state, rules, site, attacker, bombing_run);
        Self {
            core,
            stack: ExecutionStack::new(),
            bombing_run,
            intercepted: false,
            max_rounds: rules.air_battle_rounds,
        }
    }

    pub fn is_bombing_run(&self) -> bool {
        self.bombing_run
    }

    pub fn stack(&self) -> &ExecutionStack<AirBattleStep> {
        &self.stack
    }

    /// Re-read the interceptors currently at the site
    pub fn refresh_defenders(&mut self, state: &GameState, rules: &RulesConfig) {
        self.core.defending_units = interceptors_in(state, rules, self.core.site, self.core.attacker, self.bombing_run);
    }

    /// Both sides have aircraft in the air
    pub fn should_fight(&self) -> bool {
        !self.core.defending_units.is_empty() && !self.core.attacking_units.is_empty()
    }

    fn max_rounds_reached(&self) -> bool {
        self.max_rounds > 0 && self.max_rounds <= self.core.round
    }

    fn can_withdraw(&self, side: Side, rules: &RulesConfig) -> bool {
        let allowed = match side {
            Side::Attacker => rules.air_battle_attackers_can_retreat(),
            Side::Defender => rules.air_battle_defenders_can_retreat(),
        };
        allowed && !self.max_rounds_reached() && self.should_fight()
    }

    fn push_round(&mut self, first_run: bool, ctx: &mut BattleContext<'_>) {
        use AirBattleStep as S;
        let mut steps = Vec::new();
        if self.should_fight() {
            if first_run {
                steps.push(S::LaunchInterceptors);
            }
            steps.push(S::AttackersFire);
            steps.push(S::DefendersFire);
            steps.push(S::RemoveCasualties);
        }
        steps.extend([
            S::DispatchBombers,
            S::End,
            S::AttackerWithdraw,
            S::DefenderWithdraw,
            S::NextRound,
        ]);

        let attacker = ctx.state.player_name(self.core.attacker);
        let defender = ctx.state.player_name(self.core.defender);
        let mut names = Vec::new();
        if first_run {
            names.push("Air Battle".to_string());
            names.push(format!("{} launch interceptors", defender));
        }
        names.push(format!("{} attackers fire", attacker));
        names.push(format!("{} defenders fire", defender));
        if self.can_withdraw(Side::Attacker, ctx.rules) {
            names.push(format!("{} attackers withdraw", attacker));
        }
        if self.can_withdraw(Side::Defender, ctx.rules) {
            names.push(format!("{} defenders withdraw", defender));
        }
        ctx.notify(BattleNotice::Steps {
            battle: self.core.id,
            steps: names,
        });
        self.stack.push_all_reversed(steps);
    }

    // === STEPS ===

    fn launch_interceptors(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        let defender = self.core.defender;
        let site = self.core.site;
        let available = self.core.defending_units.clone();
        let may_decline = self.bombing_run || ctx.rules.air_battle_defenders_can_retreat();
        let launch = if may_decline && !available.is_empty() {
            let prompt = format!(
                "{} launch {} interceptors from {}?",
                ctx.state.player_name(defender),
                available.len(),
                ctx.state.territory_name(site)
            );
            ctx.confirm(defender, &prompt)?
        } else {
            true
        };

        if !launch {
            self.core.defending_units.clear();
            // grounded planes also sit out the battle below
            if !self.bombing_run {
                self.withdraw(&available, Side::Defender, registry, ctx)?;
            }
        }
        let attacking = self.core.attacking_units.clone();
        if !attacking.is_empty() {
            let text = format!(
                "{} attacks with {} units heading to {}",
                ctx.state.player_name(self.core.attacker),
                attacking.len(),
                ctx.state.territory_name(site)
            );
            ctx.add_history(&text, &attacking);
        }
        let defending = self.core.defending_units.clone();
        if !defending.is_empty() {
            let text = format!(
                "{} launches {} interceptors out of {}",
                ctx.state.player_name(defender),
                defending.len(),
                ctx.state.territory_name(site)
            );
            ctx.add_history(&text, &defending);
            self.intercepted = true;
        }
        tracing::info!(battle = %self.core.id, interceptors = defending.len(), "interceptors launched");
        Ok(())
    }

    fn push_volley(&mut self, side: Side, state: &GameState) {
        if !self.intercepted {
            return;
        }
        let enemy = side.opposite();
        let firing = self.core.units_with_waiting(side);
        let targets = self.core.units(enemy).clone();
        if firing.is_empty() || targets.is_empty() {
            return;
        }
        let label = match side {
            Side::Attacker => format!("{} attackers fire", state.player_name(self.core.attacker)),
            Side::Defender => format!("{} defenders fire", state.player_name(self.core.defender)),
        };
        let spec = FireSpec {
            label,
            firing_player: self.core.player(side),
            hit_player: self.core.player(enemy),
            firing_side: side,
            firing,
            targets,
            return_fire: ReturnFire::All,
            kind: FireKind::AirBattle,
        };
        self.stack.push(AirBattleStep::Fire(FireStep::Roll(spec)));
    }

    fn remove(&mut self, units: &[UnitId], registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        let mut lost = units.to_vec();
        lost.extend(self.core.dependent_units(units));
        let site = self.core.site;
        let on_site: Vec<UnitId> = lost.iter().copied().filter(|&u| ctx.state.is_in(u, site)).collect();
        if !on_site.is_empty() {
            let text = format!(
                "{} lost in {}",
                ctx.describe_units(&on_site),
                ctx.state.territory_name(site)
            );
            ctx.add_history(&text, &on_site);
            ctx.add_change(Change::remove_units(site, &on_site))?;
            self.core.killed.extend(on_site.iter().copied());
        }
        self.core.attacking_units.retain(|u| !lost.contains(u));
        self.core.defending_units.retain(|u| !lost.contains(u));
        registry.units_lost_in_preceding_battle(self.core.id, &lost, false, ctx)
    }

    /// Both volleys are in; the dead and any suicide aircraft go down
    fn remove_casualties(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        if !self.intercepted {
            return Ok(());
        }
        let attacking = std::mem::take(&mut self.core.attacking_waiting_to_die);
        self.remove(&attacking, registry, ctx)?;
        let defending = std::mem::take(&mut self.core.defending_waiting_to_die);
        self.remove(&defending, registry, ctx)?;

        let bombing = self.bombing_run;
        let suicide_escorts = ctx.state.any(&self.core.attacking_units, |u, t| {
            matches::is_suicide(u, t) && !(bombing && matches::is_strategic_bomber(u, t))
        });
        if suicide_escorts {
            let suicide = ctx.state.filter(&self.core.attacking_units, matches::is_suicide);
            self.remove(&suicide, registry, ctx)?;
        }
        let suicide = ctx.state.filter(&self.core.defending_units, matches::is_suicide);
        self.remove(&suicide, registry, ctx)
    }

    fn battle_continues(&self) -> bool {
        self.should_fight() && !self.max_rounds_reached()
    }

    fn mark_in_air_battle(&self, units: &[UnitId], ctx: &mut BattleContext<'_>) -> Result<()> {
        let change = Change::flag(ctx.state, units, UnitFlag::WasInAirBattle, true);
        ctx.add_change(change)
    }

    /// Surviving bombers move on to a raid at the same site
    fn dispatch_bombers(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        if self.battle_continues() || !self.bombing_run {
            return Ok(());
        }
        // nobody here takes part in the ground battle afterwards
        let attacking = self.core.attacking_units.clone();
        let defending = self.core.defending_units.clone();
        self.mark_in_air_battle(&attacking, ctx)?;
        self.mark_in_air_battle(&defending, ctx)?;

        let bombers = ctx.state.filter(&attacking, matches::is_strategic_bomber);
        if bombers.is_empty() {
            return Ok(());
        }
        let site = self.core.site;
        let attacker = self.core.attacker;
        let has_target = ctx
            .state
            .units_in(site)
            .into_iter()
            .filter(|&u| ctx.state.is_enemy_unit(u, attacker))
            .any(|u| ctx.state.matches(u, |u, t| matches::can_be_damaged(u, t) && u.transported_by.is_none()));
        if !has_target {
            tracing::debug!(battle = %self.core.id, "no bombing target left");
            return Ok(());
        }
        let raid = registry.add_bombing_battle(&Route::stationary(site), &bombers, attacker, ctx.state)?;
        tracing::info!(battle = %self.core.id, %raid, bombers = bombers.len(), "bombers go on to their targets");
        Ok(())
    }

    fn end(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        if self.battle_continues() {
            return Ok(());
        }
        let state = &*ctx.state;
        let (who_won, result, text) = if self.core.attacking_units.is_empty() {
            (
                WhoWon::Defender,
                BattleResultDescription::Lost,
                "Air Battle is over, the attackers have all died",
            )
        } else if self.bombing_run {
            if state.any(&self.core.attacking_units, matches::is_strategic_bomber) {
                let result = if self.core.defending_units.is_empty() {
                    BattleResultDescription::WonWithoutConquering
                } else {
                    BattleResultDescription::WonWithEnemyLeft
                };
                (
                    WhoWon::Attacker,
                    result,
                    "Air Battle is over, the remaining bombers go on to their targets",
                )
            } else {
                (
                    WhoWon::Draw,
                    BattleResultDescription::Stalemate,
                    "Air Battle is over, the bombers have all died",
                )
            }
        } else if self.core.defending_units.is_empty() {
            (
                WhoWon::Attacker,
                BattleResultDescription::WonWithoutConquering,
                "Air Battle is over, the defenders have all died",
            )
        } else {
            (
                WhoWon::Draw,
                BattleResultDescription::Stalemate,
                "Air Battle is over, neither side is eliminated",
            )
        };
        self.core.who_won = who_won;
        self.core.result = Some(result);
        self.core.tally_losses(ctx.state);
        ctx.add_history(text, &[]);
        registry.records_mut().add_result(self.core.id, self.core.outcome());
        ctx.notify(BattleNotice::BattleEnd {
            battle: self.core.id,
            message: "Air Battle over".to_string(),
        });
        self.core.is_over = true;
        tracing::info!(battle = %self.core.id, ?who_won, rounds = self.core.round, "air battle over");
        Ok(())
    }

    fn query_withdraw(&mut self, side: Side, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        if self.core.is_over || !self.can_withdraw(side, ctx.rules) {
            return Ok(());
        }
        let units = self.core.units(side).clone();
        if units.is_empty() {
            return Ok(());
        }
        let player = self.core.player(side);
        let site = self.core.site;
        let available = [site];
        let prompt = format!("{} retreat?", ctx.state.player_name(player));
        let query = RetreatQuery {
            battle: self.core.id,
            player,
            site,
            available: &available,
            submerge: false,
            prompt: &prompt,
        };
        match ctx.query_retreat(&query)? {
            None => Ok(()),
            Some(to) if to != site => {
                tracing::warn!(battle = %self.core.id, %to, "illegal air battle withdrawal ignored");
                Ok(())
            }
            Some(_) => {
                self.withdraw(&units, side, registry, ctx)?;
                let message = format!(
                    "{} retreats all units to {}",
                    ctx.state.player_name(player),
                    ctx.state.territory_name(site)
                );
                ctx.notify(BattleNotice::Retreat {
                    battle: self.core.id,
                    player,
                    units,
                    to: site,
                    message,
                });
                Ok(())
            }
        }
    }

    /// Aircraft leave the air battle but stay over the site
    fn withdraw(
        &mut self,
        units: &[UnitId],
        side: Side,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        if side == Side::Attacker {
            registry.units_lost_in_preceding_battle(self.core.id, units, true, ctx)?;
        }
        let verb = if side.is_defender() { "grounded" } else { "retreated" };
        let text = format!("{} {}", ctx.describe_units(units), verb);
        self.core.units_mut(side).retain(|u| !units.contains(u));
        ctx.add_history(&text, units);
        self.mark_in_air_battle(units, ctx)
    }

    fn next_round(&mut self, ctx: &mut BattleContext<'_>) -> Result<()> {
        if self.core.is_over {
            return Ok(());
        }
        if !self.stack.is_empty() {
            return Err(BattleError::invariant("Stack not empty"));
        }
        self.core.round += 1;
        self.push_round(false, ctx);
        Ok(())
    }

    /// Close an air battle nobody came up to meet, without a record
    pub fn finish_headless(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        self.dispatch_bombers(registry, ctx)?;
        self.core.who_won = WhoWon::Attacker;
        self.core.result = Some(BattleResultDescription::NoBattle);
        registry.records_mut().remove_battle(self.core.id);
        self.core.is_over = true;
        tracing::debug!(battle = %self.core.id, "air battle finished without interceptors");
        Ok(())
    }
}

impl BattleOps for AirBattle {
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

    fn fight(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        self.core.prune_missing(ctx.state);
        if self.stack.is_executing() {
            tracing::info!(battle = %self.core.id, round = self.core.round, "resuming air battle");
            return drive(self, registry, ctx);
        }
        self.refresh_defenders(ctx.state, ctx.rules);
        let site = self.core.site;
        ctx.start_event(&format!("Air Battle in {}", ctx.state.territory_name(site)));
        self.push_round(true, ctx);
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

impl SteppedBattle for AirBattle {
    type Step = AirBattleStep;

    fn stack_mut(&mut self) -> &mut ExecutionStack<AirBattleStep> {
        &mut self.stack
    }

    fn is_over(&self) -> bool {
        self.core.is_over
    }

    fn execute(&mut self, step: AirBattleStep, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        match step {
            AirBattleStep::LaunchInterceptors => self.launch_interceptors(registry, ctx),
            AirBattleStep::AttackersFire => {
                self.push_volley(Side::Attacker, ctx.state);
                Ok(())
            }
            AirBattleStep::DefendersFire => {
                self.push_volley(Side::Defender, ctx.state);
                Ok(())
            }
            AirBattleStep::Fire(FireStep::RemoveCasualties { spec, details, .. }) => {
                fire::mark_damaged(&details.damaged, ctx)?;
                let hit = spec.firing_side.opposite();
                self.core.waiting_to_die_mut(hit).extend(details.killed.iter().copied());
                self.core.units_mut(hit).retain(|u| !details.killed.contains(u));
                Ok(())
            }
            AirBattleStep::Fire(step) => {
                let next = fire::advance(step, self.core.id, ctx)?;
                self.stack.push(AirBattleStep::Fire(next));
                Ok(())
            }
            AirBattleStep::RemoveCasualties => self.remove_casualties(registry, ctx),
            AirBattleStep::DispatchBombers => self.dispatch_bombers(registry, ctx),
            AirBattleStep::End => self.end(registry, ctx),
            AirBattleStep::AttackerWithdraw => self.query_withdraw(Side::Attacker, registry, ctx),
            AirBattleStep::DefenderWithdraw => self.query_withdraw(Side::Defender, registry, ctx),
            AirBattleStep::NextRound => self.next_round(ctx),
        }
    }
}
