//! Ground and naval battles fought round by round until one side is gone
//!
//! Each round is laid out as a list of [`MustFightStep`]s when it starts and
//! run from an [`ExecutionStack`]. Volleys decide who fires at whom when they
//! execute, so losses earlier in the round are always taken into account.
//! Units hit by a volley whose victims may return fire wait in the side's
//! waiting-to-die list until the next clearing step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::battle::common::{
    find_defender, is_enemy_and_not_unowned_water, player_with_most_units, BattleCore, BattleKind,
    BattleResultDescription, WhoWon,
};
use crate::battle::execution::{drive, ExecutionStack, SteppedBattle};
use crate::battle::fire::{self, FireKind, FireSpec, FireStep, ReturnFire};
use crate::battle::registry::BattleRegistry;
use crate::battle::BattleOps;
use crate::bridge::{BattleContext, BattleNotice, RetreatQuery};
use crate::core::config::RulesConfig;
use crate::core::error::{BattleError, Result};
use crate::core::types::{PlayerId, Side, TerritoryId, UnitId};
use crate::model::{matches, Change, CompositeChange, GameState, Route, Unit, UnitDomain, UnitFlag, UnitType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MustFightStep {
    /// Every AA category of one side fires in turn
    FireAa { side: Side },
    FireAaGroup { side: Side, aa_type: String },
    ClearWaitingToDie,
    RemoveNonCombatants,
    Bombard,
    SuicideAttack { side: Side },
    LandParatroops,
    MarkNoMovement,
    SubRetreatBeforeBattle { side: Side },
    CheckSuicideUnits,
    CheckUndefendedTransports,
    SubmergeSubsVsOnlyAir,
    FireSubs { side: Side, return_fire: ReturnFire },
    FireAirOnNonSubs { side: Side },
    FireNonSubs { side: Side },
    Fire(FireStep),
    CheckEnd,
    RetreatSubs { side: Side },
    RetreatPlanes,
    RetreatPartialAmphibious,
    AttackerRetreat,
    NextRound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetreatKind {
    Default,
    Subs,
    Planes,
    PartialAmphibious,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MustFightBattle {
    core: BattleCore,
    stack: ExecutionStack<MustFightStep>,
    attacking_retreated: Vec<UnitId>,
    defending_retreated: Vec<UnitId>,
}

impl MustFightBattle {
    pub fn new(site: TerritoryId, attacker: PlayerId, sequence: u64, state: &GameState) -> Self {
        let defender = find_defender(state, site, attacker);
        let mut core = BattleCore::new(BattleKind::Normal, sequence, site, attacker, defender);
        core.defending_units = state.enemy_units_in(site, attacker);
        Self {
            core,
            stack: ExecutionStack::new(),
            attacking_retreated: Vec::new(),
            defending_retreated: Vec::new(),
        }
    }

    pub fn add_bombarding_units(&mut self, units: &[UnitId]) {
        for &u in units {
            if !self.core.bombarding_units.contains(&u) {
                self.core.bombarding_units.push(u);
            }
        }
    }

    /// Steps left to run; the interrupted one first
    pub fn stack(&self) -> &ExecutionStack<MustFightStep> {
        &self.stack
    }

    pub fn retreated(&self, side: Side) -> &[UnitId] {
        match side {
            Side::Attacker => &self.attacking_retreated,
            Side::Defender => &self.defending_retreated,
        }
    }

    fn retreated_mut(&mut self, side: Side) -> &mut Vec<UnitId> {
        match side {
            Side::Attacker => &mut self.attacking_retreated,
            Side::Defender => &mut self.defending_retreated,
        }
    }

    fn site_is_water(&self, state: &GameState) -> bool {
        state.territory(self.core.site).map(|t| t.is_water).unwrap_or(false)
    }

    // === ROUND LAYOUT ===

    fn push_round(&mut self, first_run: bool, ctx: &mut BattleContext<'_>) {
        let steps = self.round_steps(ctx.state, ctx.rules, first_run);
        let names = self.step_names(ctx.state, &steps);
        ctx.notify(BattleNotice::Steps {
            battle: self.core.id,
            steps: names,
        });
        self.stack.push_all_reversed(steps);
    }

    fn round_steps(&self, state: &GameState, rules: &RulesConfig, first_run: bool) -> Vec<MustFightStep> {
        use MustFightStep as S;
        let mut steps = Vec::new();

        let offensive_aa = !self.aa_guns(state, Side::Attacker).is_empty();
        let defensive_aa = !self.aa_guns(state, Side::Defender).is_empty();
        if offensive_aa {
            steps.push(S::FireAa { side: Side::Attacker });
        }
        if defensive_aa {
            steps.push(S::FireAa { side: Side::Defender });
        }
        if offensive_aa || defensive_aa {
            steps.push(S::ClearWaitingToDie);
        }
        if self.core.round > 1 {
            steps.push(S::RemoveNonCombatants);
        }

        if first_run {
            steps.push(S::Bombard);
            steps.push(S::SuicideAttack { side: Side::Attacker });
            steps.push(S::SuicideAttack { side: Side::Defender });
            steps.push(S::RemoveNonCombatants);
            steps.push(S::LandParatroops);
            steps.push(S::MarkNoMovement);
        }

        if rules.sub_retreat_before_battle() {
            steps.push(S::SubRetreatBeforeBattle { side: Side::Attacker });
            steps.push(S::SubRetreatBeforeBattle { side: Side::Defender });
        }
        steps.push(S::CheckSuicideUnits);
        if rules.transport_casualties_restricted() {
            steps.push(S::CheckUndefendedTransports);
        }
        if rules.air_attack_sub_restricted() {
            steps.push(S::SubmergeSubsVsOnlyAir);
        }

        // who may answer a sneak attack, fixed for the whole round
        let ww2v2 = rules.is_ww2v2();
        let defender_sneak_rule = rules.subs_sneak_attack_on_defense();
        let defender_sneaks =
            !state.any(&self.core.attacking_units, matches::is_destroyer) && defender_sneak_rule;
        let attacker_sneaks = !state.any(&self.core.defending_units, matches::is_destroyer);
        let attacker_subs_rf = if !attacker_sneaks {
            ReturnFire::All
        } else if defender_sneaks || ww2v2 {
            ReturnFire::Subs
        } else {
            ReturnFire::None
        };
        let defender_subs_rf = if !defender_sneaks {
            ReturnFire::All
        } else if attacker_sneaks || ww2v2 {
            ReturnFire::Subs
        } else {
            ReturnFire::None
        };
        let defender_first = attacker_subs_rf == ReturnFire::All && defender_subs_rf == ReturnFire::None;
        let defender_with_all = !defender_first && !ww2v2 && defender_subs_rf == ReturnFire::All;

        if defender_first {
            steps.push(S::FireSubs {
                side: Side::Defender,
                return_fire: defender_subs_rf,
            });
        }
        steps.push(S::FireSubs {
            side: Side::Attacker,
            return_fire: attacker_subs_rf,
        });
        if defender_sneak_rule && !defender_first && !defender_with_all {
            steps.push(S::FireSubs {
                side: Side::Defender,
                return_fire: defender_subs_rf,
            });
        }
        if rules.air_attack_sub_restricted() {
            steps.push(S::FireAirOnNonSubs { side: Side::Attacker });
        }
        steps.push(S::FireNonSubs { side: Side::Attacker });
        if !defender_first && (!defender_sneak_rule || defender_with_all) {
            steps.push(S::FireSubs {
                side: Side::Defender,
                return_fire: defender_subs_rf,
            });
        }
        if rules.air_attack_sub_restricted() {
            steps.push(S::FireAirOnNonSubs { side: Side::Defender });
        }
        steps.push(S::FireNonSubs { side: Side::Defender });

        steps.push(S::ClearWaitingToDie);
        steps.push(S::CheckSuicideUnits);
        steps.push(S::CheckEnd);
        steps.push(S::RetreatSubs { side: Side::Attacker });
        steps.push(S::RetreatSubs { side: Side::Defender });
        steps.push(S::RetreatPlanes);
        steps.push(S::RetreatPartialAmphibious);
        steps.push(S::AttackerRetreat);
        steps.push(S::NextRound);
        steps
    }

    /// Labels shown to players for the steps they can see
    fn step_names(&self, state: &GameState, steps: &[MustFightStep]) -> Vec<String> {
        let name = |side: Side| state.player_name(self.core.player(side));
        let mut names = Vec::new();
        for step in steps {
            match step {
                MustFightStep::FireAa { side } => names.push(format!("{} fire AA", name(*side))),
                MustFightStep::Bombard if !self.core.bombarding_units.is_empty() => {
                    names.push("naval bombardment".to_string())
                }
                MustFightStep::FireSubs { side, .. } => names.push(format!("{} subs fire", name(*side))),
                MustFightStep::FireAirOnNonSubs { side } => {
                    names.push(format!("{} aircraft fire", name(*side)))
                }
                MustFightStep::FireNonSubs { side } => names.push(format!("{} fire", name(*side))),
                MustFightStep::RetreatSubs { side } => {
                    names.push(format!("{} subs withdraw", name(*side)))
                }
                MustFightStep::AttackerRetreat => {
                    names.push(format!("{} retreat", name(Side::Attacker)))
                }
                _ => {}
            }
        }
        names
    }

    // === VOLLEYS ===

    fn push_volley(
        &mut self,
        side: Side,
        firing: Vec<UnitId>,
        targets: Vec<UnitId>,
        return_fire: ReturnFire,
        kind: FireKind,
        label: String,
    ) {
        if firing.is_empty() || targets.is_empty() {
            return;
        }
        let spec = FireSpec {
            label,
            firing_player: self.core.player(side),
            hit_player: self.core.player(side.opposite()),
            firing_side: side,
            firing,
            targets,
            return_fire,
            kind,
        };
        self.stack.push(MustFightStep::Fire(FireStep::Roll(spec)));
    }

    /// Aircraft may hit the subs in `fired_at` only alongside a destroyer
    fn can_air_attack_subs(&self, state: &GameState, fired_at: &[UnitId], firing: &[UnitId]) -> bool {
        !(self.site_is_water(state)
            && state.any(fired_at, matches::is_sub)
            && !state.any(firing, matches::is_destroyer))
    }

    fn fire_subs(&mut self, side: Side, return_fire: ReturnFire, state: &GameState) {
        let enemy = side.opposite();
        if self.core.units(enemy).is_empty() {
            return;
        }
        let firing = state.filter(&self.core.units_with_waiting(side), matches::is_sub);
        let targets = state.filter(self.core.units(enemy), matches::is_not_air);
        let label = format!("{} select sub casualties", state.player_name(self.core.player(enemy)));
        self.push_volley(side, firing, targets, return_fire, FireKind::Normal, label);
    }

    fn fire_non_subs(&mut self, side: Side, state: &GameState, rules: &RulesConfig) {
        let enemy = side.opposite();
        let targets = self.core.units(enemy).clone();
        if targets.is_empty() {
            return;
        }
        let mut firing = state.filter(&self.core.units_with_waiting(side), matches::is_not_sub);
        if rules.air_attack_sub_restricted() && !self.can_air_attack_subs(state, &targets, &firing) {
            firing = state.filter(&firing, matches::is_not_air);
        }
        let label = format!("{} select casualties", state.player_name(self.core.player(enemy)));
        self.push_volley(side, firing, targets, ReturnFire::All, FireKind::Normal, label);
    }

    /// With no destroyer to help, aircraft can only pick non-sub targets
    fn fire_air_on_non_subs(&mut self, side: Side, state: &GameState) {
        let enemy = side.opposite();
        let fired_at = self.core.units(enemy).clone();
        if fired_at.is_empty() {
            return;
        }
        let firing = self.core.units_with_waiting(side);
        if self.can_air_attack_subs(state, &fired_at, &firing) {
            return;
        }
        let air = state.filter(&firing, matches::is_air);
        let targets = state.filter(&fired_at, matches::is_not_sub);
        let label = format!("{} select casualties", state.player_name(self.core.player(enemy)));
        self.push_volley(side, air, targets, ReturnFire::All, FireKind::Normal, label);
    }

    fn fire_naval_bombardment(&mut self, ctx: &mut BattleContext<'_>) -> Result<()> {
        let bombard = self.core.bombarding_units.clone();
        if bombard.is_empty() {
            return Ok(());
        }
        let change = Change::mark_no_movement(ctx.state, &bombard);
        ctx.add_change(change)?;
        let targets = ctx.state.filter(&self.core.defending_units, |_, t| {
            !t.is_infrastructure && !t.capturable_on_entering
        });
        let return_fire = if ctx.rules.naval_bombard_casualties_return_fire() {
            ReturnFire::All
        } else {
            ReturnFire::None
        };
        self.push_volley(
            Side::Attacker,
            bombard,
            targets,
            return_fire,
            FireKind::Bombard,
            "select naval bombardment casualties".to_string(),
        );
        Ok(())
    }

    fn fire_suicide_units(&mut self, side: Side, state: &GameState, rules: &RulesConfig) {
        if side.is_defender() && rules.defending_suicide_do_not_fire() {
            return;
        }
        let enemy = side.opposite();
        let suicide = state.filter(self.core.units(side), matches::is_suicide);
        if suicide.is_empty() {
            return;
        }
        let mut targets = state.filter(self.core.units(enemy), |u, t| {
            !t.is_infrastructure && !t.capturable_on_entering && !t.is_suicide && u.transported_by.is_none()
        });
        if rules.air_attack_sub_restricted() && !state.any(self.core.units(side), matches::is_destroyer) {
            targets = state.filter(&targets, matches::is_not_sub);
        }
        if state.all(&suicide, matches::is_sub) {
            targets = state.filter(&targets, matches::is_not_air);
        }
        let label = format!("{} select suicide casualties", state.player_name(self.core.player(enemy)));
        self.push_volley(side, suicide, targets, ReturnFire::All, FireKind::Normal, label);
    }

    // === ANTI-AIRCRAFT ===

    /// AA units of `side` that may fire this round at something present
    fn aa_guns(&self, state: &GameState, side: Side) -> Vec<UnitId> {
        let round = self.core.round;
        let enemy = self.core.units(side.opposite());
        self.core
            .units_with_waiting(side)
            .into_iter()
            .filter(|&u| {
                let Some(aa) = state.type_of(u).and_then(|t| t.aa.as_ref()) else {
                    return false;
                };
                aa.in_combat
                    && (side.is_defender() || aa.offensive)
                    && (aa.max_rounds == 0 || round <= aa.max_rounds)
                    && enemy
                        .iter()
                        .any(|&e| state.type_of(e).map(|t| aa.targets.contains(&t.domain)).unwrap_or(false))
            })
            .collect()
    }

    fn fire_aa(&mut self, side: Side, state: &GameState) {
        let mut types: Vec<String> = self
            .aa_guns(state, side)
            .into_iter()
            .filter_map(|u| state.type_of(u).and_then(|t| t.aa.as_ref()).map(|aa| aa.aa_type.clone()))
            .collect();
        types.sort();
        types.dedup();
        let groups = types
            .into_iter()
            .map(|aa_type| MustFightStep::FireAaGroup { side, aa_type })
            .collect();
        self.stack.push_all_reversed(groups);
    }

    fn fire_aa_group(&mut self, side: Side, aa_type: &str, state: &GameState) {
        let guns: Vec<UnitId> = self
            .aa_guns(state, side)
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
        let enemy = side.opposite();
        let targets = state.filter(self.core.units(enemy), |_, t| domains.contains(&t.domain));
        let label = format!(
            "{} select {} casualties",
            state.player_name(self.core.player(enemy)),
            aa_type
        );
        self.push_volley(side, guns, targets, ReturnFire::All, FireKind::AntiAir, label);
    }

    // === CASUALTIES ===

    fn remove_casualties(
        &mut self,
        killed: &[UnitId],
        return_fire: ReturnFire,
        hit_side: Side,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        if killed.is_empty() {
            return Ok(());
        }
        let now: Vec<UnitId> = match return_fire {
            ReturnFire::All => {
                self.core.waiting_to_die_mut(hit_side).extend(killed.iter().copied());
                Vec::new()
            }
            ReturnFire::Subs => {
                let subs = ctx.state.filter(killed, matches::is_sub);
                self.core.waiting_to_die_mut(hit_side).extend(subs.iter().copied());
                killed.iter().copied().filter(|u| !subs.contains(u)).collect()
            }
            ReturnFire::None => killed.to_vec(),
        };
        self.core.units_mut(hit_side).retain(|u| !killed.contains(u));
        self.remove(&now, registry, ctx)
    }

    /// Take units and everything they carry off the map. Cargo that a lost
    /// transport already put ashore goes down with it and counts here, not
    /// in the battle it landed in.
    fn remove(&mut self, units: &[UnitId], registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        let mut lost = units.to_vec();
        lost.extend(self.core.dependent_units(units));
        let site = self.core.site;
        let on_site: Vec<UnitId> = lost.iter().copied().filter(|&u| ctx.state.is_in(u, site)).collect();
        self.remove_from(site, &on_site, ctx)?;
        for (landed, cargo) in landed_cargo(ctx.state, &lost, site) {
            self.remove_from(landed, &cargo, ctx)?;
        }
        self.core.attacking_units.retain(|u| !lost.contains(u));
        self.core.defending_units.retain(|u| !lost.contains(u));
        registry.units_lost_in_preceding_battle(self.core.id, &lost, false, ctx)
    }

    fn remove_from(&mut self, territory: TerritoryId, units: &[UnitId], ctx: &mut BattleContext<'_>) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        let text = format!(
            "{} lost in {}",
            ctx.describe_units(units),
            ctx.state.territory_name(territory)
        );
        ctx.add_history(&text, units);
        ctx.add_change(Change::remove_units(territory, units))?;
        for &u in units {
            if !self.core.killed.contains(&u) {
                self.core.killed.push(u);
            }
        }
        tracing::debug!(battle = %self.core.id, %territory, count = units.len(), "units removed");
        Ok(())
    }

    fn clear_waiting_to_die(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        let attacking = std::mem::take(&mut self.core.attacking_waiting_to_die);
        self.remove(&attacking, registry, ctx)?;
        let defending = std::mem::take(&mut self.core.defending_waiting_to_die);
        self.remove(&defending, registry, ctx)
    }

    // === HOUSEKEEPING STEPS ===

    /// Drop units that take no part in the fighting from here on
    fn remove_non_combatants(&mut self, state: &GameState) {
        let water = self.site_is_water(state);
        let next_round = self.core.round + 1;
        for side in [Side::Attacker, Side::Defender] {
            let defending = side.is_defender();
            let keep = state.filter(self.core.units(side), |u, t| {
                let aa_fires_again = t
                    .aa
                    .as_ref()
                    .map(|aa| aa.in_combat && (aa.max_rounds == 0 || next_round <= aa.max_rounds))
                    .unwrap_or(false);
                !(water && t.domain == UnitDomain::Land)
                    && (!t.is_infrastructure || t.strength(defending) > 0 || aa_fires_again)
                    && !(defending && t.capturable_on_entering)
                    && !u.was_in_air_battle
            });
            *self.core.units_mut(side) = keep;
        }
    }

    /// Paratroopers leave their aircraft once the fight begins
    fn land_paratroops(&mut self, ctx: &mut BattleContext<'_>) -> Result<()> {
        let attacker = self.core.attacker;
        let transports: Vec<UnitId> = ctx
            .state
            .filter(&ctx.state.units_in(self.core.site), matches::is_air_transport)
            .into_iter()
            .filter(|&u| ctx.state.owner_of(u).map(|o| ctx.state.is_allied(o, attacker)).unwrap_or(false))
            .collect();
        let dropped = self.core.dependent_units(&transports);
        if dropped.is_empty() {
            return Ok(());
        }
        let change = Change::transported_by(ctx.state, &dropped, None);
        ctx.add_change(change)?;
        for t in &transports {
            self.core.dependents.remove(t);
        }
        Ok(())
    }

    fn mark_attackers_no_movement(&self, ctx: &mut BattleContext<'_>) -> Result<()> {
        let ground = ctx.state.filter(&self.core.attacking_units, matches::is_not_air);
        let change = Change::mark_no_movement(ctx.state, &ground);
        ctx.add_change(change)
    }

    /// Suicide units die after the volley they fired in
    fn check_suicide_units(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        let mut dead = ctx.state.filter(&self.core.attacking_units, matches::is_suicide);
        if !ctx.rules.defending_suicide_do_not_fire() {
            dead.extend(ctx.state.filter(&self.core.defending_units, matches::is_suicide));
        }
        self.remove(&dead, registry, ctx)
    }

    /// Transports left without escort against armed enemies are sunk
    fn check_undefended_transports(
        &mut self,
        side: Side,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        if side == Side::Attacker
            && (!self.attacker_retreat_territories(ctx.state, ctx.rules, registry).is_empty()
                || ctx.state.any(&self.core.attacking_units, matches::is_air))
        {
            return Ok(());
        }
        let player = self.core.player(side);
        let state = &*ctx.state;
        let here = state.units_in(self.core.site);
        let allied_to_player =
            |u: UnitId| state.owner_of(u).map(|o| state.is_allied(o, player)).unwrap_or(false);
        let transports: Vec<UnitId> = state
            .filter(&here, |u, t| matches::is_defenseless_transport(u, t) && matches::is_sea(u, t))
            .into_iter()
            .filter(|&u| allied_to_player(u))
            .collect();
        if transports.is_empty() {
            return Ok(());
        }
        let escorts: Vec<UnitId> = state
            .filter(&here, |u, t| !matches::is_land(u, t) && !u.submerged)
            .into_iter()
            .filter(|&u| allied_to_player(u))
            .collect();
        if transports.len() != escorts.len() {
            return Ok(());
        }
        let enemy_defending = side.opposite().is_defender();
        let armed_enemies: Vec<UnitId> = state
            .filter(&here, |u, t| !matches::is_land(u, t) && !u.submerged && t.strength(enemy_defending) > 0)
            .into_iter()
            .filter(|&u| state.is_enemy_unit(u, player))
            .collect();
        if armed_enemies.is_empty() {
            return Ok(());
        }
        let sea = state.filter(&armed_enemies, matches::is_sea);
        let change = Change::mark_no_movement(state, &sea);
        ctx.add_change(change)?;
        tracing::debug!(battle = %self.core.id, count = transports.len(), "undefended transports sunk");
        self.remove(&transports, registry, ctx)
    }

    /// A side with nothing that can roll loses what is left of it
    fn check_units_that_can_roll_left(
        &mut self,
        side: Side,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        if side == Side::Attacker
            && (!self.attacker_retreat_territories(ctx.state, ctx.rules, registry).is_empty()
                || ctx.state.any(&self.core.attacking_units, matches::is_air))
        {
            return Ok(());
        }
        if self.core.attacking_units.is_empty() || self.core.defending_units.is_empty() {
            return Ok(());
        }
        let land_site = !self.site_is_water(ctx.state);
        let defending = side.is_defender();
        let mine = self.core.units(side).clone();
        let theirs = self.core.units(side.opposite()).clone();
        let can_roll = ctx
            .state
            .any(&mine, |u, t| fights_here(land_site, u, t) && t.strength(defending) > 0);
        let enemy_can_roll = ctx
            .state
            .any(&theirs, |u, t| fights_here(land_site, u, t) && t.strength(!defending) > 0);
        if can_roll || !enemy_can_roll {
            return Ok(());
        }
        let helpless = ctx
            .state
            .filter(&mine, |u, t| fights_here(land_site, u, t) && !t.is_infrastructure);
        self.remove(&helpless, registry, ctx)
    }

    /// Subs facing nothing but aircraft dive out of reach
    fn submerge_subs_vs_only_air(&mut self, ctx: &mut BattleContext<'_>) -> Result<()> {
        let state = &*ctx.state;
        let attackers = &self.core.attacking_units;
        let defenders = &self.core.defending_units;
        let (side, subs) = if !attackers.is_empty()
            && state.all(attackers, matches::is_air)
            && state.any(defenders, matches::is_sub)
        {
            (Side::Defender, state.filter(defenders, matches::is_sub))
        } else if !defenders.is_empty()
            && state.all(defenders, matches::is_air)
            && state.any(attackers, matches::is_sub)
        {
            (Side::Attacker, state.filter(attackers, matches::is_sub))
        } else {
            return Ok(());
        };
        self.submerge_units(&subs, side, ctx)
    }

    // === END OF ROUND ===

    fn check_end(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        let attackers_left = ctx.state.any(&self.core.attacking_units, matches::is_not_infrastructure);
        let defenders_left = ctx.state.any(&self.core.defending_units, matches::is_not_infrastructure);
        if !attackers_left {
            if ctx.rules.transport_casualties_restricted() && self.core.round <= 1 {
                let attacker = self.core.attacker;
                let here = ctx.state.units_in(self.core.site);
                let transports = ctx
                    .state
                    .filter(&here, matches::is_defenseless_transport)
                    .into_iter()
                    .any(|u| ctx.state.owner_of(u).map(|o| ctx.state.is_allied(o, attacker)).unwrap_or(false));
                if transports {
                    // the transports fight on alone
                    self.core.attacking_units = here
                        .into_iter()
                        .filter(|&u| ctx.state.owner_of(u) == Some(attacker))
                        .collect();
                    return Ok(());
                }
            }
            self.end_battle(registry, ctx)?;
            return self.defender_wins(registry, ctx);
        }
        if !defenders_left {
            if ctx.rules.transport_casualties_restricted() {
                self.check_undefended_transports(Side::Defender, registry, ctx)?;
            }
            self.check_units_that_can_roll_left(Side::Defender, registry, ctx)?;
            self.end_battle(registry, ctx)?;
            return self.attacker_wins(registry, ctx);
        }
        let state = &*ctx.state;
        let attackers = &self.core.attacking_units;
        let defenders = &self.core.defending_units;
        let nobody_can_hit = !attackers.is_empty()
            && state.all(attackers, |_, t| t.attack == 0)
            && !defenders.is_empty()
            && state.all(defenders, |_, t| t.defense == 0);
        if ctx.rules.max_rounds_reached(self.core.round) || nobody_can_hit {
            self.end_battle(registry, ctx)?;
            return self.nobody_wins(registry, ctx);
        }
        Ok(())
    }

    fn next_round(&mut self, ctx: &mut BattleContext<'_>) -> Result<()> {
        if self.core.is_over {
            return Ok(());
        }
        if !self.stack.is_empty() {
            return Err(BattleError::invariant("Stack not empty"));
        }
        if !self.core.attacking_waiting_to_die.is_empty() || !self.core.defending_waiting_to_die.is_empty() {
            return Err(BattleError::invariant("units still waiting to die at end of round"));
        }
        self.core.round += 1;
        tracing::debug!(battle = %self.core.id, round = self.core.round, "next round");
        self.push_round(false, ctx);
        Ok(())
    }

    // === RETREATS ===

    /// Where the attacker may fall back to
    fn attacker_retreat_territories(
        &self,
        state: &GameState,
        rules: &RulesConfig,
        registry: &BattleRegistry,
    ) -> Vec<TerritoryId> {
        let site = self.core.site;
        let attackers = &self.core.attacking_units;
        if (!attackers.is_empty() && state.all(attackers, matches::is_air)) || rules.retreating_units_remain_in_place() {
            return vec![site];
        }
        let attacker = self.core.attacker;
        let mut possible: Vec<TerritoryId> = self
            .core
            .attacking_from
            .iter()
            .filter(|&(&t, from_units)| {
                if t == site {
                    return false;
                }
                let Ok(territory) = state.territory(t) else {
                    return false;
                };
                let hostile = state
                    .enemy_units_in(t, attacker)
                    .into_iter()
                    .any(|u| state.matches(u, |u, t| !t.is_infrastructure && u.transported_by.is_none() && !u.submerged));
                if hostile {
                    return false;
                }
                if rules.is_ww2v2() && state.all(from_units, matches::is_air) {
                    return false;
                }
                if is_enemy_and_not_unowned_water(state, t, attacker)
                    || (territory.is_water && registry.was_battle_fought(t))
                {
                    return false;
                }
                true
            })
            .map(|(&t, _)| t)
            .collect();
        let is_water = |t: &TerritoryId| state.territory(*t).map(|t| t.is_water).unwrap_or(false);
        if state.any(attackers, matches::is_land) && !self.site_is_water(state) {
            possible.retain(|t| !is_water(t));
        }
        if state.any(attackers, matches::is_sea) {
            possible.retain(|t| is_water(t));
        }
        possible
    }

    /// Empty sea zones next to the site that a defending sub could reach
    fn defender_sub_retreat_territories(&self, state: &GameState) -> Vec<TerritoryId> {
        let defender = self.core.defender;
        let Ok(site) = state.territory(self.core.site) else {
            return Vec::new();
        };
        site.neighbors
            .iter()
            .copied()
            .filter(|&t| {
                state.territory(t).map(|t| t.is_water).unwrap_or(false)
                    && !state.units_in(t).into_iter().any(|u| state.is_enemy_unit(u, defender))
            })
            .collect()
    }

    fn can_attacker_retreat(&self, state: &GameState, rules: &RulesConfig, registry: &BattleRegistry) -> bool {
        let defenders = &self.core.defending_units;
        if rules.transport_casualties_restricted()
            && !defenders.is_empty()
            && state.all(defenders, matches::is_defenseless_transport)
        {
            return false;
        }
        if self.core.is_amphibious {
            return false;
        }
        !self.attacker_retreat_territories(state, rules, registry).is_empty()
    }

    fn can_attacker_retreat_subs(&self, state: &GameState, rules: &RulesConfig, registry: &BattleRegistry) -> bool {
        if state.any(&self.core.units_with_waiting(Side::Defender), matches::is_destroyer) {
            return false;
        }
        self.can_attacker_retreat(state, rules, registry) || rules.submersible_subs()
    }

    fn can_defender_retreat_subs(&self, state: &GameState, rules: &RulesConfig) -> bool {
        if state.any(&self.core.units_with_waiting(Side::Attacker), matches::is_destroyer) {
            return false;
        }
        !self.defender_sub_retreat_territories(state).is_empty() || rules.submersible_subs()
    }

    fn can_attacker_retreat_planes(&self, state: &GameState, rules: &RulesConfig) -> bool {
        (rules.is_ww2v2() || rules.attacker_retreat_planes() || rules.partial_amphibious_retreat())
            && self.core.is_amphibious
            && state.any(&self.core.attacking_units, matches::is_air)
    }

    fn can_attacker_retreat_partial_amphibious(&self, state: &GameState, rules: &RulesConfig) -> bool {
        self.core.is_amphibious
            && rules.partial_amphibious_retreat()
            && state.any(&self.core.attacking_units, |u, t| matches::is_land(u, t) && !u.was_amphibious)
    }

    fn retreat_subs(&mut self, side: Side, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        if self.core.is_over {
            return Ok(());
        }
        match side {
            Side::Attacker => {
                if !self.can_attacker_retreat_subs(ctx.state, ctx.rules, registry)
                    || !ctx.state.any(&self.core.attacking_units, matches::is_sub)
                {
                    return Ok(());
                }
                let available = self.attacker_retreat_territories(ctx.state, ctx.rules, registry);
                self.query_retreat(Side::Attacker, RetreatKind::Subs, available, registry, ctx)
            }
            Side::Defender => {
                if !self.can_defender_retreat_subs(ctx.state, ctx.rules)
                    || !ctx.state.any(&self.core.defending_units, matches::is_sub)
                {
                    return Ok(());
                }
                let available = self.defender_sub_retreat_territories(ctx.state);
                self.query_retreat(Side::Defender, RetreatKind::Subs, available, registry, ctx)
            }
        }
    }

    fn query_retreat(
        &mut self,
        side: Side,
        kind: RetreatKind,
        mut available: Vec<TerritoryId>,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        let site = self.core.site;
        let submerge = kind == RetreatKind::Subs && ctx.rules.submersible_subs();
        if available.is_empty() && !submerge {
            return Ok(());
        }
        let player = self.core.player(side);
        let mut units = self.core.units(side).clone();
        if side == Side::Attacker {
            for u in ctx.state.units_in(site) {
                if ctx.state.owner_of(u) == Some(player) && !units.contains(&u) && !self.core.killed.contains(&u) {
                    units.push(u);
                }
            }
        }
        let units = match kind {
            RetreatKind::Subs => ctx.state.filter(&units, matches::is_sub),
            RetreatKind::Planes => ctx.state.filter(&units, matches::is_air),
            RetreatKind::PartialAmphibious => ctx.state.filter(&units, |u, _| !u.was_amphibious),
            RetreatKind::Default => units,
        };
        if units.is_empty() {
            return Ok(());
        }
        if ctx.state.any(&units, matches::is_sea) {
            available.retain(|&t| ctx.state.territory(t).map(|t| t.is_water).unwrap_or(false));
        }
        if submerge || kind == RetreatKind::Planes {
            available = vec![site];
        }

        let name = ctx.state.player_name(player);
        let prompt = match kind {
            RetreatKind::Subs => format!("{} retreat subs?", name),
            RetreatKind::Planes => format!("{} retreat planes?", name),
            RetreatKind::PartialAmphibious => format!("{} retreat non-amphibious units?", name),
            RetreatKind::Default => format!("{} retreat?", name),
        };
        let limit = ctx.rules.engine.illegal_answer_limit;
        let mut rejected = 0;
        let answer = loop {
            let query = RetreatQuery {
                battle: self.core.id,
                player,
                site,
                available: &available,
                submerge,
                prompt: &prompt,
            };
            match ctx.query_retreat(&query)? {
                Some(to) if !available.contains(&to) => {
                    rejected += 1;
                    tracing::warn!(battle = %self.core.id, %to, rejected, "illegal retreat destination");
                    if rejected > limit {
                        break None;
                    }
                }
                other => break other,
            }
        };
        let Some(to) = answer else {
            return Ok(());
        };

        if side == Side::Attacker && kind == RetreatKind::Default {
            self.core.is_over = true;
        }
        match kind {
            RetreatKind::Subs if submerge && to == site => self.submerge_units(&units, side, ctx),
            RetreatKind::Planes => self.retreat_planes(&units, side, registry, ctx),
            RetreatKind::PartialAmphibious => self.retreat_units_and_planes(units, to, side, registry, ctx),
            _ => self.retreat_units(units, to, side, registry, ctx),
        }
    }

    fn submerge_units(&mut self, units: &[UnitId], side: Side, ctx: &mut BattleContext<'_>) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        let change = Change::flag(ctx.state, units, UnitFlag::Submerged, true);
        ctx.add_change(change)?;
        self.core.units_mut(side).retain(|u| !units.contains(u));
        self.retreated_mut(side).extend(units.iter().copied());
        let player = self.core.player(side);
        if !self.core.units(side).is_empty() && !self.core.is_over {
            let message = format!("{} submerges subs", ctx.state.player_name(player));
            ctx.notify(BattleNotice::Retreat {
                battle: self.core.id,
                player,
                units: units.to_vec(),
                to: self.core.site,
                message,
            });
        }
        let text = format!("{} Submerged", ctx.describe_units(units));
        ctx.add_history(&text, units);
        Ok(())
    }

    /// Planes in an amphibious assault pull back into the site and sit out
    fn retreat_planes(
        &mut self,
        planes: &[UnitId],
        side: Side,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        let text = format!("{} retreated", ctx.describe_units(planes));
        ctx.add_history(&text, planes);
        self.core.units_mut(side).retain(|u| !planes.contains(u));
        if self.core.units(side).is_empty() || self.core.is_over {
            self.end_battle(registry, ctx)?;
            return self.side_wins(side.opposite(), registry, ctx);
        }
        let player = self.core.player(side);
        let message = format!("{} retreats planes", ctx.state.player_name(player));
        ctx.notify(BattleNotice::Retreat {
            battle: self.core.id,
            player,
            units: planes.to_vec(),
            to: self.core.site,
            message,
        });
        Ok(())
    }

    /// Non-amphibious units leave, taking their planes out of the fight too
    fn retreat_units_and_planes(
        &mut self,
        retreating: Vec<UnitId>,
        to: TerritoryId,
        side: Side,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        let air = ctx.state.filter(self.core.units(side), matches::is_air);
        self.core.units_mut(side).retain(|u| !air.contains(u));
        let mut retreating = retreating;
        for u in self.core.dependent_units(&retreating) {
            if !retreating.contains(&u) {
                retreating.push(u);
            }
        }
        let attacker = self.core.attacker;
        let moving = ctx
            .state
            .filter(&retreating, |u, t| !matches::is_air(u, t) || u.owner != attacker);
        self.move_retreating(&moving, to, ctx)?;
        if self.core.is_over {
            self.retreat_from_dependents(&moving, to, registry, ctx)?;
        }
        self.core.units_mut(side).retain(|u| !retreating.contains(u));
        self.retreated_mut(side).extend(retreating.iter().copied());
        self.finish_retreat(side, retreating, to, registry, ctx)
    }

    fn retreat_units(
        &mut self,
        retreating: Vec<UnitId>,
        to: TerritoryId,
        side: Side,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        let mut retreating = retreating;
        for u in self.core.dependent_units(&retreating) {
            if !retreating.contains(&u) {
                retreating.push(u);
            }
        }
        let attacker = self.core.attacker;
        let moving = ctx
            .state
            .filter(&retreating, |u, t| !matches::is_air(u, t) || u.owner != attacker);
        self.move_retreating(&moving, to, ctx)?;
        if self.core.is_over {
            self.retreat_from_dependents(&moving, to, registry, ctx)?;
        }
        self.core.units_mut(side).retain(|u| !retreating.contains(u));
        self.retreated_mut(side).extend(retreating.iter().copied());
        self.finish_retreat(side, retreating, to, registry, ctx)
    }

    fn move_retreating(&self, units: &[UnitId], to: TerritoryId, ctx: &mut BattleContext<'_>) -> Result<()> {
        let site = self.core.site;
        let here: Vec<UnitId> = units.iter().copied().filter(|&u| ctx.state.is_in(u, site)).collect();
        if here.is_empty() {
            return Ok(());
        }
        let text = format!(
            "{} retreated to {}",
            ctx.describe_units(&here),
            ctx.state.territory_name(to)
        );
        ctx.add_history(&text, &here);
        ctx.add_change(Change::move_units(site, to, &here))
    }

    fn finish_retreat(
        &mut self,
        side: Side,
        retreating: Vec<UnitId>,
        to: TerritoryId,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        if self.core.units(side).is_empty() || self.core.is_over {
            self.end_battle(registry, ctx)?;
            return self.side_wins(side.opposite(), registry, ctx);
        }
        let player = self.core.player(side);
        let message = format!("{} retreats", ctx.state.player_name(player));
        ctx.notify(BattleNotice::Retreat {
            battle: self.core.id,
            player,
            units: retreating,
            to,
            message,
        });
        Ok(())
    }

    /// Cargo already unloaded into battles that waited on this one follows
    /// its transports out, and those battles lose it
    fn retreat_from_dependents(
        &mut self,
        transports: &[UnitId],
        to: TerritoryId,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        let mut withdrawn = transports.to_vec();
        for blocked in registry.get_blocked(self.core.id) {
            let Ok(battle) = registry.battle(blocked) else {
                continue;
            };
            let there = battle.site();
            let cargo: Vec<UnitId> = ctx
                .state
                .units_in(there)
                .into_iter()
                .filter(|&u| {
                    ctx.state
                        .unit(u)
                        .map(|unit| unit.transported_by.map(|t| transports.contains(&t)).unwrap_or(false))
                        .unwrap_or(false)
                })
                .collect();
            if cargo.is_empty() {
                continue;
            }
            let text = format!(
                "{} withdrawn from {} with their transports",
                ctx.describe_units(&cargo),
                ctx.state.territory_name(there)
            );
            ctx.add_history(&text, &cargo);
            ctx.add_change(Change::move_units(there, to, &cargo))?;
            withdrawn.extend(cargo);
        }
        registry.units_lost_in_preceding_battle(self.core.id, &withdrawn, true, ctx)
    }

    // === ENDINGS ===

    fn end_battle(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        self.clear_waiting_to_die(registry, ctx)?;
        self.core.is_over = true;
        Ok(())
    }

    fn side_wins(&mut self, winner: Side, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        match winner {
            Side::Attacker => self.attacker_wins(registry, ctx),
            Side::Defender => self.defender_wins(registry, ctx),
        }
    }

    fn record_outcome(&mut self, registry: &mut BattleRegistry) {
        let outcome = self.core.outcome();
        registry.records_mut().add_result(self.core.id, outcome);
    }

    fn show_casualties(&mut self, ctx: &mut BattleContext<'_>) {
        if self.core.killed.is_empty() {
            return;
        }
        self.core.tally_losses(ctx.state);
        let score = self.core.defender_lost_tuv as i64 - self.core.attacker_lost_tuv as i64;
        let text = format!(
            "Battle casualty summary: Battle score (TUV change) for attacker is {}",
            score
        );
        ctx.add_history(&text, &self.core.killed);
    }

    fn attacker_wins(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        self.core.who_won = WhoWon::Attacker;
        let attacker = self.core.attacker;
        let site = self.core.site;
        let message = format!("{} win", ctx.state.player_name(attacker));
        ctx.notify(BattleNotice::BattleEnd {
            battle: self.core.id,
            message: message.clone(),
        });
        let arriving = self.core.attacking_units.clone();
        if ctx.state.any(&arriving, matches::is_not_air) {
            if is_enemy_and_not_unowned_water(ctx.state, site, attacker) {
                registry.add_to_conquered(site);
            }
            registry.take_over(site, attacker, &arriving, ctx)?;
            self.core.result = Some(BattleResultDescription::Conquered);
        } else {
            self.core.result = Some(BattleResultDescription::WonWithoutConquering);
        }

        // cargo unloaded in combat is no longer aboard
        let transports = ctx.state.filter(&arriving, matches::is_transport);
        let unloaded: Vec<UnitId> = self
            .core
            .dependent_units(&transports)
            .into_iter()
            .filter(|&u| ctx.state.unit(u).map(|unit| unit.unloaded_to.is_some()).unwrap_or(false))
            .collect();
        if !unloaded.is_empty() {
            let change = Change::transported_by(ctx.state, &unloaded, None);
            ctx.add_change(change)?;
        }

        ctx.add_history(&message, &arriving);
        self.show_casualties(ctx);
        self.record_outcome(registry);
        tracing::info!(battle = %self.core.id, rounds = self.core.round, "attacker won");
        Ok(())
    }

    fn defender_wins(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        self.core.who_won = WhoWon::Defender;
        let defender = self.core.defender;
        let site = self.core.site;
        let message = format!("{} win", ctx.state.player_name(defender));
        ctx.notify(BattleNotice::BattleEnd {
            battle: self.core.id,
            message: message.clone(),
        });
        if ctx.rules.abandoned_territories_taken_over() {
            if !ctx.state.any(&self.core.defending_units, matches::is_not_infrastructure) {
                let present = ctx
                    .state
                    .filter(&ctx.state.units_in(site), matches::is_not_infrastructure);
                if let Some(heir) = player_with_most_units(ctx.state, &present) {
                    let text = format!(
                        "{} takes over {} as there are no defenders left",
                        ctx.state.player_name(heir),
                        ctx.state.territory_name(site)
                    );
                    ctx.add_history(&text, &present);
                    registry.take_over(site, heir, &present, ctx)?;
                }
            } else {
                let holding = self.core.defending_units.clone();
                registry.take_over(site, defender, &holding, ctx)?;
            }
        }
        let defending = self.core.defending_units.clone();
        ctx.add_history(&message, &defending);
        self.core.result = Some(BattleResultDescription::Lost);
        self.show_casualties(ctx);
        self.record_outcome(registry);
        self.check_defending_planes_can_land(registry, ctx.state);
        tracing::info!(battle = %self.core.id, rounds = self.core.round, "defender held");
        Ok(())
    }

    fn nobody_wins(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        self.core.who_won = WhoWon::Draw;
        ctx.notify(BattleNotice::BattleEnd {
            battle: self.core.id,
            message: "Stalemate".to_string(),
        });
        let text = format!(
            "{} and {} reach a stalemate",
            ctx.state.player_name(self.core.defender),
            ctx.state.player_name(self.core.attacker)
        );
        ctx.add_history(&text, &[]);
        self.core.result = Some(BattleResultDescription::Stalemate);
        self.show_casualties(ctx);
        self.record_outcome(registry);
        self.check_defending_planes_can_land(registry, ctx.state);
        tracing::info!(battle = %self.core.id, rounds = self.core.round, "stalemate");
        Ok(())
    }

    /// Defending aircraft at sea that no surviving carrier can take
    fn check_defending_planes_can_land(&self, registry: &mut BattleRegistry, state: &GameState) {
        if !self.site_is_water(state) {
            return;
        }
        let defenders = &self.core.defending_units;
        let planes = state.filter(defenders, |u, t| matches::is_air(u, t) && !u.was_scrambled);
        if planes.is_empty() {
            return;
        }
        let capacity: u32 = defenders
            .iter()
            .filter_map(|&u| state.type_of(u))
            .map(|t| t.carrier_capacity)
            .sum();
        let cost: u32 = planes.iter().filter_map(|&u| state.type_of(u)).map(|t| t.carrier_cost).sum();
        if capacity >= cost {
            return;
        }
        let mut used = 0;
        let mut stranded = Vec::new();
        for &p in &planes {
            let carrier_cost = state.type_of(p).map(|t| t.carrier_cost).unwrap_or(0);
            if carrier_cost > 0 && used + carrier_cost <= capacity {
                used += carrier_cost;
            } else {
                stranded.push(p);
            }
        }
        if !stranded.is_empty() {
            tracing::debug!(battle = %self.core.id, count = stranded.len(), "defending planes cannot land");
            registry.add_defending_air_that_cannot_land(self.core.site, &stranded);
        }
    }
}

/// Lost units ashore away from `site` whose transport is lost too, grouped
/// by where they landed
fn landed_cargo(state: &GameState, lost: &[UnitId], site: TerritoryId) -> BTreeMap<TerritoryId, Vec<UnitId>> {
    let mut landed: BTreeMap<TerritoryId, Vec<UnitId>> = BTreeMap::new();
    for &u in lost {
        let Ok(unit) = state.unit(u) else { continue };
        let transport_lost = unit.transported_by.map(|t| lost.contains(&t)).unwrap_or(false);
        if let Some(at) = unit.location.filter(|&at| at != site) {
            if transport_lost {
                landed.entry(at).or_default().push(u);
            }
        }
    }
    landed
}

/// Units that take part in fire exchanged at this kind of site
fn fights_here(land_site: bool, u: &Unit, t: &UnitType) -> bool {
    !u.submerged
        && if land_site {
            !matches::is_sea(u, t)
        } else {
            !matches::is_land(u, t)
        }
}

impl BattleOps for MustFightBattle {
    fn core(&self) -> &BattleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BattleCore {
        &mut self.core
    }

    fn add_attack(&mut self, state: &GameState, route: &Route, units: &[UnitId]) -> Result<CompositeChange> {
        self.core.record_attack(state, route, units);
        let water = self.site_is_water(state);
        // cargo at sea keeps its movement for the unload
        let halted = state.filter(units, |u, t| {
            !matches::is_air(u, t) && !(water && matches::is_land(u, t))
        });
        let mut change = CompositeChange::new();
        change.add(Change::mark_no_movement(state, &halted));
        Ok(change)
    }

    fn fight(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()> {
        self.core.prune_missing(ctx.state);
        if self.stack.is_executing() {
            tracing::info!(battle = %self.core.id, round = self.core.round, "resuming battle");
            return drive(self, registry, ctx);
        }

        let site = self.core.site;
        ctx.start_event(&format!("Battle in {}", ctx.state.territory_name(site)));
        tracing::info!(
            battle = %self.core.id,
            site = %site,
            attackers = self.core.attacking_units.len(),
            defenders = self.core.defending_units.len(),
            "battle started"
        );
        if !ctx.state.any(&self.core.attacking_units, matches::is_not_infrastructure) {
            self.end_battle(registry, ctx)?;
            return self.defender_wins(registry, ctx);
        }
        if !ctx.state.any(&self.core.defending_units, matches::is_not_infrastructure) {
            self.end_battle(registry, ctx)?;
            return self.attacker_wins(registry, ctx);
        }
        let defending = self.core.defending_units.clone();
        self.core.add_dependents(ctx.state, &defending);
        let attacking = self.core.attacking_units.clone();
        self.core.add_dependents(ctx.state, &attacking);

        self.push_round(true, ctx);
        drive(self, registry, ctx)
    }

    fn units_lost_in_preceding_battle(
        &mut self,
        units: &[UnitId],
        withdrawn: bool,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        let mut lost = self.core.dependent_units(units);
        lost.extend(units.iter().copied().filter(|u| self.core.attacking_units.contains(u)));
        if lost.is_empty() {
            return Ok(());
        }
        self.core.amphibious_land_attackers.retain(|u| !lost.contains(u));
        if self.core.amphibious_land_attackers.is_empty() {
            self.core.is_amphibious = false;
            self.core.bombarding_units.clear();
        }
        self.core.attacking_units.retain(|u| !lost.contains(u));
        let site = self.core.site;
        let on_site: Vec<UnitId> = lost.iter().copied().filter(|&u| ctx.state.is_in(u, site)).collect();
        if !withdrawn {
            self.remove(&on_site, registry, ctx)?;
        }
        if self.core.attacking_units.is_empty() {
            if !withdrawn {
                self.core.attacker_lost_tuv += ctx.state.tuv_for(&on_site, self.core.attacker);
            }
            self.core.who_won = WhoWon::Defender;
            self.core.result = Some(BattleResultDescription::Lost);
            self.record_outcome(registry);
            self.core.is_over = true;
            tracing::info!(battle = %self.core.id, "attack collapsed before it was fought");
        }
        Ok(())
    }
}

impl SteppedBattle for MustFightBattle {
    type Step = MustFightStep;

    fn stack_mut(&mut self) -> &mut ExecutionStack<MustFightStep> {
        &mut self.stack
    }

    fn is_over(&self) -> bool {
        self.core.is_over
    }

    fn execute(
        &mut self,
        step: MustFightStep,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        match step {
            MustFightStep::FireAa { side } => {
                self.fire_aa(side, ctx.state);
                Ok(())
            }
            MustFightStep::FireAaGroup { side, aa_type } => {
                self.fire_aa_group(side, &aa_type, ctx.state);
                Ok(())
            }
            MustFightStep::ClearWaitingToDie => self.clear_waiting_to_die(registry, ctx),
            MustFightStep::RemoveNonCombatants => {
                self.remove_non_combatants(ctx.state);
                Ok(())
            }
            MustFightStep::Bombard => self.fire_naval_bombardment(ctx),
            MustFightStep::SuicideAttack { side } => {
                self.fire_suicide_units(side, ctx.state, ctx.rules);
                Ok(())
            }
            MustFightStep::LandParatroops => self.land_paratroops(ctx),
            MustFightStep::MarkNoMovement => self.mark_attackers_no_movement(ctx),
            MustFightStep::SubRetreatBeforeBattle { side } => self.retreat_subs(side, registry, ctx),
            MustFightStep::CheckSuicideUnits => self.check_suicide_units(registry, ctx),
            MustFightStep::CheckUndefendedTransports => {
                self.check_undefended_transports(Side::Defender, registry, ctx)?;
                self.check_undefended_transports(Side::Attacker, registry, ctx)?;
                self.check_units_that_can_roll_left(Side::Attacker, registry, ctx)?;
                self.check_units_that_can_roll_left(Side::Defender, registry, ctx)
            }
            MustFightStep::SubmergeSubsVsOnlyAir => self.submerge_subs_vs_only_air(ctx),
            MustFightStep::FireSubs { side, return_fire } => {
                self.fire_subs(side, return_fire, ctx.state);
                Ok(())
            }
            MustFightStep::FireAirOnNonSubs { side } => {
                self.fire_air_on_non_subs(side, ctx.state);
                Ok(())
            }
            MustFightStep::FireNonSubs { side } => {
                self.fire_non_subs(side, ctx.state, ctx.rules);
                Ok(())
            }
            MustFightStep::Fire(FireStep::RemoveCasualties { spec, details, .. }) => {
                fire::mark_damaged(&details.damaged, ctx)?;
                self.remove_casualties(&details.killed, spec.return_fire, spec.firing_side.opposite(), registry, ctx)
            }
            MustFightStep::Fire(step) => {
                let next = fire::advance(step, self.core.id, ctx)?;
                self.stack.push(MustFightStep::Fire(next));
                Ok(())
            }
            MustFightStep::CheckEnd => self.check_end(registry, ctx),
            MustFightStep::RetreatSubs { side } => {
                if ctx.rules.sub_retreat_before_battle() {
                    return Ok(());
                }
                self.retreat_subs(side, registry, ctx)?;
                if side == Side::Defender && !self.core.is_over && self.core.defending_units.is_empty() {
                    self.end_battle(registry, ctx)?;
                    return self.attacker_wins(registry, ctx);
                }
                Ok(())
            }
            MustFightStep::RetreatPlanes => {
                if self.can_attacker_retreat_planes(ctx.state, ctx.rules)
                    && !self.can_attacker_retreat_partial_amphibious(ctx.state, ctx.rules)
                {
                    let site = self.core.site;
                    self.query_retreat(Side::Attacker, RetreatKind::Planes, vec![site], registry, ctx)?;
                }
                Ok(())
            }
            MustFightStep::RetreatPartialAmphibious => {
                if self.can_attacker_retreat_partial_amphibious(ctx.state, ctx.rules) {
                    let available = self.attacker_retreat_territories(ctx.state, ctx.rules, registry);
                    self.query_retreat(Side::Attacker, RetreatKind::PartialAmphibious, available, registry, ctx)?;
                }
                Ok(())
            }
            MustFightStep::AttackerRetreat => {
                if self.can_attacker_retreat(ctx.state, ctx.rules, registry) {
                    let available = self.attacker_retreat_territories(ctx.state, ctx.rules, registry);
                    self.query_retreat(Side::Attacker, RetreatKind::Default, available, registry, ctx)?;
                }
                Ok(())
            }
            MustFightStep::NextRound => self.next_round(ctx),
        }
    }
}
