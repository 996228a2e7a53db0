//! Pending battles of the turn and the order they must be fought in
//!
//! The registry owns every battle. A battle that is being fought is taken
//! out of the map for the duration of the call and handed `&mut self`, so
//! cascades into other battles go through the registry rather than through
//! shared references.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::battle::air_battle::{territory_could_have_interceptors, AirBattle};
use crate::battle::bombing_raid::BombingRaidBattle;
use crate::battle::common::{is_enemy_and_not_unowned_water, BattleKind, WhoWon, BattleResultDescription};
use crate::battle::must_fight::MustFightBattle;
use crate::battle::placeholder::{FinishedBattle, NonFightingBattle};
use crate::battle::records::BattleRecords;
use crate::battle::relationships::RelationshipLog;
use crate::battle::Battle;
use crate::bridge::BattleContext;
use crate::core::error::{BattleError, Result};
use crate::core::types::{BattleId, PlayerId, TerritoryId, UnitId};
use crate::model::{matches, Change, CompositeChange, GameState, Relationship, Route, UnitFlag};

/// What an attacking group intends to do at the end of its route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    Ground,
    Bombing,
    AirDuel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BattleRegistry {
    battles: BTreeMap<BattleId, Battle>,
    /// blocked -> battles that must finish first
    dependencies: BTreeMap<BattleId, BTreeSet<BattleId>>,
    conquered: BTreeSet<TerritoryId>,
    blitzed: BTreeSet<TerritoryId>,
    fought: BTreeSet<TerritoryId>,
    bombardment_sources: BTreeSet<TerritoryId>,
    bombing_damage: BTreeMap<TerritoryId, u32>,
    defending_air_that_cannot_land: BTreeMap<TerritoryId, Vec<UnitId>>,
    relationship_log: RelationshipLog,
    records: BattleRecords,
    next_sequence: u64,
}

impl BattleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // === BATTLES ===

    pub fn battle(&self, id: BattleId) -> Result<&Battle> {
        self.battles.get(&id).ok_or(BattleError::UnknownBattle(id))
    }

    pub fn battle_mut(&mut self, id: BattleId) -> Result<&mut Battle> {
        self.battles.get_mut(&id).ok_or(BattleError::UnknownBattle(id))
    }

    pub fn battles(&self) -> impl Iterator<Item = &Battle> {
        self.battles.values()
    }

    pub fn battle_ids(&self) -> Vec<BattleId> {
        self.battles.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.battles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.battles.is_empty()
    }

    /// Unfinished battle of `kind` at `site`
    pub fn pending(&self, site: TerritoryId, kind: BattleKind) -> Option<BattleId> {
        self.battles
            .values()
            .find(|b| b.site() == site && b.kind() == kind && !b.is_over())
            .map(|b| b.id())
    }

    /// Unfinished air raid or bombing raid at `site`
    pub fn pending_bombing(&self, site: TerritoryId) -> Option<BattleId> {
        self.pending(site, BattleKind::AirRaid)
            .or_else(|| self.pending(site, BattleKind::BombingRaid))
    }

    pub fn pending_at(&self, site: TerritoryId) -> Vec<BattleId> {
        self.battles
            .values()
            .filter(|b| b.site() == site)
            .map(|b| b.id())
            .collect()
    }

    fn next_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    fn insert(&mut self, battle: Battle) -> BattleId {
        let id = battle.id();
        let core = battle.core();
        tracing::info!(
            battle = %id,
            kind = ?core.kind,
            site = %core.site,
            attacker = %core.attacker,
            defender = %core.defender,
            "battle created"
        );
        self.records
            .add_battle(id, core.site, core.attacker, core.defender, core.kind);
        self.battles.insert(id, battle);
        id
    }

    // === DEPENDENCY GRAPH ===

    pub fn add_dependency(&mut self, blocked: BattleId, blocking: BattleId) {
        if blocked == blocking {
            return;
        }
        tracing::debug!(%blocked, %blocking, "battle dependency added");
        self.dependencies.entry(blocked).or_default().insert(blocking);
    }

    pub fn remove_dependency(&mut self, blocked: BattleId, blocking: BattleId) {
        if let Some(set) = self.dependencies.get_mut(&blocked) {
            set.remove(&blocking);
            if set.is_empty() {
                self.dependencies.remove(&blocked);
            }
        }
    }

    /// Battles that must still be fought before `battle`. Empty blocking
    /// battles are ignored; a blocking battle currently being fought counts.
    pub fn get_dependent_on(&self, battle: BattleId) -> Vec<BattleId> {
        self.dependencies
            .get(&battle)
            .map(|set| {
                set.iter()
                    .copied()
                    .filter(|b| self.battles.get(b).map(|b| !b.is_empty()).unwrap_or(true))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Battles waiting on `battle`
    pub fn get_blocked(&self, battle: BattleId) -> Vec<BattleId> {
        self.dependencies
            .iter()
            .filter(|(_, set)| set.contains(&battle))
            .map(|(&blocked, _)| blocked)
            .collect()
    }

    /// Detach a finished or cancelled battle from the registry and the graph
    pub fn remove_battle(&mut self, battle: BattleId) {
        let site = self
            .battles
            .remove(&battle)
            .map(|b| b.site());
        self.dependencies.remove(&battle);
        for set in self.dependencies.values_mut() {
            set.remove(&battle);
        }
        self.dependencies.retain(|_, set| !set.is_empty());
        if let Some(site) = site {
            self.fought.insert(site);
        }
        tracing::debug!(%battle, "battle removed");
    }

    /// Site of a battle being fought is reported by the battle itself
    pub(crate) fn mark_fought(&mut self, site: TerritoryId) {
        self.fought.insert(site);
    }

    fn remove_battle_for_undo(&mut self, battle: BattleId) {
        self.records.remove_battle(battle);
        self.battles.remove(&battle);
        self.dependencies.remove(&battle);
        for set in self.dependencies.values_mut() {
            set.remove(&battle);
        }
        self.dependencies.retain(|_, set| !set.is_empty());
    }

    // === FIGHTING ===

    /// Fight one battle, or resume it where it stopped
    pub fn fight_battle(&mut self, id: BattleId, ctx: &mut BattleContext<'_>) -> Result<()> {
        let blocking = self.get_dependent_on(id);
        if !blocking.is_empty() {
            return Err(BattleError::BattleBlocked {
                battle: id,
                blocking,
            });
        }
        let mut battle = self.battles.remove(&id).ok_or(BattleError::UnknownBattle(id))?;
        let result = battle.as_ops_mut().fight(self, ctx);
        if battle.is_over() {
            self.remove_battle(id);
            self.mark_fought(battle.site());
        } else {
            self.battles.insert(id, battle);
        }
        result
    }

    /// Close an air battle that no interceptor came up to meet. Surviving
    /// bombers still go on to their raid.
    pub(crate) fn finish_air_battle_headless(&mut self, id: BattleId, ctx: &mut BattleContext<'_>) -> Result<()> {
        let mut battle = self.battles.remove(&id).ok_or(BattleError::UnknownBattle(id))?;
        let result = match &mut battle {
            Battle::AirDuel(air) => air.finish_headless(self, ctx),
            _ => Err(BattleError::invariant(format!("battle {} is not an air battle", id))),
        };
        if battle.is_over() {
            self.remove_battle(id);
        } else {
            self.battles.insert(id, battle);
        }
        result
    }

    /// Tell every battle waiting on `from` that `units` are gone
    pub fn units_lost_in_preceding_battle(
        &mut self,
        from: BattleId,
        units: &[UnitId],
        withdrawn: bool,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        for blocked in self.get_blocked(from) {
            let Some(mut battle) = self.battles.remove(&blocked) else {
                continue;
            };
            let result = battle
                .as_ops_mut()
                .units_lost_in_preceding_battle(units, withdrawn, self, ctx);
            if battle.is_over() {
                self.remove_battle(blocked);
            } else {
                self.battles.insert(blocked, battle);
            }
            result?;
        }
        Ok(())
    }

    // === ADDING ATTACKS ===

    /// Commit `units` moving along `route` as an attack by `player`.
    ///
    /// Every change made to the game state is applied and also returned so
    /// the move can be undone later with [`undo_attack`](Self::undo_attack).
    pub fn add_attack(
        &mut self,
        route: &Route,
        units: &[UnitId],
        player: PlayerId,
        kind: AttackKind,
        ctx: &mut BattleContext<'_>,
    ) -> Result<CompositeChange> {
        let site = route.end();
        let mut applied = CompositeChange::new();
        match kind {
            AttackKind::Bombing => {
                if ctx.rules.raids_may_be_preceded_by_air_battles()
                    && territory_could_have_interceptors(ctx.state, ctx.rules, site, player, true)
                {
                    self.add_air_battle(route, units, player, true, ctx.state, ctx.rules)?;
                } else {
                    self.add_bombing_battle(route, units, player, ctx.state)?;
                }
                let change = Change::flag(ctx.state, units, UnitFlag::WasInCombat, true);
                record_change(&mut applied, ctx, change)?;
            }
            AttackKind::AirDuel => {
                self.add_air_battle(route, units, player, false, ctx.state, ctx.rules)?;
            }
            AttackKind::Ground => {
                if route.is_unload(ctx.state) {
                    let landing = ctx.state.filter(units, matches::is_land);
                    let change = Change::flag(ctx.state, &landing, UnitFlag::WasAmphibious, true);
                    record_change(&mut applied, ctx, change)?;
                    let cargo = ctx.state.filter(&landing, |u, _| u.transported_by.is_some());
                    let change = Change::unloaded_to(ctx.state, &cargo, Some(site));
                    record_change(&mut applied, ctx, change)?;
                }
                if ctx.rules.battles_may_be_preceded_by_air_battles()
                    && territory_could_have_interceptors(ctx.state, ctx.rules, site, player, false)
                {
                    let escorts = ctx.state.filter(units, matches::can_air_battle);
                    self.add_air_battle(route, &escorts, player, false, ctx.state, ctx.rules)?;
                }
                let change = self.add_must_fight_battle(route, units, player, ctx.state)?;
                ctx.add_changes(&change)?;
                applied.extend(change);
                if ctx.state.any(units, |u, t| matches::is_land(u, t) || matches::is_sea(u, t)) {
                    let change = self.add_empty_battle(route, units, player, ctx)?;
                    applied.extend(change);
                }
            }
        }
        Ok(applied)
    }

    pub(crate) fn add_bombing_battle(
        &mut self,
        route: &Route,
        units: &[UnitId],
        player: PlayerId,
        state: &GameState,
    ) -> Result<BattleId> {
        let site = route.end();
        let id = match self.pending(site, BattleKind::BombingRaid) {
            Some(id) => id,
            None => {
                let seq = self.next_sequence();
                self.insert(Battle::BombingRaid(BombingRaidBattle::new(site, player, seq, state)))
            }
        };
        let change = self.battle_mut(id)?.as_ops_mut().add_attack(state, route, units)?;
        if !change.is_empty() {
            return Err(BattleError::invariant("Non empty change"));
        }
        if let Some(normal) = self.pending(site, BattleKind::Normal) {
            self.add_dependency(normal, id);
        }
        if let Some(air) = self.pending(site, BattleKind::AirBattle) {
            self.add_dependency(air, id);
        }
        Ok(id)
    }

    fn add_air_battle(
        &mut self,
        route: &Route,
        units: &[UnitId],
        player: PlayerId,
        bombing_run: bool,
        state: &GameState,
        rules: &crate::core::config::RulesConfig,
    ) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        let site = route.end();
        let kind = if bombing_run {
            BattleKind::AirRaid
        } else {
            BattleKind::AirBattle
        };
        let id = match self.pending(site, kind) {
            Some(id) => id,
            None => {
                let seq = self.next_sequence();
                self.insert(Battle::AirDuel(AirBattle::new(site, player, bombing_run, seq, state, rules)))
            }
        };
        let change = self.battle_mut(id)?.as_ops_mut().add_attack(state, route, units)?;
        if !change.is_empty() {
            return Err(BattleError::invariant("Non empty change"));
        }
        if bombing_run {
            if let Some(escort) = self.pending(site, BattleKind::AirBattle) {
                self.add_dependency(escort, id);
            }
        } else {
            if let Some(raid) = self.pending(site, BattleKind::AirRaid) {
                self.add_dependency(id, raid);
            }
            if let Some(raid) = self.pending(site, BattleKind::BombingRaid) {
                self.add_dependency(id, raid);
            }
        }
        if let Some(normal) = self.pending(site, BattleKind::Normal) {
            self.add_dependency(normal, id);
        }
        Ok(())
    }

    fn add_must_fight_battle(
        &mut self,
        route: &Route,
        units: &[UnitId],
        player: PlayerId,
        state: &GameState,
    ) -> Result<CompositeChange> {
        let site = route.end();
        let enemies = state.enemy_units_in(site, player);
        if enemies.is_empty() || state.all(&enemies, matches::is_infrastructure) {
            return Ok(CompositeChange::new());
        }
        let id = match self.pending(site, BattleKind::Normal) {
            Some(id) => id,
            None => {
                let seq = self.next_sequence();
                self.insert(Battle::Normal(MustFightBattle::new(site, player, seq, state)))
            }
        };
        let change = self.battle_mut(id)?.as_ops_mut().add_attack(state, route, units)?;

        // an unload waits for the naval battle it sails out of
        if let Some(precede) = self.dependent_amphibious_assault(route, state) {
            if state.any(units, matches::is_land) {
                self.add_dependency(id, precede);
            }
        }
        if let Some(bombing) = self.pending_bombing(site) {
            self.add_dependency(id, bombing);
        }
        if let Some(air) = self.pending(site, BattleKind::AirBattle) {
            self.add_dependency(id, air);
        }
        Ok(change)
    }

    fn dependent_amphibious_assault(&self, route: &Route, state: &GameState) -> Option<BattleId> {
        if !route.is_unload(state) {
            return None;
        }
        self.pending(route.start, BattleKind::Normal)
    }

    /// Conquer uncontested territories along the route
    fn add_empty_battle(
        &mut self,
        route: &Route,
        units: &[UnitId],
        player: PlayerId,
        ctx: &mut BattleContext<'_>,
    ) -> Result<CompositeChange> {
        let mut applied = CompositeChange::new();
        let can_conquer: Vec<UnitId> = units
            .iter()
            .copied()
            .filter(|&u| {
                ctx.state
                    .unit(u)
                    .map(|unit| unit.transported_by.map(|t| !units.contains(&t)).unwrap_or(true))
                    .unwrap_or(false)
            })
            .collect();
        if !ctx.state.any(&can_conquer, matches::is_not_air) {
            return Ok(applied);
        }

        let end = route.end();
        let mut conquered: Vec<TerritoryId> = route
            .steps
            .iter()
            .copied()
            .filter(|&t| is_conquerable(ctx.state, t, player))
            .collect();
        if route.start != end && is_conquerable(ctx.state, route.start, player) {
            conquered.push(route.start);
        }
        conquered.retain(|&t| t != end);
        conquered.dedup();

        for &t in &conquered {
            if ctx.state.is_enemy_territory(t, player) {
                if is_blitzable(ctx.state, t, player) {
                    self.blitzed.insert(t);
                }
                self.conquered.insert(t);
            }
        }

        for t in conquered {
            let change = self.finished_battle_at(t, route, units, player, ctx.state)?;
            applied.extend(change);
            let change = self.take_over(t, player, units, ctx)?;
            applied.extend(change);
        }

        if !is_conquerable(ctx.state, end, player) {
            return Ok(applied);
        }
        let precede = self
            .dependent_amphibious_assault(route, ctx.state)
            .or_else(|| self.pending_bombing(end));
        let scramble_unload =
            ctx.rules.scramble_rules_in_effect() && route.is_unload(ctx.state) && route.has_exactly_one_step();

        if precede.is_some() || scramble_unload {
            let id = match self.pending(end, BattleKind::Normal) {
                Some(id) => id,
                None => {
                    let seq = self.next_sequence();
                    self.insert(Battle::NonFighting(NonFightingBattle::new(end, player, seq, ctx.state)))
                }
            };
            let change = self.battle_mut(id)?.as_ops_mut().add_attack(ctx.state, route, units)?;
            if !change.is_empty() {
                return Err(BattleError::invariant("Non empty change"));
            }
            if let Some(precede) = precede {
                self.add_dependency(id, precede);
            }
        } else {
            if ctx.state.is_enemy_territory(end, player) {
                if is_blitzable(ctx.state, end, player) {
                    self.blitzed.insert(end);
                }
                self.conquered.insert(end);
            }
            let change = self.finished_battle_at(end, route, units, player, ctx.state)?;
            applied.extend(change);
            let change = self.take_over(end, player, units, ctx)?;
            applied.extend(change);
        }
        Ok(applied)
    }

    fn finished_battle_at(
        &mut self,
        site: TerritoryId,
        route: &Route,
        units: &[UnitId],
        player: PlayerId,
        state: &GameState,
    ) -> Result<CompositeChange> {
        let id = match self.pending(site, BattleKind::Normal) {
            Some(id) => id,
            None => {
                let seq = self.next_sequence();
                self.insert(Battle::Finished(FinishedBattle::new(
                    site,
                    player,
                    seq,
                    state,
                    WhoWon::Attacker,
                    BattleResultDescription::Conquered,
                )))
            }
        };
        let change = self.battle_mut(id)?.as_ops_mut().add_attack(state, route, units)?;
        if !change.is_empty() {
            return Err(BattleError::invariant("Non empty change"));
        }
        Ok(change)
    }

    /// Take back an attack. `applied` is what [`add_attack`](Self::add_attack)
    /// returned for it and is inverted first.
    pub fn undo_attack(
        &mut self,
        route: &Route,
        units: &[UnitId],
        player: PlayerId,
        applied: &CompositeChange,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        ctx.add_changes(&applied.invert())?;
        let end = route.end();
        for id in self.pending_at(end) {
            let Ok(battle) = self.battle_mut(id) else { continue };
            battle.as_ops_mut().remove_attack(route, units);
            if battle.is_empty() {
                tracing::info!(battle = %id, "battle emptied by undo");
                self.remove_battle_for_undo(id);
            }
        }
        for t in route.all_territories() {
            let allied = ctx
                .state
                .territory(t)
                .ok()
                .and_then(|t| t.owner)
                .map(|owner| ctx.state.is_allied(owner, player))
                .unwrap_or(false);
            if !allied && self.conquered.remove(&t) {
                self.blitzed.remove(&t);
            }
        }
        let change = Change::flag(ctx.state, units, UnitFlag::WasInCombat, false);
        ctx.add_change(change)
    }

    /// Reserve `source` as the origin of naval bombardment for `battle`
    pub fn add_bombarding_units(&mut self, battle: BattleId, source: TerritoryId, units: &[UnitId]) -> Result<()> {
        if self.bombardment_sources.contains(&source) {
            return Err(BattleError::BombardmentSourceUsed(source));
        }
        match self.battle_mut(battle)? {
            Battle::Normal(b) => b.add_bombarding_units(units),
            _ => {
                return Err(BattleError::IllegalInput(format!(
                    "battle {} cannot receive bombardment",
                    battle
                )))
            }
        }
        self.bombardment_sources.insert(source);
        Ok(())
    }

    // === CONQUEST BOOKKEEPING ===

    pub fn was_conquered(&self, t: TerritoryId) -> bool {
        self.conquered.contains(&t)
    }

    pub fn was_blitzed(&self, t: TerritoryId) -> bool {
        self.blitzed.contains(&t)
    }

    pub fn was_battle_fought(&self, t: TerritoryId) -> bool {
        self.fought.contains(&t)
    }

    pub fn conquered(&self) -> &BTreeSet<TerritoryId> {
        &self.conquered
    }

    pub(crate) fn add_to_conquered(&mut self, t: TerritoryId) {
        self.conquered.insert(t);
    }

    pub fn was_bombardment_source(&self, t: TerritoryId) -> bool {
        self.bombardment_sources.contains(&t)
    }

    pub fn bombing_damage(&self, t: TerritoryId) -> u32 {
        self.bombing_damage.get(&t).copied().unwrap_or(0)
    }

    pub(crate) fn add_bombing_damage(&mut self, t: TerritoryId, amount: u32) {
        *self.bombing_damage.entry(t).or_default() += amount;
    }

    pub fn defending_air_that_cannot_land(&self) -> &BTreeMap<TerritoryId, Vec<UnitId>> {
        &self.defending_air_that_cannot_land
    }

    pub(crate) fn add_defending_air_that_cannot_land(&mut self, site: TerritoryId, units: &[UnitId]) {
        if units.is_empty() {
            return;
        }
        tracing::info!(%site, count = units.len(), "defending air cannot land");
        self.defending_air_that_cannot_land
            .entry(site)
            .or_default()
            .extend(units.iter().copied());
    }

    // === RELATIONSHIPS & RECORDS ===

    pub fn record_relationship_change(&mut self, a: PlayerId, b: PlayerId, old: Relationship, new: Relationship) {
        self.relationship_log.record(a, b, old, new);
    }

    pub fn did_just_go_to_war(&self, a: PlayerId, b: PlayerId) -> bool {
        self.relationship_log.did_just_go_to_war(a, b)
    }

    pub fn did_all_just_go_to_war(&self, state: &GameState, player: PlayerId, units: &[UnitId]) -> bool {
        self.relationship_log.did_all_just_go_to_war(state, player, units)
    }

    pub fn records(&self) -> &BattleRecords {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut BattleRecords {
        &mut self.records
    }

    /// End of turn: forget everything except the battle records
    pub fn clear(&mut self) {
        self.battles.clear();
        self.dependencies.clear();
        self.conquered.clear();
        self.blitzed.clear();
        self.fought.clear();
        self.bombardment_sources.clear();
        self.bombing_damage.clear();
        self.defending_air_that_cannot_land.clear();
        self.relationship_log.clear();
    }
}

/// Apply `change` and remember it for undo
pub(crate) fn record_change(applied: &mut CompositeChange, ctx: &mut BattleContext<'_>, change: Change) -> Result<()> {
    if change.is_noop() {
        return Ok(());
    }
    ctx.add_change(change.clone())?;
    applied.add(change);
    Ok(())
}

/// No hostile combat units and owned by an enemy
fn is_conquerable(state: &GameState, t: TerritoryId, player: PlayerId) -> bool {
    let empty_of_combat = !state
        .enemy_units_in(t, player)
        .iter()
        .any(|&u| state.matches(u, matches::is_not_infrastructure));
    empty_of_combat && is_enemy_and_not_unowned_water(state, t, player)
}

fn is_blitzable(state: &GameState, t: TerritoryId, player: PlayerId) -> bool {
    let land = state.territory(t).map(|t| !t.is_water).unwrap_or(false);
    land && is_conquerable(state, t, player)
}
