//! Battles that never roll dice
//!
//! A [`FinishedBattle`] stands for a territory already taken on the move;
//! it exists so later cascades can still find and record it. A
//! [`NonFightingBattle`] defers an uncontested conquest until the battles it
//! depends on are over.

use serde::{Deserialize, Serialize};

use crate::battle::common::{find_defender, BattleCore, BattleKind, BattleResultDescription, WhoWon};
use crate::battle::records::BattleOutcome;
use crate::battle::registry::BattleRegistry;
use crate::battle::BattleOps;
use crate::bridge::BattleContext;
use crate::core::error::{BattleError, Result};
use crate::core::types::{PlayerId, TerritoryId, UnitId};
use crate::model::{matches, Change, CompositeChange, GameState, Route};

fn outcome(core: &BattleCore) -> BattleOutcome {
    BattleOutcome {
        rounds: 0,
        ..core.outcome()
    }
}

/// Units removed from a placeholder by an earlier battle. Lost units still
/// standing in the territory die there. Returns true when no attackers remain
/// and the attack is lost.
fn lose_units(core: &mut BattleCore, ctx: &mut BattleContext<'_>, units: &[UnitId], withdrawn: bool) -> Result<bool> {
    let mut lost = core.dependent_units(units);
    lost.extend(units.iter().copied().filter(|u| core.attacking_units.contains(u)));
    if lost.is_empty() {
        return Ok(false);
    }
    let site = core.site;
    let on_site: Vec<UnitId> = lost.iter().copied().filter(|&u| ctx.state.is_in(u, site)).collect();
    if !withdrawn && !on_site.is_empty() {
        let text = format!(
            "{} lost in {}",
            ctx.describe_units(&on_site),
            ctx.state.territory_name(site)
        );
        ctx.add_history(&text, &on_site);
        ctx.add_change(Change::remove_units(site, &on_site))?;
    }
    core.forget_units(&lost);
    if !core.attacking_units.is_empty() {
        return Ok(false);
    }
    if !withdrawn {
        core.attacker_lost_tuv += ctx.state.tuv_for(&on_site, core.attacker);
    }
    core.who_won = WhoWon::Defender;
    core.result = Some(BattleResultDescription::Lost);
    core.is_over = true;
    Ok(true)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedBattle {
    core: BattleCore,
}

impl FinishedBattle {
    pub fn new(
        site: TerritoryId,
        attacker: PlayerId,
        sequence: u64,
        state: &GameState,
        who_won: WhoWon,
        result: BattleResultDescription,
    ) -> Self {
        let defender = find_defender(state, site, attacker);
        let mut core = BattleCore::new(BattleKind::Normal, sequence, site, attacker, defender);
        core.who_won = who_won;
        core.result = Some(result);
        Self { core }
    }
}

impl BattleOps for FinishedBattle {
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

    fn fight(&mut self, registry: &mut BattleRegistry, _ctx: &mut BattleContext<'_>) -> Result<()> {
        registry.records_mut().add_result(self.core.id, outcome(&self.core));
        self.core.is_over = true;
        Ok(())
    }

    fn units_lost_in_preceding_battle(
        &mut self,
        units: &[UnitId],
        withdrawn: bool,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        if lose_units(&mut self.core, ctx, units, withdrawn)? {
            tracing::info!(battle = %self.core.id, "conquest undone by preceding battle");
            registry.records_mut().add_result(self.core.id, outcome(&self.core));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonFightingBattle {
    core: BattleCore,
}

impl NonFightingBattle {
    pub fn new(site: TerritoryId, attacker: PlayerId, sequence: u64, state: &GameState) -> Self {
        let defender = find_defender(state, site, attacker);
        Self {
            core: BattleCore::new(BattleKind::Normal, sequence, site, attacker, defender),
        }
    }

    /// Some allied land unit actually stands in the territory
    fn has_attacking_units(&self, state: &GameState) -> bool {
        let attacker = self.core.attacker;
        state.units_in(self.core.site).into_iter().any(|u| {
            state.matches(u, matches::is_land)
                && state
                    .owner_of(u)
                    .map(|o| state.is_allied(o, attacker))
                    .unwrap_or(false)
        })
    }
}

impl BattleOps for NonFightingBattle {
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
        if !registry.get_dependent_on(self.core.id).is_empty() {
            return Err(BattleError::invariant(
                "Must fight battles that this battle depends on first",
            ));
        }
        let site = self.core.site;
        ctx.start_event(&format!("Battle in {}", ctx.state.territory_name(site)));
        if self.has_attacking_units(ctx.state) {
            self.core.who_won = WhoWon::Attacker;
            self.core.result = Some(BattleResultDescription::Conquered);
            let arriving = self.core.attacking_units.clone();
            registry.take_over(site, self.core.attacker, &arriving, ctx)?;
            registry.add_to_conquered(site);
        } else {
            self.core.who_won = WhoWon::Defender;
            self.core.result = Some(BattleResultDescription::Lost);
        }
        registry.records_mut().add_result(self.core.id, outcome(&self.core));
        self.core.is_over = true;
        Ok(())
    }

    fn units_lost_in_preceding_battle(
        &mut self,
        units: &[UnitId],
        withdrawn: bool,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()> {
        if lose_units(&mut self.core, ctx, units, withdrawn)? {
            tracing::info!(battle = %self.core.id, "deferred conquest lost its attackers");
            registry.records_mut().add_result(self.core.id, outcome(&self.core));
        }
        Ok(())
    }
}
