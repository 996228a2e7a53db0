//! Battle resolution - every fight of a combat phase, in dependency order
//!
//! Attacks are committed to a [`BattleRegistry`], which creates or extends
//! one battle per site and kind and records which battles must finish before
//! others may start. Each battle then runs as a resumable stack of steps:
//! - Normal: ground and naval combat with retreats, AA and bombardment
//! - AirDuel: escorts against interceptors ahead of a raid or a battle
//! - BombingRaid: AA fire at bombers, then damage to the target
//! - NonFighting / Finished: conquest bookkeeping with no dice

pub mod air_battle;
pub mod bombing_raid;
pub mod common;
pub mod execution;
pub mod fire;
pub mod must_fight;
pub mod placeholder;
pub mod records;
pub mod registry;
pub mod relationships;
pub mod resolve;
pub mod takeover;

pub use air_battle::{AirBattle, AirBattleStep};
pub use bombing_raid::{BombingRaidBattle, BombingRaidStep};
pub use common::{BattleCore, BattleKind, BattleResultDescription, WhoWon};
pub use execution::{ExecutionStack, SteppedBattle};
pub use fire::{DiceRoll, FireSpec, FireStep, ReturnFire};
pub use must_fight::{MustFightBattle, MustFightStep};
pub use placeholder::{FinishedBattle, NonFightingBattle};
pub use records::{BattleOutcome, BattleRecord, BattleRecords};
pub use registry::{AttackKind, BattleRegistry};
pub use resolve::{commit_attacks, resolve_all, FoughtBattle, PlannedAttack, ResolutionSummary};

use serde::{Deserialize, Serialize};

use crate::bridge::BattleContext;
use crate::core::error::Result;
use crate::core::types::{BattleId, TerritoryId, UnitId};
use crate::model::{CompositeChange, GameState, Route};

/// Operations every battle variant supports
pub trait BattleOps {
    fn core(&self) -> &BattleCore;
    fn core_mut(&mut self) -> &mut BattleCore;

    /// Join `units` arriving along `route` to the attack. Returns the state
    /// change the caller must apply.
    fn add_attack(&mut self, state: &GameState, route: &Route, units: &[UnitId]) -> Result<CompositeChange>;

    /// Take back units previously added with [`add_attack`](Self::add_attack)
    fn remove_attack(&mut self, route: &Route, units: &[UnitId]) {
        let core = self.core_mut();
        let mut gone: Vec<UnitId> = units.to_vec();
        gone.extend(core.dependent_units(units));
        core.attacking_units.retain(|u| !gone.contains(u));
        core.amphibious_land_attackers.retain(|u| !gone.contains(u));
        if let Some(from) = core.attacking_from.get_mut(&route.territory_before_end()) {
            from.retain(|u| !gone.contains(u));
        }
        core.attacking_from.retain(|_, list| !list.is_empty());
        for u in units {
            core.dependents.remove(u);
        }
        if core.amphibious_land_attackers.is_empty() {
            core.is_amphibious = false;
            core.amphibious_attack_from.clear();
        }
    }

    /// Run (or resume) the battle until it ends or a collaborator fails
    fn fight(&mut self, registry: &mut BattleRegistry, ctx: &mut BattleContext<'_>) -> Result<()>;

    /// A battle this one waits on lost or withdrew `units`
    fn units_lost_in_preceding_battle(
        &mut self,
        units: &[UnitId],
        withdrawn: bool,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()>;

    fn cancel(&mut self, ctx: &mut BattleContext<'_>) {
        let core = self.core_mut();
        core.is_over = true;
        let text = format!("Battle in {} cancelled", ctx.state.territory_name(core.site));
        ctx.add_history(&text, &[]);
    }

    fn is_empty(&self) -> bool {
        self.core().is_empty()
    }
}

/// One pending battle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Battle {
    Normal(MustFightBattle),
    AirDuel(AirBattle),
    BombingRaid(BombingRaidBattle),
    NonFighting(NonFightingBattle),
    Finished(FinishedBattle),
}

impl Battle {
    pub fn as_ops(&self) -> &dyn BattleOps {
        match self {
            Battle::Normal(b) => b,
            Battle::AirDuel(b) => b,
            Battle::BombingRaid(b) => b,
            Battle::NonFighting(b) => b,
            Battle::Finished(b) => b,
        }
    }

    pub fn as_ops_mut(&mut self) -> &mut dyn BattleOps {
        match self {
            Battle::Normal(b) => b,
            Battle::AirDuel(b) => b,
            Battle::BombingRaid(b) => b,
            Battle::NonFighting(b) => b,
            Battle::Finished(b) => b,
        }
    }

    pub fn core(&self) -> &BattleCore {
        self.as_ops().core()
    }

    pub fn id(&self) -> BattleId {
        self.core().id
    }

    pub fn kind(&self) -> BattleKind {
        self.core().kind
    }

    pub fn site(&self) -> TerritoryId {
        self.core().site
    }

    pub fn is_over(&self) -> bool {
        self.core().is_over
    }

    pub fn is_empty(&self) -> bool {
        self.as_ops().is_empty()
    }

    /// Placeholders never roll dice
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Battle::NonFighting(_) | Battle::Finished(_))
    }
}
