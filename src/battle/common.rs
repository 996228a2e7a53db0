//! State shared by every battle variant

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::battle::records::BattleOutcome;
use crate::core::types::{BattleId, PlayerId, Side, TerritoryId, UnitId};
use crate::model::{matches, GameState, Route};

/// What kind of encounter a battle is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BattleKind {
    Normal,
    /// Escorts against interceptors ahead of a ground or naval battle
    AirBattle,
    /// Escorts and bombers against interceptors ahead of a bombing raid
    AirRaid,
    BombingRaid,
}

impl BattleKind {
    pub fn is_bombing_run(self) -> bool {
        matches!(self, BattleKind::AirRaid | BattleKind::BombingRaid)
    }

    pub fn is_air_battle(self) -> bool {
        matches!(self, BattleKind::AirBattle | BattleKind::AirRaid)
    }

    /// Resolution order within a turn: air raids, bombing raids, escort air
    /// battles, then ground and naval battles
    pub fn phase(self) -> u8 {
        match self {
            BattleKind::AirRaid => 0,
            BattleKind::BombingRaid => 1,
            BattleKind::AirBattle => 2,
            BattleKind::Normal => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WhoWon {
    #[default]
    NotFinished,
    Attacker,
    Defender,
    Draw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattleResultDescription {
    Conquered,
    WonWithoutConquering,
    WonWithEnemyLeft,
    Stalemate,
    Lost,
    Bombed,
    NoBattle,
}

/// Identity, unit lists and outcome of one battle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleCore {
    pub id: BattleId,
    /// Creation order within the turn
    pub sequence: u64,
    pub kind: BattleKind,
    pub site: TerritoryId,
    pub attacker: PlayerId,
    pub defender: PlayerId,
    pub round: u32,
    pub is_over: bool,
    pub who_won: WhoWon,
    pub result: Option<BattleResultDescription>,

    // Insertion order is kept: casualties prefer the units listed first
    pub attacking_units: Vec<UnitId>,
    pub defending_units: Vec<UnitId>,
    pub attacking_waiting_to_die: Vec<UnitId>,
    pub defending_waiting_to_die: Vec<UnitId>,
    pub killed: Vec<UnitId>,

    /// Transport or carrier -> units it carries into the battle
    pub dependents: BTreeMap<UnitId, Vec<UnitId>>,
    /// Territory the attack came from -> units that came from it
    pub attacking_from: BTreeMap<TerritoryId, Vec<UnitId>>,
    pub amphibious_attack_from: Vec<TerritoryId>,
    pub amphibious_land_attackers: Vec<UnitId>,
    pub is_amphibious: bool,
    pub bombarding_units: Vec<UnitId>,

    pub attacker_lost_tuv: u32,
    pub defender_lost_tuv: u32,
}

impl BattleCore {
    pub fn new(
        kind: BattleKind,
        sequence: u64,
        site: TerritoryId,
        attacker: PlayerId,
        defender: PlayerId,
    ) -> Self {
        Self {
            id: BattleId::new(),
            sequence,
            kind,
            site,
            attacker,
            defender,
            round: 1,
            is_over: false,
            who_won: WhoWon::NotFinished,
            result: None,
            attacking_units: Vec::new(),
            defending_units: Vec::new(),
            attacking_waiting_to_die: Vec::new(),
            defending_waiting_to_die: Vec::new(),
            killed: Vec::new(),
            dependents: BTreeMap::new(),
            attacking_from: BTreeMap::new(),
            amphibious_attack_from: Vec::new(),
            amphibious_land_attackers: Vec::new(),
            is_amphibious: false,
            bombarding_units: Vec::new(),
            attacker_lost_tuv: 0,
            defender_lost_tuv: 0,
        }
    }

    pub fn player(&self, side: Side) -> PlayerId {
        match side {
            Side::Attacker => self.attacker,
            Side::Defender => self.defender,
        }
    }

    pub fn units(&self, side: Side) -> &Vec<UnitId> {
        match side {
            Side::Attacker => &self.attacking_units,
            Side::Defender => &self.defending_units,
        }
    }

    pub fn units_mut(&mut self, side: Side) -> &mut Vec<UnitId> {
        match side {
            Side::Attacker => &mut self.attacking_units,
            Side::Defender => &mut self.defending_units,
        }
    }

    pub fn waiting_to_die(&self, side: Side) -> &Vec<UnitId> {
        match side {
            Side::Attacker => &self.attacking_waiting_to_die,
            Side::Defender => &self.defending_waiting_to_die,
        }
    }

    pub fn waiting_to_die_mut(&mut self, side: Side) -> &mut Vec<UnitId> {
        match side {
            Side::Attacker => &mut self.attacking_waiting_to_die,
            Side::Defender => &mut self.defending_waiting_to_die,
        }
    }

    /// Active units plus those hit but not yet removed
    pub fn units_with_waiting(&self, side: Side) -> Vec<UnitId> {
        let mut all = self.units(side).clone();
        all.extend(self.waiting_to_die(side).iter().copied());
        all
    }

    /// Everything carried by `units`, excluding the units themselves
    pub fn dependent_units(&self, units: &[UnitId]) -> Vec<UnitId> {
        let mut out = Vec::new();
        for u in units {
            if let Some(carried) = self.dependents.get(u) {
                for c in carried {
                    if !out.contains(c) && !units.contains(c) {
                        out.push(*c);
                    }
                }
            }
        }
        out
    }

    /// Record which of `holders` carry units in the current state
    pub fn add_dependents(&mut self, state: &GameState, holders: &[UnitId]) {
        for &h in holders {
            let carried = state.transporting(h);
            if carried.is_empty() {
                continue;
            }
            let entry = self.dependents.entry(h).or_default();
            for c in carried {
                if !entry.contains(&c) {
                    entry.push(c);
                }
            }
        }
    }

    /// Add arriving attackers, where they came from and what they carry
    pub fn record_attack(&mut self, state: &GameState, route: &Route, units: &[UnitId]) {
        self.add_dependents(state, units);
        for &u in units {
            if !self.attacking_units.contains(&u) {
                self.attacking_units.push(u);
            }
        }
        let from = route.territory_before_end();
        let list = self.attacking_from.entry(from).or_default();
        for &u in units {
            if !list.contains(&u) {
                list.push(u);
            }
        }
        let land = state.filter(units, matches::is_land);
        if route.is_unload(state) && !land.is_empty() {
            if !self.amphibious_attack_from.contains(&from) {
                self.amphibious_attack_from.push(from);
            }
            for u in land {
                if !self.amphibious_land_attackers.contains(&u) {
                    self.amphibious_land_attackers.push(u);
                }
            }
            self.is_amphibious = true;
        }
    }

    /// Drop units from every list and dependency mapping
    pub fn forget_units(&mut self, units: &[UnitId]) {
        self.attacking_units.retain(|u| !units.contains(u));
        self.defending_units.retain(|u| !units.contains(u));
        self.amphibious_land_attackers.retain(|u| !units.contains(u));
        self.bombarding_units.retain(|u| !units.contains(u));
        for list in self.attacking_from.values_mut() {
            list.retain(|u| !units.contains(u));
        }
        self.attacking_from.retain(|_, list| !list.is_empty());
        for carried in self.dependents.values_mut() {
            carried.retain(|u| !units.contains(u));
        }
        self.dependents
            .retain(|holder, carried| !units.contains(holder) && !carried.is_empty());
    }

    /// Drop units that are no longer at the battle site
    pub fn prune_missing(&mut self, state: &GameState) {
        let site = self.site;
        self.attacking_units.retain(|&u| state.is_in(u, site));
        self.defending_units.retain(|&u| state.is_in(u, site));
    }

    pub fn is_empty(&self) -> bool {
        self.attacking_units.is_empty() && self.attacking_waiting_to_die.is_empty()
    }

    /// What goes into the battle record once the battle is decided
    pub fn outcome(&self) -> BattleOutcome {
        BattleOutcome {
            defender: self.defender,
            result: self.result.unwrap_or(BattleResultDescription::NoBattle),
            who_won: self.who_won,
            attacker_lost_tuv: self.attacker_lost_tuv,
            defender_lost_tuv: self.defender_lost_tuv,
            rounds: self.round,
        }
    }

    /// Fill in the TUV lost by each side from the killed list
    pub fn tally_losses(&mut self, state: &GameState) {
        self.attacker_lost_tuv = state.tuv_for(&self.killed, self.attacker);
        self.defender_lost_tuv = state.tuv_for(&self.killed, self.defender);
    }
}

/// Who defends `site` against `attacker`: the hostile land owner, or else the
/// hostile player with the most units present
pub fn find_defender(state: &GameState, site: TerritoryId, attacker: PlayerId) -> PlayerId {
    let Ok(territory) = state.territory(site) else {
        return PlayerId::NEUTRAL;
    };
    if !territory.is_water {
        if let Some(owner) = territory.owner {
            if state.is_at_war(attacker, owner) {
                return owner;
            }
        }
    }
    let mut counts: BTreeMap<PlayerId, usize> = BTreeMap::new();
    for &u in &territory.units {
        if let Some(owner) = state.owner_of(u) {
            if state.is_at_war(attacker, owner) {
                *counts.entry(owner).or_default() += 1;
            }
        }
    }
    let mut best: Option<(PlayerId, usize)> = None;
    for (player, count) in counts {
        if best.map(|(_, c)| count > c).unwrap_or(true) {
            best = Some((player, count));
        }
    }
    match best {
        Some((player, _)) => player,
        None => territory.owner.unwrap_or(PlayerId::NEUTRAL),
    }
}

/// Player owning the most of `units`, lowest id on ties
pub fn player_with_most_units(state: &GameState, units: &[UnitId]) -> Option<PlayerId> {
    let mut counts: BTreeMap<PlayerId, usize> = BTreeMap::new();
    for &u in units {
        if let Some(owner) = state.owner_of(u) {
            *counts.entry(owner).or_default() += 1;
        }
    }
    let max = counts.values().copied().max()?;
    counts.into_iter().find(|&(_, c)| c == max).map(|(p, _)| p)
}

/// Hostile territory that can actually change hands
pub fn is_enemy_and_not_unowned_water(state: &GameState, site: TerritoryId, player: PlayerId) -> bool {
    let unowned_water = state
        .territory(site)
        .map(|t| t.is_unownable_water())
        .unwrap_or(true);
    !unowned_water && state.is_enemy_territory(site, player)
}
