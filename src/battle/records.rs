//! Per-turn battle statistics

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::battle::common::{BattleKind, BattleResultDescription, WhoWon};
use crate::core::types::{BattleId, PlayerId, TerritoryId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleRecord {
    pub battle: BattleId,
    pub site: TerritoryId,
    pub attacker: PlayerId,
    pub defender: PlayerId,
    pub kind: BattleKind,
    pub result: Option<BattleResultDescription>,
    pub who_won: WhoWon,
    pub attacker_lost_tuv: u32,
    pub defender_lost_tuv: u32,
    pub rounds: u32,
}

/// Outcome of a finished battle, as written into its record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BattleOutcome {
    pub defender: PlayerId,
    pub result: BattleResultDescription,
    pub who_won: WhoWon,
    pub attacker_lost_tuv: u32,
    pub defender_lost_tuv: u32,
    pub rounds: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTotals {
    pub won: u32,
    pub lost: u32,
    pub drawn: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleRecords {
    records: Vec<BattleRecord>,
}

impl BattleRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_battle(
        &mut self,
        battle: BattleId,
        site: TerritoryId,
        attacker: PlayerId,
        defender: PlayerId,
        kind: BattleKind,
    ) {
        if self.get(battle).is_some() {
            return;
        }
        self.records.push(BattleRecord {
            battle,
            site,
            attacker,
            defender,
            kind,
            result: None,
            who_won: WhoWon::NotFinished,
            attacker_lost_tuv: 0,
            defender_lost_tuv: 0,
            rounds: 0,
        });
    }

    pub fn add_result(&mut self, battle: BattleId, outcome: BattleOutcome) {
        match self.records.iter_mut().find(|r| r.battle == battle) {
            Some(record) => {
                record.defender = outcome.defender;
                record.result = Some(outcome.result);
                record.who_won = outcome.who_won;
                record.attacker_lost_tuv = outcome.attacker_lost_tuv;
                record.defender_lost_tuv = outcome.defender_lost_tuv;
                record.rounds = outcome.rounds;
            }
            None => tracing::warn!(%battle, "result for a battle with no record"),
        }
    }

    pub fn remove_battle(&mut self, battle: BattleId) {
        self.records.retain(|r| r.battle != battle);
    }

    pub fn get(&self, battle: BattleId) -> Option<&BattleRecord> {
        self.records.iter().find(|r| r.battle == battle)
    }

    pub fn all(&self) -> &[BattleRecord] {
        &self.records
    }

    pub fn for_attacker(&self, attacker: PlayerId) -> Vec<&BattleRecord> {
        self.records.iter().filter(|r| r.attacker == attacker).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Wins, losses and draws per player across finished battles
    pub fn totals(&self) -> BTreeMap<PlayerId, RecordTotals> {
        let mut totals: BTreeMap<PlayerId, RecordTotals> = BTreeMap::new();
        for r in &self.records {
            match r.who_won {
                WhoWon::Attacker => {
                    totals.entry(r.attacker).or_default().won += 1;
                    totals.entry(r.defender).or_default().lost += 1;
                }
                WhoWon::Defender => {
                    totals.entry(r.attacker).or_default().lost += 1;
                    totals.entry(r.defender).or_default().won += 1;
                }
                WhoWon::Draw => {
                    totals.entry(r.attacker).or_default().drawn += 1;
                    totals.entry(r.defender).or_default().drawn += 1;
                }
                WhoWon::NotFinished => {}
            }
        }
        totals
    }
}
