//! Fire-and-forget battle notifications

use serde::{Deserialize, Serialize};

use crate::core::types::{BattleId, PlayerId, TerritoryId, UnitId};

/// How a territory changed hands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureKind {
    Sea,
    Land,
    Blitz,
    Capital,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattleNotice {
    Steps {
        battle: BattleId,
        steps: Vec<String>,
    },
    Dice {
        battle: BattleId,
        step: String,
        player: PlayerId,
        rolls: Vec<u32>,
        hits: u32,
    },
    Casualties {
        battle: BattleId,
        step: String,
        player: PlayerId,
        killed: Vec<UnitId>,
        damaged: Vec<UnitId>,
    },
    Retreat {
        battle: BattleId,
        player: PlayerId,
        units: Vec<UnitId>,
        to: TerritoryId,
        message: String,
    },
    /// Bombing dice and the damage they caused
    Bombing {
        battle: BattleId,
        rolls: Vec<u32>,
        damage: u32,
    },
    Capture {
        territory: TerritoryId,
        player: PlayerId,
        kind: CaptureKind,
    },
    BattleEnd {
        battle: BattleId,
        message: String,
    },
}

pub trait BattleDisplay {
    fn notify(&mut self, notice: BattleNotice);
}

/// Renders notices as tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDisplay;

impl BattleDisplay for TracingDisplay {
    fn notify(&mut self, notice: BattleNotice) {
        match &notice {
            BattleNotice::BattleEnd { battle, message } => {
                tracing::info!(%battle, "{}", message);
            }
            BattleNotice::Capture { territory, player, kind } => {
                tracing::info!(%territory, %player, ?kind, "territory captured");
            }
            other => tracing::debug!(notice = ?other),
        }
    }
}

/// Keeps every notice, for tests and replays
#[derive(Debug, Clone, Default)]
pub struct RecordingDisplay {
    pub notices: Vec<BattleNotice>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captures(&self) -> Vec<(TerritoryId, PlayerId, CaptureKind)> {
        self.notices
            .iter()
            .filter_map(|n| match n {
                BattleNotice::Capture { territory, player, kind } => Some((*territory, *player, *kind)),
                _ => None,
            })
            .collect()
    }

    pub fn retreats(&self) -> usize {
        self.notices
            .iter()
            .filter(|n| matches!(n, BattleNotice::Retreat { .. }))
            .count()
    }
}

impl BattleDisplay for RecordingDisplay {
    fn notify(&mut self, notice: BattleNotice) {
        self.notices.push(notice);
    }
}
