//! Relationship changes made during the current turn

use serde::{Deserialize, Serialize};

use crate::core::types::{PlayerId, UnitId};
use crate::model::{GameState, Relationship};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipChange {
    pub a: PlayerId,
    pub b: PlayerId,
    pub old: Relationship,
    pub new: Relationship,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipLog {
    changes: Vec<RelationshipChange>,
}

impl RelationshipLog {
    pub fn record(&mut self, a: PlayerId, b: PlayerId, old: Relationship, new: Relationship) {
        tracing::debug!(%a, %b, ?old, ?new, "relationship changed");
        self.changes.push(RelationshipChange { a, b, old, new });
    }

    /// `a` and `b` moved from peace to war this turn, in either order
    pub fn did_just_go_to_war(&self, a: PlayerId, b: PlayerId) -> bool {
        self.changes.iter().any(|c| {
            ((c.a == a && c.b == b) || (c.a == b && c.b == a))
                && c.old != Relationship::War
                && c.new == Relationship::War
        })
    }

    /// Every owner of `units` hostile to `player` only became so this turn
    pub fn did_all_just_go_to_war(&self, state: &GameState, player: PlayerId, units: &[UnitId]) -> bool {
        let enemies: Vec<PlayerId> = units
            .iter()
            .filter_map(|&u| state.owner_of(u))
            .filter(|&owner| state.is_at_war(player, owner))
            .collect();
        !enemies.is_empty() && enemies.iter().all(|&e| self.did_just_go_to_war(player, e))
    }

    pub fn changes(&self) -> &[RelationshipChange] {
        &self.changes
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}
