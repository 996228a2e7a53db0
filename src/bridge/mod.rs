//! Collaborators the battle engine calls out to
//!
//! Everything a battle needs from the outside world is reached through
//! [`BattleContext`], which is passed explicitly into every engine call.

pub mod casualty;
pub mod dice;
pub mod display;
pub mod history;
pub mod remote;

pub use casualty::{AutoCasualtySelector, CasualtyDetails, CasualtyRequest, CasualtySelector};
pub use dice::{DiceSource, DiceTag, ScriptedDice, SeededDice};
pub use display::{BattleDisplay, BattleNotice, CaptureKind, RecordingDisplay, TracingDisplay};
pub use history::{HistoryWriter, InMemoryHistory};
pub use remote::{AutoRemote, RemoteGateway, RetreatAnswer, RetreatQuery, ScriptedRemote};

use crate::core::config::RulesConfig;
use crate::core::error::Result;
use crate::core::types::{PlayerId, TerritoryId, UnitId};
use crate::model::{Change, CompositeChange, GameState};

/// Re-issue `op` while it fails with a lost connection.
///
/// `limit` caps the retries; `None` keeps waiting forever.
pub fn with_retry<T>(limit: Option<u32>, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempts = 0u32;
    loop {
        match op() {
            Err(e) if e.is_retryable() => {
                attempts += 1;
                if limit.map(|l| attempts > l).unwrap_or(false) {
                    tracing::error!(what, attempts, "giving up after lost connections");
                    return Err(e);
                }
                tracing::warn!(what, attempts, error = %e, "connection lost, re-issuing");
            }
            other => return other,
        }
    }
}

/// Mutable game state, rules and collaborators for one engine call
pub struct BattleContext<'a> {
    pub state: &'a mut GameState,
    pub rules: &'a RulesConfig,
    pub dice: &'a mut dyn DiceSource,
    pub casualties: &'a mut dyn CasualtySelector,
    pub remote: &'a mut dyn RemoteGateway,
    pub display: &'a mut dyn BattleDisplay,
    pub history: &'a mut dyn HistoryWriter,
}

impl<'a> BattleContext<'a> {
    pub fn new(
        state: &'a mut GameState,
        rules: &'a RulesConfig,
        dice: &'a mut dyn DiceSource,
        casualties: &'a mut dyn CasualtySelector,
        remote: &'a mut dyn RemoteGateway,
        display: &'a mut dyn BattleDisplay,
        history: &'a mut dyn HistoryWriter,
    ) -> Self {
        Self {
            state,
            rules,
            dice,
            casualties,
            remote,
            display,
            history,
        }
    }

    pub fn add_change(&mut self, change: Change) -> Result<()> {
        if change.is_noop() {
            return Ok(());
        }
        tracing::trace!(?change, "applying change");
        self.state.apply(&change)
    }

    pub fn add_changes(&mut self, change: &CompositeChange) -> Result<()> {
        self.state.apply_all(change)
    }

    pub fn roll_dice(
        &mut self,
        count: usize,
        player: PlayerId,
        tag: DiceTag,
        annotation: &str,
    ) -> Result<Vec<u32>> {
        let sides = self.rules.dice_sides;
        let dice = &mut *self.dice;
        with_retry(self.rules.engine.remote_retry_limit, "dice", || {
            dice.roll(sides, count, player, tag, annotation)
        })
    }

    pub fn select_casualties(&mut self, request: &CasualtyRequest<'_>) -> Result<CasualtyDetails> {
        let state = &*self.state;
        let selector = &mut *self.casualties;
        with_retry(self.rules.engine.remote_retry_limit, "casualties", || {
            selector.select_casualties(state, request)
        })
    }

    pub fn query_retreat(&mut self, query: &RetreatQuery<'_>) -> Result<Option<TerritoryId>> {
        let remote = &mut *self.remote;
        with_retry(self.rules.engine.remote_retry_limit, "retreat query", || {
            remote.query_retreat(query)
        })
    }

    pub fn confirm(&mut self, player: PlayerId, prompt: &str) -> Result<bool> {
        let remote = &mut *self.remote;
        with_retry(self.rules.engine.remote_retry_limit, "confirm", || {
            remote.confirm(player, prompt)
        })
    }

    pub fn notify(&mut self, notice: BattleNotice) {
        self.display.notify(notice);
    }

    pub fn start_event(&mut self, text: &str) {
        self.history.start_event(text);
    }

    pub fn add_history(&mut self, text: &str, units: &[UnitId]) {
        self.history.add_child(text, units);
    }

    /// "2 infantry, 1 armour" style summary for transcripts
    pub fn describe_units(&self, units: &[UnitId]) -> String {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for &u in units {
            let name = self
                .state
                .type_of(u)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| u.to_string());
            match counts.iter_mut().find(|(n, _)| *n == name) {
                Some((_, c)) => *c += 1,
                None => counts.push((name, 1)),
            }
        }
        if counts.is_empty() {
            return "no units".into();
        }
        counts
            .iter()
            .map(|(n, c)| format!("{} {}", c, n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Owned collaborators, for callers that do not need to inspect them later
pub struct Collaborators {
    pub dice: Box<dyn DiceSource + Send>,
    pub casualties: Box<dyn CasualtySelector + Send>,
    pub remote: Box<dyn RemoteGateway + Send>,
    pub display: Box<dyn BattleDisplay + Send>,
    pub history: Box<dyn HistoryWriter + Send>,
}

impl Collaborators {
    /// Seeded dice and fully automatic decisions
    pub fn automatic(seed: u64) -> Self {
        Self {
            dice: Box::new(SeededDice::new(seed)),
            casualties: Box::new(AutoCasualtySelector),
            remote: Box::new(AutoRemote),
            display: Box::new(TracingDisplay),
            history: Box::new(InMemoryHistory::new()),
        }
    }

    pub fn context<'a>(&'a mut self, state: &'a mut GameState, rules: &'a RulesConfig) -> BattleContext<'a> {
        BattleContext {
            state,
            rules,
            dice: &mut *self.dice,
            casualties: &mut *self.casualties,
            remote: &mut *self.remote,
            display: &mut *self.display,
            history: &mut *self.history,
        }
    }
}
