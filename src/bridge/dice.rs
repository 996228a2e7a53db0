//! Randomness source

use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::core::error::{BattleError, Result};
use crate::core::types::PlayerId;

/// What a roll is for, kept with the roll for audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiceTag {
    Combat,
    AntiAir,
    Bombard,
    AirBattle,
    Bombing,
}

/// Produces zero-based die results attributed to the requesting player.
/// All battles of a turn share one stream, so call order matters.
pub trait DiceSource {
    fn roll(
        &mut self,
        sides: u32,
        count: usize,
        player: PlayerId,
        tag: DiceTag,
        annotation: &str,
    ) -> Result<Vec<u32>>;
}

/// Deterministic stream for replays and simulations
#[derive(Debug, Clone)]
pub struct SeededDice {
    rng: ChaCha8Rng,
    rolled: u64,
}

impl SeededDice {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            rolled: 0,
        }
    }

    /// Number of dice produced so far
    pub fn rolled(&self) -> u64 {
        self.rolled
    }
}

impl DiceSource for SeededDice {
    fn roll(
        &mut self,
        sides: u32,
        count: usize,
        player: PlayerId,
        tag: DiceTag,
        annotation: &str,
    ) -> Result<Vec<u32>> {
        if sides == 0 {
            return Err(BattleError::Config("dice need at least one side".into()));
        }
        let rolls: Vec<u32> = (0..count).map(|_| self.rng.gen_range(0..sides)).collect();
        self.rolled += count as u64;
        tracing::trace!(%player, ?tag, annotation, ?rolls, "dice rolled");
        Ok(rolls)
    }
}

/// Replays a fixed list of results. Can also simulate dropped connections.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDice {
    values: VecDeque<u32>,
    fallback: Option<u32>,
    drops: u32,
    /// Every request seen, in order: (player, tag, count)
    pub requests: Vec<(PlayerId, DiceTag, usize)>,
}

impl ScriptedDice {
    pub fn new(values: impl IntoIterator<Item = u32>) -> Self {
        Self {
            values: values.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Every die shows `value`
    pub fn always(value: u32) -> Self {
        Self {
            fallback: Some(value),
            ..Default::default()
        }
    }

    /// Used once the script runs out
    pub fn then_always(mut self, value: u32) -> Self {
        self.fallback = Some(value);
        self
    }

    /// The next `n` requests fail with a lost connection
    pub fn drop_next(&mut self, n: u32) {
        self.drops = n;
    }

    pub fn remaining(&self) -> usize {
        self.values.len()
    }
}

impl DiceSource for ScriptedDice {
    fn roll(
        &mut self,
        sides: u32,
        count: usize,
        player: PlayerId,
        tag: DiceTag,
        _annotation: &str,
    ) -> Result<Vec<u32>> {
        if self.drops > 0 {
            self.drops -= 1;
            return Err(BattleError::ConnectionLost("dice server".into()));
        }
        let mut rolls = Vec::with_capacity(count);
        for _ in 0..count {
            let value = match self.values.pop_front() {
                Some(v) => v,
                None => self
                    .fallback
                    .ok_or_else(|| BattleError::Config("scripted dice exhausted".into()))?,
            };
            rolls.push(value.min(sides.saturating_sub(1)));
        }
        self.requests.push((player, tag, count));
        Ok(rolls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_dice_deterministic() {
        let mut a = SeededDice::new(42);
        let mut b = SeededDice::new(42);
        let ra = a.roll(6, 20, PlayerId(0), DiceTag::Combat, "").unwrap();
        let rb = b.roll(6, 20, PlayerId(0), DiceTag::Combat, "").unwrap();
        assert_eq!(ra, rb);
        assert!(ra.iter().all(|&v| v < 6));
        assert_eq!(a.rolled(), 20);
    }

    #[test]
    fn test_scripted_dice_order_and_fallback() {
        let mut d = ScriptedDice::new([0, 5]).then_always(3);
        let r = d.roll(6, 3, PlayerId(1), DiceTag::Combat, "").unwrap();
        assert_eq!(r, vec![0, 5, 3]);
        assert_eq!(d.requests.len(), 1);
    }

    #[test]
    fn test_scripted_dice_exhausted_errors() {
        let mut d = ScriptedDice::new([1]);
        assert!(d.roll(6, 2, PlayerId(0), DiceTag::Combat, "").is_err());
    }

    #[test]
    fn test_scripted_dice_drops() {
        let mut d = ScriptedDice::always(0);
        d.drop_next(1);
        let err = d.roll(6, 1, PlayerId(0), DiceTag::Combat, "").unwrap_err();
        assert!(err.is_retryable());
        assert!(d.roll(6, 1, PlayerId(0), DiceTag::Combat, "").is_ok());
    }
}
