//! Resumable execution stack
//!
//! Battle logic is a list of atomic steps pushed in reverse order of
//! execution. A step either makes no external call, or makes exactly one
//! (dice, casualty selection, remote query) before touching any state, so it
//! can be executed again from the start if that call fails.
//!
//! The step being executed stays in `current` until it completes. When a
//! step fails, calling the driver again re-runs that same step instead of
//! starting the round over.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::battle::registry::BattleRegistry;
use crate::bridge::BattleContext;
use crate::core::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStack<S> {
    /// Top of the stack is the last element
    pending: Vec<S>,
    current: Option<S>,
}

impl<S> Default for ExecutionStack<S> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            current: None,
        }
    }
}

impl<S: Clone> ExecutionStack<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: S) {
        self.pending.push(step);
    }

    /// Push steps so that the first one in `steps` runs first
    pub fn push_all_reversed(&mut self, steps: Vec<S>) {
        for step in steps.into_iter().rev() {
            self.pending.push(step);
        }
    }

    /// A step is in flight or waiting to run
    pub fn is_executing(&self) -> bool {
        self.current.is_some() || !self.pending.is_empty()
    }

    /// No steps waiting to run. The step in flight, if any, is not counted.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    /// The interrupted step if there is one, otherwise the top of the stack
    pub fn next_step(&mut self) -> Option<S> {
        if self.current.is_none() {
            self.current = self.pending.pop();
        }
        self.current.clone()
    }

    /// Mark the step returned by [`next_step`](Self::next_step) as done
    pub fn complete(&mut self) {
        self.current = None;
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
    }

    /// The step that was interrupted, if any
    pub fn in_flight(&self) -> Option<&S> {
        self.current.as_ref()
    }
}

/// A battle whose fight is driven through an [`ExecutionStack`]
pub trait SteppedBattle {
    type Step: Clone + Debug;

    fn stack_mut(&mut self) -> &mut ExecutionStack<Self::Step>;

    fn is_over(&self) -> bool;

    fn execute(
        &mut self,
        step: Self::Step,
        registry: &mut BattleRegistry,
        ctx: &mut BattleContext<'_>,
    ) -> Result<()>;
}

/// Pop and execute steps until the stack is empty or the battle is over.
///
/// An error leaves the failed step in flight and is returned as is.
pub fn drive<B: SteppedBattle>(
    battle: &mut B,
    registry: &mut BattleRegistry,
    ctx: &mut BattleContext<'_>,
) -> Result<()> {
    while let Some(step) = battle.stack_mut().next_step() {
        if battle.is_over() {
            battle.stack_mut().clear();
            break;
        }
        tracing::debug!(?step, "executing step");
        if let Err(e) = battle.execute(step, registry, ctx) {
            if e.is_fatal() {
                tracing::error!(error = %e, "battle step failed");
            } else {
                tracing::warn!(error = %e, "battle step interrupted");
            }
            return Err(e);
        }
        battle.stack_mut().complete();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_all_reversed_runs_in_order() {
        let mut stack = ExecutionStack::new();
        stack.push_all_reversed(vec![1, 2, 3]);
        let mut seen = Vec::new();
        while let Some(step) = stack.next_step() {
            seen.push(step);
            stack.complete();
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(!stack.is_executing());
    }

    #[test]
    fn test_interrupted_step_is_returned_again() {
        let mut stack = ExecutionStack::new();
        stack.push_all_reversed(vec!["roll", "select"]);
        assert_eq!(stack.next_step(), Some("roll"));
        // not completed: simulate a failure
        assert!(stack.is_executing());
        assert_eq!(stack.next_step(), Some("roll"));
        stack.complete();
        assert_eq!(stack.next_step(), Some("select"));
    }

    #[test]
    fn test_steps_pushed_during_execution_run_next() {
        let mut stack = ExecutionStack::new();
        stack.push_all_reversed(vec![1, 9]);
        let first = stack.next_step();
        assert_eq!(first, Some(1));
        stack.push(2);
        stack.complete();
        assert_eq!(stack.next_step(), Some(2));
        stack.complete();
        assert_eq!(stack.next_step(), Some(9));
    }

    #[test]
    fn test_stack_serializes_in_flight_step() {
        let mut stack = ExecutionStack::new();
        stack.push_all_reversed(vec![10u32, 20]);
        stack.next_step();
        let json = serde_json::to_string(&stack).unwrap();
        let mut back: ExecutionStack<u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.in_flight(), Some(&10));
        assert_eq!(back.len(), 2);
        assert_eq!(back.next_step(), Some(10));
    }
}
