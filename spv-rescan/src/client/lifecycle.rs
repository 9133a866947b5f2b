//! Supervisor lifecycle states and their transition rules.

use std::fmt;

use crate::error::{Result, SpvError};

/// Phase of a supervised run.
///
/// Phases only move forward. Any phase may be skipped, and `SteadyState` is
/// the only phase that may be re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Starting,
    Syncing,
    Rescanning,
    SteadyState,
    ShuttingDown,
    Stopped,
}

impl LifecycleState {
    fn rank(&self) -> u8 {
        match self {
            LifecycleState::Starting => 0,
            LifecycleState::Syncing => 1,
            LifecycleState::Rescanning => 2,
            LifecycleState::SteadyState => 3,
            LifecycleState::ShuttingDown => 4,
            LifecycleState::Stopped => 5,
        }
    }

    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        next.rank() > self.rank()
            || (*self == LifecycleState::SteadyState && next == LifecycleState::SteadyState)
    }

    pub fn is_terminal(&self) -> bool {
        *self == LifecycleState::Stopped
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Starting => "Starting",
            LifecycleState::Syncing => "Syncing",
            LifecycleState::Rescanning => "Rescanning",
            LifecycleState::SteadyState => "SteadyState",
            LifecycleState::ShuttingDown => "ShuttingDown",
            LifecycleState::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// The current state plus the rule that guards changes to it.
#[derive(Debug)]
pub(super) struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    pub(super) fn new() -> Self {
        Self {
            state: LifecycleState::Starting,
        }
    }

    pub(super) fn state(&self) -> LifecycleState {
        self.state
    }

    /// Move to `next`, returning the previous state.
    pub(super) fn transition(&mut self, next: LifecycleState) -> Result<LifecycleState> {
        if !self.state.can_transition_to(next) {
            return Err(SpvError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        tracing::info!("Lifecycle: {} -> {}", previous, next);
        Ok(previous)
    }
}
