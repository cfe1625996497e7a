//! Run state shared between the orchestrator and its workers

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Testing,
    Translating,
    Stopping,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Testing => write!(f, "Testing"),
            RunState::Translating => write!(f, "Translating"),
            RunState::Stopping => write!(f, "Stopping"),
        }
    }
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Idle, RunState::Testing)
                | (RunState::Idle, RunState::Translating)
                | (RunState::Testing, RunState::Idle)
                | (RunState::Translating, RunState::Stopping)
                | (RunState::Translating, RunState::Idle)
                | (RunState::Stopping, RunState::Idle)
        )
    }

    fn to_u8(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Testing => 1,
            RunState::Translating => 2,
            RunState::Stopping => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => RunState::Testing,
            2 => RunState::Translating,
            3 => RunState::Stopping,
            _ => RunState::Idle,
        }
    }
}

/// Cloneable handle onto one atomic run state.
#[derive(Debug, Clone)]
pub struct RunStateHandle {
    inner: Arc<AtomicU8>,
}

impl Default for RunStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(RunState::Idle.to_u8())),
        }
    }

    pub fn get(&self) -> RunState {
        RunState::from_u8(self.inner.load(Ordering::SeqCst))
    }

    /// Moves to `next` if the transition is valid from the current state.
    pub fn transition(&self, next: RunState) -> Result<RunState, RunState> {
        let mut current = self.get();
        loop {
            if !current.can_transition_to(next) {
                return Err(current);
            }
            match self.inner.compare_exchange(
                current.to_u8(),
                next.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    tracing::debug!(from = %current, to = %next, "run state transition");
                    return Ok(current);
                }
                Err(actual) => current = RunState::from_u8(actual),
            }
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.get() == RunState::Stopping
    }
}
