//! ---
//! plcsim_section: "11-simulation"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Finite state machine driving equipment operational states."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use plcsim_common::StateDefinition;
use rand::Rng;
use tracing::warn;

use crate::{Result, SimulationError};

/// Previous and current state names after an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub previous: String,
    pub current: String,
}

/// Operational state machine with exactly one active state and no terminal state.
///
/// Only `probability` and `delay_ms` transitions fire spontaneously. Condition-only
/// transitions are labels for external triggers and are never evaluated here.
#[derive(Debug, Clone)]
pub struct StateMachine {
    equipment_id: String,
    states: Vec<StateDefinition>,
    current: usize,
    entered_at_ms: u64,
}

impl StateMachine {
    pub fn new(
        equipment_id: impl Into<String>,
        states: Vec<StateDefinition>,
        initial: &str,
        now_ms: u64,
    ) -> Result<Self> {
        let equipment_id = equipment_id.into();
        if states.is_empty() {
            return Err(SimulationError::NoStates { equipment_id });
        }
        let current = states
            .iter()
            .position(|state| state.name == initial)
            .ok_or_else(|| SimulationError::UnknownState {
                equipment_id: equipment_id.clone(),
                state: initial.to_owned(),
            })?;
        Ok(Self {
            equipment_id,
            states,
            current,
            entered_at_ms: now_ms,
        })
    }

    pub fn current(&self) -> &StateDefinition {
        &self.states[self.current]
    }

    pub fn current_name(&self) -> &str {
        &self.states[self.current].name
    }

    pub fn states(&self) -> &[StateDefinition] {
        &self.states
    }

    pub fn state(&self, name: &str) -> Option<&StateDefinition> {
        self.states.iter().find(|state| state.name == name)
    }

    pub fn entered_at_ms(&self) -> u64 {
        self.entered_at_ms
    }

    pub fn time_in_state(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.entered_at_ms)
    }

    /// Pick the spontaneous transition that fires at `now_ms`, if any.
    ///
    /// Transitions are tried in declared order and the first to fire wins. A delay
    /// gates the transition; a probability is then drawn once per call.
    pub fn evaluate<R: Rng>(&self, now_ms: u64, rng: &mut R) -> Option<&str> {
        let dwell = self.time_in_state(now_ms);
        for transition in &self.current().transitions {
            if !transition.is_spontaneous() {
                continue;
            }
            if let Some(delay) = transition.delay_ms {
                if dwell < delay {
                    continue;
                }
            }
            let fires = match transition.probability {
                Some(probability) => rng.gen_bool(probability.clamp(0.0, 1.0)),
                None => true,
            };
            if !fires {
                continue;
            }
            if self.state(&transition.to_state).is_none() {
                warn!(
                    equipment_id = %self.equipment_id,
                    target = %transition.to_state,
                    "skipping transition to undefined state"
                );
                continue;
            }
            return Some(&transition.to_state);
        }
        None
    }

    /// Enter `name`, restarting the dwell timer. Re-entering the active state is allowed.
    pub fn enter(&mut self, name: &str, now_ms: u64) -> Result<TransitionOutcome> {
        let next = self
            .states
            .iter()
            .position(|state| state.name == name)
            .ok_or_else(|| SimulationError::UnknownState {
                equipment_id: self.equipment_id.clone(),
                state: name.to_owned(),
            })?;
        let previous = self.current_name().to_owned();
        self.current = next;
        self.entered_at_ms = now_ms;
        Ok(TransitionOutcome {
            previous,
            current: name.to_owned(),
        })
    }
}
