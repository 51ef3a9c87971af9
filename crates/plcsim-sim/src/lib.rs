//! ---
//! plcsim_section: "11-simulation"
//! plcsim_subsection: "01-bootstrap"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Simulation runtime module exports and shared types."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
//! Equipment simulation for the plcsim project.
//!
//! Each simulated unit pairs a [`StateMachine`] with one [`TagGenerator`] per tag;
//! [`EquipmentSimulator`] ties them together and reports state changes.

pub mod generator;
pub mod simulator;
pub mod state_machine;

use thiserror::Error;

pub use generator::{evaluate, TagGenerator};
pub use simulator::{EquipmentSimulator, SimulatorOptions, StateChangeEvent};
pub use state_machine::{StateMachine, TransitionOutcome};

/// Errors raised while driving a simulator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("equipment '{equipment_id}' has no state named '{state}'")]
    UnknownState { equipment_id: String, state: String },
    #[error("equipment '{equipment_id}' declares no states")]
    NoStates { equipment_id: String },
}

pub type Result<T> = std::result::Result<T, SimulationError>;
