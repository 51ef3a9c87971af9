//! ---
//! plcsim_section: "01-core-functionality"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Shared primitives and utilities for the simulation runtime."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
//! Core shared primitives for the plcsim workspace.
//! This crate exposes the equipment data model, runtime configuration loading,
//! queue naming, and tracing bootstrap consumed across the workspace.

pub mod config;
pub mod equipment;
pub mod logging;
pub mod queues;
pub mod time;

pub use config::{
    AppConfig, IngestConfig, LoggingConfig, PublisherConfig, SimulationConfig, ValidationConfig,
};
pub use equipment::{
    BehaviorSpec, DataType, EquipmentConfig, EquipmentIdentity, EquipmentType, Quality,
    StateDefinition, Tag, TagOverride, TagSnapshot, TagValue, Transition,
};
pub use logging::{init_tracing, LogFormat};
pub use queues::{equipment_id_from_queue, queue_name, DEFAULT_QUEUE_PREFIX};
