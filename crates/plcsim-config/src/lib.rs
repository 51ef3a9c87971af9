//! ---
//! plcsim_section: "04-configuration"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Configuration loading and hot reload."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
//! Line definition loading for the plcsim fleet.
//!
//! [`ConfigurationLoader`] turns a directory of line files into a flat, validated
//! [`ConfigurationSet`]; [`ConfigWatcher`] re-runs it whenever the directory changes.

pub mod line;
pub mod loader;
pub mod watcher;

use std::path::PathBuf;

use thiserror::Error;

pub use line::{EquipmentDefinition, LineDefinition};
pub use loader::{default_states, ConfigurationLoader, ConfigurationSet};
pub use watcher::{ConfigWatcher, ReloadEvent};

/// Errors raised while loading or watching line definitions.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration at {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("configuration validation failed:\n{}", .problems.join("\n"))]
    Validation { problems: Vec<String> },
    #[error("configuration watcher failed: {0}")]
    Watch(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
