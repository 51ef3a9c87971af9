//! ---
//! plcsim_section: "06-ingest"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Per-equipment queue discovery from line configuration."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use plcsim_common::queue_name;
use plcsim_config::{ConfigError, ConfigurationLoader, ConfigurationSet};
use serde::Serialize;
use tracing::info;

/// A queue the consumer should drain, with the equipment it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueBinding {
    pub queue: String,
    pub equipment_id: String,
    pub site: String,
    pub product_type: String,
    pub line_number: u32,
}

/// Derives queue names from the same line files the producer reads, so no
/// separate registry or broker introspection is needed.
#[derive(Debug, Clone)]
pub struct QueueDiscovery {
    prefix: String,
}

impl QueueDiscovery {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// One binding per equipment, in configuration order.
    pub fn discover(&self, set: &ConfigurationSet) -> Vec<QueueBinding> {
        set.iter()
            .map(|equipment| QueueBinding {
                queue: queue_name(&self.prefix, &equipment.id),
                equipment_id: equipment.id.clone(),
                site: equipment.site.clone(),
                product_type: equipment.product_type.clone(),
                line_number: equipment.line_number,
            })
            .collect()
    }

    /// Load the line directory and discover its queues.
    pub fn discover_from(&self, loader: &ConfigurationLoader) -> Result<Vec<QueueBinding>, ConfigError> {
        let bindings = self.discover(&loader.load()?);
        info!(dir = %loader.dir().display(), queues = bindings.len(), "queues discovered");
        Ok(bindings)
    }
}
