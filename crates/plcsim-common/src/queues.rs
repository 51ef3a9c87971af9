//! ---
//! plcsim_section: "01-core-functionality"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Per-equipment queue naming shared by producer and consumer."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---

/// Prefix prepended to every equipment id to form its queue name.
pub const DEFAULT_QUEUE_PREFIX: &str = "plc_data_";

/// Queue carrying telemetry for a single equipment unit.
pub fn queue_name(prefix: &str, equipment_id: &str) -> String {
    format!("{prefix}{equipment_id}")
}

/// Inverse of [`queue_name`].
pub fn equipment_id_from_queue<'a>(prefix: &str, queue: &'a str) -> Option<&'a str> {
    queue.strip_prefix(prefix).filter(|id| !id.is_empty())
}
