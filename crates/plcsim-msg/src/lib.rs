//! ---
//! plcsim_section: "02-messaging-data-model"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Envelope message schema, formatting and validation."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Envelope messages exchanged between the simulator fleet and the ingest side.

pub mod formatter;
pub mod logging;
pub mod types;
pub mod validator;

pub use formatter::{MessageFormatter, ALARM_STATE_FAULT, HEARTBEAT_TAG};
pub use logging::{log_message, MessageDirection, MessagingMetricsExporter};
pub use types::{new_message_id, EnvelopeMessage, MessageType, TagEntry};
pub use validator::{DedupSet, MessageValidator, ValidationError};
