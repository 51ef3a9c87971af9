//! ---
//! plcsim_section: "02-messaging-data-model"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Builders for the four envelope message kinds."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use plcsim_common::{EquipmentIdentity, TagSnapshot};

use crate::logging::MessagingMetricsExporter;
use crate::types::{EnvelopeMessage, MessageType, TagEntry};
use crate::validator::{MessageValidator, ValidationError};

/// Tag id of the single boolean entry in a HEARTBEAT message.
pub const HEARTBEAT_TAG: &str = "heartbeat";
/// Alarm type raised when equipment enters its fault state.
pub const ALARM_STATE_FAULT: &str = "STATE_FAULT";

const PREVIOUS_STATE_TAG: &str = "previous_state";
const CURRENT_STATE_TAG: &str = "current_state";
const ALARM_TYPE_TAG: &str = "alarm_type";
const ALARM_MESSAGE_TAG: &str = "alarm_message";

/// Builds envelopes and runs each through the validator before handing it out.
///
/// A message that fails validation is returned as an error and must be dropped.
#[derive(Debug)]
pub struct MessageFormatter {
    validator: MessageValidator,
}

impl MessageFormatter {
    /// Formatter deduplicating ids for `dedup_ttl`.
    pub fn new(dedup_ttl: Duration) -> Self {
        Self {
            validator: MessageValidator::new(dedup_ttl),
        }
    }

    /// Count rejected messages on `metrics`.
    pub fn with_metrics(self, metrics: Arc<MessagingMetricsExporter>) -> Self {
        Self {
            validator: self.validator.with_metrics(metrics),
        }
    }

    /// Validator shared by every builder.
    pub fn validator(&self) -> &MessageValidator {
        &self.validator
    }

    /// DATA_UPDATE with one entry per snapshot, in snapshot order.
    pub fn data_update(
        &self,
        identity: &EquipmentIdentity,
        snapshots: &[TagSnapshot],
    ) -> Result<EnvelopeMessage, ValidationError> {
        let tags = snapshots.iter().map(TagEntry::from).collect();
        self.finish(EnvelopeMessage::new(identity, MessageType::DataUpdate, tags))
    }

    /// STATE_CHANGE carrying the previous and current state names.
    pub fn state_change(
        &self,
        identity: &EquipmentIdentity,
        previous_state: &str,
        current_state: &str,
    ) -> Result<EnvelopeMessage, ValidationError> {
        let tags = vec![
            TagEntry::good(PREVIOUS_STATE_TAG, previous_state),
            TagEntry::good(CURRENT_STATE_TAG, current_state),
        ];
        self.finish(EnvelopeMessage::new(identity, MessageType::StateChange, tags))
    }

    /// HEARTBEAT with a single `heartbeat = true` entry.
    pub fn heartbeat(&self, identity: &EquipmentIdentity) -> Result<EnvelopeMessage, ValidationError> {
        let tags = vec![TagEntry::good(HEARTBEAT_TAG, true)];
        self.finish(EnvelopeMessage::new(identity, MessageType::Heartbeat, tags))
    }

    /// ALARM with type and human-readable text.
    pub fn alarm(
        &self,
        identity: &EquipmentIdentity,
        alarm_type: &str,
        message: &str,
    ) -> Result<EnvelopeMessage, ValidationError> {
        let tags = vec![
            TagEntry::good(ALARM_TYPE_TAG, alarm_type),
            TagEntry::good(ALARM_MESSAGE_TAG, message),
        ];
        self.finish(EnvelopeMessage::new(identity, MessageType::Alarm, tags))
    }

    fn finish(&self, message: EnvelopeMessage) -> Result<EnvelopeMessage, ValidationError> {
        self.validator.validate(&message)?;
        Ok(message)
    }
}
