//! ---
//! plcsim_section: "02-messaging-data-model"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Envelope message schema."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use plcsim_common::{EquipmentIdentity, Quality, TagSnapshot, TagValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of envelope carried on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Periodic tag snapshot.
    DataUpdate,
    /// Equipment entered a new state.
    StateChange,
    /// Equipment raised an alarm.
    Alarm,
    /// Liveness signal.
    Heartbeat,
}

impl MessageType {
    /// Wire label of the message type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::DataUpdate => "DATA_UPDATE",
            MessageType::StateChange => "STATE_CHANGE",
            MessageType::Alarm => "ALARM",
            MessageType::Heartbeat => "HEARTBEAT",
        }
    }

    /// Parse a wire label, rejecting anything outside the four known types.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "DATA_UPDATE" => Some(MessageType::DataUpdate),
            "STATE_CHANGE" => Some(MessageType::StateChange),
            "ALARM" => Some(MessageType::Alarm),
            "HEARTBEAT" => Some(MessageType::Heartbeat),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(tagId, value, quality)` entry of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEntry {
    /// Tag identifier, or a synthetic key such as `previous_state`.
    pub tag_id: String,
    /// Reported value.
    pub value: TagValue,
    /// Signal quality.
    pub quality: Quality,
}

impl TagEntry {
    /// Entry with GOOD quality.
    pub fn good(tag_id: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self {
            tag_id: tag_id.into(),
            value: value.into(),
            quality: Quality::Good,
        }
    }
}

impl From<&TagSnapshot> for TagEntry {
    fn from(snapshot: &TagSnapshot) -> Self {
        Self {
            tag_id: snapshot.tag_id.clone(),
            value: snapshot.value.clone(),
            quality: snapshot.quality,
        }
    }
}

/// Self-contained telemetry unit published per tick or event.
///
/// Fields are read-only once constructed; the id doubles as the deduplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMessage {
    id: String,
    timestamp: DateTime<Utc>,
    equipment_id: String,
    site: String,
    product_type: String,
    line_number: u32,
    message_type: MessageType,
    tags: Vec<TagEntry>,
}

impl EnvelopeMessage {
    /// Build an envelope with a fresh time-ordered id and the current time.
    pub fn new(identity: &EquipmentIdentity, message_type: MessageType, tags: Vec<TagEntry>) -> Self {
        Self::with_id(new_message_id(), Utc::now(), identity, message_type, tags)
    }

    /// Build an envelope with an explicit id and timestamp.
    pub fn with_id(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        identity: &EquipmentIdentity,
        message_type: MessageType,
        tags: Vec<TagEntry>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            equipment_id: identity.equipment_id.clone(),
            site: identity.site.clone(),
            product_type: identity.product_type.clone(),
            line_number: identity.line_number,
            message_type,
            tags,
        }
    }

    /// Deduplication key.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation instant.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Source equipment.
    pub fn equipment_id(&self) -> &str {
        &self.equipment_id
    }

    /// Site of the source equipment.
    pub fn site(&self) -> &str {
        &self.site
    }

    /// Product type of the owning line.
    pub fn product_type(&self) -> &str {
        &self.product_type
    }

    /// Number of the owning line.
    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    /// Envelope kind.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Tag entries in emission order.
    pub fn tags(&self) -> &[TagEntry] {
        &self.tags
    }

    /// Look up an entry by tag id.
    pub fn tag(&self, tag_id: &str) -> Option<&TagEntry> {
        self.tags.iter().find(|entry| entry.tag_id == tag_id)
    }

    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Time-ordered (UUID v7) identifier for a new envelope.
pub fn new_message_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plcsim_common::EquipmentType;
    use serde_json::json;

    fn identity() -> EquipmentIdentity {
        EquipmentIdentity {
            equipment_id: "oven1".into(),
            equipment_type: EquipmentType::Oven,
            site: "north".into(),
            product_type: "bread".into(),
            line_id: "line-1".into(),
            line_number: 1,
        }
    }

    #[test]
    fn wire_format_uses_camel_case_and_screaming_types() {
        let timestamp = "2024-05-01T08:00:00Z".parse().unwrap();
        let message = EnvelopeMessage::with_id(
            "msg-1",
            timestamp,
            &identity(),
            MessageType::DataUpdate,
            vec![TagEntry::good("temperature", 351.5), TagEntry::good("heating_status", true)],
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "msg-1",
                "timestamp": "2024-05-01T08:00:00Z",
                "equipmentId": "oven1",
                "site": "north",
                "productType": "bread",
                "lineNumber": 1,
                "messageType": "DATA_UPDATE",
                "tags": [
                    { "tagId": "temperature", "value": 351.5, "quality": "GOOD" },
                    { "tagId": "heating_status", "value": true, "quality": "GOOD" }
                ]
            })
        );
    }

    #[test]
    fn message_ids_are_unique_v7_uuids() {
        let first = new_message_id();
        let second = new_message_id();
        assert_ne!(first, second);
        assert_eq!(Uuid::parse_str(&first).unwrap().get_version_num(), 7);
    }
}
