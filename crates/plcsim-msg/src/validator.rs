//! ---
//! plcsim_section: "02-messaging-data-model"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Envelope validation and message-id deduplication."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::DateTime;
use parking_lot::Mutex;
use plcsim_common::Quality;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use crate::logging::MessagingMetricsExporter;
use crate::types::{EnvelopeMessage, MessageType};

/// Reasons an envelope is rejected. Rejected messages are never recorded or queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Payload is not a JSON object or a field has the wrong shape.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// `id` missing or empty.
    #[error("message id is missing or empty")]
    MissingId,
    /// `timestamp` missing or not an ISO-8601 instant.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// `equipmentId` missing or empty.
    #[error("equipment id is missing or empty")]
    MissingEquipmentId,
    /// `messageType` outside the four known kinds.
    #[error("unknown message type '{0}'")]
    UnknownMessageType(String),
    /// `tags` array absent.
    #[error("tags array is missing")]
    MissingTags,
    /// A DATA_UPDATE carried no tags.
    #[error("DATA_UPDATE message carries no tags")]
    EmptyTags,
    /// A tag entry lacks its identifier.
    #[error("tag entry {index} has no tagId")]
    MissingTagId {
        /// Position of the entry.
        index: usize,
    },
    /// A tag entry lacks its value.
    #[error("tag entry {index} has no value")]
    MissingTagValue {
        /// Position of the entry.
        index: usize,
    },
    /// A tag entry reports an unknown quality label.
    #[error("tag entry {index} has invalid quality '{quality}'")]
    InvalidQuality {
        /// Position of the entry.
        index: usize,
        /// Offending label.
        quality: String,
    },
    /// The id was already accepted within the dedup window.
    #[error("duplicate message id {0}")]
    DuplicateId(String),
}

/// Seen-id set with two rotating generations.
///
/// Ids stay remembered for at least one TTL and at most two; memory is bounded by
/// the ids accepted within two TTL windows.
#[derive(Debug)]
pub struct DedupSet {
    ttl: Duration,
    current: HashSet<String>,
    previous: HashSet<String>,
    rotated_at: Instant,
}

impl DedupSet {
    /// Empty set rotating every `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self::starting_at(ttl, Instant::now())
    }

    /// Empty set whose first window opens at `now`.
    pub fn starting_at(ttl: Duration, now: Instant) -> Self {
        Self {
            ttl,
            current: HashSet::new(),
            previous: HashSet::new(),
            rotated_at: now,
        }
    }

    /// Whether `id` was recorded within the retained windows.
    pub fn contains(&self, id: &str) -> bool {
        self.current.contains(id) || self.previous.contains(id)
    }

    /// Record `id` at `now`. Returns false when it was already present.
    pub fn insert_at(&mut self, id: &str, now: Instant) -> bool {
        self.rotate_if_due(now);
        if self.contains(id) {
            return false;
        }
        self.current.insert(id.to_owned());
        true
    }

    /// Number of ids currently remembered.
    pub fn len(&self) -> usize {
        self.current.len() + self.previous.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rotate_if_due(&mut self, now: Instant) {
        let age = now.saturating_duration_since(self.rotated_at);
        if age < self.ttl {
            return;
        }
        if age >= self.ttl * 2 {
            self.previous.clear();
            self.current.clear();
        } else {
            self.previous = std::mem::take(&mut self.current);
        }
        debug!(retained = self.previous.len(), "dedup window rotated");
        self.rotated_at = now;
    }
}

/// Schema validation plus global message-id deduplication.
#[derive(Debug)]
pub struct MessageValidator {
    seen: Mutex<DedupSet>,
    metrics: Option<Arc<MessagingMetricsExporter>>,
}

impl MessageValidator {
    /// Validator remembering accepted ids for `dedup_ttl`.
    pub fn new(dedup_ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(DedupSet::new(dedup_ttl)),
            metrics: None,
        }
    }

    /// Count rejections on the given exporter.
    pub fn with_metrics(mut self, metrics: Arc<MessagingMetricsExporter>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate a typed envelope and record its id on success.
    pub fn validate(&self, message: &EnvelopeMessage) -> Result<(), ValidationError> {
        self.validate_at(message, Instant::now())
    }

    /// [`MessageValidator::validate`] with an explicit clock reading.
    pub fn validate_at(&self, message: &EnvelopeMessage, now: Instant) -> Result<(), ValidationError> {
        let outcome = check_structure(message).and_then(|()| {
            if self.seen.lock().insert_at(message.id(), now) {
                Ok(())
            } else {
                Err(ValidationError::DuplicateId(message.id().to_owned()))
            }
        });
        if let Err(err) = &outcome {
            debug!(message_id = %message.id(), error = %err, "message rejected");
            if let Some(metrics) = &self.metrics {
                metrics.observe_rejected();
            }
        }
        outcome
    }

    /// Validate a raw wire payload, returning the typed envelope on success.
    pub fn validate_json(&self, raw: &JsonValue) -> Result<EnvelopeMessage, ValidationError> {
        match parse_checked(raw) {
            Ok(message) => {
                self.validate(&message)?;
                Ok(message)
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.observe_rejected();
                }
                Err(err)
            }
        }
    }

    /// Parse and check a raw broker payload without recording its id.
    ///
    /// Ids recorded earlier are still rejected as duplicates. Callers that hand
    /// messages to a store commit them with [`MessageValidator::record`] once the
    /// store has accepted them, so a failed write leaves the id redeliverable.
    pub fn inspect_bytes(&self, payload: &[u8]) -> Result<EnvelopeMessage, ValidationError> {
        let outcome = serde_json::from_slice::<JsonValue>(payload)
            .map_err(|err| ValidationError::Malformed(err.to_string()))
            .and_then(|raw| parse_checked(&raw))
            .and_then(|message| {
                check_structure(&message)?;
                if self.has_seen(message.id()) {
                    return Err(ValidationError::DuplicateId(message.id().to_owned()));
                }
                Ok(message)
            });
        if let Err(err) = &outcome {
            debug!(error = %err, "payload rejected");
            if let Some(metrics) = &self.metrics {
                metrics.observe_rejected();
            }
        }
        outcome
    }

    /// Mark `id` as consumed. Returns false when it was already recorded.
    pub fn record(&self, id: &str) -> bool {
        self.record_at(id, Instant::now())
    }

    pub fn record_at(&self, id: &str, now: Instant) -> bool {
        self.seen.lock().insert_at(id, now)
    }

    /// Whether `id` has already been accepted.
    pub fn has_seen(&self, id: &str) -> bool {
        self.seen.lock().contains(id)
    }
}

fn parse_checked(raw: &JsonValue) -> Result<EnvelopeMessage, ValidationError> {
    check_raw(raw)?;
    serde_json::from_value::<EnvelopeMessage>(raw.clone()).map_err(|err| ValidationError::Malformed(err.to_string()))
}

fn check_structure(message: &EnvelopeMessage) -> Result<(), ValidationError> {
    if message.id().trim().is_empty() {
        return Err(ValidationError::MissingId);
    }
    if message.equipment_id().trim().is_empty() {
        return Err(ValidationError::MissingEquipmentId);
    }
    if message.message_type() == MessageType::DataUpdate && message.tags().is_empty() {
        return Err(ValidationError::EmptyTags);
    }
    for (index, entry) in message.tags().iter().enumerate() {
        if entry.tag_id.trim().is_empty() {
            return Err(ValidationError::MissingTagId { index });
        }
    }
    Ok(())
}

fn check_raw(raw: &JsonValue) -> Result<(), ValidationError> {
    let object = raw
        .as_object()
        .ok_or_else(|| ValidationError::Malformed("payload is not a JSON object".into()))?;

    match object.get("id").and_then(JsonValue::as_str) {
        Some(id) if !id.trim().is_empty() => {}
        _ => return Err(ValidationError::MissingId),
    }
    match object.get("timestamp").and_then(JsonValue::as_str) {
        Some(ts) => {
            DateTime::parse_from_rfc3339(ts)
                .map_err(|err| ValidationError::InvalidTimestamp(format!("{ts}: {err}")))?;
        }
        None => return Err(ValidationError::InvalidTimestamp("missing".into())),
    }
    match object.get("equipmentId").and_then(JsonValue::as_str) {
        Some(id) if !id.trim().is_empty() => {}
        _ => return Err(ValidationError::MissingEquipmentId),
    }
    let message_type = match object.get("messageType") {
        Some(JsonValue::String(label)) => MessageType::parse(label)
            .ok_or_else(|| ValidationError::UnknownMessageType(label.clone()))?,
        Some(other) => return Err(ValidationError::UnknownMessageType(other.to_string())),
        None => return Err(ValidationError::UnknownMessageType("missing".into())),
    };
    let tags = object
        .get("tags")
        .and_then(JsonValue::as_array)
        .ok_or(ValidationError::MissingTags)?;
    if tags.is_empty() && message_type == MessageType::DataUpdate {
        return Err(ValidationError::EmptyTags);
    }
    for (index, entry) in tags.iter().enumerate() {
        match entry.get("tagId").and_then(JsonValue::as_str) {
            Some(id) if !id.trim().is_empty() => {}
            _ => return Err(ValidationError::MissingTagId { index }),
        }
        match entry.get("value") {
            None | Some(JsonValue::Null) => return Err(ValidationError::MissingTagValue { index }),
            Some(_) => {}
        }
        match entry.get("quality") {
            Some(JsonValue::String(label)) if Quality::parse(label).is_some() => {}
            Some(other) => {
                let quality = other.as_str().map(str::to_owned).unwrap_or_else(|| other.to_string());
                return Err(ValidationError::InvalidQuality { index, quality });
            }
            None => {
                return Err(ValidationError::InvalidQuality {
                    index,
                    quality: "missing".into(),
                })
            }
        }
    }
    Ok(())
}
