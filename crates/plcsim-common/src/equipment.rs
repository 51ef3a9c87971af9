//! ---
//! plcsim_section: "01-core-functionality"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Equipment, tag, and state data model."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

/// Kind of production equipment being simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EquipmentType {
    Oven,
    Conveyor,
    Press,
    Assembly,
    #[serde(alias = "oven_conveyor", alias = "ovenConveyor")]
    OvenConveyor,
    #[default]
    #[serde(other)]
    Other,
}

impl EquipmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentType::Oven => "oven",
            EquipmentType::Conveyor => "conveyor",
            EquipmentType::Press => "press",
            EquipmentType::Assembly => "assembly",
            EquipmentType::OvenConveyor => "oven-conveyor",
            EquipmentType::Other => "other",
        }
    }
}

impl fmt::Display for EquipmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PLC data type declared for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    #[default]
    Real,
    Bool,
    Int,
    Dint,
    String,
}

/// Signal quality attached to every tag reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quality {
    #[default]
    Good,
    Bad,
    Uncertain,
}

impl Quality {
    pub fn is_good(&self) -> bool {
        matches!(self, Quality::Good)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Good => "GOOD",
            Quality::Bad => "BAD",
            Quality::Uncertain => "UNCERTAIN",
        }
    }

    /// Parse the wire representation, rejecting anything outside the enum.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "GOOD" => Some(Quality::Good),
            "BAD" => Some(Quality::Bad),
            "UNCERTAIN" => Some(Quality::Uncertain),
            _ => None,
        }
    }
}

/// Runtime value carried by a tag. Serialized as a bare JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl TagValue {
    /// Convert a numeric generator output into the tag's declared data type.
    pub fn from_numeric(value: f64, data_type: DataType) -> Self {
        match data_type {
            DataType::Real => TagValue::Real(value),
            DataType::Int | DataType::Dint => TagValue::Int(value.round() as i64),
            DataType::Bool => TagValue::Bool(value != 0.0),
            DataType::String => TagValue::Text(value.to_string()),
        }
    }

    /// Bring a configured value in line with the tag's declared data type.
    /// Numbers are converted; booleans and text are kept as written.
    pub fn coerce_to(&self, data_type: DataType) -> Self {
        match self {
            TagValue::Int(value) => TagValue::from_numeric(*value as f64, data_type),
            TagValue::Real(value) => TagValue::from_numeric(*value, data_type),
            other => other.clone(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            TagValue::Int(value) => Some(*value as f64),
            TagValue::Real(value) => Some(*value),
            TagValue::Text(text) => text.trim().parse().ok(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TagValue::Bool(_) => "boolean",
            TagValue::Int(_) => "integer",
            TagValue::Real(_) => "float",
            TagValue::Text(_) => "string",
        }
    }
}

impl Default for TagValue {
    fn default() -> Self {
        TagValue::Real(0.0)
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(flag) => write!(f, "{flag}"),
            TagValue::Int(value) => write!(f, "{value}"),
            TagValue::Real(value) => write!(f, "{value}"),
            TagValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Real(value)
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_owned())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Text(value)
    }
}

/// Mathematical rule driving a tag's simulated value.
///
/// Encoded as `{ "type": "...", "parameters": { ... } }`. Periods and step
/// durations are expressed in milliseconds; linear slopes in units per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "lowercase")]
pub enum BehaviorSpec {
    #[serde(rename_all = "camelCase")]
    Sinusoidal {
        min: f64,
        max: f64,
        period: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amplitude: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Linear {
        min: f64,
        max: f64,
        slope: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_value: Option<f64>,
    },
    Random {
        min: f64,
        max: f64,
    },
    #[serde(rename_all = "camelCase")]
    Stepped {
        values: Vec<TagValue>,
        step_duration_ms: u64,
    },
    Constant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<TagValue>,
    },
}

impl BehaviorSpec {
    /// Decode a raw behavior document, degrading to `constant` when the variant
    /// is unknown or its parameters are malformed.
    pub fn from_value(raw: JsonValue) -> Self {
        match serde_json::from_value::<BehaviorSpec>(raw.clone()) {
            Ok(spec) => spec,
            Err(err) => {
                warn!(behavior = %raw, error = %err, "unsupported tag behavior, falling back to constant");
                BehaviorSpec::default()
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BehaviorSpec::Sinusoidal { .. } => "sinusoidal",
            BehaviorSpec::Linear { .. } => "linear",
            BehaviorSpec::Random { .. } => "random",
            BehaviorSpec::Stepped { .. } => "stepped",
            BehaviorSpec::Constant { .. } => "constant",
        }
    }
}

impl Default for BehaviorSpec {
    fn default() -> Self {
        BehaviorSpec::Constant { value: None }
    }
}

fn lenient_behavior<'de, D>(deserializer: D) -> Result<BehaviorSpec, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(JsonValue::Null) => BehaviorSpec::default(),
        Some(value) => BehaviorSpec::from_value(value),
    })
}

/// Single telemetry point exposed by a piece of equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data_type: DataType,
    /// Opaque PLC location string; never interpreted.
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub value: TagValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default, deserialize_with = "lenient_behavior")]
    pub behavior: BehaviorSpec,
}

impl Tag {
    pub fn new(id: impl Into<String>, data_type: DataType, behavior: BehaviorSpec) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            data_type,
            address: String::new(),
            value: TagValue::default(),
            timestamp: None,
            quality: Quality::Good,
            behavior,
        }
    }

    pub fn with_value(mut self, value: impl Into<TagValue>) -> Self {
        self.value = value.into();
        self
    }
}

/// Value forced onto a tag while a state is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagOverride {
    pub tag_id: String,
    pub value: TagValue,
}

impl TagOverride {
    pub fn new(tag_id: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self {
            tag_id: tag_id.into(),
            value: value.into(),
        }
    }
}

/// Outgoing edge of a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub to_state: String,
    /// Advisory label evaluated by external triggers only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Probability of firing per evaluation tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(default, alias = "delay", skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl Transition {
    pub fn to(state: impl Into<String>) -> Self {
        Self {
            to_state: state.into(),
            condition: None,
            probability: None,
            delay_ms: None,
        }
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Whether the core evaluates this transition on its own.
    pub fn is_spontaneous(&self) -> bool {
        self.probability.is_some() || self.delay_ms.is_some()
    }
}

/// Named operational state of a piece of equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tag_overrides: Vec<TagOverride>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

impl StateDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tag_overrides: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn with_override(mut self, tag_override: TagOverride) -> Self {
        self.tag_overrides.push(tag_override);
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn override_for(&self, tag_id: &str) -> Option<&TagValue> {
        self.tag_overrides
            .iter()
            .find(|o| o.tag_id == tag_id)
            .map(|o| &o.value)
    }
}

/// Fully expanded configuration of one equipment unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub equipment_type: EquipmentType,
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub product_type: String,
    #[serde(default)]
    pub line_id: String,
    #[serde(default)]
    pub line_number: u32,
    #[serde(default)]
    pub states: Vec<StateDefinition>,
    #[serde(default)]
    pub current_state: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl EquipmentConfig {
    pub fn state(&self, name: &str) -> Option<&StateDefinition> {
        self.states.iter().find(|state| state.name == name)
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.state(name).is_some()
    }

    pub fn tag(&self, tag_id: &str) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.id == tag_id)
    }

    pub fn identity(&self) -> EquipmentIdentity {
        EquipmentIdentity {
            equipment_id: self.id.clone(),
            equipment_type: self.equipment_type,
            site: self.site.clone(),
            product_type: self.product_type.clone(),
            line_id: self.line_id.clone(),
            line_number: self.line_number,
        }
    }
}

/// Addressing metadata stamped onto every envelope for an equipment unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EquipmentIdentity {
    pub equipment_id: String,
    pub equipment_type: EquipmentType,
    pub site: String,
    pub product_type: String,
    pub line_id: String,
    pub line_number: u32,
}

/// Point-in-time reading of a tag as produced by a simulator tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagSnapshot {
    pub tag_id: String,
    pub value: TagValue,
    pub quality: Quality,
    pub timestamp: DateTime<Utc>,
}
