//! ---
//! plcsim_section: "04-configuration"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "On-disk line definition schema."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use plcsim_common::{EquipmentType, StateDefinition, Tag};
use serde::{Deserialize, Deserializer, Serialize};

/// A production line file: one line, several equipment units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub site: String,
    /// Product type manufactured on the line.
    #[serde(rename = "type", default)]
    pub product_type: String,
    #[serde(rename = "line", default, deserialize_with = "line_number")]
    pub line_number: u32,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub efficiency: Option<f64>,
    #[serde(default)]
    pub equipment: Vec<EquipmentDefinition>,
}

/// Equipment entry as written inside a line file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub equipment_type: EquipmentType,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Explicit state machine; synthesized when absent or empty.
    #[serde(default)]
    pub states: Vec<StateDefinition>,
    #[serde(default)]
    pub current_state: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLineNumber {
    Number(u32),
    Text(String),
}

fn line_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match RawLineNumber::deserialize(deserializer)? {
        RawLineNumber::Number(number) => Ok(number),
        RawLineNumber::Text(text) => text
            .trim()
            .trim_start_matches(|c: char| !c.is_ascii_digit())
            .parse()
            .map_err(serde::de::Error::custom),
    }
}
