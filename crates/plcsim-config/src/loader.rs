//! ---
//! plcsim_section: "04-configuration"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Line directory loader, expansion and referential validation."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use plcsim_common::{
    DataType, EquipmentConfig, StateDefinition, Tag, TagOverride, TagValue, Transition,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::line::{EquipmentDefinition, LineDefinition};
use crate::{ConfigError, Result};

const RUNNING: &str = "running";
const STOPPED: &str = "stopped";
const FAULT: &str = "fault";

/// One validated configuration generation.
#[derive(Debug, Clone)]
pub struct ConfigurationSet {
    /// Flattened equipment keyed by id, in file then declaration order.
    pub equipment: IndexMap<String, EquipmentConfig>,
    /// SHA-256 over the raw source files.
    pub digest: String,
    pub sources: Vec<PathBuf>,
    pub loaded_at: DateTime<Utc>,
}

impl ConfigurationSet {
    pub fn from_equipment(equipment: Vec<EquipmentConfig>) -> Self {
        Self {
            equipment: equipment.into_iter().map(|e| (e.id.clone(), e)).collect(),
            digest: String::new(),
            sources: Vec::new(),
            loaded_at: Utc::now(),
        }
    }

    pub fn get(&self, equipment_id: &str) -> Option<&EquipmentConfig> {
        self.equipment.get(equipment_id)
    }

    pub fn equipment_ids(&self) -> impl Iterator<Item = &str> {
        self.equipment.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EquipmentConfig> {
        self.equipment.values()
    }

    pub fn len(&self) -> usize {
        self.equipment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equipment.is_empty()
    }
}

/// Reads every `*.json` line file in a directory.
#[derive(Debug, Clone)]
pub struct ConfigurationLoader {
    dir: PathBuf,
}

impl ConfigurationLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load, expand and validate the whole directory.
    pub fn load(&self) -> Result<ConfigurationSet> {
        let sources = self.read_sources()?;
        let digest = digest_sources(&sources);
        let mut lines = Vec::with_capacity(sources.len());
        for (path, contents) in &sources {
            let line: LineDefinition =
                serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
            lines.push(line);
        }
        let equipment = expand_lines(&lines);
        validate(&equipment, &lines)?;

        let set = ConfigurationSet {
            equipment: equipment.into_iter().map(|e| (e.id.clone(), e)).collect(),
            digest,
            sources: sources.into_iter().map(|(path, _)| path).collect(),
            loaded_at: Utc::now(),
        };
        info!(
            dir = %self.dir.display(),
            lines = lines.len(),
            equipment = set.len(),
            digest = %set.digest,
            "line configuration loaded"
        );
        Ok(set)
    }

    /// Digest of the current directory contents without parsing them.
    pub fn digest(&self) -> Result<String> {
        Ok(digest_sources(&self.read_sources()?))
    }

    fn read_sources(&self) -> Result<Vec<(PathBuf, String)>> {
        let io_error = |path: &Path, source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))? {
            let path = entry.map_err(|e| io_error(&self.dir, e))?.path();
            let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
            if is_json && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        if paths.is_empty() {
            return Err(ConfigError::Validation {
                problems: vec![format!(
                    "no line definition files found in {}",
                    self.dir.display()
                )],
            });
        }
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let contents = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
            debug!(path = %path.display(), bytes = contents.len(), "read line definition");
            sources.push((path, contents));
        }
        Ok(sources)
    }
}

fn digest_sources(sources: &[(PathBuf, String)]) -> String {
    let mut hasher = Sha256::new();
    for (path, contents) in sources {
        if let Some(name) = path.file_name() {
            hasher.update(name.to_string_lossy().as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(contents.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

fn expand_lines(lines: &[LineDefinition]) -> Vec<EquipmentConfig> {
    lines
        .iter()
        .flat_map(|line| line.equipment.iter().map(move |def| expand(line, def)))
        .collect()
}

fn expand(line: &LineDefinition, def: &EquipmentDefinition) -> EquipmentConfig {
    let states = if def.states.is_empty() {
        default_states(&def.tags)
    } else {
        def.states.clone()
    };
    let current_state = def
        .current_state
        .clone()
        .or_else(|| {
            def.status
                .as_ref()
                .filter(|status| states.iter().any(|s| &s.name == *status))
                .cloned()
        })
        .or_else(|| {
            states
                .iter()
                .find(|s| s.name == RUNNING)
                .or_else(|| states.first())
                .map(|s| s.name.clone())
        })
        .unwrap_or_default();
    EquipmentConfig {
        id: def.id.clone(),
        name: def.name.clone(),
        equipment_type: def.equipment_type,
        site: line.site.clone(),
        product_type: line.product_type.clone(),
        line_id: line.id.clone(),
        line_number: line.line_number,
        states,
        current_state,
        tags: def.tags.clone(),
    }
}

/// Three-state machine for equipment that declares none.
///
/// `running` drifts to `stopped` (p=0.005) or `fault` (p=0.001) per tick;
/// `stopped` recovers after 30 s and `fault` after 60 s. Both non-running states
/// force BOOL tags to false; `stopped` also pins numeric tags to their static value.
pub fn default_states(tags: &[Tag]) -> Vec<StateDefinition> {
    let running = StateDefinition::new(RUNNING, "Equipment running normally")
        .with_transition(Transition::to(STOPPED).with_probability(0.005))
        .with_transition(Transition::to(FAULT).with_probability(0.001));

    let mut stopped = StateDefinition::new(STOPPED, "Equipment stopped")
        .with_transition(Transition::to(RUNNING).with_delay_ms(30_000));
    let mut fault = StateDefinition::new(FAULT, "Equipment fault detected")
        .with_transition(Transition::to(RUNNING).with_delay_ms(60_000));

    for tag in tags {
        match tag.data_type {
            DataType::Bool => {
                stopped.tag_overrides.push(TagOverride::new(&tag.id, false));
                fault.tag_overrides.push(TagOverride::new(&tag.id, false));
            }
            DataType::Real | DataType::Int | DataType::Dint => {
                if matches!(tag.value, TagValue::Int(_) | TagValue::Real(_)) {
                    stopped
                        .tag_overrides
                        .push(TagOverride::new(&tag.id, tag.value.clone()));
                }
            }
            DataType::String => {}
        }
    }
    vec![running, stopped, fault]
}

fn validate(equipment: &[EquipmentConfig], lines: &[LineDefinition]) -> Result<()> {
    let mut problems = Vec::new();
    let mut seen_ids = HashSet::new();

    for line in lines {
        if line.id.trim().is_empty() {
            problems.push("line id may not be empty".to_owned());
        }
    }

    for unit in equipment {
        let id = &unit.id;
        if id.trim().is_empty() {
            problems.push(format!("line '{}' has equipment with empty id", unit.line_id));
        } else if !seen_ids.insert(id.clone()) {
            problems.push(format!("duplicate equipment id '{id}'"));
        }

        let mut tag_ids = HashSet::new();
        for tag in &unit.tags {
            if tag.id.trim().is_empty() {
                problems.push(format!("equipment '{id}' has tag with empty id"));
            } else if !tag_ids.insert(tag.id.as_str()) {
                problems.push(format!("equipment '{id}' has duplicate tag id '{}'", tag.id));
            }
        }

        let mut state_names = HashSet::new();
        for state in &unit.states {
            if !state_names.insert(state.name.as_str()) {
                problems.push(format!(
                    "equipment '{id}' has duplicate state '{}'",
                    state.name
                ));
            }
        }

        if !state_names.contains(unit.current_state.as_str()) {
            problems.push(format!(
                "equipment '{id}' current state '{}' is not defined",
                unit.current_state
            ));
        }

        for state in &unit.states {
            for tag_override in &state.tag_overrides {
                if !tag_ids.contains(tag_override.tag_id.as_str()) {
                    problems.push(format!(
                        "equipment '{id}' state '{}' overrides unknown tag '{}'",
                        state.name, tag_override.tag_id
                    ));
                }
            }
            for transition in &state.transitions {
                if !state_names.contains(transition.to_state.as_str()) {
                    problems.push(format!(
                        "equipment '{id}' state '{}' transitions to unknown state '{}'",
                        state.name, transition.to_state
                    ));
                }
                if let Some(probability) = transition.probability {
                    if !(0.0..=1.0).contains(&probability) {
                        problems.push(format!(
                            "equipment '{id}' state '{}' transition probability {probability} outside [0, 1]",
                            state.name
                        ));
                    }
                }
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation { problems })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn write(dir: &Path, name: &str, value: &Value) {
        fs::write(dir.join(name), serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    fn bakery_line() -> Value {
        json!({
            "id": "line-1",
            "name": "Bread line",
            "site": "north",
            "type": "bread",
            "line": 1,
            "status": "running",
            "efficiency": 0.93,
            "equipment": [
                {
                    "id": "oven1",
                    "name": "Tunnel oven",
                    "type": "oven",
                    "status": "stopped",
                    "tags": [
                        { "id": "temperature", "dataType": "REAL", "value": 350.0,
                          "behavior": { "type": "sinusoidal",
                                        "parameters": { "min": 300, "max": 400, "period": 120000 } } },
                        { "id": "heating_status", "dataType": "BOOL", "value": true }
                    ]
                },
                {
                    "id": "press3",
                    "type": "press",
                    "tags": [ { "id": "force", "dataType": "INT", "value": 12 } ]
                }
            ]
        })
    }

    #[test]
    fn load_expands_equipment_with_line_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "line-1.json", &bakery_line());
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let set = ConfigurationLoader::new(dir.path()).load().unwrap();
        assert_eq!(set.equipment_ids().collect::<Vec<_>>(), vec!["oven1", "press3"]);
        assert_eq!(set.sources.len(), 1);
        assert_eq!(set.digest.len(), 64);

        let oven = set.get("oven1").unwrap();
        assert_eq!(oven.site, "north");
        assert_eq!(oven.product_type, "bread");
        assert_eq!(oven.line_id, "line-1");
        assert_eq!(oven.line_number, 1);
        assert_eq!(oven.current_state, "stopped");
        let names: Vec<_> = oven.states.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["running", "stopped", "fault"]);

        let stopped = oven.state("stopped").unwrap();
        assert_eq!(stopped.override_for("heating_status"), Some(&TagValue::Bool(false)));
        assert_eq!(stopped.override_for("temperature"), Some(&TagValue::Real(350.0)));
        assert_eq!(stopped.transitions[0].delay_ms, Some(30_000));
        let fault = oven.state("fault").unwrap();
        assert_eq!(fault.override_for("temperature"), None);
        assert_eq!(fault.transitions[0].delay_ms, Some(60_000));

        assert_eq!(set.get("press3").unwrap().current_state, "running");
    }

    #[test]
    fn validation_collects_every_problem() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.json", &bakery_line());
        write(
            dir.path(),
            "b.json",
            &json!({
                "id": "line-2",
                "line": 2,
                "equipment": [
                    { "id": "press3", "tags": [] },
                    {
                        "id": "conv1",
                        "type": "conveyor",
                        "tags": [ { "id": "speed" }, { "id": "speed" } ],
                        "currentState": "idle",
                        "states": [
                            { "name": "moving",
                              "tagOverrides": [ { "tagId": "ghost", "value": 1 } ],
                              "transitions": [ { "toState": "nowhere", "probability": 1.5 } ] }
                        ]
                    }
                ]
            }),
        );

        let err = ConfigurationLoader::new(dir.path()).load().unwrap_err();
        let problems = match err {
            ConfigError::Validation { problems } => problems,
            other => panic!("expected validation error, got {other:?}"),
        };
        let joined = problems.join("\n");
        assert!(joined.contains("duplicate equipment id 'press3'"));
        assert!(joined.contains("duplicate tag id 'speed'"));
        assert!(joined.contains("current state 'idle'"));
        assert!(joined.contains("unknown tag 'ghost'"));
        assert!(joined.contains("unknown state 'nowhere'"));
        assert!(joined.contains("outside [0, 1]"));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        match ConfigurationLoader::new(dir.path()).load() {
            Err(ConfigError::Parse { path, .. }) => assert!(path.ends_with("broken.json")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigurationLoader::new(dir.path().join("absent"));
        assert!(matches!(loader.load(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn digest_tracks_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "line-1.json", &bakery_line());
        let loader = ConfigurationLoader::new(dir.path());
        let first = loader.digest().unwrap();
        assert_eq!(first, loader.load().unwrap().digest);
        assert_eq!(first, loader.digest().unwrap());

        let mut changed = bakery_line();
        changed["efficiency"] = json!(0.5);
        write(dir.path(), "line-1.json", &changed);
        assert_ne!(first, loader.digest().unwrap());
    }
}
