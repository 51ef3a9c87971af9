//! ---
//! plcsim_section: "11-simulation"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Per-equipment simulator binding state machine and tag generators."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use plcsim_common::time::elapsed_millis;
use plcsim_common::{EquipmentConfig, EquipmentIdentity, Quality, TagSnapshot, TagValue};
use plcsim_logging::{plc_info, LogContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::generator::TagGenerator;
use crate::state_machine::{StateMachine, TransitionOutcome};
use crate::Result;

/// Emitted whenever a simulator enters a state, spontaneously or by force.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeEvent {
    pub equipment_id: String,
    pub previous_state: String,
    pub current_state: String,
    pub timestamp: DateTime<Utc>,
    pub forced: bool,
}

/// Tunables applied to every simulator built by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorOptions {
    /// Per-tag probability of reporting BAD quality on a tick.
    pub bad_quality_probability: f64,
    /// Seed mixed with the equipment id; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            bad_quality_probability: 0.02,
            seed: None,
        }
    }
}

/// Simulates a single equipment unit.
///
/// Owns the state machine and one generator per tag. All time-dependent operations
/// have an `*_at(elapsed_ms)` form measured from simulator creation; the plain forms
/// read the wall clock.
#[derive(Debug)]
pub struct EquipmentSimulator {
    config: EquipmentConfig,
    machine: StateMachine,
    generators: Vec<TagGenerator>,
    baselines: Vec<TagValue>,
    rng: StdRng,
    bad_quality_probability: f64,
    origin: Instant,
    events: Option<UnboundedSender<StateChangeEvent>>,
}

impl EquipmentSimulator {
    pub fn new(config: EquipmentConfig, options: SimulatorOptions) -> Result<Self> {
        let machine = StateMachine::new(
            config.id.clone(),
            config.states.clone(),
            &config.current_state,
            0,
        )?;
        let generators = config
            .tags
            .iter()
            .map(|tag| TagGenerator::new(tag.behavior.clone(), tag.data_type))
            .collect();
        let baselines = config.tags.iter().map(|tag| tag.value.clone()).collect();
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ fnv1a(&config.id)),
            None => StdRng::from_entropy(),
        };
        let mut simulator = Self {
            config,
            machine,
            generators,
            baselines,
            rng,
            bad_quality_probability: options.bad_quality_probability.clamp(0.0, 1.0),
            origin: Instant::now(),
            events: None,
        };
        simulator.apply_overrides();
        debug!(
            equipment_id = %simulator.config.id,
            state = %simulator.machine.current_name(),
            tags = simulator.generators.len(),
            "simulator created"
        );
        Ok(simulator)
    }

    /// Register the channel state-change events are pushed onto.
    pub fn set_event_sender(&mut self, sender: UnboundedSender<StateChangeEvent>) {
        self.events = Some(sender);
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &EquipmentConfig {
        &self.config
    }

    pub fn identity(&self) -> EquipmentIdentity {
        self.config.identity()
    }

    pub fn current_state(&self) -> &str {
        self.machine.current_name()
    }

    pub fn state_description(&self, name: &str) -> Option<&str> {
        self.machine.state(name).map(|state| state.description.as_str())
    }

    pub fn tag_value(&self, tag_id: &str) -> Option<&TagValue> {
        self.config.tag(tag_id).map(|tag| &tag.value)
    }

    pub fn generator(&self, tag_id: &str) -> Option<&TagGenerator> {
        let index = self.config.tags.iter().position(|tag| tag.id == tag_id)?;
        self.generators.get(index)
    }

    pub fn elapsed_ms(&self) -> u64 {
        elapsed_millis(self.origin)
    }

    pub fn generate_tag_values(&mut self) -> Vec<TagSnapshot> {
        let now = self.elapsed_ms();
        self.generate_tag_values_at(now)
    }

    /// Advance every tag to `elapsed_ms`, substituting active overrides.
    pub fn generate_tag_values_at(&mut self, elapsed_ms: u64) -> Vec<TagSnapshot> {
        let timestamp = Utc::now();
        let state = self.machine.current();
        let mut snapshots = Vec::with_capacity(self.config.tags.len());
        // Generators fall back to the configured value, never the last emitted one.
        let tags = self.config.tags.iter_mut().zip(&self.generators).zip(&self.baselines);
        for ((tag, generator), baseline) in tags {
            let value = match state.override_for(&tag.id) {
                Some(forced) => forced.coerce_to(tag.data_type),
                None => generator.value_at(elapsed_ms, baseline, &mut self.rng),
            };
            let quality = if self.rng.gen_bool(self.bad_quality_probability) {
                Quality::Bad
            } else {
                Quality::Good
            };
            tag.value = value.clone();
            tag.timestamp = Some(timestamp);
            tag.quality = quality;
            snapshots.push(TagSnapshot {
                tag_id: tag.id.clone(),
                value,
                quality,
                timestamp,
            });
        }
        snapshots
    }

    pub fn check_state_transitions(&mut self) -> Option<StateChangeEvent> {
        let now = self.elapsed_ms();
        self.check_state_transitions_at(now)
    }

    /// Evaluate spontaneous transitions of the active state at `elapsed_ms`.
    pub fn check_state_transitions_at(&mut self, elapsed_ms: u64) -> Option<StateChangeEvent> {
        let target = self
            .machine
            .evaluate(elapsed_ms, &mut self.rng)?
            .to_owned();
        let outcome = self.machine.enter(&target, elapsed_ms).ok()?;
        let bound: HashSet<String> = self
            .machine
            .current()
            .tag_overrides
            .iter()
            .map(|o| o.tag_id.clone())
            .collect();
        for (tag, generator) in self.config.tags.iter().zip(self.generators.iter_mut()) {
            if bound.contains(&tag.id) {
                generator.reset(elapsed_ms);
            }
        }
        Some(self.finish_transition(outcome, false))
    }

    pub fn force_state_transition(&mut self, name: &str) -> Result<StateChangeEvent> {
        let now = self.elapsed_ms();
        self.force_state_transition_at(name, now)
    }

    /// Enter `name` unconditionally. Unknown names leave the simulator untouched.
    pub fn force_state_transition_at(
        &mut self,
        name: &str,
        elapsed_ms: u64,
    ) -> Result<StateChangeEvent> {
        let outcome = self.machine.enter(name, elapsed_ms)?;
        for generator in &mut self.generators {
            generator.reset(elapsed_ms);
        }
        Ok(self.finish_transition(outcome, true))
    }

    fn finish_transition(&mut self, outcome: TransitionOutcome, forced: bool) -> StateChangeEvent {
        self.apply_overrides();
        self.config.current_state = outcome.current.clone();
        let event = StateChangeEvent {
            equipment_id: self.config.id.clone(),
            previous_state: outcome.previous,
            current_state: outcome.current,
            timestamp: Utc::now(),
            forced,
        };
        let ctx = LogContext::new()
            .with_site(&self.config.site)
            .with_line(&self.config.line_id)
            .with_equipment(&event.equipment_id)
            .with_state(&event.current_state);
        plc_info!(
            context = ctx,
            "equipment state changed from {} (forced: {})",
            event.previous_state,
            forced
        );
        if let Some(sender) = &self.events {
            if sender.send(event.clone()).is_err() {
                debug!(equipment_id = %event.equipment_id, "state change receiver dropped");
                self.events = None;
            }
        }
        event
    }

    fn apply_overrides(&mut self) {
        let state = self.machine.current();
        for tag in &mut self.config.tags {
            if let Some(value) = state.override_for(&tag.id) {
                tag.value = value.coerce_to(tag.data_type);
            }
        }
    }
}

fn fnv1a(input: &str) -> u64 {
    input.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use plcsim_common::{
        BehaviorSpec, DataType, EquipmentType, StateDefinition, Tag, TagOverride, Transition,
    };

    fn oven() -> EquipmentConfig {
        EquipmentConfig {
            id: "oven1".into(),
            name: "Oven 1".into(),
            equipment_type: EquipmentType::Oven,
            site: "north".into(),
            product_type: "bread".into(),
            line_id: "line-1".into(),
            line_number: 1,
            current_state: "running".into(),
            states: vec![
                StateDefinition::new("running", "baking")
                    .with_transition(Transition::to("fault").with_probability(0.0)),
                StateDefinition::new("fault", "burner tripped")
                    .with_override(TagOverride::new("heating_status", false))
                    .with_override(TagOverride::new("temperature", 25.0))
                    .with_transition(Transition::to("running").with_delay_ms(60_000)),
            ],
            tags: vec![
                Tag::new(
                    "temperature",
                    DataType::Real,
                    BehaviorSpec::Sinusoidal {
                        min: 300.0,
                        max: 400.0,
                        period: 120_000.0,
                        amplitude: None,
                        offset: Some(350.0),
                    },
                )
                .with_value(350.0),
                Tag::new("heating_status", DataType::Bool, BehaviorSpec::default()).with_value(true),
                Tag::new(
                    "recipe_step",
                    DataType::Int,
                    BehaviorSpec::Stepped {
                        values: vec![TagValue::Int(1), TagValue::Int(2)],
                        step_duration_ms: 1_000,
                    },
                ),
            ],
        }
    }

    fn seeded(bad_quality_probability: f64) -> SimulatorOptions {
        SimulatorOptions {
            bad_quality_probability,
            seed: Some(42),
        }
    }

    #[test]
    fn running_oven_stays_within_sinusoid_bounds() {
        let mut sim = EquipmentSimulator::new(oven(), seeded(0.0)).unwrap();
        for t in (0..=200_000u64).step_by(1_000) {
            let snapshots = sim.generate_tag_values_at(t);
            let temperature = snapshots.iter().find(|s| s.tag_id == "temperature").unwrap();
            let value = temperature.value.as_f64().unwrap();
            assert!((300.0..=400.0).contains(&value));
            assert!(snapshots.iter().all(|s| s.quality == Quality::Good));
        }
    }

    #[test]
    fn forced_fault_applies_overrides_immediately() {
        let mut sim = EquipmentSimulator::new(oven(), seeded(0.0)).unwrap();
        sim.generate_tag_values_at(10_000);
        let event = sim.force_state_transition_at("fault", 10_000).unwrap();
        assert_eq!(event.previous_state, "running");
        assert_eq!(event.current_state, "fault");
        assert!(event.forced);
        assert_eq!(sim.current_state(), "fault");
        assert_eq!(sim.config().current_state, "fault");
        assert_eq!(sim.tag_value("heating_status"), Some(&TagValue::Bool(false)));
        assert_eq!(sim.tag_value("temperature"), Some(&TagValue::Real(25.0)));

        let snapshots = sim.generate_tag_values_at(10_500);
        assert_eq!(snapshots[0].value, TagValue::Real(25.0));
        assert_eq!(snapshots[1].value, TagValue::Bool(false));
    }

    #[test]
    fn integer_override_on_real_tag_stays_real() {
        let mut config = oven();
        config.states.push(
            StateDefinition::new("stopped", "idle")
                .with_override(TagOverride::new("temperature", 120_i64))
                .with_override(TagOverride::new("recipe_step", 2.6)),
        );
        let mut sim = EquipmentSimulator::new(config, seeded(0.0)).unwrap();
        let running = sim.generate_tag_values_at(1_000);
        assert!(matches!(running[0].value, TagValue::Real(_)));

        sim.force_state_transition_at("stopped", 1_000).unwrap();
        assert_eq!(sim.tag_value("temperature"), Some(&TagValue::Real(120.0)));
        assert_eq!(sim.tag_value("recipe_step"), Some(&TagValue::Int(3)));
        let stopped = sim.generate_tag_values_at(1_500);
        assert_eq!(stopped[0].value, TagValue::Real(120.0));
        assert_eq!(stopped[2].value, TagValue::Int(3));
    }

    #[derive(Clone, Default)]
    struct CapturedLog(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn transition_log_carries_equipment_context() {
        let captured = CapturedLog::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let mut sim = EquipmentSimulator::new(oven(), seeded(0.0)).unwrap();
            sim.force_state_transition_at("fault", 1_000).unwrap();
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|line| line.contains("equipment state changed from running"))
            .unwrap();
        for field in [
            r#"site="north""#,
            r#"line="line-1""#,
            r#"equipment_id="oven1""#,
            r#"state="fault""#,
        ] {
            assert!(line.contains(field), "missing {field} in {line}");
        }
    }

    #[test]
    fn forcing_unknown_state_changes_nothing() {
        let mut sim = EquipmentSimulator::new(oven(), seeded(0.0)).unwrap();
        let before = sim.config().clone();
        assert!(sim.force_state_transition_at("meltdown", 1_000).is_err());
        assert_eq!(sim.current_state(), "running");
        assert_eq!(sim.config(), &before);
    }

    #[test]
    fn forced_entry_resets_every_generator() {
        let mut sim = EquipmentSimulator::new(oven(), seeded(0.0)).unwrap();
        let step = |sim: &mut EquipmentSimulator, t| {
            sim.generate_tag_values_at(t)
                .into_iter()
                .find(|s| s.tag_id == "recipe_step")
                .unwrap()
                .value
        };
        assert_eq!(step(&mut sim, 1_500), TagValue::Int(2));
        sim.force_state_transition_at("running", 1_500).unwrap();
        assert_eq!(step(&mut sim, 1_500), TagValue::Int(1));
        assert_eq!(sim.generator("recipe_step").unwrap().epoch_ms(), 1_500);
    }

    #[test]
    fn delayed_recovery_fires_and_notifies_channel() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sim = EquipmentSimulator::new(oven(), seeded(0.0)).unwrap();
        sim.set_event_sender(tx);
        sim.force_state_transition_at("fault", 0).unwrap();
        assert!(sim.check_state_transitions_at(59_999).is_none());
        let event = sim.check_state_transitions_at(60_000).unwrap();
        assert_eq!(event.current_state, "running");
        assert!(!event.forced);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.current_state, "fault");
        let second = rx.try_recv().unwrap();
        assert_eq!(second.previous_state, "fault");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn bad_quality_ratio_tracks_configured_probability() {
        let mut sim = EquipmentSimulator::new(oven(), seeded(0.25)).unwrap();
        let mut bad = 0usize;
        let mut total = 0usize;
        for t in 0..4_000u64 {
            for snapshot in sim.generate_tag_values_at(t * 10) {
                total += 1;
                if snapshot.quality == Quality::Bad {
                    bad += 1;
                }
            }
        }
        let ratio = bad as f64 / total as f64;
        assert!((ratio - 0.25).abs() < 0.03, "ratio {ratio}");
    }

    #[test]
    fn identical_seeds_reproduce_identical_streams() {
        let spec = BehaviorSpec::Random { min: 0.0, max: 1.0 };
        let mut config = oven();
        config.tags.push(Tag::new("noise", DataType::Real, spec));
        let mut a = EquipmentSimulator::new(config.clone(), seeded(0.1)).unwrap();
        let mut b = EquipmentSimulator::new(config, seeded(0.1)).unwrap();
        for t in 0..50 {
            let left: Vec<_> = a.generate_tag_values_at(t).into_iter().map(|s| (s.value, s.quality)).collect();
            let right: Vec<_> = b.generate_tag_values_at(t).into_iter().map(|s| (s.value, s.quality)).collect();
            assert_eq!(left, right);
        }
    }
}
