//! ---
//! plcsim_section: "11-simulation"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Tag value generators driven by behavior specifications."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::f64::consts::PI;

use plcsim_common::{BehaviorSpec, DataType, TagValue};
use rand::Rng;

/// Evaluate a behavior at `elapsed_ms` of generator-local time.
///
/// `fallback` is the tag's static value, returned by `constant` behaviors without an
/// explicit value and by any behavior whose parameters are degenerate.
pub fn evaluate<R: Rng>(
    spec: &BehaviorSpec,
    elapsed_ms: u64,
    fallback: &TagValue,
    data_type: DataType,
    rng: &mut R,
) -> TagValue {
    match spec {
        BehaviorSpec::Sinusoidal {
            min,
            max,
            period,
            amplitude,
            offset,
        } => {
            if *period <= 0.0 || !valid_range(*min, *max) {
                return fallback.coerce_to(data_type);
            }
            let amplitude = amplitude.unwrap_or((max - min) / 2.0);
            let offset = offset.unwrap_or((max + min) / 2.0);
            let phase = (elapsed_ms as f64 % period) / period;
            let raw = offset + amplitude * (2.0 * PI * phase).sin();
            TagValue::from_numeric(raw.clamp(*min, *max), data_type)
        }
        BehaviorSpec::Linear {
            min,
            max,
            slope,
            initial_value,
        } => {
            if !valid_range(*min, *max) {
                return fallback.coerce_to(data_type);
            }
            let start = initial_value
                .or_else(|| fallback.as_f64())
                .unwrap_or(*min);
            let raw = start + slope * (elapsed_ms as f64 / 1000.0);
            TagValue::from_numeric(raw.clamp(*min, *max), data_type)
        }
        BehaviorSpec::Random { min, max } => {
            if !valid_range(*min, *max) {
                return fallback.coerce_to(data_type);
            }
            TagValue::from_numeric(rng.gen_range(*min..=*max), data_type)
        }
        BehaviorSpec::Stepped {
            values,
            step_duration_ms,
        } => {
            if values.is_empty() || *step_duration_ms == 0 {
                return fallback.coerce_to(data_type);
            }
            let index = (elapsed_ms / step_duration_ms) as usize % values.len();
            values[index].coerce_to(data_type)
        }
        BehaviorSpec::Constant { value } => value.as_ref().unwrap_or(fallback).coerce_to(data_type),
    }
}

/// Ordered bounds whose span is representable, so sampling cannot overflow.
fn valid_range(min: f64, max: f64) -> bool {
    min <= max && (max - min).is_finite()
}

/// Stateful wrapper holding a generator-local epoch for one tag.
///
/// Resetting moves the epoch to the given instant so phase and step counters
/// restart from zero.
#[derive(Debug, Clone)]
pub struct TagGenerator {
    spec: BehaviorSpec,
    data_type: DataType,
    epoch_ms: u64,
}

impl TagGenerator {
    pub fn new(spec: BehaviorSpec, data_type: DataType) -> Self {
        Self {
            spec,
            data_type,
            epoch_ms: 0,
        }
    }

    pub fn spec(&self) -> &BehaviorSpec {
        &self.spec
    }

    pub fn epoch_ms(&self) -> u64 {
        self.epoch_ms
    }

    pub fn reset(&mut self, elapsed_ms: u64) {
        self.epoch_ms = elapsed_ms;
    }

    pub fn value_at<R: Rng>(
        &self,
        elapsed_ms: u64,
        fallback: &TagValue,
        rng: &mut R,
    ) -> TagValue {
        let local = elapsed_ms.saturating_sub(self.epoch_ms);
        evaluate(&self.spec, local, fallback, self.data_type, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sinusoid() -> BehaviorSpec {
        BehaviorSpec::Sinusoidal {
            min: 300.0,
            max: 400.0,
            period: 120_000.0,
            amplitude: None,
            offset: Some(350.0),
        }
    }

    fn real(value: TagValue) -> f64 {
        value.as_f64().unwrap()
    }

    #[test]
    fn sinusoidal_stays_in_bounds_and_repeats_each_period() {
        let mut rng = StdRng::seed_from_u64(1);
        let fallback = TagValue::Real(350.0);
        for t in (0..400_000u64).step_by(1_337) {
            let value = real(evaluate(&sinusoid(), t, &fallback, DataType::Real, &mut rng));
            assert!((300.0..=400.0).contains(&value), "value {value} at {t}");
            let later = real(evaluate(&sinusoid(), t + 120_000, &fallback, DataType::Real, &mut rng));
            assert_eq!(value, later);
        }
        let peak = real(evaluate(&sinusoid(), 30_000, &fallback, DataType::Real, &mut rng));
        assert!((peak - 400.0).abs() < 1e-9);
    }

    #[test]
    fn sinusoidal_with_oversized_amplitude_is_clamped() {
        let spec = BehaviorSpec::Sinusoidal {
            min: 0.0,
            max: 10.0,
            period: 1_000.0,
            amplitude: Some(50.0),
            offset: Some(5.0),
        };
        let mut rng = StdRng::seed_from_u64(1);
        let top = real(evaluate(&spec, 250, &TagValue::default(), DataType::Real, &mut rng));
        let bottom = real(evaluate(&spec, 750, &TagValue::default(), DataType::Real, &mut rng));
        assert_eq!(top, 10.0);
        assert_eq!(bottom, 0.0);
    }

    #[test]
    fn linear_saturates_at_bounds() {
        let spec = BehaviorSpec::Linear {
            min: 0.0,
            max: 100.0,
            slope: 10.0,
            initial_value: Some(20.0),
        };
        let mut rng = StdRng::seed_from_u64(1);
        let fallback = TagValue::default();
        assert_eq!(real(evaluate(&spec, 0, &fallback, DataType::Real, &mut rng)), 20.0);
        assert_eq!(real(evaluate(&spec, 5_000, &fallback, DataType::Real, &mut rng)), 70.0);
        for t in [8_000u64, 9_000, 60_000, 3_600_000] {
            assert_eq!(real(evaluate(&spec, t, &fallback, DataType::Real, &mut rng)), 100.0);
        }

        let falling = BehaviorSpec::Linear {
            min: 0.0,
            max: 100.0,
            slope: -1.0,
            initial_value: None,
        };
        let start = TagValue::Real(3.0);
        assert_eq!(real(evaluate(&falling, 1_000, &start, DataType::Real, &mut rng)), 2.0);
        assert_eq!(real(evaluate(&falling, 90_000, &start, DataType::Real, &mut rng)), 0.0);
    }

    #[test]
    fn random_draws_within_range_and_coerces_integers() {
        let spec = BehaviorSpec::Random { min: 1.0, max: 6.0 };
        let mut rng = StdRng::seed_from_u64(7);
        for t in 0..500 {
            match evaluate(&spec, t, &TagValue::default(), DataType::Int, &mut rng) {
                TagValue::Int(v) => assert!((1..=6).contains(&v)),
                other => panic!("unexpected value {other:?}"),
            }
        }
    }

    #[test]
    fn stepped_changes_only_on_step_boundaries_and_cycles() {
        let spec = BehaviorSpec::Stepped {
            values: vec![TagValue::Int(1), TagValue::Int(2), TagValue::Int(3)],
            step_duration_ms: 500,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let at = |t: u64, rng: &mut StdRng| evaluate(&spec, t, &TagValue::default(), DataType::Int, rng);
        assert_eq!(at(0, &mut rng), TagValue::Int(1));
        assert_eq!(at(499, &mut rng), TagValue::Int(1));
        assert_eq!(at(500, &mut rng), TagValue::Int(2));
        assert_eq!(at(1_000, &mut rng), TagValue::Int(3));
        assert_eq!(at(1_499, &mut rng), TagValue::Int(3));
        assert_eq!(at(1_500, &mut rng), TagValue::Int(1));
    }

    #[test]
    fn degenerate_parameters_fall_back_to_static_value() {
        let mut rng = StdRng::seed_from_u64(1);
        let fallback = TagValue::Real(42.0);
        let specs = [
            BehaviorSpec::Sinusoidal {
                min: 0.0,
                max: 1.0,
                period: 0.0,
                amplitude: None,
                offset: None,
            },
            BehaviorSpec::Random { min: 5.0, max: 1.0 },
            BehaviorSpec::Stepped {
                values: Vec::new(),
                step_duration_ms: 100,
            },
            BehaviorSpec::Constant { value: None },
        ];
        for spec in &specs {
            assert_eq!(evaluate(spec, 1_000, &fallback, DataType::Real, &mut rng), fallback);
        }
        let constant = BehaviorSpec::Constant {
            value: Some(TagValue::Bool(true)),
        };
        assert_eq!(
            evaluate(&constant, 1_000, &fallback, DataType::Bool, &mut rng),
            TagValue::Bool(true)
        );
    }

    #[test]
    fn unrepresentable_random_span_falls_back() {
        let mut rng = StdRng::seed_from_u64(1);
        let fallback = TagValue::Real(7.5);
        let wide = BehaviorSpec::Random {
            min: -1e308,
            max: 1e308,
        };
        assert_eq!(evaluate(&wide, 0, &fallback, DataType::Real, &mut rng), fallback);
        assert_eq!(
            evaluate(&wide, 0, &fallback, DataType::Int, &mut rng),
            TagValue::Int(8)
        );
        let infinite = BehaviorSpec::Random {
            min: 0.0,
            max: f64::INFINITY,
        };
        assert_eq!(evaluate(&infinite, 0, &fallback, DataType::Real, &mut rng), fallback);
        let sweep = BehaviorSpec::Sinusoidal {
            min: -1e308,
            max: 1e308,
            period: 1_000.0,
            amplitude: None,
            offset: None,
        };
        assert_eq!(evaluate(&sweep, 250, &fallback, DataType::Real, &mut rng), fallback);
    }

    #[test]
    fn constants_follow_the_declared_data_type() {
        let mut rng = StdRng::seed_from_u64(1);
        let integer = BehaviorSpec::Constant {
            value: Some(TagValue::Int(120)),
        };
        assert_eq!(
            evaluate(&integer, 0, &TagValue::default(), DataType::Real, &mut rng),
            TagValue::Real(120.0)
        );
        let unset = BehaviorSpec::Constant { value: None };
        assert_eq!(
            evaluate(&unset, 0, &TagValue::Int(4), DataType::Real, &mut rng),
            TagValue::Real(4.0)
        );
        assert_eq!(
            evaluate(&unset, 0, &TagValue::Real(2.6), DataType::Int, &mut rng),
            TagValue::Int(3)
        );
        assert_eq!(
            evaluate(&unset, 0, &TagValue::Text("idle".into()), DataType::Real, &mut rng),
            TagValue::Text("idle".into())
        );
    }

    #[test]
    fn reset_restarts_generator_local_time() {
        let spec = BehaviorSpec::Stepped {
            values: vec![TagValue::Int(10), TagValue::Int(20)],
            step_duration_ms: 1_000,
        };
        let mut generator = TagGenerator::new(spec, DataType::Int);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(generator.value_at(1_200, &TagValue::default(), &mut rng), TagValue::Int(20));
        generator.reset(1_200);
        assert_eq!(generator.epoch_ms(), 1_200);
        assert_eq!(generator.value_at(1_200, &TagValue::default(), &mut rng), TagValue::Int(10));
        assert_eq!(generator.value_at(2_200, &TagValue::default(), &mut rng), TagValue::Int(20));
    }
}
