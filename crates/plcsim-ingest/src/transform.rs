//! ---
//! plcsim_section: "06-ingest"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Envelope to time-series point transformation."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use plcsim_common::{IngestConfig, TagValue};
use plcsim_msg::EnvelopeMessage;
use serde::Serialize;

/// Typed field value of a point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl From<&TagValue> for FieldValue {
    fn from(value: &TagValue) -> Self {
        match value {
            TagValue::Bool(v) => FieldValue::Boolean(*v),
            TagValue::Int(v) => FieldValue::Integer(*v),
            TagValue::Real(v) => FieldValue::Float(*v),
            TagValue::Text(v) => FieldValue::String(v.clone()),
        }
    }
}

/// One time-series point: measurement, string tag-set, typed field-set, timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl DataPoint {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Render as one InfluxDB line-protocol record with a nanosecond timestamp.
    ///
    /// NaN and infinite floats have no line-protocol form and are left out;
    /// a point with no writable field renders as `None`.
    pub fn to_line_protocol(&self) -> Option<String> {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }
        let mut separator = ' ';
        for (key, value) in &self.fields {
            if matches!(value, FieldValue::Float(v) if !v.is_finite()) {
                continue;
            }
            line.push(separator);
            separator = ',';
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            match value {
                FieldValue::Float(v) => {
                    let _ = write!(line, "{v}");
                }
                FieldValue::Integer(v) => {
                    let _ = write!(line, "{v}i");
                }
                FieldValue::Boolean(v) => {
                    let _ = write!(line, "{v}");
                }
                FieldValue::String(v) => {
                    let _ = write!(line, "\"{}\"", escape(v, &['"']));
                }
            }
        }
        if separator == ' ' {
            return None;
        }
        if let Some(nanos) = self.timestamp.timestamp_nanos_opt() {
            let _ = write!(line, " {nanos}");
        }
        Some(line)
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == '\\' || special.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Fans an envelope out into one point per tag plus a message-quality point.
#[derive(Debug, Clone)]
pub struct Transformer {
    measurement: String,
    quality_measurement: String,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for Transformer {
    fn from(config: &IngestConfig) -> Self {
        Self::new(config.measurement.clone(), config.quality_measurement.clone())
    }
}

impl Transformer {
    pub fn new(measurement: impl Into<String>, quality_measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            quality_measurement: quality_measurement.into(),
        }
    }

    /// Every message kind follows the same rule; synthetic tag ids such as
    /// `current_state` simply become the `tag` dimension.
    pub fn transform(&self, message: &EnvelopeMessage) -> Vec<DataPoint> {
        let line = message.line_number().to_string();
        let base = |measurement: &str| {
            DataPoint::new(measurement, message.timestamp())
                .tag("site", message.site())
                .tag("type", message.product_type())
                .tag("line", line.as_str())
                .tag("equipment_id", message.equipment_id())
        };

        let mut points = Vec::with_capacity(message.tags().len() + 1);
        let mut good = 0_i64;
        for entry in message.tags() {
            if entry.quality.is_good() {
                good += 1;
            }
            points.push(
                base(&self.measurement)
                    .tag("tag", entry.tag_id.as_str())
                    .field("value", FieldValue::from(&entry.value)),
            );
        }

        let total = message.tags().len() as i64;
        let ratio = if total == 0 { 1.0 } else { good as f64 / total as f64 };
        points.push(
            base(&self.quality_measurement)
                .field("total_tags", FieldValue::Integer(total))
                .field("good_quality_tags", FieldValue::Integer(good))
                .field("quality_ratio", FieldValue::Float(ratio)),
        );
        points
    }
}
