//! ---
//! plcsim_section: "02-messaging-data-model"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Structured message logging and publisher metrics."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use tracing::debug;

use crate::types::EnvelopeMessage;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Handed to the broker.
    Outbound,
    /// Parked in the local buffer while the broker is unreachable.
    Buffered,
    /// Sent during a buffer flush.
    Replayed,
    /// Consumed from a broker queue.
    Inbound,
}

/// Emit a structured log entry for message activity.
pub fn log_message(direction: MessageDirection, message: &EnvelopeMessage) {
    debug!(
        message_id = %message.id(),
        timestamp = %message.timestamp(),
        equipment_id = %message.equipment_id(),
        kind = message.message_type().as_str(),
        tags = message.tags().len(),
        direction = ?direction,
        "messaging activity"
    );
}

/// Prometheus metric handles for the publishing path.
#[derive(Clone)]
pub struct MessagingMetricsExporter {
    published: IntCounter,
    buffered: IntCounter,
    dropped: IntCounter,
    rejected: IntCounter,
    flushes: IntCounter,
    buffer_depth: IntGauge,
    latency: Histogram,
}

impl MessagingMetricsExporter {
    /// Register messaging metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let published = IntCounter::with_opts(Opts::new(
            "plcsim_messages_published_total",
            "Envelopes accepted by the broker",
        ))?;
        let buffered = IntCounter::with_opts(Opts::new(
            "plcsim_messages_buffered_total",
            "Envelopes parked locally while disconnected",
        ))?;
        let dropped = IntCounter::with_opts(Opts::new(
            "plcsim_messages_dropped_total",
            "Buffered envelopes evicted by overflow",
        ))?;
        let rejected = IntCounter::with_opts(Opts::new(
            "plcsim_messages_rejected_total",
            "Envelopes that failed validation",
        ))?;
        let flushes = IntCounter::with_opts(Opts::new(
            "plcsim_flush_batches_total",
            "Per-equipment batches replayed from the buffer",
        ))?;
        let buffer_depth = IntGauge::with_opts(Opts::new(
            "plcsim_buffer_depth",
            "Envelopes currently held in the local buffer",
        ))?;
        let latency = Histogram::with_opts(HistogramOpts::new(
            "plcsim_publish_latency_seconds",
            "Time spent handing one envelope to the broker",
        ))?;

        registry.register(Box::new(published.clone()))?;
        registry.register(Box::new(buffered.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(rejected.clone()))?;
        registry.register(Box::new(flushes.clone()))?;
        registry.register(Box::new(buffer_depth.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            published,
            buffered,
            dropped,
            rejected,
            flushes,
            buffer_depth,
            latency,
        })
    }

    /// Record an envelope accepted by the broker.
    pub fn observe_published(&self) {
        self.published.inc();
    }

    /// Record an envelope parked in the buffer.
    pub fn observe_buffered(&self) {
        self.buffered.inc();
    }

    /// Record evicted envelopes.
    pub fn observe_dropped(&self, count: u64) {
        self.dropped.inc_by(count);
    }

    /// Record a validation failure.
    pub fn observe_rejected(&self) {
        self.rejected.inc();
    }

    /// Record one replayed batch.
    pub fn observe_flush_batch(&self) {
        self.flushes.inc();
    }

    /// Current buffer occupancy.
    pub fn set_buffer_depth(&self, depth: usize) {
        self.buffer_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Record the duration of one broker publish.
    pub fn observe_latency(&self, duration: Duration) {
        self.latency.observe(duration.as_secs_f64());
    }

    /// Envelopes published so far.
    pub fn published_total(&self) -> u64 {
        self.published.get()
    }

    /// Envelopes rejected so far.
    pub fn rejected_total(&self) -> u64 {
        self.rejected.get()
    }
}

impl fmt::Debug for MessagingMetricsExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingMetricsExporter")
            .field("published", &self.published.get())
            .field("buffered", &self.buffered.get())
            .field("dropped", &self.dropped.get())
            .field("rejected", &self.rejected.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exporter_registers_plcsim_families() {
        let registry = Registry::new();
        let metrics = MessagingMetricsExporter::register(&registry).expect("register metrics");
        metrics.observe_published();
        metrics.observe_buffered();
        metrics.observe_dropped(3);
        metrics.observe_rejected();
        metrics.observe_flush_batch();
        metrics.set_buffer_depth(7);
        metrics.observe_latency(Duration::from_millis(4));

        assert_eq!(metrics.published_total(), 1);
        assert_eq!(metrics.rejected_total(), 1);
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        for expected in [
            "plcsim_messages_published_total",
            "plcsim_messages_dropped_total",
            "plcsim_buffer_depth",
            "plcsim_publish_latency_seconds",
        ] {
            assert!(names.iter().any(|name| name == expected), "missing {expected}");
        }
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = Registry::new();
        MessagingMetricsExporter::register(&registry).expect("first registration");
        assert!(MessagingMetricsExporter::register(&registry).is_err());
    }
}
