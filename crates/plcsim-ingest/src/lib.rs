//! ---
//! plcsim_section: "06-ingest"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Consumer side: queue discovery, transformation and point sinks."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
//! Reads envelope messages back off the per-equipment queues and turns them
//! into time-series points.

pub mod consumer;
pub mod discovery;
pub mod sink;
pub mod transform;

use std::sync::Arc;

pub use consumer::{IngestError, IngestReport, IngestWorker};
pub use discovery::{QueueBinding, QueueDiscovery};
pub use sink::{HttpLineProtocolSink, InMemoryPointSink, PointSink, SinkError};
pub use transform::{DataPoint, FieldValue, Transformer};

use plcsim_common::IngestConfig;

/// Sink selected by the ingest configuration: HTTP when a URL is configured,
/// otherwise an in-memory collector.
pub fn sink_from_config(config: &IngestConfig) -> Result<Arc<dyn PointSink>, SinkError> {
    match &config.sink_url {
        Some(url) => Ok(Arc::new(HttpLineProtocolSink::new(url)?)),
        None => Ok(Arc::new(InMemoryPointSink::new())),
    }
}
