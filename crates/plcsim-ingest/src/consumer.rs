//! ---
//! plcsim_section: "06-ingest"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Polling worker that drains equipment queues into a point sink."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use plcsim_common::AppConfig;
use plcsim_msg::{log_message, MessageDirection, MessageValidator, ValidationError};
use plcsim_transport::{MessageSource, TransportError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::discovery::QueueBinding;
use crate::sink::{PointSink, SinkError};
use crate::transform::Transformer;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] TransportError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Counters for one pass over every bound queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub messages: usize,
    pub points: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

impl IngestReport {
    fn absorb(&mut self, other: IngestReport) {
        self.messages += other.messages;
        self.points += other.points;
        self.duplicates += other.duplicates;
        self.invalid += other.invalid;
    }
}

pub struct IngestWorker {
    source: Arc<dyn MessageSource>,
    sink: Arc<dyn PointSink>,
    validator: MessageValidator,
    transformer: Transformer,
    bindings: Vec<QueueBinding>,
    batch_size: usize,
    poll_interval: Duration,
}

impl IngestWorker {
    pub fn new(
        source: Arc<dyn MessageSource>,
        sink: Arc<dyn PointSink>,
        validator: MessageValidator,
        transformer: Transformer,
        bindings: Vec<QueueBinding>,
    ) -> Self {
        Self {
            source,
            sink,
            validator,
            transformer,
            bindings,
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Worker wired from the application configuration: the sink follows
    /// `ingest.sink_url`, the cadence `ingest.poll_interval_ms` and the dedup
    /// window `validation.dedup_ttl_ms`.
    pub fn from_config(
        config: &AppConfig,
        source: Arc<dyn MessageSource>,
        bindings: Vec<QueueBinding>,
    ) -> Result<Self, SinkError> {
        let sink = crate::sink_from_config(&config.ingest)?;
        let worker = Self::new(
            source,
            sink,
            MessageValidator::new(config.validation.dedup_ttl),
            Transformer::from(&config.ingest),
            bindings,
        );
        Ok(worker.with_poll_interval(config.ingest.poll_interval))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn bindings(&self) -> &[QueueBinding] {
        &self.bindings
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Drain up to one batch from every queue. Duplicates and invalid
    /// payloads are counted and dropped. A failed sink write puts the batch's
    /// valid payloads back on their queue and aborts the pass.
    pub async fn poll_once(&self) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport::default();
        for binding in &self.bindings {
            report.absorb(self.drain_queue(binding).await?);
        }
        Ok(report)
    }

    async fn drain_queue(&self, binding: &QueueBinding) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport::default();
        let payloads = self.source.fetch(&binding.queue, self.batch_size).await?;
        if payloads.is_empty() {
            return Ok(report);
        }

        let mut accepted = Vec::new();
        let mut batch_ids = HashSet::new();
        let mut points = Vec::new();
        for payload in payloads {
            match self.validator.inspect_bytes(payload.as_bytes()) {
                Ok(message) => {
                    if !batch_ids.insert(message.id().to_owned()) {
                        debug!(queue = %binding.queue, message_id = %message.id(), "duplicate message dropped");
                        report.duplicates += 1;
                        continue;
                    }
                    log_message(MessageDirection::Inbound, &message);
                    report.messages += 1;
                    points.extend(self.transformer.transform(&message));
                    accepted.push(payload);
                }
                Err(ValidationError::DuplicateId(id)) => {
                    debug!(queue = %binding.queue, message_id = %id, "duplicate message dropped");
                    report.duplicates += 1;
                }
                Err(err) => {
                    warn!(queue = %binding.queue, error = %err, "invalid message dropped");
                    report.invalid += 1;
                }
            }
        }

        if !points.is_empty() {
            if let Err(err) = self.sink.write(&points).await {
                warn!(
                    queue = %binding.queue,
                    requeued = accepted.len(),
                    error = %err,
                    "sink write failed, batch returned to queue"
                );
                self.source.requeue(&binding.queue, accepted).await?;
                return Err(err.into());
            }
            report.points = points.len();
        }
        // ids are only consumed once the sink holds their points
        for id in &batch_ids {
            self.validator.record(id);
        }
        debug!(
            queue = %binding.queue,
            messages = report.messages,
            points = report.points,
            sink = self.sink.name(),
            "queue drained"
        );
        Ok(report)
    }

    /// Poll on a fixed interval until shutdown is signalled.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<IngestReport> {
        tokio::spawn(async move {
            let mut totals = IngestReport::default();
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(queues = self.bindings.len(), sink = self.sink.name(), "ingest worker started");
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        match self.poll_once().await {
                            Ok(report) => totals.absorb(report),
                            Err(err) => error!(error = %err, "ingest pass failed"),
                        }
                    }
                }
            }
            info!(
                messages = totals.messages,
                points = totals.points,
                duplicates = totals.duplicates,
                invalid = totals.invalid,
                "ingest worker stopped"
            );
            totals
        })
    }
}
