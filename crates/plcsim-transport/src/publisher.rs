//! ---
//! plcsim_section: "03-transport"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Buffering, reconnecting broker publisher."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use plcsim_common::{queue_name, PublisherConfig};
use plcsim_msg::{log_message, EnvelopeMessage, MessageDirection, MessagingMetricsExporter};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerChannel, BrokerConnector};
use crate::buffer::RingBuffer;
use crate::{Result, TransportError};

const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Connection lifecycle of the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Connect loop running; also covers the buffer flush after a successful connect.
    Connecting,
    Connected,
    /// Retries exhausted. Only an explicit `connect` restarts the loop.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }
}

/// What happened to a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the broker.
    Sent,
    /// Parked in the local buffer; `evicted` reports whether the oldest entry was dropped.
    Buffered { evicted: bool },
}

/// Result of replaying the buffer after a reconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Per-equipment batches sent.
    pub batches: usize,
    /// Messages sent across all batches.
    pub messages: usize,
}

/// Lifecycle notifications broadcast to interested components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherEvent {
    Connected { attempts: u32 },
    Disconnected { reason: String },
    Flushed(FlushReport),
    GaveUp { attempts: u32 },
}

/// Tuning knobs for [`ReliablePublisher`].
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub queue_prefix: String,
    pub buffer_capacity: usize,
    pub retry_delay: Duration,
    pub max_retry_attempts: u32,
}

impl From<&PublisherConfig> for PublisherSettings {
    fn from(config: &PublisherConfig) -> Self {
        Self {
            queue_prefix: config.queue_prefix.clone(),
            buffer_capacity: config.buffer_capacity,
            retry_delay: config.retry_delay,
            max_retry_attempts: config.max_retry_attempts,
        }
    }
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self::from(&PublisherConfig::default())
    }
}

/// Point-in-time view of publisher counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    pub state: ConnectionState,
    pub buffered: usize,
    pub capacity: usize,
    pub published_total: u64,
    pub buffered_total: u64,
    pub dropped_total: u64,
    pub flushed_total: u64,
    pub connect_attempts: u64,
}

/// Delay before reconnect attempt `attempt` (0-based): `base * 2^attempt`,
/// with the exponent capped at 16.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(MAX_BACKOFF_EXPONENT))
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    buffered: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
    connect_attempts: AtomicU64,
}

struct Shared {
    connector: Arc<dyn BrokerConnector>,
    settings: PublisherSettings,
    state: watch::Sender<ConnectionState>,
    channel: Mutex<Option<Arc<dyn BrokerChannel>>>,
    buffer: Mutex<RingBuffer<EnvelopeMessage>>,
    events: broadcast::Sender<PublisherEvent>,
    metrics: Option<Arc<MessagingMetricsExporter>>,
    counters: Counters,
    stopping: AtomicBool,
    shutdown: Notify,
    connect_task: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the broker connection and guarantees callers are never blocked by it.
///
/// Lock order is buffer before channel; the connection state only changes to
/// `Connected` while the buffer lock is held so no message can slip in between
/// the last flush and the switch to direct sends.
#[derive(Clone)]
pub struct ReliablePublisher {
    shared: Arc<Shared>,
}

impl ReliablePublisher {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        settings: PublisherSettings,
        metrics: Option<Arc<MessagingMetricsExporter>>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(64);
        let buffer = RingBuffer::with_capacity(settings.buffer_capacity);
        Self {
            shared: Arc::new(Shared {
                connector,
                settings,
                state,
                channel: Mutex::new(None),
                buffer: Mutex::new(buffer),
                events,
                metrics,
                counters: Counters::default(),
                stopping: AtomicBool::new(false),
                shutdown: Notify::new(),
                connect_task: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Follow state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Receive lifecycle events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PublisherEvent> {
        self.shared.events.subscribe()
    }

    pub fn buffer_len(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    pub fn stats(&self) -> PublisherStats {
        let (buffered, capacity) = {
            let buffer = self.shared.buffer.lock();
            (buffer.len(), buffer.capacity())
        };
        let counters = &self.shared.counters;
        PublisherStats {
            state: self.state(),
            buffered,
            capacity,
            published_total: counters.published.load(Ordering::Relaxed),
            buffered_total: counters.buffered.load(Ordering::Relaxed),
            dropped_total: counters.dropped.load(Ordering::Relaxed),
            flushed_total: counters.flushed.load(Ordering::Relaxed),
            connect_attempts: counters.connect_attempts.load(Ordering::Relaxed),
        }
    }

    /// Terminal connectivity error once the reconnect loop has given up.
    pub fn terminal_error(&self) -> Option<TransportError> {
        (self.state() == ConnectionState::Failed).then(|| TransportError::RetriesExhausted {
            attempts: self.shared.settings.max_retry_attempts.max(1),
        })
    }

    /// Start the background connect loop. No-op while already connecting or connected.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        self.shared.stopping.store(false, Ordering::SeqCst);
        let started = self.shared.state.send_if_modified(|state| match state {
            ConnectionState::Disconnected | ConnectionState::Failed => {
                *state = ConnectionState::Connecting;
                true
            }
            _ => false,
        });
        if started {
            self.shared.spawn_connect_loop();
        }
    }

    /// Wait until the publisher reaches `target`, up to `limit`.
    pub async fn wait_for_state(&self, target: ConnectionState, limit: Duration) -> bool {
        let mut rx = self.shared.state.subscribe();
        tokio::time::timeout(limit, rx.wait_for(|state| *state == target))
            .await
            .map(|seen| seen.is_ok())
            .unwrap_or(false)
    }

    /// Send `message` now when connected, otherwise park it in the buffer.
    ///
    /// A failed write re-buffers the message, drops the connection, starts the
    /// reconnect loop and returns the transport error.
    pub async fn publish(&self, message: EnvelopeMessage) -> Result<PublishOutcome> {
        let shared = &self.shared;
        let payload = message.to_json()?;
        let channel = {
            let mut buffer = shared.buffer.lock();
            match shared.open_channel() {
                Some(channel) => channel,
                None => return Ok(shared.park(&mut buffer, message)),
            }
        };

        let queue = queue_name(&shared.settings.queue_prefix, message.equipment_id());
        match shared.send(&channel, &queue, &payload).await {
            Ok(()) => {
                log_message(MessageDirection::Outbound, &message);
                Ok(PublishOutcome::Sent)
            }
            Err(err) => {
                warn!(
                    message_id = %message.id(),
                    equipment_id = %message.equipment_id(),
                    error = %err,
                    "broker write failed, buffering message"
                );
                {
                    let mut buffer = shared.buffer.lock();
                    shared.park(&mut buffer, message);
                }
                shared.connection_lost(&channel, &err);
                Err(err)
            }
        }
    }

    /// Stop reconnecting and release the broker connection. Idempotent.
    ///
    /// Buffered messages are kept and replayed on the next `connect`.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        shared.stopping.store(true, Ordering::SeqCst);
        shared.shutdown.notify_waiters();

        let task = shared.connect_task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "publisher connect task ended abnormally");
            }
        }

        let channel = {
            let _buffer = shared.buffer.lock();
            shared.state.send_replace(ConnectionState::Disconnected);
            shared.channel.lock().take()
        };
        if let Some(channel) = channel {
            if let Err(err) = channel.close().await {
                warn!(error = %err, "failed to close broker channel cleanly");
            }
            info!(broker = shared.connector.name(), "publisher disconnected");
            let _ = shared.events.send(PublisherEvent::Disconnected {
                reason: "shutdown".into(),
            });
        }
    }
}

impl Shared {
    fn open_channel(&self) -> Option<Arc<dyn BrokerChannel>> {
        if *self.state.borrow() != ConnectionState::Connected {
            return None;
        }
        self.channel.lock().clone()
    }

    fn park(&self, buffer: &mut RingBuffer<EnvelopeMessage>, message: EnvelopeMessage) -> PublishOutcome {
        log_message(MessageDirection::Buffered, &message);
        let evicted = buffer.push(message);
        self.counters.buffered.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.observe_buffered();
            metrics.set_buffer_depth(buffer.len());
        }
        if let Some(dropped) = &evicted {
            self.record_dropped(1);
            warn!(
                message_id = %dropped.id(),
                equipment_id = %dropped.equipment_id(),
                capacity = buffer.capacity(),
                "publish buffer full, dropped oldest message"
            );
        }
        PublishOutcome::Buffered {
            evicted: evicted.is_some(),
        }
    }

    fn record_dropped(&self, count: usize) {
        self.counters.dropped.fetch_add(count as u64, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.observe_dropped(count as u64);
        }
    }

    async fn send(&self, channel: &Arc<dyn BrokerChannel>, queue: &str, payload: &str) -> Result<()> {
        let started = Instant::now();
        channel.publish(queue, payload).await?;
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.observe_published();
            metrics.observe_latency(started.elapsed());
        }
        Ok(())
    }

    /// Drop a broken channel and restart the connect loop, once per outage.
    fn connection_lost(self: &Arc<Self>, channel: &Arc<dyn BrokerChannel>, err: &TransportError) {
        let stopping = self.stopping.load(Ordering::SeqCst);
        let transitioned = {
            let _buffer = self.buffer.lock();
            let mut current = self.channel.lock();
            let same = current
                .as_ref()
                .is_some_and(|open| Arc::as_ptr(open).cast::<()>() == Arc::as_ptr(channel).cast::<()>());
            if same {
                *current = None;
                self.state.send_replace(if stopping {
                    ConnectionState::Disconnected
                } else {
                    ConnectionState::Connecting
                });
            }
            same
        };
        if !transitioned {
            return;
        }
        warn!(broker = self.connector.name(), error = %err, "broker connection lost");
        let _ = self.events.send(PublisherEvent::Disconnected {
            reason: err.to_string(),
        });
        if !stopping {
            self.spawn_connect_loop();
        }
    }

    fn spawn_connect_loop(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move { shared.connect_loop().await });
        *self.connect_task.lock() = Some(handle);
    }

    async fn connect_loop(self: Arc<Self>) {
        let max_attempts = self.settings.max_retry_attempts.max(1);
        let mut failures: u32 = 0;
        loop {
            let shutdown = self.shutdown.notified();
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);
            let attempt = tokio::select! {
                result = self.connector.connect() => result,
                _ = shutdown => break,
            };
            match attempt {
                Ok(channel) => match self.flush(&channel).await {
                    Ok(report) => {
                        info!(
                            broker = self.connector.name(),
                            attempts = failures + 1,
                            batches = report.batches,
                            messages = report.messages,
                            "broker connected"
                        );
                        let _ = self.events.send(PublisherEvent::Connected {
                            attempts: failures + 1,
                        });
                        if report.messages > 0 {
                            let _ = self.events.send(PublisherEvent::Flushed(report));
                        }
                        return;
                    }
                    Err(err) => {
                        warn!(broker = self.connector.name(), error = %err, "buffer flush failed");
                        let _ = channel.close().await;
                    }
                },
                Err(err) => {
                    warn!(
                        broker = self.connector.name(),
                        attempt = failures + 1,
                        error = %err,
                        "broker connect failed"
                    );
                }
            }

            failures += 1;
            if failures >= max_attempts {
                self.state.send_replace(ConnectionState::Failed);
                error!(
                    broker = self.connector.name(),
                    attempts = failures,
                    buffered = self.buffer.lock().len(),
                    "giving up on broker connection"
                );
                let _ = self.events.send(PublisherEvent::GaveUp { attempts: failures });
                return;
            }

            let delay = backoff_delay(self.settings.retry_delay, failures - 1);
            debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
            let shutdown = self.shutdown.notified();
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown => break,
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Replay the buffer grouped by equipment until it is observed empty, then
    /// switch to `Connected`.
    ///
    /// On failure the unsent messages are pushed back to the front of the buffer.
    async fn flush(&self, channel: &Arc<dyn BrokerChannel>) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        loop {
            let drained = {
                let mut buffer = self.buffer.lock();
                if buffer.is_empty() {
                    *self.channel.lock() = Some(Arc::clone(channel));
                    self.state.send_replace(ConnectionState::Connected);
                    if let Some(metrics) = &self.metrics {
                        metrics.set_buffer_depth(0);
                    }
                    return Ok(report);
                }
                buffer.drain_all()
            };

            let mut batches: IndexMap<String, Vec<EnvelopeMessage>> = IndexMap::new();
            for message in drained {
                batches
                    .entry(message.equipment_id().to_owned())
                    .or_default()
                    .push(message);
            }

            let mut pending = batches.into_iter();
            while let Some((equipment_id, batch)) = pending.next() {
                let count = batch.len();
                if let Err((err, mut unsent)) = self.send_batch(channel, &equipment_id, batch).await {
                    for (_, rest) in pending {
                        unsent.extend(rest);
                    }
                    let requeued = unsent.len();
                    let evicted = self.buffer.lock().push_front_all(unsent);
                    if !evicted.is_empty() {
                        self.record_dropped(evicted.len());
                    }
                    warn!(
                        equipment_id = %equipment_id,
                        requeued,
                        dropped = evicted.len(),
                        "flush interrupted, messages returned to buffer"
                    );
                    return Err(err);
                }
                report.batches += 1;
                report.messages += count;
                self.counters.flushed.fetch_add(count as u64, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.observe_flush_batch();
                }
                debug!(equipment_id = %equipment_id, messages = count, "flushed buffered batch");
            }
        }
    }

    async fn send_batch(
        &self,
        channel: &Arc<dyn BrokerChannel>,
        equipment_id: &str,
        batch: Vec<EnvelopeMessage>,
    ) -> std::result::Result<(), (TransportError, Vec<EnvelopeMessage>)> {
        let queue = queue_name(&self.settings.queue_prefix, equipment_id);
        let mut remaining = batch.into_iter();
        while let Some(message) = remaining.next() {
            let payload = match message.to_json() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(message_id = %message.id(), error = %err, "dropping unencodable buffered message");
                    self.record_dropped(1);
                    continue;
                }
            };
            if let Err(err) = self.send(channel, &queue, &payload).await {
                let mut unsent = vec![message];
                unsent.extend(remaining);
                return Err((err, unsent));
            }
            log_message(MessageDirection::Replayed, &message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use plcsim_common::{EquipmentIdentity, EquipmentType};
    use plcsim_msg::{MessageType, TagEntry};

    fn message(equipment_id: &str) -> EnvelopeMessage {
        let identity = EquipmentIdentity {
            equipment_id: equipment_id.into(),
            equipment_type: EquipmentType::Press,
            site: "south".into(),
            product_type: "panels".into(),
            line_id: "line-3".into(),
            line_number: 3,
        };
        EnvelopeMessage::new(&identity, MessageType::Heartbeat, vec![TagEntry::good("heartbeat", true)])
    }

    fn publisher(broker: &InMemoryBroker, capacity: usize, max_attempts: u32) -> ReliablePublisher {
        let settings = PublisherSettings {
            queue_prefix: "plc_data_".into(),
            buffer_capacity: capacity,
            retry_delay: Duration::from_millis(5),
            max_retry_attempts: max_attempts,
        };
        ReliablePublisher::new(Arc::new(broker.clone()), settings, None)
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn backoff_doubles_and_caps_exponent() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 40), backoff_delay(base, 16));
        assert_eq!(backoff_delay(base, 16), Duration::from_millis(100 * 65_536));
    }

    #[tokio::test]
    async fn disconnected_publishes_fill_buffer_then_evict_oldest() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker, 2, 3);
        let first = message("oven1");
        let first_id = first.id().to_owned();

        assert_eq!(publisher.publish(first).await.unwrap(), PublishOutcome::Buffered { evicted: false });
        assert_eq!(publisher.buffer_len(), 1);
        assert_eq!(publisher.publish(message("oven1")).await.unwrap(), PublishOutcome::Buffered { evicted: false });
        assert_eq!(publisher.buffer_len(), 2);
        assert_eq!(publisher.publish(message("oven1")).await.unwrap(), PublishOutcome::Buffered { evicted: true });
        assert_eq!(publisher.buffer_len(), 2);
        assert_eq!(publisher.stats().dropped_total, 1);

        publisher.connect();
        assert!(publisher.wait_for_state(ConnectionState::Connected, WAIT).await);
        let delivered = broker.drain("plc_data_oven1");
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|payload| !payload.contains(&first_id)));
        publisher.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reconnect_flushes_buffer_grouped_by_equipment() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let publisher = publisher(&broker, 100, 1_000);
        let mut events = publisher.subscribe();

        let oven_a = message("oven1");
        let oven_b = message("oven1");
        let (oven_a_id, oven_b_id) = (oven_a.id().to_owned(), oven_b.id().to_owned());
        publisher.publish(oven_a).await.unwrap();
        publisher.publish(message("press3")).await.unwrap();
        publisher.publish(oven_b).await.unwrap();
        assert_eq!(publisher.buffer_len(), 3);

        publisher.connect();
        assert_eq!(publisher.state(), ConnectionState::Connecting);
        broker.set_available(true);
        assert!(publisher.wait_for_state(ConnectionState::Connected, WAIT).await);
        assert_eq!(publisher.buffer_len(), 0);

        let oven = broker.drain("plc_data_oven1");
        assert_eq!(oven.len(), 2);
        assert!(oven[0].contains(&oven_a_id));
        assert!(oven[1].contains(&oven_b_id));
        assert_eq!(broker.depth("plc_data_press3"), 1);

        let mut flushed = None;
        while let Ok(Ok(event)) = tokio::time::timeout(WAIT, events.recv()).await {
            if let PublisherEvent::Flushed(report) = event {
                flushed = Some(report);
                break;
            }
        }
        assert_eq!(flushed, Some(FlushReport { batches: 2, messages: 3 }));
        assert_eq!(publisher.stats().flushed_total, 3);

        assert_eq!(publisher.publish(message("press3")).await.unwrap(), PublishOutcome::Sent);
        assert_eq!(broker.depth("plc_data_press3"), 2);
        publisher.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn write_failure_rebuffers_and_reconnects() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker, 10, 5);
        publisher.connect();
        assert!(publisher.wait_for_state(ConnectionState::Connected, WAIT).await);

        broker.fail_next_publishes(1);
        let failed = message("press3");
        let failed_id = failed.id().to_owned();
        assert!(publisher.publish(failed).await.is_err());

        assert!(publisher.wait_for_state(ConnectionState::Connected, WAIT).await);
        let delivered = broker.drain("plc_data_press3");
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].contains(&failed_id));
        assert!(broker.connect_attempts() >= 2);
        publisher.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn gives_up_after_max_attempts() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let publisher = publisher(&broker, 10, 3);
        let mut events = publisher.subscribe();
        publisher.publish(message("oven1")).await.unwrap();

        publisher.connect();
        assert!(publisher.wait_for_state(ConnectionState::Failed, WAIT).await);
        assert_eq!(broker.connect_attempts(), 3);
        assert!(matches!(
            publisher.terminal_error(),
            Some(TransportError::RetriesExhausted { attempts: 3 })
        ));
        assert_eq!(events.recv().await.unwrap(), PublisherEvent::GaveUp { attempts: 3 });

        // buffered data survives and publishing still never fails
        assert_eq!(publisher.publish(message("oven1")).await.unwrap(), PublishOutcome::Buffered { evicted: false });
        assert_eq!(publisher.buffer_len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_stops_retry_loop_and_is_idempotent() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let settings = PublisherSettings {
            retry_delay: Duration::from_secs(30),
            ..PublisherSettings::default()
        };
        let publisher = ReliablePublisher::new(Arc::new(broker.clone()), settings, None);
        publisher.connect();
        while broker.connect_attempts() == 0 {
            tokio::task::yield_now().await;
        }

        tokio::time::timeout(WAIT, publisher.disconnect()).await.expect("disconnect returns");
        assert_eq!(publisher.state(), ConnectionState::Disconnected);
        publisher.disconnect().await;
        assert_eq!(publisher.state(), ConnectionState::Disconnected);
        assert_eq!(broker.connect_attempts(), 1);
    }
}
