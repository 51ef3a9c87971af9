//! ---
//! plcsim_section: "05-orchestration"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Orchestrator driving simulators, reloads and the publisher."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Owns the simulator fleet and wires it to configuration reloads and the publisher.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use plcsim_common::{AppConfig, EquipmentConfig};
use plcsim_config::{ConfigError, ConfigWatcher, ConfigurationLoader, ConfigurationSet, ReloadEvent};
use plcsim_logging::{log_system_event, plc_debug, plc_error, plc_warn, LogContext, SystemEventOutcome};
use plcsim_msg::{
    EnvelopeMessage, MessageFormatter, MessagingMetricsExporter, ValidationError, ALARM_STATE_FAULT,
};
use plcsim_sim::{EquipmentSimulator, SimulationError, SimulatorOptions, StateChangeEvent};
use plcsim_transport::{
    connector_from_config, BrokerConnector, ConnectionState, PublishOutcome, PublisherEvent, PublisherSettings,
    ReliablePublisher, TransportError,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

/// State whose entry raises a `STATE_FAULT` alarm.
pub const FAULT_STATE: &str = "fault";
const DEFAULT_FAULT_MESSAGE: &str = "Equipment fault detected";

/// Errors surfaced by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Line configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A simulator rejected the request.
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    /// Broker interaction failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A built message failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// No simulator is registered under the id.
    #[error("unknown equipment '{0}'")]
    UnknownEquipment(String),
    /// `start` called on a running orchestrator.
    #[error("orchestrator is already running")]
    AlreadyRunning,
}

/// Result alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Runtime parameters of the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Directory of line definition files.
    pub lines_dir: PathBuf,
    /// Cadence of the simulate-and-publish tick.
    pub update_interval: Duration,
    /// Cadence of the heartbeat tick.
    pub heartbeat_interval: Duration,
    /// Options applied to every simulator.
    pub simulator: SimulatorOptions,
    /// Whether to watch `lines_dir` for changes.
    pub watch: bool,
    /// Polling fallback of the watcher.
    pub watch_poll_interval: Duration,
    /// Quiet period after a filesystem notification.
    pub watch_debounce: Duration,
    /// Message-id deduplication window.
    pub dedup_ttl: Duration,
    /// Publisher tuning.
    pub publisher: PublisherSettings,
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(config: &AppConfig) -> Self {
        let simulation = &config.simulation;
        Self {
            lines_dir: simulation.lines_dir.clone(),
            update_interval: simulation.update_interval,
            heartbeat_interval: simulation.heartbeat_interval,
            simulator: SimulatorOptions {
                bad_quality_probability: simulation.bad_quality_probability,
                seed: simulation.random_seed,
            },
            watch: simulation.watch,
            watch_poll_interval: simulation.watch_poll_interval,
            watch_debounce: simulation.watch_debounce,
            dedup_ttl: config.validation.dedup_ttl,
            publisher: PublisherSettings::from(&config.publisher),
        }
    }
}

/// Differences applied by a configuration generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    /// Ids that gained a simulator.
    pub added: Vec<String>,
    /// Ids whose simulator was torn down.
    pub removed: Vec<String>,
    /// Ids whose simulator was rebuilt from the new configuration.
    pub replaced: Vec<String>,
}

/// Outcome of one update or heartbeat tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Simulators visited.
    pub equipment: usize,
    /// Messages handed to the broker directly.
    pub sent: usize,
    /// Messages parked in the publisher buffer.
    pub buffered: usize,
    /// Messages that could not be built or delivered.
    pub failed: usize,
}

/// Live figures for health and operations tooling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeStats {
    /// Whether timers are running.
    pub running: bool,
    /// Time since `start`; zero when stopped.
    pub uptime: Duration,
    /// Messages accepted by the publisher, sent or buffered.
    pub messages_published: u64,
    /// Simulators currently managed.
    pub equipment_count: usize,
    /// Publisher buffer depth.
    pub buffer_size: usize,
    /// Whether the broker connection is up.
    pub broker_connected: bool,
    /// Detailed publisher state.
    pub connection_state: ConnectionState,
    /// Completion time of the last update tick.
    pub last_update: Option<DateTime<Utc>>,
    /// Digest of the applied configuration generation.
    pub config_digest: Option<String>,
}

struct Runtime {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    started_at: Instant,
}

struct Inner {
    settings: OrchestratorSettings,
    loader: ConfigurationLoader,
    publisher: ReliablePublisher,
    formatter: MessageFormatter,
    simulators: RwLock<IndexMap<String, Arc<Mutex<EquipmentSimulator>>>>,
    tick_lock: tokio::sync::Mutex<()>,
    events_tx: mpsc::UnboundedSender<StateChangeEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<StateChangeEvent>>,
    runtime: Mutex<Option<Runtime>>,
    starting: AtomicBool,
    published: AtomicU64,
    last_update: Mutex<Option<DateTime<Utc>>>,
    digest: Mutex<Option<String>>,
}

/// Drives update and heartbeat ticks over the simulator fleet.
///
/// Cloning yields another handle to the same fleet.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Build an idle orchestrator publishing through `connector`.
    pub fn new(
        settings: OrchestratorSettings,
        connector: Arc<dyn BrokerConnector>,
        metrics: Option<Arc<MessagingMetricsExporter>>,
    ) -> Self {
        let publisher = ReliablePublisher::new(connector, settings.publisher.clone(), metrics.clone());
        let mut formatter = MessageFormatter::new(settings.dedup_ttl);
        if let Some(metrics) = metrics {
            formatter = formatter.with_metrics(metrics);
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                loader: ConfigurationLoader::new(settings.lines_dir.clone()),
                settings,
                publisher,
                formatter,
                simulators: RwLock::new(IndexMap::new()),
                tick_lock: tokio::sync::Mutex::new(()),
                events_tx,
                events_rx: tokio::sync::Mutex::new(events_rx),
                runtime: Mutex::new(None),
                starting: AtomicBool::new(false),
                published: AtomicU64::new(0),
                last_update: Mutex::new(None),
                digest: Mutex::new(None),
            }),
        }
    }

    /// Convenience constructor from the application configuration.
    pub fn from_config(
        config: &AppConfig,
        connector: Arc<dyn BrokerConnector>,
        metrics: Option<Arc<MessagingMetricsExporter>>,
    ) -> Self {
        Self::new(OrchestratorSettings::from(config), connector, metrics)
    }

    /// Orchestrator whose broker is chosen by `publisher.broker_addr`: TCP when
    /// set, a private in-memory broker otherwise.
    pub fn with_configured_broker(config: &AppConfig, metrics: Option<Arc<MessagingMetricsExporter>>) -> Self {
        Self::from_config(config, connector_from_config(&config.publisher), metrics)
    }

    /// Publisher owned by this orchestrator.
    pub fn publisher(&self) -> &ReliablePublisher {
        &self.inner.publisher
    }

    /// Ids of every managed simulator, in configuration order.
    pub fn equipment_ids(&self) -> Vec<String> {
        self.inner.simulators.read().keys().cloned().collect()
    }

    /// Handle to one simulator.
    pub fn simulator(&self, equipment_id: &str) -> Option<Arc<Mutex<EquipmentSimulator>>> {
        self.inner.simulators.read().get(equipment_id).cloned()
    }

    /// Whether timers are running.
    pub fn is_running(&self) -> bool {
        self.inner.runtime.lock().is_some()
    }

    /// Load the line configuration, connect the publisher and start all timers.
    ///
    /// A configuration that fails to load here is fatal; later reload failures
    /// only keep the previous generation.
    pub async fn start(&self) -> Result<()> {
        if self.is_running()
            || self
                .inner
                .starting
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return Err(OrchestratorError::AlreadyRunning);
        }
        let result = self.start_inner().await;
        self.inner.starting.store(false, Ordering::SeqCst);
        if let Err(err) = &result {
            log_system_event(
                None,
                "orchestrator.start",
                &format!("startup failed: {err}"),
                SystemEventOutcome::Fault,
            );
        }
        result
    }

    async fn start_inner(&self) -> Result<()> {
        let settings = &self.inner.settings;
        let set = self.inner.loader.load()?;
        let summary = self.apply_configuration(&set).await;
        self.inner.publisher.connect();

        let (shutdown, _) = broadcast::channel(4);
        let mut tasks = vec![
            self.spawn_update_timer(shutdown.subscribe()),
            self.spawn_heartbeat_timer(shutdown.subscribe()),
            self.spawn_event_loop(shutdown.subscribe()),
            self.spawn_publisher_monitor(shutdown.subscribe()),
        ];
        if settings.watch {
            let watcher = ConfigWatcher::new(
                self.inner.loader.clone(),
                settings.watch_poll_interval,
                settings.watch_debounce,
            )
            .with_baseline(set.digest.clone());
            let (reloads, watcher_task) = watcher.spawn(shutdown.subscribe());
            tasks.push(watcher_task);
            tasks.push(self.spawn_reload_loop(reloads, shutdown.subscribe()));
        }

        *self.inner.runtime.lock() = Some(Runtime {
            shutdown,
            tasks,
            started_at: Instant::now(),
        });
        log_system_event(
            None,
            "orchestrator.start",
            &format!(
                "simulating {} equipment from {}",
                summary.added.len() + summary.replaced.len(),
                settings.lines_dir.display()
            ),
            SystemEventOutcome::Success,
        );
        Ok(())
    }

    /// Halt every timer, then release the broker connection. Idempotent.
    pub async fn stop(&self) {
        let runtime = self.inner.runtime.lock().take();
        let Some(runtime) = runtime else {
            return;
        };
        let _ = runtime.shutdown.send(());
        for task in runtime.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "orchestrator task join error");
            }
        }
        // no tick can publish past this point
        self.inner.publisher.disconnect().await;
        log_system_event(
            None,
            "orchestrator.stop",
            &format!("stopped after {:?}", runtime.started_at.elapsed()),
            SystemEventOutcome::Success,
        );
    }

    /// Replace the simulator set with `set`, diffing by equipment id.
    ///
    /// Waits for any in-flight update tick so a tick never sees a half-applied set.
    pub async fn apply_configuration(&self, set: &ConfigurationSet) -> ReloadSummary {
        let _tick = self.inner.tick_lock.lock().await;
        let current = self.inner.simulators.read().clone();
        let mut next = IndexMap::with_capacity(set.len());
        let mut summary = ReloadSummary::default();

        for config in set.iter() {
            let id = config.id.clone();
            match self.build_simulator(config.clone()) {
                Ok(simulator) => {
                    if current.contains_key(&id) {
                        summary.replaced.push(id.clone());
                    } else {
                        summary.added.push(id.clone());
                    }
                    next.insert(id, Arc::new(Mutex::new(simulator)));
                }
                Err(err) => {
                    let ctx = LogContext::new().with_equipment(&id);
                    plc_warn!(context = ctx, "simulator rejected configuration: {}", err);
                    if let Some(existing) = current.get(&id) {
                        next.insert(id, Arc::clone(existing));
                    }
                }
            }
        }
        summary.removed = current
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();

        *self.inner.simulators.write() = next;
        *self.inner.digest.lock() = Some(set.digest.clone());
        debug!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            replaced = summary.replaced.len(),
            "simulator set updated"
        );
        summary
    }

    /// Evaluate transitions, generate tags and publish one DATA_UPDATE per simulator.
    pub async fn run_update_tick(&self) -> TickReport {
        let _tick = self.inner.tick_lock.lock().await;
        let simulators = self.snapshot_simulators();
        let mut report = TickReport {
            equipment: simulators.len(),
            ..TickReport::default()
        };
        for simulator in simulators {
            let (identity, snapshots) = {
                let mut simulator = simulator.lock();
                simulator.check_state_transitions();
                (simulator.identity(), simulator.generate_tag_values())
            };
            match self.inner.formatter.data_update(&identity, &snapshots) {
                Ok(message) => self.dispatch(message, &mut report).await,
                Err(err) => {
                    let ctx = LogContext::new()
                        .with_site(&identity.site)
                        .with_line(&identity.line_id)
                        .with_equipment(&identity.equipment_id);
                    plc_error!(context = ctx, "data update rejected: {}", err);
                    report.failed += 1;
                }
            }
        }
        *self.inner.last_update.lock() = Some(Utc::now());
        report
    }

    /// Publish one HEARTBEAT per simulator.
    pub async fn run_heartbeat_tick(&self) -> TickReport {
        let simulators = self.snapshot_simulators();
        let mut report = TickReport {
            equipment: simulators.len(),
            ..TickReport::default()
        };
        for simulator in simulators {
            let identity = simulator.lock().identity();
            match self.inner.formatter.heartbeat(&identity) {
                Ok(message) => self.dispatch(message, &mut report).await,
                Err(err) => {
                    warn!(equipment_id = %identity.equipment_id, error = %err, "heartbeat rejected");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Force `equipment_id` into `state`. The STATE_CHANGE is published by the event loop.
    pub fn force_state_transition(&self, equipment_id: &str, state: &str) -> Result<StateChangeEvent> {
        let simulator = self
            .simulator(equipment_id)
            .ok_or_else(|| OrchestratorError::UnknownEquipment(equipment_id.to_owned()))?;
        let event = simulator.lock().force_state_transition(state)?;
        Ok(event)
    }

    /// Publish state changes queued while the event loop is not running.
    ///
    /// Returns the number of events handled; zero when the running event loop owns
    /// the queue.
    pub async fn publish_pending_state_changes(&self) -> usize {
        let pending: Vec<StateChangeEvent> = {
            let Ok(mut events) = self.inner.events_rx.try_lock() else {
                return 0;
            };
            std::iter::from_fn(|| events.try_recv().ok()).collect()
        };
        let count = pending.len();
        for event in pending {
            self.publish_state_change(event).await;
        }
        count
    }

    /// Current runtime figures.
    pub fn stats(&self) -> RuntimeStats {
        let uptime = self
            .inner
            .runtime
            .lock()
            .as_ref()
            .map(|runtime| runtime.started_at.elapsed());
        let publisher = self.inner.publisher.stats();
        RuntimeStats {
            running: uptime.is_some(),
            uptime: uptime.unwrap_or_default(),
            messages_published: self.inner.published.load(Ordering::Relaxed),
            equipment_count: self.inner.simulators.read().len(),
            buffer_size: publisher.buffered,
            broker_connected: publisher.state == ConnectionState::Connected,
            connection_state: publisher.state,
            last_update: *self.inner.last_update.lock(),
            config_digest: self.inner.digest.lock().clone(),
        }
    }

    fn build_simulator(
        &self,
        config: EquipmentConfig,
    ) -> std::result::Result<EquipmentSimulator, SimulationError> {
        let mut simulator = EquipmentSimulator::new(config, self.inner.settings.simulator)?;
        simulator.set_event_sender(self.inner.events_tx.clone());
        Ok(simulator)
    }

    fn snapshot_simulators(&self) -> Vec<Arc<Mutex<EquipmentSimulator>>> {
        self.inner.simulators.read().values().cloned().collect()
    }

    async fn dispatch(&self, message: EnvelopeMessage, report: &mut TickReport) {
        let message_id = message.id().to_owned();
        let equipment_id = message.equipment_id().to_owned();
        match self.inner.publisher.publish(message).await {
            Ok(PublishOutcome::Sent) => {
                report.sent += 1;
                self.inner.published.fetch_add(1, Ordering::Relaxed);
            }
            Ok(PublishOutcome::Buffered { .. }) => {
                report.buffered += 1;
                self.inner.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                // the publisher has already re-buffered the message
                warn!(%message_id, %equipment_id, error = %err, "publish failed");
                report.buffered += 1;
                self.inner.published.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn publish_state_change(&self, event: StateChangeEvent) {
        let Some(simulator) = self.simulator(&event.equipment_id) else {
            debug!(equipment_id = %event.equipment_id, "state change for removed equipment ignored");
            return;
        };
        let (identity, description) = {
            let simulator = simulator.lock();
            let description = simulator
                .state_description(&event.current_state)
                .filter(|text| !text.is_empty())
                .unwrap_or(DEFAULT_FAULT_MESSAGE)
                .to_owned();
            (simulator.identity(), description)
        };
        let mut report = TickReport::default();
        match self
            .inner
            .formatter
            .state_change(&identity, &event.previous_state, &event.current_state)
        {
            Ok(message) => self.dispatch(message, &mut report).await,
            Err(err) => warn!(equipment_id = %identity.equipment_id, error = %err, "state change rejected"),
        }
        let ctx = LogContext::new()
            .with_site(&identity.site)
            .with_line(&identity.line_id)
            .with_equipment(&identity.equipment_id)
            .with_state(&event.current_state);
        plc_debug!(
            context = ctx,
            "state change from {} dispatched ({} sent, {} buffered)",
            event.previous_state,
            report.sent,
            report.buffered
        );
        if event.current_state == FAULT_STATE {
            match self.inner.formatter.alarm(&identity, ALARM_STATE_FAULT, &description) {
                Ok(message) => self.dispatch(message, &mut report).await,
                Err(err) => warn!(equipment_id = %identity.equipment_id, error = %err, "alarm rejected"),
            }
        }
    }

    fn spawn_update_timer(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let this = self.clone();
        let period = self.inner.settings.update_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            let mut tick: u64 = 0;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        tick += 1;
                        let report = this.run_update_tick().await;
                        plc_debug!(
                            context = LogContext::new().with_tick(tick),
                            "update tick: {} sent, {} buffered, {} failed",
                            report.sent,
                            report.buffered,
                            report.failed
                        );
                    }
                }
            }
            debug!(tick, "update timer stopped");
        })
    }

    fn spawn_heartbeat_timer(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let this = self.clone();
        let period = self.inner.settings.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        let report = this.run_heartbeat_tick().await;
                        debug!(equipment = report.equipment, "heartbeat tick");
                    }
                }
            }
        })
    }

    fn spawn_event_loop(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut events = this.inner.events_rx.lock().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    Some(event) = events.recv() => this.publish_state_change(event).await,
                }
            }
            // flush what the final ticks produced before the publisher goes away
            while let Ok(event) = events.try_recv() {
                this.publish_state_change(event).await;
            }
        })
    }

    fn spawn_publisher_monitor(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let mut events = self.inner.publisher.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.recv() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(PublisherEvent::Connected { attempts }) => log_system_event(
                        None,
                        "publisher.connected",
                        &format!("broker connected after {attempts} attempt(s)"),
                        SystemEventOutcome::Success,
                    ),
                    Ok(PublisherEvent::Disconnected { reason }) => log_system_event(
                        None,
                        "publisher.disconnected",
                        &reason,
                        SystemEventOutcome::Degraded,
                    ),
                    Ok(PublisherEvent::Flushed(report)) => debug!(
                        batches = report.batches,
                        messages = report.messages,
                        "publisher buffer flushed"
                    ),
                    Ok(PublisherEvent::GaveUp { attempts }) => log_system_event(
                        None,
                        "publisher.gave_up",
                        &format!("broker unreachable after {attempts} attempts; restart required"),
                        SystemEventOutcome::Fault,
                    ),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "publisher event monitor lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_reload_loop(
        &self,
        mut reloads: mpsc::Receiver<ReloadEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.recv() => break,
                    event = reloads.recv() => event,
                };
                match event {
                    Some(ReloadEvent::Reloaded(set)) => {
                        let summary = this.apply_configuration(&set).await;
                        log_system_event(
                            None,
                            "config.reload",
                            &format!(
                                "applied: {} added, {} removed, {} replaced",
                                summary.added.len(),
                                summary.removed.len(),
                                summary.replaced.len()
                            ),
                            SystemEventOutcome::Success,
                        );
                    }
                    Some(ReloadEvent::Failed(err)) => log_system_event(
                        None,
                        "config.reload",
                        &format!("keeping previous configuration: {err}"),
                        SystemEventOutcome::Degraded,
                    ),
                    None => break,
                }
            }
        })
    }
}
