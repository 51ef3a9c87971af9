//! ---
//! plcsim_section: "03-transport"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Broker connector abstraction with in-memory and TCP backends."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::{Result, TransportError};

/// Factory for broker channels; called once per (re)connection attempt.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a fresh channel to the broker.
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>>;
    /// Human-readable backend name for logging.
    fn name(&self) -> &'static str;
}

/// Open connection able to deliver payloads to named queues.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Deliver one JSON payload to `queue`.
    async fn publish(&self, queue: &str, payload: &str) -> Result<()>;
    /// Release the connection. Further publishes fail with `NotConnected`.
    async fn close(&self) -> Result<()>;
}

/// Consumer side of a broker: pull payloads from a queue.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Take up to `max` payloads from `queue`, oldest first.
    async fn fetch(&self, queue: &str, max: usize) -> Result<Vec<String>>;

    /// Return fetched payloads to the head of `queue`, keeping their order, so
    /// the next fetch delivers them again.
    async fn requeue(&self, queue: &str, payloads: Vec<String>) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    unavailable: AtomicBool,
    failing_publishes: AtomicUsize,
    connects: AtomicU64,
    published: AtomicU64,
}

/// Process-local broker with failure injection, used by tests and single-process runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<InMemoryState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle reachability. While unavailable, connects and publishes fail.
    pub fn set_available(&self, available: bool) {
        self.state.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make the next `count` publishes fail even while available.
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Number of connect calls seen so far, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Payloads accepted so far across all queues.
    pub fn published_count(&self) -> u64 {
        self.state.published.load(Ordering::SeqCst)
    }

    /// Number of payloads waiting on `queue`.
    pub fn depth(&self, queue: &str) -> usize {
        self.state.queues.lock().get(queue).map_or(0, VecDeque::len)
    }

    /// Names of every queue that has received a payload.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.queues.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Take the oldest payload from `queue`.
    pub fn pop(&self, queue: &str) -> Option<String> {
        self.state.queues.lock().get_mut(queue)?.pop_front()
    }

    /// Take every payload from `queue`, oldest first.
    pub fn drain(&self, queue: &str) -> Vec<String> {
        self.state
            .queues
            .lock()
            .get_mut(queue)
            .map(|items| items.drain(..).collect())
            .unwrap_or_default()
    }

    /// Put a payload on `queue` directly, bypassing any channel.
    pub fn inject(&self, queue: &str, payload: impl Into<String>) {
        self.state
            .queues
            .lock()
            .entry(queue.to_owned())
            .or_default()
            .push_back(payload.into());
    }

    fn is_available(&self) -> bool {
        !self.state.unavailable.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.state
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if !self.is_available() {
            return Err(TransportError::Unavailable("in-memory broker is offline".into()));
        }
        Ok(Arc::new(InMemoryChannel {
            broker: self.clone(),
            open: AtomicBool::new(true),
        }))
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[async_trait]
impl MessageSource for InMemoryBroker {
    async fn fetch(&self, queue: &str, max: usize) -> Result<Vec<String>> {
        let mut queues = self.state.queues.lock();
        let Some(items) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };
        let take = max.min(items.len());
        Ok(items.drain(..take).collect())
    }

    async fn requeue(&self, queue: &str, payloads: Vec<String>) -> Result<()> {
        let mut queues = self.state.queues.lock();
        let items = queues.entry(queue.to_owned()).or_default();
        for payload in payloads.into_iter().rev() {
            items.push_front(payload);
        }
        Ok(())
    }
}

struct InMemoryChannel {
    broker: InMemoryBroker,
    open: AtomicBool,
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn publish(&self, queue: &str, payload: &str) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if !self.broker.is_available() {
            self.open.store(false, Ordering::SeqCst);
            return Err(TransportError::Unavailable("in-memory broker went offline".into()));
        }
        if self.broker.take_injected_failure() {
            return Err(TransportError::Unavailable("injected publish failure".into()));
        }
        self.broker.inject(queue, payload);
        self.broker.state.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// One newline-delimited JSON frame on the TCP broker protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerFrame {
    /// Destination queue.
    pub queue: String,
    /// Envelope serialized as JSON text.
    pub payload: String,
}

/// Connects to a broker speaking newline-delimited JSON frames over TCP.
#[derive(Debug, Clone)]
pub struct TcpBrokerConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpBrokerConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl BrokerConnector for TcpBrokerConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;
        let (_reader, writer) = stream.into_split();
        info!(addr = %self.addr, "broker tcp connection established");
        Ok(Arc::new(TcpChannel {
            addr: self.addr.clone(),
            writer: tokio::sync::Mutex::new(Some(BufWriter::new(writer))),
        }))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

struct TcpChannel {
    addr: String,
    writer: tokio::sync::Mutex<Option<BufWriter<OwnedWriteHalf>>>,
}

#[async_trait]
impl BrokerChannel for TcpChannel {
    async fn publish(&self, queue: &str, payload: &str) -> Result<()> {
        let frame = BrokerFrame {
            queue: queue.to_owned(),
            payload: payload.to_owned(),
        };
        let mut line = serde_json::to_vec(&frame)?;
        line.push(b'\n');

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = written {
            // a broken stream cannot be reused
            *guard = None;
            return Err(err.into());
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await?;
            debug!(addr = %self.addr, "broker tcp connection closed");
        }
        Ok(())
    }
}
