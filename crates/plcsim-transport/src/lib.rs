//! ---
//! plcsim_section: "03-transport"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Broker transports and the reliable publisher."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
//! Delivery of envelope messages onto the broker.
//!
//! The [`ReliablePublisher`] never blocks or fails its callers while the broker
//! is away: messages are parked in a bounded drop-oldest [`RingBuffer`] and
//! replayed per equipment once a background reconnect loop succeeds.

use std::sync::Arc;
use std::time::Duration;

use plcsim_common::PublisherConfig;
use thiserror::Error;

pub mod broker;
pub mod buffer;
pub mod publisher;

pub use broker::{BrokerChannel, BrokerConnector, BrokerFrame, InMemoryBroker, MessageSource, TcpBrokerConnector};
pub use buffer::RingBuffer;
pub use publisher::{
    backoff_delay, ConnectionState, FlushReport, PublishOutcome, PublisherEvent, PublisherSettings,
    PublisherStats, ReliablePublisher,
};

/// Errors raised while talking to the broker.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("broker i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode message: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no open broker connection")]
    NotConnected,
    #[error("broker connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Connector selected by the publisher configuration: TCP when an address is
/// configured, otherwise a fresh in-memory broker.
pub fn connector_from_config(config: &PublisherConfig) -> Arc<dyn BrokerConnector> {
    match &config.broker_addr {
        Some(addr) => Arc::new(TcpBrokerConnector::new(addr.clone())),
        None => Arc::new(InMemoryBroker::new()),
    }
}
