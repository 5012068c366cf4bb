//! The seam between presence ingestion and the MQTT client library.
//!
//! A [`Transport`] opens connections; each connection reports its lifecycle
//! through a channel of [`TransportEvent`]s. Reconnection with backoff is the
//! transport's job: after `Error`/`Offline` it emits `Reconnecting` and later
//! `Connected` again without any help from the caller.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::Credentials;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid broker address '{0}': {1}")]
    InvalidBroker(String, String),
    #[error("Unsupported broker scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("MQTT transport unavailable: {0}")]
    Unavailable(String),
    #[error("MQTT client request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub broker: String,
    pub client_id: String,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Subscribed,
    SubscribeFailed(String),
    Reconnecting,
    Offline,
    Error(String),
    Closed,
    Message { topic: String, payload: Vec<u8> },
}

/// A live connection. Dropping it must also tear it down.
pub trait Connection: Send + 'static {
    /// Requests a subscription. The outcome arrives as `Subscribed` or
    /// `SubscribeFailed`; an `Err` here means the request was not even queued.
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Closes immediately without draining in-flight traffic.
    fn force_close(&mut self);
}

pub trait Transport: Send + 'static {
    type Connection: Connection;

    /// Starts connecting in the background and returns at once.
    fn open(
        &self,
        options: &ConnectOptions,
    ) -> Result<(Self::Connection, mpsc::Receiver<TransportEvent>), TransportError>;
}
