//! A single admitted client connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::identity::Identity;

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next id. Ids are never reused within a process.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A failure on one connection's transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer went away.
    Closed,
    /// A write did not finish within the deadline.
    Timeout,
    /// Any other I/O or protocol error.
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("transport closed"),
            Self::Timeout => f.write_str("write timed out"),
            Self::Io(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// The writable half of a connection's transport.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    /// Write one text frame.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Close the transport. Must tolerate being called more than once.
    async fn close(&self);
}

/// A live client connection tagged with its resolved identity.
///
/// Constructed by value and moved into the registry, so a connection can be
/// registered at most once. Once retired it stays retired.
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    registered_at: DateTime<Utc>,
    sink: Arc<dyn OutboundSink>,
    retired: watch::Sender<bool>,
}

impl Connection {
    pub fn new(identity: Identity, sink: Arc<dyn OutboundSink>) -> Self {
        let (retired, _) = watch::channel(false);
        Self {
            id: ConnectionId::next(),
            identity,
            registered_at: Utc::now(),
            sink,
            retired,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub(crate) fn set_registered_at(&mut self, at: DateTime<Utc>) {
        self.registered_at = at;
    }

    /// Address of the underlying transport. Two connections built on the
    /// same sink share a key.
    pub(crate) fn transport_key(&self) -> usize {
        Arc::as_ptr(&self.sink) as *const () as usize
    }

    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.sink.send_text(text).await
    }

    pub async fn close_transport(&self) {
        self.sink.close().await;
    }

    /// Mark the connection as removed. Returns `false` if it already was.
    pub(crate) fn retire(&self) -> bool {
        !self.retired.send_replace(true)
    }

    pub fn is_retired(&self) -> bool {
        *self.retired.borrow()
    }

    /// A receiver that flips to `true` when the connection is retired.
    pub fn retired_signal(&self) -> watch::Receiver<bool> {
        self.retired.subscribe()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("email", &self.identity.email)
            .field("registered_at", &self.registered_at)
            .field("retired", &self.is_retired())
            .finish()
    }
}
