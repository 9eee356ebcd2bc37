//! The fan-out hub: connection registry, broadcast queue, and dispatcher.

pub mod channel;
pub mod connection;
pub mod dispatcher;
pub mod message;
pub mod reader;
pub mod registry;
pub mod server;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::identity::Identity;
use channel::{broadcast_channel, BroadcastSender};
use connection::{Connection, OutboundSink, TransportError};
use dispatcher::{DispatchStats, Dispatcher};
use reader::{ConnectionReader, InboundFrame};
use registry::{ConnectionRegistry, RegisterError, RegistryHandle};

/// Tunables for one hub instance.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub broadcast_capacity: usize,
    pub enqueue_timeout: Option<Duration>,
    pub write_timeout: Duration,
}

impl From<&Config> for HubSettings {
    fn from(config: &Config) -> Self {
        Self {
            broadcast_capacity: config.broadcast_capacity,
            enqueue_timeout: config.enqueue_timeout,
            write_timeout: config.write_timeout,
        }
    }
}

/// Resolve once `signal` reads `true`, or once its sender is gone.
pub(crate) async fn raised(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|up| *up).await;
}

struct HubInner {
    registry: Arc<ConnectionRegistry>,
    queue: BroadcastSender,
    shutdown: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<DispatchStats>>>,
}

/// Handle to a running hub. Cloneable; store it in `AppState`.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create the registry and queue and spawn the dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(settings: HubSettings) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let (queue, receiver) =
            broadcast_channel(settings.broadcast_capacity, settings.enqueue_timeout);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let dispatcher = Dispatcher::new(
            receiver,
            registry.clone(),
            settings.write_timeout,
            shutdown_rx,
        );
        let task = tokio::spawn(dispatcher.run());

        tracing::info!(
            capacity = settings.broadcast_capacity,
            write_timeout_ms = settings.write_timeout.as_millis() as u64,
            "hub started"
        );

        Self {
            inner: Arc::new(HubInner {
                registry,
                queue,
                shutdown,
                dispatcher: Mutex::new(Some(task)),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Register an authenticated connection.
    pub fn admit(
        &self,
        identity: Identity,
        sink: Arc<dyn OutboundSink>,
    ) -> Result<RegistryHandle, RegisterError> {
        if *self.inner.shutdown.borrow() {
            return Err(RegisterError::Closed);
        }
        self.inner.registry.register(Connection::new(identity, sink))
    }

    /// Build the reader for an admitted connection.
    pub fn reader<S>(&self, handle: &RegistryHandle, inbound: S) -> ConnectionReader<S>
    where
        S: Stream<Item = Result<InboundFrame, TransportError>> + Unpin + Send,
    {
        ConnectionReader::new(
            handle.connection().clone(),
            self.inner.registry.clone(),
            self.inner.queue.clone(),
            self.inner.shutdown.subscribe(),
            inbound,
        )
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Stop admitting, stop every reader, deliver what is already queued,
    /// then close every connection.
    ///
    /// Returns the dispatcher's totals the first time; `None` afterwards.
    pub async fn shutdown(&self) -> Option<DispatchStats> {
        self.inner.registry.seal();
        self.inner.shutdown.send_replace(true);

        let task = self.inner.dispatcher.lock().take()?;
        match task.await {
            Ok(stats) => Some(stats),
            Err(err) => {
                tracing::error!(?err, "dispatcher task failed");
                None
            }
        }
    }
}
