//! The single fan-out loop.
//!
//! Drains the broadcast queue one message at a time and writes each message
//! to every registered connection before taking the next, so every
//! connection sees messages in queue order. Writes within one message run
//! concurrently and are bounded by the write timeout; a connection whose
//! write fails or times out is evicted.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::time;

use super::channel::BroadcastReceiver;
use super::connection::{Connection, TransportError};
use super::message::ChatMessage;
use super::raised;
use super::registry::ConnectionRegistry;

/// Outcome of writing one message to one registry snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub evicted: usize,
}

/// Totals reported when the dispatcher stops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    pub messages: u64,
    /// Messages delivered after shutdown was requested.
    pub drained: u64,
    pub evicted: u64,
}

impl DispatchStats {
    fn record(&mut self, delivery: &Delivery) {
        self.messages += 1;
        self.evicted += delivery.evicted as u64;
    }
}

pub struct Dispatcher {
    queue: BroadcastReceiver,
    registry: Arc<ConnectionRegistry>,
    write_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(
        queue: BroadcastReceiver,
        registry: Arc<ConnectionRegistry>,
        write_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            registry,
            write_timeout,
            shutdown,
        }
    }

    /// Run until shutdown is signalled, then deliver everything still queued
    /// and close every remaining connection.
    pub async fn run(self) -> DispatchStats {
        let Self {
            mut queue,
            registry,
            write_timeout,
            mut shutdown,
        } = self;
        let mut stats = DispatchStats::default();

        loop {
            let next = tokio::select! {
                biased;
                message = queue.recv() => message,
                // A dropped sender counts as shutdown too.
                _ = raised(&mut shutdown) => None,
            };
            let Some(message) = next else { break };
            let delivery = deliver(&registry, &message, write_timeout).await;
            stats.record(&delivery);
        }

        queue.close();
        while let Some(message) = queue.recv().await {
            let delivery = deliver(&registry, &message, write_timeout).await;
            stats.record(&delivery);
            stats.drained += 1;
        }

        let remaining = registry.close();
        let closing = remaining.len();
        join_all(remaining.iter().map(|c| c.close_transport())).await;

        tracing::info!(
            messages = stats.messages,
            drained = stats.drained,
            evicted = stats.evicted,
            closed = closing,
            "dispatcher stopped"
        );
        stats
    }
}

/// Write one message to every connection in a fresh registry snapshot,
/// evicting those whose write fails.
pub async fn deliver(
    registry: &ConnectionRegistry,
    message: &ChatMessage,
    write_timeout: Duration,
) -> Delivery {
    let text = match message.encode() {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(?err, "failed to encode chat message");
            return Delivery::default();
        }
    };

    let targets = registry.snapshot_for_broadcast();
    let writes = targets.iter().map(|connection| {
        let text = text.as_str();
        async move {
            let result = match time::timeout(write_timeout, connection.send_text(text)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(TransportError::Timeout),
            };
            (connection, result)
        }
    });

    let mut delivery = Delivery::default();
    for (connection, result) in join_all(writes).await {
        match result {
            Ok(()) => delivery.delivered += 1,
            Err(err) => {
                if evict(registry, connection, &err) {
                    delivery.evicted += 1;
                }
            }
        }
    }
    delivery
}

fn evict(registry: &ConnectionRegistry, connection: &Arc<Connection>, err: &TransportError) -> bool {
    let Some(evicted) = registry.unregister(connection.id()) else {
        // The reader got there first.
        return false;
    };
    tracing::info!(
        connection_id = %evicted.id(),
        email = %evicted.identity().email,
        %err,
        "evicting connection after failed write"
    );
    // Closing may block on a dead peer; keep it off the fan-out path.
    tokio::spawn(async move { evicted.close_transport().await });
    true
}
