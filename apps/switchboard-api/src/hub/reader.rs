//! Per-connection read loop.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::watch;

use super::channel::{BroadcastSender, EnqueueError};
use super::connection::{Connection, TransportError};
use super::message::{DecodeError, InboundDraft};
use super::raised;
use super::registry::ConnectionRegistry;

/// One frame as seen by the reader, independent of the transport library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// Control traffic the reader ignores (pings, pongs).
    Control,
    /// The peer sent a close frame.
    Close,
}

/// Why a reader stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// Close frame or end of stream.
    PeerClosed,
    Transport(TransportError),
    Decode(DecodeError),
    /// The queue stayed full past the enqueue timeout.
    Saturated,
    /// The dispatcher has stopped.
    QueueClosed,
    /// Someone else removed the connection (usually a failed write).
    Evicted,
    /// Orderly hub shutdown.
    Shutdown,
}

impl std::fmt::Display for ReaderExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::Transport(e) => write!(f, "{e}"),
            Self::Decode(e) => write!(f, "{e}"),
            Self::Saturated => f.write_str("broadcast queue saturated"),
            Self::QueueClosed => f.write_str("broadcast queue closed"),
            Self::Evicted => f.write_str("evicted"),
            Self::Shutdown => f.write_str("hub shutting down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderState {
    Active,
    Terminated(ReaderExit),
}

/// Reads frames from one connection, stamps them with the connection's
/// identity, and queues them for fan-out.
pub struct ConnectionReader<S> {
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    queue: BroadcastSender,
    shutdown: watch::Receiver<bool>,
    inbound: S,
    state: ReaderState,
}

impl<S> ConnectionReader<S>
where
    S: Stream<Item = Result<InboundFrame, TransportError>> + Unpin + Send,
{
    pub fn new(
        connection: Arc<Connection>,
        registry: Arc<ConnectionRegistry>,
        queue: BroadcastSender,
        shutdown: watch::Receiver<bool>,
        inbound: S,
    ) -> Self {
        Self {
            connection,
            registry,
            queue,
            shutdown,
            inbound,
            state: ReaderState::Active,
        }
    }

    pub fn state(&self) -> &ReaderState {
        &self.state
    }

    /// Read until the connection fails, is evicted, or the hub shuts down.
    ///
    /// Calling `run` again after termination returns the original exit
    /// without touching the transport.
    pub async fn run(&mut self) -> ReaderExit {
        if let ReaderState::Terminated(exit) = &self.state {
            return exit.clone();
        }
        let exit = self.read_loop().await;
        self.terminate(exit.clone()).await;
        exit
    }

    async fn read_loop(&mut self) -> ReaderExit {
        let mut retired = self.connection.retired_signal();

        loop {
            // Once shutdown is raised no further frame is read.
            let frame = tokio::select! {
                biased;
                _ = raised(&mut self.shutdown) => return ReaderExit::Shutdown,
                _ = raised(&mut retired) => return ReaderExit::Evicted,
                frame = self.inbound.next() => frame,
            };

            let text = match frame {
                Some(Ok(InboundFrame::Text(text))) => text,
                Some(Ok(InboundFrame::Control)) => continue,
                Some(Ok(InboundFrame::Close)) | None => return ReaderExit::PeerClosed,
                Some(Err(err)) => return ReaderExit::Transport(err),
            };

            let draft = match InboundDraft::decode(&text) {
                Ok(draft) => draft,
                Err(err) => return ReaderExit::Decode(err),
            };
            let message = draft.stamp(self.connection.identity());

            match self.queue.enqueue(message).await {
                Ok(()) => {}
                Err(EnqueueError::Saturated) => return ReaderExit::Saturated,
                Err(EnqueueError::Closed) => return ReaderExit::QueueClosed,
            }
        }
    }

    async fn terminate(&mut self, exit: ReaderExit) {
        // The queue only closes while the dispatcher drains it. Either way
        // this connection still has messages coming and the dispatcher
        // tears the registry down itself once drained.
        if !matches!(exit, ReaderExit::Shutdown | ReaderExit::QueueClosed) {
            if let Some(connection) = self.registry.unregister(self.connection.id()) {
                connection.close_transport().await;
            }
        }
        tracing::debug!(
            connection_id = %self.connection.id(),
            email = %self.connection.identity().email,
            reason = %exit,
            "connection reader terminated"
        );
        self.state = ReaderState::Terminated(exit);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::stream;

    use super::*;
    use crate::hub::channel::{broadcast_channel, BroadcastReceiver};
    use crate::hub::dispatcher::deliver;
    use crate::hub::registry::RegistryHandle;
    use crate::hub::testing::{connection, identity, RecordingSink};

    type Frames = stream::Iter<std::vec::IntoIter<Result<InboundFrame, TransportError>>>;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        queue: BroadcastReceiver,
        sender: BroadcastSender,
        shutdown: watch::Sender<bool>,
        handle: RegistryHandle,
        sink: Arc<RecordingSink>,
    }

    fn fixture(capacity: usize, enqueue_timeout: Option<Duration>) -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let sink = RecordingSink::new();
        let handle = registry.register(connection("alice", &sink)).unwrap();
        let (sender, queue) = broadcast_channel(capacity, enqueue_timeout);
        let (shutdown, _) = watch::channel(false);
        Fixture {
            registry,
            queue,
            sender,
            shutdown,
            handle,
            sink,
        }
    }

    impl Fixture {
        fn reader<S>(&self, inbound: S) -> ConnectionReader<S>
        where
            S: Stream<Item = Result<InboundFrame, TransportError>> + Unpin + Send,
        {
            ConnectionReader::new(
                self.handle.connection().clone(),
                self.registry.clone(),
                self.sender.clone(),
                self.shutdown.subscribe(),
                inbound,
            )
        }
    }

    fn frames(items: Vec<Result<InboundFrame, TransportError>>) -> Frames {
        stream::iter(items)
    }

    fn text(raw: &str) -> Result<InboundFrame, TransportError> {
        Ok(InboundFrame::Text(raw.to_string()))
    }

    #[tokio::test]
    async fn stamps_and_enqueues_until_peer_closes() {
        let mut f = fixture(8, None);
        let mut reader = f.reader(frames(vec![
            text(r#"{"message":"hi"}"#),
            Ok(InboundFrame::Control),
            text(r#"{"email":"eve@x","username":"eve","message":"spoof"}"#),
            Ok(InboundFrame::Close),
            text(r#"{"message":"never read"}"#),
        ]));

        assert_eq!(reader.run().await, ReaderExit::PeerClosed);

        let first = f.queue.recv().await.unwrap();
        let second = f.queue.recv().await.unwrap();
        assert_eq!(first.text, "hi");
        assert_eq!(second.text, "spoof");
        assert_eq!(second.sender.email, "alice@x");
        assert_eq!(second.sender.display_name, "alice");
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn read_failure_unregisters_and_closes() {
        let f = fixture(8, None);
        let mut reader = f.reader(frames(vec![Err(TransportError::Io("reset".into()))]));

        assert_eq!(
            reader.run().await,
            ReaderExit::Transport(TransportError::Io("reset".into()))
        );
        assert!(!f.registry.contains(f.handle.id()));
        assert_eq!(f.sink.close_count(), 1);
    }

    #[tokio::test]
    async fn garbage_frame_is_a_decode_failure() {
        let f = fixture(8, None);
        let mut reader = f.reader(frames(vec![text("{{{")]));

        assert!(matches!(reader.run().await, ReaderExit::Decode(_)));
        assert!(f.registry.is_empty());
        assert_eq!(f.sink.close_count(), 1);
    }

    #[tokio::test]
    async fn terminated_state_is_never_reentered() {
        let f = fixture(8, None);
        let mut reader = f.reader(frames(vec![Ok(InboundFrame::Close)]));

        assert_eq!(*reader.state(), ReaderState::Active);
        assert_eq!(reader.run().await, ReaderExit::PeerClosed);
        assert_eq!(
            *reader.state(),
            ReaderState::Terminated(ReaderExit::PeerClosed)
        );

        assert_eq!(reader.run().await, ReaderExit::PeerClosed);
        assert_eq!(f.sink.close_count(), 1);
    }

    #[tokio::test]
    async fn eviction_stops_a_blocked_reader() {
        let f = fixture(8, None);
        let mut reader = f.reader(stream::pending());
        let task = tokio::spawn(async move { reader.run().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let evicted = f.registry.unregister(f.handle.id()).unwrap();
        evicted.close_transport().await;

        assert_eq!(task.await.unwrap(), ReaderExit::Evicted);
        // Only the evicting side closed the transport.
        assert_eq!(f.sink.close_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_leaves_registration_to_the_dispatcher() {
        let f = fixture(8, None);
        let mut reader = f.reader(stream::pending());
        let task = tokio::spawn(async move { reader.run().await });

        f.shutdown.send_replace(true);

        assert_eq!(task.await.unwrap(), ReaderExit::Shutdown);
        assert!(f.registry.contains(f.handle.id()));
        assert_eq!(f.sink.close_count(), 0);
    }

    #[tokio::test]
    async fn ready_frames_are_not_read_once_shutdown_is_raised() {
        let mut f = fixture(8, None);
        let queued = InboundDraft::decode(r#"{"message":"queued"}"#)
            .unwrap()
            .stamp(&identity("bob"));
        f.sender.enqueue(queued).await.unwrap();

        // The dispatcher's drain phase: sealed, signalled, queue closed.
        f.registry.seal();
        f.shutdown.send_replace(true);
        f.queue.close();

        let mut reader = f.reader(frames(vec![text(r#"{"message":"late"}"#)]));
        assert_eq!(reader.run().await, ReaderExit::Shutdown);
        assert!(f.registry.contains(f.handle.id()));
        assert_eq!(f.sink.close_count(), 0);

        while let Some(message) = f.queue.recv().await {
            deliver(&f.registry, &message, Duration::from_millis(100)).await;
        }
        assert_eq!(f.sink.texts(), vec!["queued"]);
    }

    #[tokio::test]
    async fn closed_queue_leaves_the_connection_for_the_drain() {
        let mut f = fixture(8, None);
        f.queue.close();

        let mut reader = f.reader(frames(vec![text(r#"{"message":"late"}"#)]));
        assert_eq!(reader.run().await, ReaderExit::QueueClosed);
        assert!(f.registry.contains(f.handle.id()));
        assert_eq!(f.sink.close_count(), 0);
    }

    #[tokio::test]
    async fn saturated_queue_drops_only_this_producer() {
        let f = fixture(1, Some(Duration::from_millis(20)));
        let mut reader = f.reader(frames(vec![
            text(r#"{"message":"fills the queue"}"#),
            text(r#"{"message":"has nowhere to go"}"#),
        ]));

        assert_eq!(reader.run().await, ReaderExit::Saturated);
        assert!(f.registry.is_empty());
        assert_eq!(f.queue.len(), 1);
    }
}
