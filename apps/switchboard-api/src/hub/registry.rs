//! The authoritative set of live connections.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use super::connection::{Connection, ConnectionId};

/// Returned by [`ConnectionRegistry::register`].
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    connection: Arc<Connection>,
}

impl RegistryHandle {
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

/// Why a registration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// The registry is shutting down.
    Closed,
    /// The connection was already retired.
    Retired,
    /// A live entry already writes to the same transport.
    Duplicate,
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("registry closed"),
            Self::Retired => f.write_str("connection already retired"),
            Self::Duplicate => f.write_str("transport already registered"),
        }
    }
}

struct Inner {
    entries: HashMap<ConnectionId, Arc<Connection>>,
    /// Transport keys of live entries; one entry per transport.
    transports: HashSet<usize>,
    closed: bool,
}

impl Inner {
    fn remove(&mut self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.entries.remove(&id)?;
        self.transports.remove(&removed.transport_key());
        Some(removed)
    }
}

/// Shared registry of live connections.
///
/// Mutations take the write lock; broadcasts copy the entry list under a
/// brief read lock and iterate the copy, so neither side can corrupt the
/// other's view.
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                transports: HashSet::new(),
                closed: false,
            }),
        }
    }

    /// Insert a connection and stamp its registration time.
    pub fn register(&self, mut connection: Connection) -> Result<RegistryHandle, RegisterError> {
        if connection.is_retired() {
            return Err(RegisterError::Retired);
        }

        let mut inner = self.inner.write();
        if inner.closed {
            return Err(RegisterError::Closed);
        }
        if !inner.transports.insert(connection.transport_key()) {
            return Err(RegisterError::Duplicate);
        }

        connection.set_registered_at(Utc::now());
        let connection = Arc::new(connection);
        inner.entries.insert(connection.id(), connection.clone());
        drop(inner);

        tracing::debug!(
            connection_id = %connection.id(),
            email = %connection.identity().email,
            "connection registered"
        );
        Ok(RegistryHandle { connection })
    }

    /// Remove a connection and retire it.
    ///
    /// Idempotent: when several callers race, exactly one gets the entry back
    /// and is responsible for closing its transport.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.inner.write().remove(id)?;
        removed.retire();
        tracing::debug!(connection_id = %id, "connection unregistered");
        Some(removed)
    }

    /// Copy of the current entries, for one fan-out pass.
    pub fn snapshot_for_broadcast(&self) -> Vec<Arc<Connection>> {
        self.inner.read().entries.values().cloned().collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.read().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse all further registrations.
    pub fn seal(&self) {
        self.inner.write().closed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.read().closed
    }

    /// Seal the registry and remove every entry. The caller owns closing
    /// the returned connections' transports.
    pub fn close(&self) -> Vec<Arc<Connection>> {
        let drained: Vec<_> = {
            let mut inner = self.inner.write();
            inner.closed = true;
            inner.transports.clear();
            inner.entries.drain().map(|(_, c)| c).collect()
        };
        for connection in &drained {
            connection.retire();
        }
        drained
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
