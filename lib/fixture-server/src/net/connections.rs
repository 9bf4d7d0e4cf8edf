use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

type ConnectionId = u64;

/// The open connections of one underlying server.
///
/// Each connection is served by its own task. The task evicts itself from
/// the set when it completes, so the set only ever holds sockets that are
/// still open.
#[derive(Debug, Default)]
pub(crate) struct ConnectionSet {
    inner: Arc<Mutex<Connections>>,
}

#[derive(Debug, Default)]
struct Connections {
    next_id: ConnectionId,
    /// Ids handed out whose task is spawned but not inserted yet.
    reserved: HashSet<ConnectionId>,
    open: HashMap<ConnectionId, OpenConnection>,
}

#[derive(Debug)]
struct OpenConnection {
    peer: SocketAddr,
    task: JoinHandle<()>,
}

impl ConnectionSet {
    /// The handle given to a server so it can report new connections.
    pub(crate) fn tracker(&self) -> ConnectionTracker {
        ConnectionTracker {
            inner: Arc::clone(&self.inner),
        }
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).open.len()
    }

    /// Abort every tracked connection and wait until their sockets are dropped.
    ///
    /// Returns the number of destroyed connections.
    pub(crate) async fn destroy_all(&self) -> usize {
        let drained = lock(&self.inner)
            .open
            .drain()
            .map(|(_, connection)| connection)
            .collect::<Vec<_>>();

        for connection in &drained {
            connection.task.abort();
        }

        let count = drained.len();
        for OpenConnection { peer, task } in drained {
            if let Err(error) = task.await {
                if error.is_panic() {
                    debug!(%peer, ?error, "connection task panicked");
                }
            }
            trace!(%peer, "connection destroyed");
        }
        count
    }

    /// Abort every tracked connection without waiting.
    pub(crate) fn abort_all(&self) {
        let drained = lock(&self.inner).open.drain().collect::<Vec<_>>();
        for (_, connection) in drained {
            connection.task.abort();
        }
    }
}

/// Reports established connections into a [`ConnectionSet`].
#[derive(Debug, Clone)]
pub(crate) struct ConnectionTracker {
    inner: Arc<Mutex<Connections>>,
}

impl ConnectionTracker {
    pub(crate) fn open(&self) -> usize {
        lock(&self.inner).open.len()
    }

    /// Spawn the task serving `connection` and track it until it completes.
    pub(crate) fn track<F>(&self, peer: SocketAddr, connection: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = {
            let mut connections = lock(&self.inner);
            let id = connections.next_id;
            connections.next_id += 1;
            connections.reserved.insert(id);
            id
        };

        let eviction = Eviction {
            connections: Arc::downgrade(&self.inner),
            id,
        };
        // Not under the lock: a runtime shutting down drops the future inside `spawn`
        let task = tokio::spawn(async move {
            let _eviction = eviction;
            connection.await;
        });

        let mut connections = lock(&self.inner);
        if connections.reserved.remove(&id) {
            connections.open.insert(id, OpenConnection { peer, task });
            trace!(%peer, id, open = connections.open.len(), "connection tracked");
        } else {
            trace!(%peer, id, "connection ended before being tracked");
        }
    }
}

/// Removes a connection from its set once the serving task is dropped,
/// whether it completed or was aborted.
struct Eviction {
    connections: Weak<Mutex<Connections>>,
    id: ConnectionId,
}

impl Drop for Eviction {
    fn drop(&mut self) {
        if let Some(connections) = self.connections.upgrade() {
            let mut connections = lock(&connections);
            if connections.open.remove(&self.id).is_none() {
                connections.reserved.remove(&self.id);
            }
        }
    }
}

fn lock(connections: &Mutex<Connections>) -> MutexGuard<'_, Connections> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}
