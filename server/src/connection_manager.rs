//! Bookkeeping for live connections
//!
//! Every connection registers itself when its driver starts and removes
//! itself when the driver exits, whatever the reason. The manager also owns
//! the shutdown signal: `close_all` flips a watch channel that every
//! connection driver selects on.

use log::info;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub type ConnectionId = u64;

/// What is on the other end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// A game client
    Client,
    /// Another role, inbound to the coordination server
    InterPeer,
    /// Our own link out to the coordination server
    InterLink,
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: String,
    pub kind: ConnectionKind,
    pub opened_at: Instant,
}

impl ConnectionInfo {
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

pub struct ConnectionManager {
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, ConnectionInfo>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
            shutdown_tx,
        }
    }

    /// Registers a new connection and returns its id
    pub fn register(&self, peer: &str, kind: ConnectionKind) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().insert(
            id,
            ConnectionInfo {
                id,
                peer: peer.to_string(),
                kind,
                opened_at: Instant::now(),
            },
        );
        info!("Connection {} opened ({:?} from {})", id, kind, peer);
        id
    }

    /// Removes a connection. Returns false if it was already gone.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        match self.connections.lock().remove(&id) {
            Some(info) => {
                info!(
                    "Connection {} closed ({:?} from {}, open for {:?})",
                    id,
                    info.kind,
                    info.peer,
                    info.age()
                );
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, kind: ConnectionKind) -> usize {
        self.connections
            .lock()
            .values()
            .filter(|info| info.kind == kind)
            .count()
    }

    /// Connections sorted by id
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<ConnectionInfo> = self.connections.lock().values().cloned().collect();
        list.sort_by_key(|info| info.id);
        list
    }

    /// Receiver that flips to `true` once [`close_all`](Self::close_all) runs
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Tells every connection to close
    pub fn close_all(&self) {
        info!("Closing {} connection(s)", self.len());
        self.shutdown_tx.send_replace(true);
    }
}
