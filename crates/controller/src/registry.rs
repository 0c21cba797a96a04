//! The reverse-dial registry.
//!
//! Edge nodes live behind NAT and initiate the only connection between
//! themselves and the controller. The registry turns that connection
//! inside-out: a node's inbound control stream is parked here keyed by
//! node id, and the controller "dials" the node by taking the parked
//! handle. Dial waiters are signaled by the next registration, so a
//! dial against a known-but-absent node blocks until the node
//! reconnects or the timeout lapses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::agent::AgentHandle;
use crate::error::{Error, Result};

#[derive(Default)]
struct Entry {
    conn: Option<AgentHandle>,
    arrived: Arc<Notify>,
}

/// Registry of persistent inbound node connections.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Entry>>>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a node id known without a live connection, so dials surface
    /// "not yet connected" rather than "unknown node". Called for every
    /// persisted node at startup and at enrollment.
    pub async fn prime(&self, node_id: Uuid) {
        let mut table = self.inner.lock().await;
        table.entry(node_id).or_default();
    }

    /// Park a fresh connection. An existing connection for the node is
    /// replaced and closed. Waiting dialers are woken.
    pub async fn register(&self, handle: AgentHandle) {
        let node_id = handle.node_id();
        let mut table = self.inner.lock().await;
        let entry = table.entry(node_id).or_default();
        if let Some(old) = entry.conn.replace(handle) {
            tracing::info!(%node_id, "replacing existing node connection");
            old.close();
        }
        entry.arrived.notify_waiters();
        gauge!("controller_registered_nodes")
            .set(table.values().filter(|e| e.conn.is_some()).count() as f64);
    }

    /// Drop a node's parked connection, keeping the node known so it can
    /// reconnect. No-op when `handle` is no longer the parked one.
    pub async fn remove_conn(&self, handle: &AgentHandle, reason: &str) {
        let node_id = handle.node_id();
        let mut table = self.inner.lock().await;
        if let Some(entry) = table.get_mut(&node_id) {
            let is_current = entry
                .conn
                .as_ref()
                .is_some_and(|current| current.same_channel(handle));
            if is_current {
                if let Some(old) = entry.conn.take() {
                    old.close();
                }
                counter!("controller_node_disconnect_total", "reason" => reason.to_string())
                    .increment(1);
                tracing::info!(%node_id, reason, "node connection removed");
            }
        }
        gauge!("controller_registered_nodes")
            .set(table.values().filter(|e| e.conn.is_some()).count() as f64);
    }

    /// Forget a node entirely (node record deleted).
    pub async fn remove(&self, node_id: Uuid) {
        let mut table = self.inner.lock().await;
        if let Some(entry) = table.remove(&node_id) {
            if let Some(conn) = entry.conn {
                conn.close();
            }
        }
    }

    /// Whether the node currently has a live connection.
    pub async fn is_connected(&self, node_id: Uuid) -> bool {
        let table = self.inner.lock().await;
        table
            .get(&node_id)
            .and_then(|entry| entry.conn.as_ref())
            .is_some_and(|conn| !conn.is_closed())
    }

    /// Take a connection for outbound RPC.
    ///
    /// Returns immediately when one is parked; waits up to `timeout` for
    /// a known node to (re)connect; fails `NotFound` for ids never
    /// preapproved or enrolled. A timed-out dial leaves the entry
    /// untouched.
    pub async fn dial(&self, node_id: Uuid, timeout: Duration) -> Result<AgentHandle> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let table = self.inner.lock().await;
            let Some(entry) = table.get(&node_id) else {
                return Err(Error::NotFound(format!("node {node_id}")));
            };
            if let Some(conn) = &entry.conn {
                if !conn.is_closed() {
                    return Ok(conn.clone());
                }
            }

            // Register interest before releasing the table lock so a
            // registration racing this dial cannot be missed.
            let arrived = entry.arrived.clone();
            let notified = arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(table);

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(Error::Unavailable(format!(
                    "timed out dialing node {node_id}"
                )));
            }
        }
    }

    /// Close and drop every parked connection (graceful shutdown).
    pub async fn drain(&self) {
        let mut table = self.inner.lock().await;
        for entry in table.values_mut() {
            if let Some(conn) = entry.conn.take() {
                conn.close();
            }
        }
        gauge!("controller_registered_nodes").set(0.0);
    }
}
