//! The persistence port.
//!
//! The core consumes this capability; the storage engine behind it is
//! replaceable. Referential-integrity rules are enforced above the
//! datastore so the HTTP and gRPC surfaces observe identical
//! invariants regardless of engine.

use std::sync::Arc;

use async_trait::async_trait;

use common::entities::{Kind, Record};

use crate::error::Result;

mod memory;

pub use memory::MemoryStore;

/// Abstract CRUD + filter capability over [`Record`]s.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert a record. Fails with `Conflict` when the id (or a unique
    /// field such as the node serial) is already in use.
    async fn create(&self, record: Record) -> Result<()>;

    /// Read one record by id.
    async fn read(&self, kind: Kind, id: &str) -> Result<Option<Record>>;

    /// Read every record of a kind.
    async fn read_all(&self, kind: Kind) -> Result<Vec<Record>>;

    /// Read records matching every `(field, value)` pair. Fields must be
    /// in the entity's filter whitelist.
    async fn filter(&self, kind: Kind, filters: &[(&str, &str)]) -> Result<Vec<Record>>;

    /// Insert-or-replace a batch of records atomically.
    async fn bulk_update(&self, records: Vec<Record>) -> Result<()>;

    /// Delete one record by id, returning whether it existed. Fails with
    /// `IntegrityInUse` while any join row references the record.
    async fn delete(&self, kind: Kind, id: &str) -> Result<bool>;
}

/// Shared handle to the configured persistence engine.
pub type Store = Arc<dyn Persistence>;

/// Storage key for a network interface row.
///
/// Interface ids are node-local device names (`if0`), so rows are keyed
/// by `<node_id>/<interface_id>` to stay unique across nodes.
pub fn interface_key(node_id: &str, interface_id: &str) -> String {
    format!("{node_id}/{interface_id}")
}
