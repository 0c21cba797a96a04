use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::entities::{Kind, Record};

use crate::error::{Error, Result};

use super::{interface_key, Persistence};

/// Process-local persistence engine.
///
/// Backs tests and single-process deployments. Rows live in one table
/// map per entity kind behind a single lock, so cross-table invariants
/// (serial uniqueness, referential integrity) are checked and applied
/// atomically with the mutation that depends on them.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Kind, BTreeMap<String, Record>>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn storage_key(record: &Record) -> String {
    match record {
        Record::NetworkInterface(iface) => interface_key(&iface.node_id, &iface.id),
        other => other.id().to_string(),
    }
}

fn duplicate_serial(tables: &HashMap<Kind, BTreeMap<String, Record>>, record: &Record) -> bool {
    let Record::Node(node) = record else {
        return false;
    };
    tables
        .get(&Kind::Node)
        .map(|rows| {
            rows.values().any(|row| {
                row.id() != node.id && row.field("serial").as_deref() == Some(node.serial.as_str())
            })
        })
        .unwrap_or(false)
}

fn rows_matching<'a>(
    rows: &'a BTreeMap<String, Record>,
    filters: &[(&str, &str)],
) -> impl Iterator<Item = &'a Record> + 'a {
    let filters: Vec<(String, String)> = filters
        .iter()
        .map(|(field, value)| (field.to_string(), value.to_string()))
        .collect();
    rows.values().filter(move |row| {
        filters
            .iter()
            .all(|(field, value)| row.field(field).as_deref() == Some(value.as_str()))
    })
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn create(&self, record: Record) -> Result<()> {
        if record.id().is_empty() {
            return Err(Error::InvalidArgument("record id cannot be empty".into()));
        }
        let mut tables = self.tables.write().await;
        if duplicate_serial(&tables, &record) {
            let serial = record.field("serial").unwrap_or_default();
            return Err(Error::Conflict(format!("serial {serial} already in use")));
        }
        let key = storage_key(&record);
        let rows = tables.entry(record.kind()).or_default();
        if rows.contains_key(&key) {
            return Err(Error::Conflict(format!(
                "duplicate record in {}: {key}",
                record.kind().table_name()
            )));
        }
        rows.insert(key, record);
        Ok(())
    }

    async fn read(&self, kind: Kind, id: &str) -> Result<Option<Record>> {
        let tables = self.tables.read().await;
        Ok(tables.get(&kind).and_then(|rows| rows.get(id)).cloned())
    }

    async fn read_all(&self, kind: Kind) -> Result<Vec<Record>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&kind)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn filter(&self, kind: Kind, filters: &[(&str, &str)]) -> Result<Vec<Record>> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(&kind) else {
            return Ok(Vec::new());
        };
        for (field, _) in filters {
            if let Some(row) = rows.values().next() {
                if !row.filter_fields().contains(field) {
                    return Err(Error::InvalidArgument(format!(
                        "field {field} is not filterable on {}",
                        kind.table_name()
                    )));
                }
            }
        }
        Ok(rows_matching(rows, filters).cloned().collect())
    }

    async fn bulk_update(&self, records: Vec<Record>) -> Result<()> {
        let mut tables = self.tables.write().await;
        for record in &records {
            if record.id().is_empty() {
                return Err(Error::InvalidArgument("record id cannot be empty".into()));
            }
            if duplicate_serial(&tables, record) {
                let serial = record.field("serial").unwrap_or_default();
                return Err(Error::Conflict(format!("serial {serial} already in use")));
            }
        }
        for record in records {
            let key = storage_key(&record);
            tables.entry(record.kind()).or_default().insert(key, record);
        }
        Ok(())
    }

    async fn delete(&self, kind: Kind, id: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;

        // Interface rows are keyed per node; join rows reference the
        // bare device name alongside the node id.
        let (ref_id, extra_filter): (&str, Option<(&str, &str)>) =
            if kind == Kind::NetworkInterface {
                match id.split_once('/') {
                    Some((node_id, if_id)) => (if_id, Some(("node_id", node_id))),
                    None => (id, None),
                }
            } else {
                (id, None)
            };

        for (join_kind, field) in kind.referencing_joins() {
            if let Some(rows) = tables.get(join_kind) {
                let blocked = rows.values().any(|row| {
                    row.field(field).as_deref() == Some(ref_id)
                        && extra_filter
                            .map(|(f, v)| row.field(f).as_deref() == Some(v))
                            .unwrap_or(true)
                });
                if blocked {
                    return Err(Error::IntegrityInUse {
                        column: kind.fk_column(),
                        id: ref_id.to_string(),
                        table: join_kind.table_name(),
                    });
                }
            }
        }

        Ok(tables
            .get_mut(&kind)
            .and_then(|rows| rows.remove(id))
            .is_some())
    }
}
