//! Node Registry Store
//!
//! The durable keyed store for node records is an external collaborator; this
//! module defines the contract the lifecycle manager relies on and ships an
//! in-memory implementation used by single-process deployments and tests.
//!
//! ## Contract
//! - `insert` fails if the record id **or** the node identifier already exists.
//! - `update_fields` fails with `NotFound` if the id vanished.
//! - `delete` fails with `NotFound` if the id does not exist.
//! - No multi-record transactions.

use super::types::{NodeFieldUpdate, NodeOid, NodeRecord};
use crate::error::RegistryError;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[async_trait]
pub trait NodeRegistry: Send + Sync {
    async fn get_by_id(&self, oid: &NodeOid) -> Result<NodeRecord, RegistryError>;

    async fn search_by_name(&self, identifier: &str) -> Result<Vec<NodeRecord>, RegistryError>;

    async fn list(&self) -> Result<Vec<NodeRecord>, RegistryError>;

    async fn insert(&self, record: NodeRecord) -> Result<(), RegistryError>;

    async fn update_fields(
        &self,
        oid: &NodeOid,
        updates: &[NodeFieldUpdate],
    ) -> Result<(), RegistryError>;

    async fn delete(&self, oid: &NodeOid) -> Result<(), RegistryError>;
}

/// `DashMap`-backed registry.
///
/// Records are keyed by id; a second map indexes identifiers so that insert
/// can enforce name uniqueness atomically.
pub struct InMemoryNodeRegistry {
    records: DashMap<NodeOid, NodeRecord>,
    names: DashMap<String, NodeOid>,
    available: AtomicBool,
}

impl InMemoryNodeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulates the backing store becoming unreachable (or reachable again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Raw overwrite bypassing the narrow update path, the way a foreign
    /// process (or an operator) could rewrite a row in the backing store.
    pub fn overwrite(&self, record: NodeRecord) {
        let previous = self
            .records
            .get(&record.oid)
            .map(|entry| entry.identifier.clone());
        if let Some(previous) = previous
            && previous != record.identifier
        {
            self.names.remove_if(&previous, |_, owner| owner == &record.oid);
        }
        self.names
            .insert(record.identifier.clone(), record.oid.clone());
        self.records.insert(record.oid.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn ensure_available(&self) -> Result<(), RegistryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::Unavailable {
                message: "in-memory registry switched offline".into(),
            })
        }
    }
}

impl Default for InMemoryNodeRegistry {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            names: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl NodeRegistry for InMemoryNodeRegistry {
    async fn get_by_id(&self, oid: &NodeOid) -> Result<NodeRecord, RegistryError> {
        self.ensure_available()?;
        self.records
            .get(oid)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::NotFound { oid: oid.clone() })
    }

    async fn search_by_name(&self, identifier: &str) -> Result<Vec<NodeRecord>, RegistryError> {
        self.ensure_available()?;
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().identifier == identifier)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn list(&self) -> Result<Vec<NodeRecord>, RegistryError> {
        self.ensure_available()?;
        let mut nodes: Vec<NodeRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(nodes)
    }

    async fn insert(&self, record: NodeRecord) -> Result<(), RegistryError> {
        self.ensure_available()?;

        // The name entry stays locked until the record is in place.
        match self.names.entry(record.identifier.clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists {
                detail: format!("identifier '{}'", record.identifier),
            }),
            Entry::Vacant(name_slot) => match self.records.entry(record.oid.clone()) {
                Entry::Occupied(_) => Err(RegistryError::AlreadyExists {
                    detail: format!("id {}", record.oid),
                }),
                Entry::Vacant(record_slot) => {
                    name_slot.insert(record.oid.clone());
                    tracing::debug!(
                        "Inserted node record {} ({})",
                        record.oid,
                        record.identifier
                    );
                    record_slot.insert(record);
                    Ok(())
                }
            },
        }
    }

    async fn update_fields(
        &self,
        oid: &NodeOid,
        updates: &[NodeFieldUpdate],
    ) -> Result<(), RegistryError> {
        self.ensure_available()?;
        match self.records.get_mut(oid) {
            Some(mut record) => {
                for update in updates {
                    update.apply(&mut record);
                }
                Ok(())
            }
            None => Err(RegistryError::NotFound { oid: oid.clone() }),
        }
    }

    async fn delete(&self, oid: &NodeOid) -> Result<(), RegistryError> {
        self.ensure_available()?;
        match self.records.remove(oid) {
            Some((_, record)) => {
                self.names
                    .remove_if(&record.identifier, |_, owner| owner == oid);
                tracing::debug!("Deleted node record {} ({})", oid, record.identifier);
                Ok(())
            }
            None => Err(RegistryError::NotFound { oid: oid.clone() }),
        }
    }
}
