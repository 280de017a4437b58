use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use strata_core::{ResourceId, ResourceState};
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::persistence::{StatePersistence, StateSnapshot};

/// Recorded state for every managed resource, keyed by id.
///
/// All access goes through short critical sections on one lock and every
/// read hands back a whole cloned record, so readers never see a record
/// half-way through an update. The lock is never held across an `.await`.
///
/// Field ownership is by convention: the engine writes `last_applied`,
/// `status`, `provider_handle` and `depends_on`; the drift detector writes
/// `live` and moves `Applied` to `Degraded`. Writers that race with each
/// other use [`StateStore::update`] rather than get-then-put.
pub struct StateStore {
    records: RwLock<BTreeMap<ResourceId, ResourceState>>,
    persistence: StatePersistence,
    flush_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(persistence: StatePersistence) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            persistence,
            flush_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StatePersistence::in_memory())
    }

    /// Build a store hydrated from whatever `persistence` already holds.
    pub async fn open(persistence: StatePersistence) -> Result<Self, StorageError> {
        let snapshot = persistence.load().await?;
        tracing::info!(resources = snapshot.resources.len(), "state store opened");
        Ok(Self {
            records: RwLock::new(snapshot.resources),
            persistence,
            flush_lock: Mutex::new(()),
        })
    }

    pub fn get(&self, id: &ResourceId) -> Option<ResourceState> {
        self.read().get(id).cloned()
    }

    pub fn put(&self, state: ResourceState) {
        self.write().insert(state.id.clone(), state);
    }

    pub fn delete(&self, id: &ResourceId) -> Option<ResourceState> {
        self.write().remove(id)
    }

    /// Every record, ordered by id.
    pub fn list_all(&self) -> Vec<ResourceState> {
        self.read().values().cloned().collect()
    }

    /// Atomic read-modify-write of one record. Returns `None` if the id has
    /// no record.
    pub fn update<T>(&self, id: &ResourceId, f: impl FnOnce(&mut ResourceState) -> T) -> Option<T> {
        let mut records = self.write();
        let record = records.get_mut(id)?;
        let out = f(record);
        record.touch();
        Some(out)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::new(self.read().clone())
    }

    /// Flush the current snapshot. Concurrent callers are serialised so two
    /// flushes never interleave their temp-file writes.
    pub async fn persist(&self) -> Result<(), StorageError> {
        let _guard = self.flush_lock.lock().await;
        let snapshot = self.snapshot();
        self.persistence.flush(&snapshot).await
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ResourceId, ResourceState>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ResourceId, ResourceState>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}
