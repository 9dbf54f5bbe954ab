/*!
 * Catalog interface
 *
 * The catalog records logical objects and the state of their replicas. The
 * resource consumes it only through [`Catalog`]; [`MemoryCatalog`] is the
 * in-process implementation used by tests.
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::checksum::Checksum;
use crate::core::replica::{
    apply, DataObject, Replica, ReplicaEvent, ReplicaHandle, ReplicaStatus, WriteIntent,
};
use crate::core::retry::{Clock, SystemClock};
use crate::error::{NimbusError, Result};
use crate::store::StorageClass;

/// Replica bookkeeping consumed by the resource
pub trait Catalog: Send + Sync {
    /// Lock the replica of `logical_path` on `hierarchy` for writing,
    /// creating the object and replica if needed
    fn begin_write(
        &self,
        logical_path: &str,
        hierarchy: &str,
        intent: WriteIntent,
    ) -> Result<ReplicaHandle>;

    /// Record where the replica lives
    fn register_physical_path(
        &self,
        handle: &ReplicaHandle,
        physical_path: &str,
        storage_class: StorageClass,
    ) -> Result<()>;

    /// Finish a write: replica becomes `clean`; a `Put` makes siblings `stale`
    fn commit_write(
        &self,
        handle: &ReplicaHandle,
        size: u64,
        checksum: Option<Checksum>,
    ) -> Result<()>;

    /// Abandon a write: only this replica becomes `stale`
    fn fail_write(&self, handle: &ReplicaHandle) -> Result<()>;

    fn set_replica_status(
        &self,
        logical_path: &str,
        hierarchy: &str,
        status: ReplicaStatus,
    ) -> Result<()>;

    fn data_object(&self, logical_path: &str) -> Result<DataObject>;

    fn replicas(&self, logical_path: &str) -> Result<Vec<Replica>> {
        Ok(self.data_object(logical_path)?.replicas)
    }

    fn replica(&self, logical_path: &str, hierarchy: &str) -> Result<Replica> {
        self.data_object(logical_path)?
            .replica(hierarchy)
            .cloned()
            .ok_or_else(|| {
                NimbusError::NotFound(format!("{} has no replica on {}", logical_path, hierarchy))
            })
    }

    /// Move a logical object; ids and replicas are kept
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    fn set_physical_path(
        &self,
        logical_path: &str,
        hierarchy: &str,
        physical_path: &str,
    ) -> Result<()>;

    /// Drop a replica; the object goes with its last replica
    fn remove_replica(&self, logical_path: &str, hierarchy: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct CatalogState {
    objects: HashMap<String, DataObject>,
    next_id: u64,
}

/// Catalog held in process memory
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CatalogState {
                objects: HashMap::new(),
                next_id: 10_000,
            }),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn no_object(logical_path: &str) -> NimbusError {
        NimbusError::NotFound(format!("no data object at {}", logical_path))
    }

    fn no_replica(logical_path: &str, hierarchy: &str) -> NimbusError {
        NimbusError::NotFound(format!("{} has no replica on {}", logical_path, hierarchy))
    }

    fn with_replica<T>(
        &self,
        logical_path: &str,
        hierarchy: &str,
        f: impl FnOnce(&mut DataObject) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state();
        let object = state
            .objects
            .get_mut(logical_path)
            .ok_or_else(|| Self::no_object(logical_path))?;
        if object.replica(hierarchy).is_none() {
            return Err(Self::no_replica(logical_path, hierarchy));
        }
        f(object)
    }
}

impl Catalog for MemoryCatalog {
    fn begin_write(
        &self,
        logical_path: &str,
        hierarchy: &str,
        intent: WriteIntent,
    ) -> Result<ReplicaHandle> {
        let now = self.clock.now();
        let mut state = self.state();

        if !state.objects.contains_key(logical_path) {
            let id = state.next_id;
            state.next_id += 1;
            state.objects.insert(
                logical_path.to_string(),
                DataObject {
                    id,
                    logical_path: logical_path.to_string(),
                    replicas: Vec::new(),
                },
            );
        }
        let object = state
            .objects
            .get_mut(logical_path)
            .ok_or_else(|| Self::no_object(logical_path))?;

        let (number, created, physical_path) = match object.replica_mut(hierarchy) {
            Some(replica) => {
                apply(replica, logical_path, ReplicaEvent::BeginWrite)?;
                replica.modified_at = now;
                let existing = Some(replica.physical_path.clone()).filter(|p| !p.is_empty());
                (replica.number, false, existing)
            }
            None => {
                let number = object.next_replica_number();
                object.replicas.push(Replica {
                    number,
                    hierarchy: hierarchy.to_string(),
                    physical_path: String::new(),
                    size: 0,
                    checksum: None,
                    status: ReplicaStatus::Locked,
                    storage_class: StorageClass::Standard,
                    modified_at: now,
                });
                (number, true, None)
            }
        };

        tracing::debug!(
            logical_path,
            hierarchy,
            replica = number,
            created,
            "Replica locked for write"
        );

        Ok(ReplicaHandle {
            object_id: object.id,
            logical_path: logical_path.to_string(),
            replica_number: number,
            hierarchy: hierarchy.to_string(),
            intent,
            created,
            physical_path,
        })
    }

    fn register_physical_path(
        &self,
        handle: &ReplicaHandle,
        physical_path: &str,
        storage_class: StorageClass,
    ) -> Result<()> {
        self.with_replica(&handle.logical_path, &handle.hierarchy, |object| {
            if let Some(replica) = object.replica_mut(&handle.hierarchy) {
                replica.physical_path = physical_path.to_string();
                replica.storage_class = storage_class;
            }
            Ok(())
        })
    }

    fn commit_write(
        &self,
        handle: &ReplicaHandle,
        size: u64,
        checksum: Option<Checksum>,
    ) -> Result<()> {
        let now = self.clock.now();
        self.with_replica(&handle.logical_path, &handle.hierarchy, |object| {
            if let Some(replica) = object.replica_mut(&handle.hierarchy) {
                apply(replica, &handle.logical_path, ReplicaEvent::WriteSucceeded)?;
                replica.size = size;
                replica.checksum = checksum;
                replica.modified_at = now;
            }

            if handle.intent == WriteIntent::Put {
                for sibling in object
                    .replicas
                    .iter_mut()
                    .filter(|r| r.hierarchy != handle.hierarchy)
                {
                    // A sibling that is mid-write settles on its own
                    if sibling.status != ReplicaStatus::Locked {
                        apply(sibling, &handle.logical_path, ReplicaEvent::Superseded)?;
                    }
                }
            }
            Ok(())
        })
    }

    fn fail_write(&self, handle: &ReplicaHandle) -> Result<()> {
        let now = self.clock.now();
        self.with_replica(&handle.logical_path, &handle.hierarchy, |object| {
            if let Some(replica) = object.replica_mut(&handle.hierarchy) {
                apply(replica, &handle.logical_path, ReplicaEvent::WriteFailed)?;
                replica.modified_at = now;
            }
            Ok(())
        })
    }

    fn set_replica_status(
        &self,
        logical_path: &str,
        hierarchy: &str,
        status: ReplicaStatus,
    ) -> Result<()> {
        self.with_replica(logical_path, hierarchy, |object| {
            if let Some(replica) = object.replica_mut(hierarchy) {
                replica.status = status;
            }
            Ok(())
        })
    }

    fn data_object(&self, logical_path: &str) -> Result<DataObject> {
        self.state()
            .objects
            .get(logical_path)
            .cloned()
            .ok_or_else(|| Self::no_object(logical_path))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.state();
        if state.objects.contains_key(to) {
            return Err(NimbusError::Hierarchy(format!(
                "cannot rename {} to {}: target exists",
                from, to
            )));
        }
        let mut object = state
            .objects
            .remove(from)
            .ok_or_else(|| Self::no_object(from))?;
        object.logical_path = to.to_string();
        state.objects.insert(to.to_string(), object);
        Ok(())
    }

    fn set_physical_path(
        &self,
        logical_path: &str,
        hierarchy: &str,
        physical_path: &str,
    ) -> Result<()> {
        self.with_replica(logical_path, hierarchy, |object| {
            if let Some(replica) = object.replica_mut(hierarchy) {
                replica.physical_path = physical_path.to_string();
            }
            Ok(())
        })
    }

    fn remove_replica(&self, logical_path: &str, hierarchy: &str) -> Result<()> {
        let mut state = self.state();
        let object = state
            .objects
            .get_mut(logical_path)
            .ok_or_else(|| Self::no_object(logical_path))?;
        let before = object.replicas.len();
        object.replicas.retain(|r| r.hierarchy != hierarchy);
        if object.replicas.len() == before {
            return Err(Self::no_replica(logical_path, hierarchy));
        }
        if object.replicas.is_empty() {
            state.objects.remove(logical_path);
        }
        Ok(())
    }
}
