/*!
 * Cold-storage staging
 *
 * Objects in `GLACIER` or `DEEP_ARCHIVE` must be restored before they can be
 * read. The first read of such an object issues the restore request and
 * fails with a retry-later error; later reads report that the restore is
 * still running without issuing another request; once the store reports a
 * restored copy the read proceeds and the marker is dropped.
 *
 * `GLACIER_IR` objects are readable immediately and never staged.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use super::retry::Clock;
use crate::error::{NimbusError, Result};
use crate::store::{
    ObjectHead, ObjectKey, ObjectStore, RestorationTier, RestoreRequest, RestoreStatus,
    StorageClass,
};

pub const QUEUED_MESSAGE: &str =
    "Object is in glacier and has been queued for restoration.  Try again later.";
pub const IN_PROGRESS_MESSAGE: &str =
    "Object is in glacier and is currently being restored.  Try again later.";

/// Readability of an object as reported by HEAD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    DoesNotExist,
    Readable,
    /// Archived with no restored copy and no restore running
    Archived,
    RestoreInProgress,
}

/// Classify a HEAD response
pub fn classify(head: Option<&ObjectHead>) -> ObjectStatus {
    match head {
        None => ObjectStatus::DoesNotExist,
        Some(head) if !head.storage_class.requires_restore() => ObjectStatus::Readable,
        Some(head) => match head.restore {
            Some(RestoreStatus::Completed) => ObjectStatus::Readable,
            Some(RestoreStatus::Ongoing) => ObjectStatus::RestoreInProgress,
            None => ObjectStatus::Archived,
        },
    }
}

/// Where a staged object is in its restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingState {
    /// Restore was requested by this read
    Queued,
    /// An earlier restore request is still running
    InProgress,
}

impl StagingState {
    pub fn message(&self) -> &'static str {
        match self {
            StagingState::Queued => QUEUED_MESSAGE,
            StagingState::InProgress => IN_PROGRESS_MESSAGE,
        }
    }
}

/// Bookkeeping for one outstanding restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedObjectMarker {
    pub requested_at: DateTime<Utc>,
    pub estimated_ready: DateTime<Utc>,
    pub storage_class: StorageClass,
    pub tier: RestorationTier,
}

/// Tracks restores issued on behalf of readers
pub struct StagingTracker {
    markers: Mutex<HashMap<ObjectKey, StagedObjectMarker>>,
    request: RestoreRequest,
    clock: Arc<dyn Clock>,
}

impl StagingTracker {
    pub fn new(request: RestoreRequest, clock: Arc<dyn Clock>) -> Self {
        Self {
            markers: Mutex::new(HashMap::new()),
            request,
            clock,
        }
    }

    fn markers(&self) -> MutexGuard<'_, HashMap<ObjectKey, StagedObjectMarker>> {
        self.markers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn marker(&self, key: &ObjectKey) -> Option<StagedObjectMarker> {
        self.markers().get(key).cloned()
    }

    /// Number of objects with a restore outstanding
    pub fn pending(&self) -> usize {
        self.markers().len()
    }

    fn new_marker(&self, class: StorageClass) -> StagedObjectMarker {
        let now = self.clock.now();
        let eta = self.request.tier.typical_duration(class);
        StagedObjectMarker {
            requested_at: now,
            estimated_ready: now
                + chrono::Duration::from_std(eta).unwrap_or(chrono::Duration::zero()),
            storage_class: class,
            tier: self.request.tier,
        }
    }

    fn staging(key: &ObjectKey, state: StagingState) -> NimbusError {
        NimbusError::Staging {
            key: key.to_string(),
            state,
            message: state.message().to_string(),
        }
    }

    /// Decide whether `key` can be read now, issuing a restore if needed.
    ///
    /// `head` is the object's current HEAD response. Returns it unchanged
    /// when the object is readable.
    pub fn ensure_readable(
        &self,
        store: &dyn ObjectStore,
        key: &ObjectKey,
        head: Option<ObjectHead>,
    ) -> Result<ObjectHead> {
        match classify(head.as_ref()) {
            ObjectStatus::DoesNotExist => {
                self.markers().remove(key);
                Err(NimbusError::ObjectNotFound {
                    key: key.to_string(),
                })
            }
            ObjectStatus::Readable => {
                if let Some(marker) = self.markers().remove(key) {
                    info!(
                        key = %key,
                        requested_at = %marker.requested_at,
                        "Restored object is readable"
                    );
                }
                head.ok_or_else(|| NimbusError::Internal(format!("no HEAD response for {}", key)))
            }
            ObjectStatus::RestoreInProgress => {
                let class = head
                    .as_ref()
                    .map(|h| h.storage_class)
                    .unwrap_or(StorageClass::Glacier);
                self.markers()
                    .entry(key.clone())
                    .or_insert_with(|| self.new_marker(class));
                Err(Self::staging(key, StagingState::InProgress))
            }
            ObjectStatus::Archived => {
                let class = head
                    .as_ref()
                    .map(|h| h.storage_class)
                    .unwrap_or(StorageClass::Glacier);
                self.request_restore(store, key, class)
            }
        }
    }

    fn request_restore(
        &self,
        store: &dyn ObjectStore,
        key: &ObjectKey,
        class: StorageClass,
    ) -> Result<ObjectHead> {
        // A restored copy lives for `days`; past that an old marker is stale
        if let Some(marker) = self.marker(key) {
            let lifetime = chrono::Duration::days(i64::from(self.request.days));
            if self.clock.now() < marker.requested_at + lifetime {
                return Err(Self::staging(key, StagingState::InProgress));
            }
            self.markers().remove(key);
        }

        match store.restore_object(key, &self.request) {
            Ok(()) => {
                info!(
                    key = %key,
                    storage_class = %class,
                    tier = %self.request.tier,
                    days = self.request.days,
                    "Requested restore of archived object"
                );
                self.markers().insert(key.clone(), self.new_marker(class));
                Err(Self::staging(key, StagingState::Queued))
            }
            Err(e) if e.service_code() == Some("RestoreAlreadyInProgress") => {
                self.markers().insert(key.clone(), self.new_marker(class));
                Err(Self::staging(key, StagingState::InProgress))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Restore request failed");
                Err(NimbusError::StagingFailed {
                    key: key.to_string(),
                    source: e,
                })
            }
        }
    }
}
