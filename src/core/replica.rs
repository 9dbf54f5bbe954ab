/*!
 * Replica state tracking
 *
 * A replica moves `absent -> locked -> {clean | stale}` on its first write.
 * Rewrites lock it again from either settled state. While locked, a second
 * writer is turned away.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::checksum::Checksum;
use crate::error::{NimbusError, Result};
use crate::store::StorageClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaStatus {
    /// Contents may not match the latest write
    Stale,
    /// Contents match the latest write
    Clean,
    /// A write is in progress
    Locked,
}

impl fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaStatus::Stale => f.write_str("stale"),
            ReplicaStatus::Clean => f.write_str("clean"),
            ReplicaStatus::Locked => f.write_str("locked"),
        }
    }
}

/// Something that happens to a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaEvent {
    BeginWrite,
    WriteSucceeded,
    WriteFailed,
    /// A sibling replica received a newer write
    Superseded,
}

/// Status after `event`. `current` is `None` for a replica that does not
/// exist yet. A refused event returns the status that refused it.
pub fn transition(
    current: Option<ReplicaStatus>,
    event: ReplicaEvent,
) -> std::result::Result<ReplicaStatus, ReplicaStatus> {
    use ReplicaEvent::*;
    use ReplicaStatus::*;

    match (current, event) {
        (None, BeginWrite) | (Some(Clean), BeginWrite) | (Some(Stale), BeginWrite) => Ok(Locked),
        (Some(Locked), BeginWrite) => Err(Locked),
        (Some(Locked), WriteSucceeded) => Ok(Clean),
        (Some(Locked), WriteFailed) => Ok(Stale),
        (Some(_), Superseded) => Ok(Stale),
        (Some(status), _) => Err(status),
        (None, _) => Err(Stale),
    }
}

/// What a write means for the other replicas of the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteIntent {
    /// New contents: a successful write makes every sibling stale
    #[default]
    Put,
    /// Copy of existing contents: siblings keep their status
    Replicate,
}

/// One physical copy of a data object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub number: u32,
    pub hierarchy: String,
    pub physical_path: String,
    pub size: u64,
    pub checksum: Option<Checksum>,
    pub status: ReplicaStatus,
    pub storage_class: StorageClass,
    pub modified_at: DateTime<Utc>,
}

/// Catalog entry for a logical object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    /// Assigned once, never changes
    pub id: u64,
    pub logical_path: String,
    pub replicas: Vec<Replica>,
}

impl DataObject {
    pub fn replica(&self, hierarchy: &str) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.hierarchy == hierarchy)
    }

    pub fn replica_mut(&mut self, hierarchy: &str) -> Option<&mut Replica> {
        self.replicas.iter_mut().find(|r| r.hierarchy == hierarchy)
    }

    /// Replica numbers are unique; a new one is one past the highest
    pub fn next_replica_number(&self) -> u32 {
        self.replicas
            .iter()
            .map(|r| r.number + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn count_with_status(&self, status: ReplicaStatus) -> usize {
        self.replicas.iter().filter(|r| r.status == status).count()
    }
}

/// Token for a write in progress, returned by `Catalog::begin_write`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaHandle {
    pub object_id: u64,
    pub logical_path: String,
    pub replica_number: u32,
    pub hierarchy: String,
    pub intent: WriteIntent,
    /// The replica did not exist before this write
    pub created: bool,
    /// Where an existing replica already lives; overwrites keep it
    pub physical_path: Option<String>,
}

/// Apply `event` to a replica in place
pub fn apply(replica: &mut Replica, logical_path: &str, event: ReplicaEvent) -> Result<()> {
    match transition(Some(replica.status), event) {
        Ok(next) => {
            replica.status = next;
            Ok(())
        }
        Err(ReplicaStatus::Locked) => Err(NimbusError::ReplicaLocked {
            logical_path: logical_path.to_string(),
            replica_number: replica.number,
        }),
        Err(status) => Err(NimbusError::Internal(format!(
            "replica {} of {} cannot take {:?} while {}",
            replica.number, logical_path, event, status
        ))),
    }
}
