/*!
 * S3 resource
 *
 * Ties the catalog, the transfer engine, staging, and the naming policy
 * together into the operations a storage resource offers: put, get,
 * unlink, rename, copy, replicate, stat, and the archive-mode cache
 * transfers.
 *
 * Every write locks its replica in the catalog first and settles it as
 * `clean` or `stale` once the store has answered.
 */

use serde::Serialize;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::{Credentials, HostMode, ResourceConfig};
use crate::core::checksum::{file_checksum, Checksum};
use crate::core::engine::{CopyMethod, TransferEngine, TransferOutcome};
use crate::core::glacier::StagingTracker;
use crate::core::naming::{parse_s3_path, physical_key, NamingPolicy};
use crate::core::planner::TransferPlan;
use crate::core::reader::ObjectReader;
use crate::core::replica::{Replica, ReplicaHandle, ReplicaStatus, WriteIntent};
use crate::core::retry::{Clock, SystemClock};
use crate::error::{NimbusError, Result};
use crate::store::{ObjectHead, ObjectKey, ObjectStore, RestoreRequest};

/// Options for writes
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Record a `sha2:` checksum on the replica
    pub register_checksum: bool,
    pub intent: WriteIntent,
}

/// Options for reads
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Compare the downloaded bytes against the registered checksum
    pub verify_checksum: bool,
}

/// Catalog and store view of one replica
#[derive(Debug, Clone, Serialize)]
pub struct ObjectStat {
    pub replica: Replica,
    pub key: ObjectKey,
    pub size: u64,
    pub etag: Option<String>,
    pub storage_class: String,
    pub restoring: bool,
}

/// A cacheless (or archive-attached) S3 resource
pub struct S3Resource {
    config: ResourceConfig,
    hierarchy: String,
    vault_path: String,
    engine: Arc<TransferEngine>,
    catalog: Arc<dyn Catalog>,
    staging: StagingTracker,
    /// Kept as a message so every operation reports the same failure
    credentials: std::result::Result<Credentials, String>,
}

impl S3Resource {
    pub fn new(
        config: ResourceConfig,
        vault_path: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self::with_clock(config, vault_path, store, catalog, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: ResourceConfig,
        vault_path: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let credentials = config.load_credentials().map_err(|e| e.to_string());
        if let Err(message) = &credentials {
            debug!(resource = %config.resource_name, error = %message, "No credentials loaded");
        }

        let engine = TransferEngine::new(store, &config).with_clock(clock.clone());
        let staging = StagingTracker::new(
            RestoreRequest {
                days: config.restoration_days,
                tier: config.restoration_tier,
            },
            clock,
        );

        Self {
            hierarchy: config.resource_name.clone(),
            vault_path: vault_path.into(),
            engine: Arc::new(engine),
            catalog,
            staging,
            credentials,
            config,
        }
    }

    /// Use `credentials` instead of the ones found at construction
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Ok(credentials);
        self
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn hierarchy(&self) -> &str {
        &self.hierarchy
    }

    pub fn vault_path(&self) -> &str {
        &self.vault_path
    }

    pub fn engine(&self) -> &Arc<TransferEngine> {
        &self.engine
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn staging(&self) -> &StagingTracker {
        &self.staging
    }

    /// The transfer plan a put of `size` bytes would use
    pub fn plan_for(&self, size: u64) -> Result<TransferPlan> {
        self.engine.plan_upload(size)
    }

    fn check_credentials(&self) -> Result<()> {
        match &self.credentials {
            Ok(_) => Ok(()),
            Err(message) => Err(NimbusError::Credentials(message.clone())),
        }
    }

    fn require_cacheless(&self, operation: &str) -> Result<()> {
        if self.config.host_mode.is_cacheless() {
            Ok(())
        } else {
            Err(NimbusError::NotSupported(format!(
                "{} on {} requires a cacheless host mode",
                operation, self.hierarchy
            )))
        }
    }

    fn require_archive(&self, operation: &str) -> Result<()> {
        if self.config.host_mode == HostMode::ArchiveAttached {
            Ok(())
        } else {
            Err(NimbusError::NotSupported(format!(
                "{} on {} requires archive_attached host mode",
                operation, self.hierarchy
            )))
        }
    }

    fn physical_path(&self, object_id: u64, logical_path: &str) -> Result<String> {
        physical_key(
            object_id,
            logical_path,
            &self.vault_path,
            self.config.naming_policy,
        )
    }

    /// Key for a write: an existing replica keeps its path, a new one gets
    /// a fresh key under the naming policy
    fn write_target(&self, handle: &ReplicaHandle) -> Result<String> {
        match &handle.physical_path {
            Some(existing) => Ok(existing.clone()),
            None => self.physical_path(handle.object_id, &handle.logical_path),
        }
    }

    /// This resource's replica of `logical_path` and its object key
    fn located_replica(&self, logical_path: &str) -> Result<(Replica, ObjectKey)> {
        let replica = self.catalog.replica(logical_path, &self.hierarchy)?;
        let key = parse_s3_path(&replica.physical_path)?;
        Ok((replica, key))
    }

    /// HEAD the object and make sure it can be read, staging it if archived
    fn readable_head(&self, key: &ObjectKey) -> Result<ObjectHead> {
        let head = self.engine.head(key)?;
        self.staging
            .ensure_readable(self.engine.store().as_ref(), key, head)
    }

    /// Like `located_replica`, but a replica held by a writer is refused
    fn unlocked_replica(&self, logical_path: &str) -> Result<(Replica, ObjectKey)> {
        let (replica, key) = self.located_replica(logical_path)?;
        if replica.status == ReplicaStatus::Locked {
            return Err(NimbusError::ReplicaLocked {
                logical_path: logical_path.to_string(),
                replica_number: replica.number,
            });
        }
        Ok((replica, key))
    }

    fn readable_replica(&self, logical_path: &str) -> Result<(Replica, ObjectKey, ObjectHead)> {
        let (replica, key) = self.unlocked_replica(logical_path)?;
        let head = self.readable_head(&key)?;
        Ok((replica, key, head))
    }

    /// Settle a write in the catalog
    fn settle<T>(
        &self,
        handle: &ReplicaHandle,
        result: Result<T>,
        summary: impl FnOnce(&T) -> (u64, Option<Checksum>),
    ) -> Result<T> {
        match result {
            Ok(value) => {
                let (size, checksum) = summary(&value);
                self.catalog.commit_write(handle, size, checksum)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(catalog_error) = self.catalog.fail_write(handle) {
                    warn!(
                        logical_path = %handle.logical_path,
                        error = %catalog_error,
                        "Could not mark replica stale"
                    );
                }
                warn!(
                    logical_path = %handle.logical_path,
                    hierarchy = %handle.hierarchy,
                    code = %e.code(),
                    error = %e,
                    "Write failed, replica is stale"
                );
                Err(e)
            }
        }
    }

    /// Lock the replica, upload, and settle
    fn write_object(
        &self,
        source: &mut dyn Read,
        size: u64,
        logical_path: &str,
        options: &WriteOptions,
    ) -> Result<TransferOutcome> {
        let plan = self.engine.plan_upload(size)?;
        let handle = self
            .catalog
            .begin_write(logical_path, &self.hierarchy, options.intent)?;

        let result = self.write_target(&handle).and_then(|physical| {
            let key = parse_s3_path(&physical)?;
            self.catalog.register_physical_path(
                &handle,
                &physical,
                self.config.storage_class,
            )?;
            self.engine.upload(&plan, source, &key)
        });

        let keep_checksum = options.register_checksum || self.config.enable_md5;
        self.settle(&handle, result, |outcome| {
            let checksum = if keep_checksum {
                outcome.checksum.clone()
            } else {
                None
            };
            (outcome.bytes, checksum)
        })
    }

    /// Upload a local file as `logical_path`
    pub fn put(
        &self,
        source: &Path,
        logical_path: &str,
        options: &WriteOptions,
    ) -> Result<TransferOutcome> {
        let mut file = File::open(source)?;
        let size = file.metadata()?.len();
        self.put_reader(&mut file, size, logical_path, options)
    }

    /// Upload `size` bytes from `source` as `logical_path`
    pub fn put_reader(
        &self,
        source: &mut dyn Read,
        size: u64,
        logical_path: &str,
        options: &WriteOptions,
    ) -> Result<TransferOutcome> {
        self.check_credentials()?;
        self.require_cacheless("put")?;
        self.write_object(source, size, logical_path, options)
    }

    /// Download this resource's replica of `logical_path` to `destination`.
    ///
    /// The data lands in a temporary file next to `destination` and is
    /// renamed into place only after the transfer (and verification) succeeds.
    pub fn get(
        &self,
        logical_path: &str,
        destination: &Path,
        options: &ReadOptions,
    ) -> Result<TransferOutcome> {
        self.check_credentials()?;
        self.require_cacheless("get")?;
        let (replica, key, head) = self.readable_replica(logical_path)?;

        let directory = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let partial = tempfile::Builder::new()
            .prefix(".nimbus-get-")
            .tempfile_in(directory)?
            .into_temp_path();

        let plan = self.engine.plan_download(head.size)?;
        let outcome = self.engine.download(&plan, &key, &partial)?;

        if options.verify_checksum {
            if let Some(expected) = &replica.checksum {
                let actual = file_checksum(&partial)?;
                if actual != *expected {
                    return Err(NimbusError::ChecksumMismatch {
                        key: key.to_string(),
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
        }

        partial
            .persist(destination)
            .map_err(|e| NimbusError::Io(e.error))?;
        Ok(outcome)
    }

    /// Seekable reader over this resource's replica of `logical_path`
    pub fn read_stream(&self, logical_path: &str) -> Result<ObjectReader> {
        self.check_credentials()?;
        self.require_cacheless("read")?;
        let (_, key, head) = self.readable_replica(logical_path)?;
        Ok(ObjectReader::new(self.engine.clone(), key, head.size))
    }

    /// Delete the replica's object, then its catalog entry.
    /// A rejected delete keeps the catalog entry; a locked replica is refused.
    pub fn unlink(&self, logical_path: &str) -> Result<()> {
        self.check_credentials()?;
        let (_, key) = self.unlocked_replica(logical_path)?;
        self.engine.delete(&key)?;
        self.catalog.remove_replica(logical_path, &self.hierarchy)?;
        info!(logical_path, key = %key, "Replica removed");
        Ok(())
    }

    /// Rename a logical object.
    ///
    /// Consistent naming moves the object to its new key; decoupled naming
    /// only updates the catalog.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.check_credentials()?;
        if self.catalog.data_object(to).is_ok() {
            return Err(NimbusError::Hierarchy(format!(
                "cannot rename {} to {}: target exists",
                from, to
            )));
        }
        let object = self.catalog.data_object(from)?;
        let (replica, old_key) = self.unlocked_replica(from)?;

        match self.config.naming_policy {
            NamingPolicy::Decoupled => {
                self.catalog.rename(from, to)?;
                debug!(from, to, key = %old_key, "Renamed without moving data");
            }
            NamingPolicy::Consistent => {
                let new_physical = self.physical_path(object.id, to)?;
                let new_key = parse_s3_path(&new_physical)?;
                if new_key != old_key {
                    let method = self.engine.copy(&old_key, &new_key, replica.size)?;
                    self.engine.delete(&old_key)?;
                    info!(from = %old_key, to = %new_key, method = ?method, "Object moved");
                }
                self.catalog.rename(from, to)?;
                self.catalog
                    .set_physical_path(to, &self.hierarchy, &new_physical)?;
            }
        }
        Ok(())
    }

    /// Copy `source` to a new logical object `destination` on this resource
    pub fn copy(&self, source: &str, destination: &str) -> Result<CopyMethod> {
        self.check_credentials()?;
        self.require_cacheless("copy")?;
        let (replica, src_key, head) = self.readable_replica(source)?;

        let handle = self
            .catalog
            .begin_write(destination, &self.hierarchy, WriteIntent::Put)?;
        let result = self.write_target(&handle).and_then(|physical| {
            let dest_key = parse_s3_path(&physical)?;
            self.catalog.register_physical_path(
                &handle,
                &physical,
                self.config.storage_class,
            )?;
            self.engine.copy(&src_key, &dest_key, head.size)
        });
        self.settle(&handle, result, |_| (head.size, replica.checksum.clone()))
    }

    /// Create or refresh this resource's replica from `source`'s clean replica
    pub fn replicate(&self, source: &S3Resource, logical_path: &str) -> Result<TransferOutcome> {
        self.check_credentials()?;
        self.require_cacheless("replicate")?;
        let source_replica = self.catalog.replica(logical_path, source.hierarchy())?;
        if source_replica.status != ReplicaStatus::Clean {
            return Err(NimbusError::Hierarchy(format!(
                "replica {} of {} on {} is {}, not clean",
                source_replica.number,
                logical_path,
                source.hierarchy(),
                source_replica.status
            )));
        }

        let mut reader = source.read_stream(logical_path)?;
        let size = reader.size();
        let options = WriteOptions {
            register_checksum: source_replica.checksum.is_some(),
            intent: WriteIntent::Replicate,
        };
        let outcome = self.write_object(&mut reader, size, logical_path, &options)?;

        if let Some(expected) = &source_replica.checksum {
            if outcome.checksum.as_ref() != Some(expected) {
                self.catalog
                    .set_replica_status(logical_path, &self.hierarchy, ReplicaStatus::Stale)?;
                return Err(NimbusError::ChecksumMismatch {
                    key: outcome.key,
                    expected: expected.to_string(),
                    actual: outcome
                        .checksum
                        .map(|c| c.to_string())
                        .unwrap_or_default(),
                });
            }
        }
        Ok(outcome)
    }

    /// Catalog entry and store metadata of this resource's replica
    pub fn stat(&self, logical_path: &str) -> Result<ObjectStat> {
        self.check_credentials()?;
        let (replica, key) = self.located_replica(logical_path)?;
        let head = self
            .engine
            .head(&key)?
            .ok_or_else(|| NimbusError::ObjectNotFound {
                key: key.to_string(),
            })?;
        Ok(ObjectStat {
            replica,
            key,
            size: head.size,
            etag: head.etag,
            storage_class: head.storage_class.to_string(),
            restoring: head.restore == Some(crate::store::RestoreStatus::Ongoing),
        })
    }

    /// Archive mode: copy the replica's object into `cache_file`.
    /// A failed read leaves no cache file behind.
    pub fn stage_to_cache(&self, logical_path: &str, cache_file: &Path) -> Result<TransferOutcome> {
        self.check_credentials()?;
        self.require_archive("stage to cache")?;
        let (_, key, head) = self.readable_replica(logical_path)?;

        let staged = self
            .engine
            .plan_download(head.size)
            .and_then(|plan| self.engine.download(&plan, &key, cache_file));
        if staged.is_err() && cache_file.exists() {
            if let Err(e) = fs::remove_file(cache_file) {
                warn!(path = %cache_file.display(), error = %e, "Could not remove partial cache file");
            }
        }
        staged
    }

    /// Archive mode: upload `cache_file` as the replica of `logical_path`
    pub fn sync_to_archive(
        &self,
        cache_file: &Path,
        logical_path: &str,
        options: &WriteOptions,
    ) -> Result<TransferOutcome> {
        self.check_credentials()?;
        self.require_archive("sync to archive")?;
        let mut file = File::open(cache_file)?;
        let size = file.metadata()?.len();
        self.write_object(&mut file, size, logical_path, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::config::TransferSettings;
    use crate::store::{MemoryObjectStore, MemoryStoreOptions, StoreError, StoreOp};
    use std::io::{Cursor, Read as _};
    use tempfile::TempDir;

    const PATH: &str = "/tempZone/home/alice/a.bin";

    fn config(cache: &Path) -> ResourceConfig {
        ResourceConfig {
            resource_name: "s3resc".to_string(),
            transfer: TransferSettings {
                single_buffer_threshold: 64 * 1024,
                part_size: 16 * 1024,
                minimum_part_size: 16 * 1024,
                max_threads: 3,
                ..Default::default()
            },
            cache_directory: cache.to_path_buf(),
            ..Default::default()
        }
    }

    struct Fixture {
        store: Arc<MemoryObjectStore>,
        catalog: Arc<MemoryCatalog>,
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryObjectStore::with_options(MemoryStoreOptions {
                    minimum_part_size: 16 * 1024,
                    supports_copy: true,
                })),
                catalog: Arc::new(MemoryCatalog::new()),
                dir: TempDir::new().unwrap(),
            }
        }

        fn resource(&self, config: ResourceConfig) -> S3Resource {
            S3Resource::new(config, "/bucket/vault", self.store.clone(), self.catalog.clone())
                .with_credentials(Credentials::new("AKIDEXAMPLE", "secret"))
        }

        fn default_resource(&self) -> S3Resource {
            self.resource(config(self.dir.path()))
        }
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn put(resource: &S3Resource, path: &str, bytes: &[u8]) -> Result<TransferOutcome> {
        resource.put_reader(
            &mut Cursor::new(bytes.to_vec()),
            bytes.len() as u64,
            path,
            &WriteOptions {
                register_checksum: true,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_put_get_roundtrip() {
        let fx = Fixture::new();
        let resource = fx.default_resource();
        let bytes = data(100_000);

        put(&resource, PATH, &bytes).unwrap();
        let replica = fx.catalog.replica(PATH, "s3resc").unwrap();
        assert_eq!(replica.status, ReplicaStatus::Clean);
        assert_eq!(replica.physical_path, "/bucket/vault/home/alice/a.bin");
        assert!(replica.checksum.is_some());

        let target = fx.dir.path().join("out.bin");
        resource
            .get(PATH, &target, &ReadOptions { verify_checksum: true })
            .unwrap();
        assert_eq!(fs::read(&target).unwrap(), bytes);
    }

    #[test]
    fn test_missing_credentials_fail_every_operation() {
        let fx = Fixture::new();
        let mut cfg = config(fx.dir.path());
        cfg.auth_file = Some(fx.dir.path().join("absent"));
        let resource = S3Resource::new(cfg, "/bucket/vault", fx.store.clone(), fx.catalog.clone());

        let put_err = put(&resource, PATH, b"x").unwrap_err();
        let unlink_err = resource.unlink(PATH).unwrap_err();
        assert_eq!(put_err.code().as_str(), "SYS_CONFIG_FILE_ERR");
        assert_eq!(put_err.to_string(), unlink_err.to_string());
        assert_eq!(fx.store.call_count(StoreOp::Put), 0);
    }

    #[test]
    fn test_archive_mode_rejects_direct_io() {
        let fx = Fixture::new();
        let mut cfg = config(fx.dir.path());
        cfg.host_mode = HostMode::ArchiveAttached;
        let resource = fx.resource(cfg);

        let err = put(&resource, PATH, b"x").unwrap_err();
        assert_eq!(err.code().as_str(), "SYS_NOT_SUPPORTED");
    }

    #[test]
    fn test_rejected_delete_keeps_catalog_entry() {
        let fx = Fixture::new();
        let resource = fx.default_resource();
        put(&resource, PATH, b"keep me").unwrap();

        fx.store.inject_fault(
            StoreOp::Delete,
            StoreError::AccessDenied("delete denied".to_string()),
            1,
        );
        let err = resource.unlink(PATH).unwrap_err();
        assert_eq!(err.code().as_str(), "S3_FILE_UNLINK_ERR");
        assert!(fx.catalog.replica(PATH, "s3resc").is_ok());

        resource.unlink(PATH).unwrap();
        assert!(fx.catalog.data_object(PATH).is_err());
        assert_eq!(fx.store.object_count(), 0);
    }

    #[test]
    fn test_locked_replica_cannot_be_unlinked_or_renamed() {
        let fx = Fixture::new();
        let resource = fx.default_resource();
        put(&resource, PATH, b"in flight").unwrap();
        let handle = fx
            .catalog
            .begin_write(PATH, "s3resc", WriteIntent::Put)
            .unwrap();

        let err = resource.unlink(PATH).unwrap_err();
        assert_eq!(err.code().as_str(), "LOCKED_DATA_OBJECT_ACCESS");
        let err = resource
            .rename(PATH, "/tempZone/home/alice/b.bin")
            .unwrap_err();
        assert_eq!(err.code().as_str(), "LOCKED_DATA_OBJECT_ACCESS");

        assert_eq!(fx.store.object_count(), 1);
        assert_eq!(fx.store.call_count(StoreOp::Delete), 0);
        assert!(fx.catalog.data_object("/tempZone/home/alice/b.bin").is_err());
        fx.catalog.commit_write(&handle, 9, None).unwrap();

        resource.unlink(PATH).unwrap();
        assert_eq!(fx.store.object_count(), 0);
    }

    #[test]
    fn test_consistent_rename_moves_object() {
        let fx = Fixture::new();
        let resource = fx.default_resource();
        put(&resource, PATH, b"moving").unwrap();

        resource.rename(PATH, "/tempZone/home/alice/b.bin").unwrap();
        let replica = fx
            .catalog
            .replica("/tempZone/home/alice/b.bin", "s3resc")
            .unwrap();
        assert_eq!(replica.physical_path, "/bucket/vault/home/alice/b.bin");
        assert!(!fx.store.contains(&ObjectKey::new("bucket", "vault/home/alice/a.bin")));
        assert!(fx.store.contains(&ObjectKey::new("bucket", "vault/home/alice/b.bin")));
    }

    #[test]
    fn test_decoupled_rename_keeps_key() {
        let fx = Fixture::new();
        let mut cfg = config(fx.dir.path());
        cfg.naming_policy = NamingPolicy::Decoupled;
        let resource = fx.resource(cfg);
        put(&resource, PATH, b"staying").unwrap();
        let before = fx.catalog.replica(PATH, "s3resc").unwrap().physical_path;

        resource.rename(PATH, "/tempZone/home/bob/c.bin").unwrap();
        let after = fx
            .catalog
            .replica("/tempZone/home/bob/c.bin", "s3resc")
            .unwrap()
            .physical_path;
        assert_eq!(before, after);
        assert_eq!(fx.store.call_count(StoreOp::Copy), 0);
    }

    #[test]
    fn test_copy_registers_new_object() {
        let fx = Fixture::new();
        let resource = fx.default_resource();
        put(&resource, PATH, b"duplicate me").unwrap();

        let method = resource.copy(PATH, "/tempZone/home/alice/copy.bin").unwrap();
        assert_eq!(method, CopyMethod::ServerSide);

        let original = fx.catalog.replica(PATH, "s3resc").unwrap();
        let copied = fx
            .catalog
            .replica("/tempZone/home/alice/copy.bin", "s3resc")
            .unwrap();
        assert_eq!(copied.status, ReplicaStatus::Clean);
        assert_eq!(copied.size, 12);
        assert_eq!(copied.checksum, original.checksum);
        assert_eq!(
            &fx.store
                .object_bytes(&ObjectKey::new("bucket", "vault/home/alice/copy.bin"))
                .unwrap()[..],
            b"duplicate me"
        );
    }

    #[test]
    fn test_replicate_keeps_source_clean() {
        let fx = Fixture::new();
        let first = fx.default_resource();
        let mut cfg = config(fx.dir.path());
        cfg.resource_name = "s3resc2".to_string();
        let second = S3Resource::new(cfg, "/mirror/vault", fx.store.clone(), fx.catalog.clone())
            .with_credentials(Credentials::new("AKIDEXAMPLE", "secret"));

        let bytes = data(90_000);
        put(&first, PATH, &bytes).unwrap();
        second.replicate(&first, PATH).unwrap();

        let object = fx.catalog.data_object(PATH).unwrap();
        assert_eq!(object.count_with_status(ReplicaStatus::Clean), 2);
        let mut copy = Vec::new();
        second.read_stream(PATH).unwrap().read_to_end(&mut copy).unwrap();
        assert_eq!(copy, bytes);
    }

    #[test]
    fn test_replicate_reports_source_get_failure() {
        let fx = Fixture::new();
        let first = fx.default_resource();
        let mut cfg = config(fx.dir.path());
        cfg.resource_name = "s3resc2".to_string();
        let second = S3Resource::new(cfg, "/mirror/vault", fx.store.clone(), fx.catalog.clone())
            .with_credentials(Credentials::new("AKIDEXAMPLE", "secret"));
        put(&first, PATH, &data(1000)).unwrap();

        fx.store.inject_fault(
            StoreOp::Get,
            StoreError::AccessDenied("source read denied".to_string()),
            1,
        );
        let err = second.replicate(&first, PATH).unwrap_err();
        assert_eq!(err.code().as_str(), "S3_GET_ERROR");
        assert_eq!(
            fx.catalog.replica(PATH, "s3resc").unwrap().status,
            ReplicaStatus::Clean
        );
        assert_eq!(
            fx.catalog.replica(PATH, "s3resc2").unwrap().status,
            ReplicaStatus::Stale
        );
    }

    #[test]
    fn test_stage_to_cache_removes_partial_file() {
        let fx = Fixture::new();
        let mut cfg = config(fx.dir.path());
        cfg.host_mode = HostMode::ArchiveAttached;
        let resource = fx.resource(cfg);

        let source = fx.dir.path().join("cache-in.bin");
        fs::write(&source, data(1000)).unwrap();
        resource
            .sync_to_archive(&source, PATH, &WriteOptions::default())
            .unwrap();

        fx.store.inject_fault(
            StoreOp::Get,
            StoreError::AccessDenied("read denied".to_string()),
            1,
        );
        let staged = fx.dir.path().join("cache-out.bin");
        let err = resource.stage_to_cache(PATH, &staged).unwrap_err();
        assert_eq!(err.code().as_str(), "S3_GET_ERROR");
        assert!(!staged.exists());

        resource.stage_to_cache(PATH, &staged).unwrap();
        assert_eq!(fs::read(&staged).unwrap(), data(1000));
    }
}
