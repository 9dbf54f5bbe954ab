//! In-memory object store
//!
//! Behaves like an S3 endpoint closely enough to drive the transfer engine
//! in tests: multipart sessions with part-size checks, archived storage
//! classes that reject reads until restored, Content-MD5 validation and
//! scripted failures.

use super::error::{StoreError, StoreResult};
use super::types::{
    ByteRange, CompletedPart, ObjectHead, ObjectKey, PartBody, PutOptions, RestoreRequest,
    RestoreStatus, StorageClass,
};
use super::ObjectStore;
use crate::core::checksum::content_md5_of;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Operations that can be counted and scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Head,
    Put,
    Get,
    CreateMultipart,
    UploadPart,
    CompleteMultipart,
    AbortMultipart,
    Copy,
    Delete,
    Restore,
}

/// Tunables for [`MemoryObjectStore`]
#[derive(Debug, Clone)]
pub struct MemoryStoreOptions {
    /// Smallest accepted non-final multipart part
    pub minimum_part_size: u64,
    /// Whether `copy_object` is implemented
    pub supports_copy: bool,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            minimum_part_size: 5 * 1024 * 1024,
            supports_copy: true,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    storage_class: StorageClass,
    restore: Option<RestoreStatus>,
}

impl StoredObject {
    fn readable(&self) -> bool {
        !self.storage_class.requires_restore() || self.restore == Some(RestoreStatus::Completed)
    }
}

#[derive(Debug)]
struct PendingUpload {
    key: ObjectKey,
    options: PutOptions,
    parts: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Debug)]
struct Fault {
    error: StoreError,
    remaining: usize,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<ObjectKey, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    faults: HashMap<StoreOp, VecDeque<Fault>>,
    calls: HashMap<StoreOp, usize>,
    next_upload_id: u64,
    credentials_rejected: bool,
}

/// Object store held entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<State>,
    options: MemoryStoreOptions,
    parts_in_flight: AtomicUsize,
    peak_parts_in_flight: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: MemoryStoreOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next `times` calls of `op` with `error`
    pub fn inject_fault(&self, op: StoreOp, error: StoreError, times: usize) {
        self.state().faults.entry(op).or_default().push_back(Fault {
            error,
            remaining: times,
        });
    }

    /// Reject every request as if the access keys were wrong
    pub fn set_credentials_valid(&self, valid: bool) {
        self.state().credentials_rejected = !valid;
    }

    /// Number of times `op` has been called
    pub fn call_count(&self, op: StoreOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Mark every outstanding restore as finished
    pub fn complete_restores(&self) {
        for object in self.state().objects.values_mut() {
            if object.restore == Some(RestoreStatus::Ongoing) {
                object.restore = Some(RestoreStatus::Completed);
            }
        }
    }

    /// Move an existing object to another storage class, dropping any restored copy
    pub fn set_storage_class(&self, key: &ObjectKey, class: StorageClass) -> bool {
        match self.state().objects.get_mut(key) {
            Some(object) => {
                object.storage_class = class;
                object.restore = None;
                true
            }
            None => false,
        }
    }

    pub fn object_bytes(&self, key: &ObjectKey) -> Option<Bytes> {
        self.state().objects.get(key).map(|o| o.data.clone())
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.state().objects.contains_key(key)
    }

    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    /// Multipart sessions that were neither completed nor aborted
    pub fn active_multipart_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    /// Highest number of `upload_part` calls observed running at once
    pub fn peak_concurrent_parts(&self) -> usize {
        self.peak_parts_in_flight.load(Ordering::SeqCst)
    }

    /// Count the call and apply credential checks and scripted faults
    fn begin(&self, op: StoreOp) -> StoreResult<()> {
        let mut state = self.state();
        *state.calls.entry(op).or_insert(0) += 1;

        if state.credentials_rejected {
            return Err(StoreError::Authentication(
                "InvalidAccessKeyId: the access key id does not exist".to_string(),
            ));
        }

        if let Some(queue) = state.faults.get_mut(&op) {
            if let Some(fault) = queue.front_mut() {
                let error = fault.error.clone();
                fault.remaining = fault.remaining.saturating_sub(1);
                if fault.remaining == 0 {
                    queue.pop_front();
                }
                return Err(error);
            }
        }
        Ok(())
    }

    fn store_part(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        part_number: u32,
        body: PartBody,
        content_md5: Option<&str>,
    ) -> StoreResult<CompletedPart> {
        self.begin(StoreOp::UploadPart)?;
        let data = body.read_all()?;
        check_digest(&data, content_md5)?;

        let etag = etag_of(&data);
        let mut state = self.state();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| &u.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;
        upload.parts.insert(part_number, (data, etag.clone()));
        Ok(CompletedPart { part_number, etag })
    }
}

fn etag_of(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

fn check_digest(data: &[u8], content_md5: Option<&str>) -> StoreResult<()> {
    match content_md5 {
        Some(expected) if content_md5_of(data) != expected => Err(StoreError::Service {
            code: "BadDigest".to_string(),
            message: "The Content-MD5 you specified did not match what was received".to_string(),
        }),
        _ => Ok(()),
    }
}

fn not_found(key: &ObjectKey) -> StoreError {
    StoreError::NotFound {
        bucket: key.bucket.clone(),
        key: key.key.clone(),
    }
}

impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn head_object(&self, key: &ObjectKey) -> StoreResult<Option<ObjectHead>> {
        self.begin(StoreOp::Head)?;
        Ok(self.state().objects.get(key).map(|object| ObjectHead {
            size: object.data.len() as u64,
            etag: Some(object.etag.clone()),
            storage_class: object.storage_class,
            restore: object.restore,
        }))
    }

    fn put_object(
        &self,
        key: &ObjectKey,
        body: PartBody,
        options: &PutOptions,
        content_md5: Option<&str>,
    ) -> StoreResult<String> {
        self.begin(StoreOp::Put)?;
        let data = body.read_all()?;
        check_digest(&data, content_md5)?;

        let etag = etag_of(&data);
        self.state().objects.insert(
            key.clone(),
            StoredObject {
                data,
                etag: etag.clone(),
                storage_class: options.storage_class,
                restore: None,
            },
        );
        Ok(etag)
    }

    fn get_object(&self, key: &ObjectKey, range: Option<ByteRange>) -> StoreResult<Bytes> {
        self.begin(StoreOp::Get)?;
        let state = self.state();
        let object = state.objects.get(key).ok_or_else(|| not_found(key))?;
        if !object.readable() {
            return Err(StoreError::InvalidObjectState(key.to_string()));
        }

        match range {
            None => Ok(object.data.clone()),
            Some(range) => {
                let size = object.data.len() as u64;
                if range.offset > size || (range.offset == size && range.length > 0) {
                    return Err(StoreError::InvalidRange(format!(
                        "{} starts beyond the {} byte object {}",
                        range.to_header(),
                        size,
                        key
                    )));
                }
                let end = (range.offset + range.length).min(size);
                Ok(object.data.slice(range.offset as usize..end as usize))
            }
        }
    }

    fn create_multipart_upload(
        &self,
        key: &ObjectKey,
        options: &PutOptions,
    ) -> StoreResult<String> {
        self.begin(StoreOp::CreateMultipart)?;
        let mut state = self.state();
        state.next_upload_id += 1;
        let upload_id = format!("upload-{:06}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.clone(),
                options: options.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    fn upload_part(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        part_number: u32,
        body: PartBody,
        content_md5: Option<&str>,
    ) -> StoreResult<CompletedPart> {
        let in_flight = self.parts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_parts_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let result = self.store_part(key, upload_id, part_number, body, content_md5);

        self.parts_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn complete_multipart_upload(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<String> {
        self.begin(StoreOp::CompleteMultipart)?;
        let mut state = self.state();
        let upload = match state.uploads.get(upload_id) {
            Some(upload) if &upload.key == key => upload,
            _ => return Err(StoreError::NoSuchUpload(upload_id.to_string())),
        };

        if parts.is_empty() {
            return Err(StoreError::MultipartUpload(
                "You must specify at least one part".to_string(),
            ));
        }

        let mut data = BytesMut::new();
        let mut digests = Vec::with_capacity(parts.len() * 16);
        let mut previous = 0u32;
        for (index, part) in parts.iter().enumerate() {
            if part.part_number <= previous {
                return Err(StoreError::MultipartUpload(format!(
                    "Part list is not in ascending order at part {}",
                    part.part_number
                )));
            }
            previous = part.part_number;

            let (bytes, etag) = upload.parts.get(&part.part_number).ok_or_else(|| {
                StoreError::MultipartUpload(format!("Part {} was never uploaded", part.part_number))
            })?;
            if etag != &part.etag {
                return Err(StoreError::MultipartUpload(format!(
                    "ETag mismatch for part {}",
                    part.part_number
                )));
            }
            let is_last = index + 1 == parts.len();
            if !is_last && (bytes.len() as u64) < self.options.minimum_part_size {
                return Err(StoreError::EntityTooSmall {
                    part_number: part.part_number,
                    size: bytes.len() as u64,
                    minimum: self.options.minimum_part_size,
                });
            }
            data.extend_from_slice(bytes);
            digests.extend_from_slice(&md5::compute(bytes).0);
        }

        let etag = format!("{}-{}", etag_of(&digests), parts.len());
        let storage_class = upload.options.storage_class;
        state.uploads.remove(upload_id);
        state.objects.insert(
            key.clone(),
            StoredObject {
                data: data.freeze(),
                etag: etag.clone(),
                storage_class,
                restore: None,
            },
        );
        Ok(etag)
    }

    fn abort_multipart_upload(&self, key: &ObjectKey, upload_id: &str) -> StoreResult<()> {
        self.begin(StoreOp::AbortMultipart)?;
        let mut state = self.state();
        match state.uploads.get(upload_id) {
            Some(upload) if &upload.key == key => {
                state.uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(StoreError::NoSuchUpload(upload_id.to_string())),
        }
    }

    fn copy_object(
        &self,
        source: &ObjectKey,
        destination: &ObjectKey,
        options: &PutOptions,
    ) -> StoreResult<String> {
        self.begin(StoreOp::Copy)?;
        if !self.options.supports_copy {
            return Err(StoreError::NotImplemented("CopyObject".to_string()));
        }

        let mut state = self.state();
        let object = state.objects.get(source).ok_or_else(|| not_found(source))?;
        if !object.readable() {
            return Err(StoreError::InvalidObjectState(source.to_string()));
        }
        let copy = StoredObject {
            data: object.data.clone(),
            etag: object.etag.clone(),
            storage_class: options.storage_class,
            restore: None,
        };
        let etag = copy.etag.clone();
        state.objects.insert(destination.clone(), copy);
        Ok(etag)
    }

    fn delete_object(&self, key: &ObjectKey) -> StoreResult<()> {
        self.begin(StoreOp::Delete)?;
        self.state().objects.remove(key);
        Ok(())
    }

    fn restore_object(&self, key: &ObjectKey, _request: &RestoreRequest) -> StoreResult<()> {
        self.begin(StoreOp::Restore)?;
        let mut state = self.state();
        let object = state.objects.get_mut(key).ok_or_else(|| not_found(key))?;
        if !object.storage_class.requires_restore() {
            return Err(StoreError::Service {
                code: "InvalidObjectState".to_string(),
                message: format!("{} is stored as {}", key, object.storage_class),
            });
        }
        match object.restore {
            Some(RestoreStatus::Ongoing) => Err(StoreError::Service {
                code: "RestoreAlreadyInProgress".to_string(),
                message: "Object restore is already in progress".to_string(),
            }),
            _ => {
                object.restore = Some(RestoreStatus::Ongoing);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RestorationTier;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("bucket", name)
    }

    fn small_parts() -> MemoryObjectStore {
        MemoryObjectStore::with_options(MemoryStoreOptions {
            minimum_part_size: 4,
            supports_copy: true,
        })
    }

    #[test]
    fn test_put_get_range() {
        let store = MemoryObjectStore::new();
        let body = PartBody::Memory(Bytes::from_static(b"hello world"));
        store
            .put_object(&key("a"), body, &PutOptions::default(), None)
            .unwrap();

        let all = store.get_object(&key("a"), None).unwrap();
        assert_eq!(&all[..], b"hello world");

        let part = store
            .get_object(&key("a"), Some(ByteRange::new(6, 100)))
            .unwrap();
        assert_eq!(&part[..], b"world");

        assert!(store
            .get_object(&key("a"), Some(ByteRange::new(12, 1)))
            .is_err());
        assert!(store.head_object(&key("missing")).unwrap().is_none());
    }

    #[test]
    fn test_multipart_orders_by_part_number() {
        let store = small_parts();
        let k = key("mpu");
        let id = store
            .create_multipart_upload(&k, &PutOptions::default())
            .unwrap();

        let second = store
            .upload_part(&k, &id, 2, PartBody::Memory(Bytes::from_static(b"5678")), None)
            .unwrap();
        let first = store
            .upload_part(&k, &id, 1, PartBody::Memory(Bytes::from_static(b"1234")), None)
            .unwrap();

        let etag = store
            .complete_multipart_upload(&k, &id, &[first, second])
            .unwrap();
        assert!(etag.ends_with("-2"));
        assert_eq!(&store.object_bytes(&k).unwrap()[..], b"12345678");
        assert_eq!(store.active_multipart_uploads(), 0);
    }

    #[test]
    fn test_multipart_rejects_small_inner_part() {
        let store = small_parts();
        let k = key("mpu");
        let id = store
            .create_multipart_upload(&k, &PutOptions::default())
            .unwrap();
        let a = store
            .upload_part(&k, &id, 1, PartBody::Memory(Bytes::from_static(b"12")), None)
            .unwrap();
        let b = store
            .upload_part(&k, &id, 2, PartBody::Memory(Bytes::from_static(b"3456")), None)
            .unwrap();

        let err = store.complete_multipart_upload(&k, &id, &[a, b]).unwrap_err();
        assert!(matches!(err, StoreError::EntityTooSmall { part_number: 1, .. }));
    }

    #[test]
    fn test_fault_injection_counts_down() {
        let store = MemoryObjectStore::new();
        store.inject_fault(StoreOp::Get, StoreError::Network("reset".to_string()), 2);

        assert!(store.get_object(&key("x"), None).is_err());
        assert!(store.get_object(&key("x"), None).is_err());
        let err = store.get_object(&key("x"), None).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.call_count(StoreOp::Get), 3);
    }

    #[test]
    fn test_rejected_credentials() {
        let store = MemoryObjectStore::new();
        store.set_credentials_valid(false);
        let err = store.head_object(&key("x")).unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[test]
    fn test_bad_digest() {
        let store = MemoryObjectStore::new();
        let err = store
            .put_object(
                &key("x"),
                PartBody::Memory(Bytes::from_static(b"abc")),
                &PutOptions::default(),
                Some("AAAAAAAAAAAAAAAAAAAAAA=="),
            )
            .unwrap_err();
        assert_eq!(err.service_code(), Some("BadDigest"));
    }

    #[test]
    fn test_archived_object_restore_cycle() {
        let store = MemoryObjectStore::new();
        let k = key("cold");
        let options = PutOptions {
            storage_class: StorageClass::Glacier,
            ..Default::default()
        };
        store
            .put_object(&k, PartBody::Memory(Bytes::from_static(b"ice")), &options, None)
            .unwrap();

        assert!(matches!(
            store.get_object(&k, None),
            Err(StoreError::InvalidObjectState(_))
        ));

        let request = RestoreRequest {
            days: 7,
            tier: RestorationTier::Standard,
        };
        store.restore_object(&k, &request).unwrap();
        let again = store.restore_object(&k, &request).unwrap_err();
        assert_eq!(again.service_code(), Some("RestoreAlreadyInProgress"));
        assert_eq!(
            store.head_object(&k).unwrap().unwrap().restore,
            Some(RestoreStatus::Ongoing)
        );

        store.complete_restores();
        assert_eq!(&store.get_object(&k, None).unwrap()[..], b"ice");
    }

    #[test]
    fn test_copy_not_implemented() {
        let store = MemoryObjectStore::with_options(MemoryStoreOptions {
            supports_copy: false,
            ..Default::default()
        });
        let err = store
            .copy_object(&key("a"), &key("b"), &PutOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotImplemented(_)));
    }
}
