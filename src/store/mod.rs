/*!
 * Object store abstraction
 *
 * The transfer engine talks to S3-compatible storage only through the
 * [`ObjectStore`] trait. Three implementations ship with the crate:
 *
 * - [`MemoryObjectStore`]: in-process store with fault injection, used by tests
 * - [`FsObjectStore`]: directory-backed store, used by the CLI and local demos
 * - `S3ObjectStore`: AWS SDK client (requires the `s3-native` feature)
 *
 * Calls are blocking. Implementations must be safe to share between the
 * worker threads of a transfer.
 */

pub mod error;
pub mod fs;
pub mod memory;
#[cfg(feature = "s3-native")]
pub mod s3;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use fs::FsObjectStore;
pub use memory::{MemoryObjectStore, MemoryStoreOptions, StoreOp};
#[cfg(feature = "s3-native")]
pub use s3::S3ObjectStore;
pub use types::{
    ByteRange, CompletedPart, ObjectHead, ObjectKey, PartBody, PutOptions, RestorationTier,
    RestoreRequest, RestoreStatus, StorageClass,
};

use bytes::Bytes;

/// Blocking interface to an S3-compatible blob store
pub trait ObjectStore: Send + Sync {
    /// Short name used in log output
    fn name(&self) -> &str;

    /// Fetch object metadata. A missing object is `Ok(None)`.
    fn head_object(&self, key: &ObjectKey) -> StoreResult<Option<ObjectHead>>;

    /// Store an object with a single request
    fn put_object(
        &self,
        key: &ObjectKey,
        body: PartBody,
        options: &PutOptions,
        content_md5: Option<&str>,
    ) -> StoreResult<String>;

    /// Read an object, or the given range of it
    fn get_object(&self, key: &ObjectKey, range: Option<ByteRange>) -> StoreResult<Bytes>;

    /// Start a multipart session and return its upload id
    fn create_multipart_upload(&self, key: &ObjectKey, options: &PutOptions)
        -> StoreResult<String>;

    /// Upload one part of a multipart session
    fn upload_part(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        part_number: u32,
        body: PartBody,
        content_md5: Option<&str>,
    ) -> StoreResult<CompletedPart>;

    /// Assemble the object from `parts`, which must be ordered by part number
    fn complete_multipart_upload(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<String>;

    /// Discard a multipart session and every part uploaded to it
    fn abort_multipart_upload(&self, key: &ObjectKey, upload_id: &str) -> StoreResult<()>;

    /// Server-side copy. Stores without support return `StoreError::NotImplemented`.
    fn copy_object(
        &self,
        source: &ObjectKey,
        destination: &ObjectKey,
        options: &PutOptions,
    ) -> StoreResult<String>;

    /// Delete an object
    fn delete_object(&self, key: &ObjectKey) -> StoreResult<()>;

    /// Ask the store to restore an archived object
    fn restore_object(&self, key: &ObjectKey, request: &RestoreRequest) -> StoreResult<()>;
}
