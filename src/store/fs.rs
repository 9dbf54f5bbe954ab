//! Directory-backed object store
//!
//! Buckets are subdirectories of the root and keys are relative paths below
//! them. Multipart sessions stage parts under `{root}/.multipart/{upload_id}/`
//! until completion. Archive storage classes are not modelled: every object
//! is immediately readable.

use super::error::{StoreError, StoreResult};
use super::types::{
    ByteRange, CompletedPart, ObjectHead, ObjectKey, PartBody, PutOptions, RestoreRequest,
    StorageClass,
};
use super::ObjectStore;
use crate::core::checksum::content_md5_of;
use bytes::Bytes;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const MULTIPART_DIR: &str = ".multipart";

/// Object store rooted at a local directory
#[derive(Debug)]
pub struct FsObjectStore {
    root: PathBuf,
    next_upload_id: AtomicU64,
}

impl FsObjectStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new<P: Into<PathBuf>>(root: P) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            next_upload_id: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an object key to a file below the root
    fn resolve(&self, key: &ObjectKey) -> StoreResult<PathBuf> {
        if key.bucket.is_empty() || key.bucket.contains('/') || key.bucket == MULTIPART_DIR {
            return Err(StoreError::BucketNotFound(key.bucket.clone()));
        }
        let relative = Path::new(key.key.trim_start_matches('/'));
        if key.key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::Service {
                code: "InvalidArgument".to_string(),
                message: format!("invalid object key: {}", key.key),
            });
        }
        Ok(self.root.join(&key.bucket).join(relative))
    }

    fn upload_dir(&self, upload_id: &str) -> StoreResult<PathBuf> {
        let dir = self.root.join(MULTIPART_DIR).join(upload_id);
        if upload_id.contains('/') || !dir.is_dir() {
            return Err(StoreError::NoSuchUpload(upload_id.to_string()));
        }
        Ok(dir)
    }

    fn not_found(key: &ObjectKey) -> StoreError {
        StoreError::NotFound {
            bucket: key.bucket.clone(),
            key: key.key.clone(),
        }
    }

    /// Write `data` next to `path` and rename it into place
    fn write_atomically(path: &Path, data: &[u8]) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut staging = path.as_os_str().to_owned();
        staging.push(".partial");
        let staging = PathBuf::from(staging);

        let mut file = File::create(&staging)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&staging, path)?;
        Ok(())
    }
}

fn etag_of(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

fn verify_digest(data: &[u8], content_md5: Option<&str>) -> StoreResult<()> {
    match content_md5 {
        Some(expected) if content_md5_of(data) != expected => Err(StoreError::Service {
            code: "BadDigest".to_string(),
            message: "The Content-MD5 you specified did not match what was received".to_string(),
        }),
        _ => Ok(()),
    }
}

impl ObjectStore for FsObjectStore {
    fn name(&self) -> &str {
        "fs"
    }

    fn head_object(&self, key: &ObjectKey) -> StoreResult<Option<ObjectHead>> {
        let path = self.resolve(key)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectHead {
                size: meta.len(),
                etag: None,
                storage_class: StorageClass::Standard,
                restore: None,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put_object(
        &self,
        key: &ObjectKey,
        body: PartBody,
        _options: &PutOptions,
        content_md5: Option<&str>,
    ) -> StoreResult<String> {
        let path = self.resolve(key)?;
        let data = body.read_all()?;
        verify_digest(&data, content_md5)?;
        Self::write_atomically(&path, &data)?;
        Ok(etag_of(&data))
    }

    fn get_object(&self, key: &ObjectKey, range: Option<ByteRange>) -> StoreResult<Bytes> {
        let path = self.resolve(key)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Self::not_found(key)),
            Err(e) => return Err(e.into()),
        };

        let mut buffer = Vec::new();
        match range {
            None => {
                file.read_to_end(&mut buffer)?;
            }
            Some(range) => {
                let size = file.metadata()?.len();
                if range.offset > size || (range.offset == size && range.length > 0) {
                    return Err(StoreError::InvalidRange(format!(
                        "{} starts beyond the {} byte object {}",
                        range.to_header(),
                        size,
                        key
                    )));
                }
                file.seek(SeekFrom::Start(range.offset))?;
                file.take(range.length).read_to_end(&mut buffer)?;
            }
        }
        Ok(Bytes::from(buffer))
    }

    fn create_multipart_upload(
        &self,
        key: &ObjectKey,
        _options: &PutOptions,
    ) -> StoreResult<String> {
        self.resolve(key)?;
        let sequence = self.next_upload_id.fetch_add(1, Ordering::SeqCst) + 1;
        let upload_id = format!(
            "{}-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_micros(),
            sequence
        );
        fs::create_dir_all(self.root.join(MULTIPART_DIR).join(&upload_id))?;
        Ok(upload_id)
    }

    fn upload_part(
        &self,
        _key: &ObjectKey,
        upload_id: &str,
        part_number: u32,
        body: PartBody,
        content_md5: Option<&str>,
    ) -> StoreResult<CompletedPart> {
        let dir = self.upload_dir(upload_id)?;
        let data = body.read_all()?;
        verify_digest(&data, content_md5)?;
        Self::write_atomically(&dir.join(format!("{:05}", part_number)), &data)?;
        Ok(CompletedPart {
            part_number,
            etag: etag_of(&data),
        })
    }

    fn complete_multipart_upload(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<String> {
        let dir = self.upload_dir(upload_id)?;
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut staging = path.as_os_str().to_owned();
        staging.push(".partial");
        let staging = PathBuf::from(staging);
        let mut output = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&staging)?;

        let mut previous = 0u32;
        for part in parts {
            if part.part_number <= previous {
                let _ = fs::remove_file(&staging);
                return Err(StoreError::MultipartUpload(format!(
                    "Part list is not in ascending order at part {}",
                    part.part_number
                )));
            }
            previous = part.part_number;

            let part_path = dir.join(format!("{:05}", part.part_number));
            let mut input = File::open(&part_path).map_err(|_| {
                StoreError::MultipartUpload(format!("Part {} was never uploaded", part.part_number))
            })?;
            io::copy(&mut input, &mut output)?;
        }
        output.sync_all()?;
        drop(output);

        fs::rename(&staging, &path)?;
        fs::remove_dir_all(&dir)?;
        Ok(format!("{}-{}", upload_id, parts.len()))
    }

    fn abort_multipart_upload(&self, _key: &ObjectKey, upload_id: &str) -> StoreResult<()> {
        let dir = self.upload_dir(upload_id)?;
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    fn copy_object(
        &self,
        source: &ObjectKey,
        destination: &ObjectKey,
        _options: &PutOptions,
    ) -> StoreResult<String> {
        let from = self.resolve(source)?;
        let to = self.resolve(destination)?;
        if !from.is_file() {
            return Err(Self::not_found(source));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&from, &to)?;
        Ok(format!("copy-{}", fs::metadata(&to)?.len()))
    }

    fn delete_object(&self, key: &ObjectKey) -> StoreResult<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn restore_object(&self, key: &ObjectKey, _request: &RestoreRequest) -> StoreResult<()> {
        Err(StoreError::Service {
            code: "InvalidObjectState".to_string(),
            message: format!("{} is not archived", key),
        })
    }
}
