/*!
 * Parallel upload and download engine
 *
 * One coordinator per transfer fans parts out to `thread_count` worker
 * threads through a bounded [`CircularBuffer`]. Uploads read the source
 * sequentially on the coordinator; parts too large for the buffer are
 * written to cache files first and uploaded from disk. Downloads fetch
 * ranged parts on the workers and the coordinator writes them at their
 * offsets.
 *
 * The first fatal error cancels the transfer: the shared flag is raised,
 * the buffer is drained, and an open multipart session is aborted.
 */

use bytes::Bytes;
use crossbeam_channel::{unbounded, Sender};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use super::checksum::{content_md5, Checksum, StreamingHasher};
use super::circular_buffer::{BufferError, CircularBuffer};
use super::planner::{self, PartSpec, TransferPlan, TransferStrategy};
use super::retry::{Clock, RetryPolicy, SystemClock};
use crate::config::{ResourceConfig, TransferSettings};
use crate::error::{NimbusError, Result};
use crate::store::{
    ByteRange, CompletedPart, ObjectHead, ObjectKey, ObjectStore, PartBody, PutOptions,
    StoreError,
};

/// Callback receiving the byte count of every finished part
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

const IO_CHUNK: usize = 64 * 1024;

/// Summary of a finished transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub key: String,
    pub bytes: u64,
    pub parts: usize,
    pub threads: usize,
    pub strategy: TransferStrategy,
    pub etag: Option<String>,
    /// SHA-256 of the uploaded bytes; downloads leave this empty
    pub checksum: Option<Checksum>,
    /// Requests repeated after transient failures
    pub retries: u32,
    pub elapsed: Duration,
}

/// How a copy was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyMethod {
    ServerSide,
    Reupload,
}

/// A part waiting in the circular buffer for upload
struct PendingPart {
    spec: PartSpec,
    body: PartBody,
    /// Removes the cache file once the part is dropped
    _spill: Option<TempPath>,
}

/// A downloaded part waiting to be written
struct FetchedPart {
    spec: PartSpec,
    data: Bytes,
}

/// Shared failure state of one transfer
struct Cancellation {
    cancelled: AtomicBool,
    errors: Sender<NimbusError>,
}

impl Cancellation {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Record `error`; only the first one is reported
    fn fail<T>(&self, error: NimbusError, ring: Option<&CircularBuffer<T>>) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            let _ = self.errors.send(error);
        }
        if let Some(ring) = ring {
            ring.cancel();
        }
    }
}

/// Moves objects between local sources and an [`ObjectStore`]
pub struct TransferEngine {
    store: Arc<dyn ObjectStore>,
    settings: TransferSettings,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    cache_directory: PathBuf,
    put_options: PutOptions,
    enable_md5: bool,
    copy_object_enabled: bool,
    progress: Option<ProgressFn>,
}

impl TransferEngine {
    pub fn new(store: Arc<dyn ObjectStore>, config: &ResourceConfig) -> Self {
        Self {
            store,
            settings: config.transfer.clone(),
            retry: RetryPolicy::from_settings(&config.retry),
            clock: Arc::new(SystemClock),
            cache_directory: config.cache_directory.clone(),
            put_options: PutOptions {
                storage_class: config.storage_class,
                server_side_encryption: config.server_side_encryption,
            },
            enable_md5: config.enable_md5,
            copy_object_enabled: config.copy_object_enabled,
            progress: None,
        }
    }

    /// Use `clock` for backoff sleeps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn cache_directory(&self) -> &Path {
        &self.cache_directory
    }

    pub fn plan_upload(&self, total_size: u64) -> Result<TransferPlan> {
        planner::plan(total_size, &self.settings)
    }

    pub fn plan_download(&self, total_size: u64) -> Result<TransferPlan> {
        planner::plan_download(total_size, &self.settings)
    }

    fn report(&self, bytes: u64) {
        if let Some(progress) = &self.progress {
            progress(bytes);
        }
    }

    fn put_error(key: &ObjectKey) -> impl Fn(StoreError) -> NimbusError + '_ {
        move |source| NimbusError::Put {
            key: key.to_string(),
            source,
        }
    }

    fn get_error(key: &ObjectKey) -> impl Fn(StoreError) -> NimbusError + '_ {
        move |source| NimbusError::Get {
            key: key.to_string(),
            source,
        }
    }

    /// HEAD with retries; a missing object is `Ok(None)`
    pub fn head(&self, key: &ObjectKey) -> Result<Option<ObjectHead>> {
        self.retry
            .run(&*self.clock, "head_object", |_| self.store.head_object(key))
            .map_err(|source| NimbusError::Stat {
                key: key.to_string(),
                source,
            })
    }

    /// Read `length` bytes at `offset`
    pub fn read_range(&self, key: &ObjectKey, offset: u64, length: u64) -> Result<Bytes> {
        self.retry
            .run(&*self.clock, "get_object", |_| {
                self.store
                    .get_object(key, Some(ByteRange::new(offset, length)))
            })
            .map_err(Self::get_error(key))
    }

    /// Delete an object. Deleting a missing object succeeds.
    pub fn delete(&self, key: &ObjectKey) -> Result<()> {
        match self
            .retry
            .run(&*self.clock, "delete_object", |_| self.store.delete_object(key))
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(source) => Err(NimbusError::Unlink {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// Upload a local file
    pub fn upload_file(&self, path: &Path, key: &ObjectKey) -> Result<TransferOutcome> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        let plan = self.plan_upload(size)?;
        self.upload(&plan, &mut file, key)
    }

    /// Upload `plan.total_size` bytes read from `source`
    pub fn upload(
        &self,
        plan: &TransferPlan,
        source: &mut dyn Read,
        key: &ObjectKey,
    ) -> Result<TransferOutcome> {
        let started = Instant::now();
        info!(
            key = %key,
            size = plan.total_size,
            parts = plan.part_count(),
            threads = plan.thread_count,
            strategy = ?plan.strategy,
            store = self.store.name(),
            "Starting upload"
        );

        let retries = AtomicU32::new(0);
        let (etag, checksum) = if plan.strategy.is_multipart() {
            self.upload_multipart(plan, source, key, &retries)?
        } else {
            self.upload_single(plan, source, key, &retries)?
        };

        let outcome = TransferOutcome {
            key: key.to_string(),
            bytes: plan.total_size,
            parts: plan.part_count(),
            threads: plan.thread_count,
            strategy: plan.strategy,
            etag: Some(etag),
            checksum: Some(checksum),
            retries: retries.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        };
        info!(
            key = %key,
            bytes = outcome.bytes,
            retries = outcome.retries,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Upload complete"
        );
        Ok(outcome)
    }

    fn upload_single(
        &self,
        plan: &TransferPlan,
        source: &mut dyn Read,
        key: &ObjectKey,
        retries: &AtomicU32,
    ) -> Result<(String, Checksum)> {
        let mut hasher = StreamingHasher::new();
        let mut _spill = None;
        let body = if plan.total_size > self.settings.single_buffer_threshold {
            let mut spill = tempfile::Builder::new()
                .prefix("nimbus-single-")
                .suffix(".cache")
                .tempfile_in(&self.cache_directory)?;
            copy_exact(source, plan.total_size, &mut hasher, spill.as_file_mut())?;
            spill.as_file().sync_all()?;

            let path = spill.into_temp_path();
            debug!(key = %key, path = %path.display(), "Single part spilled to cache");
            let body = PartBody::File {
                path: path.to_path_buf(),
                offset: 0,
                length: plan.total_size,
            };
            _spill = Some(path);
            body
        } else {
            let mut data = Vec::with_capacity(plan.total_size as usize);
            copy_exact(source, plan.total_size, &mut hasher, &mut data)?;
            PartBody::Memory(Bytes::from(data))
        };

        let md5 = if self.enable_md5 {
            Some(content_md5(&body)?)
        } else {
            None
        };

        let etag = self
            .retry
            .run(&*self.clock, "put_object", |attempt| {
                if attempt > 1 {
                    retries.fetch_add(1, Ordering::SeqCst);
                }
                self.store
                    .put_object(key, body.clone(), &self.put_options, md5.as_deref())
            })
            .map_err(Self::put_error(key))?;

        self.report(plan.total_size);
        Ok((etag, hasher.finalize()))
    }

    fn upload_multipart(
        &self,
        plan: &TransferPlan,
        source: &mut dyn Read,
        key: &ObjectKey,
        retries: &AtomicU32,
    ) -> Result<(String, Checksum)> {
        let upload_id = self
            .retry
            .run(&*self.clock, "create_multipart_upload", |_| {
                self.store.create_multipart_upload(key, &self.put_options)
            })
            .map_err(Self::put_error(key))?;
        debug!(key = %key, upload_id = %upload_id, "Multipart upload started");

        let uploaded = self
            .upload_parts(plan, source, key, &upload_id, retries)
            .and_then(|(mut parts, checksum)| {
                // Completion lists parts by number, not by finishing order
                parts.sort_by_key(|p| p.part_number);
                let etag = self
                    .retry
                    .run(&*self.clock, "complete_multipart_upload", |_| {
                        self.store.complete_multipart_upload(key, &upload_id, &parts)
                    })
                    .map_err(Self::put_error(key))?;
                Ok((etag, checksum))
            });

        if uploaded.is_err() {
            if let Err(e) = self.store.abort_multipart_upload(key, &upload_id) {
                warn!(key = %key, upload_id = %upload_id, error = %e, "Failed to abort multipart upload");
            } else {
                debug!(key = %key, upload_id = %upload_id, "Multipart upload aborted");
            }
        }
        uploaded
    }

    fn upload_parts(
        &self,
        plan: &TransferPlan,
        source: &mut dyn Read,
        key: &ObjectKey,
        upload_id: &str,
        retries: &AtomicU32,
    ) -> Result<(Vec<CompletedPart>, Checksum)> {
        let ring: CircularBuffer<PendingPart> =
            CircularBuffer::new(plan.buffer_slots, self.settings.circular_buffer_timeout);
        let completed = Mutex::new(Vec::with_capacity(plan.part_count()));
        let (errors, error_rx) = unbounded();
        let cancel = Cancellation {
            cancelled: AtomicBool::new(false),
            errors,
        };
        let mut hasher = StreamingHasher::new();

        thread::scope(|scope| {
            for worker in 0..plan.thread_count {
                let (ring, completed, cancel) = (&ring, &completed, &cancel);
                let spawned = thread::Builder::new()
                    .name(format!("nimbus-put-{}", worker))
                    .spawn_scoped(scope, move || loop {
                        let part = match ring.pop() {
                            Ok(Some(part)) => part,
                            Ok(None) => break,
                            Err(e) => {
                                cancel.fail(buffer_error(key, e, true), Some(ring));
                                break;
                            }
                        };
                        if cancel.is_cancelled() {
                            continue;
                        }
                        match self.upload_one(key, upload_id, &part, retries) {
                            Ok(done) => {
                                self.report(part.spec.length);
                                completed
                                    .lock()
                                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                                    .push(done);
                            }
                            Err(e) => cancel.fail(e, Some(ring)),
                        }
                    });
                if let Err(e) = spawned {
                    cancel.fail(NimbusError::Io(e), Some(ring));
                }
            }

            if let Err(e) = self.produce_parts(plan, source, &ring, &cancel, &mut hasher) {
                cancel.fail(e, Some(&ring));
            } else {
                ring.close();
            }
        });

        drop(cancel);
        if let Ok(error) = error_rx.try_recv() {
            return Err(error);
        }

        let parts = completed
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if parts.len() != plan.part_count() {
            return Err(NimbusError::Internal(format!(
                "uploaded {} of {} parts of {}",
                parts.len(),
                plan.part_count(),
                key
            )));
        }
        Ok((parts, hasher.finalize()))
    }

    /// Coordinator side of an upload: read each part and queue it
    fn produce_parts(
        &self,
        plan: &TransferPlan,
        source: &mut dyn Read,
        ring: &CircularBuffer<PendingPart>,
        cancel: &Cancellation,
        hasher: &mut StreamingHasher,
    ) -> Result<()> {
        for spec in &plan.parts {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let part = match plan.strategy {
                TransferStrategy::CacheSpill => self.spill_part(*spec, source, hasher)?,
                _ => {
                    let mut data = Vec::with_capacity(spec.length as usize);
                    copy_exact(source, spec.length, hasher, &mut data)?;
                    PendingPart {
                        spec: *spec,
                        body: PartBody::Memory(Bytes::from(data)),
                        _spill: None,
                    }
                }
            };

            match ring.push(part) {
                Ok(()) => {}
                // Workers closed the ring after reporting an error
                Err(BufferError::Closed) => return Ok(()),
                Err(e) => {
                    return Err(NimbusError::Internal(format!(
                        "part {} not queued: {}",
                        spec.number, e
                    )))
                }
            }
        }
        Ok(())
    }

    /// Write one part to a fresh cache file; the part is queued only once
    /// the file is complete and synced
    fn spill_part(
        &self,
        spec: PartSpec,
        source: &mut dyn Read,
        hasher: &mut StreamingHasher,
    ) -> Result<PendingPart> {
        let mut spill = tempfile::Builder::new()
            .prefix(&format!("nimbus-part{}-", spec.number))
            .suffix(".cache")
            .tempfile_in(&self.cache_directory)?;
        copy_exact(source, spec.length, hasher, spill.as_file_mut())?;
        spill.as_file().sync_all()?;

        let path = spill.into_temp_path();
        debug!(part = spec.number, path = %path.display(), "Part spilled to cache");
        Ok(PendingPart {
            spec,
            body: PartBody::File {
                path: path.to_path_buf(),
                offset: 0,
                length: spec.length,
            },
            _spill: Some(path),
        })
    }

    fn upload_one(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        part: &PendingPart,
        retries: &AtomicU32,
    ) -> Result<CompletedPart> {
        let md5 = if self.enable_md5 {
            Some(content_md5(&part.body)?)
        } else {
            None
        };

        let done = self
            .retry
            .run(&*self.clock, "upload_part", |attempt| {
                if attempt > 1 {
                    retries.fetch_add(1, Ordering::SeqCst);
                }
                self.store.upload_part(
                    key,
                    upload_id,
                    part.spec.number,
                    part.body.clone(),
                    md5.as_deref(),
                )
            })
            .map_err(Self::put_error(key))?;
        debug!(key = %key, part = part.spec.number, bytes = part.spec.length, "Part uploaded");
        Ok(done)
    }

    /// Download an object to `destination`, replacing its contents
    pub fn download(
        &self,
        plan: &TransferPlan,
        key: &ObjectKey,
        destination: &Path,
    ) -> Result<TransferOutcome> {
        let started = Instant::now();
        info!(
            key = %key,
            size = plan.total_size,
            parts = plan.part_count(),
            threads = plan.thread_count,
            strategy = ?plan.strategy,
            destination = %destination.display(),
            "Starting download"
        );

        let retries = AtomicU32::new(0);
        let file = File::create(destination)?;
        file.set_len(plan.total_size)?;

        match plan.strategy {
            TransferStrategy::SinglePart => {
                drop(file);
                self.download_single(plan, key, destination, &retries)?
            }
            TransferStrategy::Streaming => self.download_streaming(plan, key, file, &retries)?,
            TransferStrategy::CacheSpill => {
                drop(file);
                self.download_direct(plan, key, destination, &retries)?
            }
        }

        let outcome = TransferOutcome {
            key: key.to_string(),
            bytes: plan.total_size,
            parts: plan.part_count(),
            threads: plan.thread_count,
            strategy: plan.strategy,
            etag: None,
            checksum: None,
            retries: retries.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        };
        info!(
            key = %key,
            bytes = outcome.bytes,
            retries = outcome.retries,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Download complete"
        );
        Ok(outcome)
    }

    fn fetch(
        &self,
        key: &ObjectKey,
        range: Option<ByteRange>,
        retries: &AtomicU32,
    ) -> Result<Bytes> {
        self.retry
            .run(&*self.clock, "get_object", |attempt| {
                if attempt > 1 {
                    retries.fetch_add(1, Ordering::SeqCst);
                }
                self.store.get_object(key, range)
            })
            .map_err(Self::get_error(key))
    }

    fn download_single(
        &self,
        plan: &TransferPlan,
        key: &ObjectKey,
        destination: &Path,
        retries: &AtomicU32,
    ) -> Result<()> {
        let data = self.fetch(key, None, retries)?;
        check_length(key, data.len() as u64, plan.total_size)?;
        let mut file = OpenOptions::new().write(true).open(destination)?;
        file.write_all(&data)?;
        file.sync_all()?;
        self.report(plan.total_size);
        Ok(())
    }

    /// Workers fetch their parts into the ring; the coordinator writes them
    fn download_streaming(
        &self,
        plan: &TransferPlan,
        key: &ObjectKey,
        mut file: File,
        retries: &AtomicU32,
    ) -> Result<()> {
        let ring: CircularBuffer<FetchedPart> =
            CircularBuffer::new(plan.buffer_slots, self.settings.circular_buffer_timeout);
        let (errors, error_rx) = unbounded();
        let cancel = Cancellation {
            cancelled: AtomicBool::new(false),
            errors,
        };

        thread::scope(|scope| {
            for (worker, assigned) in plan.assignments.iter().enumerate() {
                let (ring, cancel) = (&ring, &cancel);
                let spawned = thread::Builder::new()
                    .name(format!("nimbus-get-{}", worker))
                    .spawn_scoped(scope, move || {
                        for number in assigned {
                            if cancel.is_cancelled() {
                                break;
                            }
                            let spec = plan.parts[*number as usize - 1];
                            let range = ByteRange::new(spec.offset, spec.length);
                            let fetched = self
                                .fetch(key, Some(range), retries)
                                .and_then(|data| {
                                    check_length(key, data.len() as u64, spec.length)?;
                                    Ok(data)
                                });
                            match fetched {
                                Ok(data) => {
                                    if let Err(e) = ring.push(FetchedPart { spec, data }) {
                                        if e != BufferError::Closed {
                                            cancel.fail(buffer_error(key, e, false), Some(ring));
                                        }
                                        break;
                                    }
                                }
                                Err(e) => {
                                    cancel.fail(e, Some(ring));
                                    break;
                                }
                            }
                        }
                    });
                if let Err(e) = spawned {
                    cancel.fail(NimbusError::Io(e), Some(ring));
                }
            }

            let written = (|| -> Result<()> {
                for _ in 0..plan.part_count() {
                    let part = match ring.pop() {
                        Ok(Some(part)) => part,
                        Ok(None) => return Ok(()),
                        Err(e) => return Err(buffer_error(key, e, false)),
                    };
                    file.seek(SeekFrom::Start(part.spec.offset))?;
                    file.write_all(&part.data)?;
                    self.report(part.spec.length);
                    debug!(key = %key, part = part.spec.number, "Part written");
                }
                file.sync_all()?;
                Ok(())
            })();
            if let Err(e) = written {
                cancel.fail(e, Some(&ring));
            }
        });

        drop(cancel);
        match error_rx.try_recv() {
            Ok(error) => Err(error),
            Err(_) => Ok(()),
        }
    }

    /// Parts too large for the ring: each worker fetches its parts in
    /// buffer-sized ranges and writes them through its own file handle
    fn download_direct(
        &self,
        plan: &TransferPlan,
        key: &ObjectKey,
        destination: &Path,
        retries: &AtomicU32,
    ) -> Result<()> {
        let chunk = self.settings.circular_buffer_capacity().max(1);
        let (errors, error_rx) = unbounded();
        let cancel = Cancellation {
            cancelled: AtomicBool::new(false),
            errors,
        };

        thread::scope(|scope| {
            for (worker, assigned) in plan.assignments.iter().enumerate() {
                let cancel = &cancel;
                let spawned = thread::Builder::new()
                    .name(format!("nimbus-get-{}", worker))
                    .spawn_scoped(scope, move || {
                        let run = || -> Result<()> {
                            let mut file = OpenOptions::new().write(true).open(destination)?;
                            for number in assigned {
                                let spec = plan.parts[*number as usize - 1];
                                let mut offset = spec.offset;
                                let end = spec.offset + spec.length;
                                while offset < end {
                                    if cancel.is_cancelled() {
                                        return Ok(());
                                    }
                                    let length = chunk.min(end - offset);
                                    let data = self.fetch(
                                        key,
                                        Some(ByteRange::new(offset, length)),
                                        retries,
                                    )?;
                                    check_length(key, data.len() as u64, length)?;
                                    file.seek(SeekFrom::Start(offset))?;
                                    file.write_all(&data)?;
                                    offset += length;
                                }
                                self.report(spec.length);
                                debug!(key = %key, part = spec.number, "Part written");
                            }
                            file.sync_all()?;
                            Ok(())
                        };
                        if let Err(e) = run() {
                            cancel.fail::<()>(e, None);
                        }
                    });
                if let Err(e) = spawned {
                    cancel.fail::<()>(NimbusError::Io(e), None);
                }
            }
        });

        drop(cancel);
        match error_rx.try_recv() {
            Ok(error) => Err(error),
            Err(_) => Ok(()),
        }
    }

    /// Copy an object of `size` bytes.
    ///
    /// Uses server-side copy when enabled and the object fits one request;
    /// falls back to download and re-upload when the store lacks copy support.
    pub fn copy(&self, source: &ObjectKey, destination: &ObjectKey, size: u64) -> Result<CopyMethod> {
        let copy_error = |e: NimbusError| match e.store_error() {
            Some(store_error) => NimbusError::Copy {
                src: source.to_string(),
                dest: destination.to_string(),
                source: store_error.clone(),
            },
            None => e,
        };

        if self.copy_object_enabled && size <= self.settings.max_single_part_upload_size {
            let copied = self.retry.run(&*self.clock, "copy_object", |_| {
                self.store.copy_object(source, destination, &self.put_options)
            });
            match copied {
                Ok(_) => {
                    info!(source = %source, destination = %destination, "Server-side copy complete");
                    return Ok(CopyMethod::ServerSide);
                }
                Err(StoreError::NotImplemented(_)) => {
                    info!(
                        source = %source,
                        store = self.store.name(),
                        "Store has no server-side copy, copying through the cache"
                    );
                }
                Err(e) => {
                    return Err(NimbusError::Copy {
                        src: source.to_string(),
                        dest: destination.to_string(),
                        source: e,
                    })
                }
            }
        }

        let staging = tempfile::Builder::new()
            .prefix("nimbus-copy-")
            .suffix(".cache")
            .tempfile_in(&self.cache_directory)?
            .into_temp_path();
        let plan = self.plan_download(size).map_err(copy_error)?;
        self.download(&plan, source, &staging).map_err(copy_error)?;
        self.upload_file(&staging, destination).map_err(copy_error)?;
        Ok(CopyMethod::Reupload)
    }
}

/// Copy exactly `length` bytes from `source` into `sink`, hashing them
fn copy_exact(
    source: &mut dyn Read,
    length: u64,
    hasher: &mut StreamingHasher,
    sink: &mut dyn Write,
) -> Result<()> {
    let mut buffer = vec![0u8; IO_CHUNK.min(length.max(1) as usize)];
    let mut remaining = length;
    while remaining > 0 {
        let want = buffer.len().min(remaining as usize);
        let n = match source.read(&mut buffer[..want]) {
            Ok(0) => {
                return Err(NimbusError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended {} bytes early", remaining),
                )))
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(e)),
        };
        hasher.update(&buffer[..n]);
        sink.write_all(&buffer[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Unwrap a `NimbusError` that travelled through `io::Read`
fn read_error(error: io::Error) -> NimbusError {
    if !error.get_ref().is_some_and(|inner| inner.is::<NimbusError>()) {
        return NimbusError::Io(error);
    }
    let kind = error.kind();
    match error.into_inner().map(|inner| inner.downcast::<NimbusError>()) {
        Some(Ok(inner)) => *inner,
        Some(Err(other)) => NimbusError::Io(io::Error::new(kind, other)),
        None => NimbusError::Io(kind.into()),
    }
}

fn check_length(key: &ObjectKey, actual: u64, expected: u64) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(NimbusError::Get {
            key: key.to_string(),
            source: StoreError::InvalidRange(format!(
                "expected {} bytes, received {}",
                expected, actual
            )),
        })
    }
}

fn buffer_error(key: &ObjectKey, error: BufferError, upload: bool) -> NimbusError {
    let source = StoreError::Timeout(error.to_string());
    if upload {
        NimbusError::Put {
            key: key.to_string(),
            source,
        }
    } else {
        NimbusError::Get {
            key: key.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::FakeClock;
    use crate::store::{MemoryObjectStore, MemoryStoreOptions, StoreOp};
    use std::io::Cursor;
    use tempfile::TempDir;

    const KIB: u64 = 1024;

    fn config(cache: &Path) -> ResourceConfig {
        ResourceConfig {
            transfer: TransferSettings {
                single_buffer_threshold: 64 * KIB,
                part_size: 16 * KIB,
                minimum_part_size: 16 * KIB,
                max_threads: 4,
                circular_buffer_parts: 2,
                ..Default::default()
            },
            cache_directory: cache.to_path_buf(),
            ..Default::default()
        }
    }

    fn store() -> Arc<MemoryObjectStore> {
        Arc::new(MemoryObjectStore::with_options(MemoryStoreOptions {
            minimum_part_size: 16 * KIB,
            supports_copy: true,
        }))
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_single_part_upload() {
        let cache = TempDir::new().unwrap();
        let store = store();
        let engine = TransferEngine::new(store.clone(), &config(cache.path()));
        let key = ObjectKey::new("bucket", "small");
        let bytes = data(1000);

        let plan = engine.plan_upload(bytes.len() as u64).unwrap();
        let outcome = engine
            .upload(&plan, &mut Cursor::new(bytes.clone()), &key)
            .unwrap();

        assert_eq!(outcome.strategy, TransferStrategy::SinglePart);
        assert_eq!(&store.object_bytes(&key).unwrap()[..], &bytes[..]);
        assert_eq!(store.call_count(StoreOp::Put), 1);
    }

    #[test]
    fn test_large_single_part_goes_through_cache() {
        let cache = TempDir::new().unwrap();
        let store = store();
        let mut cfg = config(cache.path());
        cfg.transfer.multipart_enabled = false;
        let engine = TransferEngine::new(store.clone(), &cfg);
        let key = ObjectKey::new("bucket", "unsplit");
        let bytes = data(100 * KIB as usize);

        let plan = engine.plan_upload(bytes.len() as u64).unwrap();
        assert_eq!(plan.strategy, TransferStrategy::SinglePart);
        engine
            .upload(&plan, &mut Cursor::new(bytes.clone()), &key)
            .unwrap();
        assert_eq!(&store.object_bytes(&key).unwrap()[..], &bytes[..]);
        assert_eq!(store.call_count(StoreOp::Put), 1);
        assert_eq!(std::fs::read_dir(cache.path()).unwrap().count(), 0);

        // Without a usable cache directory only the small body can be sent
        cfg.cache_directory = cache.path().join("missing");
        let engine = TransferEngine::new(store.clone(), &cfg);
        let err = engine
            .upload(&plan, &mut Cursor::new(bytes.clone()), &key)
            .unwrap_err();
        assert_eq!(err.code().as_str(), "UNIX_FILE_IO_ERR");

        let small = data(1000);
        let plan = engine.plan_upload(small.len() as u64).unwrap();
        engine
            .upload(&plan, &mut Cursor::new(small.clone()), &key)
            .unwrap();
        assert_eq!(&store.object_bytes(&key).unwrap()[..], &small[..]);
    }

    #[test]
    fn test_multipart_upload_and_download() {
        let cache = TempDir::new().unwrap();
        let store = store();
        let engine = TransferEngine::new(store.clone(), &config(cache.path()));
        let key = ObjectKey::new("bucket", "large");
        let bytes = data(200 * KIB as usize + 7);

        let plan = engine.plan_upload(bytes.len() as u64).unwrap();
        assert_eq!(plan.strategy, TransferStrategy::Streaming);
        let outcome = engine
            .upload(&plan, &mut Cursor::new(bytes.clone()), &key)
            .unwrap();
        assert_eq!(outcome.parts, 13);
        assert!(outcome.etag.unwrap().ends_with("-13"));
        assert_eq!(&store.object_bytes(&key).unwrap()[..], &bytes[..]);
        assert!(store.peak_concurrent_parts() <= 4);

        let target = cache.path().join("download.bin");
        let plan = engine.plan_download(bytes.len() as u64).unwrap();
        engine.download(&plan, &key, &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), bytes);
    }

    #[test]
    fn test_short_source_aborts_upload() {
        let cache = TempDir::new().unwrap();
        let store = store();
        let engine = TransferEngine::new(store.clone(), &config(cache.path()));
        let key = ObjectKey::new("bucket", "short");

        let plan = engine.plan_upload(100 * KIB).unwrap();
        let err = engine
            .upload(&plan, &mut Cursor::new(data(50 * KIB as usize)), &key)
            .unwrap_err();
        assert!(matches!(err, NimbusError::Io(_)));
        assert_eq!(store.active_multipart_uploads(), 0);
        assert!(!store.contains(&key));
    }

    #[test]
    fn test_transient_part_failure_is_retried() {
        crate::logging::init_test_logging();
        let cache = TempDir::new().unwrap();
        let store = store();
        let clock = Arc::new(FakeClock::default());
        let engine =
            TransferEngine::new(store.clone(), &config(cache.path())).with_clock(clock.clone());
        let key = ObjectKey::new("bucket", "flaky");
        let bytes = data(100 * KIB as usize);

        store.inject_fault(
            StoreOp::UploadPart,
            StoreError::Service {
                code: "SlowDown".to_string(),
                message: "reduce your request rate".to_string(),
            },
            2,
        );
        let plan = engine.plan_upload(bytes.len() as u64).unwrap();
        let outcome = engine
            .upload(&plan, &mut Cursor::new(bytes.clone()), &key)
            .unwrap();

        assert_eq!(outcome.retries, 2);
        assert_eq!(clock.sleeps().len(), 2);
        assert_eq!(&store.object_bytes(&key).unwrap()[..], &bytes[..]);
    }

    #[test]
    fn test_delete_missing_object_succeeds() {
        let cache = TempDir::new().unwrap();
        let engine = TransferEngine::new(store(), &config(cache.path()));
        engine.delete(&ObjectKey::new("bucket", "nothing")).unwrap();
    }

    #[test]
    fn test_copy_falls_back_to_reupload() {
        let cache = TempDir::new().unwrap();
        let store = Arc::new(MemoryObjectStore::with_options(MemoryStoreOptions {
            minimum_part_size: 16 * KIB,
            supports_copy: false,
        }));
        let engine = TransferEngine::new(store.clone(), &config(cache.path()));
        let src = ObjectKey::new("bucket", "src");
        let dest = ObjectKey::new("bucket", "dest");
        let bytes = data(90 * KIB as usize);

        let plan = engine.plan_upload(bytes.len() as u64).unwrap();
        engine
            .upload(&plan, &mut Cursor::new(bytes.clone()), &src)
            .unwrap();

        let method = engine.copy(&src, &dest, bytes.len() as u64).unwrap();
        assert_eq!(method, CopyMethod::Reupload);
        assert_eq!(&store.object_bytes(&dest).unwrap()[..], &bytes[..]);
        assert_eq!(std::fs::read_dir(cache.path()).unwrap().count(), 0);
    }
}
