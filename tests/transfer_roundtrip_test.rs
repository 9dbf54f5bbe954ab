/*!
 * Upload/download round trips through the transfer engine
 */

mod common;

use std::fs;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

use common::{memory_store, pattern, small_config, KIB};
use nimbus::config::ResourceConfig;
use nimbus::core::engine::{CopyMethod, TransferEngine};
use nimbus::core::planner::TransferStrategy;
use nimbus::core::retry::FakeClock;
use nimbus::store::{MemoryObjectStore, ObjectKey, StoreError, StoreOp};

fn roundtrip(engine: &TransferEngine, key: &ObjectKey, bytes: &[u8], scratch: &std::path::Path) {
    let plan = engine.plan_upload(bytes.len() as u64).unwrap();
    engine
        .upload(&plan, &mut Cursor::new(bytes.to_vec()), key)
        .unwrap();

    let target = scratch.join("roundtrip.out");
    let plan = engine.plan_download(bytes.len() as u64).unwrap();
    engine.download(&plan, key, &target).unwrap();
    assert_eq!(fs::read(&target).unwrap(), bytes, "size {}", bytes.len());
}

#[test]
fn test_roundtrip_around_threshold() {
    let dir = tempdir().unwrap();
    let store = memory_store();
    let engine = TransferEngine::new(store.clone(), &small_config(dir.path()));
    let threshold = 64 * KIB as usize;

    for (i, size) in [0, 1, threshold - 1, threshold, threshold + 1, 200 * 1024 + 5]
        .into_iter()
        .enumerate()
    {
        let key = ObjectKey::new("bucket", format!("obj-{}", i));
        roundtrip(&engine, &key, &pattern(size, i as u8), dir.path());
    }
}

#[test]
fn test_spilled_parts_match_streamed_parts() {
    let cache = tempdir().unwrap();
    let store = memory_store();
    let bytes = pattern(300 * KIB as usize + 11, 3);

    let streaming = TransferEngine::new(store.clone(), &small_config(cache.path()));
    let mut spill_config = small_config(cache.path());
    spill_config.transfer.part_size = 48 * KIB;
    let spilling = TransferEngine::new(store.clone(), &spill_config);

    let streamed_plan = streaming.plan_upload(bytes.len() as u64).unwrap();
    let spilled_plan = spilling.plan_upload(bytes.len() as u64).unwrap();
    assert_eq!(streamed_plan.strategy, TransferStrategy::Streaming);
    assert_eq!(spilled_plan.strategy, TransferStrategy::CacheSpill);

    let a = ObjectKey::new("bucket", "streamed");
    let b = ObjectKey::new("bucket", "spilled");
    streaming
        .upload(&streamed_plan, &mut Cursor::new(bytes.clone()), &a)
        .unwrap();
    let outcome = spilling
        .upload(&spilled_plan, &mut Cursor::new(bytes.clone()), &b)
        .unwrap();

    assert_eq!(store.object_bytes(&a), store.object_bytes(&b));
    assert_eq!(&store.object_bytes(&b).unwrap()[..], &bytes[..]);
    assert_eq!(outcome.parts, 7);
    // Every cache file is gone once its part is uploaded
    assert_eq!(fs::read_dir(cache.path()).unwrap().count(), 0);
}

#[test]
fn test_spilled_download() {
    let dir = tempdir().unwrap();
    let store = memory_store();
    let mut config = small_config(dir.path());
    config.transfer.part_size = 48 * KIB;
    let engine = TransferEngine::new(store.clone(), &config);

    let key = ObjectKey::new("bucket", "big");
    let bytes = pattern(250 * KIB as usize, 9);
    roundtrip(&engine, &key, &bytes, dir.path());
}

#[test]
fn test_fatal_part_error_aborts_upload() {
    let dir = tempdir().unwrap();
    let store = memory_store();
    let engine = TransferEngine::new(store.clone(), &small_config(dir.path()));
    let key = ObjectKey::new("bucket", "doomed");

    store.inject_fault(
        StoreOp::UploadPart,
        StoreError::AccessDenied("bucket policy".to_string()),
        1,
    );
    let plan = engine.plan_upload(160 * KIB).unwrap();
    let err = engine
        .upload(&plan, &mut Cursor::new(pattern(160 * KIB as usize, 1)), &key)
        .unwrap_err();

    assert_eq!(err.code().as_str(), "S3_PUT_ERROR");
    assert!(!err.is_retryable());
    assert_eq!(store.call_count(StoreOp::AbortMultipart), 1);
    assert_eq!(store.active_multipart_uploads(), 0);
    assert!(!store.contains(&key));
}

#[test]
fn test_retries_exhausted() {
    let dir = tempdir().unwrap();
    let store = memory_store();
    let clock = Arc::new(FakeClock::default());
    let config = small_config(dir.path());
    let engine = TransferEngine::new(store.clone(), &config).with_clock(clock.clone());
    let key = ObjectKey::new("bucket", "unlucky");

    store.inject_fault(
        StoreOp::Put,
        StoreError::Network("connection reset by peer".to_string()),
        10,
    );
    let plan = engine.plan_upload(KIB).unwrap();
    let err = engine
        .upload(&plan, &mut Cursor::new(pattern(KIB as usize, 2)), &key)
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(store.call_count(StoreOp::Put), 4);
    let sleeps = clock.sleeps();
    assert_eq!(sleeps.len(), 3);
    assert!(sleeps.iter().all(|d| *d <= config.retry.max_wait_time));
    assert!(sleeps[1] >= sleeps[0]);
}

#[test]
fn test_worker_count_bounds_concurrency() {
    let dir = tempdir().unwrap();
    let store = memory_store();
    let mut config = small_config(dir.path());
    config.transfer.max_threads = 3;
    config.transfer.circular_buffer_parts = 6;
    let engine = TransferEngine::new(store.clone(), &config);

    let key = ObjectKey::new("bucket", "wide");
    let plan = engine.plan_upload(40 * 16 * KIB).unwrap();
    assert_eq!(plan.thread_count, 3);
    engine
        .upload(&plan, &mut Cursor::new(pattern(40 * 16 * KIB as usize, 4)), &key)
        .unwrap();

    assert!(store.peak_concurrent_parts() >= 1);
    assert!(store.peak_concurrent_parts() <= 3);
    assert_eq!(store.call_count(StoreOp::UploadPart), 40);
}

#[test]
fn test_content_md5_sent_with_parts() {
    let dir = tempdir().unwrap();
    let store = memory_store();
    let config = ResourceConfig {
        enable_md5: true,
        ..small_config(dir.path())
    };
    let engine = TransferEngine::new(store.clone(), &config);
    roundtrip(
        &engine,
        &ObjectKey::new("bucket", "digested"),
        &pattern(100 * KIB as usize, 5),
        dir.path(),
    );
}

#[test]
fn test_progress_reports_every_byte() {
    let dir = tempdir().unwrap();
    let total = Arc::new(AtomicU64::new(0));
    let counter = total.clone();
    let engine = TransferEngine::new(memory_store(), &small_config(dir.path()))
        .with_progress(Arc::new(move |bytes| {
            counter.fetch_add(bytes, Ordering::SeqCst);
        }));

    let size = 130 * KIB;
    let plan = engine.plan_upload(size).unwrap();
    engine
        .upload(
            &plan,
            &mut Cursor::new(pattern(size as usize, 6)),
            &ObjectKey::new("bucket", "counted"),
        )
        .unwrap();
    assert_eq!(total.load(Ordering::SeqCst), size);
}

#[test]
fn test_server_side_copy() {
    let dir = tempdir().unwrap();
    let store: Arc<MemoryObjectStore> = memory_store();
    let engine = TransferEngine::new(store.clone(), &small_config(dir.path()));
    let src = ObjectKey::new("bucket", "a");
    let dest = ObjectKey::new("other", "b");
    let bytes = pattern(10 * KIB as usize, 8);

    let plan = engine.plan_upload(bytes.len() as u64).unwrap();
    engine
        .upload(&plan, &mut Cursor::new(bytes.clone()), &src)
        .unwrap();
    let method = engine.copy(&src, &dest, bytes.len() as u64).unwrap();

    assert_eq!(method, CopyMethod::ServerSide);
    assert_eq!(&store.object_bytes(&dest).unwrap()[..], &bytes[..]);
}
