/*!
 * Shared fixtures for the integration tests
 */

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use nimbus::catalog::MemoryCatalog;
use nimbus::config::{Credentials, ResourceConfig, TransferSettings};
use nimbus::core::engine::TransferOutcome;
use nimbus::resource::{S3Resource, WriteOptions};
use nimbus::store::{MemoryObjectStore, MemoryStoreOptions};
use nimbus::Result;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

pub const HIERARCHY: &str = "s3resc";
pub const VAULT: &str = "/bucket/vault";

/// Scaled-down limits: 64 KiB single threshold, 16 KiB parts
pub fn small_settings() -> TransferSettings {
    TransferSettings {
        single_buffer_threshold: 64 * KIB,
        part_size: 16 * KIB,
        minimum_part_size: 16 * KIB,
        max_threads: 4,
        circular_buffer_parts: 2,
        ..Default::default()
    }
}

pub fn small_config(cache: &Path) -> ResourceConfig {
    ResourceConfig {
        resource_name: HIERARCHY.to_string(),
        transfer: small_settings(),
        cache_directory: cache.to_path_buf(),
        ..Default::default()
    }
}

pub fn memory_store() -> Arc<MemoryObjectStore> {
    Arc::new(MemoryObjectStore::with_options(MemoryStoreOptions {
        minimum_part_size: 16 * KIB,
        supports_copy: true,
    }))
}

pub fn resource(
    config: ResourceConfig,
    store: &Arc<MemoryObjectStore>,
    catalog: &Arc<MemoryCatalog>,
) -> S3Resource {
    S3Resource::new(config, VAULT, store.clone(), catalog.clone())
        .with_credentials(Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI"))
}

/// Deterministic bytes that differ between seeds
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u64 * 31 + seed as u64 * 7) % 251) as u8)
        .collect()
}

pub fn put_bytes(resource: &S3Resource, logical_path: &str, bytes: &[u8]) -> Result<TransferOutcome> {
    resource.put_reader(
        &mut Cursor::new(bytes.to_vec()),
        bytes.len() as u64,
        logical_path,
        &WriteOptions {
            register_checksum: true,
            ..Default::default()
        },
    )
}
