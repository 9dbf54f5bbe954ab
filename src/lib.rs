/*!
 * Nimbus - cacheless S3 resource transfer engine
 *
 * Moves data objects between local storage and S3-compatible object stores:
 * - Chunk planning: single request, streamed multipart, or cache-spilled multipart
 * - Parallel part transfers through a bounded circular buffer
 * - Bounded retries with exponential backoff
 * - Replica status tracking (stale, clean, locked) through a catalog trait
 * - Glacier and Deep Archive restore staging
 * - Consistent or decoupled physical naming
 *
 * The object store is reached through [`store::ObjectStore`]; an in-memory
 * store, a directory-backed store, and (with `s3-native`) an AWS SDK client
 * are provided.
 */

pub mod catalog;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod resource;
pub mod store;

// Re-export commonly used types
pub use catalog::{Catalog, MemoryCatalog};
pub use config::{Credentials, HostMode, ResourceConfig, TransferSettings};
pub use crate::core::engine::{CopyMethod, TransferEngine, TransferOutcome};
pub use crate::core::naming::NamingPolicy;
pub use crate::core::planner::{plan, TransferPlan, TransferStrategy};
pub use crate::core::replica::{ReplicaStatus, WriteIntent};
pub use error::{ErrorCode, NimbusError, Result};
pub use resource::{ReadOptions, S3Resource, WriteOptions};
pub use store::{ObjectKey, ObjectStore, StorageClass};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
