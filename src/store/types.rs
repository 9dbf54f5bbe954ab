//! Type definitions shared by object store implementations

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Location of an object: bucket plus key within the bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub bucket: String,
    pub key: String,
}

impl ObjectKey {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.bucket, self.key)
    }
}

/// Byte range within an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Last byte covered by the range (inclusive), as used by HTTP `Range`
    pub fn last_byte(&self) -> u64 {
        self.offset + self.length.saturating_sub(1)
    }

    /// Render as an HTTP `Range` header value
    pub fn to_header(&self) -> String {
        format!("bytes={}-{}", self.offset, self.last_byte())
    }
}

/// S3 storage classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StorageClass {
    /// Standard storage class
    #[default]
    Standard,

    /// Reduced redundancy (deprecated but still available)
    ReducedRedundancy,

    /// Infrequent access
    StandardIa,

    /// One zone infrequent access
    OnezoneIa,

    /// Intelligent tiering
    IntelligentTiering,

    /// Glacier instant retrieval
    GlacierIr,

    /// Glacier flexible retrieval
    Glacier,

    /// Glacier deep archive
    DeepArchive,
}

impl StorageClass {
    /// Objects in these classes must be restored before they can be read.
    /// `GLACIER_IR` is readable immediately.
    pub fn requires_restore(&self) -> bool {
        matches!(self, StorageClass::Glacier | StorageClass::DeepArchive)
    }

    /// Check if this storage class is a Glacier tier
    pub fn is_glacier(&self) -> bool {
        matches!(
            self,
            StorageClass::GlacierIr | StorageClass::Glacier | StorageClass::DeepArchive
        )
    }

    /// Header value used by S3 (`x-amz-storage-class`)
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::ReducedRedundancy => "REDUCED_REDUNDANCY",
            StorageClass::StandardIa => "STANDARD_IA",
            StorageClass::OnezoneIa => "ONEZONE_IA",
            StorageClass::IntelligentTiering => "INTELLIGENT_TIERING",
            StorageClass::GlacierIr => "GLACIER_IR",
            StorageClass::Glacier => "GLACIER",
            StorageClass::DeepArchive => "DEEP_ARCHIVE",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "STANDARD" => Ok(StorageClass::Standard),
            "REDUCED_REDUNDANCY" => Ok(StorageClass::ReducedRedundancy),
            "STANDARD_IA" => Ok(StorageClass::StandardIa),
            "ONEZONE_IA" => Ok(StorageClass::OnezoneIa),
            "INTELLIGENT_TIERING" => Ok(StorageClass::IntelligentTiering),
            "GLACIER_IR" => Ok(StorageClass::GlacierIr),
            "GLACIER" => Ok(StorageClass::Glacier),
            "DEEP_ARCHIVE" => Ok(StorageClass::DeepArchive),
            other => Err(format!("unknown storage class: {}", other)),
        }
    }
}

/// Glacier restoration tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RestorationTier {
    Expedited,
    #[default]
    Standard,
    Bulk,
}

impl RestorationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestorationTier::Expedited => "Expedited",
            RestorationTier::Standard => "Standard",
            RestorationTier::Bulk => "Bulk",
        }
    }

    /// Typical time until a restore issued at this tier completes
    pub fn typical_duration(&self, class: StorageClass) -> Duration {
        let hours = |h: u64| Duration::from_secs(h * 3600);
        match (class, self) {
            (StorageClass::DeepArchive, RestorationTier::Bulk) => hours(48),
            (StorageClass::DeepArchive, _) => hours(12),
            (_, RestorationTier::Expedited) => Duration::from_secs(5 * 60),
            (_, RestorationTier::Standard) => hours(5),
            (_, RestorationTier::Bulk) => hours(12),
        }
    }
}

impl fmt::Display for RestorationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestorationTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "expedited" => Ok(RestorationTier::Expedited),
            "standard" => Ok(RestorationTier::Standard),
            "bulk" => Ok(RestorationTier::Bulk),
            other => Err(format!("unknown restoration tier: {}", other)),
        }
    }
}

/// Parameters of a restore request against an archived object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreRequest {
    pub days: u32,
    pub tier: RestorationTier,
}

/// Restore progress reported by the store for archived objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    /// `x-amz-restore: ongoing-request="true"`
    Ongoing,
    /// `x-amz-restore: ongoing-request="false"`; a readable copy exists
    Completed,
}

impl RestoreStatus {
    /// Parse the `x-amz-restore` header value
    pub fn from_header(value: &str) -> Option<Self> {
        if value.contains("ongoing-request=\"true\"") {
            Some(RestoreStatus::Ongoing)
        } else if value.contains("ongoing-request=\"false\"") {
            Some(RestoreStatus::Completed)
        } else {
            None
        }
    }
}

/// Object metadata returned by a HEAD request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub etag: Option<String>,
    pub storage_class: StorageClass,
    pub restore: Option<RestoreStatus>,
}

/// Options applied to object creation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub storage_class: StorageClass,
    pub server_side_encryption: bool,
}

/// A part confirmed by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Payload of a PUT or UploadPart request
#[derive(Debug, Clone)]
pub enum PartBody {
    /// Bytes held in memory
    Memory(Bytes),
    /// A region of a file on local disk
    File {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
}

impl PartBody {
    pub fn len(&self) -> u64 {
        match self {
            PartBody::Memory(bytes) => bytes.len() as u64,
            PartBody::File { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the body in memory
    pub fn read_all(&self) -> io::Result<Bytes> {
        match self {
            PartBody::Memory(bytes) => Ok(bytes.clone()),
            PartBody::File {
                path,
                offset,
                length,
            } => {
                let mut file = File::open(path)?;
                file.seek(SeekFrom::Start(*offset))?;
                let mut buffer = Vec::with_capacity(*length as usize);
                file.take(*length).read_to_end(&mut buffer)?;
                if buffer.len() as u64 != *length {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "{} holds {} bytes at offset {}, expected {}",
                            path.display(),
                            buffer.len(),
                            offset,
                            length
                        ),
                    ));
                }
                Ok(Bytes::from(buffer))
            }
        }
    }
}
