/*!
 * Streaming checksum calculation
 *
 * Catalog checksums are SHA-256 digests rendered as `sha2:<base64>`.
 * Request bodies carry a base64 MD5 digest in `Content-MD5` when enabled.
 */

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use crate::error::{NimbusError, Result};
use crate::store::PartBody;

/// Prefix tagging SHA-256 checksums
pub const SHA256_TAG: &str = "sha2";

/// Algorithm-tagged checksum as stored in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: String,
    pub value: String,
}

impl Checksum {
    pub fn sha256(digest: &[u8]) -> Self {
        Self {
            algorithm: SHA256_TAG.to_string(),
            value: STANDARD.encode(digest),
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

impl FromStr for Checksum {
    type Err = NimbusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((algorithm, value)) if !algorithm.is_empty() && !value.is_empty() => Ok(Self {
                algorithm: algorithm.to_string(),
                value: value.to_string(),
            }),
            _ => Err(NimbusError::Config(format!("malformed checksum: {}", s))),
        }
    }
}

/// Streaming hasher that calculates checksum incrementally
pub struct StreamingHasher {
    hasher: Sha256,
}

impl StreamingHasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Update the hash with new data
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finalize into a tagged checksum
    pub fn finalize(self) -> Checksum {
        Checksum::sha256(&self.hasher.finalize())
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of a local file
pub fn file_checksum(path: &Path) -> Result<Checksum> {
    let mut file = BufReader::new(File::open(path)?);
    let mut hasher = StreamingHasher::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Base64 MD5 digest as sent in `Content-MD5`
pub fn content_md5_of(data: &[u8]) -> String {
    STANDARD.encode(md5::compute(data).0)
}

/// `Content-MD5` of a request body
pub fn content_md5(body: &PartBody) -> Result<String> {
    match body {
        PartBody::Memory(bytes) => Ok(content_md5_of(bytes)),
        PartBody::File { .. } => Ok(content_md5_of(&body.read_all()?)),
    }
}
