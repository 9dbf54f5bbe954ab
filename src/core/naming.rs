/*!
 * Mapping logical paths to object keys
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{NimbusError, Result};
use crate::store::ObjectKey;

/// How physical keys relate to the logical namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NamingPolicy {
    /// The key mirrors the logical path; renames move the object
    #[default]
    Consistent,
    /// The key derives from the immutable object id; renames never move data
    Decoupled,
}

impl fmt::Display for NamingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamingPolicy::Consistent => f.write_str("consistent"),
            NamingPolicy::Decoupled => f.write_str("decoupled"),
        }
    }
}

impl FromStr for NamingPolicy {
    type Err = NimbusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "consistent" => Ok(NamingPolicy::Consistent),
            "decoupled" => Ok(NamingPolicy::Decoupled),
            other => Err(NimbusError::Config(format!(
                "unknown ARCHIVE_NAMING_POLICY: {}",
                other
            ))),
        }
    }
}

/// Split `/bucket/key` (leading slash optional) into bucket and key
pub fn parse_s3_path(path: &str) -> Result<ObjectKey> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok(ObjectKey::new(bucket, key))
        }
        _ => Err(NimbusError::InvalidPath(format!(
            "{} does not name a bucket and an object key",
            path
        ))),
    }
}

/// Decimal digits of the id, reversed. Spreads sequential ids across key prefixes.
pub fn reverse_object_id(object_id: u64) -> String {
    object_id.to_string().chars().rev().collect()
}

/// Components of an absolute logical path: zone first, object name last
fn logical_components(logical_path: &str) -> Result<Vec<&str>> {
    if !logical_path.starts_with('/') {
        return Err(NimbusError::InvalidPath(format!(
            "logical path {} is not absolute",
            logical_path
        )));
    }
    let components: Vec<&str> = logical_path.split('/').filter(|c| !c.is_empty()).collect();
    if components.len() < 2 {
        return Err(NimbusError::InvalidPath(format!(
            "logical path {} has no object below the zone",
            logical_path
        )));
    }
    Ok(components)
}

/// Physical path of an object under `vault_path` (`/bucket[/prefix]`)
pub fn physical_key(
    object_id: u64,
    logical_path: &str,
    vault_path: &str,
    policy: NamingPolicy,
) -> Result<String> {
    let components = logical_components(logical_path)?;
    let vault = vault_path.trim_end_matches('/');

    match policy {
        NamingPolicy::Consistent => {
            if vault.trim_start_matches('/').is_empty() {
                return Err(NimbusError::InvalidPath(format!(
                    "vault path {} does not name a bucket",
                    vault_path
                )));
            }
            Ok(format!("{}/{}", vault, components[1..].join("/")))
        }
        NamingPolicy::Decoupled => {
            let bucket = vault
                .trim_start_matches('/')
                .split('/')
                .next()
                .filter(|b| !b.is_empty())
                .ok_or_else(|| {
                    NimbusError::InvalidPath(format!(
                        "vault path {} does not name a bucket",
                        vault_path
                    ))
                })?;
            let object_name = components[components.len() - 1];
            Ok(format!(
                "/{}/{}/{}",
                bucket,
                reverse_object_id(object_id),
                object_name
            ))
        }
    }
}
