/*!
 * Configuration for an S3 resource
 *
 * A resource is configured from a semicolon-delimited `KEY=VALUE` context
 * string, e.g.
 *
 * ```text
 * S3_DEFAULT_HOSTNAME=minio:9000;S3_AUTH_FILE=/etc/s3.keypair;S3_REGIONNAME=us-east-1;
 * S3_RETRY_COUNT=3;S3_WAIT_TIME_SEC=3;S3_PROTO=HTTP;HOST_MODE=cacheless_attached
 * ```
 *
 * Credentials come from a two-line file (access key id, then secret key) or
 * from `S3_ACCESS_KEY_ID` / `S3_SECRET_ACCESS_KEY` in the environment.
 */

use crate::core::naming::NamingPolicy;
use crate::error::{NimbusError, Result};
use crate::store::{RestorationTier, StorageClass};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const MIB: u64 = 1024 * 1024;

/// Environment variable overriding the access key id from the auth file
pub const ACCESS_KEY_ENV: &str = "S3_ACCESS_KEY_ID";
/// Environment variable overriding the secret key from the auth file
pub const SECRET_KEY_ENV: &str = "S3_SECRET_ACCESS_KEY";

/// How the resource participates in a hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostMode {
    /// Archive behind a cache resource; data moves via stage/sync
    ArchiveAttached,
    /// Standalone resource; reads and writes go straight to the object store
    #[default]
    CachelessAttached,
    /// Cacheless, reachable from any server
    CachelessDetached,
}

impl HostMode {
    pub fn is_cacheless(&self) -> bool {
        !matches!(self, HostMode::ArchiveAttached)
    }
}

impl FromStr for HostMode {
    type Err = NimbusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive_attached" => Ok(HostMode::ArchiveAttached),
            "cacheless_attached" => Ok(HostMode::CachelessAttached),
            "cacheless_detached" => Ok(HostMode::CachelessDetached),
            other => Err(NimbusError::Config(format!("unknown HOST_MODE: {}", other))),
        }
    }
}

/// Transport protocol for the S3 endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// Bucket addressing style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UriStyle {
    /// `https://host/bucket/key`
    #[default]
    Path,
    /// `https://bucket.host/key`
    Virtual,
}

/// Which date header is signed (`S3_STSDATE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignatureDate {
    Amz,
    Date,
    #[default]
    Both,
}

/// Chunking and buffering limits used by the planner and engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Objects up to this size move with a single request
    pub single_buffer_threshold: u64,

    /// Configured part size for multipart transfers (`S3_MPU_CHUNK`)
    pub part_size: u64,

    /// Smallest non-final part the object store accepts
    pub minimum_part_size: u64,

    /// Upper bound on worker threads (`S3_MPU_THREADS`)
    pub max_threads: usize,

    /// Object store limit on parts per multipart upload
    pub max_parts: u64,

    /// Largest object or part accepted by one request (`S3_MAX_UPLOAD_SIZE`)
    pub max_single_part_upload_size: u64,

    /// `S3_ENABLE_MPU`
    pub multipart_enabled: bool,

    /// Slots in the circular buffer between coordinator and workers
    pub circular_buffer_parts: usize,

    /// Longest a coordinator or worker waits on the circular buffer
    pub circular_buffer_timeout: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            single_buffer_threshold: 32 * MIB,
            part_size: 5 * MIB,
            minimum_part_size: 5 * MIB,
            max_threads: 10,
            max_parts: 10_000,
            max_single_part_upload_size: 5 * 1024 * MIB,
            multipart_enabled: true,
            circular_buffer_parts: 4,
            circular_buffer_timeout: Duration::from_secs(180),
        }
    }
}

impl TransferSettings {
    /// Bytes the circular buffer may hold before parts spill to disk
    pub fn circular_buffer_capacity(&self) -> u64 {
        self.circular_buffer_parts as u64 * self.minimum_part_size
    }
}

/// Per-request retry limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt (`S3_RETRY_COUNT`)
    pub retry_count: u32,
    /// Initial backoff (`S3_WAIT_TIME_SEC`)
    pub wait_time: Duration,
    /// Backoff ceiling (`S3_MAX_WAIT_TIME_SEC`)
    pub max_wait_time: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retry_count: 3,
            wait_time: Duration::from_secs(3),
            max_wait_time: Duration::from_secs(30),
        }
    }
}

/// Complete configuration of one S3 resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub resource_name: String,
    pub hostnames: Vec<String>,
    pub auth_file: Option<PathBuf>,
    pub region: String,
    pub protocol: Protocol,
    pub uri_style: UriStyle,
    pub sts_date: SignatureDate,
    pub transfer: TransferSettings,
    pub retry: RetrySettings,
    /// Send Content-MD5 with every request body and record checksums
    pub enable_md5: bool,
    pub server_side_encryption: bool,
    pub storage_class: StorageClass,
    pub restoration_tier: RestorationTier,
    pub restoration_days: u32,
    /// Directory for parts that do not fit the circular buffer
    pub cache_directory: PathBuf,
    /// Try server-side copy before download and re-upload
    pub copy_object_enabled: bool,
    pub naming_policy: NamingPolicy,
    pub host_mode: HostMode,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            resource_name: "s3resc".to_string(),
            hostnames: vec!["s3.amazonaws.com".to_string()],
            auth_file: None,
            region: "us-east-1".to_string(),
            protocol: Protocol::Https,
            uri_style: UriStyle::Path,
            sts_date: SignatureDate::Both,
            transfer: TransferSettings::default(),
            retry: RetrySettings::default(),
            enable_md5: false,
            server_side_encryption: false,
            storage_class: StorageClass::Standard,
            restoration_tier: RestorationTier::Standard,
            restoration_days: 7,
            cache_directory: std::env::temp_dir(),
            copy_object_enabled: true,
            naming_policy: NamingPolicy::Consistent,
            host_mode: HostMode::CachelessAttached,
        }
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| NimbusError::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

/// A size given in MiB, as bytes
fn parse_mebibytes(key: &str, value: &str) -> Result<u64> {
    parse_number::<u64>(key, value)?
        .checked_mul(MIB)
        .ok_or_else(|| NimbusError::Config(format!("{} is too large: {} MiB", key, value.trim())))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(NimbusError::Config(format!(
            "{} must be 0 or 1, got '{}'",
            key, value
        ))),
    }
}

impl ResourceConfig {
    /// Parse a resource context string on top of the defaults
    pub fn from_context(resource_name: &str, context: &str) -> Result<Self> {
        let mut config = ResourceConfig {
            resource_name: resource_name.to_string(),
            ..Default::default()
        };

        for entry in context.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                NimbusError::Config(format!("context entry '{}' is not KEY=VALUE", entry))
            })?;
            config.apply(key.trim(), value.trim())?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "S3_DEFAULT_HOSTNAME" => {
                self.hostnames = value
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(String::from)
                    .collect();
            }
            "S3_AUTH_FILE" => self.auth_file = Some(PathBuf::from(value)),
            "S3_REGIONNAME" => self.region = value.to_string(),
            "S3_PROTO" => {
                self.protocol = match value.to_ascii_lowercase().as_str() {
                    "http" => Protocol::Http,
                    "https" => Protocol::Https,
                    _ => return Err(NimbusError::Config(format!("unknown S3_PROTO: {}", value))),
                }
            }
            "S3_URI_REQUEST_STYLE" => {
                self.uri_style = match value.to_ascii_lowercase().as_str() {
                    "path" => UriStyle::Path,
                    "virtual" | "host" | "virtual_host" => UriStyle::Virtual,
                    _ => {
                        return Err(NimbusError::Config(format!(
                            "unknown S3_URI_REQUEST_STYLE: {}",
                            value
                        )))
                    }
                }
            }
            "S3_STSDATE" => {
                self.sts_date = match value.to_ascii_lowercase().as_str() {
                    "amz" => SignatureDate::Amz,
                    "date" => SignatureDate::Date,
                    "both" => SignatureDate::Both,
                    _ => return Err(NimbusError::Config(format!("unknown S3_STSDATE: {}", value))),
                }
            }
            "S3_RETRY_COUNT" => self.retry.retry_count = parse_number(key, value)?,
            "S3_WAIT_TIME_SEC" | "S3_WAIT_TIME_SECONDS" => {
                self.retry.wait_time = Duration::from_secs(parse_number(key, value)?)
            }
            "S3_MAX_WAIT_TIME_SEC" | "S3_MAX_WAIT_TIME_SECONDS" => {
                self.retry.max_wait_time = Duration::from_secs(parse_number(key, value)?)
            }
            "S3_MPU_CHUNK" => {
                self.transfer.part_size = parse_mebibytes(key, value)?;
            }
            "S3_MPU_THREADS" => self.transfer.max_threads = parse_number(key, value)?,
            "S3_MAX_UPLOAD_SIZE" => {
                self.transfer.max_single_part_upload_size = parse_mebibytes(key, value)?;
            }
            "MAXIMUM_SIZE_FOR_SINGLE_BUFFER_IN_MEGABYTES" => {
                self.transfer.single_buffer_threshold = parse_mebibytes(key, value)?;
            }
            "S3_ENABLE_MPU" => self.transfer.multipart_enabled = parse_flag(key, value)?,
            "S3_ENABLE_MD5" => self.enable_md5 = parse_flag(key, value)?,
            "S3_SERVER_ENCRYPT" => self.server_side_encryption = parse_flag(key, value)?,
            "S3_ENABLE_COPYOBJECT" => self.copy_object_enabled = parse_flag(key, value)?,
            "S3_STORAGE_CLASS" => {
                self.storage_class = value.parse().map_err(NimbusError::Config)?;
            }
            "S3_RESTORATION_TIER" => {
                self.restoration_tier = value.parse().map_err(NimbusError::Config)?;
            }
            "S3_RESTORATION_DAYS" => self.restoration_days = parse_number(key, value)?,
            "S3_CACHE_DIR" => self.cache_directory = PathBuf::from(value),
            "S3_CIRCULAR_BUFFER_SIZE" => {
                let slots: usize = parse_number(key, value)?;
                if slots < 2 {
                    tracing::warn!(
                        requested = slots,
                        "S3_CIRCULAR_BUFFER_SIZE below 2, using 2"
                    );
                }
                self.transfer.circular_buffer_parts = slots.max(2);
            }
            "S3_CIRCULAR_BUFFER_TIMEOUT_SECONDS" => {
                self.transfer.circular_buffer_timeout =
                    Duration::from_secs(parse_number(key, value)?)
            }
            "ARCHIVE_NAMING_POLICY" => self.naming_policy = value.parse()?,
            "HOST_MODE" => self.host_mode = value.parse()?,
            _ => {
                tracing::warn!(
                    resource = %self.resource_name,
                    key,
                    "Ignoring unknown context key"
                );
            }
        }
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let t = &self.transfer;

        if self.hostnames.is_empty() {
            return Err(NimbusError::Config(
                "S3_DEFAULT_HOSTNAME must name at least one host".to_string(),
            ));
        }
        if t.max_threads == 0 {
            return Err(NimbusError::Config(
                "S3_MPU_THREADS must be at least 1".to_string(),
            ));
        }
        if t.max_parts == 0 {
            return Err(NimbusError::Config(
                "maximum part count must be at least 1".to_string(),
            ));
        }
        if t.part_size < t.minimum_part_size {
            return Err(NimbusError::Config(format!(
                "part size {} is below the minimum part size {}",
                t.part_size, t.minimum_part_size
            )));
        }
        if t.part_size > t.max_single_part_upload_size {
            return Err(NimbusError::Config(format!(
                "part size {} exceeds the single upload limit {}",
                t.part_size, t.max_single_part_upload_size
            )));
        }
        if t.circular_buffer_parts < 2 {
            return Err(NimbusError::Config(
                "circular buffer needs at least 2 slots".to_string(),
            ));
        }
        if self.restoration_days == 0 {
            return Err(NimbusError::Config(
                "S3_RESTORATION_DAYS must be at least 1".to_string(),
            ));
        }
        if self.retry.max_wait_time < self.retry.wait_time {
            return Err(NimbusError::Config(format!(
                "S3_MAX_WAIT_TIME_SEC ({}s) is below S3_WAIT_TIME_SEC ({}s)",
                self.retry.max_wait_time.as_secs(),
                self.retry.wait_time.as_secs()
            )));
        }
        Ok(())
    }

    /// Load credentials from the environment or the auth file
    pub fn load_credentials(&self) -> Result<Credentials> {
        self.load_credentials_with(|name| std::env::var(name).ok())
    }

    /// Same as [`load_credentials`](Self::load_credentials) with an injectable environment
    pub fn load_credentials_with<F>(&self, env: F) -> Result<Credentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let (Some(access), Some(secret)) = (env(ACCESS_KEY_ENV), env(SECRET_KEY_ENV)) {
            if !access.is_empty() && !secret.is_empty() {
                return Ok(Credentials::new(access, secret));
            }
        }

        match &self.auth_file {
            Some(path) => Credentials::from_file(path),
            None => Err(NimbusError::Credentials(format!(
                "no S3_AUTH_FILE configured for resource {} and {} / {} are unset",
                self.resource_name, ACCESS_KEY_ENV, SECRET_KEY_ENV
            ))),
        }
    }
}

/// Access key pair. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    /// Read a two-line auth file: access key id, then secret access key
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            NimbusError::Credentials(format!("cannot read auth file {}: {}", path.display(), e))
        })?;

        let lines: Vec<&str> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() < 2 {
            return Err(NimbusError::Credentials(format!(
                "Read {} lines in the auth file. Expected 2.",
                lines.len()
            )));
        }
        Ok(Self::new(lines[0], lines[1]))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Logging options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: LogLevel,
    /// Write JSON logs to this file instead of stdout
    pub log_file: Option<PathBuf>,
    /// Shorthand for `log_level = "debug"`
    pub verbose: bool,
}

/// Settings file read by the `nimbus` binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    /// Resource name used in log output
    pub resource_name: Option<String>,
    /// Context string, same syntax as `--context`
    pub context: Option<String>,
    pub logging: LoggingConfig,
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            NimbusError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents)
            .map_err(|e| NimbusError::Config(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = ResourceConfig::default();
        assert_eq!(config.transfer.single_buffer_threshold, 32 * MIB);
        assert_eq!(config.transfer.minimum_part_size, 5 * MIB);
        assert_eq!(config.transfer.max_single_part_upload_size, 5 * 1024 * MIB);
        assert_eq!(config.transfer.circular_buffer_parts, 4);
        assert_eq!(config.retry.retry_count, 3);
        assert_eq!(config.retry.wait_time, Duration::from_secs(3));
        assert_eq!(config.restoration_days, 7);
        assert_eq!(config.restoration_tier, RestorationTier::Standard);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_context() {
        let config = ResourceConfig::from_context(
            "s3resc",
            "S3_DEFAULT_HOSTNAME=minio1:9000,minio2:9000;S3_AUTH_FILE=/var/lib/s3.keypair;\
             S3_REGIONNAME=eu-west-1;S3_RETRY_COUNT=15;S3_WAIT_TIME_SECONDS=1;S3_PROTO=HTTP;\
             S3_MPU_CHUNK=10;S3_MPU_THREADS=4;S3_ENABLE_MD5=1;S3_STORAGE_CLASS=glacier_ir;\
             ARCHIVE_NAMING_POLICY=decoupled;HOST_MODE=cacheless_detached;",
        )
        .unwrap();

        assert_eq!(config.hostnames, vec!["minio1:9000", "minio2:9000"]);
        assert_eq!(config.auth_file, Some(PathBuf::from("/var/lib/s3.keypair")));
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.retry.retry_count, 15);
        assert_eq!(config.retry.wait_time, Duration::from_secs(1));
        assert_eq!(config.protocol, Protocol::Http);
        assert_eq!(config.transfer.part_size, 10 * MIB);
        assert_eq!(config.transfer.max_threads, 4);
        assert!(config.enable_md5);
        assert_eq!(config.storage_class, StorageClass::GlacierIr);
        assert_eq!(config.naming_policy, NamingPolicy::Decoupled);
        assert_eq!(config.host_mode, HostMode::CachelessDetached);
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(ResourceConfig::from_context("r", "S3_RETRY_COUNT=many").is_err());
        assert!(ResourceConfig::from_context("r", "S3_ENABLE_MPU=maybe").is_err());
        assert!(ResourceConfig::from_context("r", "HOST_MODE=floating").is_err());
        assert!(ResourceConfig::from_context("r", "S3_STORAGE_CLASS=tape").is_err());
        assert!(ResourceConfig::from_context("r", "NOT_A_PAIR").is_err());
    }

    #[test]
    fn test_oversized_mebibyte_values_rejected() {
        for key in [
            "S3_MPU_CHUNK",
            "S3_MAX_UPLOAD_SIZE",
            "MAXIMUM_SIZE_FOR_SINGLE_BUFFER_IN_MEGABYTES",
        ] {
            let err = ResourceConfig::from_context("r", &format!("{}=99999999999999", key))
                .unwrap_err();
            assert!(matches!(err, NimbusError::Config(_)), "{}", key);
        }
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = ResourceConfig::from_context("r", "S3_SOMETHING_NEW=1;S3_RETRY_COUNT=2")
            .unwrap();
        assert_eq!(config.retry.retry_count, 2);
    }

    #[test]
    fn test_circular_buffer_minimum() {
        let config = ResourceConfig::from_context("r", "S3_CIRCULAR_BUFFER_SIZE=1").unwrap();
        assert_eq!(config.transfer.circular_buffer_parts, 2);
    }

    #[test]
    fn test_part_size_above_upload_limit_is_error() {
        let err = ResourceConfig::from_context("r", "S3_MPU_CHUNK=100;S3_MAX_UPLOAD_SIZE=50")
            .unwrap_err();
        assert!(matches!(err, NimbusError::Config(_)));
    }

    #[test]
    fn test_credentials_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "AKIAEXAMPLE").unwrap();
        writeln!(file, "secretvalue").unwrap();

        let creds = Credentials::from_file(file.path()).unwrap();
        assert_eq!(creds.access_key_id, "AKIAEXAMPLE");
        assert_eq!(creds.secret_access_key, "secretvalue");
        assert!(!format!("{:?}", creds).contains("secretvalue"));
    }

    #[test]
    fn test_credentials_file_short() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "AKIAEXAMPLE").unwrap();

        let err = Credentials::from_file(file.path()).unwrap_err();
        assert_eq!(err.code().as_str(), "SYS_CONFIG_FILE_ERR");
        assert!(err.to_string().contains("Read 1 lines in the auth file. Expected 2."));
    }

    #[test]
    fn test_environment_overrides_file() {
        let config = ResourceConfig {
            auth_file: Some(PathBuf::from("/nonexistent/keypair")),
            ..Default::default()
        };
        let creds = config
            .load_credentials_with(|name| match name {
                ACCESS_KEY_ENV => Some("env-key".to_string()),
                SECRET_KEY_ENV => Some("env-secret".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(creds.access_key_id, "env-key");

        assert!(config.load_credentials_with(|_| None).is_err());
    }

    #[test]
    fn test_file_config_toml() {
        let toml_str = r#"
            resource_name = "demo"
            context = "S3_RETRY_COUNT=1"

            [logging]
            log_level = "debug"
        "#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.resource_name.as_deref(), Some("demo"));
        assert_eq!(config.logging.log_level, LogLevel::Debug);
        assert!(!config.logging.verbose);
    }
}
