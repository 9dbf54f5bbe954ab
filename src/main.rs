/*!
 * Nimbus CLI
 *
 * Drives the transfer engine against a directory-backed object store or,
 * with the `s3-native` feature, a real S3 endpoint.
 */

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use nimbus::{
    config::{FileConfig, LogLevel, LoggingConfig, ResourceConfig},
    core::{
        engine::TransferOutcome,
        glacier::StagingTracker,
        naming::parse_s3_path,
        planner::TransferPlan,
        retry::SystemClock,
    },
    error::{NimbusError, EXIT_FATAL, EXIT_SUCCESS},
    logging,
    store::{FsObjectStore, ObjectKey, ObjectStore, RestoreRequest},
    TransferEngine,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "nimbus")]
#[command(version, about = "Parallel chunked transfers to S3-compatible storage", long_about = None)]
struct Cli {
    /// Directory used as the object store (one subdirectory per bucket)
    #[arg(long, value_name = "DIR", default_value = "nimbus-store", global = true)]
    store_dir: PathBuf,

    /// Talk to the S3 endpoint named in the context instead of --store-dir
    #[arg(long, global = true)]
    s3: bool,

    /// Resource context, e.g. "S3_MPU_THREADS=8;S3_STORAGE_CLASS=STANDARD"
    #[arg(long, value_name = "CONTEXT", global = true)]
    context: Option<String>,

    /// TOML settings file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Path to log file (default: stdout)
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Enable verbose logging (equivalent to --log-level=debug)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Hide the progress bar
    #[arg(long, global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the transfer plan for an object of SIZE bytes
    Plan {
        size: u64,
        /// Plan a download instead of an upload
        #[arg(long)]
        download: bool,
    },
    /// Upload a local file
    Put { file: PathBuf, path: String },
    /// Download an object
    Get { path: String, file: PathBuf },
    /// Show object metadata
    Stat { path: String },
    /// Delete an object
    Rm { path: String },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<NimbusError>()
                .map(NimbusError::exit_code)
                .unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };

    let log_config = LoggingConfig {
        log_level: cli
            .log_level
            .map(LogLevel::from)
            .unwrap_or(file_config.logging.log_level),
        log_file: cli.log_file.clone().or(file_config.logging.log_file.clone()),
        verbose: cli.verbose || file_config.logging.verbose,
    };
    if let Err(e) = logging::init_logging(&log_config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let resource_name = file_config
        .resource_name
        .clone()
        .unwrap_or_else(|| "nimbus".to_string());
    let context = cli
        .context
        .clone()
        .or(file_config.context.clone())
        .unwrap_or_default();
    let config = ResourceConfig::from_context(&resource_name, &context)
        .context("invalid resource context")?;

    if let Commands::Plan { size, download } = cli.command {
        let engine_plan = if download {
            nimbus::core::planner::plan_download(size, &config.transfer)?
        } else {
            nimbus::plan(size, &config.transfer)?
        };
        println!("{}", serde_json::to_string_pretty(&engine_plan)?);
        return Ok(());
    }

    let store = open_store(&cli, &config)?;
    let mut engine = TransferEngine::new(store, &config);
    let bar = if cli.no_progress {
        None
    } else {
        let bar = progress_bar();
        let handle = bar.clone();
        engine = engine.with_progress(Arc::new(move |bytes| handle.inc(bytes)));
        Some(bar)
    };

    match cli.command {
        Commands::Plan { .. } => Ok(()),
        Commands::Put { file, path } => {
            let key = parse_s3_path(&path)?;
            let size = std::fs::metadata(&file)
                .with_context(|| format!("cannot stat {}", file.display()))?
                .len();
            if let Some(bar) = &bar {
                bar.set_length(size);
            }
            let outcome = engine.upload_file(&file, &key)?;
            finish(bar);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Commands::Get { path, file } => {
            let key = parse_s3_path(&path)?;
            let staging = StagingTracker::new(
                RestoreRequest {
                    days: config.restoration_days,
                    tier: config.restoration_tier,
                },
                Arc::new(SystemClock),
            );
            let head = engine.head(&key)?;
            let head = staging.ensure_readable(engine.store().as_ref(), &key, head)?;
            if let Some(bar) = &bar {
                bar.set_length(head.size);
            }
            let plan = engine.plan_download(head.size)?;
            let outcome = download_to(&engine, &plan, &key, &file)?;
            finish(bar);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Commands::Stat { path } => {
            let key = parse_s3_path(&path)?;
            let head = engine
                .head(&key)?
                .ok_or_else(|| NimbusError::ObjectNotFound {
                    key: key.to_string(),
                })?;
            let restore = head.restore.map(|status| format!("{:?}", status).to_lowercase());
            let stat = serde_json::json!({
                "key": key.to_string(),
                "size": head.size,
                "etag": head.etag,
                "storage_class": head.storage_class.as_str(),
                "restore": restore,
            });
            println!("{}", serde_json::to_string_pretty(&stat)?);
            Ok(())
        }
        Commands::Rm { path } => {
            let key = parse_s3_path(&path)?;
            engine.delete(&key)?;
            println!("Removed {}", key);
            Ok(())
        }
    }
}

/// Download into a temporary file beside `destination`, renamed into
/// place once complete
fn download_to(
    engine: &TransferEngine,
    plan: &TransferPlan,
    key: &ObjectKey,
    destination: &Path,
) -> nimbus::Result<TransferOutcome> {
    let directory = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let partial = tempfile::Builder::new()
        .prefix(".nimbus-get-")
        .tempfile_in(directory)?
        .into_temp_path();
    let outcome = engine.download(plan, key, &partial)?;
    partial
        .persist(destination)
        .map_err(|e| NimbusError::Io(e.error))?;
    Ok(outcome)
}

fn open_store(cli: &Cli, config: &ResourceConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    if cli.s3 {
        return open_s3_store(config);
    }
    let store = FsObjectStore::new(&cli.store_dir)
        .with_context(|| format!("cannot open store at {}", cli.store_dir.display()))?;
    Ok(Arc::new(store))
}

#[cfg(feature = "s3-native")]
fn open_s3_store(config: &ResourceConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let credentials = config.load_credentials()?;
    let store = nimbus::store::S3ObjectStore::connect(config, &credentials)
        .context("cannot connect to S3")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "s3-native"))]
fn open_s3_store(_config: &ResourceConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    Err(NimbusError::NotSupported(
        "--s3 requires a build with the s3-native feature".to_string(),
    )
    .into())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

fn finish(bar: Option<ProgressBar>) {
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus::store::{MemoryObjectStore, StoreError, StoreOp};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn engine_with_object(dir: &Path, bytes: &[u8]) -> (Arc<MemoryObjectStore>, TransferEngine) {
        let store = Arc::new(MemoryObjectStore::new());
        let config = ResourceConfig {
            cache_directory: dir.to_path_buf(),
            ..Default::default()
        };
        let engine = TransferEngine::new(store.clone(), &config);
        let key = ObjectKey::new("bucket", "data.bin");
        let plan = engine.plan_upload(bytes.len() as u64).unwrap();
        engine
            .upload(&plan, &mut Cursor::new(bytes.to_vec()), &key)
            .unwrap();
        (store, engine)
    }

    #[test]
    fn test_failed_download_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let (store, engine) = engine_with_object(dir.path(), b"downloaded bytes");
        let key = ObjectKey::new("bucket", "data.bin");
        let destination = dir.path().join("copy.bin");
        let plan = engine.plan_download(16).unwrap();

        store.inject_fault(
            StoreOp::Get,
            StoreError::AccessDenied("read denied".to_string()),
            1,
        );
        let err = download_to(&engine, &plan, &key, &destination).unwrap_err();
        assert_eq!(err.code().as_str(), "S3_GET_ERROR");
        assert!(!destination.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        download_to(&engine, &plan, &key, &destination).unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"downloaded bytes");
    }
}
