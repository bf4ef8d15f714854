//! Upload destination
//!
//! Persists one inbound stream into exactly one storage backend while
//! hashing it and enforcing the maximum size. The pipeline is
//!
//! ```text
//! reader -> HashingReader -> HardLimitReader (when a maximum is set) -> Consumer
//! ```
//!
//! # Example
//!
//! ```no_run
//! use upload_destination::destination::{self, UploadOpts};
//! use tokio::time::{Duration, Instant};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let scope = CancellationToken::new();
//! let opts = UploadOpts::local("/tmp/uploads", "avatar", Instant::now() + Duration::from_secs(60));
//!
//! let body = &b"Hello, World!"[..];
//! let fh = destination::upload(&scope, body, 13, &opts).await?;
//! println!("stored {} bytes at {:?}", fh.size, fh.local_path);
//!
//! // The temp file is removed once the scope ends
//! scope.cancel();
//! # Ok(())
//! # }
//! ```

use crate::metrics;
use lazy_static::lazy_static;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

pub mod consumer;
pub mod finalize;
pub mod limit;
pub mod local_file;
pub mod multi_hash;
pub mod objectstore;
pub mod opts;
pub mod preparer;
pub mod select;

pub use consumer::{Consumer, ConsumerError, ConsumerFactory};
pub use finalize::{FinalizeError, UploadClaims, UPLOAD_TOKEN_FIELD};
pub use objectstore::ObjectStoreConsumers;
pub use opts::{UploadOpts, UNKNOWN_SIZE};
pub use select::{select, Destination, RemoteDestination};

use limit::HardLimitReader;
use local_file::LocalFile;
use multi_hash::HashingReader;

/// Size policy violations
#[derive(Error, Debug, PartialEq)]
pub enum SizeError {
    #[error("the upload size {size} is over maximum of {maximum} bytes")]
    OverMaximum { size: i64, maximum: i64 },

    #[error("expected {expected} bytes but got only {actual}")]
    Mismatch { expected: i64, actual: i64 },
}

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    /// Content exceeded the maximum size, or a multipart upload ran out of parts.
    #[error("entity is too large")]
    EntityTooLarge,

    #[error(transparent)]
    Size(#[from] SizeError),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error("local file: {op} {path:?}: {source}")]
    LocalFile {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("destination setup failed: {0}")]
    Setup(String),
}

impl UploadError {
    pub fn is_size_error(&self) -> bool {
        matches!(self, UploadError::Size(_))
    }

    fn metric_label(&self) -> &'static str {
        match self {
            UploadError::EntityTooLarge => "entity_too_large",
            UploadError::Size(_) => "size_mismatch",
            UploadError::Consumer(_) => "backend",
            UploadError::LocalFile { .. } | UploadError::Setup(_) => "setup",
        }
    }
}

fn classify(err: ConsumerError) -> UploadError {
    match err {
        ConsumerError::NotEnoughParts => UploadError::EntityTooLarge,
        other => UploadError::Consumer(other),
    }
}

/// A stored upload
///
/// Either saved on local disk (`local_path`) or uploaded to object storage
/// (`remote_id`/`remote_url`).
#[derive(Debug, Clone, Default)]
pub struct FileHandler {
    /// Where the file was stored on disk
    pub local_path: Option<PathBuf>,
    /// Object id provided by the upstream application
    pub remote_id: String,
    /// Object URL provided by the upstream application
    pub remote_url: String,
    /// Persisted size in bytes
    pub size: i64,
    /// Resource name reported back; differs from the temp file name
    pub name: String,
    hashes: BTreeMap<String, String>,
    upload_duration: Duration,
}

impl FileHandler {
    pub fn sha256(&self) -> Option<&str> {
        self.hashes.get("sha256").map(String::as_str)
    }

    pub fn md5(&self) -> Option<&str> {
        self.hashes.get("md5").map(String::as_str)
    }

    /// Hex digests keyed by algorithm name
    pub fn hashes(&self) -> &BTreeMap<String, String> {
        &self.hashes
    }

    pub fn upload_duration(&self) -> Duration {
        self.upload_duration
    }
}

lazy_static! {
    static ref DEFAULT_CONSUMERS: ObjectStoreConsumers = ObjectStoreConsumers::new();
}

/// Persist `reader` to the destination described by `opts`.
///
/// `size` is the declared size or [`UNKNOWN_SIZE`]. Cleanup of local temp
/// files and remote temporary objects happens when `scope` is cancelled, so
/// keep it alive until the upload has been finalized.
pub async fn upload<R>(
    scope: &CancellationToken,
    reader: R,
    size: i64,
    opts: &UploadOpts,
) -> Result<FileHandler, UploadError>
where
    R: AsyncRead + Send + Unpin,
{
    upload_with(&*DEFAULT_CONSUMERS, scope, reader, size, opts).await
}

/// Like [`upload`], building remote consumers with `factory`.
#[tracing::instrument(
    name = "destination.upload",
    skip_all,
    fields(
        remote_id = %opts.remote_id,
        upload.declared_size = size,
        client_mode = tracing::field::Empty
    )
)]
pub async fn upload_with<R>(
    factory: &dyn ConsumerFactory,
    scope: &CancellationToken,
    reader: R,
    size: i64,
    opts: &UploadOpts,
) -> Result<FileHandler, UploadError>
where
    R: AsyncRead + Send + Unpin,
{
    let start_time = Instant::now();
    let destination = select(opts);
    let client_mode = destination.client_mode();
    tracing::Span::current().record("client_mode", client_mode.as_str());

    let result = store(factory, scope, reader, size, opts, &destination).await;

    let duration = start_time.elapsed();
    metrics::record_upload_duration(&client_mode, duration.as_secs_f64());

    match result {
        Ok(mut fh) => {
            fh.upload_duration = duration;
            metrics::record_upload_success(&client_mode, fh.size.max(0) as u64);
            log_saved_file(&fh, opts, &client_mode);
            Ok(fh)
        }
        Err(e) => {
            metrics::record_upload_failure(&client_mode, e.metric_label());
            Err(e)
        }
    }
}

async fn store<R>(
    factory: &dyn ConsumerFactory,
    scope: &CancellationToken,
    reader: R,
    size: i64,
    opts: &UploadOpts,
    destination: &Destination,
) -> Result<FileHandler, UploadError>
where
    R: AsyncRead + Send + Unpin,
{
    let mut fh = FileHandler {
        name: opts.temp_file_prefix.clone(),
        remote_id: opts.remote_id.clone(),
        remote_url: opts.remote_url.clone(),
        ..Default::default()
    };
    let mut reader = HashingReader::new(reader);

    let mut consumer: Box<dyn Consumer> = match destination {
        Destination::Local { temp_path, prefix } => {
            let local = LocalFile::create(scope, temp_path, prefix).await?;
            fh.local_path = Some(local.path().to_path_buf());
            Box::new(local)
        }
        Destination::Remote(remote) => factory.build(scope, remote, size).await?,
    };

    fh.size = if opts.maximum_size > 0 {
        if size > opts.maximum_size {
            return Err(SizeError::OverMaximum {
                size,
                maximum: opts.maximum_size,
            }
            .into());
        }

        let mut limited = HardLimitReader::new(&mut reader, opts.maximum_size);
        let consumed = consumer.consume(scope, &mut limited, opts.deadline).await;
        match consumed {
            Err(_) if limited.overflowed() => return Err(UploadError::EntityTooLarge),
            other => other.map_err(classify)?,
        }
    } else {
        consumer
            .consume(scope, &mut reader, opts.deadline)
            .await
            .map_err(classify)?
    };

    if size >= 0 && size != fh.size {
        return Err(SizeError::Mismatch {
            expected: size,
            actual: fh.size,
        }
        .into());
    }

    fh.hashes = reader.finish();
    Ok(fh)
}

fn log_saved_file(fh: &FileHandler, opts: &UploadOpts, client_mode: &str) {
    if let Some(path) = &fh.local_path {
        tracing::info!(
            copied_bytes = fh.size,
            is_local = true,
            is_multipart = opts.is_multipart(),
            is_remote = false,
            remote_id = %opts.remote_id,
            temp_file_prefix = %opts.temp_file_prefix,
            client_mode = %client_mode,
            local_temp_path = %path.display(),
            "saved file"
        );
    } else {
        tracing::info!(
            copied_bytes = fh.size,
            is_local = false,
            is_multipart = opts.is_multipart(),
            is_remote = true,
            remote_id = %opts.remote_id,
            temp_file_prefix = %opts.temp_file_prefix,
            client_mode = %client_mode,
            remote_temp_object = %opts.remote_temp_object_id,
            "saved file"
        );
    }
}
