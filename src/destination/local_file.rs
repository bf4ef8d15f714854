//! Local temp file destination
//!
//! The temp file is created with a unique name under the configured
//! directory and stays on disk until the upload scope ends, even when the
//! upload itself succeeded: the caller still needs the file while it
//! finalizes. A detached task removes it once the scope is cancelled.

use super::consumer::{bounded, Consumer, ConsumerError};
use super::UploadError;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Temp file receiving an upload
pub struct LocalFile {
    file: tokio::fs::File,
    path: PathBuf,
}

impl LocalFile {
    /// Create `dir` if needed, then a uniquely named file in it starting
    /// with `prefix`. Removal is tied to `scope`.
    pub async fn create(
        scope: &CancellationToken,
        dir: &Path,
        prefix: &str,
    ) -> Result<Self, UploadError> {
        create_dir(dir)
            .await
            .map_err(|source| UploadError::LocalFile {
                op: "mkdir",
                path: dir.to_path_buf(),
                source,
            })?;

        let (file, path) = create_temp(dir.to_path_buf(), prefix.to_string())
            .await
            .map_err(|source| UploadError::LocalFile {
                op: "create file",
                path: dir.to_path_buf(),
                source,
            })?;

        remove_when_done(scope, path.clone());

        tracing::debug!(path = %path.display(), "Created local temp file");

        Ok(Self {
            file: tokio::fs::File::from_std(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn create_dir(dir: &Path) -> io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await
}

/// Create and persist a uniquely named file off the async workers
async fn create_temp(dir: PathBuf, prefix: String) -> io::Result<(std::fs::File, PathBuf)> {
    tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(&dir)
            .and_then(|temp| temp.keep().map_err(|e| e.error))
    })
    .await
    .map_err(io::Error::other)?
}

fn remove_when_done(scope: &CancellationToken, path: PathBuf) {
    let scope = scope.clone();
    tokio::spawn(async move {
        scope.cancelled().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed local temp file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to clean up temp file"
            ),
        }
    });
}

#[async_trait]
impl Consumer for LocalFile {
    #[tracing::instrument(
        name = "destination.local_file.consume",
        skip_all,
        fields(path = %self.path.display(), bytes_written = tracing::field::Empty),
        err
    )]
    async fn consume(
        &mut self,
        scope: &CancellationToken,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        deadline: Instant,
    ) -> Result<i64, ConsumerError> {
        let file = &mut self.file;
        let written = bounded(scope, deadline, async move {
            let n = tokio::io::copy(reader, &mut *file).await?;
            file.flush().await?;
            Ok(n as i64)
        })
        .await?;

        tracing::Span::current().record("bytes_written", written);
        Ok(written)
    }
}
