//! Consumer contract
//!
//! A [`Consumer`] drains a byte stream into one storage backend and reports
//! how many bytes it stored. Remote consumers are built by a
//! [`ConsumerFactory`]; local temp files are created by the orchestrator
//! itself because their path ends up in the upload result.

use super::select::RemoteDestination;
use super::UploadError;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Errors a consumer may raise
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// A multipart upload ran out of presigned part URLs.
    #[error("not enough parts")]
    NotEnoughParts,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload deadline exceeded")]
    DeadlineExceeded,

    #[error("upload cancelled")]
    Cancelled,

    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{operation} request returned status {status}")]
    Status { operation: &'static str, status: u16 },

    #[error("ETag mismatch: expected {expected:?}, got {actual:?}")]
    ETagMismatch { expected: String, actual: String },

    #[error("multipart upload error: {0}")]
    Multipart(String),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Storage backend capability.
///
/// Implementations read `reader` to end of data (or until the reader fails),
/// stop when `deadline` passes or `scope` is cancelled, and return the number
/// of bytes stored.
#[async_trait]
pub trait Consumer: Send {
    async fn consume(
        &mut self,
        scope: &CancellationToken,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        deadline: Instant,
    ) -> Result<i64, ConsumerError>;
}

/// Builds consumers for remote destinations.
#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    /// `size` is the declared size, [`super::opts::UNKNOWN_SIZE`] when unknown.
    async fn build(
        &self,
        scope: &CancellationToken,
        destination: &RemoteDestination,
        size: i64,
    ) -> Result<Box<dyn Consumer>, UploadError>;
}

/// Run `work` bounded by `deadline` and by cancellation of `scope`.
pub(crate) async fn bounded<F, T>(
    scope: &CancellationToken,
    deadline: Instant,
    work: F,
) -> Result<T, ConsumerError>
where
    F: std::future::Future<Output = Result<T, ConsumerError>>,
{
    tokio::select! {
        biased;
        _ = scope.cancelled() => Err(ConsumerError::Cancelled),
        result = tokio::time::timeout_at(deadline, work) => {
            result.unwrap_or(Err(ConsumerError::DeadlineExceeded))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let scope = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        let result = bounded(&scope, deadline, async { Ok(42) }).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn test_bounded_deadline() {
        let scope = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_millis(20);
        let result: Result<(), _> = bounded(&scope, deadline, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ConsumerError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_bounded_cancelled() {
        let scope = CancellationToken::new();
        scope.cancel();
        let deadline = Instant::now() + Duration::from_secs(5);
        let result: Result<(), _> = bounded(&scope, deadline, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ConsumerError::Cancelled)));
    }
}
