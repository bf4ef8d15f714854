//! Object storage consumers
//!
//! Every remote destination is served by an [`Uploader`] driving an
//! [`UploadStrategy`]. The uploader owns the shared lifecycle (deadline,
//! cancellation, abort on failure, delete when the scope ends) while the
//! strategy only knows how to move bytes to one kind of backend.
//!
//! | Destination | Strategy |
//! |-------------|----------|
//! | [`RemoteDestination::Http`] | [`Object`] (presigned PUT) |
//! | [`RemoteDestination::Multipart`] | [`Multipart`] (presigned parts) |
//! | [`RemoteDestination::S3`] | [`S3Object`] (AWS SDK) |
//! | [`RemoteDestination::GoCloud`] | [`GoCloudObject`] (`object_store`) |

mod go_cloud;
mod multipart;
mod object;
mod s3_object;

pub use go_cloud::GoCloudObject;
pub use multipart::Multipart;
pub use object::Object;
pub use s3_object::S3Object;

use super::consumer::{bounded, Consumer, ConsumerError, ConsumerFactory};
use super::select::RemoteDestination;
use super::UploadError;
use crate::metrics;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Read buffer for streaming bodies
pub(crate) const BUFFER_SIZE: usize = 64 * 1024;

/// One way of moving bytes to a remote backend
#[async_trait]
pub trait UploadStrategy: Send {
    /// Upload everything `reader` yields; returns the number of bytes stored.
    async fn upload(
        &mut self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<i64, ConsumerError>;

    /// Undo a failed upload. Best effort.
    ///
    /// The returned future owns everything it needs, so the uploader can
    /// leave it running in the background once the deadline has passed.
    fn abort(&mut self) -> Option<BoxFuture<'static, ()>>;

    /// Deletion of the stored object, run once the upload scope ends.
    fn delete(&self) -> Option<BoxFuture<'static, ()>>;

    /// Label used in spans and metrics
    fn name(&self) -> &'static str;
}

/// [`Consumer`] around an [`UploadStrategy`]
pub struct Uploader<S> {
    strategy: S,
}

impl<S: UploadStrategy> Uploader<S> {
    pub fn new(strategy: S) -> Self {
        Self { strategy }
    }
}

#[async_trait]
impl<S: UploadStrategy> Consumer for Uploader<S> {
    #[tracing::instrument(
        name = "destination.objectstore.consume",
        skip_all,
        fields(strategy = self.strategy.name(), bytes_written = tracing::field::Empty),
        err
    )]
    async fn consume(
        &mut self,
        scope: &CancellationToken,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        deadline: Instant,
    ) -> Result<i64, ConsumerError> {
        if let Some(delete) = self.strategy.delete() {
            let scope = scope.clone();
            tokio::spawn(async move {
                scope.cancelled().await;
                delete.await;
            });
        }

        let name = self.strategy.name();
        let result = bounded(scope, deadline, self.strategy.upload(reader)).await;

        match result {
            Ok(written) => {
                metrics::record_object_storage_bytes(written.max(0) as u64);
                tracing::Span::current().record("bytes_written", written);
                Ok(written)
            }
            Err(e) => {
                metrics::record_error(name);
                if let Some(abort) = self.strategy.abort() {
                    // Never wait for the abort past the deadline or the scope
                    let abort = tokio::spawn(abort);
                    tokio::select! {
                        biased;
                        _ = abort => {}
                        _ = scope.cancelled() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                Err(e)
            }
        }
    }
}

/// Builds the real object storage consumers
#[derive(Clone)]
pub struct ObjectStoreConsumers {
    client: reqwest::Client,
}

impl ObjectStoreConsumers {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Use `client` for presigned URL requests
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ObjectStoreConsumers {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsumerFactory for ObjectStoreConsumers {
    async fn build(
        &self,
        _scope: &CancellationToken,
        destination: &RemoteDestination,
        size: i64,
    ) -> Result<Box<dyn Consumer>, UploadError> {
        let consumer: Box<dyn Consumer> = match destination {
            RemoteDestination::Http {
                put_url,
                delete_url,
                put_headers,
            } => {
                if put_url.is_empty() {
                    return Err(UploadError::Setup("missing presigned PUT URL".into()));
                }
                Box::new(Uploader::new(Object::new(
                    self.client.clone(),
                    put_url,
                    delete_url,
                    put_headers.clone(),
                    size,
                )))
            }
            RemoteDestination::Multipart {
                part_urls,
                complete_url,
                abort_url,
                delete_url,
                put_headers,
                part_size,
            } => {
                if complete_url.is_empty() {
                    return Err(UploadError::Setup(
                        "missing multipart completion URL".into(),
                    ));
                }
                Box::new(Uploader::new(Multipart {
                    client: self.client.clone(),
                    part_urls: part_urls.clone(),
                    complete_url: complete_url.clone(),
                    abort_url: abort_url.clone(),
                    delete_url: delete_url.clone(),
                    put_headers: put_headers.clone(),
                    part_size: *part_size,
                }))
            }
            RemoteDestination::S3 {
                object_name,
                credentials,
                config,
            } => {
                let object = S3Object::new(credentials, config, object_name).await;
                Box::new(Uploader::new(object))
            }
            RemoteDestination::GoCloud {
                bucket_url,
                object_name,
                ..
            } => {
                let object = GoCloudObject::open(bucket_url, object_name)
                    .map_err(|e| UploadError::Setup(e.to_string()))?;
                Box::new(Uploader::new(object))
            }
        };

        Ok(consumer)
    }
}

/// Read up to `limit` bytes; fewer only at end of stream.
pub(crate) async fn read_chunk(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    limit: u64,
) -> std::io::Result<Vec<u8>> {
    let mut chunk = Vec::new();
    (&mut *reader).take(limit).read_to_end(&mut chunk).await?;
    Ok(chunk)
}

/// ETag header value without surrounding quotes
pub(crate) fn extract_etag(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string())
        .unwrap_or_default()
}

pub(crate) fn is_md5_hex(etag: &str) -> bool {
    etag.len() == 32 && etag.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Servers may return non-MD5 ETags (SSE-KMS, multipart); only plain
/// digests are compared.
pub(crate) fn compare_md5(expected: &str, etag: &str) -> Result<(), ConsumerError> {
    if is_md5_hex(etag) && !etag.eq_ignore_ascii_case(expected) {
        return Err(ConsumerError::ETagMismatch {
            expected: expected.to_string(),
            actual: etag.to_string(),
        });
    }
    Ok(())
}

/// Fail on anything but 200, recording the request outcome.
pub(crate) fn check_status(
    operation: &'static str,
    response: &reqwest::Response,
) -> Result<(), ConsumerError> {
    let status = response.status();
    metrics::record_object_storage_request(operation, status.is_success());
    if status != reqwest::StatusCode::OK {
        return Err(ConsumerError::Status {
            operation,
            status: status.as_u16(),
        });
    }
    Ok(())
}

/// Best-effort DELETE of a presigned URL
pub(crate) fn delete_url(
    client: &reqwest::Client,
    operation: &'static str,
    url: &str,
) -> Option<BoxFuture<'static, ()>> {
    if url.is_empty() {
        return None;
    }
    let request = client.delete(url);
    let url = url.to_string();
    Some(Box::pin(async move {
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                metrics::record_object_storage_request(operation, status.is_success());
                tracing::debug!(%url, status = status.as_u16(), "{} request finished", operation);
            }
            Err(e) => {
                metrics::record_object_storage_request(operation, false);
                tracing::warn!(%url, error = %e, "{} request failed", operation);
            }
        }
    }))
}
