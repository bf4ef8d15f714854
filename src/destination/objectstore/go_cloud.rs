//! Generic bucket upload through `object_store`
//!
//! The bucket is addressed by URL (`az://container`, `gs://bucket`,
//! `s3://bucket`, `file:///path`). Credentials come from the
//! usual provider environment variables.

use super::{UploadStrategy, BUFFER_SIZE};
use crate::destination::consumer::ConsumerError;
use crate::metrics;
use async_trait::async_trait;
use futures::future::BoxFuture;
use object_store::path::Path;
use object_store::{ObjectStore, WriteMultipart};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

/// Parts in flight while streaming
const MAX_CONCURRENCY: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("invalid bucket URL {url:?}: {source}")]
    Url {
        url: String,
        source: url::ParseError,
    },

    #[error(transparent)]
    Store(#[from] object_store::Error),
}

pub struct GoCloudObject {
    store: Arc<dyn ObjectStore>,
    path: Path,
    /// Multipart upload in progress, if any
    writer: Option<WriteMultipart>,
}

/// `azblob://` is the historical scheme for Azure containers
fn normalize_bucket_url(bucket_url: &str) -> String {
    match bucket_url.strip_prefix("azblob://") {
        Some(rest) => format!("az://{}", rest),
        None => bucket_url.to_string(),
    }
}

impl GoCloudObject {
    /// Open `object_name` inside the bucket at `bucket_url`
    pub fn open(bucket_url: &str, object_name: &str) -> Result<Self, OpenError> {
        let normalized = normalize_bucket_url(bucket_url);
        let url = Url::parse(&normalized).map_err(|source| OpenError::Url {
            url: bucket_url.to_string(),
            source,
        })?;

        let options = std::env::vars().map(|(key, value)| (key.to_ascii_lowercase(), value));
        let (store, prefix) = object_store::parse_url_opts(&url, options)?;

        Ok(Self::with_store(Arc::from(store), &prefix, object_name))
    }

    /// Upload into an existing store
    pub fn with_store(store: Arc<dyn ObjectStore>, prefix: &Path, object_name: &str) -> Self {
        let path = Path::from_iter(prefix.parts().chain(Path::from(object_name).parts()));
        Self {
            store,
            path,
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn stream_into(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    writer: &mut WriteMultipart,
) -> Result<i64, ConsumerError> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut written: i64 = 0;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(written);
        }
        writer.wait_for_capacity(MAX_CONCURRENCY).await?;
        writer.write(&buf[..n]);
        written += n as i64;
    }
}

#[async_trait]
impl UploadStrategy for GoCloudObject {
    #[tracing::instrument(
        name = "destination.go_cloud.upload",
        skip_all,
        fields(path = %self.path),
        err
    )]
    async fn upload(
        &mut self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<i64, ConsumerError> {
        let upload = self.store.put_multipart(&self.path).await;
        metrics::record_object_storage_request("create_multipart_upload", upload.is_ok());
        let writer = self.writer.insert(WriteMultipart::new(upload?));

        let written = stream_into(reader, writer).await?;

        let Some(writer) = self.writer.take() else {
            return Err(ConsumerError::Multipart("upload already finished".into()));
        };
        let finished = writer.finish().await;
        metrics::record_object_storage_request("complete_multipart_upload", finished.is_ok());
        finished?;
        Ok(written)
    }

    fn abort(&mut self) -> Option<BoxFuture<'static, ()>> {
        let Some(writer) = self.writer.take() else {
            return self.delete();
        };
        let path = self.path.clone();
        Some(Box::pin(async move {
            let result = writer.abort().await;
            metrics::record_object_storage_request("abort_multipart_upload", result.is_ok());
            if let Err(e) = result {
                tracing::warn!(%path, error = %e, "Failed to abort upload");
            }
        }))
    }

    fn delete(&self) -> Option<BoxFuture<'static, ()>> {
        let store = Arc::clone(&self.store);
        let path = self.path.clone();
        Some(Box::pin(async move {
            match store.delete(&path).await {
                Ok(()) => metrics::record_object_storage_request("delete_object", true),
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => {
                    metrics::record_object_storage_request("delete_object", false);
                    tracing::warn!(%path, error = %e, "Failed to delete object");
                }
            }
        }))
    }

    fn name(&self) -> &'static str {
        "go_cloud"
    }
}
