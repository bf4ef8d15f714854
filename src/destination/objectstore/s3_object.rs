//! Direct S3 upload with the AWS SDK
//!
//! Used when this process holds the bucket credentials itself instead of
//! relying on presigned URLs.

use super::{read_chunk, UploadStrategy};
use crate::destination::consumer::ConsumerError;
use crate::destination::opts::{S3Config, S3Credentials};
use crate::metrics;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ServerSideEncryption};
use futures::future::BoxFuture;
use tokio::io::AsyncRead;

/// Smallest part S3 accepts (except for the last one)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

pub struct S3Object {
    client: aws_sdk_s3::Client,
    bucket: String,
    object_name: String,
    server_side_encryption: Option<String>,
    sse_kms_key_id: Option<String>,
    upload_id: Option<String>,
}

fn s3_error<E>(err: E) -> ConsumerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ConsumerError::S3(DisplayErrorContext(err).to_string())
}

/// SSE mode and, for `aws:kms` only, the KMS key
fn encryption(
    server_side_encryption: Option<&str>,
    sse_kms_key_id: Option<&str>,
) -> (Option<ServerSideEncryption>, Option<String>) {
    let sse = server_side_encryption
        .filter(|s| !s.is_empty())
        .map(ServerSideEncryption::from);
    let kms_key = match sse {
        Some(ServerSideEncryption::AwsKms) => sse_kms_key_id
            .filter(|k| !k.is_empty())
            .map(str::to_string),
        _ => None,
    };
    (sse, kms_key)
}

impl S3Object {
    pub async fn new(credentials: &S3Credentials, config: &S3Config, object_name: &str) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        // Without one the SDK falls back to the provider chain
        if !config.region.is_empty() {
            loader = loader.region(Region::new(config.region.clone()));
        }
        if !config.use_iam_profile {
            loader = loader.credentials_provider(Credentials::new(
                credentials.aws_access_key_id.clone(),
                credentials.aws_secret_access_key.clone(),
                None,
                None,
                "upload-destination",
            ));
        }
        let sdk_config = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.path_style);
        if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint);
        }

        Self::with_client(
            aws_sdk_s3::Client::from_conf(builder.build()),
            config,
            object_name,
        )
    }

    /// Use an already configured client
    pub fn with_client(client: aws_sdk_s3::Client, config: &S3Config, object_name: &str) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            object_name: object_name.to_string(),
            server_side_encryption: config.server_side_encryption.clone(),
            sse_kms_key_id: config.sse_kms_key_id.clone(),
            upload_id: None,
        }
    }

    fn encryption(&self) -> (Option<ServerSideEncryption>, Option<String>) {
        encryption(
            self.server_side_encryption.as_deref(),
            self.sse_kms_key_id.as_deref(),
        )
    }

    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, body),
        fields(s3.bucket = %self.bucket, s3.key = %self.object_name, upload.bytes = body.len()),
        err
    )]
    async fn put_object(&self, body: Vec<u8>) -> Result<(), ConsumerError> {
        let (sse, kms_key) = self.encryption();
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.object_name)
            .set_server_side_encryption(sse)
            .set_ssekms_key_id(kms_key)
            .body(ByteStream::from(body))
            .send()
            .await;
        metrics::record_object_storage_request("put_object", result.is_ok());
        result.map_err(s3_error)?;
        Ok(())
    }

    #[tracing::instrument(
        name = "s3.multipart_upload",
        skip_all,
        fields(s3.bucket = %self.bucket, s3.key = %self.object_name, s3.upload_id = tracing::field::Empty),
        err
    )]
    async fn multipart_upload(
        &mut self,
        first: Vec<u8>,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<i64, ConsumerError> {
        let (sse, kms_key) = self.encryption();
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.object_name)
            .set_server_side_encryption(sse)
            .set_ssekms_key_id(kms_key)
            .send()
            .await;
        metrics::record_object_storage_request("create_multipart_upload", created.is_ok());
        let upload_id = created
            .map_err(s3_error)?
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| ConsumerError::S3("no upload id in response".into()))?;
        tracing::Span::current().record("s3.upload_id", upload_id.as_str());
        self.upload_id = Some(upload_id.clone());

        let mut parts = Vec::new();
        let mut written: i64 = 0;
        let mut chunk = first;
        while !chunk.is_empty() {
            written += chunk.len() as i64;
            let part_number = parts.len() as i32 + 1;

            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(&self.object_name)
                .upload_id(&upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await;
            metrics::record_object_storage_request("upload_part", uploaded.is_ok());
            let uploaded = uploaded.map_err(s3_error)?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            chunk = read_chunk(reader, MIN_PART_SIZE).await?;
        }

        let count = parts.len();
        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.object_name)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await;
        metrics::record_object_storage_request("complete_multipart_upload", completed.is_ok());
        completed.map_err(s3_error)?;

        self.upload_id = None;
        metrics::record_multipart_parts(count);
        Ok(written)
    }
}

#[async_trait]
impl UploadStrategy for S3Object {
    async fn upload(
        &mut self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<i64, ConsumerError> {
        let first = read_chunk(reader, MIN_PART_SIZE).await?;
        if (first.len() as u64) < MIN_PART_SIZE {
            let written = first.len() as i64;
            self.put_object(first).await?;
            return Ok(written);
        }
        self.multipart_upload(first, reader).await
    }

    fn abort(&mut self) -> Option<BoxFuture<'static, ()>> {
        let upload_id = self.upload_id.take()?;
        let request = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.object_name)
            .upload_id(&upload_id);
        Some(Box::pin(async move {
            let result = request.send().await;
            metrics::record_object_storage_request("abort_multipart_upload", result.is_ok());
            if let Err(e) = result {
                tracing::warn!(
                    upload_id = %upload_id,
                    error = %DisplayErrorContext(&e),
                    "Failed to abort multipart upload"
                );
            }
        }))
    }

    fn delete(&self) -> Option<BoxFuture<'static, ()>> {
        let request = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&self.object_name);
        let key = self.object_name.clone();
        Some(Box::pin(async move {
            let result = request.send().await;
            metrics::record_object_storage_request("delete_object", result.is_ok());
            if let Err(e) = result {
                tracing::warn!(key = %key, error = %DisplayErrorContext(&e), "Failed to delete object");
            }
        }))
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
