//! Upload preparation
//!
//! The upstream application pre-authorizes each upload and answers with a
//! JSON document describing where the file should go. [`UploadPreparer`]
//! combines that answer with this process's own object storage credentials
//! into [`UploadOpts`].

use super::opts::{GoCloudConfig, ObjectStorageConfig, S3Config, S3Credentials, UploadOpts};
use crate::config::ObjectStorageCredentials;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Used when the authorization response carries no timeout
pub const DEFAULT_OBJECT_STORE_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

#[derive(Error, Debug, PartialEq)]
pub enum PrepareError {
    #[error("authorization response has both TempPath and RemoteObject")]
    BothDestinations,

    #[error("authorization response has neither TempPath nor RemoteObject")]
    NoDestination,
}

/// Pre-authorization answer from the upstream application
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthorizeResponse {
    #[serde(default)]
    pub temp_path: String,
    #[serde(default)]
    pub remote_object: RemoteObject,
    #[serde(default)]
    pub maximum_size: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteObject {
    #[serde(default, rename = "GetURL")]
    pub get_url: String,
    #[serde(default, rename = "DeleteURL")]
    pub delete_url: String,
    #[serde(default, rename = "StoreURL")]
    pub store_url: String,
    #[serde(default)]
    pub custom_put_headers: bool,
    #[serde(default)]
    pub put_headers: HashMap<String, String>,
    #[serde(default)]
    pub use_workhorse_client: bool,
    #[serde(default, rename = "RemoteTempObjectID")]
    pub remote_temp_object_id: String,
    #[serde(default, rename = "ID")]
    pub id: String,
    /// Seconds; 0 means the default
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub multipart_upload: Option<MultipartUploadParams>,
    #[serde(default)]
    pub object_storage: Option<ObjectStorageParams>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MultipartUploadParams {
    pub part_size: i64,
    #[serde(default, rename = "PartURLs")]
    pub part_urls: Vec<String>,
    #[serde(default, rename = "CompleteURL")]
    pub complete_url: String,
    #[serde(default, rename = "AbortURL")]
    pub abort_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectStorageParams {
    #[serde(default)]
    pub provider: String,
    #[serde(default, rename = "S3Config")]
    pub s3_config: S3Config,
    #[serde(default)]
    pub go_cloud_config: GoCloudConfig,
}

/// Builds [`UploadOpts`] from authorization responses
#[derive(Debug, Clone)]
pub struct UploadPreparer {
    credentials: Option<ObjectStorageCredentials>,
    default_timeout: Duration,
}

impl UploadPreparer {
    pub fn new(credentials: Option<ObjectStorageCredentials>) -> Self {
        Self {
            credentials,
            default_timeout: DEFAULT_OBJECT_STORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Options for one upload; `prefix` names the temp file and the upload.
    pub fn prepare(
        &self,
        response: &AuthorizeResponse,
        prefix: &str,
    ) -> Result<UploadOpts, PrepareError> {
        let remote = &response.remote_object;
        let timeout = match remote.timeout {
            0 => self.default_timeout,
            secs => Duration::from_secs(secs),
        };

        let has_local = !response.temp_path.is_empty();
        let has_remote = !remote.id.is_empty();
        match (has_local, has_remote) {
            (true, true) => return Err(PrepareError::BothDestinations),
            (false, false) => return Err(PrepareError::NoDestination),
            _ => {}
        }

        let mut opts = UploadOpts::remote(Instant::now() + timeout);
        opts.temp_file_prefix = prefix.to_string();
        opts.local_temp_path = has_local.then(|| PathBuf::from(&response.temp_path));
        opts.remote_id = remote.id.clone();
        opts.remote_url = remote.get_url.clone();
        opts.presigned_put = remote.store_url.clone();
        opts.presigned_delete = remote.delete_url.clone();
        opts.put_headers = remote.put_headers.clone();
        opts.use_workhorse_client = remote.use_workhorse_client;
        opts.remote_temp_object_id = remote.remote_temp_object_id.clone();
        opts.maximum_size = response.maximum_size;

        if let (true, Some(storage)) = (opts.use_workhorse_client, &remote.object_storage) {
            opts.object_storage_config = ObjectStorageConfig {
                provider: storage.provider.clone(),
                s3_credentials: self.s3_credentials(),
                s3_config: storage.s3_config.clone(),
                go_cloud_config: storage.go_cloud_config.clone(),
            };
        }

        // Older upstreams do not send CustomPutHeaders and expect the default content type
        if !remote.custom_put_headers {
            opts.put_headers = HashMap::from([(
                "Content-Type".to_string(),
                "application/octet-stream".to_string(),
            )]);
        }

        if let Some(multipart) = &remote.multipart_upload {
            opts.part_size = multipart.part_size;
            opts.presigned_parts = multipart.part_urls.clone();
            opts.presigned_complete_multipart = multipart.complete_url.clone();
            opts.presigned_abort_multipart = multipart.abort_url.clone();
        }

        Ok(opts)
    }

    fn s3_credentials(&self) -> S3Credentials {
        self.credentials
            .as_ref()
            .map(|c| c.s3.clone())
            .unwrap_or_default()
    }
}
