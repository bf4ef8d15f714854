//! Upload options
//!
//! [`UploadOpts`] is the per-request description of where an upload should
//! go. It is normally produced by [`super::preparer::UploadPreparer`] from the
//! upstream application's pre-authorization response.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::time::Instant;

/// Declared size of a stream whose length is not known in advance.
pub const UNKNOWN_SIZE: i64 = -1;

/// Static S3 credentials, taken from this process's own configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct S3Credentials {
    #[serde(default)]
    pub aws_access_key_id: String,
    #[serde(default)]
    pub aws_secret_access_key: String,
}

/// S3 bucket settings as sent by the upstream application.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct S3Config {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub path_style: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub use_iam_profile: bool,
    #[serde(default)]
    pub server_side_encryption: Option<String>,
    #[serde(default, rename = "SSEKMSKeyID")]
    pub sse_kms_key_id: Option<String>,
}

/// Generic bucket addressed by URL (`azblob://container`, `gs://bucket`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct GoCloudConfig {
    #[serde(default, rename = "URL")]
    pub url: String,
}

/// Object storage settings used when this process talks to the bucket itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectStorageConfig {
    pub provider: String,
    pub s3_credentials: S3Credentials,
    pub s3_config: S3Config,
    pub go_cloud_config: GoCloudConfig,
}

impl ObjectStorageConfig {
    pub fn is_aws(&self) -> bool {
        self.provider.eq_ignore_ascii_case("AWS") || self.provider.eq_ignore_ascii_case("S3")
    }

    pub fn is_azure(&self) -> bool {
        self.provider == "AzureRM"
    }

    pub fn is_go_cloud(&self) -> bool {
        !self.go_cloud_config.url.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        if self.is_aws() {
            !self.s3_config.bucket.is_empty() && self.s3_credentials_valid()
        } else {
            self.is_go_cloud()
        }
    }

    fn s3_credentials_valid(&self) -> bool {
        if self.s3_config.use_iam_profile {
            return true;
        }
        !self.s3_credentials.aws_access_key_id.is_empty()
            && !self.s3_credentials.aws_secret_access_key.is_empty()
    }
}

/// Everything needed to place one upload.
#[derive(Debug, Clone)]
pub struct UploadOpts {
    /// Prefix for local temp file names; also the display name of the upload.
    pub temp_file_prefix: String,
    /// Local temp directory. Setting it selects local storage.
    pub local_temp_path: Option<PathBuf>,
    /// Object id assigned by the upstream application.
    pub remote_id: String,
    /// URL the object can later be fetched from.
    pub remote_url: String,
    /// Object key used when talking to the bucket directly.
    pub remote_temp_object_id: String,
    pub presigned_put: String,
    pub presigned_delete: String,
    pub put_headers: HashMap<String, String>,
    pub use_workhorse_client: bool,
    pub object_storage_config: ObjectStorageConfig,
    /// Upper bound for the whole consume step.
    pub deadline: Instant,
    /// Part size for presigned multipart uploads; 0 disables multipart.
    pub part_size: i64,
    pub presigned_parts: Vec<String>,
    pub presigned_complete_multipart: String,
    pub presigned_abort_multipart: String,
    /// 0 means unlimited.
    pub maximum_size: i64,
}

impl UploadOpts {
    /// Options for a local upload into `dir`; mostly useful in tests and tools.
    pub fn local(dir: impl Into<PathBuf>, prefix: &str, deadline: Instant) -> Self {
        Self {
            temp_file_prefix: prefix.to_string(),
            local_temp_path: Some(dir.into()),
            ..Self::remote(deadline)
        }
    }

    /// Options with no destination set yet.
    pub fn remote(deadline: Instant) -> Self {
        Self {
            temp_file_prefix: String::new(),
            local_temp_path: None,
            remote_id: String::new(),
            remote_url: String::new(),
            remote_temp_object_id: String::new(),
            presigned_put: String::new(),
            presigned_delete: String::new(),
            put_headers: HashMap::new(),
            use_workhorse_client: false,
            object_storage_config: ObjectStorageConfig::default(),
            deadline,
            part_size: 0,
            presigned_parts: Vec::new(),
            presigned_complete_multipart: String::new(),
            presigned_abort_multipart: String::new(),
            maximum_size: 0,
        }
    }

    pub fn is_local(&self) -> bool {
        self.local_temp_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty())
    }

    pub fn is_multipart(&self) -> bool {
        self.part_size > 0
    }

    pub fn use_workhorse_client_enabled(&self) -> bool {
        self.use_workhorse_client
            && self.object_storage_config.is_valid()
            && !self.remote_temp_object_id.is_empty()
    }
}
