//! Destination selection
//!
//! Maps [`UploadOpts`] to exactly one storage strategy. Rules are evaluated
//! in a fixed order and the first match wins:
//!
//! | # | Condition | Destination | Client mode |
//! |---|-----------|-------------|-------------|
//! | 1 | local temp path set | [`Destination::Local`] | `local` |
//! | 2 | workhorse client + generic bucket URL | [`RemoteDestination::GoCloud`] | `go_cloud:<provider>` |
//! | 3 | workhorse client + valid S3 config | [`RemoteDestination::S3`] | `s3` |
//! | 4 | part size set | [`RemoteDestination::Multipart`] | `multipart` |
//! | 5 | otherwise | [`RemoteDestination::Http`] | `http` |
//!
//! Selection performs no I/O.

use super::opts::{S3Config, S3Credentials, UploadOpts};
use std::collections::HashMap;
use std::path::PathBuf;

/// Where an upload is stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Local { temp_path: PathBuf, prefix: String },
    Remote(RemoteDestination),
}

/// Object storage strategies.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteDestination {
    GoCloud {
        provider: String,
        bucket_url: String,
        object_name: String,
    },
    S3 {
        object_name: String,
        credentials: S3Credentials,
        config: S3Config,
    },
    Multipart {
        part_urls: Vec<String>,
        complete_url: String,
        abort_url: String,
        delete_url: String,
        put_headers: HashMap<String, String>,
        part_size: i64,
    },
    Http {
        put_url: String,
        delete_url: String,
        put_headers: HashMap<String, String>,
    },
}

impl Destination {
    /// Observability label; has no behavioral effect.
    pub fn client_mode(&self) -> String {
        match self {
            Destination::Local { .. } => "local".to_string(),
            Destination::Remote(remote) => remote.client_mode(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Destination::Local { .. })
    }
}

impl RemoteDestination {
    pub fn client_mode(&self) -> String {
        match self {
            RemoteDestination::GoCloud { provider, .. } => format!("go_cloud:{}", provider),
            RemoteDestination::S3 { .. } => "s3".to_string(),
            RemoteDestination::Multipart { .. } => "multipart".to_string(),
            RemoteDestination::Http { .. } => "http".to_string(),
        }
    }
}

struct Rule {
    matches: fn(&UploadOpts) -> bool,
    build: fn(&UploadOpts) -> Destination,
}

const RULES: [Rule; 4] = [
    Rule {
        matches: UploadOpts::is_local,
        build: local,
    },
    Rule {
        matches: wants_go_cloud,
        build: go_cloud,
    },
    Rule {
        matches: wants_s3,
        build: s3,
    },
    Rule {
        matches: UploadOpts::is_multipart,
        build: multipart,
    },
];

/// Pick the destination for `opts`.
pub fn select(opts: &UploadOpts) -> Destination {
    RULES
        .iter()
        .find(|rule| (rule.matches)(opts))
        .map(|rule| (rule.build)(opts))
        .unwrap_or_else(|| http(opts))
}

fn wants_go_cloud(opts: &UploadOpts) -> bool {
    opts.use_workhorse_client_enabled() && opts.object_storage_config.is_go_cloud()
}

fn wants_s3(opts: &UploadOpts) -> bool {
    opts.use_workhorse_client_enabled()
        && opts.object_storage_config.is_aws()
        && opts.object_storage_config.is_valid()
}

fn local(opts: &UploadOpts) -> Destination {
    Destination::Local {
        temp_path: opts.local_temp_path.clone().unwrap_or_default(),
        prefix: opts.temp_file_prefix.clone(),
    }
}

fn go_cloud(opts: &UploadOpts) -> Destination {
    let config = &opts.object_storage_config;
    Destination::Remote(RemoteDestination::GoCloud {
        provider: config.provider.clone(),
        bucket_url: config.go_cloud_config.url.clone(),
        object_name: opts.remote_temp_object_id.clone(),
    })
}

fn s3(opts: &UploadOpts) -> Destination {
    let config = &opts.object_storage_config;
    Destination::Remote(RemoteDestination::S3 {
        object_name: opts.remote_temp_object_id.clone(),
        credentials: config.s3_credentials.clone(),
        config: config.s3_config.clone(),
    })
}

fn multipart(opts: &UploadOpts) -> Destination {
    Destination::Remote(RemoteDestination::Multipart {
        part_urls: opts.presigned_parts.clone(),
        complete_url: opts.presigned_complete_multipart.clone(),
        abort_url: opts.presigned_abort_multipart.clone(),
        delete_url: opts.presigned_delete.clone(),
        put_headers: opts.put_headers.clone(),
        part_size: opts.part_size,
    })
}

fn http(opts: &UploadOpts) -> Destination {
    Destination::Remote(RemoteDestination::Http {
        put_url: opts.presigned_put.clone(),
        delete_url: opts.presigned_delete.clone(),
        put_headers: opts.put_headers.clone(),
    })
}
