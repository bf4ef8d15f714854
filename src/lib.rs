//! Upload Destination Library
//!
//! Upload ingestion core for a reverse proxy that accelerates file uploads.
//! An inbound body is streamed to exactly one storage backend (a local temp
//! file, a presigned PUT, a presigned multipart upload, S3 through the AWS
//! SDK, or a generic bucket) while it is hashed and size-limited. The result
//! is turned into form fields plus a signed token for the upstream
//! application.
//!
//! # Example
//!
//! ```no_run
//! use upload_destination::destination::{self, preparer::{AuthorizeResponse, UploadPreparer}};
//! use upload_destination::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let response: AuthorizeResponse = serde_json::from_str(r#"{"TempPath": "/tmp/uploads"}"#)?;
//!     let opts = UploadPreparer::new(config.object_storage.clone())
//!         .prepare(&response, "file")?;
//!
//!     let scope = CancellationToken::new();
//!     let fh = destination::upload(&scope, &b"hello"[..], 5, &opts).await?;
//!     let fields = fh.finalize_fields(Some("file"), &config.token_signer()?)?;
//!     println!("{:?}", fields);
//!     scope.cancel();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod destination;
pub mod logging;
pub mod metrics;
pub mod secret;

// Re-export commonly used types
pub use config::Config;
pub use destination::{upload, FileHandler, UploadError, UploadOpts};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
