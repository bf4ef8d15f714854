//! Finalize fields
//!
//! Turns a [`FileHandler`] into the form fields the upstream application
//! needs to accept the upload: plain metadata fields plus a signed token
//! carrying the same values, so the receiver can trust them without
//! re-reading the file.

use super::FileHandler;
use crate::secret::{SecretError, StandardClaims, TokenSigner};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Field holding the signed token
pub const UPLOAD_TOKEN_FIELD: &str = "gitlab-workhorse-upload";

#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error("failed to sign upload metadata: {0}")]
    Signing(#[from] SecretError),
}

/// Claims of the upload token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadClaims {
    pub upload: BTreeMap<String, String>,
    #[serde(flatten)]
    pub standard: StandardClaims,
}

impl FileHandler {
    fn metadata(&self) -> [(&'static str, String); 6] {
        let path = self
            .local_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        [
            ("name", self.name.clone()),
            ("path", path),
            ("remote_url", self.remote_url.clone()),
            ("remote_id", self.remote_id.clone()),
            ("size", self.size.to_string()),
            (
                "upload_duration",
                self.upload_duration.as_secs_f64().to_string(),
            ),
        ]
    }

    /// Fields to send upstream, keyed `<prefix>.<field>` when a prefix is given.
    pub fn finalize_fields(
        &self,
        prefix: Option<&str>,
        signer: &TokenSigner,
    ) -> Result<HashMap<String, String>, FinalizeError> {
        let key = |field: &str| match prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, field),
            _ => field.to_string(),
        };

        let mut data = HashMap::new();
        let mut signed = BTreeMap::new();

        for (field, value) in self.metadata() {
            data.insert(key(field), value.clone());
            signed.insert(field.to_string(), value);
        }
        for (algorithm, digest) in self.hashes() {
            data.insert(key(algorithm), digest.clone());
            signed.insert(algorithm.clone(), digest.clone());
        }

        let claims = UploadClaims {
            upload: signed,
            standard: signer.standard_claims(),
        };
        data.insert(key(UPLOAD_TOKEN_FIELD), signer.sign(&claims)?);

        Ok(data)
    }
}
