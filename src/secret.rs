//! Shared secret and token signing
//!
//! The secret is shared with the upstream application and authenticates the
//! metadata this proxy sends back. It is stored base64-encoded in a file and
//! must decode to exactly 32 bytes.
//!
//! # Example
//!
//! ```
//! use upload_destination::secret::{Secret, TokenSigner};
//!
//! let secret = Secret::from_base64("MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=").unwrap();
//! let signer = TokenSigner::new(&secret).with_issuer("gitlab-workhorse");
//! let claims = signer.standard_claims();
//! let token = signer.sign(&claims).unwrap();
//! assert_eq!(token.split('.').count(), 3);
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Issuer of tokens signed by this proxy
pub const DEFAULT_ISSUER: &str = "gitlab-workhorse";

/// Default lifetime of a signed token
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);

const SECRET_BYTES: usize = 32;

/// Secret and signing errors
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Failed to read secret file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Secret is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Expected {expected} secret bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

/// Decoded shared secret
#[derive(Clone)]
pub struct Secret {
    bytes: Vec<u8>,
}

impl Secret {
    pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
        let bytes = STANDARD.decode(encoded.trim())?;
        if bytes.len() != SECRET_BYTES {
            return Err(SecretError::Length {
                expected: SECRET_BYTES,
                actual: bytes.len(),
            });
        }
        Ok(Self { bytes })
    }

    /// Read a base64 secret file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SecretError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_base64(&content)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Registered claims carried by every token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandardClaims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signer and verifier
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &Secret) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: DEFAULT_ISSUER.to_string(),
            ttl: DEFAULT_TOKEN_TTL,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.issuer = issuer.to_string();
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// `iss`, `iat` and `exp` for a token issued now
    pub fn standard_claims(&self) -> StandardClaims {
        let now = chrono::Utc::now().timestamp();
        StandardClaims {
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        }
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, SecretError> {
        Ok(encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.encoding_key,
        )?)
    }

    /// Check signature, issuer and expiry, then decode the claims
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, SecretError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.validate_exp = true;
        Ok(decode::<T>(token, &self.decoding_key, &validation)?.claims)
    }
}
