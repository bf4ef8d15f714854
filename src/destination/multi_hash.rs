//! Digest accumulator
//!
//! [`HashingReader`] tees every byte read through it into a [`MultiHash`],
//! which keeps one running digest per algorithm. Digests are only meaningful
//! once the wrapped stream has been drained; finishing earlier yields the
//! digest of whatever prefix was read so far.

use md5::Md5;
use pin_project_lite::pin_project;
use sha1::Sha1;
use sha2::digest::DynDigest;
use sha2::{Sha256, Sha512};
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};

type Hasher = Box<dyn DynDigest + Send>;

fn new_md5() -> Hasher {
    Box::new(Md5::default())
}

fn new_sha1() -> Hasher {
    Box::new(Sha1::default())
}

fn new_sha256() -> Hasher {
    Box::new(Sha256::default())
}

fn new_sha512() -> Hasher {
    Box::new(Sha512::default())
}

/// Supported algorithms, in the order they are reported.
pub const ALGORITHMS: [(&str, fn() -> Hasher); 4] = [
    ("md5", new_md5),
    ("sha1", new_sha1),
    ("sha256", new_sha256),
    ("sha512", new_sha512),
];

#[derive(Error, Debug)]
#[error("unsupported hash algorithm: {0}")]
pub struct UnknownAlgorithm(pub String);

/// A set of named hash functions updated in lockstep.
pub struct MultiHash {
    hashers: Vec<(&'static str, Hasher)>,
}

impl MultiHash {
    /// All supported algorithms.
    pub fn new() -> Self {
        Self {
            hashers: ALGORITHMS
                .iter()
                .map(|(name, factory)| (*name, factory()))
                .collect(),
        }
    }

    /// Only the named algorithms.
    pub fn with_algorithms(names: &[&str]) -> Result<Self, UnknownAlgorithm> {
        let mut hashers = Vec::with_capacity(names.len());
        for name in names {
            let (known, factory) = ALGORITHMS
                .iter()
                .find(|(known, _)| known == name)
                .ok_or_else(|| UnknownAlgorithm((*name).to_string()))?;
            hashers.push((*known, factory()));
        }
        Ok(Self { hashers })
    }

    pub fn update(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        for (_, hasher) in &mut self.hashers {
            hasher.update(data);
        }
    }

    /// Lowercase hex digest per algorithm name.
    pub fn finish(self) -> BTreeMap<String, String> {
        self.hashers
            .into_iter()
            .map(|(name, hasher)| (name.to_string(), hex::encode(hasher.finalize())))
            .collect()
    }
}

impl Default for MultiHash {
    fn default() -> Self {
        Self::new()
    }
}

pin_project! {
    /// Pass-through reader feeding a [`MultiHash`].
    pub struct HashingReader<R> {
        #[pin]
        inner: R,
        hashes: MultiHash,
        bytes_read: u64,
    }
}

impl<R> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_hashes(inner, MultiHash::new())
    }

    pub fn with_hashes(inner: R, hashes: MultiHash) -> Self {
        Self {
            inner,
            hashes,
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Call only after the stream has been fully consumed.
    pub fn finish(self) -> BTreeMap<String, String> {
        self.hashes.finish()
    }
}

impl<R: AsyncRead> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;

        let filled = &buf.filled()[before..];
        this.hashes.update(filled);
        *this.bytes_read += filled.len() as u64;
        Poll::Ready(Ok(()))
    }
}
