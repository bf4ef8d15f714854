//! Presigned multipart upload
//!
//! The upstream application pre-signs a fixed number of part URLs plus the
//! completion and abort URLs. Each part is read fully before it is PUT, so
//! part uploads have a known Content-Length and a verifiable ETag.

use super::{check_status, compare_md5, delete_url, extract_etag, read_chunk, UploadStrategy};
use crate::destination::consumer::ConsumerError;
use crate::metrics;
use async_trait::async_trait;
use futures::future::BoxFuture;
use md5::{Digest, Md5};
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::io::AsyncRead;

pub struct Multipart {
    pub(super) client: reqwest::Client,
    pub(super) part_urls: Vec<String>,
    pub(super) complete_url: String,
    pub(super) abort_url: String,
    pub(super) delete_url: String,
    pub(super) put_headers: HashMap<String, String>,
    pub(super) part_size: i64,
}

#[derive(Debug, Serialize)]
struct CompleteMultipartUpload {
    #[serde(rename = "Part")]
    parts: Vec<CompletePart>,
}

#[derive(Debug, Serialize)]
struct CompletePart {
    #[serde(rename = "PartNumber")]
    part_number: usize,
    #[serde(rename = "ETag")]
    etag: String,
}

#[derive(Debug, Default, Deserialize)]
struct CompleteMultipartUploadResult {
    #[serde(rename = "ETag", default)]
    etag: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Code", default)]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

/// Name of the document element
fn root_element(body: &str) -> Option<String> {
    let mut reader = quick_xml::Reader::from_str(body);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned())
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// ETag S3 computes for a completed multipart object
fn composite_etag(part_md5s: &[[u8; 16]]) -> String {
    let mut hasher = Md5::new();
    for digest in part_md5s {
        hasher.update(digest);
    }
    format!("{}-{}", hex::encode(hasher.finalize()), part_md5s.len())
}

fn is_composite_etag(etag: &str) -> bool {
    match etag.split_once('-') {
        Some((digest, count)) => {
            super::is_md5_hex(digest)
                && !count.is_empty()
                && count.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

impl Multipart {
    #[tracing::instrument(
        name = "destination.multipart.upload_part",
        skip(self, body),
        fields(bytes = body.len()),
        err
    )]
    async fn upload_part(
        &self,
        url: &str,
        part_number: usize,
        body: Vec<u8>,
    ) -> Result<(String, [u8; 16]), ConsumerError> {
        let digest: [u8; 16] = Md5::digest(&body).into();

        let mut request = self.client.put(url).body(body);
        for (name, value) in &self.put_headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        check_status("upload_part", &response)?;

        let etag = extract_etag(&response);
        compare_md5(&hex::encode(digest), &etag)?;
        Ok((etag, digest))
    }

    #[tracing::instrument(
        name = "destination.multipart.complete",
        skip_all,
        fields(parts = parts.len()),
        err
    )]
    async fn complete(
        &self,
        parts: Vec<CompletePart>,
        part_md5s: &[[u8; 16]],
    ) -> Result<(), ConsumerError> {
        let body = quick_xml::se::to_string(&CompleteMultipartUpload { parts })
            .map_err(|e| ConsumerError::Multipart(format!("encoding completion request: {}", e)))?;

        let response = self
            .client
            .post(&self.complete_url)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await?;
        check_status("complete_multipart_upload", &response)?;
        let body = response.text().await?;

        // S3 may report a failed completion inside a 200 response
        if root_element(&body).as_deref() == Some("Error") {
            let error: ErrorResponse = quick_xml::de::from_str(&body).unwrap_or_default();
            return Err(ConsumerError::Multipart(format!(
                "{}: {}",
                error.code, error.message
            )));
        }

        let result: CompleteMultipartUploadResult = quick_xml::de::from_str(&body)
            .map_err(|e| ConsumerError::Multipart(format!("decoding completion response: {}", e)))?;
        let etag = result.etag.trim_matches('"');
        if is_composite_etag(etag) {
            let expected = composite_etag(part_md5s);
            if etag != expected {
                return Err(ConsumerError::ETagMismatch {
                    expected,
                    actual: etag.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UploadStrategy for Multipart {
    async fn upload(
        &mut self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<i64, ConsumerError> {
        let part_size = self.part_size.max(1) as u64;
        let mut parts = Vec::new();
        let mut part_md5s = Vec::new();
        let mut written: i64 = 0;

        for url in &self.part_urls {
            let chunk = read_chunk(reader, part_size).await?;
            if chunk.is_empty() {
                break;
            }
            written += chunk.len() as i64;

            let part_number = parts.len() + 1;
            let (etag, digest) = self.upload_part(url, part_number, chunk).await?;
            parts.push(CompletePart { part_number, etag });
            part_md5s.push(digest);
        }

        // Data left over after the last presigned part
        if !read_chunk(reader, 1).await?.is_empty() {
            return Err(ConsumerError::NotEnoughParts);
        }

        let count = parts.len();
        self.complete(parts, &part_md5s).await?;
        metrics::record_multipart_parts(count);

        Ok(written)
    }

    fn abort(&mut self) -> Option<BoxFuture<'static, ()>> {
        delete_url(&self.client, "abort_multipart_upload", &self.abort_url)
    }

    fn delete(&self) -> Option<BoxFuture<'static, ()>> {
        delete_url(&self.client, "delete_object", &self.delete_url)
    }

    fn name(&self) -> &'static str {
        "multipart"
    }
}
