//! Single presigned PUT

use super::{check_status, compare_md5, delete_url, extract_etag, UploadStrategy, BUFFER_SIZE};
use crate::destination::consumer::ConsumerError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::SinkExt;
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Streams the upload as the body of one presigned PUT request.
pub struct Object {
    client: reqwest::Client,
    put_url: String,
    delete_url: String,
    put_headers: HashMap<String, String>,
    size: i64,
}

impl Object {
    pub fn new(
        client: reqwest::Client,
        put_url: &str,
        delete_url: &str,
        put_headers: HashMap<String, String>,
        size: i64,
    ) -> Self {
        Self {
            client,
            put_url: put_url.to_string(),
            delete_url: delete_url.to_string(),
            put_headers,
            size,
        }
    }
}

/// Copy `reader` into `tx` chunk by chunk. Returns the byte count and MD5.
async fn pump(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    mut tx: futures::channel::mpsc::Sender<io::Result<Bytes>>,
) -> Result<(i64, String), ConsumerError> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut hasher = Md5::new();
    let mut written: i64 = 0;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                // Fail the request body too so the server never sees a complete object
                let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                return Err(e.into());
            }
        };
        hasher.update(&buf[..n]);
        written += n as i64;
        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "request body closed").into());
        }
    }

    Ok((written, hex::encode(hasher.finalize())))
}

#[async_trait]
impl UploadStrategy for Object {
    #[tracing::instrument(
        name = "destination.object.put",
        skip_all,
        fields(http.method = "PUT", http.status_code = tracing::field::Empty),
        err
    )]
    async fn upload(
        &mut self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<i64, ConsumerError> {
        let (tx, rx) = futures::channel::mpsc::channel::<io::Result<Bytes>>(4);

        let mut request = self
            .client
            .put(&self.put_url)
            .body(reqwest::Body::wrap_stream(rx));
        for (name, value) in &self.put_headers {
            request = request.header(name, value);
        }
        if self.size >= 0 {
            request = request.header(reqwest::header::CONTENT_LENGTH, self.size);
        }

        let (pumped, response) = tokio::join!(pump(reader, tx), request.send());

        let (written, md5) = match pumped {
            Ok(pumped) => pumped,
            // The server stopped reading; its answer explains why
            Err(ConsumerError::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                check_status("put_object", &response?)?;
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };

        let response = response?;
        tracing::Span::current().record("http.status_code", response.status().as_u16());
        check_status("put_object", &response)?;
        compare_md5(&md5, &extract_etag(&response))?;

        Ok(written)
    }

    fn abort(&mut self) -> Option<BoxFuture<'static, ()>> {
        // A failed PUT leaves nothing behind that the delete URL would not cover
        self.delete()
    }

    fn delete(&self) -> Option<BoxFuture<'static, ()>> {
        delete_url(&self.client, "delete_object", &self.delete_url)
    }

    fn name(&self) -> &'static str {
        "object"
    }
}
