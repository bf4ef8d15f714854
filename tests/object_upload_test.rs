//! Presigned PUT Integration Tests
//!
//! Uploads through a single presigned PUT URL against a mock object store.
//!
//! ## Test Coverage
//!
//! - Successful PUT with headers, length and ETag check
//! - Error statuses, ETag mismatch and over-maximum bodies
//! - A slow store never holds the caller past the deadline or cancellation
//! - The object is deleted once the scope ends

#[cfg(test)]
mod tests {
    use md5::{Digest, Md5};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;
    use upload_destination::destination::{self, ConsumerError, UploadError, UploadOpts};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &[u8] = b"hello world";

    fn put_opts(server: &MockServer) -> UploadOpts {
        let mut opts = UploadOpts::remote(Instant::now() + Duration::from_secs(10));
        opts.remote_id = "object-1".into();
        opts.remote_url = format!("{}/get", server.uri());
        opts.presigned_put = format!("{}/put", server.uri());
        opts.presigned_delete = format!("{}/delete", server.uri());
        opts.put_headers
            .insert("Content-Type".into(), "application/octet-stream".into());
        opts
    }

    fn md5_hex(data: &[u8]) -> String {
        hex::encode(Md5::digest(data))
    }

    // ========================================================================
    // TEST: Success
    // ========================================================================

    #[tokio::test]
    async fn test_put_object_success() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/put"))
            .and(header("content-type", "application/octet-stream"))
            .and(header("content-length", "11"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", format!("\"{}\"", md5_hex(BODY)).as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let scope = CancellationToken::new();
        let fh = destination::upload(&scope, BODY, BODY.len() as i64, &put_opts(&server))
            .await
            .unwrap();

        assert_eq!(fh.size, 11);
        assert_eq!(fh.remote_id, "object-1");
        assert_eq!(fh.remote_url, format!("{}/get", server.uri()));
        assert!(fh.local_path.is_none());
        assert_eq!(fh.md5().unwrap(), md5_hex(BODY));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].body, BODY);
    }

    #[tokio::test]
    async fn test_put_object_unknown_size() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/put"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let scope = CancellationToken::new();
        let fh = destination::upload(&scope, BODY, -1, &put_opts(&server))
            .await
            .unwrap();

        assert_eq!(fh.size, 11);
    }

    // ========================================================================
    // TEST: Failures
    // ========================================================================

    #[tokio::test]
    async fn test_put_object_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/put"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/delete"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let scope = CancellationToken::new();
        let err = destination::upload(&scope, BODY, BODY.len() as i64, &put_opts(&server))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Consumer(ConsumerError::Status { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn test_put_object_etag_mismatch_aborts() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/put"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"00000000000000000000000000000000\""),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/delete"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let scope = CancellationToken::new();
        let err = destination::upload(&scope, BODY, BODY.len() as i64, &put_opts(&server))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Consumer(ConsumerError::ETagMismatch { .. })
        ));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_put_object_over_maximum() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/put"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/delete"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let mut opts = put_opts(&server);
        opts.maximum_size = 5;

        let scope = CancellationToken::new();
        let err = destination::upload(&scope, BODY, -1, &opts)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::EntityTooLarge));
    }

    // ========================================================================
    // TEST: Deadline and cancellation
    // ========================================================================

    async fn mount_slow_store(server: &MockServer) {
        Mock::given(method("PUT"))
            .and(path("/put"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/delete"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(5)))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_deadline_not_extended_by_slow_abort() {
        let server = MockServer::start().await;
        mount_slow_store(&server).await;

        let mut opts = put_opts(&server);
        opts.deadline = Instant::now() + Duration::from_millis(200);

        let started = Instant::now();
        let scope = CancellationToken::new();
        let err = destination::upload(&scope, BODY, BODY.len() as i64, &opts)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Consumer(ConsumerError::DeadlineExceeded)
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancel_not_delayed_by_slow_abort() {
        let server = MockServer::start().await;
        mount_slow_store(&server).await;

        let scope = CancellationToken::new();
        let canceller = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = destination::upload(&scope, BODY, BODY.len() as i64, &put_opts(&server))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Consumer(ConsumerError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    // ========================================================================
    // TEST: Cleanup
    // ========================================================================

    #[tokio::test]
    async fn test_object_deleted_when_scope_ends() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/put"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/delete"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let scope = CancellationToken::new();
        destination::upload(&scope, BODY, BODY.len() as i64, &put_opts(&server))
            .await
            .unwrap();

        let deletes = |requests: Vec<wiremock::Request>| {
            requests
                .iter()
                .filter(|r| r.method.as_str() == "DELETE")
                .count()
        };
        assert_eq!(deletes(server.received_requests().await.unwrap()), 0);

        scope.cancel();
        for _ in 0..100 {
            if deletes(server.received_requests().await.unwrap()) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        server.verify().await;
    }
}
