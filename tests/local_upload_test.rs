//! Local Upload Integration Tests
//!
//! Streams bodies into local temp files through the public `upload` entry
//! point and checks sizes, digests, size policy and temp file cleanup.

#[cfg(test)]
mod tests {
    use rand::RngCore;
    use sha2::{Digest, Sha256};
    use std::collections::HashSet;
    use std::io;
    use std::path::Path;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncRead, ReadBuf};
    use tokio::sync::Semaphore;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;
    use upload_destination::destination::{
        self, ConsumerError, SizeError, UploadError, UploadOpts, UNKNOWN_SIZE,
    };

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::rng().fill_bytes(&mut data);
        data
    }

    fn local_opts(dir: &Path) -> UploadOpts {
        UploadOpts::local(dir, "artifact", Instant::now() + Duration::from_secs(10))
    }

    async fn wait_until_empty(dir: &Path) -> bool {
        for _ in 0..500 {
            let empty = std::fs::read_dir(dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(true);
            if empty {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Reader that fails the test if anything reads from it
    struct UntouchedReader;

    impl AsyncRead for UntouchedReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            panic!("the body must not be read");
        }
    }

    // ========================================================================
    // TEST: Successful uploads
    // ========================================================================

    #[tokio::test]
    async fn test_upload_known_size() {
        let dir = tempfile::tempdir().unwrap();
        let scope = CancellationToken::new();
        let data = random_bytes(1024);

        let fh = destination::upload(&scope, &data[..], 1024, &local_opts(dir.path()))
            .await
            .unwrap();

        assert_eq!(fh.size, 1024);
        assert_eq!(fh.name, "artifact");
        let path = fh.local_path.clone().expect("local path");
        assert!(path.starts_with(dir.path()));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("artifact"));
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(fh.sha256().unwrap(), hex::encode(Sha256::digest(&data)));
        assert_eq!(fh.hashes().len(), 4);
        assert!(fh.remote_id.is_empty());
    }

    #[tokio::test]
    async fn test_upload_unknown_size() {
        let dir = tempfile::tempdir().unwrap();
        let scope = CancellationToken::new();
        let data = random_bytes(3000);

        let fh = destination::upload(&scope, &data[..], UNKNOWN_SIZE, &local_opts(dir.path()))
            .await
            .unwrap();

        assert_eq!(fh.size, 3000);
    }

    #[tokio::test]
    async fn test_upload_empty_body() {
        let dir = tempfile::tempdir().unwrap();
        let scope = CancellationToken::new();

        let fh = destination::upload(&scope, &b""[..], 0, &local_opts(dir.path()))
            .await
            .unwrap();

        assert_eq!(fh.size, 0);
        assert_eq!(
            fh.md5().unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[tokio::test]
    async fn test_creates_missing_temp_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested/uploads");
        let scope = CancellationToken::new();

        let fh = destination::upload(&scope, &b"hello"[..], 5, &local_opts(&dir))
            .await
            .unwrap();

        assert!(fh.local_path.unwrap().starts_with(&dir));
    }

    // ========================================================================
    // TEST: Size policy
    // ========================================================================

    #[tokio::test]
    async fn test_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let scope = CancellationToken::new();
        let data = random_bytes(50);

        let err = destination::upload(&scope, &data[..], 100, &local_opts(dir.path()))
            .await
            .unwrap_err();

        assert!(err.is_size_error());
        assert!(matches!(
            err,
            UploadError::Size(SizeError::Mismatch {
                expected: 100,
                actual: 50
            })
        ));
    }

    #[tokio::test]
    async fn test_declared_size_over_maximum_fails_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let scope = CancellationToken::new();
        let mut opts = local_opts(dir.path());
        opts.maximum_size = 1000;

        let err = destination::upload(&scope, UntouchedReader, 2000, &opts)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Size(SizeError::OverMaximum {
                size: 2000,
                maximum: 1000
            })
        ));
    }

    #[tokio::test]
    async fn test_stream_over_maximum_is_entity_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let scope = CancellationToken::new();
        let mut opts = local_opts(dir.path());
        opts.maximum_size = 1000;
        let data = random_bytes(1001);

        let err = destination::upload(&scope, &data[..], UNKNOWN_SIZE, &opts)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::EntityTooLarge));
        assert!(!err.is_size_error());
    }

    #[tokio::test]
    async fn test_stream_at_maximum_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let scope = CancellationToken::new();
        let mut opts = local_opts(dir.path());
        opts.maximum_size = 1000;
        let data = random_bytes(1000);

        let fh = destination::upload(&scope, &data[..], UNKNOWN_SIZE, &opts)
            .await
            .unwrap();

        assert_eq!(fh.size, 1000);
    }

    // ========================================================================
    // TEST: Deadline
    // ========================================================================

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let scope = CancellationToken::new();
        let mut opts = local_opts(dir.path());
        opts.deadline = Instant::now() + Duration::from_millis(50);

        // The writer half stays open, so reads never finish
        let (_writer, reader) = tokio::io::duplex(64);

        let err = destination::upload(&scope, reader, UNKNOWN_SIZE, &opts)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Consumer(ConsumerError::DeadlineExceeded)
        ));
    }

    // ========================================================================
    // TEST: Cleanup
    // ========================================================================

    #[tokio::test]
    async fn test_temp_file_kept_until_scope_ends() {
        let dir = tempfile::tempdir().unwrap();
        let scope = CancellationToken::new();

        let fh = destination::upload(&scope, &b"keep me"[..], 7, &local_opts(dir.path()))
            .await
            .unwrap();
        let path = fh.local_path.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(path.exists(), "file must survive until the scope ends");

        scope.cancel();
        assert!(wait_until_empty(dir.path()).await);
    }

    #[tokio::test]
    async fn test_temp_file_removed_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let scope = CancellationToken::new();

        let result = destination::upload(&scope, &b"short"[..], 100, &local_opts(dir.path())).await;
        assert!(result.is_err());

        scope.cancel();
        assert!(wait_until_empty(dir.path()).await);
    }

    #[tokio::test]
    async fn test_cancelled_scope_stops_upload() {
        let dir = tempfile::tempdir().unwrap();
        let scope = CancellationToken::new();
        let (_writer, reader) = tokio::io::duplex(64);

        let canceller = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let err = destination::upload(&scope, reader, UNKNOWN_SIZE, &local_opts(dir.path()))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Consumer(ConsumerError::Cancelled)));
        assert!(wait_until_empty(dir.path()).await);
    }

    // ========================================================================
    // TEST: Concurrency
    // ========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_uploads_get_unique_files() {
        const UPLOADS: usize = 1000;

        let dir = tempfile::tempdir().unwrap();
        let scope = CancellationToken::new();
        // Keeps open descriptors under the usual 1024 soft limit
        let open_files = Arc::new(Semaphore::new(256));

        let handles: Vec<_> = (0..UPLOADS)
            .map(|i| {
                let scope = scope.clone();
                let opts = local_opts(dir.path());
                let open_files = Arc::clone(&open_files);
                tokio::spawn(async move {
                    let _permit = open_files.acquire_owned().await.unwrap();
                    let body = format!("upload {}", i).into_bytes();
                    let size = body.len() as i64;
                    destination::upload(&scope, &body[..], size, &opts).await
                })
            })
            .collect();

        let mut paths = HashSet::new();
        for handle in handles {
            let fh = handle.await.unwrap().unwrap();
            assert!(paths.insert(fh.local_path.unwrap()));
        }
        assert_eq!(paths.len(), UPLOADS);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), UPLOADS);

        scope.cancel();
        assert!(wait_until_empty(dir.path()).await);
    }
}
