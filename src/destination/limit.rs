//! Hard size limit on a reader
//!
//! [`HardLimitReader`] never yields more than its budget. Once the inner
//! reader offers a byte past the budget, the read fails and
//! [`HardLimitReader::overflowed`] reports it, so the caller can tell a
//! policy rejection apart from an ordinary transport error.

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

pin_project! {
    pub struct HardLimitReader<R> {
        #[pin]
        inner: R,
        remaining: i64,
    }
}

impl<R> HardLimitReader<R> {
    pub fn new(inner: R, limit: i64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    /// True once more than `limit` bytes were offered.
    pub fn overflowed(&self) -> bool {
        self.remaining < 0
    }
}

fn limit_exceeded() -> io::Error {
    io::Error::other("input provided more bytes than the maximum size")
}

impl<R: AsyncRead> AsyncRead for HardLimitReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if *this.remaining < 0 {
            return Poll::Ready(Err(limit_exceeded()));
        }

        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;

        let read = (buf.filled().len() - before) as i64;
        let allowed = *this.remaining;
        *this.remaining -= read;
        if *this.remaining < 0 {
            // Bytes past the budget are dropped, never handed downstream.
            buf.set_filled(before + allowed as usize);
            return Poll::Ready(Err(limit_exceeded()));
        }

        Poll::Ready(Ok(()))
    }
}
