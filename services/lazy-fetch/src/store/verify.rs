use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use plfm_span_index::{Descriptor, DigestError, Verifier};
use tokio::io::{AsyncRead, ReadBuf};

/// Reader that hashes content as it passes through.
///
/// At EOF the content is checked against the descriptor's digest and, when
/// known, its size. Reading more bytes than a known size fails immediately.
/// Failures are `InvalidData` errors wrapping a [`DigestError`].
pub struct VerifyingReader<R> {
    inner: R,
    verifier: Option<Verifier>,
    size: u64,
}

impl<R> VerifyingReader<R> {
    pub fn new(inner: R, descriptor: &Descriptor) -> Self {
        Self {
            inner,
            verifier: Some(descriptor.digest.verifier()),
            size: descriptor.size,
        }
    }
}

fn invalid(err: DigestError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

impl<R: AsyncRead + Unpin> AsyncRead for VerifyingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        // Already verified.
        let Some(verifier) = this.verifier.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        let read = &buf.filled()[before..];
        if read.is_empty() {
            if let Some(verifier) = this.verifier.take() {
                verifier.verify(this.size).map_err(invalid)?;
            }
            return Poll::Ready(Ok(()));
        }

        verifier.update(read);
        if this.size != 0 && verifier.written() > this.size {
            let err = DigestError::SizeMismatch {
                digest: verifier.expected().to_string(),
                expected: this.size,
                actual: verifier.written(),
            };
            this.verifier = None;
            return Poll::Ready(Err(invalid(err)));
        }

        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use plfm_span_index::Digest;
    use tokio::io::AsyncReadExt;

    use super::*;

    async fn read_all(data: &'static [u8], descriptor: &Descriptor) -> io::Result<Vec<u8>> {
        let mut reader = VerifyingReader::new(data, descriptor);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await?;
        Ok(out)
    }

    fn digest_error(err: &io::Error) -> DigestError {
        err.get_ref()
            .and_then(|e| e.downcast_ref::<DigestError>())
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_matching_content_passes() {
        let descriptor = Descriptor::for_bytes(b"span index");
        assert_eq!(read_all(b"span index", &descriptor).await.unwrap(), b"span index");

        // Unknown size only checks the digest.
        let descriptor = Descriptor::from_digest(Digest::sha256(b"span index"));
        assert!(read_all(b"span index", &descriptor).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_digest_fails_at_eof() {
        let descriptor = Descriptor::new(Digest::sha256(b"expected"), 8);
        let err = read_all(b"tampered", &descriptor).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(matches!(digest_error(&err), DigestError::Mismatch { .. }));
    }

    #[tokio::test]
    async fn test_short_content_fails() {
        let descriptor = Descriptor::new(Digest::sha256(b"abc"), 10);
        let err = read_all(b"abc", &descriptor).await.unwrap_err();
        assert!(matches!(
            digest_error(&err),
            DigestError::SizeMismatch {
                expected: 10,
                actual: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_oversized_content_fails_early() {
        let descriptor = Descriptor::new(Digest::sha256(b"abc"), 2);
        let err = read_all(b"abc", &descriptor).await.unwrap_err();
        assert!(matches!(
            digest_error(&err),
            DigestError::SizeMismatch { expected: 2, .. }
        ));
    }
}
