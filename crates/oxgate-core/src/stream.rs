//! Reader adapters composing the object I/O pipelines.
//!
//! A PUT chains limit, MD5 tee and optional encryption over one body
//! stream; a ranged GET of an encrypted object chains block-aligned read,
//! decryption and head-skip. Each adapter transforms bytes as they pass
//! through, so whole objects are never buffered.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use aes::Aes256;
use ctr::cipher::StreamCipher;
use ctr::Ctr128BE;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// AES-256 in counter mode, the object data cipher.
pub type Aes256Ctr = Ctr128BE<Aes256>;

/// Shared handle to an MD5 state fed by a [`HashingReader`].
pub type Md5Handle = Arc<Mutex<Md5>>;

/// Finalize a hash handle into its hex digest.
#[must_use]
pub fn hex_digest(handle: &Md5Handle) -> String {
    hex::encode(handle.lock().finalize_reset())
}

// ---------------------------------------------------------------------------
// HashingReader
// ---------------------------------------------------------------------------

/// Tees every byte read through it into an MD5 state.
pub struct HashingReader<R> {
    inner: R,
    hasher: Md5Handle,
}

impl<R> HashingReader<R> {
    /// Wrap `inner`; the returned handle yields the digest after the
    /// stream has been consumed.
    pub fn new(inner: R) -> (Self, Md5Handle) {
        let hasher: Md5Handle = Arc::new(Mutex::new(Md5::new()));
        (
            Self {
                inner,
                hasher: Arc::clone(&hasher),
            },
            hasher,
        )
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let me = self.get_mut();
        ready!(Pin::new(&mut me.inner).poll_read(cx, buf))?;
        let filled = buf.filled();
        if filled.len() > before {
            me.hasher.lock().update(&filled[before..]);
        }
        Poll::Ready(Ok(()))
    }
}

// ---------------------------------------------------------------------------
// CipherReader
// ---------------------------------------------------------------------------

/// Applies an AES-CTR keystream to every byte passing through. The same
/// adapter encrypts on the write path and decrypts on the read path.
pub struct CipherReader<R> {
    inner: R,
    cipher: Aes256Ctr,
}

impl<R> CipherReader<R> {
    /// Wrap `inner` with a positioned cipher.
    pub fn new(inner: R, cipher: Aes256Ctr) -> Self {
        Self { inner, cipher }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CipherReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let me = self.get_mut();
        ready!(Pin::new(&mut me.inner).poll_read(cx, buf))?;
        let filled = buf.filled_mut();
        if filled.len() > before {
            me.cipher.apply_keystream(&mut filled[before..]);
        }
        Poll::Ready(Ok(()))
    }
}

// ---------------------------------------------------------------------------
// SkipReader
// ---------------------------------------------------------------------------

/// Discards a fixed number of head bytes, then passes the rest through.
/// Used to trim block-alignment slack off decrypted range reads.
pub struct SkipReader<R> {
    inner: R,
    remaining: usize,
}

impl<R> SkipReader<R> {
    /// Wrap `inner`, discarding its first `skip` bytes.
    pub fn new(inner: R, skip: usize) -> Self {
        Self {
            inner,
            remaining: skip,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for SkipReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let me = self.get_mut();
        while me.remaining > 0 {
            let mut scratch = [0u8; 512];
            let take = me.remaining.min(scratch.len());
            let mut tmp = ReadBuf::new(&mut scratch[..take]);
            ready!(Pin::new(&mut me.inner).poll_read(cx, &mut tmp))?;
            let n = tmp.filled().len();
            if n == 0 {
                // Stream ended inside the skipped region.
                return Poll::Ready(Ok(()));
            }
            me.remaining -= n;
        }
        Pin::new(&mut me.inner).poll_read(cx, buf)
    }
}

// ---------------------------------------------------------------------------
// Bounded copy
// ---------------------------------------------------------------------------

/// Copy `reader` to `writer` in chunks of at most `chunk_size` bytes,
/// returning the bytes copied.
pub async fn copy_chunked(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    writer: &mut (dyn AsyncWrite + Send + Unpin),
    chunk_size: usize,
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; chunk_size];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
    }
    writer.flush().await?;
    Ok(copied)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
