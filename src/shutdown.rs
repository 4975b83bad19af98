//! Cooperative cancellation for a migration run.
//! A `CancelToken` is cloned into every stage; the ctrlc handler cancels it and
//! each dequeue loop checks it before taking more work.
//!
//! Notes:
//! - Relaxed atomics are sufficient for a one-way "stop" flag.
//! - `cancel()` is safe to call from signal handlers.
//! - Reads are cancellable between chunks only: a single large read syscall that is
//!   already in flight completes before the flag is observed.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::TierMoveError;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a cooperative shutdown (idempotent).
    #[inline]
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(Canceled)` once cancellation was requested.
    #[inline]
    pub fn check(&self) -> Result<(), TierMoveError> {
        if self.is_canceled() {
            Err(TierMoveError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Marker carried inside the `io::Error` produced by a canceled read.
#[derive(Debug)]
pub struct ReadCanceled;

impl std::fmt::Display for ReadCanceled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("read canceled")
    }
}

impl std::error::Error for ReadCanceled {}

/// True when `e` was produced by a `CancelableReader`.
pub fn is_read_canceled(e: &io::Error) -> bool {
    e.get_ref()
        .map(|inner| inner.is::<ReadCanceled>())
        .unwrap_or(false)
}

/// Reader adapter that checks the token before every read.
pub struct CancelableReader<R> {
    inner: R,
    token: CancelToken,
}

impl<R: Read> CancelableReader<R> {
    pub fn new(inner: R, token: CancelToken) -> Self {
        Self { inner, token }
    }
}

impl<R: Read> Read for CancelableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.token.is_canceled() {
            // ErrorKind::Other on purpose: Interrupted would be retried by io::copy.
            return Err(io::Error::other(ReadCanceled));
        }
        self.inner.read(buf)
    }
}
