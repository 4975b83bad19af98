//! Streaming copy with content hashing on both sides.
//!
//! Features:
//! - Writes to a newly created destination file (O_EXCL semantics; never clobbers).
//! - Buffered I/O with large (1 MiB) buffers to reduce syscall count.
//! - The bytes read from the source and the bytes accepted by the destination are
//!   hashed (BLAKE3) as they stream through, and the destination is fsynced.
//! - Reads go through a `CancelableReader`, so a canceled run stops between chunks.
//!
//! Snapshot semantics: the source file is read once from start to EOF; if it grows
//! concurrently, the additional bytes are not included.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::debug;

use crate::platform;
use crate::shutdown::{CancelToken, CancelableReader};

pub(crate) const BUF_SIZE: usize = 1024 * 1024;

/// Result of a hashed streaming copy.
#[derive(Debug, Clone)]
pub struct CopyResult {
    /// Total bytes copied from source to destination.
    pub bytes: u64,
    /// Hash of everything read from the source.
    pub source_hash: blake3::Hash,
    /// Hash of everything the destination accepted.
    pub written_hash: blake3::Hash,
}

struct HashingReader<R> {
    inner: R,
    hasher: blake3::Hasher,
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copy `src` -> `dst` (which must not exist), hashing both sides, then fsync `dst`.
/// With `nocow`, the still-empty destination is marked NOCOW before any data lands.
pub(crate) fn copy_hashed(src: &Path, dst: &Path, cancel: &CancelToken, nocow: bool) -> io::Result<CopyResult> {
    let src_f = File::open(src)?;
    let dst_f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .custom_flags(libc::O_CLOEXEC)
        .mode(0o600)
        .open(dst)?;

    if nocow && let Err(e) = platform::mark_nocow(dst) {
        debug!(path = %dst.display(), error = %e, "could not mark file NOCOW");
    }

    let mut reader = HashingReader {
        inner: CancelableReader::new(BufReader::with_capacity(BUF_SIZE, src_f), cancel.clone()),
        hasher: blake3::Hasher::new(),
    };
    let mut writer = HashingWriter {
        inner: BufWriter::with_capacity(BUF_SIZE, dst_f),
        hasher: blake3::Hasher::new(),
    };
    let bytes = io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    writer.inner.get_ref().sync_all()?;

    Ok(CopyResult {
        bytes,
        source_hash: reader.hasher.finalize(),
        written_hash: writer.hasher.finalize(),
    })
}

/// Hash a file's current on-disk content.
pub(crate) fn hash_file(path: &Path) -> io::Result<blake3::Hash> {
    let mut reader = BufReader::with_capacity(BUF_SIZE, File::open(path)?);
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
