//! Chunked transfer
//!
//! Streams binary payloads through a remote file store with a bounded
//! buffer, one chunk at a time.
//!
//! Download reads full chunks while `offset + chunk < size`, then exactly
//! the remainder. A size of zero issues no read. Upload writes chunks at
//! increasing offsets and commits with `save`.

use std::io;
use std::path::Path;

use sessionmux_core::{FileStore, RemoteDescriptor, RemoteFailure};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Default chunk size (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 262_144;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("remote store failed at offset {offset}: {source}")]
    Remote {
        offset: u64,
        #[source]
        source: RemoteFailure,
    },

    #[error("local i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("resource is not a file store")]
    NotAFileStore,
}

impl TransferError {
    /// Remote failure behind this error, if any
    pub fn remote(&self) -> Option<&RemoteFailure> {
        match self {
            Self::Remote { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkedTransfer {
    chunk_size: usize,
}

impl Default for ChunkedTransfer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ChunkedTransfer {
    /// A zero chunk size falls back to the default.
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
        Self { chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// `(offset, len)` of every read a download of `size` bytes issues.
    pub fn read_plan(&self, size: u64) -> Vec<(u64, usize)> {
        let chunk = self.chunk_size as u64;
        let mut plan = Vec::new();
        let mut offset = 0u64;

        while offset + chunk < size {
            plan.push((offset, self.chunk_size));
            offset += chunk;
        }
        if size > offset {
            plan.push((offset, (size - offset) as usize));
        }
        plan
    }

    /// Copy `size` bytes from the store into `sink`. Returns bytes written.
    pub async fn download<W>(&self, store: &dyn FileStore, size: u64, sink: &mut W) -> Result<u64, TransferError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        for (offset, len) in self.read_plan(size) {
            let bytes = store
                .read(offset, len)
                .await
                .map_err(|source| TransferError::Remote { offset, source })?;
            if bytes.len() != len {
                return Err(TransferError::ShortRead {
                    offset,
                    expected: len,
                    actual: bytes.len(),
                });
            }
            sink.write_all(&bytes).await?;
            written += len as u64;
        }
        sink.flush().await?;
        Ok(written)
    }

    /// Download into a new local file, deleting it if the transfer fails.
    pub async fn download_to_path(&self, store: &dyn FileStore, size: u64, path: &Path) -> Result<u64, TransferError> {
        let mut file = File::create(path).await?;
        let result = self.download(store, size, &mut file).await;
        let closed = file.shutdown().await;
        drop(file);

        let outcome = match (result, closed) {
            (Ok(written), Ok(())) => Ok(written),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(TransferError::Io(e)),
        };

        if outcome.is_err() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "[Transfer] Failed to delete partial download"
                );
            }
        } else {
            debug!(path = %path.display(), size = size, "[Transfer] Download complete");
        }
        outcome
    }

    /// Write everything `source` yields to the store, then commit.
    pub async fn upload<R>(&self, store: &dyn FileStore, source: &mut R) -> Result<RemoteDescriptor, TransferError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut offset = 0u64;

        loop {
            let filled = fill_chunk(source, &mut buf).await?;
            if filled == 0 {
                break;
            }
            store
                .write(offset, &buf[..filled])
                .await
                .map_err(|source| TransferError::Remote { offset, source })?;
            offset += filled as u64;
            if filled < buf.len() {
                break;
            }
        }

        let descriptor = store
            .save()
            .await
            .map_err(|source| TransferError::Remote { offset, source })?;
        debug!(bytes = offset, file_id = descriptor.id, "[Transfer] Upload committed");
        Ok(descriptor)
    }

    pub async fn upload_from_path(&self, store: &dyn FileStore, path: &Path) -> Result<RemoteDescriptor, TransferError> {
        let mut file = File::open(path).await?;
        self.upload(store, &mut file).await
    }
}

/// Read until `buf` is full or the source is exhausted.
async fn fill_chunk<R>(source: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
