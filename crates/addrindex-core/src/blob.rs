//! Append-only binary blob store.
//!
//! Payloads are appended to a single file and addressed by `(offset, size)`.
//! The file is never rewritten, so handles recorded in transaction rows stay
//! valid across restarts.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::IndexerError;
use crate::types::BlobHandle;

#[derive(Debug)]
pub struct BinaryBlobStore<F = File> {
    path: PathBuf,
    file: F,
    offset: u64,
}

impl BinaryBlobStore {
    /// Open (or create) `path` for appending. The next offset is the current
    /// file length.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let store = Self::with_backing(path, file)?;
        debug!(path = %store.path.display(), offset = store.offset, "blob store opened");
        Ok(store)
    }

    /// Flush appended bytes to disk.
    pub fn sync(&mut self) -> Result<(), IndexerError> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

impl<F: Read + Write + Seek> BinaryBlobStore<F> {
    pub(crate) fn with_backing(path: PathBuf, mut file: F) -> Result<Self, IndexerError> {
        let offset = file.seek(SeekFrom::End(0))?;
        Ok(Self { path, file, offset })
    }

    /// Append `bytes`. An empty payload returns `(current_offset, 0)` and
    /// writes nothing.
    ///
    /// A failed write may still have grown the file. The next offset is then
    /// taken from the real end of the file, so later handles never point at
    /// the partial bytes.
    pub fn insert(&mut self, bytes: &[u8]) -> Result<BlobHandle, IndexerError> {
        if bytes.is_empty() {
            return Ok(BlobHandle {
                offset: self.offset,
                size: 0,
            });
        }
        self.offset = self.file.seek(SeekFrom::End(0))?;
        let handle = BlobHandle {
            offset: self.offset,
            size: bytes.len() as u64,
        };
        if let Err(e) = self.file.write_all(bytes) {
            self.offset = self.file.seek(SeekFrom::End(0))?;
            warn!(
                path = %self.path.display(),
                offset = self.offset,
                error = %e,
                "blob append failed, partial bytes left unreferenced"
            );
            return Err(e.into());
        }
        self.offset += handle.size;
        Ok(handle)
    }

    pub fn current_offset(&self) -> u64 {
        self.offset
    }

    /// Read a payload back.
    pub fn read(&mut self, handle: BlobHandle) -> Result<Vec<u8>, IndexerError> {
        let mut buf = vec![0u8; handle.size as usize];
        if handle.size == 0 {
            return Ok(buf);
        }
        self.file.seek(SeekFrom::Start(handle.offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
