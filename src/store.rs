use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream::BoxStream, StreamExt};
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::StoreError;

/// Attempts at finding a free numbered variant of a taken name.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// Payload bytes as they arrive from the network.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A file that has been completely written to the artifact store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFile {
    /// Name the artifact was stored under, which may carry a `_N` suffix.
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Durable storage for downloaded scans.
///
/// Implementations must never overwrite an existing artifact. When `filename`
/// is taken they store under a numbered variant and report the name used in
/// [`StoredFile::filename`]. A failed or cancelled write must not leave a file
/// behind.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn write_stream(
        &self,
        filename: &str,
        stream: ByteStream,
        cancel: &CancellationToken,
    ) -> Result<StoredFile, StoreError>;
}

/// Stores artifacts as plain files in one directory.
///
/// The payload is written to a hidden `.part` file, synced, then linked into
/// place, so a file under its final name is always complete.
#[derive(Clone, Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn write_part(
        &self,
        part: &Path,
        mut stream: ByteStream,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let write_err = |source| StoreError::Write {
            path: part.to_path_buf(),
            source,
        };

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(part)
            .await
            .map_err(write_err)?;

        let mut size = 0u64;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes).await.map_err(write_err)?;
                    size += bytes.len() as u64;
                }
                Some(Err(e)) => return Err(StoreError::Stream(e)),
                None => break,
            }
        }

        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        Ok(size)
    }

    /// Links the finished part file under `filename`, or the first free
    /// `name_N.ext` variant of it.
    async fn publish(&self, part: &Path, filename: &str) -> Result<(String, PathBuf), StoreError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = numbered_name(filename, attempt);
            let target = self.root.join(&candidate);
            match fs::hard_link(part, &target).await {
                Ok(()) => {
                    if let Err(e) = fs::remove_file(part).await {
                        warn!("Could not remove partial file {}: {}", part.display(), e);
                    }
                    return Ok((candidate, target));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    // Filesystems without hard links fall back to check-then-rename.
                    debug!("hard link unavailable in {}: {}", self.root.display(), e);
                    if fs::try_exists(&target).await.unwrap_or(false) {
                        continue;
                    }
                    fs::rename(part, &target)
                        .await
                        .map_err(|source| StoreError::Write {
                            path: target.clone(),
                            source,
                        })?;
                    return Ok((candidate, target));
                }
            }
        }
        Err(StoreError::AlreadyExists(filename.to_string()))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write_stream(
        &self,
        filename: &str,
        stream: ByteStream,
        cancel: &CancellationToken,
    ) -> Result<StoredFile, StoreError> {
        if !is_safe_filename(filename) {
            return Err(StoreError::UnsafeName(filename.to_string()));
        }

        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StoreError::Write {
                path: self.root.clone(),
                source,
            })?;

        let part = self
            .root
            .join(format!(".{}.{}.part", filename, uuid::Uuid::new_v4().simple()));

        let result = match self.write_part(&part, stream, cancel).await {
            Ok(size) => self
                .publish(&part, filename)
                .await
                .map(|(filename, path)| StoredFile {
                    filename,
                    path,
                    size,
                }),
            Err(e) => Err(e),
        };

        match result {
            Ok(stored) => {
                debug!("Stored {} ({} bytes)", stored.path.display(), stored.size);
                Ok(stored)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&part).await {
                    if cleanup.kind() != ErrorKind::NotFound {
                        warn!("Could not remove partial file {}: {}", part.display(), cleanup);
                    }
                }
                Err(e)
            }
        }
    }
}

/// A plain file name: no separators, no parent references, not hidden.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

/// `scan.dcm` -> `scan_3.dcm` for `n == 3`; `n == 0` keeps the name.
fn numbered_name(filename: &str, n: usize) -> String {
    if n == 0 {
        return filename.to_string();
    }
    match filename.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{}{}", &filename[..dot], n, &filename[dot..]),
        _ => format!("{}_{}", filename, n),
    }
}
