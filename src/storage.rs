use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage domain '{0}'")]
    InvalidDomain(String),

    #[error("File store I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Uploaded bytes plus what the client told us about them.
#[derive(Debug, Clone, Default)]
pub struct FileUpload {
    pub bytes: Vec<u8>,
    pub original_name: String,
    pub mime_type: String,
}

impl FileUpload {
    pub fn new(bytes: impl Into<Vec<u8>>, original_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self { bytes: bytes.into(), original_name: original_name.into(), mime_type: mime_type.into() }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub stored_name: String,
    pub path: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub mime_type: String,
}

/// Where attachment bytes live. Writes happen outside any database transaction,
/// so callers pair every write with a `delete` on failure.
///
/// `place` fixes the final path without touching the disk.
#[async_trait]
pub trait FileStore: Send + Sync + 'static {
    fn place(&self, domain: &str, header_id: i64, upload: &FileUpload) -> Result<StoredFile, StorageError>;

    async fn write(&self, target: &StoredFile, bytes: &[u8]) -> Result<(), StorageError>;

    async fn store(&self, domain: &str, header_id: i64, upload: &FileUpload) -> Result<StoredFile, StorageError> {
        let target = self.place(domain, header_id, upload)?;
        self.write(&target, &upload.bytes).await?;
        Ok(target)
    }

    /// Removes a stored file. A file that is already gone is not an error.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;
}

/// Local-disk store laid out as `{root}/{domain}/{header_id}/{stored_name}`.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    fn place(&self, domain: &str, header_id: i64, upload: &FileUpload) -> Result<StoredFile, StorageError> {
        if domain.is_empty() || !domain.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
            return Err(StorageError::InvalidDomain(domain.to_string()));
        }

        let checksum = hex(&Sha256::digest(&upload.bytes));
        let stored_name = format!("{}-{}.{}", &checksum[..12], Uuid::new_v4(), extension(&upload.original_name));

        let path = self.root.join(domain).join(header_id.to_string()).join(&stored_name);
        Ok(StoredFile {
            stored_name,
            path: path.to_string_lossy().into_owned(),
            size_bytes: upload.size() as i64,
            checksum,
            mime_type: upload.mime_type.clone(),
        })
    }

    async fn write(&self, target: &StoredFile, bytes: &[u8]) -> Result<(), StorageError> {
        let path = Path::new(&target.path);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(path, bytes).await?;
        debug!(path = %target.path, size = bytes.len(), "Stored attachment");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path, "Attachment already absent on delete");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Lower-cased alphanumeric extension of the client's file name, `bin` otherwise.
fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|e| !e.is_empty() && e.len() <= 10 && e.bytes().all(|b| b.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}
