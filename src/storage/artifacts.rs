//! Blob storage for dataset files and trained weights.
//!
//! Blobs are addressed by `<namespace>/<relative path>` keys. Each dataset owns
//! one namespace; trained policy archives live under [`WEIGHTS_NAMESPACE`].

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use walkdir::WalkDir;

/// Namespace holding trained policy archives.
pub const WEIGHTS_NAMESPACE: &str = "weights";

/// Errors that can occur during blob storage operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob key '{0}'")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection failure or timeout talking to a remote store.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Blob service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request error: {0}")]
    Request(String),
}

/// Metadata of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub key: String,
    pub size: u64,
    /// Hex SHA-256 of the content.
    pub sha256: String,
}

/// Named byte stream storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Allocates a namespace. Idempotent.
    async fn create_namespace(&self, namespace: &str) -> Result<(), BlobError>;
    async fn put(&self, key: &str, data: &[u8]) -> Result<BlobMeta, BlobError>;
    async fn put_file(&self, key: &str, src: &Path) -> Result<BlobMeta, BlobError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;
    /// Writes the blob at `key` to `dest`, creating parent directories. Returns bytes written.
    async fn fetch_to(&self, key: &str, dest: &Path) -> Result<u64, BlobError>;
    /// Relative paths of every blob in `namespace`, sorted.
    async fn list(&self, namespace: &str) -> Result<Vec<String>, BlobError>;

    /// Local directory backing `namespace`, when the store is filesystem-backed.
    fn namespace_dir(&self, _namespace: &str) -> Option<PathBuf> {
        None
    }
}

pub fn compute_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Checks that `key` is `<namespace>/<relative path>` with no escaping components.
pub fn validate_key(key: &str) -> Result<(), BlobError> {
    let path = Path::new(key);
    let mut normal = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => normal += 1,
            _ => return Err(BlobError::InvalidKey(key.to_string())),
        }
    }
    if normal < 2 || key.contains('\\') {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Checks a bare namespace name.
pub fn validate_namespace(namespace: &str) -> Result<(), BlobError> {
    let mut components = Path::new(namespace).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !namespace.contains('\\') => Ok(()),
        _ => Err(BlobError::InvalidKey(namespace.to_string())),
    }
}

/// [`BlobStore`] on the local filesystem: one directory per namespace.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    async fn ensure_parent(path: &Path) -> Result<(), BlobError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn not_found(key: &str, e: std::io::Error) -> BlobError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BlobError::NotFound(key.to_string())
    } else {
        BlobError::Io(e)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn create_namespace(&self, namespace: &str) -> Result<(), BlobError> {
        validate_namespace(namespace)?;
        fs::create_dir_all(self.root.join(namespace)).await?;
        Ok(())
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<BlobMeta, BlobError> {
        let path = self.blob_path(key)?;
        Self::ensure_parent(&path).await?;
        fs::write(&path, data).await?;

        tracing::debug!(key = key, size = data.len(), "Blob stored");
        Ok(BlobMeta {
            key: key.to_string(),
            size: data.len() as u64,
            sha256: compute_checksum(data),
        })
    }

    async fn put_file(&self, key: &str, src: &Path) -> Result<BlobMeta, BlobError> {
        let data = fs::read(src).await.map_err(|e| not_found(&src.display().to_string(), e))?;
        self.put(key, &data).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.blob_path(key)?;
        fs::read(&path).await.map_err(|e| not_found(key, e))
    }

    async fn fetch_to(&self, key: &str, dest: &Path) -> Result<u64, BlobError> {
        let path = self.blob_path(key)?;
        Self::ensure_parent(dest).await?;
        fs::copy(&path, dest).await.map_err(|e| not_found(key, e))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>, BlobError> {
        validate_namespace(namespace)?;
        let dir = self.root.join(namespace);
        if !dir.is_dir() {
            return Err(BlobError::NotFound(namespace.to_string()));
        }

        tokio::task::spawn_blocking(move || {
            let mut files: Vec<String> = WalkDir::new(&dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| {
                    e.path().strip_prefix(&dir).ok().map(|rel| {
                        rel.components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect::<Vec<_>>()
                            .join("/")
                    })
                })
                .collect();
            files.sort();
            files
        })
        .await
        .map_err(|e| BlobError::Io(std::io::Error::other(e)))
    }

    fn namespace_dir(&self, namespace: &str) -> Option<PathBuf> {
        validate_namespace(namespace).ok()?;
        Some(self.root.join(namespace))
    }
}
