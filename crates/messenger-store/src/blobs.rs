//! Blob storage for profile pictures and message media.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, StoreError};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key` (e.g. `images/<file>`), replacing any previous blob.
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Resolve a stored key to a URL the blob can be fetched from.
    async fn download_url(&self, key: &str) -> Result<Url>;
}

/// Blobs as files below a base directory.
///
/// URLs are `<public_base>/<key>` when a public base is configured (files
/// served by some HTTP front end), `file://` URLs otherwise.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    base_path: PathBuf,
    public_base: Option<Url>,
    max_size: usize,
}

impl FsBlobStore {
    pub async fn new(base_path: PathBuf, public_base: Option<Url>, max_size: usize) -> Result<Self> {
        fs::create_dir_all(&base_path).await?;
        let base_path = base_path.canonicalize()?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            public_base,
            max_size,
        })
    }

    /// Map a key to a file below the base directory, refusing traversal.
    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        let invalid = |reason| StoreError::InvalidPath {
            path: key.to_string(),
            reason,
        };

        if key.is_empty() || key.contains('\\') {
            return Err(invalid("invalid blob key"));
        }

        let mut resolved = self.base_path.clone();
        for component in Path::new(key).components() {
            match component {
                Component::Normal(c) => resolved.push(c),
                _ => return Err(invalid("path traversal detected")),
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        if data.len() > self.max_size {
            return Err(StoreError::BlobTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let path = self.blob_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;

        debug!(key, size = data.len(), "Stored blob");
        Ok(())
    }

    async fn download_url(&self, key: &str) -> Result<Url> {
        let path = self.blob_path(key)?;
        if !fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(key.to_string()));
        }

        let url = match &self.public_base {
            Some(base) => {
                let mut base = base.clone();
                if !base.path().ends_with('/') {
                    base.set_path(&format!("{}/", base.path()));
                }
                base.join(key).map_err(|_| StoreError::InvalidPath {
                    path: key.to_string(),
                    reason: "not representable as URL",
                })?
            }
            None => Url::from_file_path(&path).map_err(|_| StoreError::InvalidPath {
                path: key.to_string(),
                reason: "not representable as URL",
            })?,
        };

        debug!(key, %url, "Resolved blob URL");
        Ok(url)
    }
}
