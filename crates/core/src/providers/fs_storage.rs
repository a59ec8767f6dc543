//! Filesystem object storage.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::config::StorageConfig;
use super::traits::ObjectStorage;
use super::ProviderError;

/// Stores objects as files under a root directory.
pub struct FsObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl FsObjectStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: config.root.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve a key to a path under the root, rejecting traversal.
    fn object_path(&self, key: &str) -> Result<PathBuf, ProviderError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(ProviderError::Storage(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ProviderError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ProviderError::Storage(e.to_string()))?;
        }

        // Write to a sibling temp file then rename, so readers never see a
        // partial object.
        let tmp = PathBuf::from(format!("{}.partial", path.display()));
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| ProviderError::Storage(e.to_string()))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| ProviderError::Storage(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| ProviderError::Storage(e.to_string()))?;
        drop(file);
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| ProviderError::Storage(e.to_string()))?;

        debug!(key, content_type, size = bytes.len(), "Stored object");
        Ok(self.public_url(key))
    }
}
