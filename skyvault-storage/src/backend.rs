// Copyright 2025 Skyvault (https://github.com/skyvault)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Object storage backend abstraction for the cold tier.
//!
//! The production deployment talks to an S3-compatible store; tests and
//! embedded use run against the in-memory or local-filesystem backends.
//! Keys are slash-separated paths; custom metadata rides along with each
//! object.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use skyvault_core::{Result, SkyvaultError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Metadata returned by a HEAD request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub size: u64,
    pub custom: BTreeMap<String, String>,
}

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()>;

    /// `None` when the object does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Metadata without the body; `None` when the object does not exist.
    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys under a prefix, unordered.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory backend for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: DashMap<String, (Vec<u8>, ObjectMetadata)>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        let meta = ObjectMetadata {
            size: data.len() as u64,
            custom: metadata,
        };
        self.objects.insert(key.to_string(), (data, meta));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.get(key).map(|entry| entry.0.clone()))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        Ok(self.objects.get(key).map(|entry| entry.1.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

/// Local filesystem backend. Custom metadata is kept in a `.meta` sidecar
/// next to each object.
#[derive(Debug)]
pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.meta"))
    }
}

#[async_trait]
impl ObjectBackend for LocalFsBackend {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let meta = ObjectMetadata {
            size: data.len() as u64,
            custom: metadata,
        };
        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| SkyvaultError::Storage(format!("metadata encode: {e}")))?;

        tokio::fs::write(&path, data).await?;
        tokio::fs::write(self.meta_path(key), meta_json).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.object_path(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        match tokio::fs::read(self.meta_path(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                SkyvaultError::Storage(format!("metadata decode: {e}"))
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        for path in [self.object_path(key), self.meta_path(key)] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if path.extension().map(|ext| ext == "meta").unwrap_or(false) {
                    continue;
                }
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel.to_string_lossy().replace('\\', "/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(backend: &dyn ObjectBackend) {
        let mut meta = BTreeMap::new();
        meta.insert("count".to_string(), "3".to_string());

        backend
            .put("auctions/X/2023/01.blob", vec![1, 2, 3], meta)
            .await
            .unwrap();

        let body = backend.get("auctions/X/2023/01.blob").await.unwrap().unwrap();
        assert_eq!(body, vec![1, 2, 3]);

        let head = backend.head("auctions/X/2023/01.blob").await.unwrap().unwrap();
        assert_eq!(head.size, 3);
        assert_eq!(head.custom.get("count").map(String::as_str), Some("3"));

        assert!(backend.get("auctions/X/2023/02.blob").await.unwrap().is_none());
        assert!(backend.head("auctions/X/2023/02.blob").await.unwrap().is_none());

        let keys = backend.list("auctions/X/").await.unwrap();
        assert_eq!(keys, vec!["auctions/X/2023/01.blob".to_string()]);

        backend.delete("auctions/X/2023/01.blob").await.unwrap();
        assert!(backend.get("auctions/X/2023/01.blob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_backend_round_trip() {
        exercise(&MemoryBackend::new()).await;
    }

    #[tokio::test]
    async fn local_fs_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&LocalFsBackend::new(dir.path())).await;
    }
}
