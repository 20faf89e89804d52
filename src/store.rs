use crate::{config, error::StoreError, item::StorageKey};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Durable named-object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &StorageKey, bytes: Vec<u8>) -> Result<(), StoreError>;
}

pub fn from_config(cfg: &config::Store) -> Result<Arc<dyn ObjectStore>> {
    match cfg.backend.as_str() {
        "fs" => Ok(Arc::new(FsObjectStore::new(&cfg.root))),
        "http" => Ok(Arc::new(HttpObjectStore::new(cfg)?)),
        other => Err(anyhow!("unknown store.backend: {other}")),
    }
}

/// Rejects key parts that could escape their label directory.
fn check_component(part: &str, key: &StorageKey) -> Result<(), StoreError> {
    if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Objects as files under `root/<label>/<name>`.
pub struct FsObjectStore {
    root: PathBuf,
    seq: AtomicU64,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.root.join(&key.label).join(&key.name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &StorageKey, bytes: Vec<u8>) -> Result<(), StoreError> {
        check_component(&key.label, key)?;
        check_component(&key.name, key)?;

        let dest = self.path_for(key);
        let dir = self.root.join(&key.label);
        tokio::fs::create_dir_all(&dir).await?;

        // Write-then-rename so readers never see a partial object.
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".{}.{seq}.partial", key.name));
        let mut f = tokio::fs::File::create(&tmp).await?;
        f.write_all(&bytes).await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp, &dest).await?;
        debug!("stored {} bytes at {}", bytes.len(), dest.display());
        Ok(())
    }
}

/// Objects PUT to `{base_url}/{label}/{name}`.
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(cfg: &config::Store) -> Result<Self> {
        if cfg.base_url.is_empty() {
            return Err(anyhow!("store.base_url is required for the http backend"));
        }
        let bearer_token = if cfg.bearer_token_env.is_empty() {
            None
        } else {
            Some(std::env::var(&cfg.bearer_token_env).with_context(|| {
                format!("reading store token from ${}", cfg.bearer_token_env)
            })?)
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds.max(1)))
            .build()
            .with_context(|| "building HTTP client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            bearer_token,
        })
    }

    pub fn url_for(&self, key: &StorageKey) -> String {
        format!("{}/{}/{}", self.base_url, key.label, key.name)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &StorageKey, bytes: Vec<u8>) -> Result<(), StoreError> {
        check_component(&key.label, key)?;
        check_component(&key.name, key)?;

        let mut req = self.client.put(self.url_for(key)).body(bytes);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(StoreError::Status {
                key: key.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(label: &str, name: &str) -> StorageKey {
        StorageKey {
            label: label.into(),
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn fs_store_writes_under_label() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put(&key("cats", "a.jpg"), b"one".to_vec()).await.unwrap();
        store.put(&key("cats", "a.jpg"), b"two".to_vec()).await.unwrap();

        let written = std::fs::read(dir.path().join("cats").join("a.jpg")).unwrap();
        assert_eq!(written, b"two");
        let entries = std::fs::read_dir(dir.path().join("cats")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn fs_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = store.put(&key("..", "a.jpg"), vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn http_store_url() {
        let cfg = config::Store {
            backend: "http".into(),
            base_url: "http://bucket.local/images/".into(),
            ..Default::default()
        };
        let store = HttpObjectStore::new(&cfg).unwrap();
        assert_eq!(
            store.url_for(&key("cats", "a.jpg")),
            "http://bucket.local/images/cats/a.jpg"
        );
    }

    #[test]
    fn unknown_backend() {
        let cfg = config::Store {
            backend: "tape".into(),
            ..Default::default()
        };
        assert!(from_config(&cfg).is_err());
    }
}
