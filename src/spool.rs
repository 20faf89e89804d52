//! Per-item transient buffer between pipeline stages.
//!
//! Held in memory by default. With `spool.to_disk` the bytes live in
//! `work_dir/<label>/<name>.<seq>` instead; `seq` keeps items with the same
//! basename from sharing a file.

use crate::{config, item::StorageKey};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub struct Spool {
    work_dir: Option<PathBuf>,
    keep_intermediates: bool,
    seq: AtomicU64,
}

impl Spool {
    pub fn in_memory() -> Self {
        Self {
            work_dir: None,
            keep_intermediates: false,
            seq: AtomicU64::new(0),
        }
    }

    pub fn on_disk(work_dir: impl Into<PathBuf>, keep_intermediates: bool) -> Self {
        Self {
            work_dir: Some(work_dir.into()),
            keep_intermediates,
            seq: AtomicU64::new(0),
        }
    }

    pub fn from_config(spool: &config::Spool, paths: &config::Paths) -> Self {
        if spool.to_disk {
            Self::on_disk(&paths.work_dir, spool.keep_intermediates)
        } else {
            Self::in_memory()
        }
    }

    pub async fn hold(&self, key: &StorageKey, bytes: Vec<u8>) -> io::Result<ItemBuffer> {
        let Some(work_dir) = &self.work_dir else {
            return Ok(ItemBuffer::Memory(bytes));
        };
        let dir = work_dir.join(&key.label);
        tokio::fs::create_dir_all(&dir).await?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{}.{seq}", key.name));
        tokio::fs::write(&path, &bytes).await?;
        debug!("spooled {} bytes to {}", bytes.len(), path.display());
        Ok(ItemBuffer::Disk {
            path,
            keep: self.keep_intermediates,
        })
    }
}

pub enum ItemBuffer {
    Memory(Vec<u8>),
    Disk { path: PathBuf, keep: bool },
}

impl ItemBuffer {
    /// Current contents. Moves the bytes out of a memory buffer.
    pub async fn load(&mut self) -> io::Result<Vec<u8>> {
        match self {
            ItemBuffer::Memory(bytes) => Ok(std::mem::take(bytes)),
            ItemBuffer::Disk { path, .. } => tokio::fs::read(&*path).await,
        }
    }

    pub async fn replace(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        match self {
            ItemBuffer::Memory(slot) => {
                *slot = bytes;
                Ok(())
            }
            ItemBuffer::Disk { path, .. } => tokio::fs::write(&*path, bytes).await,
        }
    }

    pub async fn release(self) {
        if let ItemBuffer::Disk { path, keep: false } = self {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("removing spool file {}: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StorageKey {
        StorageKey {
            label: "cats".into(),
            name: "a.jpg".into(),
        }
    }

    #[tokio::test]
    async fn disk_buffer_round_trip_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::on_disk(dir.path(), false);
        let mut buf = spool.hold(&key(), b"raw".to_vec()).await.unwrap();
        assert_eq!(buf.load().await.unwrap(), b"raw");
        buf.replace(b"gray".to_vec()).await.unwrap();
        assert_eq!(buf.load().await.unwrap(), b"gray");
        buf.release().await;
        assert_eq!(std::fs::read_dir(dir.path().join("cats")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn same_key_gets_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::on_disk(dir.path(), true);
        let a = spool.hold(&key(), b"1".to_vec()).await.unwrap();
        let b = spool.hold(&key(), b"2".to_vec()).await.unwrap();
        a.release().await;
        b.release().await;
        assert_eq!(std::fs::read_dir(dir.path().join("cats")).unwrap().count(), 2);
    }
}
