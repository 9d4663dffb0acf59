//! Durable per-pod state: the catalog and the peer set.
//!
//! Each is saved as a whole snapshot.  Nothing here is shared between
//! pods.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::catalog::CatalogEntry;
use crate::error::Result;
use crate::types::PodUrl;

const CATALOG_FILE: &str = "catalog.json";
const PEERS_FILE: &str = "peers.json";

#[async_trait]
pub trait Store: Send + Sync {
    async fn load_catalog(&self) -> Result<Vec<CatalogEntry>>;
    async fn save_catalog(&self, entries: &[CatalogEntry]) -> Result<()>;
    async fn load_peers(&self) -> Result<Vec<PodUrl>>;
    async fn save_peers(&self, peers: &[PodUrl]) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    catalog: RwLock<Vec<CatalogEntry>>,
    peers: RwLock<Vec<PodUrl>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_catalog(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.catalog.read().await.clone())
    }

    async fn save_catalog(&self, entries: &[CatalogEntry]) -> Result<()> {
        *self.catalog.write().await = entries.to_vec();
        Ok(())
    }

    async fn load_peers(&self) -> Result<Vec<PodUrl>> {
        Ok(self.peers.read().await.clone())
    }

    async fn save_peers(&self, peers: &[PodUrl]) -> Result<()> {
        *self.peers.write().await = peers.to_vec();
        Ok(())
    }
}

/// JSON files in a data directory, replaced atomically on every save.
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Arc<Self>> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Arc::new(Self { dir }))
    }

    async fn read<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn load_catalog(&self) -> Result<Vec<CatalogEntry>> {
        self.read(CATALOG_FILE).await
    }

    async fn save_catalog(&self, entries: &[CatalogEntry]) -> Result<()> {
        self.write(CATALOG_FILE, entries).await
    }

    async fn load_peers(&self) -> Result<Vec<PodUrl>> {
        self.read(PEERS_FILE).await
    }

    async fn save_peers(&self, peers: &[PodUrl]) -> Result<()> {
        self.write(PEERS_FILE, peers).await
    }
}

/// [`MemoryStore`] whose writes can be switched to fail.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FlakyStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_writes(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::error::PodError::Storage("disk full".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl Store for FlakyStore {
    async fn load_catalog(&self) -> Result<Vec<CatalogEntry>> {
        self.inner.load_catalog().await
    }

    async fn save_catalog(&self, entries: &[CatalogEntry]) -> Result<()> {
        self.check()?;
        self.inner.save_catalog(entries).await
    }

    async fn load_peers(&self) -> Result<Vec<PodUrl>> {
        self.inner.load_peers().await
    }

    async fn save_peers(&self, peers: &[PodUrl]) -> Result<()> {
        self.check()?;
        self.inner.save_peers(peers).await
    }
}
