//! In-process swarm shared by several pods.
//!
//! Every [`MemorySwarm`] attached to the same [`SwarmHub`] sees the payloads
//! the others seed.  Used to run whole meshes inside one test process.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::{download_name, file_name, Locator, Magnet, SwarmTransfer};
use crate::error::{PodError, Result};

struct Seeded {
    bytes: Arc<Vec<u8>>,
    seeders: HashSet<String>,
}

#[derive(Default, Clone)]
pub struct SwarmHub {
    payloads: Arc<RwLock<HashMap<[u8; 32], Seeded>>>,
}

impl SwarmHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct payloads currently seeded by anyone.
    pub async fn seeded_count(&self) -> usize {
        self.payloads.read().await.len()
    }

    pub async fn is_seeded_by(&self, locator: &Locator, seeder: &str) -> bool {
        let Ok(magnet) = Magnet::parse(locator) else {
            return false;
        };
        self.payloads
            .read()
            .await
            .get(&magnet.digest)
            .is_some_and(|s| s.seeders.contains(seeder))
    }
}

/// One pod's handle on a [`SwarmHub`].
pub struct MemorySwarm {
    hub: SwarmHub,
    seeder: String,
    download_dir: PathBuf,
}

impl MemorySwarm {
    pub fn new(hub: SwarmHub, seeder: impl Into<String>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            hub,
            seeder: seeder.into(),
            download_dir: download_dir.into(),
        }
    }
}

#[async_trait]
impl SwarmTransfer for MemorySwarm {
    async fn seed(&self, path: &Path) -> Result<Locator> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PodError::Transfer(format!("cannot read {}: {e}", path.display())))?;
        let digest: [u8; 32] = Sha256::digest(&bytes).into();

        let mut payloads = self.hub.payloads.write().await;
        payloads
            .entry(digest)
            .or_insert_with(|| Seeded {
                bytes: Arc::new(bytes),
                seeders: HashSet::new(),
            })
            .seeders
            .insert(self.seeder.clone());
        debug!("{} seeding {}", self.seeder, hex::encode(digest));

        Ok(Magnet::new(digest, file_name(path), Vec::new()).to_locator())
    }

    async fn fetch(&self, locator: &Locator) -> Result<PathBuf> {
        let magnet = Magnet::parse(locator)?;
        let bytes = {
            let payloads = self.hub.payloads.read().await;
            match payloads.get(&magnet.digest) {
                Some(seeded) if !seeded.seeders.is_empty() => Arc::clone(&seeded.bytes),
                _ => {
                    return Err(PodError::Transfer(format!(
                        "no seeder for {}",
                        magnet.digest_hex()
                    )))
                }
            }
        };

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let target = self.download_dir.join(download_name(&magnet));
        tokio::fs::write(&target, bytes.as_slice()).await?;
        Ok(target)
    }

    async fn stop_seeding(&self, locator: &Locator) -> Result<()> {
        let magnet = Magnet::parse(locator)?;
        let mut payloads = self.hub.payloads.write().await;
        if let Some(seeded) = payloads.get_mut(&magnet.digest) {
            seeded.seeders.remove(&self.seeder);
            if seeded.seeders.is_empty() {
                payloads.remove(&magnet.digest);
            }
        }
        Ok(())
    }
}
