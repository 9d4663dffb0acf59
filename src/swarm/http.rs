//! Swarm adapter that moves payloads over plain HTTP.
//!
//! Seeding registers a file under its digest; the pod's router serves it on
//! `GET /api/v1/swarm/{digest}` and the locator lists that URL as an exact
//! source.  Fetching walks the sources in order, streams the body to disk
//! while hashing it and keeps the file only if the digest matches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::{digest_file, download_name, file_name, Locator, Magnet, SwarmTransfer};
use crate::error::{PodError, Result};
use crate::types::PodUrl;

pub const SWARM_PATH: &str = "/api/v1/swarm";

pub struct HttpSwarm {
    public_url: PodUrl,
    download_dir: PathBuf,
    client: Client,
    seeds: RwLock<HashMap<[u8; 32], PathBuf>>,
    part_counter: AtomicU64,
}

impl HttpSwarm {
    pub fn new(public_url: PodUrl, download_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PodError::Transfer(format!("cannot build http client: {e}")))?;
        Ok(Self {
            public_url,
            download_dir: download_dir.into(),
            client,
            seeds: RwLock::new(HashMap::new()),
            part_counter: AtomicU64::new(0),
        })
    }

    /// Local file seeded under the hex digest, if any.
    pub async fn seeded_path(&self, digest_hex: &str) -> Option<PathBuf> {
        let digest: [u8; 32] = hex::decode(digest_hex).ok()?.try_into().ok()?;
        self.seeds.read().await.get(&digest).cloned()
    }

    async fn download(&self, source: &str, magnet: &Magnet) -> Result<PathBuf> {
        let mut resp = self
            .client
            .get(source)
            .send()
            .await
            .map_err(|e| PodError::Transfer(format!("{source}: {e}")))?;
        if !resp.status().is_success() {
            return Err(PodError::Transfer(format!("{source}: status {}", resp.status())));
        }

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let part = self.download_dir.join(format!(
            "{}.{}.part",
            magnet.digest_hex(),
            self.part_counter.fetch_add(1, Ordering::Relaxed)
        ));
        let mut file = tokio::fs::File::create(&part).await?;
        let mut hasher = Sha256::new();
        loop {
            let chunk = match resp.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&part).await;
                    return Err(PodError::Transfer(format!("{source}: {e}")));
                }
            };
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        let digest: [u8; 32] = hasher.finalize().into();
        if digest != magnet.digest {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(PodError::Transfer(format!(
                "{source}: digest mismatch, got {}",
                hex::encode(digest)
            )));
        }

        let target = self.download_dir.join(download_name(magnet));
        tokio::fs::rename(&part, &target).await?;
        Ok(target)
    }
}

#[async_trait]
impl SwarmTransfer for HttpSwarm {
    async fn seed(&self, path: &Path) -> Result<Locator> {
        let digest = digest_file(path).await?;
        let magnet = Magnet::new(
            digest,
            file_name(path),
            vec![self
                .public_url
                .endpoint(&format!("{SWARM_PATH}/{}", hex::encode(digest)))],
        );
        self.seeds.write().await.insert(digest, path.to_path_buf());
        debug!("Seeding {} from {}", magnet.digest_hex(), path.display());
        Ok(magnet.to_locator())
    }

    async fn fetch(&self, locator: &Locator) -> Result<PathBuf> {
        let magnet = Magnet::parse(locator)?;
        if let Some(path) = self.seeds.read().await.get(&magnet.digest) {
            return Ok(path.clone());
        }

        let cached = self.download_dir.join(download_name(&magnet));
        if tokio::fs::try_exists(&cached).await.unwrap_or(false)
            && digest_file(&cached).await.ok() == Some(magnet.digest)
        {
            return Ok(cached);
        }

        if magnet.sources.is_empty() {
            return Err(PodError::Transfer(format!(
                "locator for {} has no sources",
                magnet.digest_hex()
            )));
        }

        let mut failures = Vec::new();
        for source in &magnet.sources {
            match self.download(source, &magnet).await {
                Ok(path) => {
                    info!("Fetched {} from {}", magnet.digest_hex(), source);
                    return Ok(path);
                }
                Err(e) => {
                    warn!("Fetch of {} failed: {}", magnet.digest_hex(), e);
                    failures.push(e.to_string());
                }
            }
        }
        Err(PodError::Transfer(failures.join("; ")))
    }

    async fn stop_seeding(&self, locator: &Locator) -> Result<()> {
        let magnet = Magnet::parse(locator)?;
        if self.seeds.write().await.remove(&magnet.digest).is_some() {
            debug!("Stopped seeding {}", magnet.digest_hex());
        }
        Ok(())
    }
}
