use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::{PodError, Result};

pub mod http;
pub mod magnet;
pub mod memory;

pub use http::HttpSwarm;
pub use magnet::{Locator, Magnet};
pub use memory::{MemorySwarm, SwarmHub};

/// Capabilities the catalog needs from a swarm transfer engine.
#[async_trait]
pub trait SwarmTransfer: Send + Sync {
    /// Start seeding the file at `path` and return its locator.
    /// Seeding the same bytes again yields the same locator.
    async fn seed(&self, path: &Path) -> Result<Locator>;

    /// Download the payload behind `locator` and return the local file.
    /// May take as long as the transfer does.
    async fn fetch(&self, locator: &Locator) -> Result<PathBuf>;

    /// Stop seeding the payload behind `locator`.  Unknown locators are ignored.
    async fn stop_seeding(&self, locator: &Locator) -> Result<()>;
}

/// SHA-256 of a file, read incrementally.
pub async fn digest_file(path: &Path) -> Result<[u8; 32]> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| PodError::Transfer(format!("cannot open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| PodError::Transfer(format!("cannot read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// File name a downloaded payload is stored under: the digest, plus the
/// extension of the advertised name when it has a sane one.
pub(crate) fn download_name(magnet: &Magnet) -> String {
    let ext = magnet
        .display_name
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("{}.{}", magnet.digest_hex(), ext),
        None => magnet.digest_hex(),
    }
}

pub(crate) fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}
