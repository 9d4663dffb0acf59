//! The video record replicated across the mesh, and the rules a record
//! must satisfy before a pod accepts it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PodError, Result};
use crate::swarm::{Locator, Magnet};
use crate::types::{PodUrl, VideoId};

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_DESCRIPTION_LEN: usize = 5_000;

/// A video as every pod in the mesh sees it.
///
/// Write-once: nothing in a record changes after the origin created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: VideoId,
    pub name: String,
    pub description: String,
    /// URL of the origin pod, never of a relay.
    pub pod_url: PodUrl,
    #[serde(rename = "magnetUri")]
    pub locator: Locator,
    /// Unix milliseconds, origin clock.
    pub created_at: u64,
}

impl VideoRecord {
    /// Check a record received from `origin` before it enters the catalog.
    pub fn validate_remote(&self, origin: &PodUrl) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(PodError::Validation("video id is empty".into()));
        }
        validate_text("name", &self.name, MAX_NAME_LEN)?;
        validate_text("description", &self.description, MAX_DESCRIPTION_LEN)?;
        if &self.pod_url != origin {
            return Err(PodError::Validation(format!(
                "video {} claims origin {} but arrived as {}",
                self.id, self.pod_url, origin
            )));
        }
        Magnet::parse(&self.locator)?;
        Ok(())
    }
}

/// A publish request as a client issues it to its own pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewVideo {
    pub name: String,
    pub description: String,
    /// Local file holding the payload.
    pub path: PathBuf,
}

impl NewVideo {
    pub fn new(name: impl Into<String>, description: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            path: path.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_text("name", &self.name, MAX_NAME_LEN)?;
        validate_text("description", &self.description, MAX_DESCRIPTION_LEN)?;
        if self.path.as_os_str().is_empty() {
            return Err(PodError::Validation("payload path is empty".into()));
        }
        Ok(())
    }
}

fn validate_text(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PodError::Validation(format!("{field} is required")));
    }
    if value.chars().count() > max_len {
        return Err(PodError::Validation(format!(
            "{field} is longer than {max_len} characters"
        )));
    }
    Ok(())
}

/// Hands out video ids for one pod.
///
/// Ids hash the pod url together with a per-pod counter and the clock, so
/// they stay unique across the mesh without coordination.
#[derive(Debug)]
pub struct IdGenerator {
    origin: PodUrl,
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new(origin: PodUrl) -> Self {
        Self {
            origin,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> VideoId {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(self.origin.as_str().as_bytes());
        hasher.update(seq.to_be_bytes());
        hasher.update(nanos.to_be_bytes());
        let digest = hasher.finalize();
        VideoId::new(hex::encode(&digest[..12]))
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
