//! Local content store: every video this pod knows about, in arrival order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::Result;
use crate::store::Store;
use crate::types::{PodUrl, VideoId};
use crate::video::VideoRecord;

/// A record plus what this pod holds locally for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub video: VideoRecord,
    /// Local copy of the payload: the published file on the origin, the
    /// downloaded file elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<PathBuf>,
}

#[derive(Default, Clone)]
struct Entries {
    order: Vec<VideoId>,
    by_id: HashMap<VideoId, CatalogEntry>,
}

impl Entries {
    fn snapshot(&self) -> Vec<CatalogEntry> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .cloned()
            .collect()
    }

    fn take(&mut self, id: &VideoId) -> Option<CatalogEntry> {
        let entry = self.by_id.remove(id)?;
        self.order.retain(|other| other != id);
        Some(entry)
    }
}

/// Every mutation is written to the store before it becomes visible, so a
/// failed write leaves the catalog as it was.  Writers are serialised;
/// readers never wait on the store.
pub struct Catalog {
    entries: RwLock<Entries>,
    store: Arc<dyn Store>,
    writer: Mutex<()>,
}

impl Catalog {
    pub async fn load(store: Arc<dyn Store>) -> Result<Self> {
        let mut entries = Entries::default();
        for entry in store.load_catalog().await? {
            let id = entry.video.id.clone();
            if entries.by_id.insert(id.clone(), entry).is_none() {
                entries.order.push(id);
            }
        }
        Ok(Self {
            entries: RwLock::new(entries),
            store,
            writer: Mutex::new(()),
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn list(&self) -> Vec<VideoRecord> {
        let entries = self.entries.read().await;
        entries
            .order
            .iter()
            .filter_map(|id| entries.by_id.get(id))
            .map(|entry| entry.video.clone())
            .collect()
    }

    /// Every entry with what this pod holds for it, in arrival order.
    pub async fn entries(&self) -> Vec<CatalogEntry> {
        self.entries.read().await.snapshot()
    }

    pub async fn get(&self, id: &VideoId) -> Option<CatalogEntry> {
        self.entries.read().await.by_id.get(id).cloned()
    }

    /// Case-insensitive substring match on the name.
    pub async fn search(&self, query: &str) -> Vec<VideoRecord> {
        let needle = query.to_lowercase();
        self.list()
            .await
            .into_iter()
            .filter(|video| video.name.to_lowercase().contains(&needle))
            .collect()
    }

    /// Entries published by `origin`, in arrival order.
    pub async fn by_origin(&self, origin: &PodUrl) -> Vec<CatalogEntry> {
        self.entries()
            .await
            .into_iter()
            .filter(|entry| &entry.video.pod_url == origin)
            .collect()
    }

    /// Append an entry.  Returns `false` and changes nothing when the id is
    /// already present.  The entry is durable when this returns.
    pub async fn insert(&self, entry: CatalogEntry) -> Result<bool> {
        let added = self
            .commit(|entries| {
                let id = entry.video.id.clone();
                if entries.by_id.contains_key(&id) {
                    return None;
                }
                entries.by_id.insert(id.clone(), entry);
                entries.order.push(id);
                Some(())
            })
            .await?;
        Ok(added.is_some())
    }

    pub async fn remove(&self, id: &VideoId) -> Result<Option<CatalogEntry>> {
        self.commit(|entries| entries.take(id)).await
    }

    /// Remove every entry published by `origin`.
    pub async fn remove_origin(&self, origin: &PodUrl) -> Result<Vec<CatalogEntry>> {
        let removed = self
            .commit(|entries| {
                let ids: Vec<VideoId> = entries
                    .order
                    .iter()
                    .filter(|id| entries.by_id.get(*id).is_some_and(|e| &e.video.pod_url == origin))
                    .cloned()
                    .collect();
                if ids.is_empty() {
                    return None;
                }
                Some(ids.iter().filter_map(|id| entries.take(id)).collect::<Vec<_>>())
            })
            .await?;
        Ok(removed.unwrap_or_default())
    }

    /// Remember where the payload of `id` lives locally.  Returns `false`
    /// when the entry is gone.
    pub async fn set_payload(&self, id: &VideoId, path: PathBuf) -> Result<bool> {
        let updated = self
            .commit(|entries| {
                entries.by_id.get_mut(id)?.payload = Some(path);
                Some(())
            })
            .await?;
        Ok(updated.is_some())
    }

    /// Write the current state to the store.
    pub async fn flush(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        let snapshot = self.entries().await;
        self.store.save_catalog(&snapshot).await
    }

    /// Apply `change` to a copy of the entries, persist the copy and only
    /// then publish it.  `None` from `change` means nothing changed.
    async fn commit<T>(&self, change: impl FnOnce(&mut Entries) -> Option<T>) -> Result<Option<T>> {
        let _writer = self.writer.lock().await;
        let mut next = self.entries.read().await.clone();
        let Some(outcome) = change(&mut next) else {
            return Ok(None);
        };
        self.store.save_catalog(&next.snapshot()).await?;
        *self.entries.write().await = next;
        Ok(Some(outcome))
    }
}
