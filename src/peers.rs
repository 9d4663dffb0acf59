//! The set of pods this pod treats as friends.

use std::sync::Arc;

use log::info;
use tokio::sync::{Mutex, RwLock};

use crate::error::{PodError, Result};
use crate::store::Store;
use crate::types::PodUrl;

/// Outcome of [`PeerRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Added,
    AlreadyKnown,
}

/// Friends of one pod, in the order they were added.
///
/// Owned by the pod for its whole life: [`PeerRegistry::load`] at start-up,
/// [`PeerRegistry::flush`] at shutdown.  Every change is written through to
/// the store before it becomes visible.
pub struct PeerRegistry {
    self_url: PodUrl,
    capacity: usize,
    peers: RwLock<Vec<PodUrl>>,
    store: Arc<dyn Store>,
    save: Mutex<()>,
}

impl PeerRegistry {
    pub async fn load(self_url: PodUrl, capacity: usize, store: Arc<dyn Store>) -> Result<Self> {
        let mut peers: Vec<PodUrl> = Vec::new();
        for peer in store.load_peers().await? {
            if peer != self_url && !peers.contains(&peer) {
                peers.push(peer);
            }
        }
        if !peers.is_empty() {
            info!("Restored {} friends", peers.len());
        }
        Ok(Self {
            self_url,
            capacity,
            peers: RwLock::new(peers),
            store,
            save: Mutex::new(()),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn list(&self) -> Vec<PodUrl> {
        self.peers.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, pod: &PodUrl) -> bool {
        self.peers.read().await.contains(pod)
    }

    /// Whether [`PeerRegistry::add`] would accept `pod` right now.
    pub async fn has_room_for(&self, pod: &PodUrl) -> bool {
        let peers = self.peers.read().await;
        peers.contains(pod) || peers.len() < self.capacity
    }

    /// Register `pod`.  Adding a known pod is a no-op; adding a new one to
    /// a full registry is refused.
    pub async fn add(&self, pod: PodUrl) -> Result<Admission> {
        if pod == self.self_url {
            return Err(PodError::Validation(format!("{pod} is this pod")));
        }
        let _save = self.save.lock().await;
        let mut next = self.peers.read().await.clone();
        if next.contains(&pod) {
            return Ok(Admission::AlreadyKnown);
        }
        if next.len() >= self.capacity {
            return Err(PodError::Refused {
                pod: self.self_url.clone(),
                reason: format!("peer capacity of {} reached", self.capacity),
            });
        }
        next.push(pod.clone());
        self.store.save_peers(&next).await?;
        *self.peers.write().await = next;
        info!("New friend: {}", pod);
        Ok(Admission::Added)
    }

    /// Forget `pod`.  Returns `false` if it was not a friend.
    pub async fn remove(&self, pod: &PodUrl) -> Result<bool> {
        let _save = self.save.lock().await;
        let mut next = self.peers.read().await.clone();
        let before = next.len();
        next.retain(|p| p != pod);
        if next.len() == before {
            return Ok(false);
        }
        self.store.save_peers(&next).await?;
        *self.peers.write().await = next;
        info!("Friendship with {} ended", pod);
        Ok(true)
    }

    pub async fn flush(&self) -> Result<()> {
        let _save = self.save.lock().await;
        let snapshot = self.list().await;
        self.store.save_peers(&snapshot).await
    }
}
