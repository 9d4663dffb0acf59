//! In-process mesh: pods living in the same process call each other
//! directly.  Any pod can be severed to make it unreachable.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;

use super::PodClient;
use crate::error::{PodError, Result};
use crate::pod::Pod;
use crate::types::{JoinRequest, JoinResponse, LeaveRequest, PodUrl, Propagation};

#[derive(Default)]
pub struct LocalMesh {
    pods: RwLock<HashMap<PodUrl, Weak<Pod>>>,
    severed: RwLock<HashSet<PodUrl>>,
}

impl LocalMesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn attach(&self, pod: &Arc<Pod>) {
        self.pods
            .write()
            .await
            .insert(pod.url().clone(), Arc::downgrade(pod));
    }

    /// Calls to `pod` fail as unreachable until [`LocalMesh::restore`].
    pub async fn sever(&self, pod: &PodUrl) {
        debug!("Severing {}", pod);
        self.severed.write().await.insert(pod.clone());
    }

    pub async fn restore(&self, pod: &PodUrl) {
        self.severed.write().await.remove(pod);
    }

    async fn resolve(&self, target: &PodUrl) -> Result<Arc<Pod>> {
        let unreachable = |reason: &str| PodError::Unreachable {
            pod: target.clone(),
            reason: reason.to_string(),
        };
        if self.severed.read().await.contains(target) {
            return Err(unreachable("severed"));
        }
        self.pods
            .read()
            .await
            .get(target)
            .and_then(Weak::upgrade)
            .ok_or_else(|| unreachable("no such pod"))
    }
}

#[async_trait]
impl PodClient for LocalMesh {
    async fn join(&self, target: &PodUrl, request: &JoinRequest) -> Result<JoinResponse> {
        self.resolve(target).await?.accept_join(request.clone()).await
    }

    async fn announce(&self, target: &PodUrl, request: &JoinRequest) -> Result<()> {
        self.resolve(target).await?.accept_announce(request.clone()).await
    }

    async fn leave(&self, target: &PodUrl, request: &LeaveRequest) -> Result<()> {
        self.resolve(target).await?.accept_leave(&request.url).await
    }

    async fn propagate(&self, target: &PodUrl, message: &Propagation) -> Result<()> {
        self.resolve(target).await?.receive(message.clone()).await
    }
}
