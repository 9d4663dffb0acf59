//! A pod: local catalog, friends, and the rules that keep the catalogs of
//! friends converging.
//!
//! Local writes complete synchronously and are then broadcast to every
//! friend through the [`Propagator`].  Writes arriving from friends go
//! through [`Pod::receive`], which validates provenance and never fails on
//! stale or duplicate input.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use log::{debug, info, warn};
use tokio::sync::RwLock;

use crate::catalog::{Catalog, CatalogEntry};
use crate::error::{PodError, Result};
use crate::peers::{Admission, PeerRegistry};
use crate::propagation::{Dispatch, Outbound, Propagator};
use crate::store::Store;
use crate::swarm::{Locator, Magnet, SwarmTransfer};
use crate::transport::PodClient;
use crate::types::{JoinRequest, JoinResponse, LeaveRequest, PodUrl, Propagation, VideoId};
use crate::video::{now_millis, IdGenerator, NewVideo, VideoRecord};

/// Runtime knobs of a pod.
#[derive(Debug, Clone)]
pub struct PodSettings {
    /// Externally reachable URL; becomes the origin of everything we publish.
    pub url: PodUrl,
    /// Pods contacted by [`Pod::make_friends`].
    pub seed_peers: Vec<PodUrl>,
    pub max_peers: usize,
    /// Upper bound on each outbound call to a friend.
    pub request_timeout: Duration,
    /// Upper bound on a payload fetch; `None` waits for the transfer.
    pub fetch_timeout: Option<Duration>,
    pub fanout_concurrency: usize,
}

impl PodSettings {
    pub fn new(url: PodUrl) -> Self {
        Self {
            url,
            seed_peers: Vec::new(),
            max_peers: 64,
            request_timeout: Duration::from_secs(10),
            fetch_timeout: None,
            fanout_concurrency: 16,
        }
    }
}

pub struct Pod {
    settings: PodSettings,
    catalog: Catalog,
    peers: PeerRegistry,
    swarm: Arc<dyn SwarmTransfer>,
    propagator: Propagator,
    ids: IdGenerator,
    /// Former friends whose late publishes are dropped until they rejoin.
    departed: RwLock<HashSet<PodUrl>>,
}

impl Pod {
    /// Load persisted state and resume seeding our own payloads.
    pub async fn open(
        settings: PodSettings,
        store: Arc<dyn Store>,
        swarm: Arc<dyn SwarmTransfer>,
        client: Arc<dyn PodClient>,
    ) -> Result<Arc<Self>> {
        let catalog = Catalog::load(Arc::clone(&store)).await?;
        let peers = PeerRegistry::load(settings.url.clone(), settings.max_peers, store).await?;
        let propagator = Propagator::new(client, settings.fanout_concurrency, settings.request_timeout);
        let ids = IdGenerator::new(settings.url.clone());

        let pod = Arc::new(Self {
            settings,
            catalog,
            peers,
            swarm,
            propagator,
            ids,
            departed: RwLock::new(HashSet::new()),
        });
        pod.resume_seeding().await;
        info!(
            "Pod {} ready with {} videos and {} friends",
            pod.url(),
            pod.catalog.len().await,
            pod.peers.len().await
        );
        Ok(pod)
    }

    pub fn url(&self) -> &PodUrl {
        &self.settings.url
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    // ------------------------------------------------------------------
    // Catalog, local side
    // ------------------------------------------------------------------

    pub async fn list_videos(&self) -> Vec<VideoRecord> {
        self.catalog.list().await
    }

    pub async fn get_video(&self, id: &VideoId) -> Result<VideoRecord> {
        self.catalog
            .get(id)
            .await
            .map(|entry| entry.video)
            .ok_or_else(|| PodError::VideoNotFound(id.clone()))
    }

    pub async fn search_videos(&self, query: &str) -> Vec<VideoRecord> {
        self.catalog.search(query).await
    }

    /// Publish a video from a local file.
    ///
    /// The payload is seeded first so the record carries its final locator,
    /// then the record is stored, then it is broadcast to every friend.  The
    /// returned [`Dispatch`] tracks the broadcast.
    pub async fn publish(&self, video: NewVideo) -> Result<(VideoRecord, Dispatch)> {
        video.validate()?;
        let is_file = tokio::fs::metadata(&video.path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(PodError::Validation(format!(
                "payload {} is not a readable file",
                video.path.display()
            )));
        }

        let locator = self.swarm.seed(&video.path).await?;
        let record = VideoRecord {
            id: self.ids.next_id(),
            name: video.name,
            description: video.description,
            pod_url: self.url().clone(),
            locator,
            created_at: now_millis(),
        };

        let entry = CatalogEntry {
            video: record.clone(),
            payload: Some(video.path),
        };
        if let Err(e) = self.catalog.insert(entry.clone()).await {
            self.release(&entry).await;
            return Err(e);
        }
        info!("Published video {} ({})", record.id, record.name);

        let dispatch = self
            .broadcast(Outbound::Propagate(Propagation::Publish {
                origin: self.url().clone(),
                video: record.clone(),
            }))
            .await;
        Ok((record, dispatch))
    }

    /// Delete one of our own videos and tell every friend.
    pub async fn delete(&self, id: &VideoId) -> Result<Dispatch> {
        let entry = self
            .catalog
            .get(id)
            .await
            .ok_or_else(|| PodError::VideoNotFound(id.clone()))?;
        if &entry.video.pod_url != self.url() {
            return Err(PodError::Validation(format!(
                "video {} belongs to {}; only its origin can delete it",
                id, entry.video.pod_url
            )));
        }

        let Some(removed) = self.catalog.remove(id).await? else {
            return Err(PodError::VideoNotFound(id.clone()));
        };
        self.release(&removed).await;
        info!("Deleted video {}", id);

        Ok(self
            .broadcast(Outbound::Propagate(Propagation::Remove {
                origin: self.url().clone(),
                id: id.clone(),
            }))
            .await)
    }

    /// Make the payload of `id` available as a local file, downloading it
    /// through the swarm if needed.  No catalog lock is held meanwhile.
    pub async fn fetch_payload(&self, id: &VideoId) -> Result<PathBuf> {
        let entry = self
            .catalog
            .get(id)
            .await
            .ok_or_else(|| PodError::VideoNotFound(id.clone()))?;
        if let Some(path) = &entry.payload {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Ok(path.clone());
            }
        }

        debug!("Fetching payload of {} by locator", id);
        let fetch = self.swarm.fetch(&entry.video.locator);
        let path = match self.settings.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| PodError::Timeout(limit))??,
            None => fetch.await?,
        };

        if !self.catalog.set_payload(id, path.clone()).await? {
            debug!("Video {} vanished while its payload was fetched", id);
        }
        Ok(path)
    }

    // ------------------------------------------------------------------
    // Catalog, remote side
    // ------------------------------------------------------------------

    /// Apply a catalog write sent by a friend.
    ///
    /// Malformed messages are rejected with a validation error and leave
    /// the catalog untouched; duplicates and unknown ids are no-ops.
    pub async fn receive(&self, message: Propagation) -> Result<()> {
        let outcome = match message {
            Propagation::Publish { origin, video } => self.apply_remote_publish(&origin, video).await,
            Propagation::Remove { origin, id } => self.apply_remote_delete(&origin, &id).await,
        };
        if let Err(PodError::Validation(reason)) = &outcome {
            warn!("Dropped malformed propagation: {}", reason);
        }
        outcome.map(|_| ())
    }

    /// Returns `true` when the record was new.
    pub async fn apply_remote_publish(&self, origin: &PodUrl, video: VideoRecord) -> Result<bool> {
        if origin == self.url() {
            debug!("Ignoring echo of our own video {}", video.id);
            return Ok(false);
        }
        video.validate_remote(origin)?;
        if self.departed.read().await.contains(origin) {
            debug!("Ignoring video {} from former friend {}", video.id, origin);
            return Ok(false);
        }

        let id = video.id.clone();
        let added = self
            .catalog
            .insert(CatalogEntry {
                video,
                payload: None,
            })
            .await?;
        if added {
            info!("Added remote video {} from {}", id, origin);
        } else {
            debug!("Remote video {} from {} already known", id, origin);
        }
        Ok(added)
    }

    /// Returns `true` when something was removed.
    pub async fn apply_remote_delete(&self, origin: &PodUrl, id: &VideoId) -> Result<bool> {
        let Some(entry) = self.catalog.get(id).await else {
            debug!("Removal of unknown video {} from {}", id, origin);
            return Ok(false);
        };
        if &entry.video.pod_url != origin {
            warn!(
                "Ignoring removal of {} from {}: video belongs to {}",
                id, origin, entry.video.pod_url
            );
            return Ok(false);
        }

        match self.catalog.remove(id).await? {
            Some(removed) => {
                self.release(&removed).await;
                info!("Removed remote video {} from {}", id, origin);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // Friendship
    // ------------------------------------------------------------------

    pub async fn list_peers(&self) -> Vec<PodUrl> {
        self.peers.list().await
    }

    /// Join the mesh through `seed`.
    ///
    /// `seed` registers us, hands back its friends and its catalog, and
    /// forwards our identity to its friends in the background.
    pub async fn request_friendship(&self, seed: &PodUrl) -> Result<Admission> {
        if seed == self.url() {
            return Err(PodError::Validation("a pod cannot befriend itself".into()));
        }

        if !self.peers.has_room_for(seed).await {
            return Err(PodError::Refused {
                pod: self.url().clone(),
                reason: format!("peer capacity of {} reached", self.peers.capacity()),
            });
        }

        let request = self.join_request().await;
        let response = self.propagator.client().join(seed, &request).await?;
        let admission = match self.peers.add(seed.clone()).await {
            Ok(admission) => admission,
            Err(e) => {
                // The seed already counts us as a friend.
                let leave = LeaveRequest {
                    url: self.url().clone(),
                };
                if let Err(undo) = self.propagator.client().leave(seed, &leave).await {
                    warn!("Could not withdraw from {}: {}", seed, undo);
                }
                return Err(e);
            }
        };
        self.welcome(seed).await;

        for peer in response.peers {
            if &peer == self.url() {
                continue;
            }
            match self.peers.add(peer.clone()).await {
                Ok(_) => self.welcome(&peer).await,
                Err(e) => warn!("Could not register {} learned from {}: {}", peer, seed, e),
            }
        }
        self.catch_up(response.videos).await;

        info!("Friendship with {} accepted ({:?})", seed, admission);
        Ok(admission)
    }

    /// Contact every configured seed peer concurrently.  Succeeds when at
    /// least one accepts and returns those that did.
    pub async fn make_friends(&self) -> Result<Vec<PodUrl>> {
        let seeds = self.settings.seed_peers.clone();
        if seeds.is_empty() {
            return Err(PodError::Validation("no seed peers configured".into()));
        }

        let outcomes = join_all(seeds.iter().map(|seed| self.request_friendship(seed))).await;
        let mut accepted = Vec::new();
        let mut first_error = None;
        for (seed, outcome) in seeds.into_iter().zip(outcomes) {
            match outcome {
                Ok(_) => accepted.push(seed),
                Err(e) => {
                    warn!("Seed {} did not accept us: {}", seed, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match (accepted.is_empty(), first_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(accepted),
        }
    }

    /// End the friendship with `peer` on both sides.  Not transitive: other
    /// pods keep `peer` as a friend.  Returns `false` if `peer` was not a
    /// friend.
    pub async fn quit_friendship(&self, peer: &PodUrl) -> Result<bool> {
        if !self.peers.remove(peer).await? {
            return Ok(false);
        }
        self.forget_origin(peer).await?;

        let report = self
            .propagator
            .broadcast(
                vec![peer.clone()],
                Outbound::Leave(LeaveRequest {
                    url: self.url().clone(),
                }),
            )
            .report()
            .await;
        if !report.is_complete() {
            warn!("{} was not told about the end of our friendship", peer);
        }
        Ok(true)
    }

    /// Quit every friendship.  Returns how many ended.
    pub async fn quit_all(&self) -> Result<usize> {
        let peers = self.peers.list().await;
        let outcomes = join_all(peers.iter().map(|peer| self.quit_friendship(peer))).await;
        let mut ended = 0;
        for outcome in outcomes {
            if outcome? {
                ended += 1;
            }
        }
        Ok(ended)
    }

    /// Handle a join request from another pod.
    pub async fn accept_join(&self, request: JoinRequest) -> Result<JoinResponse> {
        if &request.url == self.url() {
            return Err(PodError::Validation("a pod cannot befriend itself".into()));
        }
        let admission = self.peers.add(request.url.clone()).await?;
        self.welcome(&request.url).await;
        self.apply_batch(&request.url, request.videos.clone()).await;

        let others: Vec<PodUrl> = self
            .peers
            .list()
            .await
            .into_iter()
            .filter(|peer| peer != &request.url)
            .collect();
        debug!(
            "{} joined ({:?}); announcing to {} friends",
            request.url,
            admission,
            others.len()
        );
        self.propagator
            .broadcast(others.clone(), Outbound::Announce(request))
            .detach();

        Ok(JoinResponse {
            peers: others,
            videos: self.catalog.list().await,
        })
    }

    /// Handle the announcement of a pod that joined through a friend.
    pub async fn accept_announce(&self, request: JoinRequest) -> Result<()> {
        if &request.url == self.url() {
            return Ok(());
        }
        self.peers.add(request.url.clone()).await?;
        self.welcome(&request.url).await;
        self.apply_batch(&request.url, request.videos).await;
        Ok(())
    }

    /// Handle a friend leaving us.  Unknown pods are ignored.
    pub async fn accept_leave(&self, url: &PodUrl) -> Result<()> {
        if self.peers.remove(url).await? {
            self.forget_origin(url).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Resolve once every broadcast this pod started has finished.
    pub async fn settle(&self) {
        self.propagator.wait_idle().await;
    }

    /// Let running broadcasts finish (bounded by `grace`) and flush state.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        if tokio::time::timeout(grace, self.settle()).await.is_err() {
            warn!(
                "{} broadcasts still running at shutdown",
                self.propagator.pending()
            );
        }
        self.catalog.flush().await?;
        self.peers.flush().await?;
        info!("Pod {} stopped", self.url());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn broadcast(&self, outbound: Outbound) -> Dispatch {
        let targets = self.peers.list().await;
        self.propagator.broadcast(targets, outbound)
    }

    async fn join_request(&self) -> JoinRequest {
        JoinRequest {
            url: self.url().clone(),
            videos: self
                .catalog
                .by_origin(self.url())
                .await
                .into_iter()
                .map(|entry| entry.video)
                .collect(),
        }
    }

    /// Apply records a friend vouched for as its own.
    async fn apply_batch(&self, origin: &PodUrl, videos: Vec<VideoRecord>) {
        for video in videos {
            if let Err(e) = self.apply_remote_publish(origin, video).await {
                warn!("Skipped a video from {}: {}", origin, e);
            }
        }
    }

    /// Apply a friend's whole catalog, each record under its own origin.
    async fn catch_up(&self, videos: Vec<VideoRecord>) {
        for video in videos {
            let origin = video.pod_url.clone();
            if let Err(e) = self.apply_remote_publish(&origin, video).await {
                warn!("Skipped a video during catch-up: {}", e);
            }
        }
    }

    async fn forget_origin(&self, origin: &PodUrl) -> Result<()> {
        self.departed.write().await.insert(origin.clone());
        let removed = self.catalog.remove_origin(origin).await?;
        for entry in &removed {
            self.release(entry).await;
        }
        if !removed.is_empty() {
            info!("Dropped {} videos from former friend {}", removed.len(), origin);
        }
        Ok(())
    }

    /// Accept publishes from `pod` again.
    async fn welcome(&self, pod: &PodUrl) {
        self.departed.write().await.remove(pod);
    }

    /// Stop seeding a removed entry's payload if we hold one and no other
    /// entry we keep shares its bytes.
    async fn release(&self, entry: &CatalogEntry) {
        if entry.payload.is_none() {
            return;
        }
        if self.payload_shared(&entry.video.locator).await {
            debug!("Payload of {} is shared; still seeding", entry.video.id);
            return;
        }
        if let Err(e) = self.swarm.stop_seeding(&entry.video.locator).await {
            warn!("Could not stop seeding {}: {}", entry.video.id, e);
        }
    }

    async fn payload_shared(&self, locator: &Locator) -> bool {
        let Ok(released) = Magnet::parse(locator) else {
            return false;
        };
        self.catalog
            .entries()
            .await
            .iter()
            .filter(|entry| entry.payload.is_some())
            .any(|entry| {
                Magnet::parse(&entry.video.locator).is_ok_and(|m| m.digest == released.digest)
            })
    }

    async fn resume_seeding(&self) {
        for entry in self.catalog.by_origin(self.url()).await {
            let Some(path) = entry.payload else {
                continue;
            };
            match self.swarm.seed(&path).await {
                Ok(locator) if locator == entry.video.locator => {}
                Ok(_) => warn!(
                    "Payload of {} changed on disk; its locator no longer matches",
                    entry.video.id
                ),
                Err(e) => warn!("Could not resume seeding {}: {}", entry.video.id, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FlakyStore, MemoryStore};
    use crate::swarm::{MemorySwarm, SwarmHub};
    use crate::transport::LocalMesh;

    struct Fixture {
        _dir: tempfile::TempDir,
        dir: PathBuf,
        hub: SwarmHub,
        mesh: Arc<LocalMesh>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                dir: dir.path().to_path_buf(),
                _dir: dir,
                hub: SwarmHub::new(),
                mesh: LocalMesh::new(),
            }
        }

        async fn pod(&self, port: u16) -> Arc<Pod> {
            self.pod_with_store(port, MemoryStore::new()).await
        }

        async fn pod_with_store(&self, port: u16, store: Arc<dyn Store>) -> Arc<Pod> {
            let url = PodUrl::parse(&format!("http://localhost:{port}")).unwrap();
            let swarm = MemorySwarm::new(
                self.hub.clone(),
                url.as_str(),
                self.dir.join(format!("downloads-{port}")),
            );
            let pod = Pod::open(PodSettings::new(url), store, Arc::new(swarm), self.mesh.clone())
                .await
                .unwrap();
            self.mesh.attach(&pod).await;
            pod
        }

        fn payload(&self, name: &str, bytes: &[u8]) -> PathBuf {
            let path = self.dir.join(name);
            std::fs::write(&path, bytes).unwrap();
            path
        }
    }

    #[tokio::test]
    async fn publish_is_visible_locally_with_a_locator() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let path = fx.payload("v1.webm", b"v1 bytes");

        let (video, dispatch) = a.publish(NewVideo::new("v1", "d1", &path)).await.unwrap();
        dispatch.detach();

        assert_eq!(video.pod_url, *a.url());
        assert!(!video.locator.is_empty());
        assert_eq!(a.list_videos().await, vec![video.clone()]);
        assert_eq!(a.get_video(&video.id).await.unwrap(), video);
        assert!(fx.hub.is_seeded_by(&video.locator, a.url().as_str()).await);
    }

    #[tokio::test]
    async fn publish_rejects_bad_input_without_side_effects() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let path = fx.payload("v1.webm", b"v1 bytes");

        let missing_name = a.publish(NewVideo::new("", "d1", &path)).await;
        assert!(matches!(missing_name, Err(PodError::Validation(_))));
        let missing_file = a
            .publish(NewVideo::new("v1", "d1", fx.dir.join("nope.webm")))
            .await;
        assert!(matches!(missing_file, Err(PodError::Validation(_))));

        assert!(a.list_videos().await.is_empty());
        assert_eq!(fx.hub.seeded_count().await, 0);
    }

    #[tokio::test]
    async fn local_delete_of_unknown_id_is_not_found() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        assert!(matches!(
            a.delete(&VideoId::new("missing")).await,
            Err(PodError::VideoNotFound(_))
        ));
    }

    #[tokio::test]
    async fn remote_apply_tolerates_stale_and_duplicate_messages() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let b = fx.pod(9002).await;
        let path = fx.payload("v1.webm", b"v1 bytes");
        let (video, dispatch) = a.publish(NewVideo::new("v1", "d1", &path)).await.unwrap();
        dispatch.detach();

        let publish = Propagation::Publish {
            origin: a.url().clone(),
            video: video.clone(),
        };
        b.receive(publish.clone()).await.unwrap();
        b.receive(publish).await.unwrap();
        assert_eq!(b.list_videos().await.len(), 1);

        let unknown = Propagation::Remove {
            origin: a.url().clone(),
            id: VideoId::new("never-seen"),
        };
        b.receive(unknown).await.unwrap();
        assert_eq!(b.list_videos().await.len(), 1);

        // Only the origin may remove its record.
        let forged = Propagation::Remove {
            origin: PodUrl::parse("http://localhost:9003").unwrap(),
            id: video.id.clone(),
        };
        b.receive(forged).await.unwrap();
        assert_eq!(b.list_videos().await.len(), 1);

        let remove = Propagation::Remove {
            origin: a.url().clone(),
            id: video.id.clone(),
        };
        b.receive(remove.clone()).await.unwrap();
        b.receive(remove).await.unwrap();
        assert!(b.list_videos().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_publish_is_dropped() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let b = fx.pod(9002).await;
        let path = fx.payload("v1.webm", b"v1 bytes");
        let (mut video, dispatch) = a.publish(NewVideo::new("v1", "d1", &path)).await.unwrap();
        dispatch.detach();

        video.locator = crate::swarm::Locator::new("");
        let outcome = b
            .receive(Propagation::Publish {
                origin: a.url().clone(),
                video,
            })
            .await;
        assert!(matches!(outcome, Err(PodError::Validation(_))));
        assert!(b.list_videos().await.is_empty());
    }

    #[tokio::test]
    async fn receiving_pod_fetches_payload_on_demand() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let b = fx.pod(9002).await;
        b.request_friendship(a.url()).await.unwrap();

        let path = fx.payload("v1.webm", b"v1 bytes");
        let (video, dispatch) = a.publish(NewVideo::new("v1", "d1", &path)).await.unwrap();
        assert!(dispatch.report().await.is_complete());

        // Metadata only until someone asks.
        assert!(b.catalog().get(&video.id).await.unwrap().payload.is_none());
        assert!(!fx.hub.is_seeded_by(&video.locator, b.url().as_str()).await);

        let fetched = b.fetch_payload(&video.id).await.unwrap();
        assert_eq!(std::fs::read(&fetched).unwrap(), b"v1 bytes");
        assert_eq!(b.catalog().get(&video.id).await.unwrap().payload, Some(fetched));
    }

    #[tokio::test]
    async fn failed_fetch_leaves_the_record_intact() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let b = fx.pod(9002).await;
        b.request_friendship(a.url()).await.unwrap();

        let path = fx.payload("v1.webm", b"v1 bytes");
        let (video, dispatch) = a.publish(NewVideo::new("v1", "d1", &path)).await.unwrap();
        assert!(dispatch.report().await.is_complete());

        MemorySwarm::new(fx.hub.clone(), a.url().as_str(), fx.dir.join("x"))
            .stop_seeding(&video.locator)
            .await
            .unwrap();

        assert!(matches!(
            b.fetch_payload(&video.id).await,
            Err(PodError::Transfer(_))
        ));
        assert_eq!(b.get_video(&video.id).await.unwrap(), video);
    }

    #[tokio::test]
    async fn only_the_origin_deletes() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let b = fx.pod(9002).await;
        b.request_friendship(a.url()).await.unwrap();

        let path = fx.payload("v1.webm", b"v1 bytes");
        let (video, dispatch) = a.publish(NewVideo::new("v1", "d1", &path)).await.unwrap();
        assert!(dispatch.report().await.is_complete());

        assert!(matches!(
            b.delete(&video.id).await,
            Err(PodError::Validation(_))
        ));

        let report = a.delete(&video.id).await.unwrap().report().await;
        assert_eq!(report.delivered, vec![b.url().clone()]);
        assert!(a.list_videos().await.is_empty());
        assert!(b.list_videos().await.is_empty());
        assert_eq!(fx.hub.seeded_count().await, 0);
    }

    #[tokio::test]
    async fn handshake_exchanges_peers_and_catalogs() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let b = fx.pod(9002).await;
        let c = fx.pod(9003).await;

        let path = fx.payload("a.webm", b"from a");
        a.publish(NewVideo::new("from a", "d", &path)).await.unwrap().1.detach();
        b.request_friendship(a.url()).await.unwrap();

        let path = fx.payload("c.webm", b"from c");
        c.publish(NewVideo::new("from c", "d", &path)).await.unwrap().1.detach();
        c.request_friendship(a.url()).await.unwrap();
        a.settle().await;

        // c learned b from a, and b learned c from a's announcement.
        assert_eq!(c.list_peers().await, vec![a.url().clone(), b.url().clone()]);
        assert!(b.list_peers().await.contains(c.url()));
        for pod in [&a, &b, &c] {
            assert_eq!(pod.list_videos().await.len(), 2, "{}", pod.url());
        }
    }

    #[tokio::test]
    async fn repeated_handshake_keeps_one_entry() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let b = fx.pod(9002).await;

        assert_eq!(b.request_friendship(a.url()).await.unwrap(), Admission::Added);
        assert_eq!(
            b.request_friendship(a.url()).await.unwrap(),
            Admission::AlreadyKnown
        );
        a.settle().await;
        assert_eq!(a.list_peers().await, vec![b.url().clone()]);
        assert_eq!(b.list_peers().await, vec![a.url().clone()]);
    }

    #[tokio::test]
    async fn full_pod_refuses_and_unreachable_pod_errors() {
        let fx = Fixture::new();
        let url = PodUrl::parse("http://localhost:9001").unwrap();
        let mut settings = PodSettings::new(url);
        settings.max_peers = 1;
        let swarm = MemorySwarm::new(fx.hub.clone(), "a", fx.dir.join("a"));
        let a = Pod::open(settings, MemoryStore::new(), Arc::new(swarm), fx.mesh.clone())
            .await
            .unwrap();
        fx.mesh.attach(&a).await;
        let b = fx.pod(9002).await;
        let c = fx.pod(9003).await;

        b.request_friendship(a.url()).await.unwrap();
        assert!(matches!(
            c.request_friendship(a.url()).await,
            Err(PodError::Refused { .. })
        ));
        assert!(c.list_peers().await.is_empty());

        let ghost = PodUrl::parse("http://localhost:9999").unwrap();
        assert!(matches!(
            c.request_friendship(&ghost).await,
            Err(PodError::Unreachable { .. })
        ));
        assert!(matches!(
            c.request_friendship(c.url()).await,
            Err(PodError::Validation(_))
        ));

        // A full pod does not ask others to befriend it.
        assert!(matches!(
            a.request_friendship(c.url()).await,
            Err(PodError::Refused { .. })
        ));
        assert!(c.list_peers().await.is_empty());
        assert_eq!(a.list_peers().await, vec![b.url().clone()]);
    }

    #[tokio::test]
    async fn quitting_is_mutual_but_not_transitive() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let b = fx.pod(9002).await;
        let c = fx.pod(9003).await;
        b.request_friendship(a.url()).await.unwrap();
        c.request_friendship(a.url()).await.unwrap();
        a.settle().await;

        let path = fx.payload("b.webm", b"from b");
        let (video, dispatch) = b.publish(NewVideo::new("from b", "d", &path)).await.unwrap();
        assert!(dispatch.report().await.is_complete());

        assert!(a.quit_friendship(b.url()).await.unwrap());
        assert!(!a.quit_friendship(b.url()).await.unwrap());

        assert!(!a.list_peers().await.contains(b.url()));
        assert!(!b.list_peers().await.contains(a.url()));
        assert!(a.get_video(&video.id).await.is_err());
        // c keeps b as a friend and keeps its video.
        assert!(c.list_peers().await.contains(b.url()));
        assert!(c.get_video(&video.id).await.is_ok());
    }

    #[tokio::test]
    async fn make_friends_uses_configured_seeds() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let b = fx.pod(9002).await;

        let url = PodUrl::parse("http://localhost:9003").unwrap();
        let mut settings = PodSettings::new(url.clone());
        settings.seed_peers = vec![
            a.url().clone(),
            b.url().clone(),
            PodUrl::parse("http://localhost:9999").unwrap(),
        ];
        let swarm = MemorySwarm::new(fx.hub.clone(), url.as_str(), fx.dir.join("c"));
        let c = Pod::open(settings, MemoryStore::new(), Arc::new(swarm), fx.mesh.clone())
            .await
            .unwrap();
        fx.mesh.attach(&c).await;

        let accepted = c.make_friends().await.unwrap();
        assert_eq!(accepted, vec![a.url().clone(), b.url().clone()]);
        assert_eq!(c.list_peers().await.len(), 2);

        let lonely = fx.pod(9004).await;
        assert!(matches!(
            lonely.make_friends().await,
            Err(PodError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn reopened_pod_keeps_catalog_friends_and_seeds() {
        let fx = Fixture::new();
        let store = MemoryStore::new();
        let a = fx.pod_with_store(9001, store.clone()).await;
        let b = fx.pod(9002).await;
        a.request_friendship(b.url()).await.unwrap();
        let path = fx.payload("v1.webm", b"v1 bytes");
        let (video, dispatch) = a.publish(NewVideo::new("v1", "d1", &path)).await.unwrap();
        dispatch.report().await;
        a.shutdown(Duration::from_secs(1)).await.unwrap();

        // Simulate the swarm engine restarting empty.
        MemorySwarm::new(fx.hub.clone(), a.url().as_str(), fx.dir.join("x"))
            .stop_seeding(&video.locator)
            .await
            .unwrap();
        drop(a);

        let a = fx.pod_with_store(9001, store).await;
        assert_eq!(a.list_videos().await, vec![video.clone()]);
        assert_eq!(a.list_peers().await, vec![b.url().clone()]);
        assert!(fx.hub.is_seeded_by(&video.locator, a.url().as_str()).await);
    }

    #[tokio::test]
    async fn failed_store_write_undoes_publish_and_delete() {
        let fx = Fixture::new();
        let store = FlakyStore::new();
        let a = fx.pod_with_store(9001, store.clone()).await;
        let path = fx.payload("v1.webm", b"v1 bytes");

        store.fail_writes(true);
        assert!(matches!(
            a.publish(NewVideo::new("v1", "d1", &path)).await,
            Err(PodError::Storage(_))
        ));
        assert!(a.list_videos().await.is_empty());
        assert_eq!(fx.hub.seeded_count().await, 0);

        store.fail_writes(false);
        let (video, dispatch) = a.publish(NewVideo::new("v1", "d1", &path)).await.unwrap();
        dispatch.detach();

        store.fail_writes(true);
        assert!(a.delete(&video.id).await.is_err());
        assert_eq!(a.get_video(&video.id).await.unwrap(), video);
        assert!(fx.hub.is_seeded_by(&video.locator, a.url().as_str()).await);
    }

    #[tokio::test]
    async fn deleting_one_copy_keeps_seeding_the_other() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let b = fx.pod(9002).await;
        b.request_friendship(a.url()).await.unwrap();
        let path = fx.payload("same.webm", b"identical bytes");

        let (first, dispatch) = a.publish(NewVideo::new("first", "d", &path)).await.unwrap();
        dispatch.report().await;
        let (second, dispatch) = a.publish(NewVideo::new("second", "d", &path)).await.unwrap();
        dispatch.report().await;
        assert_ne!(first.id, second.id);
        assert_eq!(first.locator, second.locator);

        a.delete(&first.id).await.unwrap().report().await;
        assert!(b.get_video(&first.id).await.is_err());
        let fetched = b.fetch_payload(&second.id).await.unwrap();
        assert_eq!(std::fs::read(fetched).unwrap(), b"identical bytes");

        a.delete(&second.id).await.unwrap().report().await;
        assert_eq!(fx.hub.seeded_count().await, 0);
    }

    #[tokio::test]
    async fn late_publish_from_former_friend_is_ignored() {
        let fx = Fixture::new();
        let a = fx.pod(9001).await;
        let b = fx.pod(9002).await;
        b.request_friendship(a.url()).await.unwrap();
        let path = fx.payload("v1.webm", b"bytes");
        let (video, dispatch) = b.publish(NewVideo::new("v1", "d1", &path)).await.unwrap();
        dispatch.report().await;

        assert!(a.quit_friendship(b.url()).await.unwrap());
        assert!(a.list_videos().await.is_empty());

        let late = Propagation::Publish {
            origin: b.url().clone(),
            video: video.clone(),
        };
        a.receive(late).await.unwrap();
        assert!(a.list_videos().await.is_empty());

        // Rejoining brings the catalog back.
        b.request_friendship(a.url()).await.unwrap();
        assert_eq!(a.get_video(&video.id).await.unwrap(), video);
    }
}
