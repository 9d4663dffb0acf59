//! Pods talking to each other over real HTTP on loopback.

use std::sync::Arc;
use std::time::Duration;

use podmesh::convergence::poll_until;
use podmesh::http::{self, AppState, ErrorBody, HttpPodClient, UPLOAD_FIELD};
use podmesh::store::JsonStore;
use podmesh::swarm::HttpSwarm;
use podmesh::{Pod, PodSettings, PodUrl, VideoRecord};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::json;
use tokio::net::TcpListener;

const CONVERGE: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(20);

struct Node {
    pod: Arc<Pod>,
    uploads: std::path::PathBuf,
}

impl Node {
    async fn start(root: &std::path::Path, name: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = PodUrl::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        let data_dir = root.join(name);

        let store = JsonStore::open(&data_dir).await.unwrap();
        let swarm = Arc::new(
            HttpSwarm::new(url.clone(), data_dir.join("downloads"), Duration::from_secs(10)).unwrap(),
        );
        let client = Arc::new(HttpPodClient::new(Duration::from_secs(5)).unwrap());
        let pod = Pod::open(PodSettings::new(url), store, swarm.clone(), client)
            .await
            .unwrap();

        let uploads = data_dir.join("videos");
        let state = AppState {
            pod: Arc::clone(&pod),
            swarm: Some(swarm),
            uploads: uploads.clone(),
        };
        tokio::spawn(http::serve(listener, state, std::future::pending()));
        Self { pod, uploads }
    }

    fn endpoint(&self, path: &str) -> String {
        self.pod.url().endpoint(path)
    }
}

fn upload_form(name: &str, description: &str, bytes: &[u8]) -> Form {
    Form::new()
        .text("name", name.to_string())
        .text("description", description.to_string())
        .part(UPLOAD_FIELD, Part::bytes(bytes.to_vec()).file_name("v1.webm"))
}

async fn wait_for_count(node: &Node, expected: usize) {
    let pod = Arc::clone(&node.pod);
    poll_until(CONVERGE, POLL, move || {
        let pod = Arc::clone(&pod);
        async move { pod.list_videos().await.len() == expected }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never reached {expected} videos", node.pod.url()));
}

#[tokio::test]
async fn three_pods_share_a_catalog_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let a = Node::start(dir.path(), "a").await;
    let b = Node::start(dir.path(), "b").await;
    let c = Node::start(dir.path(), "c").await;
    let http = reqwest::Client::new();

    for joiner in [&b, &c] {
        let resp = http
            .post(joiner.endpoint("/api/v1/pods/request"))
            .json(&json!({ "url": a.pod.url() }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
    a.pod.settle().await;
    let friends: Vec<PodUrl> = http
        .get(b.endpoint("/api/v1/pods"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(friends.len(), 2);

    let resp = http
        .post(a.endpoint("/api/v1/videos"))
        .multipart(upload_form("v1", "d1", b"video bytes over http"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let video: VideoRecord = resp.json().await.unwrap();
    assert_eq!(std::fs::read_dir(&a.uploads).unwrap().count(), 1);

    wait_for_count(&b, 1).await;
    wait_for_count(&c, 1).await;
    let seen: VideoRecord = http
        .get(c.endpoint(&format!("/api/v1/videos/{}", video.id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(seen.locator, video.locator);
    assert_eq!(seen.pod_url, *a.pod.url());

    let found: Vec<VideoRecord> = http
        .get(b.endpoint("/api/v1/videos/search/V1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found, vec![video.clone()]);

    let fetched = c.pod.fetch_payload(&video.id).await.unwrap();
    assert_eq!(std::fs::read(fetched).unwrap(), b"video bytes over http");

    let resp = http
        .delete(a.endpoint(&format!("/api/v1/videos/{}", video.id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    for node in [&a, &b, &c] {
        wait_for_count(node, 0).await;
    }
}

#[tokio::test]
async fn http_errors_carry_a_status_and_message() {
    let dir = tempfile::tempdir().unwrap();
    let a = Node::start(dir.path(), "a").await;
    let http = reqwest::Client::new();

    let form = Form::new()
        .text("description", "no name")
        .part(UPLOAD_FIELD, Part::bytes(b"bytes".to_vec()).file_name("x.webm"));
    let resp = http
        .post(a.endpoint("/api/v1/videos"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = resp.json().await.unwrap();
    assert!(body.error.contains("name"));
    // The rejected upload is not kept.
    assert_eq!(std::fs::read_dir(&a.uploads).unwrap().count(), 0);

    let resp = http
        .get(a.endpoint("/api/v1/videos/unknown"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = http
        .get(a.endpoint("/api/v1/swarm/00"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = http
        .post(a.endpoint("/api/v1/pods/quit"))
        .json(&json!({ "url": "http://127.0.0.1:1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // Nobody listens here.
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gone = format!("http://{}", closed.local_addr().unwrap());
    drop(closed);
    let resp = http
        .post(a.endpoint("/api/v1/pods/request"))
        .json(&json!({ "url": gone }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert!(a.pod.list_peers().await.is_empty());
}

#[tokio::test]
async fn publish_never_reads_server_side_paths() {
    let dir = tempfile::tempdir().unwrap();
    let a = Node::start(dir.path(), "a").await;
    let http = reqwest::Client::new();
    let secret = dir.path().join("secret.txt");
    std::fs::write(&secret, b"not for the mesh").unwrap();

    let resp = http
        .post(a.endpoint("/api/v1/videos"))
        .json(&json!({ "name": "x", "description": "y", "path": secret }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());

    let form = Form::new()
        .text("name", "x")
        .text("description", "y")
        .text("path", secret.display().to_string());
    let resp = http
        .post(a.endpoint("/api/v1/videos"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = resp.json().await.unwrap();
    assert!(body.error.contains(UPLOAD_FIELD));

    assert!(a.pod.list_videos().await.is_empty());
}
