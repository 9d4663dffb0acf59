//! HTTP surface of a pod.
//!
//! ```text
//! /api/v1/videos                 GET list, POST publish (multipart upload)
//! /api/v1/videos/{id}            GET, DELETE
//! /api/v1/videos/{id}/fetch      POST  resolve payload to a local file
//! /api/v1/videos/search/{query}  GET
//! /api/v1/pods                   GET friends
//! /api/v1/pods/makefriends       POST  contact configured seeds
//! /api/v1/pods/quitfriends       POST  quit every friendship
//! /api/v1/pods/request           POST  befriend one pod
//! /api/v1/pods/quit              POST  quit one friendship
//! /api/v1/pods/join              POST  pod to pod: join request
//! /api/v1/pods/announce          POST  pod to pod: forwarded join
//! /api/v1/pods/leave             POST  pod to pod: friendship ended
//! /api/v1/remote/videos          POST  pod to pod: catalog write
//! /api/v1/swarm/{digest}         GET   seeded payload bytes
//! ```

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::error::PodError;
use crate::pod::Pod;
use crate::swarm::HttpSwarm;

pub mod client;
mod handlers;

pub use client::HttpPodClient;
pub use handlers::UPLOAD_FIELD;

/// Largest accepted publish request.
pub const MAX_UPLOAD_BYTES: usize = 1 << 30;

#[derive(Clone)]
pub struct AppState {
    pub pod: Arc<Pod>,
    /// Set when payloads are served over HTTP by this pod.
    pub swarm: Option<Arc<HttpSwarm>>,
    /// Directory receiving uploaded payloads.  Publishing over HTTP never
    /// reads files from anywhere else.
    pub uploads: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/videos",
            get(handlers::list_videos)
                .post(handlers::publish_video)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/api/v1/videos/:id",
            get(handlers::get_video).delete(handlers::delete_video),
        )
        .route("/api/v1/videos/:id/fetch", post(handlers::fetch_video))
        .route("/api/v1/videos/search/:query", get(handlers::search_videos))
        .route("/api/v1/pods", get(handlers::list_pods))
        .route("/api/v1/pods/makefriends", post(handlers::make_friends))
        .route("/api/v1/pods/quitfriends", post(handlers::quit_friends))
        .route("/api/v1/pods/request", post(handlers::request_friendship))
        .route("/api/v1/pods/quit", post(handlers::quit_friendship))
        .route("/api/v1/pods/join", post(handlers::join))
        .route("/api/v1/pods/announce", post(handlers::announce))
        .route("/api/v1/pods/leave", post(handlers::leave))
        .route("/api/v1/remote/videos", post(handlers::remote_videos))
        .route("/api/v1/swarm/:digest", get(handlers::swarm_payload))
        .with_state(state)
}

/// Serve `state` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl PodError {
    pub fn status(&self) -> StatusCode {
        match self {
            PodError::Validation(_) => StatusCode::BAD_REQUEST,
            PodError::VideoNotFound(_) => StatusCode::NOT_FOUND,
            PodError::Refused { .. } => StatusCode::CONFLICT,
            PodError::Unreachable { .. } | PodError::Protocol { .. } | PodError::Transfer(_) => {
                StatusCode::BAD_GATEWAY
            }
            PodError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PodError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for PodError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
