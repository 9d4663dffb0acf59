use std::path::{Path as FsPath, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::AppState;
use crate::error::PodError;
use crate::types::{JoinRequest, JoinResponse, LeaveRequest, PodUrl, Propagation, VideoId};
use crate::video::{now_millis, NewVideo, VideoRecord};

/// Multipart field carrying the payload of a publish.
pub const UPLOAD_FIELD: &str = "input_video";

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

type ApiResult<T> = Result<T, PodError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct PeerBody {
    pub url: PodUrl,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchedBody {
    pub path: String,
}

pub async fn list_videos(State(state): State<AppState>) -> Json<Vec<VideoRecord>> {
    Json(state.pod.list_videos().await)
}

pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<VideoRecord>> {
    Ok(Json(state.pod.get_video(&VideoId::new(id)).await?))
}

pub async fn search_videos(
    State(state): State<AppState>,
    Path(query): Path<String>,
) -> Json<Vec<VideoRecord>> {
    Json(state.pod.search_videos(&query).await)
}

/// Publish from a multipart form: `name`, `description` and the payload
/// as `input_video`.  The payload is stored under the pod's upload
/// directory; it is removed again if the publish fails.
pub async fn publish_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<VideoRecord>)> {
    let video = receive_upload(&state.uploads, multipart).await?;
    let uploaded = video.path.clone();
    match state.pod.publish(video).await {
        Ok((record, dispatch)) => {
            dispatch.detach();
            Ok((StatusCode::CREATED, Json(record)))
        }
        Err(e) => {
            discard(&uploaded).await;
            Err(e)
        }
    }
}

async fn receive_upload(dir: &FsPath, mut multipart: Multipart) -> ApiResult<NewVideo> {
    let mut video = NewVideo::default();
    let mut stored: Option<PathBuf> = None;
    let outcome = async {
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "name" => video.name = field.text().await.map_err(malformed)?,
                "description" => video.description = field.text().await.map_err(malformed)?,
                UPLOAD_FIELD if stored.is_none() => stored = Some(store_field(dir, field).await?),
                _ => debug!("Ignoring upload field {:?}", name),
            }
        }
        Ok::<(), PodError>(())
    }
    .await;

    match (outcome, stored) {
        (Ok(()), Some(path)) => {
            video.path = path;
            Ok(video)
        }
        (Ok(()), None) => Err(PodError::Validation(format!("{UPLOAD_FIELD} is required"))),
        (Err(e), stored) => {
            if let Some(path) = stored {
                discard(&path).await;
            }
            Err(e)
        }
    }
}

async fn store_field(dir: &FsPath, mut field: Field<'_>) -> ApiResult<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let ext = field
        .file_name()
        .and_then(|name| FsPath::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();
    let path = dir.join(format!(
        "upload-{}-{}{}",
        now_millis(),
        UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed),
        ext
    ));

    let mut file = tokio::fs::File::create(&path).await?;
    let mut size = 0usize;
    let written = async {
        while let Some(chunk) = field.chunk().await.map_err(malformed)? {
            file.write_all(&chunk).await?;
            size += chunk.len();
        }
        file.flush().await?;
        Ok::<(), PodError>(())
    }
    .await;
    drop(file);

    match written {
        Ok(()) if size == 0 => {
            discard(&path).await;
            Err(PodError::Validation(format!("{UPLOAD_FIELD} is empty")))
        }
        Ok(()) => {
            info!("Received upload of {} bytes into {}", size, path.display());
            Ok(path)
        }
        Err(e) => {
            discard(&path).await;
            Err(e)
        }
    }
}

async fn discard(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Could not remove upload {}: {}", path.display(), e);
    }
}

fn malformed(err: MultipartError) -> PodError {
    PodError::Validation(format!("malformed upload: {err}"))
}

pub async fn delete_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.pod.delete(&VideoId::new(id)).await?.detach();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn fetch_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<FetchedBody>> {
    let path = state.pod.fetch_payload(&VideoId::new(id)).await?;
    Ok(Json(FetchedBody {
        path: path.display().to_string(),
    }))
}

pub async fn list_pods(State(state): State<AppState>) -> Json<Vec<PodUrl>> {
    Json(state.pod.list_peers().await)
}

pub async fn make_friends(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.pod.make_friends().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn quit_friends(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.pod.quit_all().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn request_friendship(
    State(state): State<AppState>,
    Json(body): Json<PeerBody>,
) -> ApiResult<StatusCode> {
    state.pod.request_friendship(&body.url).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn quit_friendship(
    State(state): State<AppState>,
    Json(body): Json<PeerBody>,
) -> ApiResult<StatusCode> {
    if !state.pod.quit_friendship(&body.url).await? {
        debug!("Quit requested for {}, which is not a friend", body.url);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn join(
    State(state): State<AppState>,
    Json(request): Json<JoinRequest>,
) -> ApiResult<Json<JoinResponse>> {
    Ok(Json(state.pod.accept_join(request).await?))
}

pub async fn announce(
    State(state): State<AppState>,
    Json(request): Json<JoinRequest>,
) -> ApiResult<StatusCode> {
    state.pod.accept_announce(request).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave(
    State(state): State<AppState>,
    Json(request): Json<LeaveRequest>,
) -> ApiResult<StatusCode> {
    state.pod.accept_leave(&request.url).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remote_videos(
    State(state): State<AppState>,
    Json(message): Json<Propagation>,
) -> ApiResult<StatusCode> {
    state.pod.receive(message).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn swarm_payload(State(state): State<AppState>, Path(digest): Path<String>) -> Response {
    let Some(swarm) = &state.swarm else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(path) = swarm.seeded_path(&digest).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match tokio::fs::File::open(&path).await {
        Ok(file) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            Body::from_stream(ReaderStream::new(file)),
        )
            .into_response(),
        Err(e) => {
            warn!("Seeded payload {} unreadable: {}", path.display(), e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
