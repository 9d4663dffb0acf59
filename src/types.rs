//! Data structures exchanged between pods.
//!
//! These types are serialised with [`serde`](https://serde.rs/) and sent
//! to peers as JSON request bodies.  They describe the handful of
//! operations a pod performs on a friend: joining, leaving, and
//! propagating catalog writes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PodError;
use crate::video::VideoRecord;

/// Identity of a pod: its externally reachable base URL.
///
/// Always normalised to `scheme://host[:port][/prefix]` without a trailing
/// slash so that two spellings of the same pod compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PodUrl(String);

impl PodUrl {
    pub fn parse(raw: &str) -> Result<Self, PodError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PodError::Validation("pod url is empty".into()));
        }
        let url = Url::parse(raw)
            .map_err(|e| PodError::Validation(format!("invalid pod url {raw:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PodError::Validation(format!(
                "pod url {raw:?} must use http or https"
            )));
        }
        if url.host_str().is_none() {
            return Err(PodError::Validation(format!("pod url {raw:?} has no host")));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(PodError::Validation(format!(
                "pod url {raw:?} must not carry a query or fragment"
            )));
        }
        Ok(Self(url.as_str().trim_end_matches('/').to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Absolute URL of `path` on this pod. `path` starts with `/`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.0, path)
    }
}

impl fmt::Display for PodUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PodUrl {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PodUrl {
    type Error = PodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PodUrl> for String {
    fn from(url: PodUrl) -> Self {
        url.0
    }
}

/// Identifier of a video, assigned once by the origin pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A catalog write travelling from one pod to its friends.
///
/// `origin` is always the pod that first published the video, never the
/// pod relaying the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Propagation {
    /// A video has been published on `origin`.
    Publish { origin: PodUrl, video: VideoRecord },
    /// A video has been removed on `origin`.  Only the id is needed.
    Remove { origin: PodUrl, id: VideoId },
}

impl Propagation {
    pub fn origin(&self) -> &PodUrl {
        match self {
            Propagation::Publish { origin, .. } | Propagation::Remove { origin, .. } => origin,
        }
    }
}

/// Sent by a pod that wants to join the mesh through a friend, and
/// forwarded by that friend to the rest of its peers.
///
/// `videos` carries the joiner's own records so the receiving side can
/// catch up without waiting for new writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub url: PodUrl,
    #[serde(default)]
    pub videos: Vec<VideoRecord>,
}

/// Answer to an accepted [`JoinRequest`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JoinResponse {
    /// The accepting pod's friends at the time of the request, joiner excluded.
    pub peers: Vec<PodUrl>,
    /// The accepting pod's whole catalog.
    #[serde(default)]
    pub videos: Vec<VideoRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub url: PodUrl,
}
