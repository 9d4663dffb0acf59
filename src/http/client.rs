use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ErrorBody;
use crate::error::{PodError, Result};
use crate::transport::PodClient;
use crate::types::{JoinRequest, JoinResponse, LeaveRequest, PodUrl, Propagation};

/// [`PodClient`] speaking JSON over HTTP to other pods' routers.
pub struct HttpPodClient {
    client: Client,
}

impl HttpPodClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PodError::Transfer(format!("cannot build http client: {e}")))?;
        Ok(Self { client })
    }

    async fn post<Req: Serialize + ?Sized>(
        &self,
        target: &PodUrl,
        path: &str,
        body: &Req,
    ) -> Result<Response> {
        let url = target.endpoint(path);
        debug!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| PodError::Unreachable {
                pod: target.clone(),
                reason: err.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let reason = match resp.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        Err(match status {
            StatusCode::CONFLICT => PodError::Refused {
                pod: target.clone(),
                reason,
            },
            _ => PodError::Protocol {
                pod: target.clone(),
                reason: format!("{status}: {reason}"),
            },
        })
    }

    async fn post_json<Req, Resp>(&self, target: &PodUrl, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.post(target, path, body)
            .await?
            .json()
            .await
            .map_err(|err| PodError::Protocol {
                pod: target.clone(),
                reason: format!("malformed response: {err}"),
            })
    }
}

#[async_trait]
impl PodClient for HttpPodClient {
    async fn join(&self, target: &PodUrl, request: &JoinRequest) -> Result<JoinResponse> {
        self.post_json(target, "/api/v1/pods/join", request).await
    }

    async fn announce(&self, target: &PodUrl, request: &JoinRequest) -> Result<()> {
        self.post(target, "/api/v1/pods/announce", request).await?;
        Ok(())
    }

    async fn leave(&self, target: &PodUrl, request: &LeaveRequest) -> Result<()> {
        self.post(target, "/api/v1/pods/leave", request).await?;
        Ok(())
    }

    async fn propagate(&self, target: &PodUrl, message: &Propagation) -> Result<()> {
        self.post(target, "/api/v1/remote/videos", message).await?;
        Ok(())
    }
}
