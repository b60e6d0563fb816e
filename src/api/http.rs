//! reqwest-backed implementation of the controller API

use super::{ApiError, CameraApi, CommandSink, UnlockApi};
use crate::config::ConsoleConfig;
use crate::protocol::{
    CameraFrame, CameraStartResponse, CameraStatus, CommandOutcome, CommandRequest, CommandResult,
    UnlockGrant, UnlockRequest, UnlockStatus,
};
use async_trait::async_trait;
use reqwest::Response;
use serde::de::DeserializeOwned;

/// HTTP client for the remote controller REST API
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(config: &ConsoleConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map error status codes, then deserialize the body
    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        if let Some(err) = ApiError::from_status(response.status()) {
            return Err(err);
        }
        response.json::<T>().await.map_err(ApiError::from)
    }
}

#[async_trait]
impl CommandSink for HttpApi {
    async fn send_command(&self, request: &CommandRequest) -> Result<CommandOutcome, ApiError> {
        let response = self
            .client
            .post(self.url("/control/command"))
            .json(request)
            .send()
            .await?;

        let outcome: CommandOutcome = Self::parse(response).await?;
        match outcome.result {
            CommandResult::Blocked => Err(ApiError::Blocked {
                reason: outcome
                    .status_reason
                    .clone()
                    .unwrap_or_else(|| "blocked by controller".into()),
            }),
            CommandResult::Error => Err(ApiError::InvalidResponse(
                outcome
                    .status_reason
                    .clone()
                    .unwrap_or_else(|| "controller error".into()),
            )),
            CommandResult::Ok => Ok(outcome),
        }
    }
}

#[async_trait]
impl CameraApi for HttpApi {
    async fn status(&self) -> Result<CameraStatus, ApiError> {
        let response = self.client.get(self.url("/camera/status")).send().await?;
        Self::parse(response).await
    }

    async fn start(&self) -> Result<CameraStartResponse, ApiError> {
        let response = self.client.post(self.url("/camera/start")).send().await?;
        Self::parse(response).await
    }

    async fn fetch_frame(&self) -> Result<CameraFrame, ApiError> {
        let response = self.client.get(self.url("/camera/frame")).send().await?;
        Self::parse(response).await
    }

    fn stream_url(&self, client_id: &str, session_id: &str, cachebust: u64) -> String {
        format!(
            "{}/camera/stream.mjpeg?client={}&session_id={}&ts={}",
            self.base_url, client_id, session_id, cachebust
        )
    }
}

#[async_trait]
impl UnlockApi for HttpApi {
    async fn unlock(&self, request: &UnlockRequest) -> Result<UnlockGrant, ApiError> {
        let response = self
            .client
            .post(self.url("/control/manual-unlock"))
            .json(request)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn unlock_status(&self) -> Result<UnlockStatus, ApiError> {
        let response = self
            .client
            .get(self.url("/control/manual-unlock/status"))
            .send()
            .await?;
        Self::parse(response).await
    }
}
