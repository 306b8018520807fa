//! HTTP client for the sync relay.
//!
//! The relay stores one encrypted blob per sync id and knows nothing about
//! its contents. Three endpoints are used: `sync_health`, `sync_push` and
//! `sync_pull`. Uses reqwest with JSON serialization.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::types::{HealthResponse, HealthStatus, PullResponse, PushRequest, PushResponse};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

/// Server message meaning "nothing stored for this sync id yet".
const NO_DATA_MESSAGE: &str = "No data found";

/// Network surface used by the sync engine.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn health(&self) -> SyncResult<HealthStatus>;

    async fn push(&self, request: &PushRequest) -> SyncResult<()>;

    /// Returns the stored wire blob, or `None` when nothing has been pushed.
    async fn pull(&self, sync_id: &str, device_id: &str) -> SyncResult<Option<String>>;
}

/// reqwest-backed [`SyncTransport`].
#[derive(Clone)]
pub struct SyncApiClient {
    client: Client,
    base_url: String,
}

impl SyncApiClient {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }
}

/// Maps non-success HTTP statuses onto sync errors.
fn check_status(resp: Response, endpoint: &str) -> SyncResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SyncError::Auth(format!("{endpoint} returned {status}")));
    }
    if status.is_server_error() {
        return Err(SyncError::Network(format!("{endpoint} returned {status}")));
    }
    Err(SyncError::Api(format!("{endpoint} returned {status}")))
}

#[async_trait]
impl SyncTransport for SyncApiClient {
    async fn health(&self) -> SyncResult<HealthStatus> {
        let resp = self.client.get(self.url("sync_health")).send().await?;
        let body: HealthResponse = check_status(resp, "sync_health")?.json().await?;
        Ok(body.status)
    }

    async fn push(&self, request: &PushRequest) -> SyncResult<()> {
        let resp = self
            .client
            .post(self.url("sync_push"))
            .json(request)
            .send()
            .await?;
        let body: PushResponse = check_status(resp, "sync_push")?.json().await?;

        if !body.success {
            return Err(SyncError::Api(
                body.error.unwrap_or_else(|| "push rejected".to_string()),
            ));
        }
        debug!("pushed {} bytes for sync group", request.data.len());
        Ok(())
    }

    async fn pull(&self, sync_id: &str, device_id: &str) -> SyncResult<Option<String>> {
        let url = format!(
            "{}?sync_id={}&device_id={}",
            self.url("sync_pull"),
            urlencoding::encode(sync_id),
            urlencoding::encode(device_id)
        );
        let resp = self.client.get(&url).send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!("sync_pull returned 404, treating as empty");
            return Ok(None);
        }
        let body: PullResponse = check_status(resp, "sync_pull")?.json().await?;

        if !body.success {
            return match body.error {
                Some(msg) if msg == NO_DATA_MESSAGE => Ok(None),
                Some(msg) => Err(SyncError::Api(msg)),
                None => Err(SyncError::Api("pull rejected".to_string())),
            };
        }
        Ok(body.data.filter(|d| !d.is_empty()))
    }
}
