use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::series::SeriesKind;

pub const LATEST_PATH: &str = "/solar-data";
pub const SET_VAR_PATH: &str = "/solar-set-var";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("unexpected response shape: {0}")]
    Shape(String),
    #[error("client setup failed: {0}")]
    Setup(String),
}

/// Request/response side of the controller API.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Raw `/solar-data` object.
    async fn fetch_latest(&self) -> Result<Value, ClientError>;
    /// Raw history records for one series.
    async fn fetch_history(&self, kind: SeriesKind) -> Result<Vec<Value>, ClientError>;
    async fn set_variable(&self, name: &str, value: f64) -> Result<(), ClientError>;
}

/// reqwest-backed client for the controller's HTTP endpoints. Never retries on
/// its own; the caller decides when to try again.
#[derive(Debug, Clone)]
pub struct HttpTelemetryClient {
    base_url: String,
    client: Client,
}

impl HttpTelemetryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Setup(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(&self, path: &str) -> Result<Value, ClientError> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self.client.get(&url).send().await?;
        let response = ensure_success(url, response).await?;
        Ok(response.json::<Value>().await?)
    }
}

async fn ensure_success(url: String, response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        url,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl TelemetrySource for HttpTelemetryClient {
    async fn fetch_latest(&self) -> Result<Value, ClientError> {
        let body = self.get_json(LATEST_PATH).await?;
        if !body.is_object() {
            return Err(ClientError::Shape(format!("{LATEST_PATH} did not return an object")));
        }
        Ok(body)
    }

    async fn fetch_history(&self, kind: SeriesKind) -> Result<Vec<Value>, ClientError> {
        match self.get_json(kind.endpoint()).await? {
            Value::Array(records) => {
                debug!(%kind, records = records.len(), "history fetched");
                Ok(records)
            }
            _ => Err(ClientError::Shape(format!("{} did not return an array", kind.endpoint()))),
        }
    }

    async fn set_variable(&self, name: &str, value: f64) -> Result<(), ClientError> {
        let url = self.url(&format!("{SET_VAR_PATH}/{name}"));
        info!(variable = name, value, "setting controller variable");
        let response = self.client.post(&url).json(&json!({ "value": value })).send().await?;
        ensure_success(url, response).await?;
        Ok(())
    }
}
