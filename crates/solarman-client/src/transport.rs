use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{ApiError, ClientConfig};

/// Posts JSON to the Solarman API and hands back the decoded response body.
///
/// The client treats implementations as stateless; one transport may be
/// shared by any number of clients.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, url: &str, bearer: Option<&str>, body: &Value) -> Result<Value, ApiError>;
}

/// Transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    timeout_ms: u64,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self::from_client(http, config.timeout_ms))
    }

    /// Reuses an existing session; `timeout_ms` is only used for error reporting.
    pub fn from_client(http: reqwest::Client, timeout_ms: u64) -> Self {
        Self { http, timeout_ms }
    }

    fn map_error(&self, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout {
                timeout_ms: self.timeout_ms,
            }
        } else {
            ApiError::Http(err)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &str, bearer: Option<&str>, body: &Value) -> Result<Value, ApiError> {
        let mut request = self.http.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| self.map_error(err))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|err| self.map_error(err))?;
        debug!(status = status.as_u16(), len = bytes.len(), "solarman response");

        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(value),
            Err(_) if !status.is_success() => Err(ApiError::Status(status.as_u16())),
            Err(err) => Err(ApiError::Decode(err)),
        }
    }
}
