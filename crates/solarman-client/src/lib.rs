use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use types::TelemetryPayload;

pub mod mock;
mod transport;

pub use transport::{HttpTransport, Transport};

pub const DEFAULT_BASE_URL: &str = "https://globalapi.solarmanpv.com";
pub const TOKEN_PATH: &str = "/account/v1.0/token";
pub const CURRENT_DATA_PATH: &str = "/device/v1.0/currentData";

/// Subtracted from the advertised token lifetime so a token never expires in flight.
pub const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Upper bound on a token lifetime; `expires_in` is server controlled.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(u32::MAX as u64);

const CODE_INVALID_APP_ID: &str = "2101021";
const CODE_INVALID_APP_SECRET: &str = "2101019";
const CODE_INVALID_EMAIL_OR_PASSWORD: &str = "2101025";
const CODE_DEVICE_NOT_FOUND: &str = "2101008";
const CODE_DEVICE_NOT_BOUND: &str = "2101016";

const INVALID_EMAIL_OR_PASSWORD: &str = "invalid email or password";
const MISSING_TOKEN: &str = "could not get access token";

/// Connection settings for the Solarman cloud API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid application id: {0}")]
    InvalidApplicationId(String),
    #[error("invalid application secret: {0}")]
    InvalidApplicationSecret(String),
    #[error("invalid email or password")]
    InvalidEmailOrPassword,
    #[error("invalid device serial number: {0}")]
    InvalidDeviceSerialNumber(String),
    #[error("could not get access token")]
    MissingToken,
    #[error("api error: {0}")]
    Api(String),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("response decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// The message without the kind prefix; server text is returned verbatim.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidApplicationId(msg)
            | Self::InvalidApplicationSecret(msg)
            | Self::InvalidDeviceSerialNumber(msg)
            | Self::Api(msg) => msg.clone(),
            Self::InvalidEmailOrPassword => INVALID_EMAIL_OR_PASSWORD.to_string(),
            Self::MissingToken => MISSING_TOKEN.to_string(),
            Self::Timeout { timeout_ms } => format!("request timed out after {timeout_ms}ms"),
            Self::Http(err) => err.to_string(),
            Self::Status(status) => format!("unexpected http status {status}"),
            Self::Decode(err) => err.to_string(),
        }
    }

    /// Errors that only new credentials or a new device serial can fix.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::InvalidApplicationId(_)
                | Self::InvalidApplicationSecret(_)
                | Self::InvalidEmailOrPassword
                | Self::InvalidDeviceSerialNumber(_)
        )
    }
}

/// Maps a rejected token exchange to its error kind.
pub fn classify_token_failure(code: Option<&str>, msg: String) -> ApiError {
    match code {
        Some(CODE_INVALID_APP_ID) => ApiError::InvalidApplicationId(msg),
        Some(CODE_INVALID_APP_SECRET) => ApiError::InvalidApplicationSecret(msg),
        Some(CODE_INVALID_EMAIL_OR_PASSWORD) => ApiError::InvalidEmailOrPassword,
        _ => ApiError::Api(msg),
    }
}

/// Maps a rejected `currentData` request to its error kind.
pub fn classify_data_failure(code: Option<&str>, msg: String) -> ApiError {
    match code {
        Some(CODE_DEVICE_NOT_FOUND) | Some(CODE_DEVICE_NOT_BOUND) => {
            ApiError::InvalidDeviceSerialNumber(msg)
        }
        _ => ApiError::Api(msg),
    }
}

/// Account credentials plus the application key pair issued by Solarman.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub app_id: String,
    pub app_secret: String,
}

impl Credentials {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
        }
    }

    /// Hex-encoded SHA-256 of the password, the only form the API accepts.
    pub fn password_hash(&self) -> String {
        hex::encode(Sha256::digest(self.password.as_bytes()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

/// A bearer token and the instant it stops being usable.
#[derive(Clone)]
pub struct Token {
    access_token: String,
    expires_at: Instant,
}

impl Token {
    pub fn new(access_token: impl Into<String>, obtained_at: Instant, lifetime: Duration) -> Self {
        let lifetime = lifetime.min(MAX_TOKEN_LIFETIME);
        let expires_at = obtained_at
            .checked_add(lifetime)
            .unwrap_or(obtained_at)
            .checked_sub(TOKEN_SAFETY_MARGIN)
            .unwrap_or(obtained_at);
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    msg: Option<String>,
}

impl Envelope {
    fn code(&self) -> Option<String> {
        match self.code.as_ref()? {
            Value::String(code) => Some(code.clone()),
            Value::Number(code) => Some(code.to_string()),
            _ => None,
        }
    }

    fn into_failure(self, classify: fn(Option<&str>, String) -> ApiError) -> ApiError {
        let code = self.code();
        let msg = self.msg.unwrap_or_else(|| match &code {
            Some(code) => format!("request failed with code {code}"),
            None => "request failed".to_string(),
        });
        classify(code.as_deref(), msg)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(flatten)]
    envelope: Envelope,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<Value>,
}

impl TokenResponse {
    fn lifetime(&self) -> Duration {
        let seconds = match &self.expires_in {
            Some(Value::Number(value)) => value.as_f64(),
            Some(Value::String(value)) => value.trim().parse().ok(),
            _ => None,
        }
        .unwrap_or(0.0);

        if seconds.is_nan() || seconds <= 0.0 {
            Duration::ZERO
        } else if seconds >= MAX_TOKEN_LIFETIME.as_secs_f64() {
            MAX_TOKEN_LIFETIME
        } else {
            Duration::from_secs_f64(seconds)
        }
    }
}

/// Solarman cloud client for one credential set.
///
/// Holds at most one bearer token and exchanges a new one whenever the cached
/// token is missing or past its expiry. The token lock is held across the
/// exchange so concurrent callers never authenticate twice.
pub struct SolarmanClient {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    base_url: String,
    token: Mutex<Option<Token>>,
}

impl SolarmanClient {
    pub fn new(transport: Arc<dyn Transport>, credentials: Credentials, config: &ClientConfig) -> Self {
        Self {
            transport,
            credentials,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        }
    }

    pub fn with_http(credentials: Credentials, config: &ClientConfig) -> Result<Self, ApiError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), credentials, config))
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns a usable bearer token, exchanging credentials first if needed.
    pub async fn token(&self) -> Result<String, ApiError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_valid_at(Instant::now()) {
                return Ok(token.access_token().to_string());
            }
        }

        let token = self.fetch_token().await?;
        let access_token = token.access_token().to_string();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn fetch_token(&self) -> Result<Token, ApiError> {
        let url = format!(
            "{}{}?appId={}",
            self.base_url, TOKEN_PATH, self.credentials.app_id
        );
        let body = json!({
            "appSecret": self.credentials.app_secret,
            "email": self.credentials.email,
            "password": self.credentials.password_hash(),
        });

        debug!(email = %self.credentials.email, app_id = %self.credentials.app_id, "requesting access token");
        let response = self.transport.post_json(&url, None, &body).await?;
        let response: TokenResponse = serde_json::from_value(response)?;

        if !response.envelope.success {
            let code = response.envelope.code();
            let err = response.envelope.into_failure(classify_token_failure);
            warn!(code = ?code, error = %err, "token exchange rejected");
            return Err(err);
        }

        let lifetime = response.lifetime();
        let access_token = response
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::MissingToken)?;

        info!(expires_in_s = lifetime.as_secs(), "access token refreshed");
        Ok(Token::new(access_token, Instant::now(), lifetime))
    }

    /// Fetches the current measurements of one device.
    pub async fn get_data(&self, serial_number: &str) -> Result<TelemetryPayload, ApiError> {
        if serial_number.trim().is_empty() {
            return Err(ApiError::InvalidDeviceSerialNumber(
                "device serial number is empty".to_string(),
            ));
        }

        let token = self.token().await?;
        let url = format!("{}{}", self.base_url, CURRENT_DATA_PATH);
        let body = json!({ "deviceSn": serial_number });
        let response = self.transport.post_json(&url, Some(&token), &body).await?;

        let envelope = Envelope::deserialize(&response)?;
        if !envelope.success {
            let code = envelope.code();
            let err = envelope.into_failure(classify_data_failure);
            warn!(device_sn = serial_number, code = ?code, error = %err, "device data request rejected");
            return Err(err);
        }

        let payload: TelemetryPayload = serde_json::from_value(response)?;
        debug!(
            device_sn = serial_number,
            measurements = payload.data_list.len(),
            "device data received"
        );
        Ok(payload)
    }
}

impl fmt::Debug for SolarmanClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolarmanClient")
            .field("credentials", &self.credentials)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
