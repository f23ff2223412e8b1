//! OAuth device authorization and token refresh.
//!
//! Both flows speak JSON over the same single-session transport the gRPC
//! calls use. The result code is the HTTP `:status`.

use crate::credentials::{CredentialStore, StoreError, TokenKind};
use bytes::Bytes;
use grpc::Endpoint;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use transport::{Request, Response, Session, TransportPool};

pub const DEVICE_CODE_PATH: &str = "/oauth/device/code";
pub const TOKEN_PATH: &str = "/oauth/token";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const REFRESH_GRANT: &str = "refresh_token";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("transport: {0}")]
    Transport(#[from] transport::Error),
    #[error("server answered {status}: {body}")]
    Status { status: u32, body: String },
    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("credential storage: {0}")]
    Store(#[from] StoreError),
    #[error("no refresh token stored")]
    NoRefreshToken,
    #[error("device code expired before authorization")]
    Expired,
    #[error("authorization denied: {0}")]
    Denied(String),
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub endpoint: Endpoint,
    pub client_id: String,
    pub audience: String,
    pub scope: String,
    /// Added to the polling interval on every `slow_down` reply.
    pub slow_down_step: Duration,
    pub response_capacity: usize,
}

impl AuthConfig {
    pub fn new(endpoint: Endpoint, client_id: impl Into<String>) -> Self {
        Self {
            endpoint,
            client_id: client_id.into(),
            audience: "ganymede-api".to_string(),
            scope: "offline_access".to_string(),
            slow_down_step: Duration::from_secs(5),
            response_capacity: transport::DEFAULT_RESPONSE_CAPACITY,
        }
    }
}

/// What the user needs to authorize this device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    #[serde(default)]
    pub verification_uri: Option<String>,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    /// Seconds between token polls.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Seconds until `device_code` stops being accepted.
    pub expires_in: u64,
}

fn default_interval() -> u64 {
    5
}

impl DeviceCode {
    /// Link that authorizes this device, with the user code filled in.
    pub fn activation_url(&self, host: &str) -> String {
        match &self.verification_uri_complete {
            Some(uri) => uri.clone(),
            None => format!("https://{host}/activate?user_code={}", self.user_code),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: String,
}

#[derive(Serialize)]
struct DeviceCodeRequest<'a> {
    client_id: &'a str,
    scope: &'a str,
    audience: &'a str,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    grant_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

fn is_success(response: &Response) -> bool {
    (200..300).contains(&response.status)
}

#[derive(Clone)]
pub struct AuthClient {
    pool: TransportPool,
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
}

impl AuthClient {
    pub fn new(pool: TransportPool, config: AuthConfig, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            pool,
            config,
            store,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Whether a refresh token is stored, i.e. the device was registered.
    pub fn is_registered(&self) -> Result<bool, AuthError> {
        Ok(self.store.read(TokenKind::RefreshToken)?.is_some())
    }

    /// Exchange the stored refresh token for a new access token.
    pub fn refresh(&self) -> Result<(), AuthError> {
        let refresh_token = self
            .store
            .read(TokenKind::RefreshToken)?
            .ok_or(AuthError::NoRefreshToken)?;

        let body = serde_json::to_vec(&TokenRequest {
            client_id: &self.config.client_id,
            grant_type: REFRESH_GRANT,
            device_code: None,
            refresh_token: Some(&refresh_token),
        })?;

        let mut session = self.open()?;
        let response = self.post(&mut session, TOKEN_PATH, body)?;
        session.release();

        if !is_success(&response) {
            tracing::warn!(status = response.status, "token refresh rejected");
            return Err(status_error(&response));
        }

        self.store_tokens(&response)?;
        tracing::info!("access token refreshed");
        Ok(())
    }

    /// Run the device authorization flow. `on_code` is shown the code the
    /// user must enter; the call returns once tokens are stored, or with
    /// [`AuthError::Expired`] when the code lapses first.
    pub fn register(&self, on_code: impl FnOnce(&DeviceCode)) -> Result<(), AuthError> {
        let body = serde_json::to_vec(&DeviceCodeRequest {
            client_id: &self.config.client_id,
            scope: &self.config.scope,
            audience: &self.config.audience,
        })?;

        let mut session = self.open()?;
        let response = self.post(&mut session, DEVICE_CODE_PATH, body)?;
        if !is_success(&response) {
            tracing::warn!(status = response.status, "device code request rejected");
            return Err(status_error(&response));
        }
        let code: DeviceCode = serde_json::from_slice(&response.body)?;
        tracing::info!(
            user_code = %code.user_code,
            interval = code.interval,
            expires_in = code.expires_in,
            "device code issued"
        );
        on_code(&code);

        let deadline = Instant::now() + Duration::from_secs(code.expires_in);
        let mut interval = Duration::from_secs(code.interval);
        let body = serde_json::to_vec(&TokenRequest {
            client_id: &self.config.client_id,
            grant_type: DEVICE_CODE_GRANT,
            device_code: Some(&code.device_code),
            refresh_token: None,
        })?;

        loop {
            if Instant::now() + interval >= deadline {
                tracing::warn!("device code expired");
                return Err(AuthError::Expired);
            }
            thread::sleep(interval);

            let response = self.post(&mut session, TOKEN_PATH, body.clone())?;
            if is_success(&response) {
                session.release();
                self.store_tokens(&response)?;
                tracing::info!("device registered");
                return Ok(());
            }

            let error = serde_json::from_slice::<ErrorResponse>(&response.body)
                .unwrap_or_default()
                .error;
            match error.as_str() {
                "slow_down" => {
                    interval += self.config.slow_down_step;
                    tracing::debug!(interval_secs = interval.as_secs(), "slowing down");
                }
                "expired_token" => return Err(AuthError::Expired),
                "access_denied" => return Err(AuthError::Denied(error)),
                _ => {
                    tracing::debug!(
                        status = response.status,
                        error = %error,
                        "authorization pending"
                    );
                }
            }
        }
    }

    fn open(&self) -> Result<Session, AuthError> {
        let endpoint = &self.config.endpoint;
        let mut session = self.pool.acquire(None)?;
        tracing::debug!(host = %endpoint.host, port = endpoint.port, "auth connecting");
        session.connect(&endpoint.host, endpoint.port, Some(&endpoint.authority))?;
        Ok(session)
    }

    fn post(
        &self,
        session: &mut Session,
        path: &str,
        body: Vec<u8>,
    ) -> Result<Response, AuthError> {
        let request = Request::json(&self.config.endpoint.authority, path, Bytes::from(body))
            .with_response_capacity(self.config.response_capacity);
        let response = session.perform(request).inspect_err(|e| {
            tracing::warn!(path, step = "perform", error = %e, "auth request failed");
        })?;
        tracing::debug!(path, status = response.status, "auth response");
        Ok(response)
    }

    fn store_tokens(&self, response: &Response) -> Result<(), AuthError> {
        let tokens: TokenResponse = serde_json::from_slice(&response.body)?;
        self.store
            .write(TokenKind::AccessToken, &tokens.access_token)?;
        if let Some(refresh) = tokens.refresh_token {
            self.store.write(TokenKind::RefreshToken, &refresh)?;
        }
        Ok(())
    }
}

fn status_error(response: &Response) -> AuthError {
    AuthError::Status {
        status: response.status,
        body: String::from_utf8_lossy(&response.body).into_owned(),
    }
}
