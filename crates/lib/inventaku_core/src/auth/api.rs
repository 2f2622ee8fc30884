//! Network collaborator for the `/auth/*` endpoints.
//!
//! [`AuthApi`] is the seam the authority talks through; [`HttpAuthApi`] is the
//! `reqwest` implementation used against a real Inventaku server. Requests are
//! credentialed: the client keeps a cookie jar, optionally persisted to
//! session storage so a later process can reuse the server session.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::storage::{SessionStorage, StorageError};
use crate::config::SessionConfig;
use crate::models::auth::{AuthResponse, Credentials};

/// Storage key holding the persisted API cookies (a JSON list of the
/// `Set-Cookie` headers received and the URL each came from).
pub const COOKIE_KEY: &str = "inventaku_cookies";

/// Collaborator errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {}", status_detail(.message, .body))]
    Status {
        status: u16,
        /// `message` field of a JSON error payload, when present.
        message: Option<String>,
        body: String,
    },

    #[error("Response parse error: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

fn status_detail<'a>(message: &'a Option<String>, body: &'a str) -> &'a str {
    message.as_deref().unwrap_or(body)
}

impl ApiError {
    /// Build a status error, pulling `message` out of a JSON body if there is one.
    pub fn from_status(status: u16, body: String) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .filter(|m| !m.trim().is_empty());
        ApiError::Status {
            status,
            message,
            body,
        }
    }

    /// The payload's `message` if present, otherwise the error text.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status {
                message: Some(m), ..
            } => m.clone(),
            other => other.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The `/auth/*` operations the authority depends on.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /auth/login`.
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError>;

    /// `GET /auth/me`. A 401 resolves to a response with no user.
    async fn me(&self) -> Result<AuthResponse, ApiError>;

    /// `POST /auth/logout`.
    async fn logout(&self) -> Result<(), ApiError>;
}

#[async_trait]
impl<T: AuthApi + ?Sized> AuthApi for Arc<T> {
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError> {
        (**self).login(credentials).await
    }

    async fn me(&self) -> Result<AuthResponse, ApiError> {
        (**self).me().await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        (**self).logout().await
    }
}

/// One received `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredCookie {
    url: String,
    set_cookie: String,
}

impl StoredCookie {
    fn name(&self) -> &str {
        cookie_name(&self.set_cookie)
    }
}

fn cookie_name(set_cookie: &str) -> &str {
    set_cookie
        .split(';')
        .next()
        .and_then(|pair| pair.split_once('='))
        .map(|(name, _)| name.trim())
        .unwrap_or_default()
}

/// Cookie store that can be emptied and that keeps the raw `Set-Cookie`
/// headers, whatever their `Path`, so they can be replayed later.
#[derive(Default)]
struct SessionJar {
    jar: RwLock<Jar>,
    received: Mutex<Vec<StoredCookie>>,
}

impl SessionJar {
    fn jar(&self) -> RwLockReadGuard<'_, Jar> {
        self.jar.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn received(&self) -> MutexGuard<'_, Vec<StoredCookie>> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn restore(&self, cookies: Vec<StoredCookie>) {
        for cookie in &cookies {
            match Url::parse(&cookie.url) {
                Ok(url) => self.jar().add_cookie_str(&cookie.set_cookie, &url),
                Err(e) => warn!(url = %cookie.url, error = %e, "skipping stored cookie"),
            }
        }
        *self.received() = cookies;
    }

    fn snapshot(&self) -> Vec<StoredCookie> {
        self.received().clone()
    }

    fn clear(&self) {
        *self.jar.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Jar::default();
        self.received().clear();
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let headers: Vec<&HeaderValue> = cookie_headers.collect();
        {
            let mut received = self.received();
            for value in &headers {
                let Ok(raw) = value.to_str() else {
                    continue;
                };
                let name = cookie_name(raw);
                received.retain(|c| !(c.url == url.as_str() && c.name() == name));
                received.push(StoredCookie {
                    url: url.to_string(),
                    set_cookie: raw.to_string(),
                });
            }
        }
        self.jar().set_cookies(&mut headers.into_iter(), url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar().cookies(url)
    }
}

/// `reqwest`-backed [`AuthApi`].
pub struct HttpAuthApi {
    client: Client,
    base: Url,
    jar: Arc<SessionJar>,
    cookie_storage: Option<Arc<dyn SessionStorage>>,
}

impl HttpAuthApi {
    /// Client for the API rooted at `base_url` (e.g. `http://host:3000/api`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base = normalize_base(base_url)?;
        let jar = Arc::new(SessionJar::default());
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("client build: {e}")))?;
        Ok(Self {
            client,
            base,
            jar,
            cookie_storage: None,
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, ApiError> {
        Self::new(&config.api_url, config.http_timeout)
    }

    /// Keep the session cookie in `storage` between processes.
    ///
    /// Cookies already stored are loaded into the jar immediately.
    pub fn with_persistent_cookies(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        match storage.get(COOKIE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<StoredCookie>>(&raw) {
                Ok(cookies) => {
                    debug!(count = cookies.len(), "restored persisted API cookies");
                    self.jar.restore(cookies);
                }
                Err(e) => warn!(error = %e, "ignoring unreadable persisted API cookies"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not read persisted API cookies"),
        }
        self.cookie_storage = Some(storage);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))
    }

    fn persist_cookies(&self) {
        let Some(storage) = &self.cookie_storage else {
            return;
        };
        let cookies = self.jar.snapshot();
        let result = if cookies.is_empty() {
            storage.remove(COOKIE_KEY)
        } else {
            serde_json::to_string(&cookies)
                .map_err(StorageError::from)
                .and_then(|raw| storage.set(COOKIE_KEY, &raw))
        };
        if let Err(e) = result {
            warn!(error = %e, "could not persist API cookies");
        }
    }

    fn forget_cookies(&self) {
        self.jar.clear();
        if let Some(storage) = &self.cookie_storage
            && let Err(e) = storage.remove(COOKIE_KEY)
        {
            warn!(error = %e, "could not clear persisted API cookies");
        }
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError> {
        let url = self.endpoint("auth/login")?;
        debug!(%url, username = %credentials.username, "login request");
        let resp = self
            .client
            .post(url)
            .json(credentials)
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("login: {e}")))?;
        let body = read_auth_response(resp).await?;
        self.persist_cookies();
        Ok(body)
    }

    async fn me(&self) -> Result<AuthResponse, ApiError> {
        let url = self.endpoint("auth/me")?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("me: {e}")))?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            debug!("session check: not authenticated");
            self.forget_cookies();
            return Ok(AuthResponse::anonymous());
        }
        let body = read_auth_response(resp).await?;
        self.persist_cookies();
        Ok(body)
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let url = self.endpoint("auth/logout")?;
        let result = self.client.post(url).send().await;
        self.forget_cookies();
        let resp = result.map_err(|e| ApiError::Transport(format!("logout: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), body));
        }
        Ok(())
    }
}

/// Ensure the base URL ends with `/` so `join` appends instead of replacing.
fn normalize_base(base_url: &str) -> Result<Url, ApiError> {
    let trimmed = base_url.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))
}

async fn read_auth_response(resp: Response) -> Result<AuthResponse, ApiError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| ApiError::Transport(format!("read body: {e}")))?;
    if !status.is_success() {
        return Err(ApiError::from_status(status.as_u16(), body));
    }
    if body.trim().is_empty() {
        return Ok(AuthResponse::anonymous());
    }
    serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
}
