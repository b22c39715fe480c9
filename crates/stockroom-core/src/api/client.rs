//! HTTP client for the warehouse backend's authentication endpoints.
//!
//! The backend may authenticate follow-up calls with a session cookie, a
//! bearer token returned by login, or both. Cookies live in the client's
//! cookie jar, saved to a JSON file when one is configured; a bearer token
//! is kept in memory and, when a keychain is configured, stored there. Both
//! survive a restart that way.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, MutexGuard, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context};
use cookie_store::CookieStore;
use futures::future::{BoxFuture, FutureExt};
use reqwest::{header, Client};
use reqwest_cookie_store::CookieStoreMutex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ApiError, AuthApi};
use crate::auth::{CredentialStore, Credentials, User};

/// Login endpoint, relative to the configured base URL
const LOGIN_PATH: &str = "/api/auth/login";

/// "Who am I" endpoint, relative to the configured base URL
const ME_PATH: &str = "/api/auth/me";

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Body of a successful login or `/me` call.
///
/// Accepts both a bare user object and `{ "user": ..., "token": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserEnvelope {
    Wrapped {
        user: User,
        #[serde(default)]
        token: Option<String>,
    },
    Bare {
        #[serde(flatten)]
        user: User,
        #[serde(default)]
        token: Option<String>,
    },
}

impl UserEnvelope {
    fn into_parts(self) -> (User, Option<String>) {
        match self {
            UserEnvelope::Wrapped { user, token } | UserEnvelope::Bare { user, token } => {
                (user, token)
            }
        }
    }
}

/// API client for the warehouse backend.
/// Clone is cheap - reqwest::Client, the token slot and the cookie jar are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
    keychain: Option<CredentialStore>,
    cookies: Arc<CookieStoreMutex>,
    cookie_file: Option<PathBuf>,
}

impl ApiClient {
    /// Create a new API client talking to `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let cookies = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = Client::builder()
            .timeout(timeout)
            .cookie_provider(cookies.clone())
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Arc::new(RwLock::new(None)),
            keychain: None,
            cookies,
            cookie_file: None,
        })
    }

    /// Keep the cookie jar in `path` and load whatever a previous run left
    /// there. An unreadable file starts an empty jar.
    pub fn with_cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match read_cookie_file(&path) {
            Ok(Some(jar)) => {
                debug!(path = %path.display(), "Restored cookie jar");
                *self.jar() = jar;
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable cookie file"),
        }
        self.cookie_file = Some(path);
        self
    }

    /// Persist bearer tokens in the OS keychain and pick up one stored by
    /// a previous run.
    pub fn with_keychain(mut self, keychain: CredentialStore) -> Self {
        match keychain.get_token() {
            Ok(token) => {
                debug!("Restored bearer token from keychain");
                self.set_token(Some(token));
            }
            Err(e) => debug!(error = %e, "No stored bearer token"),
        }
        self.keychain = Some(keychain);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&self, token: Option<String>) {
        let mut slot = self.token.write().unwrap_or_else(|e| e.into_inner());
        *slot = token;
    }

    pub fn has_token(&self) -> bool {
        self.token
            .read()
            .map(|t| t.is_some())
            .unwrap_or(false)
    }

    fn jar(&self) -> MutexGuard<'_, CookieStore> {
        self.cookies.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write the cookie jar to the configured file, if any.
    fn save_cookies(&self) {
        let Some(ref path) = self.cookie_file else {
            return;
        };
        if let Err(e) = write_cookie_file(&self.jar(), path) {
            warn!(path = %path.display(), error = %e, "Failed to save cookie jar");
        }
    }

    fn forget_cookies(&self) {
        self.jar().clear();
        if let Some(ref path) = self.cookie_file {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cookie file"),
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        let token = self.token.read().unwrap_or_else(|e| e.into_inner());
        if let Some(ref token) = *token {
            match header::HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(value) => {
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(e) => warn!(error = %e, "Bearer token is not a valid header value"),
            }
        }
        headers
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn read_user(response: reqwest::Response) -> Result<(User, Option<String>), ApiError> {
        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        let envelope: UserEnvelope = serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse user: {}", e)))?;
        Ok(envelope.into_parts())
    }

    fn remember_token(&self, token: String) {
        if let Some(ref keychain) = self.keychain {
            if let Err(e) = keychain.store_token(&token) {
                warn!(error = %e, "Failed to store bearer token in keychain");
            }
        }
        self.set_token(Some(token));
    }

    /// Authenticate with the backend and return the logged-in user
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<User, ApiError> {
        debug!(name = %credentials.name, "Sending login request");
        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .header(header::ACCEPT, "application/json")
            .json(credentials)
            .send()
            .await?;

        let (user, token) = Self::read_user(response).await?;
        if let Some(token) = token {
            self.remember_token(token);
        }
        self.save_cookies();
        debug!(user_id = %user.id, "Login accepted");
        Ok(user)
    }

    /// Ask the backend who the ambient credential belongs to
    pub async fn current_user(&self) -> Result<User, ApiError> {
        let response = self
            .client
            .get(self.url(ME_PATH))
            .header(header::ACCEPT, "application/json")
            .headers(self.auth_headers())
            .send()
            .await?;

        let (user, token) = Self::read_user(response).await?;
        if let Some(token) = token {
            self.remember_token(token);
        }
        self.save_cookies();
        Ok(user)
    }
}

impl AuthApi for ApiClient {
    fn login<'a>(&'a self, credentials: &'a Credentials) -> BoxFuture<'a, Result<User, ApiError>> {
        self.authenticate(credentials).boxed()
    }

    fn me(&self) -> BoxFuture<'_, Result<User, ApiError>> {
        self.current_user().boxed()
    }

    fn clear_credential(&self) {
        self.set_token(None);
        if let Some(ref keychain) = self.keychain {
            if let Err(e) = keychain.delete_token() {
                debug!(error = %e, "No bearer token to remove from keychain");
            }
        }
        self.forget_cookies();
    }
}

/// Read a saved jar. `None` when there is no file yet.
fn read_cookie_file(path: &Path) -> anyhow::Result<Option<CookieStore>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context("Failed to open cookie file"),
    };
    // Session cookies carry no expiry; they are the login, so keep them too
    let jar = cookie_store::serde::json::load_all(BufReader::new(file))
        .map_err(|e| anyhow!("Failed to parse cookie file: {}", e))?;
    Ok(Some(jar))
}

fn write_cookie_file(jar: &CookieStore, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create cookie directory")?;
    }
    let mut buf = Vec::new();
    cookie_store::serde::json::save_incl_expired_and_nonpersistent(jar, &mut buf)
        .map_err(|e| anyhow!("Failed to serialize cookies: {}", e))?;
    fs::write(path, buf).context("Failed to write cookie file")
}
