//! OAuth2 credential lifecycle
//!
//! Loads the persisted token set and the OAuth client keyfile, refreshes an
//! expired access token, and persists every token rotation as soon as it is
//! observed. The credentials file always reflects the newest token set.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::authorize::AuthorizationHelper;
use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_REDIRECT_URI: &str = "http://localhost";

/// Persisted OAuth2 token set
///
/// Known fields are typed; anything else the provider issues is kept in
/// `extra` so a load/save round trip never drops data.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry as epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "[redacted]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expiry_date", &self.expiry_date)
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Whether the access token has expired at `now_ms`
    ///
    /// A token set without `expiry_date` is never considered expired.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry_date.is_some_and(|expiry| now_ms >= expiry)
    }

    /// Overlay every field present in `issued` onto `self`
    ///
    /// Fields the token endpoint omitted (typically `refresh_token` when it
    /// was not rotated) keep their previous value.
    pub fn merge(&mut self, issued: Credentials) {
        if issued.access_token.is_some() {
            self.access_token = issued.access_token;
        }
        if issued.refresh_token.is_some() {
            self.refresh_token = issued.refresh_token;
        }
        if issued.expiry_date.is_some() {
            self.expiry_date = issued.expiry_date;
        }
        if issued.scope.is_some() {
            self.scope = issued.scope;
        }
        if issued.token_type.is_some() {
            self.token_type = issued.token_type;
        }
        if issued.id_token.is_some() {
            self.id_token = issued.id_token;
        }
        self.extra.extend(issued.extra);
    }

    /// Apply the non-empty fields of a rotation event
    pub fn apply(&mut self, update: &TokenUpdate) {
        if let Some(token) = update.refresh_token.as_ref().filter(|t| !t.is_empty()) {
            self.refresh_token = Some(token.clone());
        }
        if let Some(token) = update.access_token.as_ref().filter(|t| !t.is_empty()) {
            self.access_token = Some(token.clone());
        }
        if let Some(expiry) = update.expiry_date.filter(|e| *e > 0) {
            self.expiry_date = Some(expiry);
        }
    }
}

/// Token rotation event
///
/// Emitted whenever the OAuth client obtains new tokens outside of the
/// startup refresh. Any subset of fields may be present.
#[derive(Clone, Default, PartialEq)]
pub struct TokenUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expiry_date: Option<i64>,
}

impl fmt::Debug for TokenUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenUpdate")
            .field("access_token", &self.access_token.is_some())
            .field("refresh_token", &self.refresh_token.is_some())
            .field("expiry_date", &self.expiry_date)
            .finish()
    }
}

impl From<&Credentials> for TokenUpdate {
    fn from(issued: &Credentials) -> Self {
        Self {
            access_token: issued.access_token.clone(),
            refresh_token: issued.refresh_token.clone(),
            expiry_date: issued.expiry_date,
        }
    }
}

/// OAuth client registration, read from the keyfile
///
/// Provisioning input only: never written back.
#[derive(Debug, Clone)]
pub struct OAuthKeyfile {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub auth_uri: String,
    pub token_uri: String,
}

/// Keyfile document as downloaded from the Google Cloud console
#[derive(Deserialize)]
struct KeyfileDocument {
    installed: Option<ClientKeys>,
    web: Option<ClientKeys>,
}

#[derive(Deserialize)]
struct ClientKeys {
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

impl OAuthKeyfile {
    /// Read and parse a keyfile
    ///
    /// # Errors
    ///
    /// - `MissingKeyfile` if the file does not exist
    /// - `InvalidInput` if it is not a recognised keyfile document
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::MissingKeyfile(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(|e| match e {
            AppError::InvalidInput(msg) => {
                AppError::InvalidInput(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Parse a keyfile from its JSON text
    ///
    /// Accepts both the `installed` (desktop) and `web` client shapes.
    pub fn from_json(raw: &str) -> AppResult<Self> {
        let doc: KeyfileDocument = serde_json::from_str(raw)
            .map_err(|e| AppError::invalid(format!("malformed OAuth keyfile: {e}")))?;
        let keys = doc.installed.or(doc.web).ok_or_else(|| {
            AppError::invalid("OAuth keyfile has neither an 'installed' nor a 'web' client")
        })?;

        Ok(Self {
            client_id: keys.client_id,
            client_secret: SecretString::new(keys.client_secret.into()),
            redirect_uri: keys
                .redirect_uris
                .into_iter()
                .next()
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_owned()),
            auth_uri: keys.auth_uri.unwrap_or_else(|| DEFAULT_AUTH_URI.to_owned()),
            token_uri: keys
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_owned()),
        })
    }
}

/// On-disk credentials file
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the persisted token set
    ///
    /// # Errors
    ///
    /// - `MissingCredentials` if the file does not exist
    /// - `InvalidInput` if it is not valid JSON
    pub fn load(&self) -> AppResult<Credentials> {
        if !self.exists() {
            return Err(AppError::MissingCredentials(self.path.clone()));
        }
        let raw = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw).map_err(|e| {
            AppError::InvalidInput(format!(
                "malformed credentials file {}: {e}",
                self.path.display()
            ))
        })
    }

    /// Persist the token set, replacing the file atomically
    pub fn save(&self, credentials: &Credentials) -> AppResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let body = serde_json::to_vec_pretty(credentials)
            .map_err(|e| AppError::Internal(format!("serialization failure: {e}")))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Token endpoint response
#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    token_type: Option<String>,
    id_token: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TokenResponse {
    fn into_credentials(self, now_ms: i64) -> Credentials {
        Credentials {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expiry_date: self
                .expires_in
                .map(|secs| now_ms.saturating_add(secs.saturating_mul(1_000))),
            scope: self.scope,
            token_type: self.token_type,
            id_token: self.id_token,
            extra: self.extra,
        }
    }
}

/// Token endpoint error body (RFC 6749 section 5.2)
#[derive(Deserialize)]
struct TokenErrorBody {
    error: String,
    error_description: Option<String>,
}

/// OAuth2 client bound to a single client registration
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    keys: OAuthKeyfile,
}

impl OAuthClient {
    pub fn new(keys: OAuthKeyfile, http: reqwest::Client) -> Self {
        Self { http, keys }
    }

    pub fn keys(&self) -> &OAuthKeyfile {
        &self.keys
    }

    /// Exchange a refresh token for a new access token
    ///
    /// # Errors
    ///
    /// Returns `RefreshFailed` on transport failure or a non-2xx response.
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<Credentials> {
        self.token_request(&[
            ("client_id", self.keys.client_id.as_str()),
            ("client_secret", self.keys.client_secret.expose_secret()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
        .map_err(AppError::RefreshFailed)
    }

    /// Exchange an authorization code for an initial token set
    ///
    /// # Errors
    ///
    /// Returns `AuthFailed` on transport failure or a non-2xx response.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> AppResult<Credentials> {
        self.token_request(&[
            ("client_id", self.keys.client_id.as_str()),
            ("client_secret", self.keys.client_secret.expose_secret()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
        .map_err(AppError::AuthFailed)
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<Credentials, String> {
        let response = self
            .http
            .post(&self.keys.token_uri)
            .form(form)
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(match serde_json::from_str::<TokenErrorBody>(&text) {
                Ok(body) => match body.error_description {
                    Some(desc) => format!("{}: {desc}", body.error),
                    None => body.error,
                },
                Err(_) => format!("token endpoint returned {status}: {text}"),
            });
        }

        let token: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| format!("invalid token response: {e}"))?;
        Ok(token.into_credentials(now_ms()))
    }
}

/// Owner of the live credential set
///
/// Every token change passes through here and is flushed to disk before the
/// new token is handed out. `refresh_lock` serializes refreshes, so
/// concurrent requests on an expired token trigger a single refresh.
#[derive(Debug)]
pub struct CredentialManager {
    store: CredentialStore,
    oauth: OAuthClient,
    credentials: Mutex<Credentials>,
    refresh_lock: Mutex<()>,
}

impl CredentialManager {
    /// Load the credentials file and keyfile and bind the OAuth client
    ///
    /// # Errors
    ///
    /// - `MissingCredentials` if the credentials file is absent
    /// - `MissingKeyfile` if the OAuth keyfile is absent
    /// - `InvalidInput` if either file is malformed
    pub fn load(config: &ServerConfig) -> AppResult<Self> {
        let store = CredentialStore::new(&config.credentials_path);
        if !store.exists() {
            return Err(AppError::MissingCredentials(store.path().to_path_buf()));
        }
        let keys = OAuthKeyfile::load(&config.oauth_keys_path)?;
        let credentials = store.load()?;
        tracing::info!(path = %store.path().display(), "credentials loaded");

        Ok(Self {
            store,
            oauth: OAuthClient::new(keys, reqwest::Client::new()),
            credentials: Mutex::new(credentials),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Snapshot of the installed credential set
    #[cfg(test)]
    pub async fn credentials(&self) -> Credentials {
        self.credentials.lock().await.clone()
    }

    /// Refresh the access token if it has expired
    ///
    /// Every field the token endpoint returns is merged over the current
    /// set, which is then persisted and installed.
    ///
    /// # Errors
    ///
    /// Returns `RefreshFailed` if no refresh token is available or the
    /// token endpoint call fails. Nothing is retried.
    pub async fn ensure_fresh(&self) -> AppResult<Credentials> {
        let _refreshing = self.refresh_lock.lock().await;
        let mut credentials = self.credentials.lock().await;
        if !credentials.is_expired(now_ms()) {
            return Ok(credentials.clone());
        }

        tracing::info!("access token expired, refreshing");
        let refresh_token = credentials
            .refresh_token
            .clone()
            .ok_or_else(|| AppError::RefreshFailed("no refresh token available".to_owned()))?;
        let issued = self.oauth.refresh(&refresh_token).await?;

        let mut merged = credentials.clone();
        merged.merge(issued);
        self.store.save(&merged)?;
        *credentials = merged;
        tracing::info!("access token refreshed and saved");
        Ok(credentials.clone())
    }

    /// Handle a token rotation: merge non-empty fields and persist
    pub async fn on_token_event(&self, update: TokenUpdate) -> AppResult<()> {
        let mut credentials = self.credentials.lock().await;
        self.apply_rotation(&mut credentials, &update)
    }

    /// Current access token, rotating it first if it has expired
    ///
    /// The rotated tokens are published through [`Self::on_token_event`],
    /// so they reach disk before the new token is returned.
    ///
    /// # Errors
    ///
    /// - `RefreshFailed` if rotation was needed and failed
    /// - `AuthFailed` if no access token is installed
    pub async fn access_token(&self) -> AppResult<String> {
        let _refreshing = self.refresh_lock.lock().await;
        let current = self.credentials.lock().await.clone();
        if current.is_expired(now_ms()) {
            let refresh_token = current.refresh_token.ok_or_else(|| {
                AppError::RefreshFailed("no refresh token available".to_owned())
            })?;
            let issued = self.oauth.refresh(&refresh_token).await?;
            self.on_token_event(TokenUpdate::from(&issued)).await?;
        }

        self.credentials
            .lock()
            .await
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::AuthFailed("no access token; run 'auth' again".to_owned()))
    }

    fn apply_rotation(&self, credentials: &mut Credentials, update: &TokenUpdate) -> AppResult<()> {
        let mut next = credentials.clone();
        next.apply(update);
        self.store.save(&next)?;
        *credentials = next;
        tracing::info!(?update, "tokens updated and saved");
        Ok(())
    }
}

/// Run the interactive authorization flow and persist the issued tokens
///
/// Overwrites any existing credentials file.
///
/// # Errors
///
/// - `MissingKeyfile` if the OAuth keyfile is absent
/// - whatever the helper reports if authorization fails
pub async fn bootstrap<H: AuthorizationHelper>(
    config: &ServerConfig,
    helper: &H,
    scopes: &[&str],
) -> AppResult<Credentials> {
    let keys = OAuthKeyfile::load(&config.oauth_keys_path)?;
    let oauth = OAuthClient::new(keys, reqwest::Client::new());

    tracing::info!("launching authorization flow");
    let credentials = helper.authorize(&oauth, scopes).await?;
    CredentialStore::new(&config.credentials_path).save(&credentials)?;
    tracing::info!(path = %config.credentials_path.display(), "credentials saved");
    Ok(credentials)
}

/// Current time as epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
