//! Configuration module for file locations and API endpoints
//!
//! All configuration is loaded from environment variables prefixed with
//! `GMAIL_`. Paths default to dotfiles in the user's home directory.

use std::env;
use std::env::VarError;
use std::path::PathBuf;

use crate::errors::{AppError, AppResult};

/// Default credentials file name, relative to the home directory
const DEFAULT_CREDENTIALS_FILE: &str = ".yagms-credentials.json";
/// Default OAuth client keyfile name, relative to the home directory
const DEFAULT_OAUTH_KEYS_FILE: &str = ".yagms-oauth.keys.json";
/// Gmail REST API root
pub const DEFAULT_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Server-wide configuration
///
/// Shared by the `auth` bootstrap and the MCP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Where the issued OAuth2 token set is persisted
    pub credentials_path: PathBuf,
    /// OAuth client keyfile downloaded from the Google Cloud console
    pub oauth_keys_path: PathBuf,
    /// Gmail API base URL, without trailing slash
    pub api_base_url: String,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is set but empty or non-unicode,
    /// or if no home directory can be determined for a defaulted path.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// GMAIL_CREDENTIALS_PATH=/home/me/.yagms-credentials.json
    /// GMAIL_OAUTH_PATH=/home/me/.yagms-oauth.keys.json
    /// GMAIL_API_BASE_URL=https://gmail.googleapis.com/gmail/v1
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        Ok(Self {
            credentials_path: path_env("GMAIL_CREDENTIALS_PATH", DEFAULT_CREDENTIALS_FILE)?,
            oauth_keys_path: path_env("GMAIL_OAUTH_PATH", DEFAULT_OAUTH_KEYS_FILE)?,
            api_base_url: optional_env("GMAIL_API_BASE_URL")?
                .map(|v| normalize_base_url(&v))
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_owned()),
        })
    }
}

/// Read an optional environment variable, rejecting empty values
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Err(AppError::InvalidInput(format!(
            "environment variable {key} is set but empty"
        ))),
        Ok(v) => Ok(Some(v.trim().to_owned())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Resolve a path variable, falling back to `~/<default_file>`
fn path_env(key: &str, default_file: &str) -> AppResult<PathBuf> {
    if let Some(v) = optional_env(key)? {
        return Ok(PathBuf::from(v));
    }
    dirs::home_dir()
        .map(|home| home.join(default_file))
        .ok_or_else(|| {
            AppError::InvalidInput(format!(
                "cannot determine home directory; set {key} explicitly"
            ))
        })
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_owned()
}
