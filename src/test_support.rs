//! Shared fixtures for unit tests
//!
//! Lays out a credentials file and an OAuth keyfile in a temporary directory,
//! with the keyfile's token endpoint and the Gmail API pointed at a mock
//! server.

use std::path::Path;

use serde_json::{Value, json};
use tempfile::TempDir;

use crate::config::ServerConfig;

pub struct Fixture {
    // Held so the directory outlives the test.
    _dir: TempDir,
    pub config: ServerConfig,
}

impl Fixture {
    /// Write both files, with `mock_url` serving `/token` and `/gmail/v1`
    pub fn new(mock_url: &str, credentials: Value) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Self::config_in(dir.path(), mock_url);

        let keyfile = json!({
            "installed": {
                "client_id": "client-1",
                "client_secret": "secret-1",
                "redirect_uris": ["http://localhost"],
                "token_uri": format!("{mock_url}/token"),
            }
        });
        std::fs::write(&config.oauth_keys_path, keyfile.to_string()).expect("write keyfile");
        std::fs::write(&config.credentials_path, credentials.to_string())
            .expect("write credentials");

        Self { _dir: dir, config }
    }

    /// Config pointing into `dir` without creating any files
    pub fn config_in(dir: &Path, mock_url: &str) -> ServerConfig {
        ServerConfig {
            credentials_path: dir.join("credentials.json"),
            oauth_keys_path: dir.join("oauth.keys.json"),
            api_base_url: format!("{mock_url}/gmail/v1"),
        }
    }

    pub fn read_credentials(&self) -> Value {
        let raw = std::fs::read_to_string(&self.config.credentials_path).expect("read credentials");
        serde_json::from_str(&raw).expect("credentials json")
    }
}
