//! Application error model with MCP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to the appropriate MCP `ErrorData` type for protocol
//! compliance.

use std::path::PathBuf;

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Startup failures (`MissingCredentials`, `MissingKeyfile`, `RefreshFailed`)
/// are fatal to the process. Everything else surfaces per tool call.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Credentials file is absent; the `auth` flow has not been run yet
    #[error(
        "credentials not found at {}; run with the 'auth' argument first",
        .0.display()
    )]
    MissingCredentials(PathBuf),
    /// OAuth client keyfile is absent
    #[error(
        "OAuth keys not found at {}; download the client keyfile from the Google Cloud console",
        .0.display()
    )]
    MissingKeyfile(PathBuf),
    /// Token endpoint rejected or failed the refresh request
    #[error("failed to refresh access token: {0}")]
    RefreshFailed(String),
    /// Authorization failure (consent denied, code exchange failed, no token)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Gmail API returned an error; message is passed through as-is
    #[error("{0}")]
    Upstream(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error violates the tool input contract
    ///
    /// Contract violations are reported as protocol errors; every other
    /// failure is reported inside the tool result.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Convert to MCP `ErrorData`
    ///
    /// `InvalidInput` maps to `invalid_params`; every other variant is an
    /// `internal_error`.
    pub fn to_error_data(&self) -> ErrorData {
        let msg = self.to_string();
        match self {
            Self::InvalidInput(_) => {
                ErrorData::invalid_params(msg, Some(json!({ "code": "invalid_input" })))
            }
            _ => ErrorData::internal_error(msg, None),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(format!("i/o failure: {e}"))
    }
}

/// Type alias for fallible return values
pub type AppResult<T> = Result<T, AppError>;
