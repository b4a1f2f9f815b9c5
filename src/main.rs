//! gmail-mcp-rs: Gmail MCP server over stdio
//!
//! Exposes read-only Gmail access (list, fetch, search, labels) as Model
//! Context Protocol tools, authenticated with a file-based OAuth2 credential
//! set that is refreshed and persisted automatically.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and CLI dispatch
//! - [`config`]: Environment-driven file locations and API endpoint
//! - [`errors`]: Application error model with MCP error mapping
//! - [`auth`]: Credential lifecycle (load, refresh, persist, rotation)
//! - [`authorize`]: Interactive authorization-code flow for `auth`
//! - [`gmail`]: Gmail REST client
//! - [`server`]: MCP tool handlers with validation and error reporting
//! - [`models`]: Tool inputs, Gmail resources, and the display record
//! - [`mime`]: MIME tree walk, body decoding, and message formatting

mod auth;
mod authorize;
mod config;
mod errors;
mod gmail;
mod mime;
mod models;
mod server;
#[cfg(test)]
mod test_support;

use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing_subscriber::EnvFilter;

use crate::auth::CredentialManager;
use crate::authorize::{DEFAULT_SCOPES, LoopbackAuthorizer};
use crate::gmail::GmailClient;

#[derive(Debug, Parser)]
#[command(
    version,
    about,
    allow_external_subcommands = true,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the OAuth consent flow and save credentials
    Auth {
        #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
        rest: Vec<String>,
    },
    /// Serve MCP over stdio (default)
    Serve,
    #[command(external_subcommand)]
    Other(Vec<String>),
}

/// What the process does after startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Auth,
    Serve,
}

/// Resolve the run mode from the command line
///
/// Only `auth` bootstraps credentials. Any other invocation, including
/// unknown words and flags, serves. `--help` and `--version` print and exit.
fn parse_mode<I, T>(args: I) -> Mode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(Cli {
            command: Some(Command::Auth { rest }),
        }) => {
            if !rest.is_empty() {
                tracing::warn!(args = ?rest, "ignoring extra arguments to auth");
            }
            Mode::Auth
        }
        Ok(Cli {
            command: Some(Command::Other(args)),
        }) => {
            tracing::warn!(?args, "ignoring unrecognised arguments");
            Mode::Serve
        }
        Ok(_) => Mode::Serve,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            tracing::warn!(kind = %e.kind(), "ignoring unrecognised arguments");
            Mode::Serve
        }
    }
}

/// Application entry point
///
/// Initializes tracing to stderr (stdout carries the MCP stream), then runs
/// either the `auth` bootstrap or the server. Any startup failure is fatal
/// and exits with status 1.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = match parse_mode(std::env::args_os()) {
        Mode::Auth => run_auth().await,
        Mode::Serve => run_server().await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_auth() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load_from_env()?;
    auth::bootstrap(&config, &LoopbackAuthorizer::default(), DEFAULT_SCOPES).await?;
    println!("Credentials saved. You can now run the server.");
    Ok(())
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load_from_env()?;
    let manager = CredentialManager::load(&config)?;
    manager.ensure_fresh().await?;
    tracing::info!("credentials ready, starting server");

    let gmail = GmailClient::new(config.api_base_url.clone(), Arc::new(manager));
    let service = server::GmailServer::new(gmail).serve(stdio()).await?;
    tracing::info!("Gmail MCP server running on stdio");
    service.waiting().await?;
    Ok(())
}
