//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers the four Gmail tools.
//! Input contract violations become MCP protocol errors; upstream failures
//! are reported inside the tool result with the error flag set, so one bad
//! call never takes the server down.

use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{ServerHandler, tool, tool_handler, tool_router};

use crate::errors::{AppError, AppResult};
use crate::gmail::{GmailClient, MessageQuery};
use crate::mime;
use crate::models::{FormattedMessage, GetEmailInput, ListEmailsInput, SearchEmailsInput};

/// Upper bound for `maxResults`
const MAX_RESULTS_LIMIT: u32 = 100;
/// Reply when `list-emails` matches nothing
const NO_EMAILS_FOUND: &str = "No emails found matching the criteria.";
/// Reply when `search-emails` matches nothing
const NO_SEARCH_RESULTS: &str = "No emails found matching the search query.";

/// Gmail MCP server
///
/// Holds the shared Gmail client. Implements MCP tool handlers via
/// `#[tool]` attribute macro and `ServerHandler` trait.
#[derive(Clone)]
pub struct GmailServer {
    gmail: Arc<GmailClient>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GmailServer {
    pub fn new(gmail: GmailClient) -> Self {
        Self {
            gmail: Arc::new(gmail),
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: List emails by label, optionally filtered by sender
    #[tool(name = "list-emails", description = "Get emails in inbox")]
    async fn list_emails(
        &self,
        Parameters(input): Parameters<ListEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            "list-emails",
            "fetching emails",
            started,
            self.list_emails_impl(input).await,
        )
    }

    /// Tool: Get a single email by id
    #[tool(name = "get-email", description = "Get a specific email by ID")]
    async fn get_email(
        &self,
        Parameters(input): Parameters<GetEmailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            "get-email",
            "fetching email",
            started,
            self.get_email_impl(input).await,
        )
    }

    /// Tool: Search with Gmail query syntax
    #[tool(
        name = "search-emails",
        description = "Search for emails using Gmail search syntax"
    )]
    async fn search_emails(
        &self,
        Parameters(input): Parameters<SearchEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            "search-emails",
            "searching emails",
            started,
            self.search_emails_impl(input).await,
        )
    }

    /// Tool: List all labels
    #[tool(name = "get-labels", description = "Get all Gmail labels")]
    async fn get_labels(&self) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = self
            .gmail
            .list_labels()
            .await
            .and_then(|labels| to_pretty_json(&labels));
        finalize_tool("get-labels", "fetching labels", started, result)
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for GmailServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Read-only Gmail MCP server. List, fetch, and search messages and list labels for the authenticated account.",
        )
    }
}

/// Tool implementation methods
///
/// Each returns the text payload of a successful call.
impl GmailServer {
    async fn list_emails_impl(&self, input: ListEmailsInput) -> AppResult<String> {
        validate_max_results(input.max_results)?;
        if let Some(sender) = &input.sender_email {
            validate_email(sender)?;
        }

        let query = MessageQuery {
            max_results: input.max_results,
            label_ids: input.label_ids,
            q: input.sender_email.map(|sender| format!("from:{sender}")),
        };
        self.fetch_formatted(&query, NO_EMAILS_FOUND).await
    }

    async fn get_email_impl(&self, input: GetEmailInput) -> AppResult<String> {
        let message = self.gmail.get_message(&input.email_id).await?;
        to_pretty_json(&mime::format_message(&message))
    }

    async fn search_emails_impl(&self, input: SearchEmailsInput) -> AppResult<String> {
        validate_max_results(input.max_results)?;
        let query = MessageQuery {
            max_results: input.max_results,
            label_ids: Vec::new(),
            q: Some(input.query),
        };
        self.fetch_formatted(&query, NO_SEARCH_RESULTS).await
    }

    /// List, then fetch full details for every match in parallel
    async fn fetch_formatted(&self, query: &MessageQuery, empty_reply: &str) -> AppResult<String> {
        let refs = self.gmail.list_messages(query).await?;
        if refs.is_empty() {
            return Ok(empty_reply.to_owned());
        }

        let messages = self.gmail.get_messages(&refs).await?;
        let formatted = messages
            .iter()
            .map(mime::format_message)
            .collect::<Vec<FormattedMessage>>();
        to_pretty_json(&formatted)
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build the MCP tool response from business logic output
///
/// Input errors are protocol errors. Everything else becomes a text result
/// of the form `Error <verb>: <message>` with the error flag set.
fn finalize_tool(
    tool: &str,
    verb: &str,
    started: Instant,
    result: AppResult<String>,
) -> Result<CallToolResult, ErrorData> {
    let elapsed = duration_ms(started);
    match result {
        Ok(text) => {
            tracing::debug!(tool, duration_ms = elapsed, "tool call succeeded");
            Ok(CallToolResult::success(vec![Content::text(text)]))
        }
        Err(e) if e.is_input_error() => {
            tracing::debug!(tool, error = %e, "tool input rejected");
            Err(e.to_error_data())
        }
        Err(e) => {
            tracing::warn!(tool, duration_ms = elapsed, error = %e, "tool call failed");
            Ok(CallToolResult::error(vec![Content::text(format!(
                "Error {verb}: {e}"
            ))]))
        }
    }
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Internal(format!("serialization failure: {e}")))
}

/// Validate `maxResults` is within 1..100; out-of-range values are rejected, not clamped
fn validate_max_results(value: u32) -> AppResult<()> {
    if !(1..=MAX_RESULTS_LIMIT).contains(&value) {
        return Err(AppError::InvalidInput(format!(
            "maxResults must be in range 1..{MAX_RESULTS_LIMIT}"
        )));
    }
    Ok(())
}

/// Validate email address syntax
fn validate_email(value: &str) -> AppResult<()> {
    let pattern = Regex::new(r"^[^\s@]+@[^\s@.]+(\.[^\s@.]+)+$")
        .map_err(|e| AppError::Internal(format!("invalid email regex: {e}")))?;
    if !pattern.is_match(value) {
        return Err(AppError::InvalidInput(format!(
            "senderEmail '{value}' is not a valid email address"
        )));
    }
    Ok(())
}
