//! Input/output DTOs and schema-bearing types
//!
//! Tool inputs carry `JsonSchema` for automatic schema generation. Gmail
//! resource types mirror the REST API's camelCase JSON, with every field the
//! provider may omit marked optional or defaulted.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Flat display record produced from a Gmail message
///
/// Every field degrades to an empty string when the source lacks it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedMessage {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
    /// Direct body, else accumulated plain text, else accumulated HTML
    pub content: String,
    pub snippet: String,
}

/// Gmail `users.messages` resource (format=full)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub snippet: String,
    pub payload: Option<MimePart>,
}

/// A node in a message's MIME tree
///
/// Leaves carry `body.data`; multipart containers carry `parts`. Gmail also
/// uses this shape for the top-level payload, where `headers` is populated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MimePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub body: Option<PartBody>,
    pub parts: Option<Vec<MimePart>>,
}

impl MimePart {
    /// Encoded body data, if present and non-empty
    pub fn body_data(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .filter(|d| !d.is_empty())
    }
}

/// Body of a MIME part
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    /// base64url-encoded content
    pub data: Option<String>,
}

/// Message header as returned by Gmail (order preserved)
#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Message reference returned by `users.messages.list`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
}

/// Response of `users.messages.list`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesResponse {
    pub messages: Option<Vec<MessageRef>>,
}

/// Response of `users.labels.list`
///
/// Labels are passed through to the caller untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListLabelsResponse {
    pub labels: Option<Vec<serde_json::Value>>,
}

/// Input: list emails
///
/// Used by `list-emails`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListEmailsInput {
    /// Filter by sender email. Use this to get previous email threads and opponent information.
    pub sender_email: Option<String>,
    /// Maximum number of emails to return (1..100, default 10)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Label IDs to filter by (e.g., INBOX, UNREAD, SENT)
    #[serde(default = "default_label_ids")]
    pub label_ids: Vec<String>,
}

/// Input: get a single email
///
/// Used by `get-email`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetEmailInput {
    /// The ID of the email to retrieve
    pub email_id: String,
}

/// Input: search emails
///
/// Used by `search-emails`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchEmailsInput {
    /// Gmail search query (e.g., "from:example@gmail.com has:attachment")
    pub query: String,
    /// Maximum number of emails to return (1..100, default 10)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

/// Default value for `maxResults`
fn default_max_results() -> u32 {
    10
}

/// Default value for `labelIds`
fn default_label_ids() -> Vec<String> {
    vec!["INBOX".to_owned()]
}
