//! Gmail REST client
//!
//! Thin async wrapper over the `users.messages` and `users.labels`
//! endpoints. Each request obtains its bearer token from the
//! [`CredentialManager`], which rotates and persists tokens as needed.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::auth::CredentialManager;
use crate::errors::{AppError, AppResult};
use crate::models::{ListLabelsResponse, ListMessagesResponse, MessageRef, RawMessage};

/// Parameters for `users.messages.list`
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub max_results: u32,
    pub label_ids: Vec<String>,
    /// Gmail search syntax; omitted when `None`
    pub q: Option<String>,
}

/// Google API error envelope
#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Gmail API client for the authenticated user (`me`)
#[derive(Debug, Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<CredentialManager>,
}

impl GmailClient {
    pub fn new(base_url: impl Into<String>, auth: Arc<CredentialManager>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            auth,
        }
    }

    /// List message references matching `query`
    ///
    /// Returns an empty vector when the mailbox has no matches.
    pub async fn list_messages(&self, query: &MessageQuery) -> AppResult<Vec<MessageRef>> {
        let mut params = vec![("maxResults", query.max_results.to_string())];
        params.extend(query.label_ids.iter().map(|id| ("labelIds", id.clone())));
        if let Some(q) = query.q.as_ref().filter(|q| !q.is_empty()) {
            params.push(("q", q.clone()));
        }

        let url = format!("{}/users/me/messages", self.base_url);
        let list: ListMessagesResponse = self.get_json(&url, &params).await?;
        Ok(list.messages.unwrap_or_default())
    }

    /// Fetch a full message by id
    pub async fn get_message(&self, id: &str) -> AppResult<RawMessage> {
        let url = format!(
            "{}/users/me/messages/{}",
            self.base_url,
            urlencoding::encode(id)
        );
        self.get_json(&url, &[("format", "full".to_owned())]).await
    }

    /// Fetch full details for each reference concurrently
    ///
    /// Results keep the order of `refs`. Any single failure fails the batch.
    pub async fn get_messages(&self, refs: &[MessageRef]) -> AppResult<Vec<RawMessage>> {
        try_join_all(refs.iter().map(|r| self.get_message(&r.id))).await
    }

    /// List all labels, passed through as returned by the API
    pub async fn list_labels(&self) -> AppResult<Vec<serde_json::Value>> {
        let url = format!("{}/users/me/labels", self.base_url);
        let list: ListLabelsResponse = self.get_json(&url, &[]).await?;
        Ok(list.labels.unwrap_or_default())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> AppResult<T> {
        let token = self.auth.access_token().await?;
        tracing::debug!(url, "gmail request");

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(params)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AppError::Upstream(upstream_message(status, &text)));
        }

        serde_json::from_str(&text)
            .map_err(|e| AppError::Upstream(format!("invalid response from Gmail: {e}")))
    }
}

/// Prefer the API's own error message, falling back to the status line
fn upstream_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) if body.trim().is_empty() => format!("Gmail API returned {status}"),
        Err(_) => format!("Gmail API returned {status}: {}", body.trim()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mockito::Matcher;
    use serde_json::json;

    use super::{GmailClient, MessageQuery, upstream_message};
    use crate::auth::{CredentialManager, now_ms};
    use crate::errors::AppError;
    use crate::models::MessageRef;
    use crate::test_support::Fixture;

    fn client_for(fixture: &Fixture) -> GmailClient {
        let manager = CredentialManager::load(&fixture.config).expect("load");
        GmailClient::new(fixture.config.api_base_url.clone(), Arc::new(manager))
    }

    fn valid_credentials() -> serde_json::Value {
        json!({
            "access_token": "token-1",
            "refresh_token": "r",
            "expiry_date": now_ms() + 3_600_000
        })
    }

    fn message_ref(id: &str) -> MessageRef {
        MessageRef { id: id.to_owned() }
    }

    #[test]
    fn upstream_message_prefers_api_error_text() {
        let status = reqwest::StatusCode::NOT_FOUND;
        assert_eq!(
            upstream_message(
                status,
                r#"{"error":{"code":404,"message":"Requested entity was not found.","status":"NOT_FOUND"}}"#
            ),
            "Requested entity was not found."
        );
        assert_eq!(
            upstream_message(status, "nope"),
            "Gmail API returned 404 Not Found: nope"
        );
        assert_eq!(upstream_message(status, ""), "Gmail API returned 404 Not Found");
    }

    #[tokio::test]
    async fn list_messages_sends_filters_and_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/gmail/v1/users/me/messages")
            .match_header("authorization", "Bearer token-1")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("maxResults".into(), "5".into()),
                Matcher::Regex("labelIds=INBOX".into()),
                Matcher::Regex("labelIds=UNREAD".into()),
                Matcher::UrlEncoded("q".into(), "from:a@example.com".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"messages":[{"id":"m1","threadId":"t1"}],"resultSizeEstimate":1}"#)
            .create_async()
            .await;

        let fixture = Fixture::new(&server.url(), valid_credentials());
        let refs = client_for(&fixture)
            .list_messages(&MessageQuery {
                max_results: 5,
                label_ids: vec!["INBOX".to_owned(), "UNREAD".to_owned()],
                q: Some("from:a@example.com".to_owned()),
            })
            .await
            .expect("list");

        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, "m1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn list_messages_without_matches_is_empty() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/gmail/v1/users/me/messages")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"resultSizeEstimate":0}"#)
            .create_async()
            .await;

        let fixture = Fixture::new(&server.url(), valid_credentials());
        let refs = client_for(&fixture)
            .list_messages(&MessageQuery {
                max_results: 10,
                ..Default::default()
            })
            .await
            .expect("list");
        assert!(refs.is_empty());
    }

    #[tokio::test]
    async fn get_messages_preserves_order() {
        let mut server = mockito::Server::new_async().await;
        let mut mocks = Vec::new();
        for id in ["m1", "m2", "m3"] {
            let mock = server
                .mock("GET", format!("/gmail/v1/users/me/messages/{id}").as_str())
                .match_query(Matcher::UrlEncoded("format".into(), "full".into()))
                .with_status(200)
                .with_body(json!({"id": id, "threadId": "t", "snippet": id}).to_string())
                .create_async()
                .await;
            mocks.push(mock);
        }

        let fixture = Fixture::new(&server.url(), valid_credentials());
        let messages = client_for(&fixture)
            .get_messages(&[message_ref("m3"), message_ref("m1"), message_ref("m2")])
            .await
            .expect("batch");
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m3", "m1", "m2"]);
    }

    #[tokio::test]
    async fn one_failed_fetch_fails_the_batch() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("GET", "/gmail/v1/users/me/messages/m1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"id":"m1"}"#)
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/gmail/v1/users/me/messages/m2")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error":{"code":404,"message":"Requested entity was not found."}}"#)
            .create_async()
            .await;

        let fixture = Fixture::new(&server.url(), valid_credentials());
        let err = client_for(&fixture)
            .get_messages(&[message_ref("m1"), message_ref("m2")])
            .await
            .expect_err("batch must fail");
        match err {
            AppError::Upstream(msg) => assert_eq!(msg, "Requested entity was not found."),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn labels_are_passed_through() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/gmail/v1/users/me/labels")
            .with_status(200)
            .with_body(r#"{"labels":[{"id":"INBOX","name":"INBOX","type":"system"}]}"#)
            .create_async()
            .await;

        let fixture = Fixture::new(&server.url(), valid_credentials());
        let labels = client_for(&fixture).list_labels().await.expect("labels");
        assert_eq!(labels, vec![json!({"id":"INBOX","name":"INBOX","type":"system"})]);
    }
}
