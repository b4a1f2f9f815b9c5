//! Interactive OAuth2 authorization for the `auth` entry point
//!
//! The authorization-code flow is hidden behind [`AuthorizationHelper`]. The
//! default [`LoopbackAuthorizer`] runs the installed-app flow: it listens on
//! a loopback port, sends the user to the consent page, captures the
//! redirect, and exchanges the code for tokens.

use std::future::Future;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use url::Url;
use uuid::Uuid;

use crate::auth::{Credentials, OAuthClient, OAuthKeyfile};
use crate::errors::{AppError, AppResult};

/// Scopes requested by `auth`
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.labels",
];

/// Performs the interactive authorization-code exchange
pub trait AuthorizationHelper {
    /// Obtain an initial token set for `scopes`
    fn authorize(
        &self,
        oauth: &OAuthClient,
        scopes: &[&str],
    ) -> impl Future<Output = AppResult<Credentials>>;
}

/// Installed-app flow over a loopback redirect
#[derive(Debug, Clone)]
pub struct LoopbackAuthorizer {
    /// Try to launch a browser in addition to printing the consent URL
    pub open_browser: bool,
}

impl Default for LoopbackAuthorizer {
    fn default() -> Self {
        Self { open_browser: true }
    }
}

impl AuthorizationHelper for LoopbackAuthorizer {
    async fn authorize(&self, oauth: &OAuthClient, scopes: &[&str]) -> AppResult<Credentials> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = loopback_redirect_uri(&oauth.keys().redirect_uri, port)?;
        let state = Uuid::new_v4().to_string();
        let consent = consent_url(oauth.keys(), &redirect_uri, scopes, &state);

        eprintln!("Authorize this app by visiting:\n\n  {consent}\n");
        if self.open_browser
            && let Err(e) = open::that(&consent)
        {
            tracing::warn!(error = %e, "failed to open browser; open the URL manually");
        }

        let code = wait_for_code(&listener, &state).await?;
        tracing::info!("authorization code received, exchanging for tokens");
        oauth.exchange_code(&code, &redirect_uri).await
    }
}

/// Bind the keyfile's redirect URI to the listening port
///
/// Only loopback redirects can be served locally.
fn loopback_redirect_uri(configured: &str, port: u16) -> AppResult<String> {
    let mut url = Url::parse(configured)
        .map_err(|e| AppError::invalid(format!("invalid redirect URI '{configured}': {e}")))?;
    if !matches!(url.host_str(), Some("localhost" | "127.0.0.1")) {
        return Err(AppError::invalid(format!(
            "redirect URI '{configured}' must point to localhost"
        )));
    }
    url.set_port(Some(port))
        .map_err(|()| AppError::invalid(format!("cannot set port on '{configured}'")))?;
    Ok(url.to_string())
}

/// Build the consent page URL
fn consent_url(keys: &OAuthKeyfile, redirect_uri: &str, scopes: &[&str], state: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
        keys.auth_uri,
        urlencoding::encode(&keys.client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scopes.join(" ")),
        urlencoding::encode(state),
    )
}

/// Outcome carried by a redirect request
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    Code { code: String, state: Option<String> },
    Denied(String),
}

/// Parse `GET /path?query HTTP/1.1`; `None` for unrelated requests
fn parse_callback(request_line: &str) -> Option<Callback> {
    let target = request_line.split_whitespace().nth(1)?;
    let url = Url::parse(&format!("http://localhost{target}")).ok()?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (error, code) {
        (Some(error), _) => Some(Callback::Denied(error)),
        (None, Some(code)) => Some(Callback::Code { code, state }),
        (None, None) => None,
    }
}

/// Accept redirects until one carries a code or an error
async fn wait_for_code(listener: &TcpListener, expected_state: &str) -> AppResult<String> {
    loop {
        let (mut stream, _) = listener.accept().await?;
        let mut request_line = String::new();
        {
            let mut reader = BufReader::new(&mut stream);
            reader.read_line(&mut request_line).await?;
            // Drain headers so closing the socket does not reset the peer.
            let mut header = String::new();
            loop {
                header.clear();
                let n = reader.read_line(&mut header).await?;
                if n == 0 || header == "\r\n" || header == "\n" {
                    break;
                }
            }
        }

        let outcome = parse_callback(&request_line);
        let (status, body) = match &outcome {
            Some(Callback::Code { state, .. }) if state.as_deref() == Some(expected_state) => (
                "200 OK",
                "Authentication successful! You can close this window.",
            ),
            Some(_) => ("400 Bad Request", "Authentication failed. Please try again."),
            None => ("404 Not Found", "Not found."),
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{body}</h1></body></html>"
        );
        if let Err(e) = stream.write_all(response.as_bytes()).await {
            tracing::debug!(error = %e, "failed to answer redirect request");
        }

        match outcome {
            Some(Callback::Code { code, state }) => {
                if state.as_deref() != Some(expected_state) {
                    return Err(AppError::AuthFailed(
                        "state mismatch in authorization redirect".to_owned(),
                    ));
                }
                return Ok(code);
            }
            Some(Callback::Denied(error)) => {
                return Err(AppError::AuthFailed(format!("authorization denied: {error}")));
            }
            None => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::{Callback, consent_url, loopback_redirect_uri, parse_callback, wait_for_code};
    use crate::auth::OAuthKeyfile;
    use crate::errors::AppError;

    #[test]
    fn redirect_uri_gets_listening_port() {
        assert_eq!(
            loopback_redirect_uri("http://localhost", 53682).expect("loopback"),
            "http://localhost:53682/"
        );
        let err = loopback_redirect_uri("https://example.com/cb", 1).expect_err("must fail");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn consent_url_encodes_parameters() {
        let keys = OAuthKeyfile::from_json(r#"{"installed":{"client_id":"id 1","client_secret":"s"}}"#)
            .expect("keyfile");
        let url = consent_url(&keys, "http://localhost:1/", &["a", "b"], "st");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=id%201"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A1%2F"));
        assert!(url.contains("scope=a%20b"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("state=st"));
    }

    #[test]
    fn parses_redirect_requests() {
        assert_eq!(
            parse_callback("GET /?code=4%2F0Ab&state=xyz&scope=s HTTP/1.1\r\n"),
            Some(Callback::Code {
                code: "4/0Ab".to_owned(),
                state: Some("xyz".to_owned()),
            })
        );
        assert_eq!(
            parse_callback("GET /?error=access_denied&state=xyz HTTP/1.1\r\n"),
            Some(Callback::Denied("access_denied".to_owned()))
        );
        assert_eq!(parse_callback("GET /favicon.ico HTTP/1.1\r\n"), None);
        assert_eq!(parse_callback(""), None);
    }

    async fn send(port: u16, request_line: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
        stream
            .write_all(format!("{request_line}\r\nHost: localhost\r\n\r\n").as_bytes())
            .await
            .expect("write");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        response
    }

    #[tokio::test]
    async fn waits_past_unrelated_requests_for_the_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let client = tokio::spawn(async move {
            let favicon = send(port, "GET /favicon.ico HTTP/1.1").await;
            let redirect = send(port, "GET /?code=abc&state=s1 HTTP/1.1").await;
            (favicon, redirect)
        });

        let code = wait_for_code(&listener, "s1").await.expect("code");
        assert_eq!(code, "abc");

        let (favicon, redirect) = client.await.expect("client task");
        assert!(favicon.starts_with("HTTP/1.1 404"));
        assert!(redirect.starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn rejects_mismatched_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let client = tokio::spawn(async move { send(port, "GET /?code=abc&state=forged HTTP/1.1").await });

        let err = wait_for_code(&listener, "s1").await.expect_err("must fail");
        assert!(matches!(err, AppError::AuthFailed(_)));
        assert!(client.await.expect("client task").starts_with("HTTP/1.1 400"));
    }
}
