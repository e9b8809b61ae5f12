//! Disclosure Broker: the only component that talks to the Disclosure
//! Provider.
//!
//! Starts sessions (rewriting the returned callback URL so clients route
//! back through this server), fetches verdicts, and reverse-proxies a small
//! allow-list of session sub-paths, including the long-lived status event
//! stream. Session tokens are validated before any outbound call so the
//! proxy can never be steered to arbitrary downstream paths.

use axum::{
    body::Body,
    http::{StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use futures_util::StreamExt;
use regex::Regex;
use roomgate_core::{DisclosureVerdict, SecuredRoom};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::ApiError;

/// Statuses that terminate a disclosure session; the status stream is
/// force-closed when one is observed.
const TERMINAL_STATUSES: &[&str] = &["CANCELLED", "DONE", "TIMEOUT"];

/// Sub-paths under a session token that may be proxied. Everything else is
/// rejected before any network call.
const ALLOWED_SUBPATHS: &[&str] = &["", "result", "frontend/status", "frontend/statusevents"];

pub struct DisclosureBroker {
    client: reqwest::Client,
    disclosure_url: String,
    public_url: String,
    request_timeout: Duration,
    token_pattern: Regex,
}

impl DisclosureBroker {
    pub fn new(
        client: reqwest::Client,
        disclosure_url: impl Into<String>,
        public_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            disclosure_url: disclosure_url.into(),
            public_url: public_url.into(),
            request_timeout,
            // Session tokens are short opaque strings minted by the
            // provider (base64url alphabet); anything else never leaves
            // this server.
            token_pattern: Regex::new("^[a-zA-Z0-9_-]{10,64}$").unwrap(),
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<(), ApiError> {
        if self.token_pattern.is_match(token) {
            Ok(())
        } else {
            warn!(token_len = token.len(), "rejected malformed session token");
            Err(ApiError::InvalidSessionToken)
        }
    }

    fn validate_subpath(path: &str) -> Result<(), ApiError> {
        if ALLOWED_SUBPATHS.contains(&path) {
            Ok(())
        } else {
            warn!(path, "rejected proxy request to disallowed sub-path");
            Err(ApiError::InvalidSessionToken)
        }
    }

    fn provider_err(err: reqwest::Error) -> ApiError {
        ApiError::ProviderUnavailable(err.to_string())
    }

    /// Starts a disclosure session asking for the policy's attributes.
    ///
    /// Returns the provider's answer with `sessionPtr.u` rewritten to this
    /// server's proxy path, so the ultimate client never needs to reach the
    /// (possibly private) provider directly.
    pub async fn start_session(&self, policy: &SecuredRoom) -> Result<Value, ApiError> {
        let session_request = serde_json::json!({
            "@context": "https://irma.app/ld/request/disclosure/v2",
            "disclose": [[policy.attribute_ids()]],
        });

        let mut answer: Value = self
            .client
            .post(format!("{}/session", self.disclosure_url))
            .timeout(self.request_timeout)
            .json(&session_request)
            .send()
            .await
            .map_err(Self::provider_err)?
            .error_for_status()
            .map_err(Self::provider_err)?
            .json()
            .await
            .map_err(Self::provider_err)?;

        let pointer = answer
            .get("sessionPtr")
            .and_then(|ptr| ptr.get("u"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ApiError::ProviderUnavailable("session answer carried no sessionPtr.u".into())
            })?;

        let rewritten = self.rewrite_callback(pointer)?;
        debug!(rewritten = %rewritten, "rewrote disclosure callback url");
        answer["sessionPtr"]["u"] = Value::String(rewritten);

        Ok(answer)
    }

    /// Routes the provider-issued callback URL through this server's proxy:
    /// the client is handed `<public_url>/yivi-proxy/<token>` and appends
    /// the same sub-paths it would have used against the provider.
    fn rewrite_callback(&self, pointer: &str) -> Result<String, ApiError> {
        let url = Url::parse(pointer)
            .map_err(|_| ApiError::ProviderUnavailable("unparsable sessionPtr.u".into()))?;

        let token = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .filter(|token| self.token_pattern.is_match(token))
            .ok_or_else(|| {
                ApiError::ProviderUnavailable("sessionPtr.u carried no session token".into())
            })?;

        Ok(format!("{}/yivi-proxy/{token}", self.public_url))
    }

    /// Fetches the verdict for a completed session.
    ///
    /// A malformed verdict body parses into an empty one, which the decision
    /// engine denies; only transport problems become errors.
    pub async fn fetch_result(&self, session_token: &str) -> Result<DisclosureVerdict, ApiError> {
        self.validate_token(session_token)?;

        let raw: Value = self
            .client
            .get(format!(
                "{}/session/{session_token}/result",
                self.disclosure_url
            ))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(Self::provider_err)?
            .error_for_status()
            .map_err(Self::provider_err)?
            .json()
            .await
            .map_err(Self::provider_err)?;

        Ok(serde_json::from_value(raw).unwrap_or(DisclosureVerdict {
            proof_status: None,
            disclosed: Vec::new(),
        }))
    }

    /// Forwards one allow-listed, non-streaming session sub-path request.
    pub async fn proxy(
        &self,
        session_token: &str,
        subpath: &str,
        method: reqwest::Method,
        body: Bytes,
    ) -> Result<Response, ApiError> {
        self.validate_token(session_token)?;
        Self::validate_subpath(subpath)?;

        let url = self.session_url(session_token, subpath);
        let response = self
            .client
            .request(method, url)
            .timeout(self.request_timeout)
            .body(body)
            .send()
            .await
            .map_err(Self::provider_err)?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let payload: Value = response.json().await.map_err(Self::provider_err)?;

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    /// Opens the provider's server-sent-event status stream and forwards its
    /// bytes until a terminal status is observed in-stream, then closes both
    /// ends. Dropping the returned body (client disconnect) cancels the
    /// upstream connection.
    pub async fn stream_status(&self, session_token: &str) -> Result<Response, ApiError> {
        self.validate_token(session_token)?;

        let url = self.session_url(session_token, "frontend/statusevents");
        // No request timeout: this is the one legitimately long-lived call.
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::provider_err)?
            .error_for_status()
            .map_err(Self::provider_err)?;

        let upstream = response.bytes_stream();
        let body = Body::from_stream(futures_util::stream::unfold(
            (upstream, false),
            |(mut upstream, done)| async move {
                if done {
                    return None;
                }
                match upstream.next().await {
                    Some(Ok(chunk)) => {
                        let terminal = chunk_has_terminal_status(&chunk);
                        Some((Ok(chunk), (upstream, terminal)))
                    }
                    Some(Err(err)) => Some((Err(std::io::Error::other(err)), (upstream, true))),
                    None => None,
                }
            },
        ));

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(body)
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    fn session_url(&self, session_token: &str, subpath: &str) -> String {
        if subpath.is_empty() {
            format!("{}/session/{session_token}", self.disclosure_url)
        } else {
            format!("{}/session/{session_token}/{subpath}", self.disclosure_url)
        }
    }
}

/// Scans an SSE chunk for a terminal session status. Events carry either a
/// bare JSON string or an object with a `status` field.
fn chunk_has_terminal_status(chunk: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(chunk) else {
        return false;
    };

    text.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|payload| serde_json::from_str::<Value>(payload.trim()).ok())
        .any(|event| {
            let status = match &event {
                Value::String(s) => Some(s.as_str()),
                Value::Object(map) => map.get("status").and_then(Value::as_str),
                _ => None,
            };
            status.is_some_and(|s| TERMINAL_STATUSES.contains(&s))
        })
}
