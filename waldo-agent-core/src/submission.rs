//! # submission: talking to the Waldo service
//!
//! Request construction (headers, URLs, JSON documents), response
//! classification and the shared retry loop used by both orchestrators.
//! Nothing in here performs I/O directly; requests go out through a
//! [`Transport`].

use std::collections::BTreeMap;

use reqwest::Url;
use serde::Serialize;
use tracing::{info, warn};

use crate::build::Flavor;
use crate::ci::CiProvider;
use crate::config::{
    Overrides, AGENT_VERSION, DEFAULT_API_BUILD_APP_ENDPOINT, DEFAULT_API_BUILD_ENDPOINT,
    DEFAULT_API_ERROR_ENDPOINT, DEFAULT_API_TRIGGER_ENDPOINT, MAX_NETWORK_ATTEMPTS,
};
use crate::contract::{IncomingResponse, OutgoingRequest, Transport};
use crate::error::{AgentError, Result};

/// Statuses worth a second attempt.
pub fn should_retry(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

pub fn authorization(upload_token: &str) -> String {
    format!("Upload-Token {upload_token}")
}

/// 32 lowercase hex digits, sent as `X-Upload-Id`.
pub fn random_upload_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// `Waldo <ci>[/<flavor>] v<version>`.
pub fn user_agent(provider: CiProvider, flavor: Option<Flavor>, overrides: &Overrides) -> String {
    let ci = match provider {
        CiProvider::Unknown => "Rust Agent",
        known => known.name(),
    };
    let version = overrides.wrapper_version.as_deref().unwrap_or(AGENT_VERSION);

    match flavor {
        Some(flavor) => format!("Waldo {ci}/{flavor} v{version}"),
        None => format!("Waldo {ci} v{version}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Build,
    Error,
    Trigger,
}

impl RequestKind {
    /// Verb phrase used in failure messages: `Unable to <action> Waldo`.
    pub fn action(&self) -> &'static str {
        match self {
            RequestKind::Build => "upload build to",
            RequestKind::Error => "upload error to",
            RequestKind::Trigger => "trigger run on",
        }
    }

    fn treats_401_as_token_error(&self) -> bool {
        matches!(self, RequestKind::Build | RequestKind::Trigger)
    }

    fn waf_subject(&self) -> Option<&'static str> {
        match self {
            RequestKind::Build => Some("build"),
            RequestKind::Error => Some("error"),
            RequestKind::Trigger => None,
        }
    }

    fn progress(&self) -> Option<&'static str> {
        match self {
            RequestKind::Build => Some("Uploading build to Waldo…"),
            RequestKind::Trigger => Some("Triggering run on Waldo…"),
            RequestKind::Error => None,
        }
    }

    fn attempt_noun(&self) -> &'static str {
        match self {
            RequestKind::Build => "upload",
            RequestKind::Error => "upload error",
            RequestKind::Trigger => "trigger",
        }
    }
}

/// 403 produced by the load balancer's firewall rather than the API.
pub fn is_waf_response(response: &IncomingResponse) -> bool {
    response
        .header("Server")
        .is_some_and(|server| server.starts_with("awselb/"))
}

/// Map a response to the error the user should see, `None` for success.
pub fn classify(kind: RequestKind, response: &IncomingResponse) -> Option<AgentError> {
    let status = response.status;

    if status == 401 && kind.treats_401_as_token_error() {
        return Some(AgentError::InvalidToken);
    }

    if status == 403 && is_waf_response(response) {
        if let Some(subject) = kind.waf_subject() {
            return Some(AgentError::WafBlocked(subject));
        }
    }

    if !response.is_success() {
        return Some(AgentError::HttpStatus {
            action: kind.action(),
            status,
        });
    }

    None
}

/// Endpoint a build is posted to, before the query string is added.
pub fn build_endpoint(overrides: &Overrides, upload_token: &str, app_id: &str) -> String {
    match &overrides.api_build_endpoint {
        Some(endpoint) => endpoint.clone(),
        None if upload_token.starts_with("u-") => {
            DEFAULT_API_BUILD_APP_ENDPOINT.replace("${APP_ID}", app_id)
        }
        None => DEFAULT_API_BUILD_ENDPOINT.to_string(),
    }
}

pub fn error_endpoint(overrides: &Overrides) -> String {
    overrides
        .api_error_endpoint
        .clone()
        .unwrap_or_else(|| DEFAULT_API_ERROR_ENDPOINT.to_string())
}

pub fn trigger_endpoint(overrides: &Overrides) -> String {
    overrides
        .api_trigger_endpoint
        .clone()
        .unwrap_or_else(|| DEFAULT_API_TRIGGER_ENDPOINT.to_string())
}

/// Append `params` to `endpoint` as a form-encoded query, sorted by key,
/// leaving out empty values.
pub fn with_query(endpoint: &str, params: &BTreeMap<&str, String>) -> Result<String> {
    let mut url = Url::parse(endpoint).map_err(|e| AgentError::InvalidEndpoint {
        url: endpoint.to_string(),
        message: e.to_string(),
    })?;

    let pairs: Vec<(&str, &str)> = params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| (*key, value.as_str()))
        .collect();
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }

    Ok(url.into())
}

fn is_empty(value: &str) -> bool {
    value.is_empty()
}

/// Telemetry document posted when an upload fails.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(skip_serializing_if = "is_empty")]
    pub agent_name: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub agent_version: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub arch: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub ci: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub ci_git_branch: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub ci_git_commit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_headers: Option<BTreeMap<String, Vec<String>>>,
    /// 0 when no response was received.
    pub failure_status_code: u16,
    #[serde(skip_serializing_if = "is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub platform: String,
    pub retry: u32,
    #[serde(skip_serializing_if = "is_empty")]
    pub wrapper_name: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub wrapper_version: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPayload {
    #[serde(skip_serializing_if = "is_empty")]
    pub agent_name: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub agent_version: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub arch: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub ci: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub git_sha: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub platform: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub rule_name: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub wrapper_name: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub wrapper_version: String,
}

/// A request that got a 2xx.
#[derive(Debug)]
pub struct Delivered {
    pub response: IncomingResponse,
    /// 0-based index of the attempt that succeeded.
    pub retry: u32,
}

/// A request that failed for good.
#[derive(Debug)]
pub struct Rejected {
    pub error: AgentError,
    /// The last response, if the server answered at all.
    pub response: Option<IncomingResponse>,
    /// 0-based index of the last attempt made.
    pub retry: u32,
}

/// Sends one logical request under the shared attempt policy.
pub struct Submission<'a> {
    transport: &'a dyn Transport,
    kind: RequestKind,
}

impl<'a> Submission<'a> {
    pub fn new(transport: &'a dyn Transport, kind: RequestKind) -> Self {
        Self { transport, kind }
    }

    /// Run up to [`MAX_NETWORK_ATTEMPTS`] attempts.
    ///
    /// `make_request` receives the 0-based attempt index so per-attempt
    /// details (such as the `retry` query parameter) can vary. A second
    /// attempt is only made after a transport failure or a retryable status.
    pub async fn send<F>(&self, mut make_request: F) -> std::result::Result<Delivered, Rejected>
    where
        F: FnMut(u32) -> Result<OutgoingRequest>,
    {
        let mut retry = 0;
        loop {
            let last_attempt = retry + 1 >= MAX_NETWORK_ATTEMPTS;
            let request = make_request(retry).map_err(|error| Rejected {
                error,
                response: None,
                retry,
            })?;
            let url = request.url.clone();

            if let Some(progress) = self.kind.progress() {
                println!("{progress}");
            }
            info!(kind = ?self.kind, retry, url = %url, "[SUBMIT] Sending request");

            let (error, response, retryable) = match self.transport.send(request).await {
                Ok(response) => match classify(self.kind, &response) {
                    None => {
                        info!(kind = ?self.kind, status = response.status, retry, "[SUBMIT] Request accepted");
                        return Ok(Delivered { response, retry });
                    }
                    Some(error) => {
                        let retryable = should_retry(response.status);
                        (error, Some(response), retryable)
                    }
                },
                Err(e) => (
                    AgentError::Transport {
                        action: self.kind.action(),
                        message: e.to_string(),
                        url,
                    },
                    None,
                    true,
                ),
            };

            if last_attempt || !retryable {
                return Err(Rejected {
                    error,
                    response,
                    retry,
                });
            }

            warn!(kind = ?self.kind, retry, error = %error, "[SUBMIT] Attempt failed, retrying");
            if self.kind != RequestKind::Error {
                eprintln!("waldo: {error}");
                println!(
                    "\nFailed {} attempts: {} -- retrying…\n",
                    self.kind.attempt_noun(),
                    retry + 1
                );
            }
            retry += 1;
        }
    }
}
