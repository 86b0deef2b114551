//! # contract: the seams between the pipeline and the outside world
//!
//! The pipeline touches two external systems: the `git` executable and the
//! remote HTTP service. Both are reached only through the traits defined
//! here, so resolution and retry logic can be exercised against canned
//! process output and canned HTTP responses.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`; with the `test-export-mocks`
//!   feature the generated `MockProcessRunner` / `MockTransport` are visible
//!   to integration tests and downstream crates.
//!
//! ## Production Implementations
//! - [`crate::git::SystemProcessRunner`] for [`ProcessRunner`]
//! - [`crate::transport::ReqwestTransport`] for [`Transport`]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mockall::automock;

use crate::error::{ProcessError, TransportError};

/// Captured output of a successful process run, trailing newlines removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external executables on behalf of the git resolver.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ProcessRunner: Send + Sync {
    /// Resolve `program` on the search path.
    fn locate(&self, program: &str) -> Option<PathBuf>;

    /// Run `program` with `args`, failing on launch errors and non-zero exits.
    fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, ProcessError>;
}

/// Body of an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// In-memory text, typically JSON.
    Text(String),
    /// Streamed from a file on disk.
    File(PathBuf),
}

/// A fully built `POST` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    /// Absolute URL including the encoded query string.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl OutgoingRequest {
    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Path of the streamed payload, if this request streams a file.
    pub fn payload_path(&self) -> Option<&Path> {
        match &self.body {
            RequestBody::File(path) => Some(path),
            RequestBody::Text(_) => None,
        }
    }
}

/// A response as seen by the classification logic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl IncomingResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Headers grouped by canonical name (`Content-Type`), the shape the
    /// error report expects.
    pub fn header_map(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in &self.headers {
            map.entry(canonical_header_name(key))
                .or_default()
                .push(value.clone());
        }
        map
    }

    /// The body parsed as JSON, or `None` when it is empty or not JSON.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// `content-type` becomes `Content-Type`: each dash-separated word is
/// capitalized and the rest lowercased.
pub fn canonical_header_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        canonical.push(if upper {
            c.to_ascii_uppercase()
        } else {
            c.to_ascii_lowercase()
        });
        upper = c == '-';
    }
    canonical
}

/// Sends requests to the remote service.
///
/// An `Err` means no response was obtained at all; every HTTP status,
/// including 4xx and 5xx, comes back as `Ok`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutgoingRequest) -> Result<IncomingResponse, TransportError>;
}
