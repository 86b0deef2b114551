//! Production [`Transport`] backed by `reqwest`.

use std::fmt::Write as _;

use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client};
use tracing::debug;

use crate::contract::{IncomingResponse, OutgoingRequest, RequestBody, Transport};
use crate::error::TransportError;

/// Sends every request as a `POST`. No timeouts are configured, so large
/// uploads over slow links are never cut short.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    verbose: bool,
}

impl ReqwestTransport {
    pub fn new(verbose: bool) -> Result<Self, TransportError> {
        let client = Client::builder().build()?;
        Ok(Self { client, verbose })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<IncomingResponse, TransportError> {
        if self.verbose {
            println!("{}", format_request_dump(&request));
        }

        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.body {
            RequestBody::Text(text) => builder.body(text.clone()),
            RequestBody::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                let length = file.metadata().await?.len();
                debug!(path = %path.display(), length, "Streaming payload");
                builder
                    .header(CONTENT_LENGTH, length)
                    .body(Body::from(file))
            }
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        let incoming = IncomingResponse {
            status,
            headers,
            body,
        };
        if self.verbose {
            println!("{}", format_response_dump(&incoming));
        }
        Ok(incoming)
    }
}

/// Human-readable request dump. File bodies are never included.
pub fn format_request_dump(request: &OutgoingRequest) -> String {
    let mut dump = format!("\n--- Request ---\nPOST {}\n", request.url);
    for (name, value) in &request.headers {
        let _ = writeln!(dump, "{name}: {value}");
    }
    if let RequestBody::Text(text) = &request.body {
        let _ = write!(dump, "\n{text}\n");
    }
    dump
}

pub fn format_response_dump(response: &IncomingResponse) -> String {
    let mut dump = format!("\n--- Response ---\nHTTP {}\n", response.status);
    for (name, value) in &response.headers {
        let _ = writeln!(dump, "{name}: {value}");
    }
    if !response.body.is_empty() {
        let _ = write!(dump, "\n{}\n", String::from_utf8_lossy(&response.body));
    }
    dump
}
