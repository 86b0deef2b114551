//! # upload: the build upload pipeline
//!
//! [`UploadAction::validate`] gathers everything up front: the build
//! descriptor, CI and git provenance, and a fresh upload id. Nothing in
//! validation touches the network, so a bad token or build path fails fast.
//!
//! [`UploadAction::perform`] then prepares a scratch [`WorkingDir`],
//! packages the build, and posts it with one retry on transient failures.
//! Any failure from that point on is also reported to the error endpoint
//! before being returned; a failing report never masks the upload error.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use reqwest::Url;
use tracing::{error, info, warn};

use crate::build::{self, BuildDescriptor, WorkingDir, JSON_CONTENT_TYPE};
use crate::ci::{self, ProvenanceInfo};
use crate::config::{Environment, UploadOptions, AGENT_NAME, AGENT_VERSION};
use crate::contract::{IncomingResponse, OutgoingRequest, ProcessRunner, RequestBody, Transport};
use crate::error::{AgentError, Result};
use crate::git::{self, GitInfo};
use crate::metadata::{MetadataStore, UploadMetadata};
use crate::runtime::RuntimeInfo;
use crate::submission::{self, ErrorPayload, RequestKind, Submission};

/// A validated upload, ready to perform.
#[derive(Debug, Clone)]
pub struct UploadAction {
    options: UploadOptions,
    runtime: RuntimeInfo,
    provenance: ProvenanceInfo,
    git: GitInfo,
    build: BuildDescriptor,
    working_dir: PathBuf,
    upload_id: String,
}

/// Why an upload failed, with whatever the server said about it.
#[derive(Debug)]
struct UploadFailure {
    error: AgentError,
    response: Option<IncomingResponse>,
    retry: u32,
}

impl From<AgentError> for UploadFailure {
    fn from(error: AgentError) -> Self {
        Self {
            error,
            response: None,
            retry: 0,
        }
    }
}

impl UploadAction {
    /// Check the options and collect provenance, using the per-process
    /// working directory.
    pub fn validate(
        options: UploadOptions,
        runtime: RuntimeInfo,
        env: &dyn Environment,
        runner: &dyn ProcessRunner,
    ) -> Result<Self> {
        Self::validate_in(options, runtime, env, runner, WorkingDir::default_path())
    }

    /// Like [`UploadAction::validate`] with an explicit working directory.
    pub fn validate_in(
        options: UploadOptions,
        runtime: RuntimeInfo,
        env: &dyn Environment,
        runner: &dyn ProcessRunner,
        working_dir: PathBuf,
    ) -> Result<Self> {
        if options.upload_token.is_empty() {
            return Err(AgentError::MissingUploadToken);
        }

        let build = build::validate_build_path(&options.build_path, &working_dir)?;
        let provenance = ci::detect(env, true);
        let git = git::resolve(runner, provenance.skip_count);
        let upload_id = submission::random_upload_id();

        info!(
            build = %build.absolute_path.display(),
            flavor = %build.flavor(),
            ci = %provenance.provider,
            git_access = %git.access,
            upload_id = %upload_id,
            "[UPLOAD] Validated upload"
        );

        Ok(Self {
            options,
            runtime,
            provenance,
            git,
            build,
            working_dir,
            upload_id,
        })
    }

    pub fn build(&self) -> &BuildDescriptor {
        &self.build
    }

    pub fn provenance(&self) -> &ProvenanceInfo {
        &self.provenance
    }

    pub fn git(&self) -> &GitInfo {
        &self.git
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Package and upload the build.
    ///
    /// Returns the saved metadata, or `None` when the upload succeeded but
    /// its response could not be recorded locally.
    pub async fn perform(
        &self,
        transport: &dyn Transport,
        store: &MetadataStore,
    ) -> Result<Option<UploadMetadata>> {
        let outcome = match WorkingDir::create(&self.working_dir) {
            Ok(_working) => self.package_and_upload(transport, store).await,
            Err(e) => Err(UploadFailure::from(e)),
        };

        match outcome {
            Ok(metadata) => Ok(metadata),
            Err(failure) => {
                error!(error = %failure.error, retry = failure.retry, "[UPLOAD] Upload failed");
                self.report_error(transport, &failure).await;
                Err(failure.error)
            }
        }
    }

    async fn package_and_upload(
        &self,
        transport: &dyn Transport,
        store: &MetadataStore,
    ) -> std::result::Result<Option<UploadMetadata>, UploadFailure> {
        build::create_payload(&self.build)?;
        let length = build::payload_size(&self.build)?;
        info!(length, "[UPLOAD] Uploading build payload");

        let delivered = Submission::new(transport, RequestKind::Build)
            .send(|retry| self.build_request(retry))
            .await
            .map_err(|rejected| UploadFailure {
                error: rejected.error,
                response: rejected.response,
                retry: rejected.retry,
            })?;

        Ok(self.record_metadata(&delivered.response, store))
    }

    fn record_metadata(
        &self,
        response: &IncomingResponse,
        store: &MetadataStore,
    ) -> Option<UploadMetadata> {
        let endpoint = self.build_endpoint();
        let host = host_of(&endpoint);

        let saved = UploadMetadata::from_response(&response.body, &host, Utc::now())
            .and_then(|metadata| store.save(&metadata).map(|_| metadata));

        match saved {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(error = %e, "[UPLOAD] Unable to save upload metadata");
                eprintln!("waldo: Unable to save upload metadata locally, error: {e}");
                None
            }
        }
    }

    fn build_endpoint(&self) -> String {
        submission::build_endpoint(
            &self.options.overrides,
            &self.options.upload_token,
            &self.options.app_id,
        )
    }

    /// Query parameters for the given attempt; empty values are dropped later.
    pub fn build_query(&self, retry: u32) -> BTreeMap<&'static str, String> {
        let overrides = &self.options.overrides;
        BTreeMap::from([
            ("agentName", AGENT_NAME.to_string()),
            ("agentVersion", AGENT_VERSION.to_string()),
            ("arch", self.runtime.arch.clone()),
            ("ci", self.provenance.provider.name().to_string()),
            ("ciGitBranch", self.provenance.ci_git_branch.clone()),
            ("ciGitCommit", self.provenance.ci_git_commit.clone()),
            ("flavor", self.build.flavor().name().to_string()),
            ("gitAccess", self.git.access.name().to_string()),
            ("gitBranch", self.git.branch.clone()),
            ("gitCommit", self.git.commit.clone()),
            ("platform", self.runtime.platform.clone()),
            ("retry", retry.to_string()),
            ("userGitBranch", self.options.git_branch.clone()),
            ("userGitCommit", self.options.git_commit.clone()),
            ("variantName", self.options.variant_name.clone()),
            ("wrapperName", overrides.wrapper_name().to_string()),
            ("wrapperVersion", overrides.wrapper_version().to_string()),
        ])
    }

    fn common_headers(&self, content_type: &str) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                submission::authorization(&self.options.upload_token),
            ),
            ("Content-Type".to_string(), content_type.to_string()),
            (
                "User-Agent".to_string(),
                submission::user_agent(
                    self.provenance.provider,
                    Some(self.build.flavor()),
                    &self.options.overrides,
                ),
            ),
            ("X-Upload-Id".to_string(), self.upload_id.clone()),
        ]
    }

    fn build_request(&self, retry: u32) -> Result<OutgoingRequest> {
        Ok(OutgoingRequest {
            url: submission::with_query(&self.build_endpoint(), &self.build_query(retry))?,
            headers: self.common_headers(self.build.content_type()),
            body: RequestBody::File(self.build.payload_path.clone()),
        })
    }

    fn error_payload(&self, failure: &UploadFailure) -> ErrorPayload {
        let overrides = &self.options.overrides;
        ErrorPayload {
            agent_name: AGENT_NAME.to_string(),
            agent_version: AGENT_VERSION.to_string(),
            arch: self.runtime.arch.clone(),
            ci: self.provenance.provider.name().to_string(),
            ci_git_branch: self.provenance.ci_git_branch.clone(),
            ci_git_commit: self.provenance.ci_git_commit.clone(),
            failure_body: failure.response.as_ref().and_then(|r| r.json_body()),
            failure_headers: failure.response.as_ref().map(|r| r.header_map()),
            failure_status_code: failure.response.as_ref().map_or(0, |r| r.status),
            message: failure.error.to_string(),
            platform: self.runtime.platform.clone(),
            retry: failure.retry,
            wrapper_name: overrides.wrapper_name().to_string(),
            wrapper_version: overrides.wrapper_version().to_string(),
        }
    }

    /// Best effort: failures are logged and dropped.
    async fn report_error(&self, transport: &dyn Transport, failure: &UploadFailure) {
        let body = match serde_json::to_string(&self.error_payload(failure)) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "[UPLOAD] Unable to encode error report");
                return;
            }
        };
        let url = submission::error_endpoint(&self.options.overrides);

        let result = Submission::new(transport, RequestKind::Error)
            .send(|_| {
                Ok(OutgoingRequest {
                    url: url.clone(),
                    headers: self.common_headers(JSON_CONTENT_TYPE),
                    body: RequestBody::Text(body.clone()),
                })
            })
            .await;

        match result {
            Ok(_) => info!("[UPLOAD] Error report delivered"),
            Err(rejected) => warn!(error = %rejected.error, "[UPLOAD] Error report not delivered"),
        }
    }
}

/// `host[:port]` of `endpoint`, empty when it does not parse.
fn host_of(endpoint: &str) -> String {
    match Url::parse(endpoint) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        },
        Err(_) => String::new(),
    }
}
