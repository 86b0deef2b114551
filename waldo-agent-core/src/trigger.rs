//! Triggering a test run for an already uploaded build.

use tracing::info;

use crate::build::JSON_CONTENT_TYPE;
use crate::ci::{self, ProvenanceInfo};
use crate::config::{Environment, TriggerOptions, AGENT_NAME, AGENT_VERSION};
use crate::contract::{OutgoingRequest, RequestBody, Transport};
use crate::error::{AgentError, Result};
use crate::runtime::RuntimeInfo;
use crate::submission::{self, RequestKind, Submission, TriggerPayload};

#[derive(Debug, Clone)]
pub struct TriggerAction {
    options: TriggerOptions,
    runtime: RuntimeInfo,
    provenance: ProvenanceInfo,
}

impl TriggerAction {
    pub fn validate(
        options: TriggerOptions,
        runtime: RuntimeInfo,
        env: &dyn Environment,
    ) -> Result<Self> {
        if options.upload_token.is_empty() {
            return Err(AgentError::MissingUploadToken);
        }

        let provenance = ci::detect(env, false);
        info!(ci = %provenance.provider, rule = %options.rule_name, "[TRIGGER] Validated trigger");

        Ok(Self {
            options,
            runtime,
            provenance,
        })
    }

    pub fn provenance(&self) -> &ProvenanceInfo {
        &self.provenance
    }

    pub fn payload(&self) -> TriggerPayload {
        let overrides = &self.options.overrides;
        TriggerPayload {
            agent_name: AGENT_NAME.to_string(),
            agent_version: AGENT_VERSION.to_string(),
            arch: self.runtime.arch.clone(),
            ci: self.provenance.provider.name().to_string(),
            git_sha: self.options.git_commit.clone(),
            platform: self.runtime.platform.clone(),
            rule_name: self.options.rule_name.clone(),
            wrapper_name: overrides.wrapper_name().to_string(),
            wrapper_version: overrides.wrapper_version().to_string(),
        }
    }

    fn request(&self, body: &str) -> OutgoingRequest {
        OutgoingRequest {
            url: submission::trigger_endpoint(&self.options.overrides),
            headers: vec![
                (
                    "Authorization".to_string(),
                    submission::authorization(&self.options.upload_token),
                ),
                ("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string()),
                (
                    "User-Agent".to_string(),
                    submission::user_agent(self.provenance.provider, None, &self.options.overrides),
                ),
            ],
            body: RequestBody::Text(body.to_string()),
        }
    }

    pub async fn perform(&self, transport: &dyn Transport) -> Result<()> {
        let body = serde_json::to_string(&self.payload())?;

        Submission::new(transport, RequestKind::Trigger)
            .send(|_| Ok(self.request(&body)))
            .await
            .map(|delivered| {
                info!(status = delivered.response.status, retry = delivered.retry, "[TRIGGER] Run triggered");
            })
            .map_err(|rejected| rejected.error)
    }
}
