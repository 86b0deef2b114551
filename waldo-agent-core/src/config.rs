use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, info};

pub const AGENT_NAME: &str = "Waldo Agent";
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_API_BUILD_APP_ENDPOINT: &str =
    "https://api.waldo.com/1.0/applications/${APP_ID}/versions";
pub const DEFAULT_API_BUILD_ENDPOINT: &str = "https://api.waldo.com/versions";
pub const DEFAULT_API_ERROR_ENDPOINT: &str = "https://api.waldo.com/uploadError";
pub const DEFAULT_API_TRIGGER_ENDPOINT: &str = "https://api.waldo.com/suites";

/// Total attempts for every network operation, first try included.
pub const MAX_NETWORK_ATTEMPTS: u32 = 2;

pub const ENV_API_BUILD_ENDPOINT_OVERRIDE: &str = "WALDO_API_BUILD_ENDPOINT_OVERRIDE";
pub const ENV_API_ERROR_ENDPOINT_OVERRIDE: &str = "WALDO_API_ERROR_ENDPOINT_OVERRIDE";
pub const ENV_API_TRIGGER_ENDPOINT_OVERRIDE: &str = "WALDO_API_TRIGGER_ENDPOINT_OVERRIDE";
pub const ENV_WRAPPER_NAME_OVERRIDE: &str = "WALDO_WRAPPER_NAME_OVERRIDE";
pub const ENV_WRAPPER_VERSION_OVERRIDE: &str = "WALDO_WRAPPER_VERSION_OVERRIDE";

/// Read-only view of environment variables.
///
/// Unset and empty variables are indistinguishable to the agent.
pub trait Environment {
    fn var(&self, key: &str) -> Option<String>;

    /// The value of `key`, or an empty string when it is unset.
    fn value(&self, key: &str) -> String {
        self.var(key).unwrap_or_default()
    }
}

/// The environment of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.is_empty())
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|value| !value.is_empty()).cloned()
    }
}

impl Environment for HashMap<&str, &str> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key)
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string())
    }
}

/// Endpoint and identity overrides, usually set by a wrapping tool
/// (a fastlane plugin, a GitHub action) rather than by users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub api_build_endpoint: Option<String>,
    pub api_error_endpoint: Option<String>,
    pub api_trigger_endpoint: Option<String>,
    pub wrapper_name: Option<String>,
    pub wrapper_version: Option<String>,
}

impl Overrides {
    pub fn from_env(env: &dyn Environment) -> Self {
        let overrides = Overrides {
            api_build_endpoint: env.var(ENV_API_BUILD_ENDPOINT_OVERRIDE),
            api_error_endpoint: env.var(ENV_API_ERROR_ENDPOINT_OVERRIDE),
            api_trigger_endpoint: env.var(ENV_API_TRIGGER_ENDPOINT_OVERRIDE),
            wrapper_name: env.var(ENV_WRAPPER_NAME_OVERRIDE),
            wrapper_version: env.var(ENV_WRAPPER_VERSION_OVERRIDE),
        };
        overrides.trace_loaded();
        overrides
    }

    pub fn wrapper_name(&self) -> &str {
        self.wrapper_name.as_deref().unwrap_or_default()
    }

    pub fn wrapper_version(&self) -> &str {
        self.wrapper_version.as_deref().unwrap_or_default()
    }

    fn trace_loaded(&self) {
        info!(
            build_endpoint_overridden = self.api_build_endpoint.is_some(),
            error_endpoint_overridden = self.api_error_endpoint.is_some(),
            trigger_endpoint_overridden = self.api_trigger_endpoint.is_some(),
            wrapper_name = self.wrapper_name(),
            wrapper_version = self.wrapper_version(),
            "Loaded overrides"
        );
        debug!(?self, "Overrides loaded (full debug)");
    }
}

/// Everything the user supplies for an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub build_path: PathBuf,
    pub upload_token: String,
    pub app_id: String,
    pub variant_name: String,
    pub git_branch: String,
    pub git_commit: String,
    pub verbose: bool,
    pub overrides: Overrides,
}

/// Everything the user supplies for a trigger.
#[derive(Debug, Clone, Default)]
pub struct TriggerOptions {
    pub upload_token: String,
    pub rule_name: String,
    pub git_commit: String,
    pub verbose: bool,
    pub overrides: Overrides,
}
