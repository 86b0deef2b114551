//! Host platform and architecture as reported to the service.

use crate::config::{Overrides, AGENT_NAME, AGENT_VERSION};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub arch: String,
    pub platform: String,
}

impl RuntimeInfo {
    pub fn detect() -> Self {
        Self {
            arch: normalize_arch(std::env::consts::ARCH),
            platform: normalize_platform(std::env::consts::OS),
        }
    }

    /// Banner printed at start-up, e.g. `Waldo Agent 0.1.0 (macOS/arm64)`.
    ///
    /// When a wrapper reports both its name and version the banner leads with it.
    pub fn version(&self, overrides: &Overrides) -> String {
        let agent = format!(
            "{} {} ({}/{})",
            AGENT_NAME, AGENT_VERSION, self.platform, self.arch
        );

        match (&overrides.wrapper_name, &overrides.wrapper_version) {
            (Some(name), Some(version)) => format!("{name} {version} / {agent}"),
            _ => agent,
        }
    }
}

fn normalize_arch(arch: &str) -> String {
    match arch {
        "aarch64" => "arm64".to_string(),
        "x86" => "i386".to_string(),
        other => other.to_string(),
    }
}

fn normalize_platform(os: &str) -> String {
    match os {
        "macos" => "macOS".to_string(),
        "ios" => "iOS".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}
