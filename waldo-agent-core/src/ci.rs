//! CI platform detection and CI-supplied git provenance.
//!
//! Detection walks [`PROVIDERS`] in order and stops at the first platform
//! whose marker variables are present. Each entry also carries a pure
//! extraction function that reads whatever branch/commit variables that
//! platform publishes. Adding a platform means adding a row; callers never
//! match on the provider.

use std::fmt;

use tracing::{debug, info};

use crate::config::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CiProvider {
    #[default]
    Unknown,
    AppCenter,
    AzureDevOps,
    Bitrise,
    CircleCI,
    CodeBuild,
    GitHubActions,
    Jenkins,
    TeamCity,
    TravisCI,
    XcodeCloud,
}

impl CiProvider {
    /// Name sent to the service in `ci` fields and user agents.
    pub fn name(&self) -> &'static str {
        match self {
            CiProvider::Unknown => "Unknown",
            CiProvider::AppCenter => "App Center",
            CiProvider::AzureDevOps => "Azure DevOps",
            CiProvider::Bitrise => "Bitrise",
            CiProvider::CircleCI => "CircleCI",
            CiProvider::CodeBuild => "CodeBuild",
            CiProvider::GitHubActions => "GitHub Actions",
            CiProvider::Jenkins => "Jenkins",
            CiProvider::TeamCity => "TeamCity",
            CiProvider::TravisCI => "Travis CI",
            CiProvider::XcodeCloud => "Xcode Cloud",
        }
    }
}

impl fmt::Display for CiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Branch/commit as published by the CI platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiRevision {
    pub git_branch: String,
    pub git_commit: String,
    /// Leading commit log entries to skip when asking git for the commit.
    pub skip_count: u32,
}

/// What the scanner learned about the CI run. Built once per invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceInfo {
    pub provider: CiProvider,
    pub ci_git_branch: String,
    pub ci_git_commit: String,
    pub skip_count: u32,
}

/// One row of the provider table.
pub struct ProviderRule {
    pub provider: CiProvider,
    pub detect: fn(&dyn Environment) -> bool,
    pub extract: fn(&dyn Environment) -> CiRevision,
}

/// Providers in detection priority order.
pub const PROVIDERS: &[ProviderRule] = &[
    ProviderRule {
        provider: CiProvider::AppCenter,
        detect: on_app_center,
        extract: extract_app_center,
    },
    ProviderRule {
        provider: CiProvider::AzureDevOps,
        detect: on_azure_devops,
        extract: extract_azure_devops,
    },
    ProviderRule {
        provider: CiProvider::Bitrise,
        detect: on_bitrise,
        extract: extract_bitrise,
    },
    ProviderRule {
        provider: CiProvider::CircleCI,
        detect: on_circle_ci,
        extract: extract_circle_ci,
    },
    ProviderRule {
        provider: CiProvider::CodeBuild,
        detect: on_code_build,
        extract: extract_code_build,
    },
    ProviderRule {
        provider: CiProvider::GitHubActions,
        detect: on_github_actions,
        extract: extract_github_actions,
    },
    ProviderRule {
        provider: CiProvider::Jenkins,
        detect: on_jenkins,
        extract: extract_nothing,
    },
    ProviderRule {
        provider: CiProvider::TeamCity,
        detect: on_team_city,
        extract: extract_nothing,
    },
    ProviderRule {
        provider: CiProvider::TravisCI,
        detect: on_travis_ci,
        extract: extract_travis_ci,
    },
    ProviderRule {
        provider: CiProvider::XcodeCloud,
        detect: on_xcode_cloud,
        extract: extract_xcode_cloud,
    },
];

/// Identify the CI platform and, when `full_info` is set, read its
/// branch/commit variables. Never fails: missing variables yield empty values.
pub fn detect(env: &dyn Environment, full_info: bool) -> ProvenanceInfo {
    let rule = PROVIDERS.iter().find(|rule| (rule.detect)(env));
    let provider = rule.map(|rule| rule.provider).unwrap_or_default();

    let revision = match rule {
        Some(rule) if full_info => (rule.extract)(env),
        _ => CiRevision::default(),
    };

    let info = ProvenanceInfo {
        provider,
        ci_git_branch: revision.git_branch,
        ci_git_commit: revision.git_commit,
        skip_count: revision.skip_count,
    };

    info!(
        provider = %info.provider,
        ci_git_branch = %info.ci_git_branch,
        ci_git_commit = %info.ci_git_commit,
        skip_count = info.skip_count,
        "Detected CI environment"
    );
    info
}

fn is_set(env: &dyn Environment, key: &str) -> bool {
    env.var(key).is_some()
}

fn is_true(env: &dyn Environment, key: &str) -> bool {
    env.var(key).as_deref() == Some("true")
}

fn on_app_center(env: &dyn Environment) -> bool {
    is_set(env, "APPCENTER_BUILD_ID")
}

fn on_azure_devops(env: &dyn Environment) -> bool {
    is_set(env, "AGENT_ID")
}

fn on_bitrise(env: &dyn Environment) -> bool {
    is_true(env, "BITRISE_IO")
}

fn on_circle_ci(env: &dyn Environment) -> bool {
    is_true(env, "CIRCLECI")
}

fn on_code_build(env: &dyn Environment) -> bool {
    is_set(env, "CODEBUILD_BUILD_ID")
}

fn on_github_actions(env: &dyn Environment) -> bool {
    is_true(env, "GITHUB_ACTIONS")
}

fn on_jenkins(env: &dyn Environment) -> bool {
    is_set(env, "JENKINS_URL")
}

fn on_team_city(env: &dyn Environment) -> bool {
    is_set(env, "TEAMCITY_VERSION")
}

fn on_travis_ci(env: &dyn Environment) -> bool {
    is_true(env, "TRAVIS")
}

fn on_xcode_cloud(env: &dyn Environment) -> bool {
    is_set(env, "CI_BUILD_ID")
}

fn revision(branch: String, commit: String) -> CiRevision {
    CiRevision {
        git_branch: branch,
        git_commit: commit,
        skip_count: 0,
    }
}

fn extract_nothing(_env: &dyn Environment) -> CiRevision {
    CiRevision::default()
}

fn extract_app_center(env: &dyn Environment) -> CiRevision {
    revision(env.value("APPCENTER_BRANCH"), String::new())
}

fn extract_azure_devops(env: &dyn Environment) -> CiRevision {
    revision(
        env.value("BUILD_SOURCEBRANCHNAME"),
        env.value("BUILD_SOURCEVERSION"),
    )
}

fn extract_bitrise(env: &dyn Environment) -> CiRevision {
    revision(
        env.value("BITRISE_GIT_BRANCH"),
        env.value("BITRISE_GIT_COMMIT"),
    )
}

fn extract_circle_ci(env: &dyn Environment) -> CiRevision {
    revision(env.value("CIRCLE_BRANCH"), env.value("CIRCLE_SHA1"))
}

fn extract_code_build(env: &dyn Environment) -> CiRevision {
    let trigger = env.value("CODEBUILD_WEBHOOK_TRIGGER");
    let branch = trigger
        .strip_prefix("branch/")
        .map(str::to_string)
        .unwrap_or_default();

    revision(branch, env.value("CODEBUILD_WEBHOOK_PREV_COMMIT"))
}

fn extract_github_actions(env: &dyn Environment) -> CiRevision {
    let event_name = env.value("GITHUB_EVENT_NAME");
    let on_branch = env.value("GITHUB_REF_TYPE") == "branch";
    debug!(event_name = %event_name, on_branch, "Reading GitHub Actions event");

    match event_name.as_str() {
        "pull_request" | "pull_request_target" => CiRevision {
            git_branch: if on_branch {
                env.value("GITHUB_HEAD_REF")
            } else {
                String::new()
            },
            // Not a GitHub default: the workflow must export it from
            // `github.event.pull_request.head.sha`.
            git_commit: env.value("GITHUB_EVENT_PULL_REQUEST_HEAD_SHA"),
            // HEAD is the synthetic merge commit of the pull request.
            skip_count: 1,
        },
        "push" => revision(
            if on_branch {
                env.value("GITHUB_REF_NAME")
            } else {
                String::new()
            },
            env.value("GITHUB_SHA"),
        ),
        _ => CiRevision::default(),
    }
}

fn extract_travis_ci(env: &dyn Environment) -> CiRevision {
    revision(env.value("TRAVIS_BRANCH"), env.value("TRAVIS_COMMIT"))
}

fn extract_xcode_cloud(env: &dyn Environment) -> CiRevision {
    revision(env.value("CI_BRANCH"), env.value("CI_COMMIT"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&'static str, &'static str)]) -> HashMap<&'static str, &'static str> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn unknown_when_nothing_matches() {
        let info = detect(&env(&[("HOME", "/root")]), true);
        assert_eq!(info, ProvenanceInfo::default());
        assert_eq!(info.provider.name(), "Unknown");
    }

    #[test]
    fn boolean_flags_require_literal_true() {
        assert_eq!(
            detect(&env(&[("CIRCLECI", "1")]), false).provider,
            CiProvider::Unknown
        );
        assert_eq!(
            detect(&env(&[("CIRCLECI", "true")]), false).provider,
            CiProvider::CircleCI
        );
    }

    #[test]
    fn first_matching_provider_wins() {
        let info = detect(
            &env(&[
                ("GITHUB_ACTIONS", "true"),
                ("BITRISE_IO", "true"),
                ("JENKINS_URL", "https://jenkins.example.com"),
            ]),
            false,
        );
        assert_eq!(info.provider, CiProvider::Bitrise);
    }

    #[test]
    fn provider_only_scan_leaves_revision_empty() {
        let info = detect(
            &env(&[
                ("TRAVIS", "true"),
                ("TRAVIS_BRANCH", "main"),
                ("TRAVIS_COMMIT", "abc123"),
            ]),
            false,
        );
        assert_eq!(info.provider, CiProvider::TravisCI);
        assert_eq!(info.ci_git_branch, "");
        assert_eq!(info.ci_git_commit, "");
    }

    #[test]
    fn github_push_on_branch() {
        let info = detect(
            &env(&[
                ("GITHUB_ACTIONS", "true"),
                ("GITHUB_EVENT_NAME", "push"),
                ("GITHUB_REF_TYPE", "branch"),
                ("GITHUB_REF_NAME", "release/1.2"),
                ("GITHUB_SHA", "abc123"),
            ]),
            true,
        );
        assert_eq!(
            info,
            ProvenanceInfo {
                provider: CiProvider::GitHubActions,
                ci_git_branch: "release/1.2".into(),
                ci_git_commit: "abc123".into(),
                skip_count: 0,
            }
        );
    }

    #[test]
    fn github_push_of_tag_has_no_branch() {
        let info = detect(
            &env(&[
                ("GITHUB_ACTIONS", "true"),
                ("GITHUB_EVENT_NAME", "push"),
                ("GITHUB_REF_TYPE", "tag"),
                ("GITHUB_REF_NAME", "v1.2.0"),
                ("GITHUB_SHA", "abc123"),
            ]),
            true,
        );
        assert_eq!(info.ci_git_branch, "");
        assert_eq!(info.ci_git_commit, "abc123");
    }

    #[test]
    fn github_pull_request_skips_merge_commit() {
        let info = detect(
            &env(&[
                ("GITHUB_ACTIONS", "true"),
                ("GITHUB_EVENT_NAME", "pull_request"),
                ("GITHUB_REF_TYPE", "branch"),
                ("GITHUB_HEAD_REF", "feature/login"),
                ("GITHUB_EVENT_PULL_REQUEST_HEAD_SHA", "def456"),
            ]),
            true,
        );
        assert_eq!(info.ci_git_branch, "feature/login");
        assert_eq!(info.ci_git_commit, "def456");
        assert_eq!(info.skip_count, 1);
    }

    #[test]
    fn github_pull_request_with_tag_ref_type() {
        let info = detect(
            &env(&[
                ("GITHUB_ACTIONS", "true"),
                ("GITHUB_EVENT_NAME", "pull_request"),
                ("GITHUB_REF_TYPE", "tag"),
                ("GITHUB_HEAD_REF", "feature/login"),
            ]),
            true,
        );
        assert_eq!(info.ci_git_branch, "");
        assert_eq!(info.skip_count, 1);
    }

    #[test]
    fn github_other_events_yield_nothing() {
        let info = detect(
            &env(&[
                ("GITHUB_ACTIONS", "true"),
                ("GITHUB_EVENT_NAME", "workflow_dispatch"),
                ("GITHUB_REF_TYPE", "branch"),
                ("GITHUB_REF_NAME", "main"),
                ("GITHUB_SHA", "abc123"),
            ]),
            true,
        );
        assert_eq!(info.provider, CiProvider::GitHubActions);
        assert_eq!(info.ci_git_branch, "");
        assert_eq!(info.ci_git_commit, "");
        assert_eq!(info.skip_count, 0);
    }

    #[test]
    fn code_build_branch_comes_from_webhook_trigger() {
        struct TestCase {
            name: &'static str,
            trigger: &'static str,
            expected_branch: &'static str,
        }

        let cases = vec![
            TestCase {
                name: "branch trigger",
                trigger: "branch/main",
                expected_branch: "main",
            },
            TestCase {
                name: "nested branch name",
                trigger: "branch/feature/x",
                expected_branch: "feature/x",
            },
            TestCase {
                name: "pull request trigger",
                trigger: "pr/42",
                expected_branch: "",
            },
            TestCase {
                name: "tag trigger",
                trigger: "tag/v1.0",
                expected_branch: "",
            },
        ];

        for case in cases {
            let info = detect(
                &env(&[
                    ("CODEBUILD_BUILD_ID", "build:1"),
                    ("CODEBUILD_WEBHOOK_TRIGGER", case.trigger),
                    ("CODEBUILD_WEBHOOK_PREV_COMMIT", "0123abcd"),
                ]),
                true,
            );
            assert_eq!(info.provider, CiProvider::CodeBuild, "{}", case.name);
            assert_eq!(info.ci_git_branch, case.expected_branch, "{}", case.name);
            assert_eq!(info.ci_git_commit, "0123abcd", "{}", case.name);
        }
    }

    #[test]
    fn platforms_without_known_variables_stay_empty() {
        for marker in [
            ("JENKINS_URL", "https://ci.example.com"),
            ("TEAMCITY_VERSION", "2023.05"),
        ] {
            let info = detect(&env(&[marker, ("GIT_BRANCH", "origin/main")]), true);
            assert_ne!(info.provider, CiProvider::Unknown);
            assert_eq!(info.ci_git_branch, "");
            assert_eq!(info.ci_git_commit, "");
        }
    }

    #[test]
    fn simple_providers_read_their_variables() {
        struct TestCase {
            vars: Vec<(&'static str, &'static str)>,
            provider: CiProvider,
            branch: &'static str,
            commit: &'static str,
        }

        let cases = vec![
            TestCase {
                vars: vec![
                    ("APPCENTER_BUILD_ID", "17"),
                    ("APPCENTER_BRANCH", "develop"),
                ],
                provider: CiProvider::AppCenter,
                branch: "develop",
                commit: "",
            },
            TestCase {
                vars: vec![
                    ("AGENT_ID", "9"),
                    ("BUILD_SOURCEBRANCHNAME", "main"),
                    ("BUILD_SOURCEVERSION", "aaa111"),
                ],
                provider: CiProvider::AzureDevOps,
                branch: "main",
                commit: "aaa111",
            },
            TestCase {
                vars: vec![
                    ("BITRISE_IO", "true"),
                    ("BITRISE_GIT_BRANCH", "dev"),
                    ("BITRISE_GIT_COMMIT", "bbb222"),
                ],
                provider: CiProvider::Bitrise,
                branch: "dev",
                commit: "bbb222",
            },
            TestCase {
                vars: vec![
                    ("CIRCLECI", "true"),
                    ("CIRCLE_BRANCH", "topic"),
                    ("CIRCLE_SHA1", "ccc333"),
                ],
                provider: CiProvider::CircleCI,
                branch: "topic",
                commit: "ccc333",
            },
            TestCase {
                vars: vec![
                    ("CI_BUILD_ID", "uuid"),
                    ("CI_BRANCH", "main"),
                    ("CI_COMMIT", "ddd444"),
                ],
                provider: CiProvider::XcodeCloud,
                branch: "main",
                commit: "ddd444",
            },
        ];

        for case in cases {
            let vars: HashMap<&str, &str> = case.vars.into_iter().collect();
            let info = detect(&vars, true);
            assert_eq!(info.provider, case.provider);
            assert_eq!(info.ci_git_branch, case.branch, "{}", case.provider);
            assert_eq!(info.ci_git_commit, case.commit, "{}", case.provider);
            assert_eq!(info.skip_count, 0);
        }
    }
}
