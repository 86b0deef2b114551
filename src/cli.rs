use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use waldo_agent_core::config::{
    Environment, Overrides, ProcessEnvironment, TriggerOptions, UploadOptions,
};
use waldo_agent_core::git::SystemProcessRunner;
use waldo_agent_core::metadata::MetadataStore;
use waldo_agent_core::runtime::RuntimeInfo;
use waldo_agent_core::transport::ReqwestTransport;
use waldo_agent_core::trigger::TriggerAction;
use waldo_agent_core::upload::UploadAction;

/// CLI for the Waldo agent: upload builds and trigger runs from CI.
#[derive(Parser, Debug)]
#[command(
    name = "waldo",
    about = "Upload mobile builds to Waldo and trigger runs, tagged with CI and git provenance",
    disable_version_flag = true
)]
pub struct Cli {
    /// Print the agent version and exit
    #[arg(long)]
    pub version: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload a build artifact to Waldo (the default command)
    Upload(UploadArgs),
    /// Trigger a run on Waldo
    Trigger(TriggerArgs),
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// The path to the build artifact to upload (.apk, .app or .ipa)
    pub build_path: PathBuf,

    /// An app ID (if not using an app token)
    #[arg(long = "app_id")]
    pub app_id: Option<String>,

    /// The originating git commit branch name
    #[arg(long = "git_branch")]
    pub git_branch: Option<String>,

    /// The originating git commit hash
    #[arg(long = "git_commit")]
    pub git_commit: Option<String>,

    /// The upload token
    #[arg(long = "upload_token", env = "WALDO_UPLOAD_TOKEN", hide_env_values = true)]
    pub upload_token: Option<String>,

    /// An optional variant name
    #[arg(long = "variant_name")]
    pub variant_name: Option<String>,

    /// Show extra verbiage
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct TriggerArgs {
    /// The originating git commit hash
    #[arg(long = "git_commit")]
    pub git_commit: Option<String>,

    /// An optional rule name
    #[arg(long = "rule_name")]
    pub rule_name: Option<String>,

    /// The upload token
    #[arg(long = "upload_token", env = "WALDO_UPLOAD_TOKEN", hide_env_values = true)]
    pub upload_token: Option<String>,

    /// Show extra verbiage
    #[arg(long)]
    pub verbose: bool,
}

impl UploadArgs {
    pub fn into_options(self, overrides: Overrides) -> UploadOptions {
        UploadOptions {
            build_path: self.build_path,
            upload_token: self.upload_token.unwrap_or_default(),
            app_id: self.app_id.unwrap_or_default(),
            variant_name: self.variant_name.unwrap_or_default(),
            git_branch: self.git_branch.unwrap_or_default(),
            git_commit: self.git_commit.unwrap_or_default(),
            verbose: self.verbose,
            overrides,
        }
    }
}

impl TriggerArgs {
    pub fn into_options(self, overrides: Overrides) -> TriggerOptions {
        TriggerOptions {
            upload_token: self.upload_token.unwrap_or_default(),
            rule_name: self.rule_name.unwrap_or_default(),
            git_commit: self.git_commit.unwrap_or_default(),
            verbose: self.verbose,
            overrides,
        }
    }
}

/// Insert the implicit `upload` subcommand, so `waldo app.apk` works.
///
/// No arguments at all means help.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    if args.len() <= 1 {
        args.push("--help".into());
        return args;
    }

    let first = args[1].to_string_lossy().into_owned();
    if !matches!(
        first.as_str(),
        "upload" | "trigger" | "help" | "--help" | "-h" | "--version"
    ) {
        args.insert(1, "upload".into());
    }
    args
}

/// `"value"`, or `(none)` when empty.
pub fn summarize(value: &str) -> String {
    if value.is_empty() {
        "(none)".to_string()
    } else {
        format!("{value:?}")
    }
}

/// Like [`summarize`], but masks all but the first six characters unless verbose.
pub fn summarize_secure(value: &str, verbose: bool) -> String {
    if value.is_empty() {
        return "(none)".to_string();
    }
    if verbose {
        return format!("{value:?}");
    }

    let visible: String = value.chars().take(6).collect();
    let hidden = value.chars().count() - visible.chars().count();
    format!("{:?}", format!("{visible}{}", "*".repeat(hidden)))
}

pub fn upload_summary(options: &UploadOptions, action: &UploadAction) -> String {
    let mut lines = vec![
        String::new(),
        format!("App ID:              {}", summarize(&options.app_id)),
        format!(
            "Build path:          {}",
            summarize(&action.build().absolute_path.to_string_lossy())
        ),
        format!("Git branch:          {}", summarize(&options.git_branch)),
        format!("Git commit:          {}", summarize(&options.git_commit)),
        format!(
            "Upload token:        {}",
            summarize_secure(&options.upload_token, options.verbose)
        ),
        format!("Variant name:        {}", summarize(&options.variant_name)),
    ];

    if options.verbose {
        let provenance = action.provenance();
        let git = action.git();
        lines.extend([
            String::new(),
            format!(
                "Build payload path:  {}",
                summarize(&action.build().payload_path.to_string_lossy())
            ),
            format!("CI git branch:       {}", summarize(&provenance.ci_git_branch)),
            format!("CI git commit:       {}", summarize(&provenance.ci_git_commit)),
            format!("CI provider:         {}", summarize(provenance.provider.name())),
            format!("Git access:          {}", summarize(git.access.name())),
            format!("Inferred git branch: {}", summarize(&git.branch)),
            format!("Inferred git commit: {}", summarize(&git.commit)),
        ]);
    }

    lines.push(String::new());
    lines.join("\n")
}

pub fn trigger_summary(options: &TriggerOptions) -> String {
    [
        String::new(),
        format!("Git commit:          {}", summarize(&options.git_commit)),
        format!("Rule name:           {}", summarize(&options.rule_name)),
        format!(
            "Upload token:        {}",
            summarize_secure(&options.upload_token, options.verbose)
        ),
        String::new(),
    ]
    .join("\n")
}

/// The version line printed first on every invocation, help included.
pub fn banner() -> String {
    RuntimeInfo::detect().version(&Overrides::from_env(&ProcessEnvironment))
}

/// Extracted async CLI logic entrypoint for integration tests and main()
///
/// The banner is printed by the caller, before arguments are parsed.
pub async fn run(cli: Cli) -> Result<()> {
    if cli.version {
        return Ok(());
    }

    let env = ProcessEnvironment;
    let overrides = Overrides::from_env(&env);
    let runtime = RuntimeInfo::detect();

    match cli.command {
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
        Some(Commands::Upload(args)) => upload(args.into_options(overrides), runtime, &env).await,
        Some(Commands::Trigger(args)) => trigger(args.into_options(overrides), runtime, &env).await,
    }
}

async fn upload(options: UploadOptions, runtime: RuntimeInfo, env: &dyn Environment) -> Result<()> {
    tracing::info!(build_path = %options.build_path.display(), "[UPLOAD] Starting upload");

    let runner = SystemProcessRunner::new();
    let action = UploadAction::validate(options.clone(), runtime, env, &runner)?;
    println!("{}", upload_summary(&options, &action));

    let transport = ReqwestTransport::new(options.verbose)?;
    action.perform(&transport, &MetadataStore::in_home()).await?;

    let build_name = action
        .build()
        .absolute_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    println!("\nBuild {build_name:?} successfully uploaded to Waldo!");
    Ok(())
}

async fn trigger(options: TriggerOptions, runtime: RuntimeInfo, env: &dyn Environment) -> Result<()> {
    tracing::info!(rule_name = %options.rule_name, "[TRIGGER] Starting trigger");

    let action = TriggerAction::validate(options.clone(), runtime, env)?;
    println!("{}", trigger_summary(&options));

    let transport = ReqwestTransport::new(options.verbose)?;
    action.perform(&transport).await?;

    println!("\nRun successfully triggered on Waldo!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(normalize_args(args.iter().copied())).unwrap()
    }

    #[test]
    fn upload_is_the_default_command() {
        struct TestCase {
            name: &'static str,
            args: &'static [&'static str],
            expected: &'static [&'static str],
        }

        let cases = [
            TestCase {
                name: "bare build path",
                args: &["waldo", "app.apk"],
                expected: &["waldo", "upload", "app.apk"],
            },
            TestCase {
                name: "leading option",
                args: &["waldo", "--verbose", "app.apk"],
                expected: &["waldo", "upload", "--verbose", "app.apk"],
            },
            TestCase {
                name: "explicit trigger",
                args: &["waldo", "trigger", "--rule_name", "smoke"],
                expected: &["waldo", "trigger", "--rule_name", "smoke"],
            },
            TestCase {
                name: "version",
                args: &["waldo", "--version"],
                expected: &["waldo", "--version"],
            },
            TestCase {
                name: "nothing",
                args: &["waldo"],
                expected: &["waldo", "--help"],
            },
        ];

        for case in cases {
            let expected: Vec<OsString> = case.expected.iter().map(OsString::from).collect();
            assert_eq!(normalize_args(case.args.iter().copied()), expected, "{}", case.name);
        }
    }

    #[test]
    fn upload_options_are_parsed() {
        let cli = parse(&[
            "waldo",
            "build/Sample.app",
            "--app_id",
            "app-1",
            "--git_branch",
            "main",
            "--upload_token",
            "u-secret",
            "--variant_name",
            "debug",
            "--verbose",
        ]);

        let Some(Commands::Upload(args)) = cli.command else {
            panic!("expected upload command");
        };
        let options = args.into_options(Overrides::default());
        assert_eq!(options.build_path, PathBuf::from("build/Sample.app"));
        assert_eq!(options.app_id, "app-1");
        assert_eq!(options.git_branch, "main");
        assert_eq!(options.git_commit, "");
        assert_eq!(options.upload_token, "u-secret");
        assert_eq!(options.variant_name, "debug");
        assert!(options.verbose);
    }

    #[test]
    fn trigger_rejects_upload_only_options() {
        let result = Cli::try_parse_from(normalize_args(["waldo", "trigger", "--app_id", "x"]));
        assert!(result.is_err());
    }

    #[test]
    fn token_is_masked_unless_verbose() {
        assert_eq!(summarize_secure("", false), "(none)");
        assert_eq!(summarize_secure("abc", false), "\"abc\"");
        assert_eq!(summarize_secure("0123456789", false), "\"012345****\"");
        assert_eq!(summarize_secure("0123456789", true), "\"0123456789\"");
        assert_eq!(summarize(""), "(none)");
        assert_eq!(summarize("main"), "\"main\"");
    }

    #[test]
    fn banner_names_the_agent() {
        assert!(banner().contains("Waldo Agent "));
    }

    #[test]
    fn trigger_summary_lists_inputs() {
        let summary = trigger_summary(&TriggerOptions {
            upload_token: "abcdefgh".into(),
            rule_name: "smoke".into(),
            ..TriggerOptions::default()
        });
        assert!(summary.contains("Git commit:          (none)"));
        assert!(summary.contains("Rule name:           \"smoke\""));
        assert!(summary.contains("Upload token:        \"abcdef**\""));
    }
}
