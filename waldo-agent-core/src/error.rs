//! Error types for the upload and trigger pipelines.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by validation, packaging and submission.
///
/// The `Display` text of each variant is what the user sees and what is sent
/// as `message` in the error report, so keep it stable.
#[derive(Error, Debug)]
pub enum AgentError {
    /// No build path was given.
    #[error("Empty build path")]
    EmptyBuildPath,

    /// The build path extension is not one of the known suffixes.
    #[error("File extension of build at {0:?} is not recognized")]
    UnrecognizedBuildSuffix(PathBuf),

    /// The build artifact does not exist or has the wrong shape.
    #[error("Unable to read build at {0:?}")]
    UnreadableBuild(PathBuf),

    /// No upload token was supplied.
    #[error("Missing required upload token")]
    MissingUploadToken,

    /// The working directory could not be prepared.
    #[error("Unable to prepare working directory {path:?}, error: {source}")]
    WorkingDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Compressing a bundle directory failed.
    #[error("Unable to archive build at {path:?}, error: {message}")]
    Archive { path: PathBuf, message: String },

    /// An endpoint (default or override) is not a valid URL.
    #[error("Invalid endpoint URL {url:?}: {message}")]
    InvalidEndpoint { url: String, message: String },

    /// HTTP 401.
    #[error("Upload token is invalid or missing!")]
    InvalidToken,

    /// HTTP 403 coming from the load balancer's firewall.
    #[error("Upload {0} blocked by WAF server!")]
    WafBlocked(&'static str),

    /// Any other non-2xx status.
    #[error("Unable to {action} Waldo, HTTP status: {status}")]
    HttpStatus { action: &'static str, status: u16 },

    /// No response was received at all.
    #[error("Unable to {action} Waldo, error: {message}, url: {url:?}")]
    Transport {
        action: &'static str,
        message: String,
        url: String,
    },

    /// JSON encoding of an outgoing payload failed.
    #[error("Unable to encode JSON payload, error: {0}")]
    Json(#[from] serde_json::Error),

    /// No home directory to store upload metadata in.
    #[error("Unable to locate the user home directory")]
    NoHomeDirectory,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to get any HTTP response back.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError(err.to_string())
    }
}

/// Errors from running an external executable.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The executable could not be started.
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The executable ran but exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },
}

pub type Result<T> = std::result::Result<T, AgentError>;
