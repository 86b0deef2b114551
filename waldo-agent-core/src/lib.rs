#![doc = "waldo-agent-core: provenance, packaging and submission pipeline for the Waldo CI agent."]

//! Everything the `waldo` binary does lives here; the binary only parses
//! arguments and wires the production implementations together.
//!
//! # Usage
//! Build an [`upload::UploadAction`] or [`trigger::TriggerAction`] from
//! options, validate it, then `perform` it against a
//! [`contract::Transport`].

pub mod build;
pub mod ci;
pub mod config;
pub mod contract;
pub mod error;
pub mod git;
pub mod metadata;
pub mod runtime;
pub mod submission;
pub mod transport;
pub mod trigger;
pub mod upload;

pub use error::{AgentError, Result};
