pub mod cli;

pub use cli::{banner, normalize_args, run, Cli, Commands};
