use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use waldo_agent::{banner, normalize_args, run, Cli};

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    println!("{}", banner());
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("waldo: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!();
            eprintln!("waldo: {e}");
            ExitCode::FAILURE
        }
    }
}
