//! Cross-kernel release validation harness.
//!
//! Executes the declarative compose fixtures against every requested kernel
//! binary from a published release: fetches the release manifest, provisions
//! each kernel binary on demand, probes which optional capabilities the build
//! supports, runs the fixtures (skipping the ones whose requirements are
//! unmet), and prints a per-kernel result matrix.

mod capability;
mod checker;
mod config;
mod context;
mod errors;
mod executor;
mod exit_codes;
mod fixture;
mod logging;
mod manifest;
mod matrix;
mod provision;
mod run;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "harness",
    version,
    about = "Cross-kernel release validation harness"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the fixtures against the requested kernels.
    Run {
        /// Kernel id to test (repeatable). Defaults to the configured list.
        #[arg(short, long = "kernel")]
        kernels: Vec<String>,
        /// Release version tag to test instead of the latest release.
        #[arg(short, long)]
        version: Option<String>,
        /// Subprocess timeout in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// List the fixture labels that would run, without executing anything.
    List,
    /// Remove the cached kernel binaries.
    Clean,
}

fn main() {
    logging::init();
    match dispatch() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FATAL);
        }
    }
}

fn dispatch() -> Result<i32> {
    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;
    match cli.command {
        Command::Run {
            kernels,
            version,
            timeout_secs,
        } => run::run(&repo_root, &kernels, version.as_deref(), timeout_secs),
        Command::List => {
            run::list(&repo_root)?;
            Ok(exit_codes::OK)
        }
        Command::Clean => {
            run::clean(&repo_root)?;
            Ok(exit_codes::OK)
        }
    }
}
