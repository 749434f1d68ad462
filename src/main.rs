//! Track selector service: picks the next audio file for a streaming host
//! to play, biased against recent repetition of the same artist, title, or
//! file.

pub mod cli;
pub mod config;
pub mod detach;
pub mod error;
pub mod model;
pub mod picker;
pub mod probe;
pub mod scanner;
pub mod store;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;

/// Each invocation is its own short-lived process (§5: multi-process, not
/// multi-threaded within one invocation) — so a fresh single-threaded
/// runtime is built per call rather than kept alive across them.
fn main() {
    let args = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("liquidsoap_picker=info".parse().unwrap()))
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    let exit_code = runtime.block_on(cli::run_command(args.command));
    std::process::exit(exit_code);
}
