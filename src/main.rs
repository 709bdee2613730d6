//! CLI binary entry point.

/// Binary-local application orchestration modules.
mod app;

use clap::Parser;
use useaid::cli;

/// Parse CLI arguments, run the app entrypoint, and exit with its status code.
#[tokio::main]
async fn main() {
    let args = cli::Args::parse();
    let code = app::run(args).await;
    std::process::exit(code);
}
