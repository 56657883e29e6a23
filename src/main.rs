//! condaprov CLI: provision Miniconda and a pinned package set.

use clap::Parser;
use condaprov::cli::{self, Cli};

fn main() {
    let cli = Cli::parse();
    if let Err(e) = condaprov::logging::init(cli.verbose, cli.log_format) {
        eprintln!("warning: {}", e);
    }
    if let Err(e) = cli::dispatch(cli.command) {
        tracing::debug!(error = ?e, "command failed");
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
