//! Deskpilot CLI — declarative desktop automation.

use clap::Parser;
use deskpilot::cli::{self, Cli};

fn main() {
    let cli = Cli::parse();
    cli::init_tracing(cli.verbose);
    if let Err(e) = cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
