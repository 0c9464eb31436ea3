//! lset - inspect layered settings resolution and settings-kind discovery
//!
//! Runs the layerset merge engine and discovery cache against files on disk,
//! which is handy for checking what an override file or launch argument will
//! do before starting the host application.

use clap::Parser;

mod commands;

use commands::Cli;

fn main() {
    layerset_core::logging::init();
    let cli = Cli::parse();

    if let Err(e) = cli.execute() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
