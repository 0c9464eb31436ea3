//! CLI command dispatch and execution

use anyhow::Result;
use clap::{Parser, Subcommand};

mod args;
mod config_cmd;
mod discover;
mod resolve;

/// lset - layered settings inspector
#[derive(Parser, Debug)]
#[command(
    name = "lset",
    version,
    about = "Inspect layered settings resolution and discovery",
    long_about = "Resolve override files and -settings: arguments against a base document, \
                  list settings kinds declared in module manifests, and show the effective \
                  layerset configuration"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply override files and arguments to a base settings document
    Resolve(resolve::ResolveArgs),

    /// Parse -settings:/-s: arguments and report malformed ones
    Args(args::ArgsArgs),

    /// List settings kinds declared by module manifests
    Discover(discover::DiscoverArgs),

    /// Show effective configuration
    Config(config_cmd::ConfigArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Resolve(args) => resolve::execute(args),
            Commands::Args(args) => args::execute(args),
            Commands::Discover(args) => discover::execute(args),
            Commands::Config(args) => config_cmd::execute(args),
        }
    }
}
