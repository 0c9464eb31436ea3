//! Config command implementation

use anyhow::Result;
use clap::Args;
use layerset_core::config::{ConfigOverrides, resolve_config};
use layerset_core::home::get_home_dir;
use serde_json::json;
use std::path::PathBuf;

/// Show effective configuration
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Read this config file instead of searching for .layerset.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    let home_dir = get_home_dir()?;
    let current_dir = std::env::current_dir()?;

    let overrides = ConfigOverrides {
        config_path: args.config.clone(),
        ..Default::default()
    };
    let config = resolve_config(&overrides, &current_dir, &home_dir)?;

    let global_config_path = home_dir.join(".config/layerset/config.toml");
    let repo_config_path = args
        .config
        .clone()
        .unwrap_or_else(|| current_dir.join(".layerset.toml"));
    let global_exists = global_config_path.exists();
    let repo_exists = repo_config_path.exists();

    if args.json {
        let output = json!({
            "config": config,
            "configFiles": {
                "global": {
                    "path": global_config_path.display().to_string(),
                    "exists": global_exists,
                },
                "repo": {
                    "path": repo_config_path.display().to_string(),
                    "exists": repo_exists,
                }
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Configuration:");
        println!("  root: {}", config.root.display());
        println!("  override_dir: {}", config.override_dir.display());
        println!("  environment_id: {}", config.environment_id);
        println!(
            "  shared_file: {}",
            config.shared_file.as_deref().unwrap_or("(disabled)")
        );
        println!("  watch: {}", config.watch);
        println!("  cache: {}", config.cache_path.display());
        println!("  declaring_module: {}", config.declaring_module);
        println!();
        println!("Config files:");
        let global_status = if global_exists { "(found)" } else { "(not found)" };
        println!("  Global: {} {global_status}", global_config_path.display());
        let repo_status = if repo_exists { "(found)" } else { "(not found)" };
        println!("  Repo: {} {repo_status}", repo_config_path.display());
    }

    Ok(())
}
