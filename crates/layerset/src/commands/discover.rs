//! Discover command implementation

use anyhow::{Context, Result};
use clap::Args;
use layerset_core::config::{ConfigOverrides, resolve_config};
use layerset_core::discovery::{DiscoveryCache, ManifestModules, ModuleHost};
use layerset_core::home::get_home_dir;
use serde_json::json;
use std::path::PathBuf;
use tracing::debug;

/// List settings kinds declared by module manifests
#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Directory of `*.module.json` manifests
    #[arg(long)]
    modules: PathBuf,

    /// Discovery cache file (default: from configuration)
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Module location that was rebuilt; may be repeated
    #[arg(long = "changed", value_name = "LOCATION")]
    changed: Vec<PathBuf>,

    /// Only modules referencing this one are scanned (default: from configuration)
    #[arg(long)]
    declaring_module: Option<String>,

    /// Ignore the cache contents and scan every module
    #[arg(long)]
    full: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the discover command
pub fn execute(args: DiscoverArgs) -> Result<()> {
    let home_dir = get_home_dir()?;
    let current_dir = std::env::current_dir()?;
    let overrides = ConfigOverrides {
        cache_path: args.cache.clone(),
        ..Default::default()
    };
    let config = resolve_config(&overrides, &current_dir, &home_dir)?;

    let host = ManifestModules::load(&args.modules)
        .with_context(|| format!("Failed to read modules from {}", args.modules.display()))?;
    debug!("Loaded {} module manifest(s) from {}", host.len(), args.modules.display());
    let declaring = args
        .declaring_module
        .clone()
        .unwrap_or_else(|| config.declaring_module.clone());

    let mut cache = DiscoveryCache::load(&config.cache_path, declaring);
    if args.full {
        cache.invalidate();
    }
    for location in &args.changed {
        cache.notify_compiled(location);
    }
    let report = cache.descriptors(&host);
    let module_count = host.loaded_modules().len();

    if args.json {
        let output = json!({
            "descriptors": report.descriptors,
            "errors": report.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "scanned": report.scanned,
            "modules": module_count,
            "cache": config.cache_path.display().to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        if report.descriptors.is_empty() {
            println!("No settings kinds found");
        }
        for d in &report.descriptors {
            println!("{:<32} {:<8} {} ({})", d.display_path, format!("{:?}", d.scope), d.type_name, d.module);
        }
        println!();
        println!(
            "Scanned {} of {} module(s); cache at {}",
            report.scanned.len(),
            module_count,
            config.cache_path.display()
        );
        for e in &report.errors {
            println!("error: {e}");
        }
    }

    Ok(())
}
