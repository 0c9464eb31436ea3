//! Resolve command implementation

use anyhow::{Context, Result, bail};
use clap::Args;
use layerset_core::merge;
use layerset_core::{KindDeclaration, OverrideSource, SettingsUsage};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

/// Apply override files and arguments to a base settings document
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Base settings document (JSON object)
    #[arg(long)]
    base: PathBuf,

    /// Kind name that command-line overrides must address
    #[arg(long)]
    kind: String,

    /// Override file, applied in order; `path#selector` picks a section
    #[arg(long = "file", value_name = "PATH[#SELECTOR]")]
    files: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Settings arguments, e.g. -s:Audio.volume=3
    #[arg(last = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Execute the resolve command
pub fn execute(args: ResolveArgs) -> Result<()> {
    let contents = std::fs::read_to_string(&args.base)
        .with_context(|| format!("Failed to read base document {}", args.base.display()))?;
    let base: Value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse base document {}", args.base.display()))?;
    if !base.is_object() {
        bail!("Base document {} must be a JSON object", args.base.display());
    }

    let kind = KindDeclaration::new(args.kind.clone(), SettingsUsage::RuntimeProject).allow_overrides();
    let mut sources: Vec<OverrideSource> = args.files.iter().map(|f| parse_file_source(f)).collect();
    if !args.args.is_empty() {
        sources.push(OverrideSource::command_line(args.args.iter().cloned()));
    }

    let base = Arc::new(base);
    let resolution = merge::resolve(&base, &kind, &sources);
    let provenance: Vec<String> = resolution.provenance.iter().map(ToString::to_string).collect();
    let warnings: Vec<String> = resolution.warnings.iter().map(ToString::to_string).collect();

    if args.json {
        let output = json!({
            "kind": args.kind,
            "settings": resolution.instance.as_ref(),
            "overridden": resolution.is_overridden(),
            "provenance": provenance,
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", serde_json::to_string_pretty(resolution.instance.as_ref())?);
        println!();
        if provenance.is_empty() {
            println!("No overrides applied");
        } else {
            println!("Applied overrides from:");
            for origin in &provenance {
                println!("  {origin}");
            }
        }
        for warning in &warnings {
            println!("warning: {warning}");
        }
    }

    Ok(())
}

fn parse_file_source(spec: &str) -> OverrideSource {
    match spec.rsplit_once('#') {
        Some((path, selector)) if !selector.is_empty() => OverrideSource::file_with_selector(path, selector),
        _ => OverrideSource::file(spec),
    }
}
