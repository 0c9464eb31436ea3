//! Args command implementation

use anyhow::Result;
use clap::Args;
use layerset_core::source::parse_args;
use serde_json::json;

/// Parse settings arguments
#[derive(Args, Debug)]
pub struct ArgsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Arguments to parse, e.g. -s:Audio.volume=3
    #[arg(last = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Execute the args command
pub fn execute(args: ArgsArgs) -> Result<()> {
    let (parsed, malformed) = parse_args(&args.args);

    if args.json {
        let output = json!({
            "overrides": parsed
                .iter()
                .map(|a| json!({ "kind": a.kind, "path": a.path.join("."), "value": a.value }))
                .collect::<Vec<_>>(),
            "malformed": malformed
                .iter()
                .map(|m| json!({ "token": m.token, "kind": m.kind_hint, "reason": m.reason }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        if parsed.is_empty() {
            println!("No settings overrides");
        }
        for a in &parsed {
            println!("{}.{} = {}", a.kind, a.path.join("."), a.value);
        }
        for m in &malformed {
            println!("error: {m}");
        }
    }

    Ok(())
}
