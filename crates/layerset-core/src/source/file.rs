//! JSON override files

use super::{Origin, Patch, flatten_tree};
use crate::error::SettingsError;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

/// Read an override file into a patch.
///
/// A missing file, or a selector that matches nothing, yields `Ok(None)`.
/// Unreadable or malformed files yield `Err(OverrideParse)`.
pub fn read_file_patch(path: &Path, selector: Option<&str>) -> Result<Option<Patch>, SettingsError> {
    if !path.exists() {
        return Ok(None);
    }

    let origin = Origin::File(path.to_path_buf());
    let parse_error = |message: String| SettingsError::OverrideParse {
        origin: origin.to_string(),
        message,
    };
    let document = read_document(path)?;

    let tree = match selector {
        Some(selector) => match select(&document, selector) {
            Some(tree) => tree,
            None => {
                debug!("No '{selector}' section in {}", path.display());
                return Ok(None);
            }
        },
        None => &document,
    };

    if !tree.is_object() {
        return Err(parse_error(format!(
            "expected a JSON object{}",
            selector.map(|s| format!(" at '{s}'")).unwrap_or_default()
        )));
    }

    Ok(Some(Patch {
        origin,
        ops: flatten_tree(tree),
    }))
}

/// Read a whole JSON object file, as written by an export.
///
/// A missing file yields `Ok(None)`; anything but a JSON object is an error.
pub fn read_object_file(path: &Path) -> Result<Option<Map<String, Value>>, SettingsError> {
    if !path.exists() {
        return Ok(None);
    }
    match read_document(path)? {
        Value::Object(fields) => Ok(Some(fields)),
        _ => Err(SettingsError::OverrideParse {
            origin: Origin::File(path.to_path_buf()).to_string(),
            message: "expected a JSON object".to_string(),
        }),
    }
}

fn read_document(path: &Path) -> Result<Value, SettingsError> {
    let parse_error = |message: String| SettingsError::OverrideParse {
        origin: Origin::File(path.to_path_buf()).to_string(),
        message,
    };
    let contents = std::fs::read_to_string(path).map_err(|e| parse_error(e.to_string()))?;
    serde_json::from_str(&contents).map_err(|e| parse_error(e.to_string()))
}

/// Follow a dotted key path through nested objects.
fn select<'a>(document: &'a Value, selector: &str) -> Option<&'a Value> {
    selector
        .split('.')
        .try_fold(document, |node, key| node.as_object()?.get(key))
}
