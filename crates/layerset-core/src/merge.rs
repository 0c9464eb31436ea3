//! Override merge engine
//!
//! Applies ordered patches onto a working copy of a base instance:
//! - Only leaf fields named by a patch are written; siblings are untouched
//! - Later sources win per leaf (files rank before the command line)
//! - Arrays are leaves and are replaced wholesale
//! - Each leaf must still deserialize into the kind, otherwise it is skipped
//!
//! The base is serialized at most once per pass, and only when a source
//! actually produces a patch. When nothing applies the base `Arc` itself is
//! returned, so callers can tell a derived copy from the base with
//! [`Arc::ptr_eq`].

use crate::error::SettingsError;
use crate::kind::{KindDeclaration, Settings};
use crate::source::{
    Origin, OverrideSource, Patch, PatchOp, PatchValue, SourceRead, flatten_tree, read_patch,
};
use serde_json::{Map, Number, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one resolution pass
#[derive(Debug)]
pub struct Resolution<T> {
    pub instance: Arc<T>,
    /// Origins that contributed, in application order
    pub provenance: Vec<Origin>,
    /// Recoverable problems met along the way
    pub warnings: Vec<SettingsError>,
}

impl<T> Resolution<T> {
    pub fn is_overridden(&self) -> bool {
        !self.provenance.is_empty()
    }
}

/// Resolve `sources` on top of `base`.
pub fn resolve<T: Settings>(
    base: &Arc<T>,
    kind: &KindDeclaration,
    sources: &[OverrideSource],
) -> Resolution<T> {
    let mut ordered: Vec<&OverrideSource> = sources.iter().collect();
    ordered.sort_by_key(|s| s.rank());

    merge_reads(base, kind, ordered.into_iter().map(|s| read_patch(s, kind)))
}

/// Merge a single, already read patch onto `base`.
pub fn apply_to<T: Settings>(base: &Arc<T>, kind: &KindDeclaration, patch: Patch) -> Resolution<T> {
    merge_reads(
        base,
        kind,
        std::iter::once(SourceRead {
            patch: Some(patch),
            warnings: Vec::new(),
        }),
    )
}

/// Replace whole top-level fields of `base` with those in `document`.
///
/// Used for imports, where maps and nested objects must come back exactly as
/// exported. Transient and unknown fields are skipped, as is any field the
/// kind rejects; each skip is returned as a warning.
pub fn replace_fields<T: Settings>(
    base: &T,
    kind: &KindDeclaration,
    document: &Map<String, Value>,
) -> (T, Vec<SettingsError>) {
    let mut warnings = Vec::new();
    let mut working = match serde_json::to_value(base) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => return (base.clone(), warnings),
        Err(source) => {
            warnings.push(SettingsError::Serialization {
                kind: kind.type_name.clone(),
                source,
            });
            return (base.clone(), warnings);
        }
    };

    for (key, value) in document {
        if kind.transient_fields.contains(key) {
            continue;
        }
        if !working.contains_key(key) {
            warnings.push(SettingsError::OverridePath {
                origin: "import".to_string(),
                kind: kind.type_name.clone(),
                path: key.clone(),
            });
            continue;
        }
        let mut candidate = working.clone();
        candidate.insert(key.clone(), value.clone());
        match serde_json::from_value::<T>(Value::Object(candidate.clone())) {
            Ok(_) => working = candidate,
            Err(e) => warnings.push(SettingsError::OverrideParse {
                origin: "import".to_string(),
                message: format!("field '{key}' of {}: {e}", kind.type_name),
            }),
        }
    }
    for w in &warnings {
        warn!("Skipping imported field for {}: {w}", kind.type_name);
    }

    match serde_json::from_value::<T>(Value::Object(working)) {
        Ok(imported) => (imported, warnings),
        Err(source) => {
            warnings.push(SettingsError::Serialization {
                kind: kind.type_name.clone(),
                source,
            });
            (base.clone(), warnings)
        }
    }
}

fn merge_reads<T: Settings>(
    base: &Arc<T>,
    kind: &KindDeclaration,
    reads: impl IntoIterator<Item = SourceRead>,
) -> Resolution<T> {
    let mut working: Option<Value> = None;
    let mut provenance: Vec<Origin> = Vec::new();
    let mut warnings = Vec::new();

    for read in reads {
        for w in &read.warnings {
            warn!("Skipping override for {}: {w}", kind.type_name);
        }
        warnings.extend(read.warnings);

        let Some(patch) = read.patch.filter(|p| !p.is_empty()) else {
            continue;
        };

        if working.is_none() {
            match serde_json::to_value(base.as_ref()) {
                Ok(v) => working = Some(v),
                Err(source) => {
                    let err = SettingsError::Serialization {
                        kind: kind.type_name.clone(),
                        source,
                    };
                    warn!("Cannot apply overrides: {err}");
                    warnings.push(err);
                    break;
                }
            }
        }
        let Some(document) = working.as_mut() else {
            break;
        };

        let applied = apply_patch::<T>(document, &patch, kind, &mut warnings);
        debug!(
            "Applied {applied}/{} override(s) from {} to {}",
            patch.ops.len(),
            patch.origin,
            kind.type_name
        );

        if applied > 0 && !provenance.contains(&patch.origin) {
            provenance.push(patch.origin);
        }
    }

    let instance = match working {
        Some(value) if !provenance.is_empty() => match serde_json::from_value::<T>(value) {
            Ok(derived) => Arc::new(derived),
            Err(source) => {
                let err = SettingsError::Serialization {
                    kind: kind.type_name.clone(),
                    source,
                };
                warn!("Discarding overrides: {err}");
                warnings.push(err);
                provenance.clear();
                Arc::clone(base)
            }
        },
        _ => Arc::clone(base),
    };

    Resolution {
        instance,
        provenance,
        warnings,
    }
}

/// Apply every op of `patch`; returns how many were accepted.
fn apply_patch<T: Settings>(
    working: &mut Value,
    patch: &Patch,
    kind: &KindDeclaration,
    warnings: &mut Vec<SettingsError>,
) -> usize {
    let mut applied = 0;
    for op in &patch.ops {
        let nested = expand_object(working, op);
        for op in nested.as_deref().unwrap_or(std::slice::from_ref(op)) {
            match apply_op::<T>(working, op, &patch.origin, kind) {
                Ok(()) => applied += 1,
                Err(err) => {
                    warn!("Skipping override for {}: {err}", kind.type_name);
                    warnings.push(err);
                }
            }
        }
    }
    applied
}

/// Split a raw JSON object aimed at an object field into leaf ops below it.
fn expand_object(working: &Value, op: &PatchOp) -> Option<Vec<PatchOp>> {
    let PatchValue::Raw(raw) = &op.value else {
        return None;
    };
    if !working.pointer(&json_pointer(&op.path)).is_some_and(Value::is_object) {
        return None;
    }
    let parsed: Value = serde_json::from_str(raw.trim()).ok()?;
    if !parsed.is_object() {
        return None;
    }
    Some(
        flatten_tree(&parsed)
            .into_iter()
            .map(|leaf| PatchOp {
                path: op.path.iter().cloned().chain(leaf.path).collect(),
                value: leaf.value,
            })
            .collect(),
    )
}

/// Write one leaf into `working`, keeping it only if the kind accepts it.
fn apply_op<T: Settings>(
    working: &mut Value,
    op: &PatchOp,
    origin: &Origin,
    kind: &KindDeclaration,
) -> Result<(), SettingsError> {
    let path_error = || SettingsError::OverridePath {
        origin: origin.to_string(),
        kind: kind.type_name.clone(),
        path: op.dotted_path(),
    };
    let parse_error = |message: String| SettingsError::OverrideParse {
        origin: origin.to_string(),
        message: format!("field '{}' of {}: {message}", op.dotted_path(), kind.type_name),
    };

    let mut candidate = working.clone();
    let slot = leaf_slot(&mut candidate, &op.path).ok_or_else(path_error)?;
    let existing = (!slot.is_null()).then(|| slot.clone());
    *slot = coerce(&op.value, existing.as_ref()).map_err(parse_error)?;

    let typed: T = serde_json::from_value(candidate).map_err(|e| parse_error(e.to_string()))?;
    let normalized = serde_json::to_value(&typed).map_err(|e| parse_error(e.to_string()))?;

    // Unknown fields are dropped by the round trip.
    if normalized.pointer(&json_pointer(&op.path)).is_none() {
        return Err(path_error());
    }

    *working = normalized;
    Ok(())
}

/// Mutable slot for `path`, creating missing object members on the way.
fn leaf_slot<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut node = root;
    for segment in path {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get_mut(index)?
            }
            _ => return None,
        };
    }
    Some(node)
}

/// Convert a patch value to the shape of the field it replaces.
fn coerce(value: &PatchValue, existing: Option<&Value>) -> Result<Value, String> {
    match value {
        PatchValue::Json(v) => match existing {
            Some(current) if !same_shape(current, v) => Err(format!(
                "expected {}, found {}",
                shape_name(current),
                shape_name(v)
            )),
            _ => Ok(v.clone()),
        },
        PatchValue::Raw(raw) => coerce_raw(raw, existing),
    }
}

fn coerce_raw(raw: &str, existing: Option<&Value>) -> Result<Value, String> {
    let trimmed = raw.trim();
    match existing {
        Some(Value::Bool(_)) => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(format!("'{raw}' is not a boolean")),
        },
        Some(Value::Number(current)) => {
            let parsed = if current.is_f64() {
                None
            } else {
                trimmed
                    .parse::<i64>()
                    .map(Number::from)
                    .or_else(|_| trimmed.parse::<u64>().map(Number::from))
                    .ok()
            };
            parsed
                .or_else(|| trimmed.parse::<f64>().ok().and_then(Number::from_f64))
                .map(Value::Number)
                .ok_or_else(|| format!("'{raw}' is not a number"))
        }
        Some(Value::String(_)) => Ok(Value::String(raw.to_string())),
        Some(current) => {
            let parsed: Value = serde_json::from_str(raw)
                .map_err(|e| format!("'{raw}' is not valid JSON: {e}"))?;
            if same_shape(current, &parsed) {
                Ok(parsed)
            } else {
                Err(format!(
                    "expected {}, found {}",
                    shape_name(current),
                    shape_name(&parsed)
                ))
            }
        }
        None => Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))),
    }
}

fn same_shape(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b) || b.is_null()
}

fn shape_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn json_pointer(path: &[String]) -> String {
    path.iter()
        .map(|segment| format!("/{}", segment.replace('~', "~0").replace('/', "~1")))
        .collect()
}
