//! Override sources and the patches read from them
//!
//! A source is either a JSON file or the process launch arguments. Reading a
//! source never fails outright: problems are returned as warnings next to
//! whatever patch could still be extracted.

mod args;
mod file;

pub use args::{ArgOverride, MalformedArg, parse_arg, parse_args};
pub use file::{read_file_patch, read_object_file};

use crate::error::SettingsError;
use crate::kind::KindDeclaration;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where an override comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OverrideSource {
    File {
        path: PathBuf,
        selector: Option<String>,
    },
    CommandLine {
        args: Vec<String>,
    },
}

/// Identity of a source, recorded in provenance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    File(PathBuf),
    CommandLine,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::File(path) => write!(f, "{}", path.display()),
            Origin::CommandLine => f.write_str("command-line"),
        }
    }
}

impl OverrideSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            selector: None,
        }
    }

    pub fn file_with_selector(path: impl Into<PathBuf>, selector: impl Into<String>) -> Self {
        Self::File {
            path: path.into(),
            selector: Some(selector.into()),
        }
    }

    pub fn command_line<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::CommandLine {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Application rank; lower ranks are applied first.
    pub fn rank(&self) -> u8 {
        match self {
            OverrideSource::File { .. } => 0,
            OverrideSource::CommandLine { .. } => 1,
        }
    }

    pub fn origin(&self) -> Origin {
        match self {
            OverrideSource::File { path, .. } => Origin::File(path.clone()),
            OverrideSource::CommandLine { .. } => Origin::CommandLine,
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        match self {
            OverrideSource::File { path, .. } => Some(path),
            OverrideSource::CommandLine { .. } => None,
        }
    }
}

/// Value carried by a patch operation
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    /// Already typed JSON (from override files)
    Json(Value),
    /// Raw text, coerced to the target field's type when applied
    Raw(String),
}

/// One leaf assignment
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOp {
    pub path: Vec<String>,
    pub value: PatchValue,
}

impl PatchOp {
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}

/// Partial field-path → value patch read from one source
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub origin: Origin,
    pub ops: Vec<PatchOp>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Result of reading one source for one kind
#[derive(Debug, Default)]
pub struct SourceRead {
    pub patch: Option<Patch>,
    pub warnings: Vec<SettingsError>,
}

/// Read `source` into a patch addressed to `kind`.
pub fn read_patch(source: &OverrideSource, kind: &KindDeclaration) -> SourceRead {
    match source {
        OverrideSource::File { path, selector } => match read_file_patch(path, selector.as_deref()) {
            Ok(patch) => SourceRead {
                patch,
                warnings: Vec::new(),
            },
            Err(e) => SourceRead {
                patch: None,
                warnings: vec![e],
            },
        },
        OverrideSource::CommandLine { args } => read_args_patch(args, kind),
    }
}

fn read_args_patch(args: &[String], kind: &KindDeclaration) -> SourceRead {
    let (parsed, malformed) = parse_args(args);

    let warnings = malformed
        .into_iter()
        .filter(|m| m.kind_hint.as_deref().is_none_or(|k| kind.answers_to(k)))
        .map(|m| SettingsError::OverrideParse {
            origin: Origin::CommandLine.to_string(),
            message: m.to_string(),
        })
        .collect();

    let ops: Vec<PatchOp> = parsed
        .into_iter()
        .filter(|a| kind.answers_to(&a.kind))
        .map(|a| PatchOp {
            path: a.path,
            value: PatchValue::Raw(a.value),
        })
        .collect();

    SourceRead {
        patch: (!ops.is_empty()).then(|| Patch {
            origin: Origin::CommandLine,
            ops,
        }),
        warnings,
    }
}

/// Flatten a JSON tree into leaf assignments. Arrays are leaves.
pub(crate) fn flatten_tree(value: &Value) -> Vec<PatchOp> {
    fn walk(prefix: &mut Vec<String>, value: &Value, out: &mut Vec<PatchOp>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    prefix.push(key.clone());
                    walk(prefix, child, out);
                    prefix.pop();
                }
            }
            leaf => out.push(PatchOp {
                path: prefix.clone(),
                value: PatchValue::Json(leaf.clone()),
            }),
        }
    }

    let mut out = Vec::new();
    if value.is_object() {
        walk(&mut Vec::new(), value, &mut out);
    }
    out
}
