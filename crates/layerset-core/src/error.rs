//! Error taxonomy for settings resolution and discovery

use crate::kind::Capability;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the settings registry, override readers and discovery.
///
/// Only `MissingDeclaration`, `TypeMismatch`, `Unsupported` and `Storage`
/// (on explicit saves and imports) ever reach a caller as `Err`. The
/// override and discovery variants are recoverable: they are logged and
/// collected into warnings or scan reports while resolution carries on.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// No declaration registered for the requested kind
    #[error(
        "no settings declaration registered for '{type_name}'; declare it with one of: \
         EditorUser, EditorProject, RuntimeProject"
    )]
    MissingDeclaration { type_name: String },

    /// Kind is declared under a different Rust type than the one requested
    #[error("settings kind '{type_name}' is registered with a different type")]
    TypeMismatch { type_name: String },

    /// Operation needs a capability the kind did not declare
    #[error("settings kind '{type_name}' does not declare the {capability:?} capability")]
    Unsupported {
        type_name: String,
        capability: Capability,
    },

    /// Override file or argument could not be parsed
    #[error("cannot parse override from {origin}: {message}")]
    OverrideParse { origin: String, message: String },

    /// Field path in an override does not resolve inside the settings object
    #[error("override path '{path}' from {origin} does not match a field of {kind}")]
    OverridePath {
        origin: String,
        kind: String,
        path: String,
    },

    /// Backing store could not be read or written
    #[error("settings storage error on {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings object could not be converted to or from its JSON form
    #[error("settings serialization error for {kind}: {source}")]
    Serialization {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// A scanned type declares a settings kind without the settings contract
    #[error(
        "{type_name} in {module} is declared as a settings kind but does not implement Settings; \
         remove the declaration or implement the trait"
    )]
    DiscoveryScan { module: String, type_name: String },
}

impl SettingsError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Whether the caller can keep going with the last known-good instance.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::MissingDeclaration { .. }
                | Self::TypeMismatch { .. }
                | Self::Unsupported { .. }
        )
    }
}
