//! Layered settings singletons for layerset
//!
//! Each settings kind is a serde type with one persisted base instance. While
//! an override session is live, JSON override files and `-settings:` launch
//! arguments are merged on top of it, leaf by leaf, to produce the active
//! instance. Override files can be watched so edits apply while running.
//! A discovery cache lists the kinds declared across loaded modules without
//! rescanning unchanged ones.
//!
//! ```no_run
//! use layerset_core::{KindDeclaration, Settings, SettingsRegistry, SettingsStore, OverridePlan};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
//! struct Audio {
//!     volume: u32,
//! }
//!
//! impl Settings for Audio {}
//!
//! let registry = SettingsRegistry::new(
//!     SettingsStore::new("/work/game", "game"),
//!     OverridePlan::new("/work/game").with_args(std::env::args()),
//! );
//! registry.declare::<Audio>(KindDeclaration::runtime_project::<Audio>().allow_overrides());
//! let audio = registry.get_active::<Audio>().unwrap();
//! # let _ = audio;
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod fingerprint;
pub mod home;
pub mod kind;
pub mod logging;
pub mod merge;
pub mod registry;
pub mod reload;
pub mod source;
pub mod store;

pub use error::SettingsError;
pub use kind::{Capability, KindDeclaration, Settings, SettingsScope, SettingsUsage};
pub use merge::Resolution;
pub use registry::{KindState, OverridePlan, SettingsRegistry};
pub use reload::{ExecutionContext, QueueContext};
pub use source::{Origin, OverrideSource};
pub use store::SettingsStore;
