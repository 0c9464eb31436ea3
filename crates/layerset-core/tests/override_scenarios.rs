//! End-to-end override resolution through the registry

use layerset_core::{
    KindDeclaration, KindState, Origin, OverridePlan, QueueContext, Settings, SettingsRegistry,
    SettingsStore,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Kind {
    #[serde(rename = "A")]
    a: i64,
    #[serde(rename = "B")]
    b: i64,
    label: String,
}

impl Default for Kind {
    fn default() -> Self {
        Self {
            a: 1,
            b: 2,
            label: "base".to_string(),
        }
    }
}

impl Settings for Kind {}

struct Fixture {
    _temp_dir: TempDir,
    overrides: PathBuf,
    registry: SettingsRegistry,
}

fn fixture(args: &[&str]) -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let overrides = temp_dir.path().join("overrides");
    std::fs::create_dir_all(&overrides).unwrap();

    let registry = SettingsRegistry::new(
        SettingsStore::new(temp_dir.path(), "project"),
        OverridePlan::new(&overrides)
            .with_shared_file("Settings.json")
            .with_args(args.iter().copied()),
    );
    registry.declare::<Kind>(
        KindDeclaration::runtime_project::<Kind>()
            .allow_overrides()
            .with_transient_field("label"),
    );
    Fixture {
        _temp_dir: temp_dir,
        overrides,
        registry,
    }
}

fn write(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
}

#[test]
fn scenario_a_file_then_command_line() {
    let fx = fixture(&["-s:Kind.A=9"]);
    write(&fx.overrides.join("Kind.json"), r#"{"B": 5}"#);
    fx.registry.enter_live_mode(QueueContext::new());

    let active = fx.registry.get_active::<Kind>().unwrap();
    assert_eq!((active.a, active.b), (9, 5));
    assert_eq!(
        fx.registry.provenance::<Kind>().unwrap(),
        vec![Origin::File(fx.overrides.join("Kind.json")), Origin::CommandLine]
    );
    assert_eq!(
        Origin::CommandLine.to_string(),
        "command-line",
        "command-line origin identifier"
    );
}

#[test]
fn scenario_b_malformed_argument_does_not_abort() {
    let fx = fixture(&["-s:Kind"]);
    write(&fx.overrides.join("Kind.json"), r#"{"B": 5}"#);
    fx.registry.enter_live_mode(QueueContext::new());

    let active = fx.registry.get_active::<Kind>().unwrap();
    assert_eq!((active.a, active.b), (1, 5));
    assert_eq!(
        fx.registry.provenance::<Kind>().unwrap(),
        vec![Origin::File(fx.overrides.join("Kind.json"))]
    );
    let warnings = fx.registry.last_warnings::<Kind>().unwrap();
    assert_eq!(warnings.len(), 1, "warnings: {warnings:?}");
    assert!(warnings[0].contains("-s:Kind"));
}

#[test]
fn scenario_d_exit_live_mode_reverts_to_base() {
    let fx = fixture(&["-s:Kind.A=9"]);
    fx.registry.enter_live_mode(QueueContext::new());
    assert_eq!(fx.registry.get_active::<Kind>().unwrap().a, 9);

    fx.registry.exit_live_mode();
    let active = fx.registry.get_active::<Kind>().unwrap();
    assert!(Arc::ptr_eq(&active, &fx.registry.base::<Kind>().unwrap()));
    assert_eq!(*active, Kind::default());
    assert!(fx.registry.provenance::<Kind>().unwrap().is_empty());
    assert_eq!(
        fx.registry.state::<Kind>().unwrap(),
        KindState::Ready { overridden: false }
    );
}

#[test]
fn shared_document_then_own_file_then_arguments() {
    let fx = fixture(&["-settings:Kind.label=cli"]);
    write(
        &fx.overrides.join("Settings.json"),
        r#"{"Kind": {"A": 3, "B": 3}, "Other": {"A": 100}}"#,
    );
    write(&fx.overrides.join("Kind.json"), r#"{"B": 4}"#);
    fx.registry.enter_live_mode(QueueContext::new());

    let active = fx.registry.get_active::<Kind>().unwrap();
    assert_eq!((active.a, active.b), (3, 4));
    assert_eq!(active.label, "cli");
    assert_eq!(fx.registry.provenance::<Kind>().unwrap().len(), 3);
}

#[test]
fn disjoint_sources_commute_through_registry() {
    let one = fixture(&["-s:Kind.A=7"]);
    write(&one.overrides.join("Kind.json"), r#"{"B": 8}"#);
    one.registry.enter_live_mode(QueueContext::new());

    let other = fixture(&["-s:Kind.B=8"]);
    write(&other.overrides.join("Kind.json"), r#"{"A": 7}"#);
    other.registry.enter_live_mode(QueueContext::new());

    assert_eq!(
        *one.registry.get_active::<Kind>().unwrap(),
        *other.registry.get_active::<Kind>().unwrap()
    );
}

#[test]
fn save_then_load_reproduces_all_but_transient_fields() {
    let fx = fixture(&[]);
    fx.registry
        .modify::<Kind>(|k| {
            k.a = 40;
            k.b = 41;
            k.label = "identity".to_string();
        })
        .unwrap();
    let exported = fx.registry.save_as_file::<Kind>(None).unwrap();
    assert_eq!(exported, fx.overrides.join("Kind.json"));

    let fresh = fixture(&[]);
    assert!(fresh.registry.load_from_file::<Kind>(Some(&exported)).unwrap());
    let loaded = fresh.registry.get_active::<Kind>().unwrap();
    assert_eq!((loaded.a, loaded.b), (40, 41));
    assert_eq!(loaded.label, "base");
}

#[test]
fn base_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let build = || {
        let registry = SettingsRegistry::new(
            SettingsStore::new(temp_dir.path(), "project"),
            OverridePlan::new(temp_dir.path()),
        );
        registry.declare::<Kind>(KindDeclaration::editor_user::<Kind>());
        registry
    };

    let first = build();
    first.modify::<Kind>(|k| k.a = 12).unwrap();
    first.save::<Kind>().unwrap();
    drop(first);

    let second = build();
    assert_eq!(second.get_active::<Kind>().unwrap().a, 12);
    assert!(
        temp_dir
            .path()
            .join("Settings/Editor/User/project/Kind.json")
            .exists()
    );
}

#[test]
fn corrupt_base_file_is_left_alone() {
    let fx = fixture(&[]);
    let base_path = fx.registry.store().path_for(&fx.registry.kinds()[0]);
    std::fs::create_dir_all(base_path.parent().unwrap()).unwrap();
    write(&base_path, "{ corrupt");

    assert_eq!(*fx.registry.get_active::<Kind>().unwrap(), Kind::default());
    assert_eq!(std::fs::read_to_string(&base_path).unwrap(), "{ corrupt");
}
