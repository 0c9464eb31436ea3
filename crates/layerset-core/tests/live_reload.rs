//! Override files edited while live mode is active

use layerset_core::{
    KindDeclaration, OverridePlan, QueueContext, Settings, SettingsRegistry, SettingsStore,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Graphics {
    quality: u8,
    vsync: bool,
}

impl Settings for Graphics {}

fn drain_until(context: &QueueContext, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..40 {
        context.wait_and_run(Duration::from_millis(100));
        if done() {
            return true;
        }
    }
    false
}

#[test]
fn edits_apply_on_owner_context_only() {
    let temp_dir = TempDir::new().unwrap();
    let overrides = temp_dir.path().join("overrides");
    std::fs::create_dir_all(&overrides).unwrap();
    let file = overrides.join("Graphics.json");
    std::fs::write(&file, r#"{"quality": 1}"#).unwrap();

    let registry = SettingsRegistry::new(
        SettingsStore::new(temp_dir.path(), "project"),
        OverridePlan::new(&overrides),
    );
    registry.declare::<Graphics>(KindDeclaration::runtime_project::<Graphics>().allow_live_reload());

    let context = QueueContext::new();
    registry.enter_live_mode(context.clone());
    assert_eq!(registry.get_active::<Graphics>().unwrap().quality, 1);

    std::thread::sleep(Duration::from_millis(50));
    std::fs::write(&file, r#"{"quality": 3, "vsync": true}"#).unwrap();

    // Until the owner drains its queue the old instance stays active.
    let before = registry.get_active::<Graphics>().unwrap();
    assert_eq!(before.quality, 1);

    let updated = drain_until(&context, || {
        let active = registry.get_active::<Graphics>().unwrap();
        active.quality == 3 && active.vsync
    });
    assert!(updated, "override edit was not applied");

    registry.exit_live_mode();
    assert_eq!(registry.get_active::<Graphics>().unwrap().quality, 0);

    std::fs::write(&file, r#"{"quality": 9}"#).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    context.run_pending();
    assert_eq!(registry.get_active::<Graphics>().unwrap().quality, 0);
}

#[test]
fn kinds_without_live_reload_are_not_watched() {
    let temp_dir = TempDir::new().unwrap();
    let registry = SettingsRegistry::new(
        SettingsStore::new(temp_dir.path(), "project"),
        OverridePlan::new(temp_dir.path()),
    );
    registry.declare::<Graphics>(KindDeclaration::runtime_project::<Graphics>().allow_overrides());

    registry.enter_live_mode(QueueContext::new());
    assert!(registry.watched_kinds().is_empty());
}
