//! Mirroring of settings across instances.

use std::time::Duration;

use serde_json::json;
use workbench::config::WorkbenchConfig;
use workbench::module::{Module, ModuleRegistry, SyncSettingKey};
use workbench::time::ManualClock;
use workbench::workbench::Workbench;

use crate::{init_tracing, recorder};

fn registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry
        .register(
            Module::new("Map", ()).with_sync_setting_keys([SyncSettingKey::Ensemble, SyncSettingKey::Date]),
        )
        .unwrap();
    registry
        .register(Module::new("Table", ()).with_sync_setting_keys([SyncSettingKey::Ensemble]))
        .unwrap();

    registry
}

#[test]
fn values_reach_other_synced_instances_only() {
    init_tracing();

    let workbench = Workbench::new(registry());
    let map = workbench.make_and_add_module_instance("Map").unwrap();
    let map = workbench.typed_module_instance::<()>(map.id()).unwrap();
    let table_a = workbench.make_and_add_module_instance("Table").unwrap();
    let table_b = workbench.make_and_add_module_instance("Table").unwrap();
    let table_a = workbench.typed_module_instance::<()>(table_a.id()).unwrap();
    let table_b = workbench.typed_module_instance::<()>(table_b.id()).unwrap();

    for instance in [&map, &table_a] {
        assert!(instance.add_synced_setting(SyncSettingKey::Ensemble));
    }
    // Not declared by the module.
    assert!(!table_a.add_synced_setting(SyncSettingKey::Date));

    let (seen_a, callback_a) = recorder();
    table_a
        .get_or_create_context()
        .subscribe_to_synced_value(SyncSettingKey::Ensemble, callback_a);
    let (seen_b, callback_b) = recorder();
    table_b
        .get_or_create_context()
        .subscribe_to_synced_value(SyncSettingKey::Ensemble, callback_b);
    let (seen_map, callback_map) = recorder();
    map.get_or_create_context()
        .subscribe_to_synced_value(SyncSettingKey::Ensemble, callback_map);

    assert!(map
        .get_or_create_context()
        .publish_synced_value(SyncSettingKey::Ensemble, json!("drogon::iter-0")));
    assert!(!table_b
        .get_or_create_context()
        .publish_synced_value(SyncSettingKey::Ensemble, json!("ignored")));

    assert_eq!(*seen_a.lock().unwrap(), vec![json!("drogon::iter-0")]);
    assert!(seen_b.lock().unwrap().is_empty());
    assert!(seen_map.lock().unwrap().is_empty());
}

#[test]
fn debounced_values_are_delivered_once_the_window_elapses() {
    let clock = ManualClock::new();
    let workbench = Workbench::builder(registry())
        .with_config(WorkbenchConfig {
            synced_settings_debounce_ms: 100,
            ..WorkbenchConfig::default()
        })
        .set_clock(clock.clone())
        .build();

    let map = workbench.make_and_add_module_instance("Map").unwrap();
    let table = workbench.make_and_add_module_instance("Table").unwrap();
    let map = workbench.typed_module_instance::<()>(map.id()).unwrap();
    let table = workbench.typed_module_instance::<()>(table.id()).unwrap();
    map.add_synced_setting(SyncSettingKey::Ensemble);
    table.add_synced_setting(SyncSettingKey::Ensemble);

    let (seen, callback) = recorder();
    table
        .get_or_create_context()
        .subscribe_to_synced_value(SyncSettingKey::Ensemble, callback);

    let context = map.get_or_create_context();
    context.publish_synced_value(SyncSettingKey::Ensemble, json!(1));
    clock.advance(Duration::from_millis(50));
    context.publish_synced_value(SyncSettingKey::Ensemble, json!(2));
    clock.advance(Duration::from_millis(60));
    assert_eq!(workbench.process_pending_timers(), 0);

    clock.advance(Duration::from_millis(40));
    assert_eq!(workbench.process_pending_timers(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![json!(2)]);

    context.publish_synced_value(SyncSettingKey::Ensemble, json!(3));
    assert_eq!(workbench.flush_synced_settings(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![json!(2), json!(3)]);
}

#[test]
fn unsyncing_stops_delivery() {
    let workbench = Workbench::new(registry());
    let map = workbench.make_and_add_module_instance("Map").unwrap();
    let table = workbench.make_and_add_module_instance("Table").unwrap();
    let map = workbench.typed_module_instance::<()>(map.id()).unwrap();
    let table = workbench.typed_module_instance::<()>(table.id()).unwrap();
    map.add_synced_setting(SyncSettingKey::Ensemble);
    table.add_synced_setting(SyncSettingKey::Ensemble);

    let (seen, callback) = recorder();
    table
        .get_or_create_context()
        .subscribe_to_synced_value(SyncSettingKey::Ensemble, callback);
    let context = map.get_or_create_context();

    context.publish_synced_value(SyncSettingKey::Ensemble, json!("a"));
    assert!(table.remove_synced_setting(SyncSettingKey::Ensemble));
    context.publish_synced_value(SyncSettingKey::Ensemble, json!("b"));

    assert_eq!(*seen.lock().unwrap(), vec![json!("a")]);
    assert_eq!(table.synced_settings(), Vec::new());
}
