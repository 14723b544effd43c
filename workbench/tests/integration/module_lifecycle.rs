//! Import lifecycle and teardown of module instances.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use workbench::module::{
    ComponentKind, ImportState, ImportStateError, Module, ModuleComponents, ModuleContext,
    ModuleRegistry,
};
use workbench::workbench::Workbench;

use crate::{init_tracing, recorder};

#[derive(Clone, Debug, Default, PartialEq)]
struct MapState {
    zoom: u8,
}

fn workbench() -> Workbench {
    let mut registry = ModuleRegistry::new();
    registry
        .register(Module::new("Map", MapState { zoom: 3 }).with_default_title("Reservoir map"))
        .unwrap();

    Workbench::new(registry)
}

#[test]
fn import_state_only_moves_forward() {
    init_tracing();

    let workbench = workbench();
    let instance = workbench.make_and_add_module_instance("Map").unwrap();
    let map = workbench.typed_module_instance::<MapState>(instance.id()).unwrap();

    let (seen, callback) = recorder();
    let _sub = map.subscribe_to_import_state_change(callback);

    assert_eq!(
        map.set_import_state(ImportState::Failed),
        Err(ImportStateError {
            from: ImportState::NotImported,
            to: ImportState::Failed
        })
    );
    map.set_importing().unwrap();
    map.set_imported(ModuleComponents::new(|_| {}, |_| {})).unwrap();
    assert!(map.set_importing().is_err());
    assert!(map.set_import_failed("late failure").is_err());

    assert_eq!(map.import_state(), ImportState::Imported);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![ImportState::NotImported, ImportState::Importing, ImportState::Imported]
    );
}

#[test]
fn failed_import_keeps_reason_and_has_no_components() {
    let workbench = workbench();
    let instance = workbench.make_and_add_module_instance("Map").unwrap();
    let map = workbench.typed_module_instance::<MapState>(instance.id()).unwrap();

    map.set_importing().unwrap();
    map.set_import_failed("bundle not found").unwrap();

    assert_eq!(map.import_state(), ImportState::Failed);
    assert_eq!(map.import_error().as_deref(), Some("bundle not found"));
    assert!(map.view_fc().is_none());
    assert!(map.settings_fc().is_none());
}

#[test]
fn components_render_with_the_instance_context() {
    let workbench = workbench();
    let instance = workbench.make_and_add_module_instance("Map").unwrap();
    let map = workbench.typed_module_instance::<MapState>(instance.id()).unwrap();
    assert_eq!(map.title(), "Reservoir map");

    let renders = Arc::new(AtomicUsize::new(0));
    map.set_importing().unwrap();
    map.set_imported(ModuleComponents::new(
        {
            let renders = renders.clone();
            move |ctx: &ModuleContext<MapState>| {
                assert_eq!(ctx.state_store().get().zoom, 3);
                renders.fetch_add(1, Ordering::Relaxed);
            }
        },
        |ctx| ctx.state_store().update(|state| state.zoom += 1),
    ))
    .unwrap();

    let context = map.get_or_create_context();
    (map.view_fc().unwrap())(&*context);
    (map.settings_fc().unwrap())(&*context);

    assert_eq!(renders.load(Ordering::Relaxed), 1);
    assert_eq!(context.state_store().get(), MapState { zoom: 4 });
}

#[test]
fn reset_recovers_from_fatal_error() {
    let workbench = workbench();
    let instance = workbench.make_and_add_module_instance("Map").unwrap();
    let map = workbench.typed_module_instance::<MapState>(instance.id()).unwrap();

    let context = map.get_or_create_context();
    context.state_store().set(MapState { zoom: 9 });
    map.set_fatal_error(ComponentKind::View, "division by zero");
    assert_eq!(map.fatal_error().unwrap().component, ComponentKind::View);

    map.reset();

    assert!(map.fatal_error().is_none());
    assert_eq!(map.context().unwrap().state_store().get(), MapState { zoom: 3 });
}

#[test]
fn destroyed_instance_drops_its_subscribers() {
    let workbench = workbench();
    let instance = workbench.make_and_add_module_instance("Map").unwrap();
    let map = workbench.typed_module_instance::<MapState>(instance.id()).unwrap();

    let (titles, callback) = recorder();
    let _sub = map.subscribe_to_title_change(callback);
    workbench.remove_module_instance(instance.id()).unwrap();
    map.set_title("ignored");

    assert!(map.is_destroyed());
    assert_eq!(*titles.lock().unwrap(), vec![String::from("Reservoir map")]);
    assert!(workbench.module_instance(instance.id()).is_none());
}

#[test]
fn removed_instance_no_longer_keeps_a_context() {
    let workbench = workbench();
    let instance = workbench.make_and_add_module_instance("Map").unwrap();
    let map = workbench.typed_module_instance::<MapState>(instance.id()).unwrap();
    map.get_or_create_context().state_store().set(MapState { zoom: 4 });

    workbench.remove_module_instance(instance.id()).unwrap();
    let context = map.get_or_create_context();

    assert_eq!(context.state_store().get(), MapState { zoom: 3 });
    assert!(map.context().is_none());
    assert!(map.set_importing().is_err());
    assert_eq!(map.import_state(), ImportState::NotImported);
}
