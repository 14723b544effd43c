//! Workbench-level notifications observed by a host.

use std::sync::{Arc, Mutex};

use workbench::module::{Module, ModuleInstanceId, ModuleRegistry};
use workbench::progress::ProgressMessage;
use workbench::session::WorkbenchSession;
use workbench::status::{self, MessageKind, StatusSource};
use workbench::workbench::{layout_from_json, topics, LayoutElement, Workbench};

use crate::{init_tracing, recorder};

fn workbench() -> Workbench {
    let mut registry = ModuleRegistry::new();
    for name in ["Map", "Histogram", "Table"] {
        registry.register(Module::new(name, ())).unwrap();
    }

    Workbench::new(registry)
}

#[test]
fn removing_the_active_instance_notifies_once_with_consistent_state() {
    init_tracing();

    let workbench = Arc::new(workbench());
    let map = workbench.make_and_add_module_instance("Map").unwrap();
    let table = workbench.make_and_add_module_instance("Table").unwrap();
    workbench.set_active_module_id(map.id());

    // What a subscriber observes of the instance list when notified.
    let observed = Arc::new(Mutex::new(Vec::new()));
    let _sub = workbench.subscribe(&topics::ACTIVE_MODULE_CHANGED, {
        let workbench = Arc::downgrade(&workbench);
        let observed = observed.clone();
        move |active: &Option<ModuleInstanceId>| {
            if let Some(workbench) = workbench.upgrade() {
                observed
                    .lock()
                    .unwrap()
                    .push((active.clone(), workbench.module_instances().len()));
            }
        }
    });

    workbench.remove_module_instance(map.id()).unwrap();
    workbench.remove_module_instance(table.id()).unwrap();

    assert_eq!(
        *observed.lock().unwrap(),
        vec![(Some(map.id().clone()), 2), (None, 1)]
    );
}

#[test]
fn instance_list_and_layout_are_published() {
    let workbench = workbench();
    let (lists, on_list) = recorder::<Vec<ModuleInstanceId>>();
    let (layouts, on_layout) = recorder::<Vec<LayoutElement>>();
    let _list_sub = workbench.subscribe(&topics::MODULE_INSTANCES_CHANGED, on_list);
    let _layout_sub = workbench.subscribe(&topics::LAYOUT, on_layout);

    let layout = layout_from_json(
        r#"[
            {"module_instance_id": "old-1", "module_name": "Map",
             "relative_x": 0.0, "relative_y": 0.0, "relative_width": 0.5, "relative_height": 1.0},
            {"module_instance_id": "old-2", "module_name": "Histogram",
             "relative_x": 0.5, "relative_y": 0.0, "relative_width": 0.5, "relative_height": 1.0,
             "minimized": true}
        ]"#,
    )
    .unwrap();
    workbench.load_layout(layout).unwrap();

    let ids: Vec<String> = workbench
        .layout()
        .iter()
        .map(|element| element.module_instance_id.to_string())
        .collect();
    assert_eq!(ids, vec!["Map-0", "Histogram-1"]);
    assert!(workbench.layout()[1].minimized);
    assert_eq!(lists.lock().unwrap().last().unwrap().len(), 2);
    assert_eq!(layouts.lock().unwrap().last().unwrap().len(), 2);

    let unknown = vec![LayoutElement::new(ModuleInstanceId::new("x"), "Plot")];
    assert!(workbench.load_layout(unknown).is_err());
    assert_eq!(workbench.module_instances().len(), 2);
}

#[test]
fn status_and_progress_reach_the_host() {
    let workbench = workbench();
    let map = workbench.make_and_add_module_instance("Map").unwrap();
    let status = map.status_controller();

    let (loading, on_loading) = recorder::<bool>();
    let _sub = status.subscribe(&status::LOADING, on_loading);
    status.set_loading(StatusSource::View, true);
    status.add_message(StatusSource::Settings, MessageKind::Warning, "no wells selected");
    status.review_and_publish_state();
    status.review_and_publish_state();
    status.set_loading(StatusSource::View, false);
    status.review_and_publish_state();

    assert_eq!(*loading.lock().unwrap(), vec![false, true, false]);
    assert_eq!(status.messages().len(), 1);
    assert_eq!(status.log().len(), 3);

    let (progress, on_progress) = recorder::<Option<f64>>();
    let _progress_sub = workbench
        .progress_bus()
        .subscribe("load-ensembles", move |message: Option<&ProgressMessage>| {
            on_progress(&message.and_then(|m| m.fraction))
        });
    workbench
        .progress_bus()
        .publish("load-ensembles", ProgressMessage::new("Loading").with_fraction(0.5));
    workbench.progress_bus().clear("load-ensembles");

    assert_eq!(*progress.lock().unwrap(), vec![Some(0.5), None]);
}

#[test]
fn session_is_shared_with_module_contexts() {
    let workbench = workbench();
    let map = workbench.make_and_add_module_instance("Map").unwrap();
    let map = workbench.typed_module_instance::<()>(map.id()).unwrap();
    let context = map.get_or_create_context();
    assert!(context.workbench_session().is_none());

    let session = WorkbenchSession::new();
    workbench.set_active_session(Some(session.clone()));

    assert!(context.workbench_session().unwrap().ptr_eq(&session));
}
