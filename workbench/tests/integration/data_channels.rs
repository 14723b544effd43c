//! Binding of receivers to the channels of other instances.

use std::sync::Arc;

use workbench::channel::{
    BindingState, ChannelContent, ChannelDefinition, ChannelId, Key, KeyKind, ReceiverDefinition,
};
use workbench::gui::event;
use workbench::module::{Module, ModuleRegistry};
use workbench::workbench::{Workbench, WorkbenchError};

use crate::{init_tracing, recorder};

fn workbench() -> Workbench {
    let mut registry = ModuleRegistry::new();
    registry
        .register(
            Module::new("Distribution", ())
                .with_channel(ChannelDefinition::new("per-realization", "Per realization", KeyKind::Realization))
                .with_channel(ChannelDefinition::new("per-date", "Per date", KeyKind::Date)),
        )
        .unwrap();
    registry
        .register(Module::new("Scatter", ()).with_receiver(ReceiverDefinition::new(
            "x",
            "X axis",
            [KeyKind::Realization, KeyKind::GridIndex],
        )))
        .unwrap();

    Workbench::new(registry)
}

#[test]
fn receiver_follows_channel_contents() {
    init_tracing();

    let workbench = workbench();
    let source = workbench.make_and_add_module_instance("Distribution").unwrap();
    let sink = workbench.make_and_add_module_instance("Scatter").unwrap();
    let channel_id = ChannelId::new(source.id().clone(), "per-realization");

    let binding = workbench.connect_channel(sink.id(), "x", &channel_id).unwrap();
    assert_eq!(binding, BindingState::Bound { channel: channel_id.clone() });

    let receiver = sink.receiver("x").unwrap();
    let (seen, callback) = recorder::<Option<Arc<[ChannelContent]>>>();
    let _sub = receiver.subscribe_to_contents(callback);

    source.channels()[0]
        .publish(vec![
            ChannelContent::new(Key::Realization(0), 12.5),
            ChannelContent::new(Key::Realization(1), 13.0),
        ])
        .unwrap();

    let contents = receiver.contents().unwrap();
    assert_eq!(contents.len(), 2);
    assert_eq!(contents[1].value, 13.0);
    let last = seen.lock().unwrap().last().cloned().flatten().unwrap();
    assert_eq!(last.len(), 2);
}

#[test]
fn mismatched_key_kind_is_not_bound() {
    let workbench = workbench();
    let source = workbench.make_and_add_module_instance("Distribution").unwrap();
    let sink = workbench.make_and_add_module_instance("Scatter").unwrap();
    let channel_id = ChannelId::new(source.id().clone(), "per-date");

    let binding = workbench.connect_channel(sink.id(), "x", &channel_id).unwrap();

    assert_eq!(
        binding,
        BindingState::InvalidKeyKind {
            channel: channel_id,
            kind_of_key: KeyKind::Date
        }
    );
    assert!(sink.receiver("x").unwrap().contents().is_none());
}

#[test]
fn publishing_a_foreign_key_kind_is_rejected() {
    let workbench = workbench();
    let source = workbench.make_and_add_module_instance("Distribution").unwrap();
    let channel = &source.channels()[0];
    channel
        .publish(vec![ChannelContent::new(Key::Realization(3), 1.0)])
        .unwrap();

    let result = channel.publish(vec![
        ChannelContent::new(Key::Realization(4), 2.0),
        ChannelContent::new(Key::Date(19_000), 3.0),
    ]);

    assert!(result.is_err());
    assert_eq!(channel.contents().len(), 1);
}

#[test]
fn removing_the_publisher_unbinds_the_receiver() {
    let workbench = workbench();
    let source = workbench.make_and_add_module_instance("Distribution").unwrap();
    let sink = workbench.make_and_add_module_instance("Scatter").unwrap();
    let channel_id = ChannelId::new(source.id().clone(), "per-realization");
    workbench.connect_channel(sink.id(), "x", &channel_id).unwrap();

    let receiver = sink.receiver("x").unwrap();
    let (bindings, callback) = recorder();
    let _sub = receiver.subscribe_to_binding(callback);

    workbench.remove_module_instance(source.id()).unwrap();

    assert_eq!(receiver.binding(), BindingState::Unbound);
    assert_eq!(bindings.lock().unwrap().last(), Some(&BindingState::Unbound));
    assert!(workbench.broadcaster().channel(&channel_id).is_none());
    assert!(matches!(
        workbench.connect_channel(sink.id(), "x", &channel_id),
        Err(WorkbenchError::UnknownChannel(_))
    ));
}

#[test]
fn connection_changes_are_announced() {
    let workbench = workbench();
    let source = workbench.make_and_add_module_instance("Distribution").unwrap();
    let sink = workbench.make_and_add_module_instance("Scatter").unwrap();
    let channel_id = ChannelId::new(source.id().clone(), "per-realization");

    let (events, callback) = recorder::<()>();
    let _sub = workbench
        .gui_message_broker()
        .subscribe_to_event(&event::DATA_CHANNEL_CONNECTIONS_CHANGE, callback);

    workbench.connect_channel(sink.id(), "x", &channel_id).unwrap();
    workbench.disconnect_channel(sink.id(), "x").unwrap();

    assert_eq!(events.lock().unwrap().len(), 2);
    assert!(matches!(
        workbench.disconnect_channel(sink.id(), "y"),
        Err(WorkbenchError::UnknownReceiver { .. })
    ));
}

#[test]
fn rebinding_to_a_silent_channel_hands_out_its_empty_contents() {
    let workbench = workbench();
    let busy = workbench.make_and_add_module_instance("Distribution").unwrap();
    let silent = workbench.make_and_add_module_instance("Distribution").unwrap();
    let sink = workbench.make_and_add_module_instance("Scatter").unwrap();
    let busy_channel = ChannelId::new(busy.id().clone(), "per-realization");
    let silent_channel = ChannelId::new(silent.id().clone(), "per-realization");
    busy.channels()[0]
        .publish(vec![ChannelContent::new(Key::Realization(0), 1.0)])
        .unwrap();

    workbench.connect_channel(sink.id(), "x", &busy_channel).unwrap();
    workbench.connect_channel(sink.id(), "x", &silent_channel).unwrap();

    let receiver = sink.receiver("x").unwrap();
    let (seen, callback) = recorder::<Option<Arc<[ChannelContent]>>>();
    let _sub = receiver.subscribe_to_contents(callback);
    busy.channels()[0]
        .publish(vec![ChannelContent::new(Key::Realization(1), 2.0)])
        .unwrap();

    let lengths: Vec<_> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|contents| contents.as_ref().map(|c| c.len()))
        .collect();
    assert_eq!(lengths, vec![Some(0)]);
    assert!(receiver.contents().unwrap().is_empty());
}

#[test]
fn binding_a_silent_channel_hands_out_empty_contents() {
    let workbench = workbench();
    let source = workbench.make_and_add_module_instance("Distribution").unwrap();
    let sink = workbench.make_and_add_module_instance("Scatter").unwrap();
    let channel_id = ChannelId::new(source.id().clone(), "per-realization");

    workbench.connect_channel(sink.id(), "x", &channel_id).unwrap();

    let (seen, callback) = recorder::<Option<Arc<[ChannelContent]>>>();
    let _sub = sink.receiver("x").unwrap().subscribe_to_contents(callback);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].as_ref().is_some_and(|contents| contents.is_empty()));
}
