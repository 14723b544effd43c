//! The workbench host.
//!
//! A [`Workbench`] owns the module instances created from the modules of its
//! [`ModuleRegistry`], keeps track of the active instance and of the grid
//! layout, and connects instances to one another through data channels and
//! synced settings.
//!
//! Every change of the workbench is published on one of the [`topics`]. The
//! workbench state is always fully updated before any subscriber is invoked,
//! so a subscriber reading the workbench from its callback observes a
//! consistent state. In particular, removing the active instance clears the
//! active instance in the same step.
//!
//! #### Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use workbench::channel::{ChannelDefinition, KeyKind, ReceiverDefinition};
//! use workbench::module::{Module, ModuleRegistry};
//! use workbench::workbench::{topics, Workbench};
//!
//! let mut registry = ModuleRegistry::new();
//! registry
//!     .register(
//!         Module::new("Histogram", ())
//!             .with_channel(ChannelDefinition::new("bins", "Bins", KeyKind::Realization)),
//!     )
//!     .unwrap();
//! registry
//!     .register(
//!         Module::new("Table", ())
//!             .with_receiver(ReceiverDefinition::new("rows", "Rows", [KeyKind::Realization])),
//!     )
//!     .unwrap();
//!
//! let workbench = Workbench::new(registry);
//! let histogram = workbench.make_and_add_module_instance("Histogram").unwrap();
//! let table = workbench.make_and_add_module_instance("Table").unwrap();
//!
//! let active = Arc::new(Mutex::new(Vec::new()));
//! let _subscription = workbench.subscribe(&topics::ACTIVE_MODULE_CHANGED, {
//!     let active = active.clone();
//!     move |id: &Option<_>| active.lock().unwrap().push(id.clone())
//! });
//!
//! workbench.set_active_module_id(histogram.id());
//! workbench
//!     .connect_channel(table.id(), "rows", histogram.channels()[0].id())
//!     .unwrap();
//! workbench.remove_module_instance(histogram.id()).unwrap();
//!
//! // Replay, activation, then removal of the active instance.
//! assert_eq!(active.lock().unwrap().len(), 3);
//! assert_eq!(workbench.active_module_id(), None);
//! assert!(table.receiver("rows").unwrap().contents().is_none());
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, warn};

use crate::channel::{BindingState, Broadcaster, ChannelError, ChannelId};
use crate::config::WorkbenchConfig;
use crate::gui::{event, GuiMessageBroker};
use crate::module::{AnyModuleInstance, InstanceEnvironment, ModuleInstance, ModuleInstanceId, ModuleRegistry};
use crate::progress::ProgressBus;
use crate::pubsub::{PublishSubscribeDelegate, Subscription, Topic};
use crate::query::QueryCache;
use crate::session::WorkbenchSession;
use crate::util::lock;

mod builder;
mod layout;
mod services;

pub use builder::WorkbenchBuilder;
pub use layout::{layout_from_json, layout_to_json, LayoutElement};
pub use services::{SyncedValue, WorkbenchServices};

/// Topics published by the workbench.
pub mod topics {
    use super::*;

    /// The active instance, if any.
    pub const ACTIVE_MODULE_CHANGED: Topic<Option<ModuleInstanceId>> =
        Topic::new("workbench.active_module");
    /// Identifiers of the instances, in creation order.
    pub const MODULE_INSTANCES_CHANGED: Topic<Vec<ModuleInstanceId>> =
        Topic::new("workbench.module_instances");
    /// The grid layout.
    pub const LAYOUT: Topic<Vec<LayoutElement>> = Topic::new("workbench.layout");
    /// The active session, if any.
    pub const ACTIVE_SESSION_CHANGED: Topic<Option<WorkbenchSession>> =
        Topic::new("workbench.active_session");
    /// Request to re-render every instance.
    pub const FULL_RERENDER_REQUESTED: Topic<()> = Topic::transient("workbench.full_rerender");
}

/// Error raised by workbench operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum WorkbenchError {
    /// No module with this name is registered.
    #[error("unknown module `{0}`")]
    UnknownModule(String),
    /// A module with this name is already registered.
    #[error("module `{0}` is already registered")]
    DuplicateModule(String),
    /// No instance with this identifier exists.
    #[error("unknown module instance `{0}`")]
    UnknownModuleInstance(ModuleInstanceId),
    /// The instance has no receiver with this identifier.
    #[error("module instance `{instance}` has no receiver `{ident}`")]
    UnknownReceiver {
        /// The instance.
        instance: ModuleInstanceId,
        /// The receiver identifier.
        ident: String,
    },
    /// No channel with this identifier is registered.
    #[error("unknown channel `{0}`")]
    UnknownChannel(ChannelId),
    /// A channel operation failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Default)]
struct WorkbenchState {
    instances: Vec<Arc<dyn AnyModuleInstance>>,
    active: Option<ModuleInstanceId>,
    /// Incremented on every change of `active`.
    active_revision: u64,
    layout: Vec<LayoutElement>,
    instance_counter: u64,
}

impl WorkbenchState {
    fn instance_ids(&self) -> Vec<ModuleInstanceId> {
        self.instances.iter().map(|i| i.id().clone()).collect()
    }

    fn contains(&self, id: &ModuleInstanceId) -> bool {
        self.instances.iter().any(|i| i.id() == id)
    }

    /// Changes the active instance and returns the revision of the change.
    fn set_active(&mut self, active: Option<ModuleInstanceId>) -> u64 {
        self.active = active;
        self.active_revision += 1;

        self.active_revision
    }
}

/// Host of module instances.
pub struct Workbench {
    registry: ModuleRegistry,
    state: Mutex<WorkbenchState>,
    delegate: PublishSubscribeDelegate,
    gui: GuiMessageBroker,
    broadcaster: Broadcaster,
    services: WorkbenchServices,
    query_cache: Option<QueryCache>,
    config: WorkbenchConfig,
}

impl Workbench {
    /// Creates a workbench with the default configuration.
    pub fn new(registry: ModuleRegistry) -> Self {
        WorkbenchBuilder::new(registry).build()
    }

    /// Returns a builder for a workbench hosting the registered modules.
    pub fn builder(registry: ModuleRegistry) -> WorkbenchBuilder {
        WorkbenchBuilder::new(registry)
    }

    /// Creates an instance of a registered module and appends it to the
    /// instance list.
    ///
    /// The identifier of the instance is `<module-name>-<n>`, where `n` is
    /// never reused within the workbench.
    pub fn make_and_add_module_instance(
        &self,
        module_name: &str,
    ) -> Result<Arc<dyn AnyModuleInstance>, WorkbenchError> {
        let factory = self
            .registry
            .factory(module_name)
            .ok_or_else(|| WorkbenchError::UnknownModule(module_name.to_string()))?;

        let id = {
            let mut state = lock(&self.state);
            let n = state.instance_counter;
            state.instance_counter += 1;

            ModuleInstanceId::new(format!("{module_name}-{n}"))
        };
        let instance = factory.instantiate(id.clone(), self.instance_environment())?;

        let ids = {
            let mut state = lock(&self.state);
            state.instances.push(instance.clone());

            state.instance_ids()
        };
        debug!(instance = %id, "module instance created");
        self.delegate
            .notify_subscribers(&topics::MODULE_INSTANCES_CHANGED, ids);

        Ok(instance)
    }

    fn instance_environment(&self) -> InstanceEnvironment {
        InstanceEnvironment {
            broadcaster: self.broadcaster.clone(),
            services: self.services.clone(),
            log_capacity: self.config.status_log_capacity,
        }
    }

    /// Looks up an instance.
    pub fn module_instance(&self, id: &ModuleInstanceId) -> Option<Arc<dyn AnyModuleInstance>> {
        lock(&self.state)
            .instances
            .iter()
            .find(|i| i.id() == id)
            .cloned()
    }

    /// Looks up an instance of a module whose state is of type `S`.
    ///
    /// Returns `None` if the instance does not exist or has another state
    /// type.
    pub fn typed_module_instance<S>(&self, id: &ModuleInstanceId) -> Option<Arc<ModuleInstance<S>>>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.module_instance(id)?
            .as_any()
            .downcast::<ModuleInstance<S>>()
            .ok()
    }

    /// Returns a snapshot of the instances, in creation order.
    pub fn module_instances(&self) -> Vec<Arc<dyn AnyModuleInstance>> {
        lock(&self.state).instances.clone()
    }

    /// Removes and destroys an instance.
    ///
    /// If the instance is active, the active instance is cleared in the same
    /// step and [`topics::ACTIVE_MODULE_CHANGED`] is notified once. The
    /// instance is destroyed after subscribers of the workbench were
    /// notified.
    pub fn remove_module_instance(&self, id: &ModuleInstanceId) -> Result<(), WorkbenchError> {
        let (instance, active_change, ids, layout) = {
            let mut state = lock(&self.state);
            let position = state
                .instances
                .iter()
                .position(|i| i.id() == id)
                .ok_or_else(|| WorkbenchError::UnknownModuleInstance(id.clone()))?;
            let instance = state.instances.remove(position);

            let active_change =
                (state.active.as_ref() == Some(id)).then(|| state.set_active(None));

            let layout_len = state.layout.len();
            state.layout.retain(|element| &element.module_instance_id != id);
            let layout = (state.layout.len() != layout_len).then(|| state.layout.clone());

            (instance, active_change, state.instance_ids(), layout)
        };
        debug!(instance = %id, "module instance removed");

        if let Some(revision) = active_change {
            self.announce_active(revision, None);
        }
        self.delegate
            .notify_subscribers(&topics::MODULE_INSTANCES_CHANGED, ids);
        if let Some(layout) = layout {
            self.delegate.notify_subscribers(&topics::LAYOUT, layout);
        }
        instance.destroy();

        Ok(())
    }

    /// Removes and destroys every instance and empties the layout.
    pub fn clear_layout(&self) {
        let (instances, active_change) = {
            let mut state = lock(&self.state);
            state.layout.clear();
            let active_change = state.active.is_some().then(|| state.set_active(None));

            (std::mem::take(&mut state.instances), active_change)
        };
        debug!(count = instances.len(), "layout cleared");

        if let Some(revision) = active_change {
            self.announce_active(revision, None);
        }
        self.delegate
            .notify_subscribers(&topics::MODULE_INSTANCES_CHANGED, Vec::new());
        self.delegate.notify_subscribers(&topics::LAYOUT, Vec::new());
        for instance in instances {
            instance.destroy();
        }
    }

    /// Returns the grid layout.
    pub fn layout(&self) -> Vec<LayoutElement> {
        lock(&self.state).layout.clone()
    }

    /// Replaces the grid layout.
    ///
    /// Elements referring to instances that do not exist are dropped.
    pub fn set_layout(&self, layout: Vec<LayoutElement>) {
        let layout = {
            let mut state = lock(&self.state);
            let (kept, dropped): (Vec<_>, Vec<_>) = layout
                .into_iter()
                .partition(|element| state.contains(&element.module_instance_id));
            for element in &dropped {
                warn!(instance = %element.module_instance_id, "layout element without instance dropped");
            }
            state.layout = kept;

            state.layout.clone()
        };
        self.delegate.notify_subscribers(&topics::LAYOUT, layout);
    }

    /// Replaces every instance by new instances created from a layout.
    ///
    /// The instance identifiers of the layout are replaced by those of the
    /// new instances. Nothing is changed if a module of the layout is not
    /// registered.
    pub fn load_layout(&self, layout: Vec<LayoutElement>) -> Result<(), WorkbenchError> {
        if let Some(element) = layout.iter().find(|e| !self.registry.contains(&e.module_name)) {
            return Err(WorkbenchError::UnknownModule(element.module_name.clone()));
        }
        self.clear_layout();

        let mut placed = Vec::with_capacity(layout.len());
        for mut element in layout {
            let instance = self.make_and_add_module_instance(&element.module_name)?;
            element.module_instance_id = instance.id().clone();
            placed.push(element);
        }
        self.set_layout(placed);

        Ok(())
    }

    /// Makes an instance the active one.
    ///
    /// Identifiers of instances that do not exist are ignored. Subscribers
    /// are only notified if the active instance changes. Returns `true` if the
    /// active instance changed.
    pub fn set_active_module_id(&self, id: &ModuleInstanceId) -> bool {
        let revision = {
            let mut state = lock(&self.state);
            if !state.contains(id) {
                drop(state);
                warn!(instance = %id, "cannot activate unknown module instance");
                return false;
            }
            if state.active.as_ref() == Some(id) {
                return false;
            }
            state.set_active(Some(id.clone()))
        };
        debug!(instance = %id, "active module instance changed");
        self.announce_active(revision, Some(id.clone()));

        true
    }

    /// Clears the active instance.
    pub fn clear_active_module(&self) {
        let revision = {
            let mut state = lock(&self.state);
            if state.active.is_none() {
                return;
            }

            state.set_active(None)
        };
        self.announce_active(revision, None);
    }

    /// Notifies the active instance set at `revision`.
    ///
    /// Subscribers are notified outside of the state lock, so a concurrent
    /// change may be notified before this one. In that case the current
    /// active instance is notified again so that the latest notified value
    /// always matches the state.
    fn announce_active(&self, mut revision: u64, mut active: Option<ModuleInstanceId>) {
        loop {
            self.delegate
                .notify_subscribers(&topics::ACTIVE_MODULE_CHANGED, active);

            let state = lock(&self.state);
            if state.active_revision == revision {
                return;
            }
            revision = state.active_revision;
            active = state.active.clone();
        }
    }

    /// Returns the identifier of the active instance, if any.
    pub fn active_module_id(&self) -> Option<ModuleInstanceId> {
        lock(&self.state).active.clone()
    }

    /// Returns the active instance, if any.
    pub fn active_module_instance(&self) -> Option<Arc<dyn AnyModuleInstance>> {
        let state = lock(&self.state);
        let active = state.active.as_ref()?;

        state.instances.iter().find(|i| i.id() == active).cloned()
    }

    /// Sets the active session, notifying subscribers if it changes.
    pub fn set_active_session(&self, session: Option<WorkbenchSession>) {
        let unchanged = match (&self.services.active_session(), &session) {
            (Some(current), Some(new)) => current.ptr_eq(new),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }
        self.services.set_active_session(session.clone());
        self.delegate
            .notify_subscribers(&topics::ACTIVE_SESSION_CHANGED, session);
    }

    /// Returns the active session, if any.
    pub fn active_session(&self) -> Option<WorkbenchSession> {
        self.services.active_session()
    }

    /// Asks every instance to re-render.
    pub fn request_full_rerender(&self) {
        self.delegate
            .notify_subscribers(&topics::FULL_RERENDER_REQUESTED, ());
    }

    /// Subscribes to one of the workbench [`topics`].
    pub fn subscribe<T, F>(&self, topic: &Topic<T>, callback: F) -> Subscription
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.delegate.subscribe(topic, callback)
    }

    /// Binds a receiver of an instance to a channel.
    ///
    /// A channel whose key kind the receiver does not accept is not an error:
    /// the returned state is then [`BindingState::InvalidKeyKind`].
    pub fn connect_channel(
        &self,
        receiver_instance: &ModuleInstanceId,
        receiver_ident: &str,
        channel_id: &ChannelId,
    ) -> Result<BindingState, WorkbenchError> {
        let receiver = self.receiver(receiver_instance, receiver_ident)?;
        let channel = self
            .broadcaster
            .channel(channel_id)
            .ok_or_else(|| WorkbenchError::UnknownChannel(channel_id.clone()))?;

        let binding = receiver.bind(&channel);
        self.gui
            .publish_event(&event::DATA_CHANNEL_CONNECTIONS_CHANGE, ());

        Ok(binding)
    }

    /// Unbinds a receiver of an instance.
    pub fn disconnect_channel(
        &self,
        receiver_instance: &ModuleInstanceId,
        receiver_ident: &str,
    ) -> Result<(), WorkbenchError> {
        let receiver = self.receiver(receiver_instance, receiver_ident)?;
        receiver.unbind();
        self.gui
            .publish_event(&event::DATA_CHANNEL_CONNECTIONS_CHANGE, ());

        Ok(())
    }

    fn receiver(
        &self,
        instance_id: &ModuleInstanceId,
        ident: &str,
    ) -> Result<crate::channel::ChannelReceiver, WorkbenchError> {
        let instance = self
            .module_instance(instance_id)
            .ok_or_else(|| WorkbenchError::UnknownModuleInstance(instance_id.clone()))?;

        instance
            .receiver(ident)
            .ok_or_else(|| WorkbenchError::UnknownReceiver {
                instance: instance_id.clone(),
                ident: ident.to_string(),
            })
    }

    /// Delivers the synced setting values whose debounce window has elapsed.
    ///
    /// Hosts call this method from their event loop. Returns the number of
    /// delivered values.
    pub fn process_pending_timers(&self) -> usize {
        self.services.process_pending_timers()
    }

    /// Delivers every pending synced setting value immediately.
    pub fn flush_synced_settings(&self) -> usize {
        self.services.flush_synced_settings()
    }

    /// Returns the GUI message broker.
    pub fn gui_message_broker(&self) -> &GuiMessageBroker {
        &self.gui
    }

    /// Returns the channel broadcaster.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Returns the services shared with module instances.
    pub fn services(&self) -> &WorkbenchServices {
        &self.services
    }

    /// Returns the progress bus.
    pub fn progress_bus(&self) -> &ProgressBus {
        self.services.progress_bus()
    }

    /// Returns the query cache, if the workbench was built with a spawner.
    pub fn query_cache(&self) -> Option<&QueryCache> {
        self.query_cache.as_ref()
    }

    /// Returns the module registry.
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Returns the configuration.
    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }
}

impl Drop for Workbench {
    fn drop(&mut self) {
        let instances = std::mem::take(&mut lock(&self.state).instances);
        for instance in instances {
            instance.destroy();
        }
    }
}

impl fmt::Debug for Workbench {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Workbench")
            .field("instances", &state.instance_ids())
            .field("active", &state.active)
            .finish_non_exhaustive()
    }
}
