use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info_span, warn, Span};

use crate::channel::{Broadcaster, Channel, ChannelError, ChannelReceiver};
use crate::pubsub::{PublishSubscribeDelegate, Subscription, Topic};
use crate::status::StatusController;
use crate::util::lock;
use crate::workbench::WorkbenchServices;

use super::{
    ImportState, ImportStateError, Module, ModuleComponent, ModuleComponents, ModuleContext,
    ModuleInstanceId, SyncSettingKey,
};

const IMPORT_STATE: Topic<ImportState> = Topic::new("instance.import_state");
const SYNCED_SETTINGS: Topic<Vec<SyncSettingKey>> = Topic::new("instance.synced_settings");
const TITLE: Topic<String> = Topic::new("instance.title");
const FATAL_ERROR: Topic<Option<FatalError>> = Topic::new("instance.fatal_error");

/// The component of a module instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    /// The view component.
    View,
    /// The settings component.
    Settings,
}

/// An unrecoverable error raised by a component of an instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalError {
    /// The failing component.
    pub component: ComponentKind,
    /// Description of the error.
    pub message: String,
}

/// Workbench handles shared by all instances.
#[derive(Clone, Debug)]
pub(crate) struct InstanceEnvironment {
    pub(crate) broadcaster: Broadcaster,
    pub(crate) services: WorkbenchServices,
    pub(crate) log_capacity: usize,
}

struct InstanceState<S> {
    import_state: ImportState,
    import_error: Option<String>,
    components: Option<ModuleComponents<S>>,
    context: Option<Arc<ModuleContext<S>>>,
    title: String,
    fatal_error: Option<FatalError>,
    destroyed: bool,
}

/// A live instance of a [`Module`] whose state is of type `S`.
///
/// Instances are created by the
/// [`Workbench`](crate::workbench::Workbench), which also owns them. Every
/// channel declared by the module is registered when the instance is created
/// and unregistered when it is destroyed.
pub struct ModuleInstance<S> {
    id: ModuleInstanceId,
    module: Arc<Module<S>>,
    state: Mutex<InstanceState<S>>,
    synced_settings: Arc<Mutex<BTreeSet<SyncSettingKey>>>,
    status: StatusController,
    channels: Vec<Arc<Channel>>,
    receivers: Vec<ChannelReceiver>,
    subscriptions: Mutex<Vec<Subscription>>,
    env: InstanceEnvironment,
    delegate: PublishSubscribeDelegate,
    span: Span,
}

impl<S> ModuleInstance<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        id: ModuleInstanceId,
        module: Arc<Module<S>>,
        env: InstanceEnvironment,
    ) -> Result<Self, ChannelError> {
        let mut channels = Vec::with_capacity(module.channel_definitions().len());
        for definition in module.channel_definitions() {
            match env.broadcaster.register_channel(&id, definition) {
                Ok(channel) => channels.push(channel),
                Err(e) => {
                    env.broadcaster.unregister_all_channels_of(&id);
                    return Err(e);
                }
            }
        }
        let receivers = module
            .receiver_definitions()
            .iter()
            .map(|definition| ChannelReceiver::new(id.clone(), definition))
            .collect();

        let title = module.default_title().to_string();
        let delegate = PublishSubscribeDelegate::new(format!("instance:{id}"));
        delegate.notify_subscribers(&IMPORT_STATE, ImportState::NotImported);
        delegate.notify_subscribers(&SYNCED_SETTINGS, Vec::new());
        delegate.notify_subscribers(&TITLE, title.clone());
        delegate.notify_subscribers(&FATAL_ERROR, None);

        Ok(Self {
            status: StatusController::new(id.clone(), env.log_capacity),
            span: info_span!("module_instance", id = %id),
            id,
            module,
            state: Mutex::new(InstanceState {
                import_state: ImportState::NotImported,
                import_error: None,
                components: None,
                context: None,
                title,
                fatal_error: None,
                destroyed: false,
            }),
            synced_settings: Arc::new(Mutex::new(BTreeSet::new())),
            channels,
            receivers,
            subscriptions: Mutex::new(Vec::new()),
            env,
            delegate,
        })
    }

    /// Returns the instance identifier.
    pub fn id(&self) -> &ModuleInstanceId {
        &self.id
    }

    /// Returns the module definition.
    pub fn module(&self) -> &Module<S> {
        &self.module
    }

    /// Returns the title of the instance.
    pub fn title(&self) -> String {
        lock(&self.state).title.clone()
    }

    /// Changes the title of the instance.
    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        {
            let mut state = lock(&self.state);
            if state.title == title {
                return;
            }
            state.title = title.clone();
        }
        self.delegate.notify_subscribers(&TITLE, title);
    }

    /// Subscribes to title changes.
    pub fn subscribe_to_title_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.delegate.subscribe(&TITLE, self.in_span(callback))
    }

    /// Returns the import state.
    pub fn import_state(&self) -> ImportState {
        lock(&self.state).import_state
    }

    /// Returns the reason of a failed import.
    pub fn import_error(&self) -> Option<String> {
        lock(&self.state).import_error.clone()
    }

    /// Moves the import state machine to `next`.
    ///
    /// Transitions not allowed by
    /// [`ImportState::can_transition_to()`] are rejected and leave the state
    /// unchanged. Moving to `Imported` is only possible with
    /// [`set_imported()`](Self::set_imported).
    pub fn set_import_state(&self, next: ImportState) -> Result<(), ImportStateError> {
        if next == ImportState::Imported {
            let from = self.import_state();
            warn!(instance = %self.id, "import cannot complete without components");
            return Err(ImportStateError { from, to: next });
        }

        self.transition(next, |_| {})
    }

    /// Marks the components as being resolved.
    pub fn set_importing(&self) -> Result<(), ImportStateError> {
        self.set_import_state(ImportState::Importing)
    }

    /// Stores the resolved components and marks the import as complete.
    pub fn set_imported(&self, components: ModuleComponents<S>) -> Result<(), ImportStateError> {
        self.transition(ImportState::Imported, move |state| {
            state.components = Some(components);
        })
    }

    /// Marks the import as failed.
    pub fn set_import_failed(&self, reason: impl Into<String>) -> Result<(), ImportStateError> {
        let reason = reason.into();
        error!(instance = %self.id, reason = %reason, "module import failed");

        self.transition(ImportState::Failed, move |state| {
            state.import_error = Some(reason);
        })
    }

    fn transition(
        &self,
        next: ImportState,
        on_success: impl FnOnce(&mut InstanceState<S>),
    ) -> Result<(), ImportStateError> {
        {
            let mut state = lock(&self.state);
            let from = state.import_state;
            if state.destroyed {
                drop(state);
                warn!(instance = %self.id, to = ?next, "import state of a destroyed instance is frozen");
                return Err(ImportStateError { from, to: next });
            }
            if !from.can_transition_to(next) {
                drop(state);
                warn!(instance = %self.id, ?from, to = ?next, "import state transition rejected");
                return Err(ImportStateError { from, to: next });
            }
            state.import_state = next;
            on_success(&mut state);
        }
        debug!(instance = %self.id, state = ?next, "import state changed");
        self.delegate.notify_subscribers(&IMPORT_STATE, next);

        Ok(())
    }

    /// Subscribes to import state changes.
    ///
    /// The callback immediately receives the current state.
    pub fn subscribe_to_import_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ImportState) + Send + Sync + 'static,
    {
        self.delegate.subscribe(&IMPORT_STATE, self.in_span(callback))
    }

    /// Returns the view component once imported.
    pub fn view_fc(&self) -> Option<ModuleComponent<S>> {
        let state = lock(&self.state);
        match state.import_state {
            ImportState::Imported => state.components.as_ref().map(ModuleComponents::view),
            _ => None,
        }
    }

    /// Returns the settings component once imported.
    pub fn settings_fc(&self) -> Option<ModuleComponent<S>> {
        let state = lock(&self.state);
        match state.import_state {
            ImportState::Imported => state.components.as_ref().map(ModuleComponents::settings),
            _ => None,
        }
    }

    /// Returns the context, creating it on first call.
    ///
    /// A destroyed instance hands out a closed context that is not retained.
    pub fn get_or_create_context(&self) -> Arc<ModuleContext<S>> {
        let mut state = lock(&self.state);
        if state.destroyed {
            drop(state);
            warn!(instance = %self.id, "context requested from a destroyed instance");
            let context = Arc::new(self.make_context());
            context.close();

            return context;
        }
        state
            .context
            .get_or_insert_with(|| Arc::new(self.make_context()))
            .clone()
    }

    /// Returns the context if it was already created.
    pub fn context(&self) -> Option<Arc<ModuleContext<S>>> {
        lock(&self.state).context.clone()
    }

    fn make_context(&self) -> ModuleContext<S> {
        ModuleContext::new(
            self.id.clone(),
            self.module.default_state().clone(),
            self.status.clone(),
            self.channels.clone(),
            self.receivers.clone(),
            self.env.services.clone(),
            self.synced_settings.clone(),
            self.span.clone(),
        )
    }

    /// Returns the settings this instance may synchronize.
    pub fn supported_sync_settings(&self) -> &[SyncSettingKey] {
        self.module.sync_setting_keys()
    }

    /// Starts synchronizing a setting.
    ///
    /// Returns `true` if the set of synced settings changed. Settings not
    /// supported by the module are ignored.
    pub fn add_synced_setting(&self, key: SyncSettingKey) -> bool {
        if !self.module.sync_setting_keys().contains(&key) {
            warn!(instance = %self.id, ?key, "setting is not supported by the module");
            return false;
        }
        self.update_synced_settings(|keys| keys.insert(key))
    }

    /// Stops synchronizing a setting.
    ///
    /// Returns `true` if the set of synced settings changed.
    pub fn remove_synced_setting(&self, key: SyncSettingKey) -> bool {
        self.update_synced_settings(|keys| keys.remove(&key))
    }

    fn update_synced_settings(&self, f: impl FnOnce(&mut BTreeSet<SyncSettingKey>) -> bool) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let snapshot = {
            let mut keys = lock(&self.synced_settings);
            if !f(&mut keys) {
                return false;
            }

            keys.iter().copied().collect()
        };
        self.delegate.notify_subscribers(&SYNCED_SETTINGS, snapshot);

        true
    }

    /// Returns `true` if the setting is synchronized.
    pub fn is_synced(&self, key: SyncSettingKey) -> bool {
        lock(&self.synced_settings).contains(&key)
    }

    /// Returns the synchronized settings, in declaration order.
    pub fn synced_settings(&self) -> Vec<SyncSettingKey> {
        lock(&self.synced_settings).iter().copied().collect()
    }

    /// Subscribes to changes of the set of synchronized settings.
    pub fn subscribe_to_synced_settings_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Vec<SyncSettingKey>) + Send + Sync + 'static,
    {
        self.delegate.subscribe(&SYNCED_SETTINGS, self.in_span(callback))
    }

    /// Records an unrecoverable error of a component.
    ///
    /// The error is contained to this instance until [`reset()`](Self::reset)
    /// is called.
    pub fn set_fatal_error(&self, component: ComponentKind, message: impl Into<String>) {
        let fatal_error = FatalError {
            component,
            message: message.into(),
        };
        error!(
            instance = %self.id,
            ?component,
            message = %fatal_error.message,
            "module component crashed"
        );
        lock(&self.state).fatal_error = Some(fatal_error.clone());
        self.delegate
            .notify_subscribers(&FATAL_ERROR, Some(fatal_error));
    }

    /// Returns the recorded fatal error, if any.
    pub fn fatal_error(&self) -> Option<FatalError> {
        lock(&self.state).fatal_error.clone()
    }

    /// Clears the fatal error and re-creates the context.
    pub fn reset(&self) {
        let previous = {
            let mut state = lock(&self.state);
            if state.destroyed {
                return;
            }
            state.fatal_error = None;
            let previous = state.context.take();
            if previous.is_some() {
                state.context = Some(Arc::new(self.make_context()));
            }

            previous
        };
        if let Some(context) = previous {
            context.close();
        }
        debug!(instance = %self.id, "instance reset");
        self.delegate.notify_subscribers(&FATAL_ERROR, None);
    }

    /// Subscribes to fatal error changes.
    pub fn subscribe_to_fatal_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Option<FatalError>) + Send + Sync + 'static,
    {
        self.delegate.subscribe(&FATAL_ERROR, self.in_span(callback))
    }

    /// Returns the status controller.
    pub fn status_controller(&self) -> &StatusController {
        &self.status
    }

    /// Returns the channels published by the instance.
    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    /// Returns a channel published by the instance.
    pub fn channel(&self, ident: &str) -> Option<Arc<Channel>> {
        self.channels
            .iter()
            .find(|channel| channel.id().ident == ident)
            .cloned()
    }

    /// Returns the receivers exposed by the instance.
    pub fn receivers(&self) -> &[ChannelReceiver] {
        &self.receivers
    }

    /// Returns a receiver exposed by the instance.
    pub fn receiver(&self, ident: &str) -> Option<ChannelReceiver> {
        self.receivers
            .iter()
            .find(|receiver| receiver.ident() == ident)
            .cloned()
    }

    /// Keeps a subscription alive until the instance is destroyed.
    pub fn hold_subscription(&self, subscription: Subscription) {
        lock(&self.subscriptions).push(subscription);
    }

    /// Tears down the instance.
    ///
    /// Held subscriptions are dropped, channels are unregistered, receivers
    /// are unbound and every subscriber of the instance is removed. Calling
    /// this method more than once is a no-op.
    pub fn destroy(&self) {
        let context = {
            let mut state = lock(&self.state);
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.components = None;

            state.context.take()
        };
        if let Some(context) = context {
            context.close();
        }
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        drop(subscriptions);

        self.env.broadcaster.unregister_all_channels_of(&self.id);
        for receiver in &self.receivers {
            receiver.close();
        }
        self.status.close();
        self.delegate.clear();
        debug!(instance = %self.id, "instance destroyed");
    }

    /// Returns `true` once the instance was destroyed.
    pub fn is_destroyed(&self) -> bool {
        lock(&self.state).destroyed
    }

    fn in_span<T, F>(&self, callback: F) -> impl Fn(&T) + Send + Sync + 'static
    where
        T: 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let span = self.span.clone();

        move |payload: &T| {
            let _enter = span.enter();
            callback(payload)
        }
    }
}

impl<S> fmt::Debug for ModuleInstance<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("id", &self.id)
            .field("module", &self.module.name())
            .finish_non_exhaustive()
    }
}

/// Type-erased handle to a module instance.
///
/// The workbench stores instances of modules with different state types
/// behind this trait. A typed handle can be recovered with
/// [`Workbench::typed_module_instance()`](crate::workbench::Workbench::typed_module_instance).
pub trait AnyModuleInstance: Send + Sync + fmt::Debug {
    /// Returns the instance identifier.
    fn id(&self) -> &ModuleInstanceId;
    /// Returns the name of the module.
    fn module_name(&self) -> &str;
    /// Returns the title of the instance.
    fn title(&self) -> String;
    /// Changes the title of the instance.
    fn set_title(&self, title: String);
    /// Returns the import state.
    fn import_state(&self) -> ImportState;
    /// Marks the components as being resolved.
    fn set_importing(&self) -> Result<(), ImportStateError>;
    /// Marks the import as failed.
    fn set_import_failed(&self, reason: String) -> Result<(), ImportStateError>;
    /// Subscribes to import state changes.
    fn subscribe_to_import_state_change(
        &self,
        callback: Box<dyn Fn(&ImportState) + Send + Sync>,
    ) -> Subscription;
    /// Returns the status controller.
    fn status_controller(&self) -> &StatusController;
    /// Returns the settings the instance may synchronize.
    fn supported_sync_settings(&self) -> &[SyncSettingKey];
    /// Starts synchronizing a setting.
    fn add_synced_setting(&self, key: SyncSettingKey) -> bool;
    /// Stops synchronizing a setting.
    fn remove_synced_setting(&self, key: SyncSettingKey) -> bool;
    /// Returns `true` if the setting is synchronized.
    fn is_synced(&self, key: SyncSettingKey) -> bool;
    /// Returns the synchronized settings.
    fn synced_settings(&self) -> Vec<SyncSettingKey>;
    /// Subscribes to changes of the set of synchronized settings.
    fn subscribe_to_synced_settings_change(
        &self,
        callback: Box<dyn Fn(&Vec<SyncSettingKey>) + Send + Sync>,
    ) -> Subscription;
    /// Returns the channels published by the instance.
    fn channels(&self) -> &[Arc<Channel>];
    /// Returns the receivers exposed by the instance.
    fn receivers(&self) -> &[ChannelReceiver];
    /// Returns a receiver exposed by the instance.
    fn receiver(&self, ident: &str) -> Option<ChannelReceiver>;
    /// Records an unrecoverable error of a component.
    fn set_fatal_error(&self, component: ComponentKind, message: String);
    /// Returns the recorded fatal error, if any.
    fn fatal_error(&self) -> Option<FatalError>;
    /// Clears the fatal error and re-creates the context.
    fn reset(&self);
    /// Keeps a subscription alive until the instance is destroyed.
    fn hold_subscription(&self, subscription: Subscription);
    /// Tears down the instance.
    fn destroy(&self);
    /// Returns `true` once the instance was destroyed.
    fn is_destroyed(&self) -> bool;
    /// Converts the handle for downcasting.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<S> AnyModuleInstance for ModuleInstance<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn id(&self) -> &ModuleInstanceId {
        &self.id
    }
    fn module_name(&self) -> &str {
        self.module.name()
    }
    fn title(&self) -> String {
        ModuleInstance::title(self)
    }
    fn set_title(&self, title: String) {
        ModuleInstance::set_title(self, title)
    }
    fn import_state(&self) -> ImportState {
        ModuleInstance::import_state(self)
    }
    fn set_importing(&self) -> Result<(), ImportStateError> {
        ModuleInstance::set_importing(self)
    }
    fn set_import_failed(&self, reason: String) -> Result<(), ImportStateError> {
        ModuleInstance::set_import_failed(self, reason)
    }
    fn subscribe_to_import_state_change(
        &self,
        callback: Box<dyn Fn(&ImportState) + Send + Sync>,
    ) -> Subscription {
        ModuleInstance::subscribe_to_import_state_change(self, callback)
    }
    fn status_controller(&self) -> &StatusController {
        &self.status
    }
    fn supported_sync_settings(&self) -> &[SyncSettingKey] {
        self.module.sync_setting_keys()
    }
    fn add_synced_setting(&self, key: SyncSettingKey) -> bool {
        ModuleInstance::add_synced_setting(self, key)
    }
    fn remove_synced_setting(&self, key: SyncSettingKey) -> bool {
        ModuleInstance::remove_synced_setting(self, key)
    }
    fn is_synced(&self, key: SyncSettingKey) -> bool {
        ModuleInstance::is_synced(self, key)
    }
    fn synced_settings(&self) -> Vec<SyncSettingKey> {
        ModuleInstance::synced_settings(self)
    }
    fn subscribe_to_synced_settings_change(
        &self,
        callback: Box<dyn Fn(&Vec<SyncSettingKey>) + Send + Sync>,
    ) -> Subscription {
        ModuleInstance::subscribe_to_synced_settings_change(self, callback)
    }
    fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }
    fn receivers(&self) -> &[ChannelReceiver] {
        &self.receivers
    }
    fn receiver(&self, ident: &str) -> Option<ChannelReceiver> {
        ModuleInstance::receiver(self, ident)
    }
    fn set_fatal_error(&self, component: ComponentKind, message: String) {
        ModuleInstance::set_fatal_error(self, component, message)
    }
    fn fatal_error(&self) -> Option<FatalError> {
        ModuleInstance::fatal_error(self)
    }
    fn reset(&self) {
        ModuleInstance::reset(self)
    }
    fn hold_subscription(&self, subscription: Subscription) {
        ModuleInstance::hold_subscription(self, subscription)
    }
    fn destroy(&self) {
        ModuleInstance::destroy(self)
    }
    fn is_destroyed(&self) -> bool {
        ModuleInstance::is_destroyed(self)
    }
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
