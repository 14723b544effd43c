use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::Span;

use crate::channel::{Channel, ChannelReceiver};
use crate::progress::ProgressBus;
use crate::pubsub::{PublishSubscribeDelegate, Subscription, Topic};
use crate::session::WorkbenchSession;
use crate::status::StatusController;
use crate::util::lock;
use crate::workbench::WorkbenchServices;

use super::{ModuleInstanceId, SyncSettingKey};

/// Observable per-instance state of type `S`.
///
/// Cloning a store yields a handle to the same state.
pub struct StateStore<S> {
    state: Arc<Mutex<S>>,
    delegate: PublishSubscribeDelegate,
}

impl<S> StateStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    const STATE: Topic<S> = Topic::new("state");

    /// Creates a store holding the initial state.
    pub fn new(initial: S) -> Self {
        let delegate = PublishSubscribeDelegate::new("state-store");
        delegate.notify_subscribers(&Self::STATE, initial.clone());

        Self {
            state: Arc::new(Mutex::new(initial)),
            delegate,
        }
    }

    /// Returns a copy of the current state.
    pub fn get(&self) -> S {
        lock(&self.state).clone()
    }

    /// Reads the current state without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&lock(&self.state))
    }

    /// Replaces the state and notifies subscribers.
    pub fn set(&self, state: S) {
        self.update(|current| *current = state);
    }

    /// Modifies the state in place and notifies subscribers.
    pub fn update(&self, f: impl FnOnce(&mut S)) {
        let snapshot = {
            let mut state = lock(&self.state);
            f(&mut state);

            state.clone()
        };
        self.delegate.notify_subscribers(&Self::STATE, snapshot);
    }

    /// Subscribes to state changes.
    ///
    /// The callback immediately receives the current state.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.delegate.subscribe(&Self::STATE, callback)
    }
}

impl<S> Clone for StateStore<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            delegate: self.delegate.clone(),
        }
    }
}

impl<S> fmt::Debug for StateStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

/// Handles given to the components of a module instance.
///
/// The context is created once per instance, on first request, and
/// re-created when the instance recovers from a fatal error.
pub struct ModuleContext<S> {
    instance_id: ModuleInstanceId,
    state_store: StateStore<S>,
    status: StatusController,
    channels: Vec<Arc<Channel>>,
    receivers: Vec<ChannelReceiver>,
    services: WorkbenchServices,
    synced_settings: Arc<Mutex<BTreeSet<SyncSettingKey>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    span: Span,
}

impl<S> ModuleContext<S>
where
    S: Clone + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        instance_id: ModuleInstanceId,
        initial_state: S,
        status: StatusController,
        channels: Vec<Arc<Channel>>,
        receivers: Vec<ChannelReceiver>,
        services: WorkbenchServices,
        synced_settings: Arc<Mutex<BTreeSet<SyncSettingKey>>>,
        span: Span,
    ) -> Self {
        Self {
            instance_id,
            state_store: StateStore::new(initial_state),
            status,
            channels,
            receivers,
            services,
            synced_settings,
            subscriptions: Mutex::new(Vec::new()),
            span,
        }
    }

    /// Returns the identifier of the owning instance.
    pub fn instance_id(&self) -> &ModuleInstanceId {
        &self.instance_id
    }

    /// Returns the instance state.
    pub fn state_store(&self) -> &StateStore<S> {
        &self.state_store
    }

    /// Returns the status controller of the instance.
    pub fn status_controller(&self) -> &StatusController {
        &self.status
    }

    /// Returns a channel published by the instance.
    pub fn channel(&self, ident: &str) -> Option<Arc<Channel>> {
        self.channels
            .iter()
            .find(|channel| channel.id().ident == ident)
            .cloned()
    }

    /// Returns a receiver exposed by the instance.
    pub fn receiver(&self, ident: &str) -> Option<ChannelReceiver> {
        self.receivers
            .iter()
            .find(|receiver| receiver.ident() == ident)
            .cloned()
    }

    /// Returns the workbench-wide services.
    pub fn services(&self) -> &WorkbenchServices {
        &self.services
    }

    /// Returns the active session, if any.
    pub fn workbench_session(&self) -> Option<WorkbenchSession> {
        self.services.active_session()
    }

    /// Returns the progress bus of the workbench.
    pub fn progress_bus(&self) -> &ProgressBus {
        self.services.progress_bus()
    }

    /// Returns `true` if the instance currently syncs the setting.
    pub fn is_synced(&self, key: SyncSettingKey) -> bool {
        lock(&self.synced_settings).contains(&key)
    }

    /// Publishes the value of a setting to the other instances.
    ///
    /// Nothing is published unless the instance syncs the setting. Returns
    /// `true` if the value was handed to the workbench.
    pub fn publish_synced_value(&self, key: SyncSettingKey, value: serde_json::Value) -> bool {
        if !self.is_synced(key) {
            return false;
        }
        self.services
            .publish_synced_value(key, value, self.instance_id.clone());

        true
    }

    /// Registers a callback for values of a setting published by other
    /// instances.
    ///
    /// Values are only delivered while the instance syncs the setting. The
    /// subscription lives as long as the context.
    pub fn subscribe_to_synced_value<F>(&self, key: SyncSettingKey, callback: F)
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let instance_id = self.instance_id.clone();
        let synced_settings = self.synced_settings.clone();
        let span = self.span.clone();

        let subscription = self.services.subscribe_to_synced_value(key, move |synced| {
            if synced.publisher == instance_id || !lock(&synced_settings).contains(&key) {
                return;
            }
            let _enter = span.enter();
            callback(&synced.value);
        });
        self.hold(subscription);
    }

    /// Keeps a subscription alive for as long as the context.
    pub fn hold(&self, subscription: Subscription) {
        lock(&self.subscriptions).push(subscription);
    }

    /// Returns the tracing span of the instance.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Drops every subscription held by the context.
    pub(crate) fn close(&self) {
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        drop(subscriptions);
    }
}

impl<S> fmt::Debug for ModuleContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn state_store_notifies_updates() {
        let store = StateStore::new(1u32);
        let sum = Arc::new(AtomicUsize::new(0));
        let _sub = store.subscribe({
            let sum = sum.clone();
            move |value: &u32| {
                sum.fetch_add(*value as usize, Ordering::Relaxed);
            }
        });

        store.update(|value| *value += 1);
        store.set(10);

        assert_eq!(sum.load(Ordering::Relaxed), 1 + 2 + 10);
        assert_eq!(store.with(|value| *value), 10);
    }
}
